//! Shared test utilities for serialising environment mutation.

use std::env;

use tokio::sync::{Mutex, MutexGuard};

/// Global lock serialising tests that mutate process environment variables.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    keys: Vec<String>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Clears every `VI_*` variable the loader reads, then applies `vars`.
    pub async fn with_vars(vars: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut keys = Vec::new();
        for key in ["VI_URL", "VI_USERNAME", "VI_PASSWORD", "VI_POLL_INTERVAL_SECS"] {
            unsafe { env::remove_var(key) };
            keys.push(key.to_owned());
        }
        for (key, value) in vars {
            unsafe { env::set_var(key, value) };
            keys.push((*key).to_owned());
        }
        Self {
            keys,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            unsafe { env::remove_var(key) };
        }
    }
}
