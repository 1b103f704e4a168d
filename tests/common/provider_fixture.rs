//! Shared provider fixture for behavioural tests.
//!
//! Reuse via:
//!
//! ```rust
//! #[path = "common/provider_fixture.rs"]
//! mod provider_fixture;
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use vsphere_fleet::test_support::SimulatedInfrastructure;
use vsphere_fleet::{CloudProperties, VsphereConfig, VsphereProvider};

/// Base image every fixture descriptor clones from.
pub const BASE_IMAGE: &str = "base-img";

/// Address pre-seeded on existing `web-1` resources.
#[allow(dead_code, reason = "not every including test file seeds addresses")]
pub fn web_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))
}

/// Descriptor for `name` cloned from [`BASE_IMAGE`].
pub fn props(name: &str) -> CloudProperties {
    CloudProperties::new(name, BASE_IMAGE)
}

fn config() -> VsphereConfig {
    VsphereConfig {
        url: Some(String::from("https://vcenter.example/sdk")),
        username: Some(String::from("admin")),
        password: Some(String::from("secret")),
        poll_interval_secs: 2,
    }
}

/// Connects a provider to `infra` with instant scheduler ticks and clears
/// the login from the call journal.
pub async fn connect(infra: &SimulatedInfrastructure) -> VsphereProvider<SimulatedInfrastructure> {
    let provider = VsphereProvider::connect(infra.clone(), &config(), &CloudProperties::default())
        .await
        .unwrap_or_else(|err| panic!("provider should connect: {err}"))
        .with_poll_interval(Duration::ZERO);
    infra.clear_calls();
    provider
}
