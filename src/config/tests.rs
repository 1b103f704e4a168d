//! Unit tests for configuration loading and credential resolution.

use super::*;
use crate::test_helpers::EnvGuard;
use rstest::{fixture, rstest};

#[fixture]
fn descriptor_with_credentials() -> CloudProperties {
    CloudProperties {
        vi_url: Some(String::from("https://vcenter.example/sdk")),
        vi_username: Some(String::from("prop-user")),
        vi_password: Some(String::from("prop-secret")),
        ..CloudProperties::new("web-1", "base-img")
    }
}

#[rstest]
fn configured_values_take_precedence_over_descriptor(
    descriptor_with_credentials: CloudProperties,
) {
    let cfg = VsphereConfig {
        url: Some(String::from("https://env.example/sdk")),
        username: Some(String::from("env-user")),
        ..VsphereConfig::default()
    };

    let creds = cfg
        .credentials(&descriptor_with_credentials)
        .expect("credentials should resolve");
    assert_eq!(creds.endpoint, "https://env.example/sdk");
    assert_eq!(creds.username, "env-user");
    assert_eq!(creds.password, "prop-secret");
}

#[rstest]
fn blank_configured_value_falls_back_to_descriptor(descriptor_with_credentials: CloudProperties) {
    let cfg = VsphereConfig {
        url: Some(String::from("   ")),
        ..VsphereConfig::default()
    };
    let creds = cfg
        .credentials(&descriptor_with_credentials)
        .expect("credentials should resolve");
    assert_eq!(creds.endpoint, "https://vcenter.example/sdk");
}

#[rstest]
#[case::endpoint("VI_URL", "vi_url")]
#[case::username("VI_USERNAME", "vi_username")]
#[case::password("VI_PASSWORD", "vi_password")]
fn missing_credential_names_both_sources(
    mut descriptor_with_credentials: CloudProperties,
    #[case] env_var: &str,
    #[case] property: &str,
) {
    match property {
        "vi_url" => descriptor_with_credentials.vi_url = None,
        "vi_username" => descriptor_with_credentials.vi_username = None,
        _ => descriptor_with_credentials.vi_password = None,
    }

    let err = VsphereConfig::default()
        .credentials(&descriptor_with_credentials)
        .expect_err("credential should be missing");
    let ConfigError::MissingField(ref message) = err else {
        panic!("expected MissingField error, got {err:?}");
    };
    assert!(message.contains(env_var), "should mention {env_var}: {message}");
    assert!(message.contains(property), "should mention {property}: {message}");
}

#[rstest]
fn credentials_debug_output_redacts_password(descriptor_with_credentials: CloudProperties) {
    let creds = VsphereConfig::default()
        .credentials(&descriptor_with_credentials)
        .expect("credentials should resolve");
    let rendered = format!("{creds:?}");
    assert!(!rendered.contains("prop-secret"), "password leaked: {rendered}");
    assert!(rendered.contains("prop-user"));
}

#[rstest]
fn default_poll_interval_is_two_seconds() {
    assert_eq!(VsphereConfig::default().poll_interval(), Duration::from_secs(2));
}

#[tokio::test]
async fn environment_variables_populate_configuration() {
    let _guard = EnvGuard::with_vars(&[
        ("VI_URL", "https://env.example/sdk"),
        ("VI_USERNAME", "env-user"),
        ("VI_PASSWORD", "env-secret"),
    ])
    .await;

    let cfg = VsphereConfig::load_without_cli_args().expect("configuration should load");
    assert_eq!(cfg.url.as_deref(), Some("https://env.example/sdk"));
    assert_eq!(cfg.username.as_deref(), Some("env-user"));
    assert_eq!(cfg.password.as_deref(), Some("env-secret"));
    assert_eq!(cfg.poll_interval_secs, 2);
}
