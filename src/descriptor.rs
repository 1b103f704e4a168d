//! Per-instance cloud properties handed over by the host orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cloud properties describing one instance.
///
/// Properties the provider does not know about are kept in `extra` so that
/// [`crate::VsphereProvider::init_instance`] can hand back an otherwise
/// untouched copy.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CloudProperties {
    /// Name of the virtual machine; also used as the instance id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,
    /// Name of the virtual machine to clone new instances from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_vm_name: Option<String>,
    /// Instance id attached by `init_instance`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Fallback API endpoint when `VI_URL` is not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vi_url: Option<String>,
    /// Fallback login name when `VI_USERNAME` is not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vi_username: Option<String>,
    /// Fallback password when `VI_PASSWORD` is not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vi_password: Option<String>,
    /// Any other properties, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Errors raised when a descriptor lacks a required property.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DescriptorError {
    /// Raised when a required property is absent or blank.
    #[error("{property} must be specified for vSphere instances")]
    MissingProperty {
        /// Name of the missing property.
        property: &'static str,
    },
}

impl CloudProperties {
    /// Creates properties for `vm_name` cloned from `base_vm_name`.
    #[must_use]
    pub fn new(vm_name: impl Into<String>, base_vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: Some(vm_name.into()),
            base_vm_name: Some(base_vm_name.into()),
            ..Self::default()
        }
    }

    /// Returns the trimmed virtual machine name.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::MissingProperty`] when `vm_name` is absent
    /// or blank.
    pub fn require_vm_name(&self) -> Result<&str, DescriptorError> {
        require(self.vm_name.as_deref(), "vm_name")
    }

    /// Returns the trimmed base virtual machine name.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::MissingProperty`] when `base_vm_name` is
    /// absent or blank.
    pub fn require_base_vm_name(&self) -> Result<&str, DescriptorError> {
        require(self.base_vm_name.as_deref(), "base_vm_name")
    }
}

fn require<'a>(
    value: Option<&'a str>,
    property: &'static str,
) -> Result<&'a str, DescriptorError> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .ok_or(DescriptorError::MissingProperty { property })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn unknown_properties_survive_a_round_trip() {
        let raw = json!({
            "vm_name": "web-1",
            "base_vm_name": "base-img",
            "flavor": "large",
        });
        let props: CloudProperties = serde_json::from_value(raw.clone()).expect("deserialise");
        assert_eq!(props.extra.get("flavor"), Some(&json!("large")));
        let back = serde_json::to_value(&props).expect("serialise");
        assert_eq!(back, raw);
    }

    #[rstest]
    #[case(None, Some("base"), "vm_name")]
    #[case(Some("  "), Some("base"), "vm_name")]
    #[case(Some("web-1"), None, "base_vm_name")]
    fn blank_required_properties_are_rejected(
        #[case] vm_name: Option<&str>,
        #[case] base_vm_name: Option<&str>,
        #[case] expected: &'static str,
    ) {
        let props = CloudProperties {
            vm_name: vm_name.map(str::to_owned),
            base_vm_name: base_vm_name.map(str::to_owned),
            ..CloudProperties::default()
        };
        let err = props
            .require_vm_name()
            .and_then(|_| props.require_base_vm_name())
            .expect_err("descriptor should be rejected");
        assert_eq!(err, DescriptorError::MissingProperty { property: expected });
    }

    #[rstest]
    fn names_are_trimmed() {
        let props = CloudProperties::new(" web-1 ", "base-img");
        assert_eq!(props.require_vm_name(), Ok("web-1"));
    }
}
