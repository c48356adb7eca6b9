//! PeerAuthentication CRD
//!
//! Defines how traffic is tunneled (or not) to the sidecar: the mutual TLS
//! mode for a workload, optionally overridden per port.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::WorkloadSelector;
use crate::Error;

/// PeerAuthentication sets the mTLS mode for the selected workloads.
///
/// Example:
/// ```yaml
/// apiVersion: security.istio.io/v1beta1
/// kind: PeerAuthentication
/// metadata:
///   name: finance
///   namespace: foo
/// spec:
///   selector:
///     matchLabels:
///       app: finance
///   mtls:
///     mode: STRICT
///   portLevelMtls:
///     8080:
///       mode: DISABLE
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "security.istio.io",
    version = "v1beta1",
    kind = "PeerAuthentication",
    plural = "peerauthentications",
    shortname = "pa",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mtls.mode"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PeerAuthenticationSpec {
    /// Workloads the policy applies to. If not set, the policy applies to
    /// all workloads in its namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,

    /// Mutual TLS settings for the workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtls: Option<PeerAuthenticationMtls>,

    /// Port specific mutual TLS settings, keyed by port number
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_level_mtls: BTreeMap<u32, PeerAuthenticationMtls>,
}

/// Mutual TLS settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PeerAuthenticationMtls {
    /// Defines the mTLS mode used for peer authentication
    #[serde(default)]
    pub mode: MtlsMode,
}

/// Mutual TLS mode
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MtlsMode {
    /// Inherit from parent; if no parent, treated as PERMISSIVE
    #[default]
    Unset,
    /// Connection is not tunneled
    Disable,
    /// Connection can be either plaintext or mTLS tunnel
    Permissive,
    /// Connection is an mTLS tunnel
    Strict,
}

impl PeerAuthenticationSpec {
    /// The mode that applies to `port`: a port-level override when one
    /// exists, otherwise the workload-level mode, otherwise `Unset`.
    pub fn mode_for_port(&self, port: u32) -> MtlsMode {
        self.port_level_mtls
            .get(&port)
            .or(self.mtls.as_ref())
            .map(|m| m.mode)
            .unwrap_or_default()
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<(), Error> {
        if self.port_level_mtls.is_empty() {
            return Ok(());
        }

        if self.selector.as_ref().is_none_or(WorkloadSelector::is_empty) {
            return Err(Error::validation_field(
                "spec.portLevelMtls",
                "portLevelMtls requires a non-empty workload selector",
            ));
        }

        for port in self.port_level_mtls.keys() {
            if *port == 0 || *port > u32::from(u16::MAX) {
                return Err(Error::validation_field(
                    "spec.portLevelMtls",
                    format!("port {} is out of range 1-65535", port),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finance_policy() -> PeerAuthentication {
        let value = crate::yaml::parse_yaml(
            r#"
apiVersion: security.istio.io/v1beta1
kind: PeerAuthentication
metadata:
  name: finance
  namespace: foo
spec:
  selector:
    matchLabels:
      app: finance
  mtls:
    mode: STRICT
  portLevelMtls:
    8080:
      mode: DISABLE
"#,
        )
        .expect("parse yaml");
        serde_json::from_value(value).expect("parse")
    }

    #[test]
    fn test_port_level_keys_are_numbers() {
        let policy = finance_policy();
        assert_eq!(
            policy.spec.port_level_mtls.get(&8080).map(|m| m.mode),
            Some(MtlsMode::Disable)
        );

        let json = serde_json::to_value(&policy.spec).unwrap();
        assert_eq!(json["portLevelMtls"]["8080"]["mode"], "DISABLE");
    }

    #[test]
    fn test_port_override_wins_over_workload_mode() {
        let spec = finance_policy().spec;
        assert_eq!(spec.mode_for_port(8080), MtlsMode::Disable);
        assert_eq!(spec.mode_for_port(9090), MtlsMode::Strict);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_unset_everywhere_is_unset() {
        assert_eq!(PeerAuthenticationSpec::default().mode_for_port(80), MtlsMode::Unset);
    }

    #[test]
    fn test_port_level_without_selector_is_invalid() {
        let mut spec = finance_policy().spec;
        spec.selector = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_port_out_of_range_is_invalid() {
        let mut spec = finance_policy().spec;
        spec.port_level_mtls
            .insert(70000, PeerAuthenticationMtls { mode: MtlsMode::Strict });
        assert!(spec.validate().is_err());
    }
}
