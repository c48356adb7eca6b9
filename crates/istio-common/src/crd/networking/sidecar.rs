//! Sidecar CRD
//!
//! Narrows the set of ports, protocols and services the proxy of a workload
//! accepts traffic on and can reach.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::labels_match;
use crate::Error;

/// Sidecar describes the configuration of the proxy that mediates traffic
/// to and from the workload instance it is attached to.
///
/// Example:
/// ```yaml
/// apiVersion: networking.istio.io/v1beta1
/// kind: Sidecar
/// metadata:
///   name: default
///   namespace: prod-us1
/// spec:
///   egress:
///   - hosts:
///     - "prod-us1/*"
///     - "istio-system/*"
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1beta1",
    kind = "Sidecar",
    plural = "sidecars",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    /// Workloads the configuration applies to. A namespace holds at most one
    /// Sidecar without a selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<SidecarWorkloadSelector>,

    /// Listeners for inbound traffic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<IstioIngressListener>,

    /// Listeners for outbound traffic
    #[serde(default)]
    pub egress: Vec<IstioEgressListener>,

    /// Handling of outbound traffic to unknown destinations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_traffic_policy: Option<OutboundTrafficPolicy>,
}

/// Label-based selection of the workloads a Sidecar applies to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SidecarWorkloadSelector {
    /// Labels that must all be present on the workload
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Inbound listener on the sidecar
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IstioIngressListener {
    /// Port the listener receives traffic on
    pub port: Port,

    /// IP the listener binds to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bind: String,

    /// How traffic reaches the listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_mode: Option<CaptureMode>,

    /// Loopback IP endpoint or Unix domain socket traffic is forwarded to
    pub default_endpoint: String,
}

/// Outbound listener on the sidecar
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IstioEgressListener {
    /// Port the listener receives traffic on; all ports when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<Port>,

    /// IP or Unix domain socket the listener binds to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bind: String,

    /// How traffic reaches the listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_mode: Option<CaptureMode>,

    /// Services exposed by the listener, in `namespace/dnsName` form
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// A port exposed by a listener
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Port {
    /// Valid non-negative integer port number
    pub number: u32,
    /// Protocol exposed on the port (HTTP, HTTPS, GRPC, HTTP2, MONGO, TCP, TLS)
    pub protocol: String,
    /// Label assigned to the port
    pub name: String,
}

/// How traffic reaches a listener
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureMode {
    /// Capture mode defined by the environment
    #[default]
    Default,
    /// Traffic is captured using iptables redirection
    Iptables,
    /// No traffic capture
    None,
}

/// Outbound traffic policy of the sidecar
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct OutboundTrafficPolicy {
    /// How unknown outbound destinations are handled
    #[serde(default)]
    pub mode: OutboundTrafficPolicyMode,
}

/// Outbound traffic mode
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundTrafficPolicyMode {
    /// Only services in the registry are reachable
    RegistryOnly,
    /// Unknown destinations are passed through
    #[default]
    AllowAny,
}

impl SidecarSpec {
    /// Whether this Sidecar applies to a workload with the given labels.
    /// A Sidecar without a selector applies to the whole namespace.
    pub fn applies_to(&self, labels: &BTreeMap<String, String>) -> bool {
        self.workload_selector
            .as_ref()
            .is_none_or(|s| s.matches(labels))
    }

    /// Validate listeners
    pub fn validate(&self) -> Result<(), Error> {
        if self.egress.is_empty() {
            return Err(Error::validation_field(
                "spec.egress",
                "at least one egress listener is required",
            ));
        }

        for (i, listener) in self.ingress.iter().enumerate() {
            let field = format!("spec.ingress[{}]", i);
            listener.port.validate(&format!("{}.port", field))?;
            if listener.default_endpoint.is_empty() {
                return Err(Error::validation_field(
                    format!("{}.defaultEndpoint", field),
                    "defaultEndpoint cannot be empty",
                ));
            }
        }

        for (i, listener) in self.egress.iter().enumerate() {
            let field = format!("spec.egress[{}]", i);
            if let Some(port) = &listener.port {
                port.validate(&format!("{}.port", field))?;
            }
            if listener.hosts.is_empty() {
                return Err(Error::validation_field(
                    format!("{}.hosts", field),
                    "egress listener must list at least one host",
                ));
            }
            for host in &listener.hosts {
                validate_egress_host(&field, host)?;
            }
        }

        Ok(())
    }
}

impl SidecarWorkloadSelector {
    /// Check if a workload with the given labels is selected
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels_match(&self.labels, labels)
    }
}

impl Port {
    fn validate(&self, field: &str) -> Result<(), Error> {
        if self.number == 0 || self.number > u32::from(u16::MAX) {
            return Err(Error::validation_field(
                field,
                format!("port {} is out of range 1-65535", self.number),
            ));
        }
        Ok(())
    }
}

/// Hosts take the form `namespace/dnsName`; both halves must be present.
fn validate_egress_host(field: &str, host: &str) -> Result<(), Error> {
    match host.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(Error::validation_field(
            format!("{}.hosts", field),
            format!("host '{}' must be of the form namespace/dnsName", host),
        )),
    }
}
