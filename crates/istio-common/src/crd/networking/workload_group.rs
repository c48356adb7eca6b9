//! WorkloadGroup CRD
//!
//! A template for auto-registered VM workloads: the metadata and spec stamped
//! onto each generated WorkloadEntry, plus the readiness probe run by the
//! proxy on the VM.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::workload_entry::WorkloadEntrySpec;
use crate::Error;

/// WorkloadGroup describes a collection of workload instances.
///
/// Example:
/// ```yaml
/// apiVersion: networking.istio.io/v1alpha3
/// kind: WorkloadGroup
/// metadata:
///   name: reviews
///   namespace: bookinfo
/// spec:
///   metadata:
///     labels:
///       app.kubernetes.io/name: reviews
///   template:
///     ports:
///       grpc: 3550
///       http: 8080
///     serviceAccount: default
///   probe:
///     initialDelaySeconds: 5
///     httpGet:
///       path: /
///       port: 8080
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "WorkloadGroup",
    plural = "workloadgroups",
    shortname = "wg",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct WorkloadGroupSpec {
    /// Labels and annotations copied onto generated WorkloadEntries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WorkloadGroupMeta>,

    /// Template for the generated WorkloadEntries; `address` must be left
    /// empty since it is filled in per instance
    pub template: WorkloadEntrySpec,

    /// Readiness check run against each instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<ReadinessProbe>,
}

/// Metadata copied onto generated WorkloadEntries
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct WorkloadGroupMeta {
    /// Labels for generated entries
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations for generated entries
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Readiness probe. Field names are snake_case on the wire, unlike the rest
/// of the Istio API.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ReadinessProbe {
    /// Seconds after startup before the first probe
    #[serde(default, skip_serializing_if = "crate::crd::is_zero_i32")]
    pub initial_delay_seconds: i32,

    /// Seconds after which the probe times out
    #[serde(default, skip_serializing_if = "crate::crd::is_zero_i32")]
    pub timeout_seconds: i32,

    /// How often to perform the probe, in seconds
    #[serde(default, skip_serializing_if = "crate::crd::is_zero_i32")]
    pub period_seconds: i32,

    /// Consecutive successes before the instance is considered ready
    #[serde(default, skip_serializing_if = "crate::crd::is_zero_i32")]
    pub success_threshold: i32,

    /// Consecutive failures before the instance is considered not ready
    #[serde(default, skip_serializing_if = "crate::crd::is_zero_i32")]
    pub failure_threshold: i32,

    /// HTTP GET health check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpHealthCheckConfig>,

    /// TCP connect health check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_socket: Option<TcpHealthCheckConfig>,

    /// Command health check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecHealthCheckConfig>,
}

/// HTTP GET health check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpHealthCheckConfig {
    /// Path to access on the HTTP server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Port on which the endpoint lives
    pub port: u32,

    /// Host name to connect to, defaults to the instance IP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,

    /// HTTP or HTTPS, defaults to HTTP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheme: String,

    /// Headers the proxy passes on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_headers: Vec<HttpHeader>,
}

/// Header sent with an HTTP health check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct HttpHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

/// TCP connect health check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct TcpHealthCheckConfig {
    /// Host to connect to, defaults to localhost
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Port of the host
    pub port: u32,
}

/// Command health check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ExecHealthCheckConfig {
    /// Command to run; exit status 0 is healthy
    #[serde(default)]
    pub command: Vec<String>,
}

impl WorkloadGroupSpec {
    /// Validate the template and probe
    pub fn validate(&self) -> Result<(), Error> {
        if !self.template.address.is_empty() {
            return Err(Error::validation_field(
                "spec.template.address",
                "address must not be set in a WorkloadGroup template",
            ));
        }
        self.template.validate_ports("spec.template.ports")?;

        if let Some(probe) = &self.probe {
            probe.validate()?;
        }
        Ok(())
    }
}

impl ReadinessProbe {
    fn validate(&self) -> Result<(), Error> {
        let methods = [
            self.http_get.is_some(),
            self.tcp_socket.is_some(),
            self.exec.is_some(),
        ];
        if methods.iter().filter(|set| **set).count() != 1 {
            return Err(Error::validation_field(
                "spec.probe",
                "exactly one of httpGet, tcpSocket, exec must be set",
            ));
        }

        let port = self
            .http_get
            .as_ref()
            .map(|h| h.port)
            .or(self.tcp_socket.as_ref().map(|t| t.port));
        if let Some(port) = port {
            if port == 0 || port > u32::from(u16::MAX) {
                return Err(Error::validation_field(
                    "spec.probe",
                    format!("port {} is out of range 1-65535", port),
                ));
            }
        }

        if self.exec.as_ref().is_some_and(|e| e.command.is_empty()) {
            return Err(Error::validation_field(
                "spec.probe.exec.command",
                "command cannot be empty",
            ));
        }

        let counters = [
            self.initial_delay_seconds,
            self.timeout_seconds,
            self.period_seconds,
            self.success_threshold,
            self.failure_threshold,
        ];
        if counters.iter().any(|v| *v < 0) {
            return Err(Error::validation_field(
                "spec.probe",
                "probe timings and thresholds cannot be negative",
            ));
        }
        Ok(())
    }
}
