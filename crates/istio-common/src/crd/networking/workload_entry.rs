//! WorkloadEntry CRD
//!
//! Describes a non-Kubernetes workload (a VM or bare-metal server) so it can
//! be onboarded into the mesh alongside pods.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::IstioStatus;
use crate::Error;

/// WorkloadEntry describes the properties of a single non-Kubernetes workload.
///
/// Example:
/// ```yaml
/// apiVersion: networking.istio.io/v1alpha3
/// kind: WorkloadEntry
/// metadata:
///   name: details-svc
/// spec:
///   serviceAccount: details-legacy
///   address: 2.2.2.2
///   labels:
///     app: details-legacy
///     instance-id: vm1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "WorkloadEntry",
    plural = "workloadentries",
    shortname = "we",
    namespaced,
    derive = "PartialEq",
    status = "IstioStatus",
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".spec.address"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEntrySpec {
    /// Address of the network endpoint (IP, DNS name or unix socket path)
    #[serde(default)]
    pub address: String,

    /// Port name to port number mapping
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, u32>,

    /// Labels associated with the endpoint
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Network the endpoint belongs to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,

    /// Locality (region/zone/subzone) of the endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub locality: String,

    /// Load balancing weight; zero means the default of 1
    #[serde(default, skip_serializing_if = "crate::crd::is_zero_u32")]
    pub weight: u32,

    /// Service account the workload runs as
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account: String,
}

impl WorkloadEntrySpec {
    /// Validate the entry as a concrete endpoint
    pub fn validate(&self) -> Result<(), Error> {
        if self.address.is_empty() {
            return Err(Error::validation_field(
                "spec.address",
                "address cannot be empty",
            ));
        }
        self.validate_ports("spec.ports")
    }

    pub(crate) fn validate_ports(&self, field: &str) -> Result<(), Error> {
        for (name, port) in &self.ports {
            if *port == 0 || *port > u32::from(u16::MAX) {
                return Err(Error::validation_field(
                    format!("{}.{}", field, name),
                    format!("port {} is out of range 1-65535", port),
                ));
            }
        }
        Ok(())
    }
}
