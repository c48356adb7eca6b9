//! DestinationRule CRD
//!
//! Policies applied to traffic for a service after routing has occurred:
//! load balancing, connection pool sizing, outlier detection and TLS
//! origination, plus named subsets (versions) of the service.

use std::collections::{BTreeMap, HashSet};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::virtual_service::PortSelector;
use crate::Error;

/// DestinationRule defines policies that apply to traffic intended for a
/// service after routing has occurred.
///
/// Example:
/// ```yaml
/// apiVersion: networking.istio.io/v1alpha3
/// kind: DestinationRule
/// metadata:
///   name: reviews
/// spec:
///   host: reviews.prod.svc.cluster.local
///   trafficPolicy:
///     loadBalancer:
///       simple: LEAST_CONN
///   subsets:
///   - name: v1
///     labels:
///       version: v1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "DestinationRule",
    plural = "destinationrules",
    shortname = "dr",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRuleSpec {
    /// Name of a service from the service registry
    pub host: String,

    /// Traffic policies to apply (load balancing, connection pool, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_policy: Option<TrafficPolicy>,

    /// Named sets that represent individual versions of a service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsets: Vec<Subset>,

    /// Namespaces to which this rule is exported ("." = same namespace, "*" = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_to: Vec<String>,
}

/// Traffic policies for a destination, with optional per-port overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicy {
    /// Settings shared with the port-level policies
    #[serde(flatten)]
    pub common: TrafficPolicyCommon,

    /// Port-specific overrides. Port-level settings replace, not merge with,
    /// the destination-level settings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_level_settings: Vec<PortTrafficPolicy>,
}

/// Settings shared by destination-level and port-level traffic policies
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicyCommon {
    /// Load balancing algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerSettings>,

    /// Connection pool limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_pool: Option<ConnectionPoolSettings>,

    /// Ejection of unhealthy hosts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetection>,

    /// TLS settings for upstream connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
}

/// Traffic policy for a single port
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortTrafficPolicy {
    /// Destination port the policy applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,

    /// Settings for this port
    #[serde(flatten)]
    pub common: TrafficPolicyCommon,
}

/// A named subset of service endpoints
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subset {
    /// Name of the subset, referenced by VirtualService routes
    pub name: String,

    /// Labels selecting the endpoints of the subset
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Overrides the destination-level policy for this subset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_policy: Option<TrafficPolicy>,
}

/// Load balancing policy: exactly one of `simple` or `consistentHash`
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum LoadBalancerSettings {
    /// A standard load balancing algorithm
    Simple(SimpleLb),
    /// Session affinity based on a request attribute
    ConsistentHash(ConsistentHashLb),
}

/// Standard load balancing algorithms
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimpleLb {
    /// Round robin
    RoundRobin,
    /// Pick the host with fewer active requests out of two random ones
    LeastConn,
    /// Random healthy host
    Random,
    /// Forward to the original destination address
    Passthrough,
}

/// Consistent hashing load balancer settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsistentHashLb {
    /// Hash based on a specific HTTP header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_header_name: Option<String>,

    /// Hash based on an HTTP cookie
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_cookie: Option<HttpCookie>,

    /// Hash based on the source IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_source_ip: Option<bool>,

    /// Minimum number of virtual nodes for the hash ring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_ring_size: Option<u64>,
}

/// Cookie used as the hash key; generated if missing
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpCookie {
    /// Name of the cookie
    pub name: String,
    /// Path to set for the cookie
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Lifetime of the cookie
    pub ttl: String,
}

/// Connection pool settings for an upstream host
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ConnectionPoolSettings {
    /// Settings common to HTTP and TCP upstream connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpSettings>,
    /// HTTP connection pool settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSettings>,
}

/// TCP connection pool settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TcpSettings {
    /// Maximum number of HTTP1/TCP connections to a destination host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<i32>,
    /// TCP connection timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    /// SO_KEEPALIVE settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_keepalive: Option<TcpKeepalive>,
}

/// TCP keepalive settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TcpKeepalive {
    /// Maximum number of unanswered probes before the connection is dead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probes: Option<u32>,
    /// Idle time before keep-alive probes start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Duration between keep-alive probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// HTTP connection pool settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    /// Maximum number of pending HTTP requests to a destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http1_max_pending_requests: Option<i32>,
    /// Maximum number of requests to a backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http2_max_requests: Option<i32>,
    /// Maximum number of requests per connection to a backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_connection: Option<i32>,
    /// Maximum number of outstanding retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i32>,
    /// Idle timeout for upstream connection pool connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,
    /// Whether HTTP/1.1 connections should be upgraded to HTTP/2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h2_upgrade_policy: Option<H2UpgradePolicy>,
}

/// Policy for upgrading HTTP/1.1 connections to HTTP/2
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum H2UpgradePolicy {
    /// Use the global default
    #[default]
    Default,
    /// Do not upgrade
    DoNotUpgrade,
    /// Upgrade
    Upgrade,
}

/// Circuit breaker tracking the status of each upstream host
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlierDetection {
    /// Number of errors before a host is ejected (deprecated)
    #[serde(default, skip_serializing_if = "crate::crd::is_zero_i32")]
    pub consecutive_errors: i32,
    /// Number of gateway errors (502/503/504) before a host is ejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_gateway_errors: Option<u32>,
    /// Number of 5xx errors before a host is ejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_5xx_errors: Option<u32>,
    /// Time interval between ejection sweep analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Minimum ejection duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ejection_time: Option<String>,
    /// Maximum % of hosts that can be ejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ejection_percent: Option<i32>,
    /// Outlier detection is disabled below this % of healthy hosts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_health_percent: Option<i32>,
}

/// TLS settings for upstream connections
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    /// Whether and how connections to this port are secured
    pub mode: TlsMode,
    /// Client certificate file (required for MUTUAL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    /// Client private key file (required for MUTUAL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// CA certificates for verifying the server certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificates: Option<String>,
    /// Alternate names to verify the certificate subject against
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subject_alt_names: Vec<String>,
    /// SNI string to present during the TLS handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
}

/// TLS mode for upstream connections
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TlsMode {
    /// Do not set up a TLS connection
    #[default]
    Disable,
    /// Originate a TLS connection
    Simple,
    /// Mutual TLS with client certificates
    Mutual,
    /// Mutual TLS with Istio-generated certificates
    IstioMutual,
}

impl DestinationRuleSpec {
    /// Look up a subset by name
    pub fn subset(&self, name: &str) -> Option<&Subset> {
        self.subsets.iter().find(|s| s.name == name)
    }

    /// Validate the destination rule
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.is_empty() {
            return Err(Error::validation_field("spec.host", "host cannot be empty"));
        }

        if let Some(policy) = &self.traffic_policy {
            policy.validate("spec.trafficPolicy")?;
        }

        let mut seen = HashSet::new();
        for (i, subset) in self.subsets.iter().enumerate() {
            let field = format!("spec.subsets[{}]", i);
            if subset.name.is_empty() {
                return Err(Error::validation_field(field, "subset name cannot be empty"));
            }
            if !seen.insert(subset.name.as_str()) {
                return Err(Error::validation_field(
                    field,
                    format!("duplicate subset name '{}'", subset.name),
                ));
            }
            if let Some(policy) = &subset.traffic_policy {
                policy.validate(&format!("{}.trafficPolicy", field))?;
            }
        }

        Ok(())
    }
}

impl TrafficPolicy {
    fn validate(&self, field: &str) -> Result<(), Error> {
        self.common.validate(field)?;
        for (i, port_policy) in self.port_level_settings.iter().enumerate() {
            let port_field = format!("{}.portLevelSettings[{}]", field, i);
            if port_policy.port.is_none() {
                return Err(Error::validation_field(port_field, "port must be set"));
            }
            port_policy.common.validate(&port_field)?;
        }
        Ok(())
    }
}

impl TrafficPolicyCommon {
    fn validate(&self, field: &str) -> Result<(), Error> {
        if let Some(LoadBalancerSettings::ConsistentHash(hash)) = &self.load_balancer {
            hash.validate()
                .map_err(|msg| Error::validation_field(format!("{}.loadBalancer", field), msg))?;
        }
        if let Some(tls) = &self.tls {
            if tls.mode == TlsMode::Mutual
                && (tls.client_certificate.is_none() || tls.private_key.is_none())
            {
                return Err(Error::validation_field(
                    format!("{}.tls", field),
                    "MUTUAL mode requires clientCertificate and privateKey",
                ));
            }
        }
        Ok(())
    }
}

const HASH_KEYS: &str = "httpHeaderName, httpCookie, useSourceIp";

impl ConsistentHashLb {
    /// Exactly one hash key source must be configured
    pub fn validate(&self) -> Result<(), String> {
        let keys = [
            self.http_header_name.is_some(),
            self.http_cookie.is_some(),
            self.use_source_ip.unwrap_or(false),
        ]
        .iter()
        .filter(|set| **set)
        .count();

        match keys {
            1 => Ok(()),
            0 => Err(format!("consistentHash requires one of {}", HASH_KEYS)),
            _ => Err(format!("consistentHash accepts only one of {}", HASH_KEYS)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> DestinationRule {
        let value = crate::yaml::parse_yaml(yaml).expect("parse yaml");
        serde_json::from_value(value).expect("parse")
    }

    #[test]
    fn test_subsets_and_port_level_settings_yaml() {
        let dr = parse(
            r#"
apiVersion: networking.istio.io/v1alpha3
kind: DestinationRule
metadata:
  name: bookinfo-ratings-port
spec:
  host: ratings.prod.svc.cluster.local
  trafficPolicy:
    connectionPool:
      tcp:
        maxConnections: 100
        connectTimeout: 30ms
      http:
        http2MaxRequests: 1000
        h2UpgradePolicy: UPGRADE
    outlierDetection:
      consecutive5xxErrors: 7
      interval: 5m
    portLevelSettings:
    - port:
        number: 80
      loadBalancer:
        simple: LEAST_CONN
  subsets:
  - name: testversion
    labels:
      version: v3
    trafficPolicy:
      loadBalancer:
        simple: ROUND_ROBIN
"#,
        );

        let policy = dr.spec.traffic_policy.as_ref().unwrap();
        let pool = policy.common.connection_pool.as_ref().unwrap();
        assert_eq!(pool.tcp.as_ref().unwrap().max_connections, Some(100));
        assert_eq!(
            pool.http.as_ref().unwrap().h2_upgrade_policy,
            Some(H2UpgradePolicy::Upgrade)
        );
        assert_eq!(
            policy.common.outlier_detection.as_ref().unwrap().consecutive_5xx_errors,
            Some(7)
        );
        assert_eq!(policy.port_level_settings[0].port, Some(PortSelector { number: 80 }));
        assert_eq!(
            policy.port_level_settings[0].common.load_balancer,
            Some(LoadBalancerSettings::Simple(SimpleLb::LeastConn))
        );
        assert_eq!(
            dr.spec.subset("testversion").unwrap().labels.get("version").map(String::as_str),
            Some("v3")
        );
        assert!(dr.spec.validate().is_ok());
    }

    #[test]
    fn test_load_balancer_is_one_of() {
        let both = serde_json::json!({
            "simple": "RANDOM",
            "consistentHash": {"useSourceIp": true}
        });
        assert!(serde_json::from_value::<LoadBalancerSettings>(both).is_err());

        let hash: LoadBalancerSettings = serde_json::from_value(serde_json::json!({
            "consistentHash": {"httpCookie": {"name": "user", "ttl": "0s"}}
        }))
        .unwrap();
        assert!(matches!(hash, LoadBalancerSettings::ConsistentHash(_)));
    }

    #[test]
    fn test_flattened_common_settings_serialize_inline() {
        let policy = TrafficPolicy {
            common: TrafficPolicyCommon {
                tls: Some(TlsSettings {
                    mode: TlsMode::IstioMutual,
                    ..Default::default()
                }),
                ..Default::default()
            },
            port_level_settings: vec![],
        };
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["tls"]["mode"], "ISTIO_MUTUAL");
        assert!(json.get("common").is_none());
    }

    #[test]
    fn test_consistent_hash_requires_exactly_one_key() {
        assert!(ConsistentHashLb::default().validate().is_err());
        assert!(ConsistentHashLb {
            use_source_ip: Some(true),
            ..Default::default()
        }
        .validate()
        .is_ok());
        assert!(ConsistentHashLb {
            http_header_name: Some("x-user".to_string()),
            use_source_ip: Some(true),
            ..Default::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_duplicate_subset_names_are_invalid() {
        let subset = Subset {
            name: "v1".to_string(),
            ..Default::default()
        };
        let spec = DestinationRuleSpec {
            host: "reviews".to_string(),
            subsets: vec![subset.clone(), subset],
            ..Default::default()
        };
        assert_eq!(spec.validate().unwrap_err().field(), Some("spec.subsets[1]"));
    }

    #[test]
    fn test_mutual_tls_needs_client_credentials() {
        let spec = DestinationRuleSpec {
            host: "db".to_string(),
            traffic_policy: Some(TrafficPolicy {
                common: TrafficPolicyCommon {
                    tls: Some(TlsSettings {
                        mode: TlsMode::Mutual,
                        client_certificate: Some("/etc/certs/cert.pem".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                port_level_settings: vec![],
            }),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_empty_host_is_invalid() {
        assert!(DestinationRuleSpec::default().validate().is_err());
    }
}
