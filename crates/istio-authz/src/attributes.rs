//! Request attributes consumed by the evaluator
//!
//! The proxy (or whatever sits in front of the engine) fills these in from
//! the connection and the HTTP request. Nothing here is validated: a missing
//! value simply fails positive matches and passes negative ones.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Condition keys resolved from the typed fields instead of the free-form map
pub mod keys {
    /// Peer identity
    pub const SOURCE_PRINCIPAL: &str = "source.principal";
    /// Peer namespace
    pub const SOURCE_NAMESPACE: &str = "source.namespace";
    /// Peer IP address
    pub const SOURCE_IP: &str = "source.ip";
    /// Original client IP (X-Forwarded-For aware)
    pub const REMOTE_IP: &str = "remote.ip";
    /// Server IP address
    pub const DESTINATION_IP: &str = "destination.ip";
    /// Server port
    pub const DESTINATION_PORT: &str = "destination.port";
    /// Authenticated request principal (`iss/sub` of the JWT)
    pub const REQUEST_PRINCIPAL: &str = "request.auth.principal";
    /// HTTP host / authority
    pub const REQUEST_HOST: &str = "request.host";
    /// HTTP method
    pub const REQUEST_METHOD: &str = "request.method";
    /// HTTP path without query string
    pub const REQUEST_PATH: &str = "request.url_path";

    /// Keys whose values are IP addresses matched against CIDR blocks
    pub const IP_KEYS: &[&str] = &[SOURCE_IP, REMOTE_IP, DESTINATION_IP];
}

/// Attributes of a single request
///
/// ```yaml
/// principal: cluster.local/ns/default/sa/sleep
/// namespace: default
/// sourceIp: 10.1.2.3
/// method: GET
/// path: /productpage
/// port: 9080
/// attributes:
///   request.auth.claims[groups]: [admin, dev]
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestAttributes {
    /// Peer identity from the mTLS certificate
    pub principal: String,
    /// Request identity from a validated JWT
    pub request_principal: String,
    /// Namespace of the peer workload
    pub namespace: String,
    /// Peer IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    /// Original client IP, when it differs from the peer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<IpAddr>,
    /// Server IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_ip: Option<IpAddr>,
    /// HTTP host
    pub host: String,
    /// Server port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// HTTP method
    pub method: String,
    /// HTTP path
    pub path: String,
    /// Named multi-valued attributes such as JWT claims and headers,
    /// keyed by their condition key (e.g. `request.auth.claims[groups]`)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl RequestAttributes {
    /// Empty attributes
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the peer principal
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    /// Set the request (JWT) principal
    pub fn with_request_principal(mut self, principal: impl Into<String>) -> Self {
        self.request_principal = principal.into();
        self
    }

    /// Set the peer namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the peer IP
    pub fn with_source_ip(mut self, ip: IpAddr) -> Self {
        self.source_ip = Some(ip);
        self
    }

    /// Set the HTTP host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the HTTP method
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the HTTP path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Add a named attribute
    pub fn with_attribute<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(key.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// IP address for one of [`keys::IP_KEYS`]
    pub fn ip(&self, key: &str) -> Option<IpAddr> {
        match key {
            keys::SOURCE_IP => self.source_ip,
            keys::REMOTE_IP => self.remote_ip.or(self.source_ip),
            keys::DESTINATION_IP => self.destination_ip,
            _ => None,
        }
    }

    /// Values for a condition key.
    ///
    /// Well-known keys resolve to the typed fields; an empty typed field
    /// counts as absent. Anything else is looked up in `attributes`, and a
    /// missing key yields no values.
    pub fn values(&self, key: &str) -> Vec<Cow<'_, str>> {
        let typed = match key {
            keys::SOURCE_PRINCIPAL => Some(self.principal.as_str()),
            keys::SOURCE_NAMESPACE => Some(self.namespace.as_str()),
            keys::REQUEST_PRINCIPAL => Some(self.request_principal.as_str()),
            keys::REQUEST_HOST => Some(self.host.as_str()),
            keys::REQUEST_METHOD => Some(self.method.as_str()),
            keys::REQUEST_PATH => Some(self.path.as_str()),
            keys::DESTINATION_PORT => {
                return self
                    .port
                    .map(|p| Cow::Owned(p.to_string()))
                    .into_iter()
                    .collect()
            }
            _ if keys::IP_KEYS.contains(&key) => {
                return self
                    .ip(key)
                    .map(|ip| Cow::Owned(ip.to_string()))
                    .into_iter()
                    .collect()
            }
            _ => None,
        };

        match typed {
            Some("") => Vec::new(),
            Some(value) => vec![Cow::Borrowed(value)],
            None => self
                .attributes
                .get(key)
                .map(|values| values.iter().map(|v| Cow::Borrowed(v.as_str())).collect())
                .unwrap_or_default(),
        }
    }
}
