//! VirtualService CRD
//!
//! Traffic routing rules applied when a host is addressed: HTTP, TLS and TCP
//! route lists, each evaluated in order with the first match winning.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::StringMatch;
use crate::Error;

/// VirtualService defines a set of traffic routing rules to apply when a
/// host is addressed.
///
/// Example:
/// ```yaml
/// apiVersion: networking.istio.io/v1beta1
/// kind: VirtualService
/// metadata:
///   name: reviews-route
/// spec:
///   hosts:
///   - reviews.prod.svc.cluster.local
///   http:
///   - match:
///     - uri:
///         prefix: "/wpcatalog"
///     route:
///     - destination:
///         host: reviews.prod.svc.cluster.local
///         subset: v2
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.istio.io",
    version = "v1beta1",
    kind = "VirtualService",
    plural = "virtualservices",
    shortname = "vs",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Gateways","type":"string","jsonPath":".spec.gateways"}"#,
    printcolumn = r#"{"name":"Hosts","type":"string","jsonPath":".spec.hosts"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    /// Destination hosts to which traffic is being sent
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Gateways and sidecars that should apply these routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,

    /// Ordered list of HTTP routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,

    /// Ordered list of routes for non-terminated TLS and HTTPS traffic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsRoute>,

    /// Ordered list of routes for opaque TCP traffic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp: Vec<TcpRoute>,

    /// Namespaces to which this virtual service is exported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_to: Vec<String>,
}

/// Match conditions and actions for HTTP/1.1, HTTP2 and gRPC traffic
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// Name assigned to the route for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Conditions to be satisfied for the rule to be activated (OR-ed)
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub match_: Vec<HttpMatchRequest>,

    /// Weighted destinations for the traffic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<HttpRouteDestination>,

    /// Redirect response; mutually exclusive with `route`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<HttpRedirect>,

    /// Rewrite applied before forwarding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<HttpRewrite>,

    /// Timeout for HTTP requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Retry policy for HTTP requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<HttpRetry>,

    /// Fault injection policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<HttpFaultInjection>,

    /// Mirror traffic to another destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<Destination>,

    /// Percentage of traffic to mirror, as an integer (superseded by
    /// `mirrorPercentage`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_percent: Option<u32>,

    /// Percentage of traffic to mirror
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_percentage: Option<Percentage>,

    /// Cross-Origin Resource Sharing policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CorsPolicy>,

    /// Header manipulation rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

/// Conditions on an HTTP request; all set fields must match (AND-ed)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatchRequest {
    /// Name assigned to the match, concatenated with the route name in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// URI to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,

    /// URI scheme to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<StringMatch>,

    /// HTTP method to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,

    /// HTTP authority to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<StringMatch>,

    /// Header values to match, keyed by lowercase header name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,

    /// Port on the host being addressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,

    /// Labels constraining the source workloads
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_labels: BTreeMap<String, String>,

    /// Names of gateways where the rule should be applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,

    /// Query parameters to match
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_params: BTreeMap<String, StringMatch>,

    /// Case-insensitive URI matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_uri_case: Option<bool>,
}

/// Destination of an HTTP route with its traffic weight
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpRouteDestination {
    /// Service the request should be forwarded to
    pub destination: Destination,

    /// Relative share of traffic, out of 100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,

    /// Header manipulation rules for this destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

/// Destination of a TLS or TCP route with its traffic weight
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RouteDestination {
    /// Service the connection should be forwarded to
    pub destination: Destination,

    /// Relative share of traffic, out of 100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

/// Network addressable service to which a request is forwarded
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Destination {
    /// Name of a service from the service registry
    pub host: String,

    /// Name of a subset defined in the service's DestinationRule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,

    /// Port on the host being addressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

/// Selects a specific port
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PortSelector {
    /// Valid port number
    pub number: u32,
}

/// Routes for non-terminated TLS traffic, matched on SNI
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TlsRoute {
    /// Conditions to be satisfied for the rule to be activated
    #[serde(rename = "match", default)]
    pub match_: Vec<TlsMatchAttributes>,

    /// Destinations for the connection
    #[serde(default)]
    pub route: Vec<RouteDestination>,
}

/// Routes for opaque TCP traffic
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TcpRoute {
    /// Conditions to be satisfied for the rule to be activated
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub match_: Vec<L4MatchAttributes>,

    /// Destinations for the connection
    #[serde(default)]
    pub route: Vec<RouteDestination>,
}

/// L4 connection match attributes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct L4MatchAttributes {
    /// IPv4 or IPv6 addresses of the destination, optionally with prefix length
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_subnets: Vec<String>,

    /// Port on the host being addressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,

    /// Labels constraining the source workloads
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_labels: BTreeMap<String, String>,

    /// Names of gateways where the rule should be applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
}

/// TLS connection match attributes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsMatchAttributes {
    /// SNI to match; wildcard prefixes are allowed
    pub sni_hosts: Vec<String>,

    /// IPv4 or IPv6 addresses of the destination, optionally with prefix length
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_subnets: Vec<String>,

    /// Port on the host being addressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,

    /// Labels constraining the source workloads
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_labels: BTreeMap<String, String>,

    /// Names of gateways where the rule should be applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
}

/// Redirect response sent instead of forwarding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRedirect {
    /// Replacement path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Replacement authority/host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,

    /// HTTP status code for the redirect (default 301)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_code: Option<u32>,
}

/// Rewrite of the request before forwarding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpRewrite {
    /// Replacement for the matched URI portion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Replacement authority/host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

/// Retry policy for HTTP requests
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRetry {
    /// Number of retries for a request
    pub attempts: i32,

    /// Timeout per attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_try_timeout: Option<String>,

    /// Conditions under which retry takes place (comma-separated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on: Option<String>,
}

/// Cross-Origin Resource Sharing policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Origins allowed to perform CORS requests; `*` allows all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origin: Vec<String>,

    /// Allowed HTTP methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,

    /// Allowed request headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,

    /// Headers browsers may access
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,

    /// How long preflight results can be cached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,

    /// Whether the caller may send credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
}

/// Faults injected into forwarded requests
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpFaultInjection {
    /// Delay requests before forwarding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,

    /// Abort requests and return an error status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<Abort>,
}

/// Fixed delay fault
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Delay {
    /// Delay before forwarding the request
    pub fixed_delay: String,

    /// Share of requests the delay is injected into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<Percentage>,
}

/// Abort fault
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Abort {
    /// HTTP status code returned to the caller
    pub http_status: i32,

    /// Share of requests that are aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<Percentage>,
}

/// Percentage in the range [0.0, 100.0]
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Percentage {
    /// Percentage value
    pub value: f64,
}

/// Request and response header manipulation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Headers {
    /// Operations applied to request headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HeaderOperations>,

    /// Operations applied to response headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HeaderOperations>,
}

/// Header operations: overwrite, append, remove
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HeaderOperations {
    /// Overwrite headers with the given values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,

    /// Append the given values to headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: BTreeMap<String, String>,

    /// Remove the named headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl VirtualServiceSpec {
    /// Validate hosts, route targets and match expressions
    pub fn validate(&self) -> Result<(), Error> {
        if self.hosts.is_empty() {
            return Err(Error::validation_field(
                "spec.hosts",
                "at least one host is required",
            ));
        }
        if let Some(i) = self.hosts.iter().position(String::is_empty) {
            return Err(Error::validation_field(
                format!("spec.hosts[{}]", i),
                "host cannot be empty",
            ));
        }

        for (i, route) in self.http.iter().enumerate() {
            route.validate(&format!("spec.http[{}]", i))?;
        }
        for (i, route) in self.tls.iter().enumerate() {
            let field = format!("spec.tls[{}]", i);
            if route.match_.iter().any(|m| m.sni_hosts.is_empty()) {
                return Err(Error::validation_field(
                    format!("{}.match", field),
                    "sniHosts cannot be empty",
                ));
            }
            validate_weights(&field, route.route.iter().map(|r| (&r.destination, r.weight)))?;
        }
        for (i, route) in self.tcp.iter().enumerate() {
            let field = format!("spec.tcp[{}]", i);
            validate_weights(&field, route.route.iter().map(|r| (&r.destination, r.weight)))?;
        }

        Ok(())
    }
}

impl HttpRoute {
    fn validate(&self, field: &str) -> Result<(), Error> {
        match (self.route.is_empty(), self.redirect.is_some()) {
            (true, false) => {
                return Err(Error::validation_field(
                    field,
                    "either route or redirect is required",
                ))
            }
            (false, true) => {
                return Err(Error::validation_field(
                    field,
                    "route and redirect are mutually exclusive",
                ))
            }
            _ => {}
        }

        if self.redirect.is_none() {
            validate_weights(field, self.route.iter().map(|r| (&r.destination, r.weight)))?;
        }

        for (i, m) in self.match_.iter().enumerate() {
            m.validate(&format!("{}.match[{}]", field, i))?;
        }

        if self.mirror_percent.is_some_and(|p| p > 100) {
            return Err(Error::validation_field(
                format!("{}.mirrorPercent", field),
                "mirrorPercent must be at most 100",
            ));
        }
        if let Some(pct) = &self.mirror_percentage {
            pct.validate(&format!("{}.mirrorPercentage", field))?;
        }

        if let Some(fault) = &self.fault {
            if let Some(pct) = fault.delay.as_ref().and_then(|d| d.percentage) {
                pct.validate(&format!("{}.fault.delay.percentage", field))?;
            }
            if let Some(pct) = fault.abort.as_ref().and_then(|a| a.percentage) {
                pct.validate(&format!("{}.fault.abort.percentage", field))?;
            }
            if let Some(abort) = &fault.abort {
                if !(200..=599).contains(&abort.http_status) {
                    return Err(Error::validation_field(
                        format!("{}.fault.abort.httpStatus", field),
                        format!("{} is not a valid HTTP status", abort.http_status),
                    ));
                }
            }
        }

        if let Some(mirror) = &self.mirror {
            if mirror.host.is_empty() {
                return Err(Error::validation_field(
                    format!("{}.mirror.host", field),
                    "host cannot be empty",
                ));
            }
        }

        Ok(())
    }
}

impl HttpMatchRequest {
    /// All string matches in this request, paired with their field name
    pub fn string_matches(&self) -> impl Iterator<Item = (String, &StringMatch)> {
        let singles = [
            ("uri", &self.uri),
            ("scheme", &self.scheme),
            ("method", &self.method),
            ("authority", &self.authority),
        ]
        .into_iter()
        .filter_map(|(name, m)| m.as_ref().map(|m| (name.to_string(), m)));

        let headers = self
            .headers
            .iter()
            .map(|(k, m)| (format!("headers.{}", k), m));
        let params = self
            .query_params
            .iter()
            .map(|(k, m)| (format!("queryParams.{}", k), m));

        singles.chain(headers).chain(params)
    }

    fn validate(&self, field: &str) -> Result<(), Error> {
        for (name, m) in self.string_matches() {
            m.compile()
                .map_err(|e| e.at_field(format!("{}.{}", field, name)))?;
        }
        if let Some(port) = self.port {
            validate_port(&format!("{}.port", field), port)?;
        }
        Ok(())
    }
}

impl Percentage {
    fn validate(&self, field: &str) -> Result<(), Error> {
        if !(0.0..=100.0).contains(&self.value) {
            return Err(Error::validation_field(
                field,
                format!("percentage {} must be in [0, 100]", self.value),
            ));
        }
        Ok(())
    }
}

fn validate_port(field: &str, port: u32) -> Result<(), Error> {
    if port == 0 || port > u32::from(u16::MAX) {
        return Err(Error::validation_field(
            field,
            format!("port {} is out of range 1-65535", port),
        ));
    }
    Ok(())
}

/// Destinations must name a host; when more than one destination carries
/// weights, they must add up to 100.
fn validate_weights<'a>(
    field: &str,
    routes: impl Iterator<Item = (&'a Destination, Option<i32>)>,
) -> Result<(), Error> {
    let mut count = 0;
    let mut total = 0i64;
    let mut weighted = false;

    for (i, (destination, weight)) in routes.enumerate() {
        if destination.host.is_empty() {
            return Err(Error::validation_field(
                format!("{}.route[{}].destination.host", field, i),
                "host cannot be empty",
            ));
        }
        if let Some(port) = &destination.port {
            validate_port(
                &format!("{}.route[{}].destination.port", field, i),
                port.number,
            )?;
        }
        if let Some(w) = weight {
            if w < 0 {
                return Err(Error::validation_field(
                    format!("{}.route[{}].weight", field, i),
                    "weight cannot be negative",
                ));
            }
            weighted = true;
            total += i64::from(w);
        }
        count += 1;
    }

    if count > 1 && weighted && total != 100 {
        return Err(Error::validation_field(
            format!("{}.route", field),
            format!("total destination weight {} != 100", total),
        ));
    }
    Ok(())
}
