//! RequestAuthentication CRD
//!
//! Declares which JWTs a workload accepts. Token validation itself happens in
//! the proxy; a validated token surfaces as `request.auth.*` attributes that
//! AuthorizationPolicy conditions can match on.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::WorkloadSelector;
use crate::Error;

/// RequestAuthentication defines the JWT rules for the selected workloads.
///
/// Example:
/// ```yaml
/// apiVersion: security.istio.io/v1beta1
/// kind: RequestAuthentication
/// metadata:
///   name: httpbin
///   namespace: foo
/// spec:
///   selector:
///     matchLabels:
///       app: httpbin
///   jwtRules:
///   - issuer: "issuer-foo"
///     jwksUri: https://example.com/.well-known/jwks.json
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "security.istio.io",
    version = "v1beta1",
    kind = "RequestAuthentication",
    plural = "requestauthentications",
    shortname = "ra",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthenticationSpec {
    /// Workloads the policy applies to. If not set, the policy applies to
    /// all workloads in its namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,

    /// JWT validation rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwt_rules: Vec<JwtRule>,
}

/// How to validate a JWT
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtRule {
    /// Issuer of the token (the `iss` claim)
    pub issuer: String,

    /// Accepted audiences. Empty means the service name is accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,

    /// URL of the provider's public key set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Inline JSON Web Key Set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks: Option<String>,

    /// Headers to extract the token from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_headers: Vec<JwtHeader>,

    /// Query parameters to extract the token from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_params: Vec<String>,

    /// Header receiving the base64-encoded payload of a successfully verified token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_payload_to_header: Option<String>,

    /// Keep the original token in the forwarded request
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forward_original_token: bool,
}

/// Header location of a JWT
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct JwtHeader {
    /// HTTP header name
    pub name: String,

    /// Prefix to strip before the token (e.g., "Bearer ")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl RequestAuthenticationSpec {
    /// Validate every JWT rule
    pub fn validate(&self) -> Result<(), Error> {
        for (i, rule) in self.jwt_rules.iter().enumerate() {
            let field = format!("spec.jwtRules[{}]", i);
            if rule.issuer.is_empty() {
                return Err(Error::validation_field(field, "issuer must be set"));
            }
            if rule.jwks_uri.is_some() && rule.jwks.is_some() {
                return Err(Error::validation_field(
                    field,
                    "only one of jwksUri and jwks may be set",
                ));
            }
            if rule.from_headers.iter().any(|h| h.name.is_empty()) {
                return Err(Error::validation_field(
                    format!("{}.fromHeaders", field),
                    "header name cannot be empty",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(issuer: &str) -> JwtRule {
        JwtRule {
            issuer: issuer.to_string(),
            jwks_uri: Some("https://example.com/jwks.json".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_jwt_rules_yaml() {
        let value = crate::yaml::parse_yaml(
            r#"
apiVersion: security.istio.io/v1beta1
kind: RequestAuthentication
metadata:
  name: jwt-example
  namespace: foo
spec:
  jwtRules:
  - issuer: issuer-foo
    audiences: ["bookstore"]
    fromHeaders:
    - name: x-jwt-assertion
      prefix: "Bearer "
    forwardOriginalToken: true
"#,
        )
        .expect("parse yaml");
        let ra: RequestAuthentication = serde_json::from_value(value).expect("parse");
        let rule = &ra.spec.jwt_rules[0];
        assert_eq!(rule.issuer, "issuer-foo");
        assert_eq!(rule.from_headers[0].prefix.as_deref(), Some("Bearer "));
        assert!(rule.forward_original_token);
        assert!(ra.spec.validate().is_ok());
    }

    #[test]
    fn test_empty_issuer_is_invalid() {
        let spec = RequestAuthenticationSpec {
            selector: None,
            jwt_rules: vec![rule("")],
        };
        assert_eq!(spec.validate().unwrap_err().field(), Some("spec.jwtRules[0]"));
    }

    #[test]
    fn test_jwks_and_jwks_uri_are_exclusive() {
        let mut r = rule("issuer-foo");
        r.jwks = Some("{\"keys\":[]}".to_string());
        let spec = RequestAuthenticationSpec {
            selector: None,
            jwt_rules: vec![r],
        };
        assert!(spec.validate().is_err());
    }
}
