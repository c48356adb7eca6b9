//! AuthorizationPolicy CRD
//!
//! Access control on workloads in the mesh. When ALLOW and DENY policies
//! select the same workload, DENY policies are evaluated first:
//!
//! 1. If any DENY policy matches the request, deny it.
//! 2. If there are no ALLOW policies for the workload, allow it.
//! 3. If any ALLOW policy matches the request, allow it.
//! 4. Deny the request.
//!
//! The evaluator lives in the `istio-authz` crate; this module only carries
//! the wire schema and the structural checks that can be made without it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::WorkloadSelector;
use crate::Error;

/// AuthorizationPolicy enables access control on workloads.
///
/// Example:
/// ```yaml
/// apiVersion: security.istio.io/v1beta1
/// kind: AuthorizationPolicy
/// metadata:
///   name: httpbin
///   namespace: foo
/// spec:
///   action: DENY
///   rules:
///   - from:
///     - source:
///         namespaces: ["dev"]
///     to:
///     - operation:
///         methods: ["POST"]
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "security.istio.io",
    version = "v1beta1",
    kind = "AuthorizationPolicy",
    plural = "authorizationpolicies",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    /// Workload selector deciding where to apply the policy.
    /// If not set, the policy applies to all workloads in its namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,

    /// Rules to match the request. A match occurs when at least one rule
    /// matches. If not set, the match never occurs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,

    /// Action to take if the request matches. Defaults to ALLOW.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<AuthorizationPolicyAction>,
}

/// Action an AuthorizationPolicy takes on match
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationPolicyAction {
    /// Allow a request only if it matches the rules
    #[default]
    Allow,
    /// Deny a request if it matches any of the rules
    Deny,
}

impl AuthorizationPolicyAction {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
        }
    }
}

impl std::fmt::Display for AuthorizationPolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matches requests from a list of sources that perform a list of operations
/// subject to a list of conditions. An empty rule always matches.
///
/// Every string field supports Exact ("abc"), Prefix ("abc*"), Suffix
/// ("*abc") and Presence ("*") matching.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Rule {
    /// Sources of the request. If not set, any source is allowed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<RuleFrom>,

    /// Operations of the request. If not set, any operation is allowed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<RuleTo>,

    /// Additional conditions. If not set, any condition is allowed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Condition>,
}

/// Wrapper for a single source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RuleFrom {
    /// Source of a request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
}

/// Wrapper for a single operation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RuleTo {
    /// Operation of a request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

/// Source identities of a request. Fields are ANDed together.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Peer identities, matched against `source.principal`. Requires mTLS.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,

    /// Negative match of peer identities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_principals: Vec<String>,

    /// Request identities ("iss/sub"), matched against `request.auth.principal`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_principals: Vec<String>,

    /// Negative match of request identities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_request_principals: Vec<String>,

    /// Namespaces, matched against `source.namespace`. Requires mTLS.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Negative match of namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_namespaces: Vec<String>,

    /// IP blocks matched against `source.ip`: single IPs or CIDRs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_blocks: Vec<String>,

    /// Negative match of IP blocks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_ip_blocks: Vec<String>,
}

/// Operations of a request. Fields are ANDed together.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Hosts, matched against `request.host`. HTTP only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    /// Negative match of hosts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_hosts: Vec<String>,

    /// Ports, matched against `destination.port`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    /// Negative match of ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_ports: Vec<String>,

    /// Methods, matched against `request.method`. Always "POST" for gRPC.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,

    /// Negative match of methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_methods: Vec<String>,

    /// Paths, matched against `request.url_path`.
    /// For gRPC this is "/package.service/method".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    /// Negative match of paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_paths: Vec<String>,
}

/// An additional required attribute
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Name of an Istio attribute (e.g., `request.auth.claims[iss]`)
    #[serde(default)]
    pub key: String,

    /// Allowed values for the attribute
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Negative match of values for the attribute
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_values: Vec<String>,
}

impl AuthorizationPolicySpec {
    /// An ALLOW policy with the given rules
    pub fn allow(rules: Vec<Rule>) -> Self {
        Self {
            selector: None,
            rules,
            action: Some(AuthorizationPolicyAction::Allow),
        }
    }

    /// A DENY policy with the given rules
    pub fn deny(rules: Vec<Rule>) -> Self {
        Self {
            selector: None,
            rules,
            action: Some(AuthorizationPolicyAction::Deny),
        }
    }

    /// Restrict the policy to workloads carrying these labels
    pub fn with_selector(mut self, selector: WorkloadSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// The action, applying the ALLOW default when unset
    pub fn effective_action(&self) -> AuthorizationPolicyAction {
        self.action.unwrap_or_default()
    }

    /// Validate the structural constraints of the spec
    ///
    /// Value-level checks (IP block parsing) happen when the policy is
    /// compiled for evaluation.
    pub fn validate(&self) -> Result<(), Error> {
        for (i, rule) in self.rules.iter().enumerate() {
            for (j, from) in rule.from.iter().enumerate() {
                if from.source.is_none() {
                    return Err(Error::validation_field(
                        format!("spec.rules[{}].from[{}]", i, j),
                        "from entry must have a source",
                    ));
                }
            }
            for (j, to) in rule.to.iter().enumerate() {
                if to.operation.is_none() {
                    return Err(Error::validation_field(
                        format!("spec.rules[{}].to[{}]", i, j),
                        "to entry must have an operation",
                    ));
                }
            }
            for (j, condition) in rule.when.iter().enumerate() {
                condition
                    .validate()
                    .map_err(|e| e.at_field(format!("spec.rules[{}].when[{}]", i, j)))?;
            }
        }
        Ok(())
    }
}

impl Rule {
    /// A rule matching requests from any of the given sources
    pub fn from_sources(sources: impl IntoIterator<Item = Source>) -> Self {
        Self {
            from: sources
                .into_iter()
                .map(|s| RuleFrom { source: Some(s) })
                .collect(),
            ..Default::default()
        }
    }

    /// Add operations to the rule
    pub fn to_operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.to.extend(operations.into_iter().map(|o| RuleTo {
            operation: Some(o),
        }));
        self
    }

    /// Add a condition to the rule
    pub fn when(mut self, condition: Condition) -> Self {
        self.when.push(condition);
        self
    }
}

impl Condition {
    /// A condition requiring the attribute to match one of `values`
    pub fn values(key: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            values,
            not_values: vec![],
        }
    }

    /// A condition requiring the attribute to match none of `not_values`
    pub fn not_values(key: impl Into<String>, not_values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            values: vec![],
            not_values,
        }
    }

    /// A condition needs a key and at least one of values / notValues
    pub fn validate(&self) -> Result<(), Error> {
        if self.key.is_empty() {
            return Err(Error::validation("condition key cannot be empty"));
        }
        if self.values.is_empty() && self.not_values.is_empty() {
            return Err(Error::validation(format!(
                "condition '{}' must set at least one of values or notValues",
                self.key
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> AuthorizationPolicy {
        let value = crate::yaml::parse_yaml(yaml).expect("parse yaml");
        serde_json::from_value(value).expect("parse")
    }

    #[test]
    fn test_full_allow_policy_yaml() {
        let policy = parse(
            r#"
apiVersion: security.istio.io/v1beta1
kind: AuthorizationPolicy
metadata:
  name: httpbin
  namespace: foo
spec:
  action: ALLOW
  rules:
  - from:
    - source:
        principals: ["cluster.local/ns/default/sa/sleep"]
    - source:
        namespaces: ["test"]
    to:
    - operation:
        methods: ["GET"]
        paths: ["/info*"]
    - operation:
        methods: ["POST"]
        paths: ["/data"]
    when:
    - key: request.auth.claims[iss]
      values: ["https://accounts.google.com"]
"#,
        );

        assert_eq!(policy.metadata.namespace.as_deref(), Some("foo"));
        assert_eq!(policy.spec.effective_action(), AuthorizationPolicyAction::Allow);
        let rule = &policy.spec.rules[0];
        assert_eq!(rule.from.len(), 2);
        assert_eq!(rule.to.len(), 2);
        assert_eq!(rule.when[0].key, "request.auth.claims[iss]");
        assert!(policy.spec.validate().is_ok());
    }

    #[test]
    fn test_action_defaults_to_allow() {
        let policy = parse(
            r#"
apiVersion: security.istio.io/v1beta1
kind: AuthorizationPolicy
metadata:
  name: allow-all
  namespace: foo
spec:
  rules:
  - {}
"#,
        );
        assert!(policy.spec.action.is_none());
        assert_eq!(policy.spec.effective_action(), AuthorizationPolicyAction::Allow);
        assert_eq!(policy.spec.rules, vec![Rule::default()]);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let value = serde_json::json!({
            "apiVersion": "security.istio.io/v1beta1",
            "kind": "AuthorizationPolicy",
            "metadata": {"name": "audit", "namespace": "foo"},
            "spec": {"action": "AUDIT"}
        });
        assert!(serde_json::from_value::<AuthorizationPolicy>(value).is_err());
    }

    #[test]
    fn test_negative_fields_use_istio_names() {
        let source = Source {
            not_ip_blocks: vec!["1.2.3.4".to_string()],
            not_request_principals: vec!["*".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["notIpBlocks"][0], "1.2.3.4");
        assert_eq!(json["notRequestPrincipals"][0], "*");
        assert!(json.get("principals").is_none());
    }

    #[test]
    fn test_empty_condition_fails_validation() {
        let spec = AuthorizationPolicySpec::allow(vec![Rule::default().when(Condition {
            key: "request.headers[x-token]".to_string(),
            ..Default::default()
        })]);
        let err = spec.validate().unwrap_err();
        assert_eq!(err.field(), Some("spec.rules[0].when[0]"));
    }

    #[test]
    fn test_condition_without_key_fails_validation() {
        let condition = Condition::values("", vec!["x".to_string()]);
        assert!(condition.validate().is_err());
    }

    #[test]
    fn test_from_without_source_fails_validation() {
        let spec = AuthorizationPolicySpec::deny(vec![Rule {
            from: vec![RuleFrom { source: None }],
            ..Default::default()
        }]);
        let err = spec.validate().unwrap_err();
        assert_eq!(err.field(), Some("spec.rules[0].from[0]"));
    }

    #[test]
    fn test_builders_produce_expected_shape() {
        let spec = AuthorizationPolicySpec::deny(vec![Rule::from_sources([Source {
            namespaces: vec!["dev".to_string()],
            ..Default::default()
        }])
        .to_operations([Operation {
            methods: vec!["POST".to_string()],
            ..Default::default()
        }])])
        .with_selector(WorkloadSelector::new([("app", "httpbin")]));

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["action"], "DENY");
        assert_eq!(json["selector"]["matchLabels"]["app"], "httpbin");
        assert_eq!(json["rules"][0]["from"][0]["source"]["namespaces"][0], "dev");
        assert_eq!(json["rules"][0]["to"][0]["operation"]["methods"][0], "POST");
    }
}
