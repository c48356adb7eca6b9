//! The ALLOW/DENY decision
//!
//! Precedence is fixed:
//! 1. keep the policies that select the workload
//! 2. any matching DENY policy denies
//! 3. no ALLOW policies at all allows
//! 4. a matching ALLOW policy allows
//! 5. otherwise deny

use std::collections::BTreeMap;
use std::fmt;

use istio_common::crd::security::AuthorizationPolicyAction;
use serde::{Deserialize, Serialize};

use crate::attributes::RequestAttributes;
use crate::compile::{CompiledPolicy, PolicyKey};

/// Outcome of an authorization check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The request may proceed
    Allow,
    /// The request is rejected
    Deny,
}

impl Decision {
    /// Wire name of the decision
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Deny => "DENY",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a decision was reached
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionReason {
    /// A DENY policy matched
    DeniedBy(PolicyKey),
    /// An ALLOW policy matched
    AllowedBy(PolicyKey),
    /// No ALLOW policy selects the workload
    NoAllowPolicies,
    /// ALLOW policies select the workload but none matched
    NoMatchingAllow,
}

impl DecisionReason {
    /// Low-cardinality label for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeniedBy(_) => "denied_by_policy",
            Self::AllowedBy(_) => "allowed_by_policy",
            Self::NoAllowPolicies => "no_allow_policies",
            Self::NoMatchingAllow => "no_matching_allow",
        }
    }

    /// The policy responsible, if one was
    pub fn policy(&self) -> Option<&PolicyKey> {
        match self {
            Self::DeniedBy(key) | Self::AllowedBy(key) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeniedBy(key) => write!(f, "denied by policy {}", key),
            Self::AllowedBy(key) => write!(f, "allowed by policy {}", key),
            Self::NoAllowPolicies => f.write_str("no ALLOW policy applies to the workload"),
            Self::NoMatchingAllow => f.write_str("no ALLOW policy matched the request"),
        }
    }
}

/// A decision together with its reason
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    /// ALLOW or DENY
    pub decision: Decision,
    /// Why
    pub reason: DecisionReason,
}

impl Evaluation {
    fn new(decision: Decision, reason: DecisionReason) -> Self {
        Self { decision, reason }
    }
}

/// The workload receiving the request
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Workload {
    /// Namespace the workload runs in
    pub namespace: String,
    /// Workload labels, matched against policy selectors
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Workload {
    /// A workload in `namespace` with no labels
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Evaluate a request against a set of policies.
///
/// Pure: the result depends only on the arguments.
pub fn evaluate<'a>(
    policies: impl IntoIterator<Item = &'a CompiledPolicy>,
    workload: &Workload,
    attrs: &RequestAttributes,
    root_namespaces: &[String],
) -> Evaluation {
    let selected: Vec<&CompiledPolicy> = policies
        .into_iter()
        .filter(|p| p.selects(workload, root_namespaces))
        .collect();

    if let Some(policy) = selected
        .iter()
        .filter(|p| p.action() == AuthorizationPolicyAction::Deny)
        .find(|p| p.matches(attrs))
    {
        return Evaluation::new(
            Decision::Deny,
            DecisionReason::DeniedBy(policy.key().clone()),
        );
    }

    let mut allow = selected
        .iter()
        .filter(|p| p.action() == AuthorizationPolicyAction::Allow)
        .peekable();

    if allow.peek().is_none() {
        return Evaluation::new(Decision::Allow, DecisionReason::NoAllowPolicies);
    }

    match allow.find(|p| p.matches(attrs)) {
        Some(policy) => Evaluation::new(
            Decision::Allow,
            DecisionReason::AllowedBy(policy.key().clone()),
        ),
        None => Evaluation::new(Decision::Deny, DecisionReason::NoMatchingAllow),
    }
}

/// [`evaluate`] without the reason
pub fn decide<'a>(
    policies: impl IntoIterator<Item = &'a CompiledPolicy>,
    workload: &Workload,
    attrs: &RequestAttributes,
    root_namespaces: &[String],
) -> Decision {
    evaluate(policies, workload, attrs, root_namespaces).decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use istio_common::crd::security::{
        AuthorizationPolicy, AuthorizationPolicySpec, Operation, Rule, Source,
    };
    use istio_common::types::WorkloadSelector;

    fn compiled(namespace: &str, name: &str, spec: AuthorizationPolicySpec) -> CompiledPolicy {
        let mut policy = AuthorizationPolicy::new(name, spec);
        policy.metadata.namespace = Some(namespace.to_string());
        CompiledPolicy::compile(&policy).expect("compile")
    }

    fn from_namespace(ns: &str) -> Rule {
        Rule::from_sources([Source {
            namespaces: vec![ns.to_string()],
            ..Default::default()
        }])
    }

    fn no_roots() -> Vec<String> {
        vec![]
    }

    #[test]
    fn test_no_policies_allows() {
        let none: [&CompiledPolicy; 0] = [];
        let eval = evaluate(
            none,
            &Workload::new("foo"),
            &RequestAttributes::new(),
            &no_roots(),
        );
        assert_eq!(eval.decision, Decision::Allow);
        assert_eq!(eval.reason, DecisionReason::NoAllowPolicies);
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let policies = [
            compiled("foo", "allow-all", AuthorizationPolicySpec::allow(vec![Rule::default()])),
            compiled("foo", "deny-all", AuthorizationPolicySpec::deny(vec![Rule::default()])),
        ];
        let eval = evaluate(
            &policies,
            &Workload::new("foo"),
            &RequestAttributes::new(),
            &no_roots(),
        );
        assert_eq!(eval.decision, Decision::Deny);
        assert_eq!(
            eval.reason,
            DecisionReason::DeniedBy(PolicyKey::new("foo", "deny-all"))
        );
    }

    #[test]
    fn test_allow_policy_without_match_denies() {
        let policies = [compiled(
            "foo",
            "dev-only",
            AuthorizationPolicySpec::allow(vec![from_namespace("dev")]),
        )];
        let workload = Workload::new("foo");

        let prod = RequestAttributes::new().with_namespace("prod");
        let dev = RequestAttributes::new().with_namespace("dev");

        let eval = evaluate(&policies, &workload, &prod, &no_roots());
        assert_eq!(eval.decision, Decision::Deny);
        assert_eq!(eval.reason, DecisionReason::NoMatchingAllow);

        let eval = evaluate(&policies, &workload, &dev, &no_roots());
        assert_eq!(eval.decision, Decision::Allow);
        assert_eq!(eval.reason.policy(), Some(&PolicyKey::new("foo", "dev-only")));
    }

    #[test]
    fn test_allow_nothing_policy_denies_everything() {
        let policies = [compiled("foo", "allow-nothing", AuthorizationPolicySpec::allow(vec![]))];
        assert_eq!(
            decide(&policies, &Workload::new("foo"), &RequestAttributes::new(), &no_roots()),
            Decision::Deny
        );
    }

    #[test]
    fn test_selector_limits_policy_to_matching_workloads() {
        let policies = [compiled(
            "foo",
            "deny-httpbin",
            AuthorizationPolicySpec::deny(vec![Rule::default()])
                .with_selector(WorkloadSelector::new([("app", "httpbin")])),
        )];
        let attrs = RequestAttributes::new();

        let httpbin = Workload::new("foo").with_label("app", "httpbin");
        let other = Workload::new("foo").with_label("app", "sleep");

        assert_eq!(decide(&policies, &httpbin, &attrs, &no_roots()), Decision::Deny);
        assert_eq!(decide(&policies, &other, &attrs, &no_roots()), Decision::Allow);
    }

    #[test]
    fn test_policies_in_other_namespaces_do_not_apply() {
        let policies = [compiled(
            "bar",
            "deny-all",
            AuthorizationPolicySpec::deny(vec![Rule::default()]),
        )];
        assert_eq!(
            decide(&policies, &Workload::new("foo"), &RequestAttributes::new(), &no_roots()),
            Decision::Allow
        );
    }

    #[test]
    fn test_root_namespace_policies_apply_everywhere() {
        let policies = [compiled(
            "istio-system",
            "deny-post",
            AuthorizationPolicySpec::deny(vec![Rule::default().to_operations([Operation {
                methods: vec!["POST".to_string()],
                ..Default::default()
            }])]),
        )];
        let roots = vec!["istio-system".to_string()];
        let post = RequestAttributes::new().with_method("POST");

        assert_eq!(decide(&policies, &Workload::new("foo"), &post, &roots), Decision::Deny);
        assert_eq!(decide(&policies, &Workload::new("bar"), &post, &roots), Decision::Deny);
        assert_eq!(
            decide(&policies, &Workload::new("foo"), &post, &no_roots()),
            Decision::Allow
        );
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            DecisionReason::DeniedBy(PolicyKey::new("foo", "deny-all")).to_string(),
            "denied by policy foo/deny-all"
        );
        assert_eq!(Decision::Allow.to_string(), "ALLOW");
    }
}
