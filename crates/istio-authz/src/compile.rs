//! Load-time compilation of AuthorizationPolicy documents
//!
//! Everything that can be wrong with a policy is caught here: IP blocks are
//! parsed into networks and structurally incomplete entries are rejected. A
//! policy either compiles as a whole or is excluded; evaluation never sees a
//! partially understood policy.

use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use istio_common::crd::security::{
    AuthorizationPolicy, AuthorizationPolicyAction, Condition, Operation, Rule, Source,
};
use istio_common::types::WorkloadSelector;
use istio_common::DEFAULT_NAMESPACE;
use kube::ResourceExt;

use crate::attributes::{keys, RequestAttributes};
use crate::decision::Workload;
use crate::error::{Error, Result};
use crate::matcher::PairMatcher;

/// Identity of a policy within the mesh
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PolicyKey {
    /// Namespace the policy lives in
    pub namespace: String,
    /// Policy name
    pub name: String,
}

impl PolicyKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a policy document; a missing namespace means `default`
    pub fn of(policy: &AuthorizationPolicy) -> Self {
        Self::new(
            policy
                .namespace()
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            policy.name_any(),
        )
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// An AuthorizationPolicy ready for evaluation
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledPolicy {
    key: PolicyKey,
    action: AuthorizationPolicyAction,
    selector: Option<WorkloadSelector>,
    rules: Vec<CompiledRule>,
}

impl CompiledPolicy {
    /// Validate and compile a policy document
    pub fn compile(policy: &AuthorizationPolicy) -> Result<Self> {
        let key = PolicyKey::of(policy);

        policy
            .spec
            .validate()
            .map_err(|e| e.for_resource("AuthorizationPolicy", key.to_string()))?;

        let rules = policy
            .spec
            .rules
            .iter()
            .enumerate()
            .map(|(i, rule)| {
                CompiledRule::compile(rule).map_err(|msg| {
                    Error::malformed(key.to_string(), format!("spec.rules[{}]: {}", i, msg))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            action: policy.spec.effective_action(),
            selector: policy.spec.selector.clone(),
            rules,
            key,
        })
    }

    /// Identity of the policy
    pub fn key(&self) -> &PolicyKey {
        &self.key
    }

    /// ALLOW or DENY
    pub fn action(&self) -> AuthorizationPolicyAction {
        self.action
    }

    /// Number of rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Whether the policy applies to `workload`.
    ///
    /// The policy must live in the workload's namespace or in one of the
    /// root namespaces, and its selector (if any) must match the workload's
    /// labels.
    pub fn selects(&self, workload: &Workload, root_namespaces: &[String]) -> bool {
        let in_scope = self.key.namespace == workload.namespace
            || root_namespaces.iter().any(|ns| *ns == self.key.namespace);
        in_scope
            && self
                .selector
                .as_ref()
                .is_none_or(|s| s.matches(&workload.labels))
    }

    /// Whether any rule matches. A policy without rules matches nothing.
    pub fn matches(&self, attrs: &RequestAttributes) -> bool {
        self.rules.iter().any(|r| r.matches(attrs))
    }
}

#[derive(Clone, Debug, PartialEq)]
struct CompiledRule {
    from: Vec<CompiledSource>,
    to: Vec<CompiledOperation>,
    when: Vec<CompiledCondition>,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> std::result::Result<Self, String> {
        let from = rule
            .from
            .iter()
            .enumerate()
            .map(|(j, f)| match &f.source {
                Some(source) => {
                    CompiledSource::compile(source).map_err(|e| format!("from[{}]: {}", j, e))
                }
                None => Err(format!("from[{}]: missing source", j)),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let to = rule
            .to
            .iter()
            .enumerate()
            .map(|(j, t)| match &t.operation {
                Some(op) => Ok(CompiledOperation::compile(op)),
                None => Err(format!("to[{}]: missing operation", j)),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let when = rule
            .when
            .iter()
            .enumerate()
            .map(|(j, c)| CompiledCondition::compile(c).map_err(|e| format!("when[{}]: {}", j, e)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { from, to, when })
    }

    /// `from` entries are ORed, `to` entries are ORed, `when` conditions are
    /// ANDed. Empty lists match.
    fn matches(&self, attrs: &RequestAttributes) -> bool {
        (self.from.is_empty() || self.from.iter().any(|s| s.matches(attrs)))
            && (self.to.is_empty() || self.to.iter().any(|o| o.matches(attrs)))
            && self.when.iter().all(|c| c.matches(attrs))
    }
}

#[derive(Clone, Debug, PartialEq)]
struct CompiledSource {
    principals: PairMatcher<String>,
    request_principals: PairMatcher<String>,
    namespaces: PairMatcher<String>,
    ip_blocks: PairMatcher<IpNet>,
}

impl CompiledSource {
    fn compile(source: &Source) -> std::result::Result<Self, String> {
        Ok(Self {
            principals: PairMatcher::globs(&source.principals, &source.not_principals),
            request_principals: PairMatcher::globs(
                &source.request_principals,
                &source.not_request_principals,
            ),
            namespaces: PairMatcher::globs(&source.namespaces, &source.not_namespaces),
            ip_blocks: PairMatcher::parse(
                &source.ip_blocks,
                &source.not_ip_blocks,
                parse_ip_block,
            )?,
        })
    }

    fn matches(&self, attrs: &RequestAttributes) -> bool {
        self.principals.matches(attrs.principal.as_str())
            && self
                .request_principals
                .matches(attrs.request_principal.as_str())
            && self.namespaces.matches(attrs.namespace.as_str())
            && self.ip_blocks.matches_opt(attrs.source_ip.as_ref())
    }
}

#[derive(Clone, Debug, PartialEq)]
struct CompiledOperation {
    hosts: PairMatcher<String>,
    ports: PairMatcher<String>,
    methods: PairMatcher<String>,
    paths: PairMatcher<String>,
}

impl CompiledOperation {
    fn compile(op: &Operation) -> Self {
        Self {
            hosts: PairMatcher::globs(&op.hosts, &op.not_hosts),
            ports: PairMatcher::globs(&op.ports, &op.not_ports),
            methods: PairMatcher::globs(&op.methods, &op.not_methods),
            paths: PairMatcher::globs(&op.paths, &op.not_paths),
        }
    }

    /// Ports are matched in their decimal form, so globs such as `80*` work
    fn matches(&self, attrs: &RequestAttributes) -> bool {
        let port = attrs.port.map(|p| p.to_string());
        self.hosts.matches(attrs.host.as_str())
            && self.ports.matches_opt(port.as_deref())
            && self.methods.matches(attrs.method.as_str())
            && self.paths.matches(attrs.path.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
struct CompiledCondition {
    key: String,
    matcher: ConditionMatcher,
}

#[derive(Clone, Debug, PartialEq)]
enum ConditionMatcher {
    Ip(PairMatcher<IpNet>),
    Glob(PairMatcher<String>),
}

impl CompiledCondition {
    fn compile(condition: &Condition) -> std::result::Result<Self, String> {
        let key = condition.key.as_str();
        let matcher = if keys::IP_KEYS.contains(&key) {
            ConditionMatcher::Ip(PairMatcher::parse(
                &condition.values,
                &condition.not_values,
                parse_ip_block,
            )?)
        } else {
            ConditionMatcher::Glob(PairMatcher::globs(&condition.values, &condition.not_values))
        };

        Ok(Self {
            key: condition.key.clone(),
            matcher,
        })
    }

    fn matches(&self, attrs: &RequestAttributes) -> bool {
        match &self.matcher {
            ConditionMatcher::Ip(m) => m.matches_opt(attrs.ip(&self.key).as_ref()),
            ConditionMatcher::Glob(m) => {
                let values = attrs.values(&self.key);
                let refs: Vec<&str> = values.iter().map(|v| v.as_ref()).collect();
                m.matches_any(&refs)
            }
        }
    }
}

/// A single address becomes a host-length network
fn parse_ip_block(s: &str) -> std::result::Result<IpNet, String> {
    let parsed = if s.contains('/') {
        s.parse::<IpNet>().ok()
    } else {
        s.parse::<IpAddr>().ok().map(IpNet::from)
    };
    parsed.ok_or_else(|| format!("invalid IP block '{}'", s))
}
