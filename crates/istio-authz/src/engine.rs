//! Policy engine holding the active snapshot
//!
//! Readers take an `Arc` to the current [`PolicySnapshot`] and evaluate
//! against it without locking. Writers build a complete new snapshot and swap
//! it in, so a reader sees either the old policy set or the new one in full.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use istio_common::crd::{AuthorizationPolicy, IstioResource};
use istio_common::ISTIO_SYSTEM_NAMESPACE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::attributes::RequestAttributes;
use crate::compile::{CompiledPolicy, PolicyKey};
use crate::decision::{self, Decision, Evaluation, Workload};
use crate::error::{Error, Result};
use crate::metrics;

const AUTHORIZATION_POLICY_KIND: &str = "AuthorizationPolicy";

// ============================================================================
// Configuration
// ============================================================================

/// Engine configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Namespaces whose policies apply to workloads in every namespace
    #[serde(default = "default_root_namespaces")]
    pub root_namespaces: Vec<String>,
}

fn default_root_namespaces() -> Vec<String> {
    vec![ISTIO_SYSTEM_NAMESPACE.to_string()]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_namespaces: default_root_namespaces(),
        }
    }
}

impl EngineConfig {
    /// Configuration with the given root namespaces
    pub fn with_root_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root_namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable set of compiled policies
#[derive(Clone, Debug, Default)]
pub struct PolicySnapshot {
    policies: BTreeMap<PolicyKey, Arc<CompiledPolicy>>,
    generation: u64,
}

impl PolicySnapshot {
    /// Policies in key order
    pub fn policies(&self) -> impl Iterator<Item = &CompiledPolicy> {
        self.policies.values().map(Arc::as_ref)
    }

    /// Look up one policy
    pub fn get(&self, key: &PolicyKey) -> Option<&CompiledPolicy> {
        self.policies.get(key).map(Arc::as_ref)
    }

    /// Number of policies
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the snapshot holds no policies
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Incremented on every published change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Evaluate a request against this snapshot
    pub fn evaluate(
        &self,
        workload: &Workload,
        attrs: &RequestAttributes,
        root_namespaces: &[String],
    ) -> Evaluation {
        decision::evaluate(self.policies(), workload, attrs, root_namespaces)
    }

    fn successor(&self) -> Self {
        Self {
            policies: self.policies.clone(),
            generation: self.generation + 1,
        }
    }
}

// ============================================================================
// Load Reports
// ============================================================================

/// A policy document excluded from the snapshot
#[derive(Debug)]
pub struct Rejection {
    /// `namespace/name` of the document, or its position when unnamed
    pub policy: String,
    /// Why it was rejected
    pub error: Error,
}

/// Outcome of a bulk load
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Policies now in the snapshot
    pub loaded: Vec<PolicyKey>,
    /// Documents excluded from the snapshot
    pub rejected: Vec<Rejection>,
    /// Documents of other kinds that were ignored
    pub skipped: usize,
}

impl LoadReport {
    /// Whether every AuthorizationPolicy document was accepted
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    fn reject(&mut self, policy: String, error: Error) {
        warn!(policy = %policy, error = %error, "Rejected AuthorizationPolicy");
        metrics::record_rejection(error.reason());
        self.rejected.push(Rejection { policy, error });
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Authorization engine over a swappable policy snapshot
#[derive(Debug)]
pub struct PolicyEngine {
    config: EngineConfig,
    snapshot: ArcSwap<PolicySnapshot>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PolicyEngine {
    /// Create an engine with an empty snapshot
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            snapshot: ArcSwap::from_pointee(PolicySnapshot::default()),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The current snapshot. Later updates do not affect the returned value.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the whole policy set.
    ///
    /// Policies that fail to compile are reported and left out; the rest are
    /// published together. A later policy with the same key replaces an
    /// earlier one.
    #[instrument(skip_all, fields(otel.kind = "internal"))]
    pub fn replace<'a>(
        &self,
        policies: impl IntoIterator<Item = &'a AuthorizationPolicy>,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut compiled = BTreeMap::new();

        for policy in policies {
            let key = PolicyKey::of(policy);
            match CompiledPolicy::compile(policy) {
                Ok(p) => {
                    if compiled.insert(key.clone(), Arc::new(p)).is_some() {
                        warn!(policy = %key, "Duplicate AuthorizationPolicy, keeping the last one");
                    }
                }
                Err(e) => report.reject(key.to_string(), e),
            }
        }

        report.loaded = compiled.keys().cloned().collect();
        self.publish(compiled);
        report
    }

    /// Decode a batch of manifest documents and replace the policy set with
    /// the AuthorizationPolicies among them.
    ///
    /// Each document is decoded on its own, so one bad document only
    /// excludes itself. Documents of other kinds are skipped.
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub fn load_documents(&self, documents: Vec<Value>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut policies = Vec::new();

        for (i, document) in documents.into_iter().enumerate() {
            if document.get("kind").and_then(Value::as_str) != Some(AUTHORIZATION_POLICY_KIND) {
                debug!(index = i, "Skipping non-AuthorizationPolicy document");
                report.skipped += 1;
                continue;
            }

            let label = document_label(&document, i);
            match IstioResource::from_value(document) {
                Ok(IstioResource::AuthorizationPolicy(policy)) => policies.push(*policy),
                Ok(other) => {
                    debug!(index = i, kind = other.kind(), "Skipping document");
                    report.skipped += 1;
                }
                Err(e) => report.reject(label, e.into()),
            }
        }

        let replaced = self.replace(&policies);
        report.loaded = replaced.loaded;
        report.rejected.extend(replaced.rejected);
        report
    }

    /// Insert or update a single policy
    #[instrument(skip_all, fields(policy = %PolicyKey::of(policy)))]
    pub fn apply(&self, policy: &AuthorizationPolicy) -> Result<PolicyKey> {
        let key = PolicyKey::of(policy);
        let compiled = match CompiledPolicy::compile(policy) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                warn!(policy = %key, error = %e, "Rejected AuthorizationPolicy");
                metrics::record_rejection(e.reason());
                return Err(e);
            }
        };

        let previous = self.snapshot.rcu(|current| {
            let mut next = current.successor();
            next.policies.insert(key.clone(), Arc::clone(&compiled));
            next
        });
        metrics::record_snapshot_size(self.snapshot.load().len());
        debug!(generation = previous.generation + 1, "Applied AuthorizationPolicy");
        Ok(key)
    }

    /// Remove a policy. Returns whether it was present.
    #[instrument(skip(self))]
    pub fn remove(&self, namespace: &str, name: &str) -> bool {
        let key = PolicyKey::new(namespace, name);
        let mut removed = false;

        self.snapshot.rcu(|current| {
            if !current.policies.contains_key(&key) {
                removed = false;
                return Arc::clone(current);
            }
            let mut next = current.successor();
            next.policies.remove(&key);
            removed = true;
            Arc::new(next)
        });

        if removed {
            metrics::record_snapshot_size(self.snapshot.load().len());
            debug!("Removed AuthorizationPolicy");
        }
        removed
    }

    /// Evaluate a request against the current snapshot
    pub fn evaluate(&self, workload: &Workload, attrs: &RequestAttributes) -> Evaluation {
        let snapshot = self.snapshot.load();
        let evaluation = snapshot.evaluate(workload, attrs, &self.config.root_namespaces);

        debug!(
            namespace = %workload.namespace,
            decision = %evaluation.decision,
            reason = %evaluation.reason,
            generation = snapshot.generation(),
            "Authorization result"
        );
        metrics::record_decision(&evaluation);
        evaluation
    }

    /// Decide a request against the current snapshot
    pub fn decide(&self, workload: &Workload, attrs: &RequestAttributes) -> Decision {
        self.evaluate(workload, attrs).decision
    }

    fn publish(&self, policies: BTreeMap<PolicyKey, Arc<CompiledPolicy>>) {
        let count = policies.len();
        let previous = self.snapshot.rcu(|current| PolicySnapshot {
            policies: policies.clone(),
            generation: current.generation + 1,
        });
        metrics::record_snapshot_size(count);
        info!(
            policies = count,
            generation = previous.generation + 1,
            "Published policy snapshot"
        );
    }
}

/// `namespace/name` from raw metadata, falling back to the document index
fn document_label(document: &Value, index: usize) -> String {
    let metadata = document.get("metadata");
    let field = |name: &str| {
        metadata
            .and_then(|m| m.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    match field("name") {
        Some(name) => format!(
            "{}/{}",
            field("namespace").unwrap_or_else(|| istio_common::DEFAULT_NAMESPACE.to_string()),
            name
        ),
        None => format!("document[{}]", index),
    }
}
