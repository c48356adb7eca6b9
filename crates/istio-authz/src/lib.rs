//! Istio AuthorizationPolicy decision engine
//!
//! Policies are compiled once at load time into matchers and published as an
//! immutable snapshot. Each request is then decided by a pure function of the
//! snapshot, the target workload and the request attributes:
//!
//! 1. A matching DENY policy denies.
//! 2. With no ALLOW policy for the workload, the request is allowed.
//! 3. A matching ALLOW policy allows.
//! 4. Anything else is denied.
//!
//! # Example
//!
//! ```
//! use istio_authz::{Decision, PolicyEngine, RequestAttributes, Workload};
//! use istio_common::crd::security::{AuthorizationPolicy, AuthorizationPolicySpec, Rule};
//!
//! let spec = AuthorizationPolicySpec::deny(vec![Rule::default()]);
//! let mut deny_all = AuthorizationPolicy::new("deny-all", spec);
//! deny_all.metadata.namespace = Some("foo".to_string());
//!
//! let engine = PolicyEngine::default();
//! let report = engine.replace([&deny_all]);
//! assert!(report.is_clean());
//!
//! let decision = engine.decide(&Workload::new("foo"), &RequestAttributes::new());
//! assert_eq!(decision, Decision::Deny);
//! ```

#![deny(missing_docs)]

mod attributes;
mod compile;
mod decision;
mod engine;
mod error;
mod glob;
mod matcher;
pub mod metrics;

pub use attributes::{keys, RequestAttributes};
pub use compile::{CompiledPolicy, PolicyKey};
pub use decision::{decide, evaluate, Decision, DecisionReason, Evaluation, Workload};
pub use engine::{EngineConfig, LoadReport, PolicyEngine, PolicySnapshot, Rejection};
pub use error::{Error, Result};
pub use glob::glob_match;
pub use matcher::{match_pair, PairMatcher, ValueMatcher};
