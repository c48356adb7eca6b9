//! OpenTelemetry metrics for the decision engine
//!
//! Instruments are created against the global meter provider; without an
//! installed provider they are no-ops.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

use crate::decision::Evaluation;

/// Global meter for authorization metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("istio-authz"));

// ============================================================================
// Decisions
// ============================================================================

/// Counter of authorization decisions
///
/// Labels:
/// - `decision`: ALLOW, DENY
/// - `reason`: denied_by_policy, allowed_by_policy, no_allow_policies, no_matching_allow
pub static DECISIONS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("istio_authz_decisions_total")
        .with_description("Total number of authorization decisions")
        .with_unit("{decisions}")
        .build()
});

// ============================================================================
// Policy Loading
// ============================================================================

/// Counter of policy documents excluded from the snapshot
///
/// Labels:
/// - `reason`: malformed, validation, decode
pub static POLICIES_REJECTED_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("istio_authz_policies_rejected_total")
        .with_description("Total number of rejected AuthorizationPolicy documents")
        .with_unit("{policies}")
        .build()
});

/// Gauge of policies in the active snapshot
pub static SNAPSHOT_POLICIES: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("istio_authz_snapshot_policies")
        .with_description("Number of policies in the active snapshot")
        .with_unit("{policies}")
        .build()
});

// ============================================================================
// Recording Helpers
// ============================================================================

/// Record one evaluation
pub fn record_decision(evaluation: &Evaluation) {
    DECISIONS_TOTAL.add(
        1,
        &[
            KeyValue::new("decision", evaluation.decision.as_str()),
            KeyValue::new("reason", evaluation.reason.as_str()),
        ],
    );
}

/// Record a rejected policy document
pub fn record_rejection(reason: &'static str) {
    POLICIES_REJECTED_TOTAL.add(1, &[KeyValue::new("reason", reason)]);
}

/// Record the size of a newly published snapshot
pub fn record_snapshot_size(policies: usize) {
    SNAPSHOT_POLICIES.record(policies as u64, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{Decision, DecisionReason};

    #[test]
    fn test_recording_without_provider_is_noop() {
        record_decision(&Evaluation {
            decision: Decision::Allow,
            reason: DecisionReason::NoAllowPolicies,
        });
        record_rejection("malformed");
        record_snapshot_size(3);
    }
}
