//! Istio resource status
//!
//! Written by controllers, never read by the authorization path. The JSON
//! names are the protobuf ones (`observed_generation`, `last_transition_time`)
//! rather than camelCase.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Status of an Istio resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct IstioStatus {
    /// Current service state of the resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<IstioCondition>,

    /// Generation of the spec the status reflects
    #[serde(default, skip_serializing_if = "is_zero")]
    pub observed_generation: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A single status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct IstioCondition {
    /// Type of the condition (e.g., "Reconciled")
    #[serde(rename = "type", default)]
    pub type_: String,

    /// Status of the condition
    #[serde(default)]
    pub status: ConditionStatus,

    /// Last time we probed the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<DateTime<Utc>>,

    /// Last time the condition transitioned from one status to another
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Unique, one-word, CamelCase reason for the condition's last transition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message indicating details about the last transition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl IstioCondition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            type_: type_.into(),
            status,
            last_probe_time: Some(now),
            last_transition_time: Some(now),
            reason: reason.into(),
            message: message.into(),
        }
    }
}

impl IstioStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&IstioCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace the condition with the same type.
    ///
    /// The transition time is carried over from the existing condition when
    /// the status did not change.
    pub fn set_condition(&mut self, mut condition: IstioCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}
