//! Workload selectors
//!
//! Istio selects workloads by label equality: every listed label must be
//! present on the workload with the same value. Extra workload labels are
//! ignored, and an empty selector selects everything.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Check that every `selector` label is present in `labels` with the same value
pub fn labels_match(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Workload selector used by the security resources
///
/// ```yaml
/// selector:
///   matchLabels:
///     app: httpbin
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Labels that must all match on the workload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

impl WorkloadSelector {
    /// Create a selector from label pairs
    pub fn new<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Check if a workload with the given labels is selected
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels_match(&self.match_labels, labels)
    }

    /// An empty selector matches every workload
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }
}
