//! Value types shared across the Istio resources

mod selector;
mod status;
mod string_match;

pub use selector::{labels_match, WorkloadSelector};
pub use status::{ConditionStatus, IstioCondition, IstioStatus};
pub use string_match::{StringMatch, StringMatcher};
