//! Common types for Istio: CRDs, errors, YAML loading and logging setup

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod telemetry;
pub mod types;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace that hosts the mesh control plane. Policies here apply mesh-wide.
pub const ISTIO_SYSTEM_NAMESPACE: &str = "istio-system";

/// Namespace assumed for namespaced resources whose metadata omits one
pub const DEFAULT_NAMESPACE: &str = "default";
