//! Error types for Istio resource handling
//!
//! Errors carry the resource kind and name so that a rejected document can be
//! traced back to the manifest it came from.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Istio resource operations
#[derive(Debug, Error)]
pub enum Error {
    /// A resource spec violates a constraint the schema cannot express
    #[error("validation error for {kind} {name}: {message}")]
    Validation {
        /// Resource kind (e.g., "DestinationRule")
        kind: String,
        /// Resource name (namespace/name when known)
        name: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.trafficPolicy.tls")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// YAML parse error
    #[error("yaml error: {0}")]
    Yaml(String),

    /// Document has an apiVersion/kind pair this crate does not model
    #[error("unknown resource {api_version}/{kind}")]
    UnknownResource {
        /// apiVersion found in the document
        api_version: String,
        /// kind found in the document
        kind: String,
    },
}

impl Error {
    /// Create a validation error without resource context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            kind: UNKNOWN_CONTEXT.to_string(),
            name: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a field path
    pub fn validation_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            kind: UNKNOWN_CONTEXT.to_string(),
            name: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Attach resource kind and name to a validation error.
    ///
    /// Spec-level `validate()` methods don't know which object they belong to;
    /// callers holding the full resource fill that in on the way out.
    pub fn for_resource(self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        match self {
            Self::Validation { message, field, .. } => Self::Validation {
                kind: kind.into(),
                name: name.into(),
                message,
                field,
            },
            other => other,
        }
    }

    /// Replace the field path of a validation error
    pub fn at_field(self, path: impl Into<String>) -> Self {
        match self {
            Self::Validation {
                kind,
                name,
                message,
                ..
            } => Self::Validation {
                kind,
                name,
                message,
                field: Some(path.into()),
            },
            other => other,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// The field path of a validation error, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<crate::yaml::YamlError> for Error {
    fn from(e: crate::yaml::YamlError) -> Self {
        Self::Yaml(e.to_string())
    }
}
