//! Error types for the authorization engine

use thiserror::Error;

/// Errors raised while loading policies. Evaluation itself never fails.
#[derive(Debug, Error)]
pub enum Error {
    /// The policy cannot be compiled for evaluation; it is excluded from the
    /// active snapshot as a whole
    #[error("malformed policy {policy}: {message}")]
    Malformed {
        /// `namespace/name` of the policy
        policy: String,
        /// What is wrong with it
        message: String,
    },

    /// Error from the shared resource layer
    #[error(transparent)]
    Common(#[from] istio_common::Error),
}

impl Error {
    /// Create a malformed-policy error
    pub fn malformed(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            policy: policy.into(),
            message: message.into(),
        }
    }

    /// Short label used as the `reason` attribute on rejection metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::Common(istio_common::Error::Validation { .. }) => "validation",
            Self::Common(_) => "decode",
        }
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display_names_policy() {
        let err = Error::malformed("foo/bad-cidr", "invalid IP block '10.0.0.0/99'");
        assert_eq!(
            err.to_string(),
            "malformed policy foo/bad-cidr: invalid IP block '10.0.0.0/99'"
        );
        assert_eq!(err.reason(), "malformed");
    }

    #[test]
    fn test_common_validation_errors_are_transparent() {
        let err: Error = istio_common::Error::validation("condition key cannot be empty").into();
        assert_eq!(err.reason(), "validation");
        assert!(err.to_string().contains("condition key cannot be empty"));
    }

    #[test]
    fn test_undecodable_documents_are_labelled_decode() {
        let err: Error =
            istio_common::Error::serialization_for("AuthorizationPolicy", "unknown variant `MAYBE`")
                .into();
        assert_eq!(err.reason(), "decode");
    }
}
