//! Error types for the Converge provisioning engine.
//!
//! This module provides a comprehensive error hierarchy for all phases of a
//! run: stack validation, graph resolution, provider calls, state
//! persistence, and plan execution.

use thiserror::Error;

/// The main error type for the Converge engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Stack or graph validation errors.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Provider operation errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State persistence errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Plan execution errors.
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Secret resolution errors.
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Validation errors.
///
/// Any of these fails the entire run before a single provider call is made:
/// a plan derived from an invalid graph cannot be trusted.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A property references a resource id that is not declared.
    #[error("Resource '{resource}' references undeclared resource '{referenced}'")]
    UnknownReference {
        /// The resource holding the dangling reference.
        resource: String,
        /// The id that is not declared in the stack.
        referenced: String,
    },

    /// An explicit `depends_on` entry names an undeclared resource.
    #[error("Resource '{resource}' depends on undeclared resource '{dependency}'")]
    UnknownDependency {
        /// The resource with the bad dependency list.
        resource: String,
        /// The id that is not declared in the stack.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency {
        /// Resource ids participating in the cycle, in declaration order.
        cycle: Vec<String>,
    },

    /// Two resources share the same id.
    #[error("Duplicate resource id: {id}")]
    DuplicateId {
        /// The duplicated id.
        id: String,
    },

    /// A resource declares a type the registry does not know.
    #[error("Resource '{resource}' has unknown type '{type_name}'")]
    UnknownType {
        /// The resource with the unknown type.
        resource: String,
        /// The unregistered type tag.
        type_name: String,
    },

    /// A required property is missing.
    #[error("Resource '{resource}' is missing required property '{property}'")]
    MissingProperty {
        /// The incomplete resource.
        resource: String,
        /// Name of the missing property.
        property: String,
    },

    /// A resource declares an unknown property for its type.
    #[error("Resource '{resource}' has unknown property '{property}' for type '{type_name}'")]
    UnknownProperty {
        /// The resource with the stray property.
        resource: String,
        /// Name of the unknown property.
        property: String,
        /// The resource's type tag.
        type_name: String,
    },

    /// A resource depends on itself.
    #[error("Resource '{resource}' depends on itself")]
    SelfDependency {
        /// The self-referential resource.
        resource: String,
    },

    /// An export names an undeclared resource.
    #[error("Export '{export}' references undeclared resource '{referenced}'")]
    UnknownExportTarget {
        /// The export name.
        export: String,
        /// The id that is not declared in the stack.
        referenced: String,
    },
}

/// Provider operation errors.
///
/// Every variant is classified [`ErrorClass::Transient`] or
/// [`ErrorClass::Permanent`]; the scheduler retries transients with backoff
/// and fails permanents immediately.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider rate limited the request.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The provider's view is not yet consistent (e.g. a just-created
    /// resource is not visible to a follow-up read).
    #[error("Provider not yet consistent: {message}")]
    EventualConsistency {
        /// Description of the inconsistency.
        message: String,
    },

    /// The provider API is temporarily unavailable.
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Description of the outage.
        message: String,
    },

    /// A readiness wait exceeded its bounded timeout.
    #[error("Timeout waiting for '{physical_id}' to become ready after {timeout_secs}s")]
    ReadyTimeout {
        /// Physical id of the resource being waited on.
        physical_id: String,
        /// The bounded wait that elapsed.
        timeout_secs: u64,
    },

    /// The referenced physical resource does not exist.
    #[error("Resource not found: {physical_id}")]
    NotFound {
        /// The missing physical id.
        physical_id: String,
    },

    /// A property value was rejected by the provider.
    #[error("Invalid property '{property}': {message}")]
    InvalidProperty {
        /// Name of the rejected property.
        property: String,
        /// Provider-side rejection message.
        message: String,
    },

    /// Any other provider failure.
    #[error("Provider request failed: {message}")]
    RequestFailed {
        /// Description of the failure.
        message: String,
        /// Whether the failure is worth retrying.
        transient: bool,
    },
}

/// Classification of a provider error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retryable with backoff (rate limits, eventual consistency, outages).
    Transient,
    /// Not retryable (invalid input, missing resources, timeouts).
    Permanent,
}

/// State persistence errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// Stored state could not be parsed.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be serialized.
    #[error("State serialization failed: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The backend failed to read or write.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },
}

/// Plan execution errors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Retry budget exhausted for a resource.
    #[error("Maximum retry attempts ({attempts}) exceeded for '{resource}'")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// The resource that kept failing.
        resource: String,
    },

    /// The run was aborted before execution.
    #[error("Run aborted: {reason}")]
    Aborted {
        /// Reason for the abort.
        reason: String,
    },

    /// The plan references a resource the executor cannot find.
    #[error("Plan step {step} references unknown resource '{resource}'")]
    CorruptPlan {
        /// Index of the offending step.
        step: usize,
        /// The unknown resource id.
        resource: String,
    },
}

/// Secret resolution errors.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The secret store has no value for a key.
    #[error("Secret not found: {key}")]
    NotFound {
        /// The unresolved key.
        key: String,
    },

    /// The secret store itself failed.
    #[error("Secret store error: {message}")]
    StoreFailed {
        /// Description of the store failure.
        message: String,
    },
}

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ProviderError {
    /// Returns the retry classification for this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. }
            | Self::EventualConsistency { .. }
            | Self::Unavailable { .. } => ErrorClass::Transient,
            Self::RequestFailed { transient, .. } => {
                if *transient {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            Self::ReadyTimeout { .. } | Self::NotFound { .. } | Self::InvalidProperty { .. } => {
                ErrorClass::Permanent
            }
        }
    }

    /// Returns true if the scheduler should retry this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Returns the provider-suggested retry delay in seconds, if any.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Creates a permanent request failure.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::RequestFailed {
            message: message.into(),
            transient: false,
        }
    }

    /// Creates a transient request failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::RequestFailed {
            message: message.into(),
            transient: true,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert_eq!(
            ProviderError::RateLimited {
                retry_after_secs: 5
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            ProviderError::EventualConsistency {
                message: String::from("not visible yet")
            }
            .class(),
            ErrorClass::Transient
        );
        assert_eq!(
            ProviderError::transient("flaky").class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_permanent_classification() {
        assert_eq!(
            ProviderError::InvalidProperty {
                property: String::from("cidr_block"),
                message: String::from("not a CIDR")
            }
            .class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            ProviderError::permanent("bad request").class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_cycle_display_names_members() {
        let err = ValidationError::CyclicDependency {
            cycle: vec![
                String::from("route"),
                String::from("route-table"),
                String::from("route"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic dependency: route -> route-table -> route"
        );
    }

    #[test]
    fn test_rate_limit_delay_hint() {
        let err = ProviderError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.retry_delay_secs(), Some(30));
        assert_eq!(ProviderError::transient("x").retry_delay_secs(), None);
    }
}
