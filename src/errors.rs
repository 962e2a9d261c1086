use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    #[error("invalid {entity} transition: cannot {attempted} from {current}")]
    InvalidTransition {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
    },

    #[error("policy violation: {}", reasons.join("; "))]
    PolicyViolation {
        reasons: Vec<String>,
    },

    #[error("{service} unavailable: {message}")]
    ExternalDependency {
        service: &'static str,
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("store unavailable: {message}")]
    StoreUnavailable {
        message: String,
    },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// whether the caller may retry the same operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ExternalDependency { .. } | EngineError::StoreUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_violation_lists_every_reason() {
        let err = EngineError::PolicyViolation {
            reasons: vec!["kyc not verified".to_string(), "account too new".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "policy violation: kyc not verified; account too new"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let external = EngineError::ExternalDependency {
            service: "payment rail",
            message: "timeout".to_string(),
        };
        assert!(external.is_retryable());
        assert!(!EngineError::validation("bad amount").is_retryable());
        assert!(!EngineError::not_found("loan", "x").is_retryable());
    }
}
