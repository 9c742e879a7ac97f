//! Error types for ChoosePure
//!
//! Limit and already-done errors are business outcomes rather than faults.
//! They carry enough detail for the caller to render an upgrade prompt.

use hyper::StatusCode;
use serde_json::json;
use std::fmt;

use super::usage::UsageKind;

/// Entities that can be looked up and not found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Account,
    VotingOption,
    Report,
    Order,
    Journey,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Account => "User",
            Self::VotingOption => "Voting option",
            Self::Report => "Report",
            Self::Order => "Order",
            Self::Journey => "User journey",
        };
        f.write_str(name)
    }
}

/// Operations that can only happen once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlreadyDone {
    AlreadyVoted,
    TrialAlreadyUsed,
    AlreadyPremium,
    OrderAlreadyCompleted,
}

impl AlreadyDone {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyVoted => "already_voted",
            Self::TrialAlreadyUsed => "trial_already_used",
            Self::AlreadyPremium => "already_premium",
            Self::OrderAlreadyCompleted => "order_already_completed",
        }
    }
}

impl fmt::Display for AlreadyDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::AlreadyVoted => "You have already voted for this option",
            Self::TrialAlreadyUsed => "Trial already used",
            Self::AlreadyPremium => "User is already premium",
            Self::OrderAlreadyCompleted => "Order has already been completed",
        };
        f.write_str(message)
    }
}

/// Main error type for ChoosePure operations
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("{} limit reached ({used}/{limit}). Upgrade to premium for unlimited access.", .kind.label())]
    LimitReached {
        kind: UsageKind,
        used: u32,
        limit: u32,
    },

    #[error("{0}")]
    AlreadyDone(AlreadyDone),

    #[error("Database error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::LimitReached { .. } => StatusCode::FORBIDDEN,
            Self::AlreadyDone(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to a client.
    ///
    /// Store and internal failures are reported generically; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Store(_) => "Service temporarily unavailable".to_string(),
            Self::Internal(_) => "Unexpected server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Structured detail for the envelope's `data` field
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            Self::LimitReached { kind, used, limit } => Some(json!({
                "error": kind.limit_error_code(),
                "used": used,
                "limit": limit,
                "upgrade_required": true,
            })),
            Self::AlreadyDone(done) => Some(json!({ "error": done.code() })),
            _ => None,
        }
    }

    /// Whether this is a business outcome rather than a fault
    pub fn is_business_outcome(&self) -> bool {
        matches!(self, Self::LimitReached { .. } | Self::AlreadyDone(_))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<bson::ser::Error> for AppError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Internal(format!("BSON serialization error: {}", err))
    }
}

impl From<bson::de::Error> for AppError {
    fn from(err: bson::de::Error) -> Self {
        Self::Internal(format!("BSON deserialization error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for ChoosePure operations
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("Email is required".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound(Resource::VotingOption).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::LimitReached {
                kind: UsageKind::Vote,
                used: 5,
                limit: 5
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::AlreadyDone(AlreadyDone::AlreadyVoted).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Store("connection refused".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_limit_detail() {
        let err = AppError::LimitReached {
            kind: UsageKind::ReportView,
            used: 3,
            limit: 3,
        };
        let detail = err.detail().unwrap();
        assert_eq!(detail["error"], "view_limit_reached");
        assert_eq!(detail["used"], 3);
        assert_eq!(detail["upgrade_required"], true);
        assert!(err.is_business_outcome());
    }

    #[test]
    fn test_store_errors_are_not_leaked() {
        let err = AppError::Store("mongodb://secret-host refused".into());
        assert!(!err.public_message().contains("secret-host"));
        assert!(!err.is_business_outcome());
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(
            AppError::NotFound(Resource::Account).to_string(),
            "User not found"
        );
    }
}
