//! Error types for Flowerbase

use thiserror::Error;

/// Flowerbase error types
#[derive(Error, Debug)]
pub enum Error {
    // Authorization Errors
    #[error("Insert not permitted")]
    InsertNotPermitted,

    #[error("Update not permitted")]
    UpdateNotPermitted,

    #[error("Delete not permitted")]
    DeleteNotPermitted,

    // Rule Errors
    #[error("Operator not found: {0}")]
    OperatorNotFound(String),

    #[error("Invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    // Function Errors
    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function error: {0}")]
    FunctionError(String),

    #[error("Function timed out: {0}")]
    FunctionTimeout(String),

    // Database Errors
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // General Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("BSON serialization error: {0}")]
    BsonSerError(#[from] bson::ser::Error),

    #[error("BSON deserialization error: {0}")]
    BsonDeError(#[from] bson::de::Error),
}

/// Result type alias for Flowerbase operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP status code for each error type
impl Error {
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidRegex(_) => 400,

            // 403 Forbidden
            Self::InsertNotPermitted | Self::UpdateNotPermitted | Self::DeleteNotPermitted => 403,

            // 404 Not Found
            Self::FunctionNotFound(_) | Self::CollectionNotFound(_) => 404,

            // 500 Internal Server Error
            Self::OperatorNotFound(_)
            | Self::InvalidRule(_)
            | Self::FunctionError(_)
            | Self::DatabaseError(_)
            | Self::ConfigError(_)
            | Self::InternalError(_)
            | Self::IoError(_)
            | Self::JsonError(_)
            | Self::BsonSerError(_)
            | Self::BsonDeError(_) => 500,

            // 504 Gateway Timeout
            Self::FunctionTimeout(_) => 504,
        }
    }

    /// Error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsertNotPermitted | Self::UpdateNotPermitted | Self::DeleteNotPermitted => {
                "permission_denied"
            }
            Self::OperatorNotFound(_) => "operator_not_found",
            Self::InvalidRegex(_) => "invalid_regex",
            Self::InvalidRule(_) => "invalid_rule",
            Self::FunctionNotFound(_) => "function_not_found",
            Self::FunctionError(_) => "function_error",
            Self::FunctionTimeout(_) => "function_timeout",
            Self::CollectionNotFound(_) => "collection_not_found",
            Self::DatabaseError(_) => "database_error",
            Self::ConfigError(_) => "config_error",
            Self::InternalError(_) => "internal_error",
            Self::IoError(_) => "io_error",
            Self::JsonError(_) => "json_error",
            Self::BsonSerError(_) | Self::BsonDeError(_) => "bson_error",
        }
    }

    /// Whether this error is a rule-enforcement denial
    pub fn is_permission_denied(&self) -> bool {
        self.status_code() == 403
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_messages() {
        assert_eq!(Error::InsertNotPermitted.to_string(), "Insert not permitted");
        assert_eq!(Error::UpdateNotPermitted.to_string(), "Update not permitted");
        assert_eq!(Error::DeleteNotPermitted.to_string(), "Delete not permitted");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::InsertNotPermitted.status_code(), 403);
        assert_eq!(Error::OperatorNotFound("$foo".into()).status_code(), 500);
        assert_eq!(Error::FunctionNotFound("f".into()).status_code(), 404);
        assert_eq!(Error::FunctionTimeout("f".into()).status_code(), 504);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::DeleteNotPermitted.error_code(), "permission_denied");
        assert!(Error::UpdateNotPermitted.is_permission_denied());
        assert!(!Error::InvalidRule("x".into()).is_permission_denied());
    }
}
