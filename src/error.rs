use thiserror::Error;

use crate::protocol::Status;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum ShadowdError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Signature mismatch for profile {0}")]
    BadSignature(i64),

    #[error("No profile {profile_id} registered for server {server_address}")]
    ProfileNotFound { server_address: String, profile_id: i64 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShadowdError {
    /// Response status sent to the client when this error ends a request.
    pub fn status(&self) -> Status {
        match self {
            ShadowdError::Frame(_) => Status::BadFrame,
            ShadowdError::Json(_) => Status::BadRequest,
            ShadowdError::BadRequest(_) => Status::BadRequest,
            ShadowdError::BadSignature(_) => Status::BadSignature,
            ShadowdError::ProfileNotFound { .. } => Status::NotFound,
            ShadowdError::Config(_) => Status::InternalError,
            ShadowdError::Tls(_) => Status::InternalError,
            ShadowdError::Bind { .. } => Status::InternalError,
            ShadowdError::Internal(_) => Status::InternalError,
            ShadowdError::Database(_) => Status::InternalError,
            ShadowdError::Io(_) => Status::InternalError,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ShadowdError::Config(_) => "CONFIG_ERROR",
            ShadowdError::Tls(_) => "TLS_ERROR",
            ShadowdError::Bind { .. } => "BIND_ERROR",
            ShadowdError::Frame(_) => "FRAME_ERROR",
            ShadowdError::BadRequest(_) => "BAD_REQUEST",
            ShadowdError::BadSignature(_) => "BAD_SIGNATURE",
            ShadowdError::ProfileNotFound { .. } => "PROFILE_NOT_FOUND",
            ShadowdError::Internal(_) => "INTERNAL_ERROR",
            ShadowdError::Database(_) => "DATABASE_ERROR",
            ShadowdError::Json(_) => "JSON_ERROR",
            ShadowdError::Io(_) => "IO_ERROR",
        }
    }

    /// Rejections end the session. Assessment and persistence failures are
    /// answered with an internal-error response and the session continues.
    pub fn closes_connection(&self) -> bool {
        !matches!(
            self,
            ShadowdError::Internal(_) | ShadowdError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ShadowdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ShadowdError::BadSignature(3).status(), Status::BadSignature);
        assert_eq!(
            ShadowdError::ProfileNotFound {
                server_address: "10.0.0.1".to_string(),
                profile_id: 1,
            }
            .status(),
            Status::NotFound
        );
        assert_eq!(
            ShadowdError::Internal("boom".to_string()).status(),
            Status::InternalError
        );
        assert_eq!(ShadowdError::Frame("short".to_string()).error_code(), "FRAME_ERROR");
    }

    #[test]
    fn test_only_request_failures_keep_connection() {
        assert!(ShadowdError::BadSignature(1).closes_connection());
        assert!(ShadowdError::Frame("eof".to_string()).closes_connection());
        assert!(!ShadowdError::Internal("lookup".to_string()).closes_connection());
        assert!(!ShadowdError::Database(sqlx::Error::RowNotFound).closes_connection());
    }

    #[test]
    fn test_not_found_message_has_no_secret_material() {
        let err = ShadowdError::ProfileNotFound {
            server_address: "192.168.0.5".to_string(),
            profile_id: 7,
        };
        assert_eq!(err.to_string(), "No profile 7 registered for server 192.168.0.5");
    }
}
