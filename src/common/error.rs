use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug)]
pub struct AppError {
    pub kind: Box<ErrorKind>,
    pub context: ErrorContext,
}

#[derive(Debug, Error)]
#[allow(dead_code, clippy::enum_variant_names)]
pub enum ErrorKind {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    TokenExpired,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token revoked")]
    TokenRevoked,

    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("user disabled")]
    UserDisabled,
    #[error("insufficient permissions")]
    InsufficientPermissions { missing: Vec<String> },

    #[error("missing tenant")]
    MissingTenant,
    #[error("realm not configured for tenant")]
    RealmNotConfigured,
    #[error("realm conflict: {0}")]
    RealmConflict(String),

    #[error("user mapping failure: {0}")]
    UserMappingFailure(String),
    #[error("user conflict: {0}")]
    UserConflict(String),

    #[error("external service failure: {0}")]
    ExternalServiceFailure(String),
    #[error("public key unavailable: {0}")]
    PublicKeyUnavailable(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("not found: {0}")]
    NotFoundError(String),
    #[error("serialization error: {0}")]
    SerializationError(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ErrorKind {
    /// Stable wire code. Never renamed once a client depends on it.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidToken(_) => "invalid_token",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::TokenRevoked => "token_revoked",
            ErrorKind::Forbidden(_) => "forbidden",
            ErrorKind::UserDisabled => "user_disabled",
            ErrorKind::InsufficientPermissions { .. } => "insufficient_permissions",
            ErrorKind::MissingTenant => "missing_tenant",
            ErrorKind::RealmNotConfigured => "realm_not_configured",
            ErrorKind::RealmConflict(_) => "realm_conflict",
            ErrorKind::UserMappingFailure(_) => "user_mapping_failure",
            ErrorKind::UserConflict(_) => "user_conflict",
            ErrorKind::ExternalServiceFailure(_) => "external_service_failure",
            ErrorKind::PublicKeyUnavailable(_) => "public_key_unavailable",
            ErrorKind::StorageFailure(_) => "storage_failure",
            ErrorKind::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ErrorKind::ValidationError(_) => "validation_error",
            ErrorKind::ConfigurationError(_) => "configuration_error",
            ErrorKind::NotFoundError(_) => "not_found",
            ErrorKind::SerializationError(_) => "serialization_error",
            ErrorKind::InternalError(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidToken(_)
            | ErrorKind::TokenExpired
            | ErrorKind::InvalidCredentials
            | ErrorKind::TokenRevoked => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden(_)
            | ErrorKind::UserDisabled
            | ErrorKind::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            ErrorKind::MissingTenant | ErrorKind::ValidationError(_) => StatusCode::BAD_REQUEST,
            ErrorKind::RealmNotConfigured | ErrorKind::NotFoundError(_) => StatusCode::NOT_FOUND,
            ErrorKind::RealmConflict(_) | ErrorKind::UserConflict(_) => StatusCode::CONFLICT,
            ErrorKind::ExternalServiceFailure(_) => StatusCode::BAD_GATEWAY,
            ErrorKind::PublicKeyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UserMappingFailure(_)
            | ErrorKind::StorageFailure(_)
            | ErrorKind::ConfigurationError(_)
            | ErrorKind::SerializationError(_)
            | ErrorKind::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.kind.status();

        let details = match &*self.kind {
            ErrorKind::InsufficientPermissions { missing } => {
                Some(serde_json::json!({ "missing_permissions": missing }))
            }
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: self.kind.code(),
            message: self.kind.to_string(),
            timestamp: Utc::now().timestamp(),
            details,
        });

        let mut response = (status, body).into_response();

        if let ErrorKind::RateLimitExceeded { retry_after_secs } = &*self.kind {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<Box<dyn std::error::Error>> for AppError {
    fn from(error: Box<dyn std::error::Error>) -> Self {
        Self::internal(error.to_string())
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<oauth2::basic::BasicRequestTokenError<oauth2::reqwest::Error<reqwest::Error>>>
    for AppError
{
    fn from(
        err: oauth2::basic::BasicRequestTokenError<oauth2::reqwest::Error<reqwest::Error>>,
    ) -> Self {
        Self::invalid_credentials_with(err.to_string())
    }
}

impl From<oauth2::url::ParseError> for AppError {
    fn from(err: oauth2::url::ParseError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::external(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        Self::external(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
        match err.kind() {
            JwtErrorKind::ExpiredSignature => Self::token_expired(),
            _ => Self::invalid_token(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(kind: ErrorKind, context_msg: impl Into<String>) -> Self {
        Self {
            kind: Box::new(kind),
            context: ErrorContext::new().with_message(context_msg.into()),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidToken(message.into()), "invalid token")
    }

    pub fn token_expired() -> Self {
        Self::new(ErrorKind::TokenExpired, "token expired")
    }

    pub fn invalid_credentials() -> Self {
        Self::new(ErrorKind::InvalidCredentials, "invalid credentials")
    }

    /// Same kind, carries upstream context for logs without leaking it to the client.
    pub fn invalid_credentials_with(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCredentials, message.into())
    }

    pub fn token_revoked() -> Self {
        Self::new(ErrorKind::TokenRevoked, "token revoked")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden(message.into()), "forbidden")
    }

    pub fn user_disabled() -> Self {
        Self::new(ErrorKind::UserDisabled, "user disabled")
    }

    pub fn insufficient_permissions(missing: Vec<String>) -> Self {
        Self::new(
            ErrorKind::InsufficientPermissions { missing },
            "insufficient permissions",
        )
    }

    pub fn missing_tenant() -> Self {
        Self::new(ErrorKind::MissingTenant, "missing tenant")
    }

    pub fn realm_not_configured() -> Self {
        Self::new(ErrorKind::RealmNotConfigured, "realm not configured")
    }

    pub fn realm_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RealmConflict(message.into()), "realm conflict")
    }

    pub fn user_mapping_failure(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UserMappingFailure(message.into()),
            "user mapping failure",
        )
    }

    pub fn user_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserConflict(message.into()), "user conflict")
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ExternalServiceFailure(message.into()),
            "external service failure",
        )
    }

    pub fn public_key_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::PublicKeyUnavailable(message.into()),
            "public key unavailable",
        )
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageFailure(message.into()), "storage failure")
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(
            ErrorKind::RateLimitExceeded { retry_after_secs },
            "rate limit exceeded",
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError(message.into()), "validation error")
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::ConfigurationError(message.into()),
            "configuration error",
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFoundError(message.into()), "not found")
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::SerializationError(message.into()),
            "serialization error",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError(message.into()), "internal error")
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.kind, self.context)
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Default, Serialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_tenant(mut self, tenant_id: String) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_request(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expired_maps_to_401() {
        let err = AppError::token_expired();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let err = AppError::rate_limited(3600);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3600");
    }

    #[test]
    fn insufficient_permissions_reports_code() {
        let err = AppError::insufficient_permissions(vec!["widgets:delete".to_string()]);
        assert_eq!(err.kind.code(), "insufficient_permissions");
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn jwt_expired_error_converts_to_token_expired() {
        use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
        let jwt_err: JwtError = JwtErrorKind::ExpiredSignature.into();
        let app_err: AppError = jwt_err.into();
        assert_eq!(app_err.kind.code(), "token_expired");
    }

    #[test]
    fn realm_conflict_maps_to_409() {
        let err = AppError::realm_conflict("domain already bound to another realm");
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
