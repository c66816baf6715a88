//! Application-wide error types.
//!
//! Every failure a handler can return maps to exactly one variant here; no
//! untyped errors cross the API boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid blood type: {0:?}")]
    InvalidBloodType(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Expiry date must be in the future")]
    InvalidExpiry,

    #[error("Donation {0} has already been collected")]
    DuplicateCollection(i64),

    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    #[error("{0} {1} not found")]
    NotFound(&'static str, i64),

    #[error("Unparseable date: {0:?}")]
    InvalidDate(String),

    #[error("Missing x-hospital-id header")]
    MissingActor,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Stable machine-readable code included in every error payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidBloodType(_) => "invalid_blood_type",
            Self::InvalidStateTransition(_) => "invalid_state_transition",
            Self::InvalidExpiry => "invalid_expiry",
            Self::DuplicateCollection(_) => "duplicate_collection",
            Self::InvalidOffer(_) => "invalid_offer",
            Self::NotFound(..) => "not_found",
            Self::InvalidDate(_) => "invalid_date",
            Self::MissingActor => "missing_actor",
            Self::Database(_) | Self::Migrate(_) => "database_error",
            Self::Config(_) => "config_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBloodType(_)
            | Self::InvalidExpiry
            | Self::InvalidOffer(_)
            | Self::InvalidDate(_)
            | Self::MissingActor => StatusCode::BAD_REQUEST,
            Self::InvalidStateTransition(_) | Self::DuplicateCollection(_) => StatusCode::CONFLICT,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Migrate(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}
