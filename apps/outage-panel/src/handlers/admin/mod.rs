// Operator API: outage records, status and settings.

pub mod outages;
pub mod settings;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use outage_core::OutageError;
use tracing::error;

pub use outages::{
    create_outage, delete_outage, finish_outage, get_outage, get_status, list_outages, start_outage,
    update_outage,
};
pub use settings::{get_settings, save_settings};

/// Error returned by operator handlers, rendered as a status with a plain message.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<OutageError>() {
            Some(invalid) => ApiError::BadRequest(invalid.to_string()),
            None => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Outage not found").into_response(),
            ApiError::Internal(err) => {
                error!("Operator request failed: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err)).into_response()
            }
        }
    }
}
