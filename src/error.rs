use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Device not found: {0}")]
    NotFoundDevice(usize),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Callback invalid: {0}")]
    InvalidCallback(String),
    #[error("Pin already in use: {0}")]
    PinInUse(String),
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),
    #[error("Device limit reached: {0}")]
    CapacityExceeded(usize),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Restore failed: {0}")]
    Restore(String),
    #[error("Backup failed: {0}")]
    Backup(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
    #[error("Network error: {0}")]
    Network(String),
}

impl ResponseError for HubError {
    fn status_code(&self) -> StatusCode {
        match self {
            HubError::NotFoundDevice(_) => StatusCode::NOT_FOUND,
            HubError::InvalidValue(_)
            | HubError::InvalidCallback(_)
            | HubError::UnknownDeviceType(_)
            | HubError::CapacityExceeded(_)
            | HubError::Restore(_) => StatusCode::BAD_REQUEST,
            HubError::PinInUse(_) => StatusCode::CONFLICT,
            HubError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            HubError::Config(_)
            | HubError::Backup(_)
            | HubError::Gpio(_)
            | HubError::Network(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
