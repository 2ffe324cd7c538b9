//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use freightline_assignments::AssignmentError;
use freightline_events::EventError;
use freightline_webhooks::WebhookError;

use crate::config::ConfigError;

/// Error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Webhook(e) => match e {
                WebhookError::InvalidPayload(_) | WebhookError::InvalidSubscription(_) => 400,
                WebhookError::InvalidSignature | WebhookError::ExpiredSignature => 401,
                WebhookError::SubscriptionNotFound(_) | WebhookError::EventNotFound(_) => 404,
                WebhookError::Conflict(_) => 409,
                WebhookError::HttpError(_) | WebhookError::Timeout => 502,
                WebhookError::StorageError(_) | WebhookError::ConfigError(_) => 500,
            },
            ApiError::Assignment(e) => match e {
                AssignmentError::InvalidInput(_) => 400,
                AssignmentError::NotAssignedCarrier { .. } => 403,
                AssignmentError::NotFound(_) => 404,
                AssignmentError::NotPending { .. }
                | AssignmentError::NotAccepted { .. }
                | AssignmentError::Conflict(_) => 409,
                AssignmentError::Expired => 410,
                AssignmentError::Storage(_) => 500,
            },
            ApiError::Event(e) => match e {
                EventError::InvalidPayload { .. } | EventError::EmptyEventType => 400,
                EventError::HandlerFailed(_) => 500,
            },
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Webhook(e) => match e {
                WebhookError::InvalidPayload(_) => "INVALID_PAYLOAD",
                WebhookError::InvalidSubscription(_) => "INVALID_SUBSCRIPTION",
                WebhookError::InvalidSignature => "INVALID_SIGNATURE",
                WebhookError::ExpiredSignature => "EXPIRED_SIGNATURE",
                WebhookError::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
                WebhookError::EventNotFound(_) => "DELIVERY_NOT_FOUND",
                WebhookError::Conflict(_) => "CONFLICT",
                WebhookError::HttpError(_) => "HTTP_ERROR",
                WebhookError::Timeout => "TIMEOUT",
                WebhookError::StorageError(_) => "STORAGE_ERROR",
                WebhookError::ConfigError(_) => "CONFIG_ERROR",
            },
            ApiError::Assignment(e) => e.code(),
            ApiError::Event(e) => match e {
                EventError::InvalidPayload { .. } | EventError::EmptyEventType => "INVALID_EVENT",
                EventError::HandlerFailed(_) => "HANDLER_FAILED",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (status, axum::Json(body)).into_response()
    }
}

/// Error starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Assignment(#[from] AssignmentError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use freightline_assignments::AssignmentStatus;

    #[test]
    fn test_assignment_status_codes() {
        let cases = [
            (AssignmentError::NotFound("a".into()), 404),
            (
                AssignmentError::NotAssignedCarrier {
                    assignment_id: "a".into(),
                    carrier_id: "c".into(),
                },
                403,
            ),
            (
                AssignmentError::NotPending {
                    status: AssignmentStatus::Accepted,
                },
                409,
            ),
            (AssignmentError::Expired, 410),
            (AssignmentError::InvalidInput("x".into()), 400),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
    }

    #[test]
    fn test_webhook_status_codes() {
        assert_eq!(
            ApiError::from(WebhookError::SubscriptionNotFound("s".into())).status_code(),
            404
        );
        assert_eq!(
            ApiError::from(WebhookError::InvalidSubscription("bad url".into())).status_code(),
            400
        );
        assert_eq!(
            ApiError::from(WebhookError::StorageError("down".into())).code(),
            "STORAGE_ERROR"
        );
    }
}
