use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::Error;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

/// API error that converts to a proper HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Structured context, e.g. the denial behind a 403.
    pub details: Option<Value>,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(what) => Self::new(StatusCode::NOT_FOUND, format!("Not found: {what}")),
            Error::Forbidden(denial) => Self {
                status: StatusCode::FORBIDDEN,
                message: denial.message(),
                details: serde_json::to_value(&denial).ok(),
            },
            Error::Conflict(reason) => Self::new(StatusCode::CONFLICT, reason),
            Error::BadRequest(reason) => Self::bad_request(reason),
            e @ Error::PayloadTooLarge { .. } => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
            }
            Error::InvalidState(reason) => {
                tracing::error!("Integrity violation: {reason}");
                Self::internal("Internal server error")
            }
            e => {
                tracing::error!("Request failed: {e}");
                Self::internal("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "data": null, "error": self.message });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessLevel, Action, Denial, DenialCode};

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::NotFound("asset 'a'".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("lost".into()), StatusCode::CONFLICT),
            (Error::BadRequest("no".into()), StatusCode::BAD_REQUEST),
            (Error::PayloadTooLarge { limit: 1 }, StatusCode::PAYLOAD_TOO_LARGE),
            (Error::InvalidState("gap".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Config("bad".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }
    }

    #[test]
    fn test_forbidden_carries_denial() {
        let denial = Denial {
            code: DenialCode::InsufficientAccess,
            asset_id: "a".to_string(),
            action: Action::Read,
            access_level: AccessLevel::Institution,
            user_institution: Some("Y".to_string()),
            required_institution: Some("X".to_string()),
            embargo_until: None,
        };
        let error = ApiError::from(Error::Forbidden(denial));
        assert_eq!(error.status, StatusCode::FORBIDDEN);

        let details = error.details.unwrap();
        assert_eq!(details["code"], "insufficient_access");
        assert_eq!(details["required_institution"], "X");
    }
}
