use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::plan::Plan;

/// Error surface of the HTTP API. Quota exhaustion carries the numbers the
/// client needs to drive an upgrade flow; upstream and internal failures are
/// deliberately generic toward the client, with detail logged server-side.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You have reached your limit of {limit} messages on the {plan} plan. Upgrade your plan to keep chatting.")]
    QuotaExceeded { used: i32, limit: i32, plan: Plan },

    #[error("Failed to process the message")]
    Upstream(#[source] anyhow::Error),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("Error processing the request")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::InvalidSignature | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::QuotaExceeded { used, limit, plan } => {
                HttpResponse::build(self.status_code()).json(json!({
                    "error": self.to_string(),
                    "messages_used": used,
                    "messages_limit": limit,
                    "plan": plan,
                }))
            }
            ApiError::Upstream(source) => {
                error!("Upstream model error: {:?}", source);
                HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
            }
            ApiError::Internal(source) => {
                error!("Internal error: {:?}", source);
                HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
            }
            _ => HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound("User").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::QuotaExceeded { used: 50, limit: 50, plan: Plan::Free }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::InvalidSignature.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Upstream(anyhow::anyhow!("model down")).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn quota_message_names_limit_and_plan() {
        let err = ApiError::QuotaExceeded { used: 50, limit: 50, plan: Plan::Free };
        let text = err.to_string();
        assert!(text.contains("50"));
        assert!(text.contains("FREE"));
    }
}
