use waitlist_api::ErrorResponse;
use warp::http::StatusCode;

/// Service-level error taxonomy. Every variant maps to a fixed HTTP status
/// and a short human-readable message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input. Never retried.
    #[error("{0}")]
    Validation(String),
    /// Bad admin key, bad webhook secret, or unauthenticated wallet link.
    #[error("{0}")]
    Authorization(String),
    /// Eligible identity exists but a business rule forbids the operation.
    #[error("{0}")]
    Forbidden(String),
    /// Unknown email or referral code.
    #[error("{0}")]
    NotFound(String),
    /// Tier has zero remaining capacity. The user must choose differently.
    #[error("tier {tier} is full, please choose another tier")]
    Capacity { tier: u8 },
    /// Duplicate email, already-linked referral. Idempotent-safe to report.
    #[error("{0}")]
    Conflict(String),
    /// Identity provider, beta API, transfer API, or datastore failure.
    #[error("{0}")]
    Upstream(String),
    /// Missing provider credentials. Distinct from an outage so operators
    /// can tell misconfiguration apart from a real failure.
    #[error("{0}: integration not configured")]
    Configuration(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authorization(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Capacity { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error reply with the mapped status code.
    pub fn into_reply(self) -> warp::reply::WithStatus<warp::reply::Json> {
        warp::reply::with_status(
            warp::reply::json(&ErrorResponse::new(self.to_string())),
            self.status(),
        )
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match err {
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Unavailable(msg) => {
                ApiError::Upstream(format!("datastore unavailable: {}", msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Authorization("no".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("no".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("missing".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Capacity { tier: 1 }.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Upstream("down".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_configuration_message() {
        let err = ApiError::Configuration("testflight".into());
        assert_eq!(err.to_string(), "testflight: integration not configured");
    }
}
