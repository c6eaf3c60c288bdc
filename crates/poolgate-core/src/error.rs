use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{StatusCode, header};

use poolgate_protocol::error::{ErrorCode, ErrorEnvelope};

use crate::classify::FailureKind;

/// A fully classified, client-ready error. Construction is the only place
/// the internal failure taxonomy maps onto the wire envelope, so the closed
/// code set stays closed.
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub status: StatusCode,
    pub envelope: ErrorEnvelope,
}

impl GatewayError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            envelope: ErrorEnvelope::new(
                "invalid_request_error",
                ErrorCode::InvalidRequestError,
                message,
            ),
        }
    }

    pub fn no_accounts() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            envelope: ErrorEnvelope::new(
                "no_accounts",
                ErrorCode::NoAccounts,
                "no healthy account is available to serve this request",
            ),
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            envelope: ErrorEnvelope::new("server_error", ErrorCode::ServerError, message),
        }
    }

    /// Map an exhausted-retry failure to its specific client code. The
    /// distinction between "no capacity" and "upstream broken" survives all
    /// the way to the wire.
    pub fn from_failure(kind: &FailureKind) -> Self {
        match kind {
            FailureKind::RateLimited { .. } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                envelope: ErrorEnvelope::new(
                    "rate_limit_error",
                    ErrorCode::RateLimitExceeded,
                    "all candidate accounts are rate limited",
                ),
            },
            FailureKind::AuthExpired => Self {
                status: StatusCode::BAD_GATEWAY,
                envelope: ErrorEnvelope::new(
                    "auth_expired",
                    ErrorCode::UpstreamUnavailable,
                    "upstream rejected the account credential",
                ),
            },
            FailureKind::UpstreamUnavailable => Self {
                status: StatusCode::BAD_GATEWAY,
                envelope: ErrorEnvelope::new(
                    "upstream_unavailable",
                    ErrorCode::UpstreamUnavailable,
                    "the upstream is unavailable",
                ),
            },
            FailureKind::TransportError => Self {
                status: StatusCode::BAD_GATEWAY,
                envelope: ErrorEnvelope::new(
                    "transport_error",
                    ErrorCode::UpstreamUnavailable,
                    "the upstream connection failed",
                ),
            },
            FailureKind::StreamIncomplete => Self {
                status: StatusCode::BAD_GATEWAY,
                envelope: ErrorEnvelope::new(
                    "stream_incomplete",
                    ErrorCode::StreamIncomplete,
                    "the upstream stream ended before completion",
                ),
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::to_vec(&self.envelope).unwrap_or_else(|_| b"{}".to_vec());
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        response
    }
}
