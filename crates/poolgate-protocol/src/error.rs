use serde::{Deserialize, Serialize};

/// Closed set of client-visible error codes. Retry exhaustion surfaces the
/// specific classified kind; nothing here is a catch-all for another code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequestError,
    NoAccounts,
    StreamIncomplete,
    UpstreamUnavailable,
    RateLimitExceeded,
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: ErrorCode,
    pub message: String,
}

/// The fixed envelope every error response uses: `{ "error": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(kind: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                kind: kind.into(),
                code,
                message: message.into(),
            },
        }
    }
}
