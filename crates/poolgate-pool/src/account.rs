use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use poolgate_common::AccountId;

/// Opaque handle to an already-valid bearer credential. The credential
/// provider rotates the underlying secret out-of-band; the gateway only
/// carries it to the upstream request builder.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRef(String);

impl CredentialRef {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never let the secret reach logs.
        f.write_str("CredentialRef(***)")
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub label: String,
    pub credential: CredentialRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitReason {
    Quota,
    UpstreamError,
    AuthExpired,
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub enum Availability {
    Healthy,
    RateLimited {
        until: Instant,
        reason: LimitReason,
    },
    Disabled,
}

impl Availability {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Availability::Healthy)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Availability::Healthy => "healthy",
            Availability::RateLimited { .. } => "rate_limited",
            Availability::Disabled => "disabled",
        }
    }

    pub fn limited_until(&self) -> Option<Instant> {
        match self {
            Availability::RateLimited { until, .. } => Some(*until),
            _ => None,
        }
    }
}
