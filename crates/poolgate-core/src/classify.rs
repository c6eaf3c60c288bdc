use std::time::Duration;

use http::HeaderMap;

use crate::upstream::ConnectError;

/// Closed set of upstream failure classifications. Distinct causes stay
/// distinct; nothing collapses into a generic code on the way to the client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureKind {
    /// 401 before the first forwarded byte. The account needs a credential
    /// refresh from the provider before it is offered again.
    AuthExpired,
    RateLimited { reset_after: Option<Duration> },
    UpstreamUnavailable,
    TransportError,
    /// Any failure after the commit point. Terminal, never retried.
    StreamIncomplete,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AuthExpired => "auth_expired",
            FailureKind::RateLimited { .. } => "rate_limited",
            FailureKind::UpstreamUnavailable => "upstream_unavailable",
            FailureKind::TransportError => "transport_error",
            FailureKind::StreamIncomplete => "stream_incomplete",
        }
    }

    pub fn retryable(&self) -> bool {
        !matches!(self, FailureKind::StreamIncomplete)
    }
}

/// Outcome of classifying a connection-establishment failure. Client errors
/// from the upstream are not retry candidates; they belong to the caller.
#[derive(Debug)]
pub enum ConnectClass {
    Failure(FailureKind),
    /// 4xx other than 401/429: the request itself is bad, retrying on
    /// another account cannot fix it.
    Rejected { status: u16, message: String },
}

pub fn classify_connect_error(error: &ConnectError) -> ConnectClass {
    match error {
        ConnectError::Transport { .. } => ConnectClass::Failure(FailureKind::TransportError),
        ConnectError::Http {
            status,
            headers,
            body,
        } => match *status {
            401 => ConnectClass::Failure(FailureKind::AuthExpired),
            429 => ConnectClass::Failure(FailureKind::RateLimited {
                reset_after: reset_boundary(headers, body),
            }),
            status if status >= 500 => ConnectClass::Failure(FailureKind::UpstreamUnavailable),
            status => ConnectClass::Rejected {
                status,
                message: String::from_utf8_lossy(body).into_owned(),
            },
        },
    }
}

/// Explicit reset boundary from a 429, when the upstream provides one:
/// either a standard `retry-after` seconds header or a human-readable
/// "Try again in 1.2s" phrase in the body.
fn reset_boundary(headers: &HeaderMap, body: &[u8]) -> Option<Duration> {
    if let Some(seconds) = headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        && seconds >= 0.0
    {
        return Some(Duration::from_secs_f64(seconds));
    }
    let body = String::from_utf8_lossy(body);
    parse_retry_after(&body).map(Duration::from_secs_f64)
}

/// Extract a delay in seconds from phrases like "Try again in 1.2s" or
/// "Try again in 500ms". Returns None when no such phrase is present.
pub fn parse_retry_after(text: &str) -> Option<f64> {
    for word in text.split_whitespace() {
        let word = word.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
        if let Some(number) = word.strip_suffix("ms") {
            if let Ok(value) = number.parse::<f64>() {
                return Some(value / 1000.0);
            }
        } else if let Some(number) = word.strip_suffix('s')
            && let Ok(value) = number.parse::<f64>()
        {
            return Some(value);
        }
    }
    None
}

/// Derive the sticky-session key for a request: an explicit affinity header
/// wins, then the prompt cache key, then the caller-supplied user tag.
pub fn session_affinity(
    headers: &HeaderMap,
    prompt_cache_key: Option<&str>,
    user: Option<&str>,
) -> Option<String> {
    headers
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| prompt_cache_key.filter(|v| !v.is_empty()).map(str::to_string))
        .or_else(|| user.filter(|v| !v.is_empty()).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("Try again in 1.2s"), Some(1.2));
    }

    #[test]
    fn parse_retry_after_milliseconds() {
        assert_eq!(parse_retry_after("Try again in 500ms"), Some(0.5));
    }

    #[test]
    fn parse_retry_after_missing() {
        assert_eq!(parse_retry_after("no retry info"), None);
    }

    #[test]
    fn status_classification_is_specific() {
        let http = |status: u16| ConnectError::Http {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(matches!(
            classify_connect_error(&http(401)),
            ConnectClass::Failure(FailureKind::AuthExpired)
        ));
        assert!(matches!(
            classify_connect_error(&http(429)),
            ConnectClass::Failure(FailureKind::RateLimited { reset_after: None })
        ));
        assert!(matches!(
            classify_connect_error(&http(503)),
            ConnectClass::Failure(FailureKind::UpstreamUnavailable)
        ));
        assert!(matches!(
            classify_connect_error(&http(404)),
            ConnectClass::Rejected { status: 404, .. }
        ));
    }

    #[test]
    fn retry_after_header_becomes_boundary() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "2".parse().unwrap());
        let error = ConnectError::Http {
            status: 429,
            headers,
            body: Bytes::new(),
        };
        let ConnectClass::Failure(FailureKind::RateLimited { reset_after }) =
            classify_connect_error(&error)
        else {
            panic!("expected rate limit");
        };
        assert_eq!(reset_after, Some(Duration::from_secs(2)));
    }

    #[test]
    fn retry_phrase_in_body_becomes_boundary() {
        let error = ConnectError::Http {
            status: 429,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{\"message\":\"Try again in 250ms\"}"),
        };
        let ConnectClass::Failure(FailureKind::RateLimited { reset_after }) =
            classify_connect_error(&error)
        else {
            panic!("expected rate limit");
        };
        assert_eq!(reset_after, Some(Duration::from_millis(250)));
    }
}
