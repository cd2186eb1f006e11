//! Error taxonomy for the Steel client.
//!
//! Every failure surfaced by this crate is a [`SteelError`] with a stable
//! [`ErrorKind`] tag, so callers can branch exhaustively without inspecting
//! message text. The retry controller is the only component that consults
//! [`ErrorKind::is_retryable`]; everything else propagates errors unchanged.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Stable tag for every error surfaced by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Authentication,
    PlanLimitation,
    RateLimit,
    TransientNetwork,
    Content,
    Api,
    Cancelled,
}

impl ErrorKind {
    /// Whether the retry controller may re-attempt a call failing with this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimit | ErrorKind::TransientNetwork)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::PlanLimitation => "plan_limitation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Content => "content",
            ErrorKind::Api => "api",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Features that the remote service gates behind paid plan tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFeature {
    Proxy,
    Captcha,
    Stealth,
    Unknown,
}

impl PlanFeature {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanFeature::Proxy => "proxy",
            PlanFeature::Captcha => "captcha solving",
            PlanFeature::Stealth => "stealth mode",
            PlanFeature::Unknown => "requested feature",
        }
    }

    fn setting(self) -> &'static str {
        match self {
            PlanFeature::Proxy => "use_proxy",
            PlanFeature::Captcha => "solve_captcha",
            PlanFeature::Stealth => "stealth_mode",
            PlanFeature::Unknown => "premium options",
        }
    }

    fn detect(message: &str) -> Option<Self> {
        let lower = message.to_ascii_lowercase();
        if lower.contains("proxy") || lower.contains("proxies") {
            Some(PlanFeature::Proxy)
        } else if lower.contains("captcha") {
            Some(PlanFeature::Captcha)
        } else if lower.contains("stealth") {
            Some(PlanFeature::Stealth)
        } else {
            None
        }
    }
}

impl fmt::Display for PlanFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context shared by every error originating from a remote response.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFailure {
    pub status: Option<u16>,
    pub message: String,
    pub detail: Option<JsonValue>,
    pub url: Option<String>,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            detail: None,
            url: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        if let Some(url) = &self.url {
            write!(f, " [{url}]")?;
        }
        Ok(())
    }
}

/// Errors surfaced by the Steel client.
#[derive(Debug, Clone, Error)]
pub enum SteelError {
    #[error("invalid configuration for {field}: {message}")]
    Configuration { field: &'static str, message: String },
    #[error("invalid request {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("authentication failed: {0}; check that STEEL_API_KEY is set to a valid key")]
    Authentication(RemoteFailure),
    #[error(
        "{feature} is not available on the current Steel plan: {failure}; disable {} or upgrade the plan",
        .feature.setting()
    )]
    PlanLimitation {
        feature: PlanFeature,
        failure: RemoteFailure,
    },
    #[error("rate limited by Steel API: {failure}")]
    RateLimit {
        failure: RemoteFailure,
        retry_after: Option<Duration>,
    },
    #[error("transient network error: {0}")]
    TransientNetwork(RemoteFailure),
    #[error("unusable {format} content for {url}: {message}")]
    Content {
        url: String,
        format: String,
        message: String,
    },
    #[error("Steel API error: {0}")]
    Api(RemoteFailure),
    #[error("operation cancelled")]
    Cancelled,
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<SteelError>,
    },
}

impl SteelError {
    pub(crate) fn config(field: &'static str, message: impl Into<String>) -> Self {
        SteelError::Configuration {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        SteelError::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn transient(message: impl Into<String>) -> Self {
        SteelError::TransientNetwork(RemoteFailure::new(message))
    }

    /// Stable kind tag. Exhaustion reports the kind of the last observed error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SteelError::Configuration { .. } => ErrorKind::Configuration,
            SteelError::Validation { .. } => ErrorKind::Validation,
            SteelError::Authentication(_) => ErrorKind::Authentication,
            SteelError::PlanLimitation { .. } => ErrorKind::PlanLimitation,
            SteelError::RateLimit { .. } => ErrorKind::RateLimit,
            SteelError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            SteelError::Content { .. } => ErrorKind::Content,
            SteelError::Api(_) => ErrorKind::Api,
            SteelError::Cancelled => ErrorKind::Cancelled,
            SteelError::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, SteelError::RetriesExhausted { .. }) && self.kind().is_retryable()
    }

    /// Number of attempts made, when the error came out of an exhausted retry loop.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            SteelError::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn remote(&self) -> Option<&RemoteFailure> {
        match self {
            SteelError::Authentication(failure)
            | SteelError::TransientNetwork(failure)
            | SteelError::Api(failure)
            | SteelError::PlanLimitation { failure, .. }
            | SteelError::RateLimit { failure, .. } => Some(failure),
            SteelError::RetriesExhausted { last, .. } => last.remote(),
            _ => None,
        }
    }

    /// Remote-provided detail payload, if any.
    pub fn detail(&self) -> Option<&JsonValue> {
        self.remote().and_then(|failure| failure.detail.as_ref())
    }

    /// URL of the request that produced the error, if known.
    pub fn url(&self) -> Option<&str> {
        match self {
            SteelError::Content { url, .. } => Some(url.as_str()),
            SteelError::RetriesExhausted { last, .. } => last.url(),
            other => other.remote().and_then(|failure| failure.url.as_deref()),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SteelError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Attach the originating URL to remote failures that lack one.
    pub fn with_url(mut self, target: &str) -> Self {
        match &mut self {
            SteelError::Authentication(failure)
            | SteelError::TransientNetwork(failure)
            | SteelError::Api(failure)
            | SteelError::PlanLimitation { failure, .. }
            | SteelError::RateLimit { failure, .. } => {
                if failure.url.is_none() {
                    failure.url = Some(target.to_string());
                }
            }
            SteelError::RetriesExhausted { last, .. } => {
                let inner = std::mem::replace(last.as_mut(), SteelError::Cancelled);
                **last = inner.with_url(target);
            }
            _ => {}
        }
        self
    }
}

impl From<reqwest::Error> for SteelError {
    fn from(err: reqwest::Error) -> Self {
        let mut failure = if err.is_timeout() {
            RemoteFailure::new(format!("request timed out: {err}"))
        } else if err.is_connect() {
            RemoteFailure::new(format!("connection failed: {err}"))
        } else {
            RemoteFailure::new(format!("request failed: {err}"))
        };
        failure.status = err.status().map(|status| status.as_u16());
        failure.url = err.url().map(|url| url.to_string());
        if err.is_builder() {
            SteelError::Api(failure)
        } else {
            SteelError::TransientNetwork(failure)
        }
    }
}

const PLAN_MARKERS: [&str; 6] = [
    "plan",
    "upgrade",
    "not available",
    "not included",
    "subscription",
    "tier",
];

/// Map a non-success response onto the error taxonomy.
///
/// `requested` lists the plan-gated features the failing call asked for; it is
/// used to name the feature when the remote message does not.
pub fn classify_response(
    status: u16,
    headers: &HeaderMap,
    body: &[u8],
    requested: &[PlanFeature],
) -> SteelError {
    let detail: Option<JsonValue> = serde_json::from_slice(body).ok();
    let message = detail
        .as_ref()
        .and_then(extract_message)
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                format!("API error {status}")
            } else {
                text
            }
        });

    let failure = RemoteFailure {
        status: Some(status),
        message,
        detail,
        url: None,
    };

    let lower = failure.message.to_ascii_lowercase();
    let mentions_plan = PLAN_MARKERS.iter().any(|marker| lower.contains(marker));

    match status {
        402 => plan_limitation(failure, requested),
        400 | 403 if mentions_plan => plan_limitation(failure, requested),
        401 | 403 => SteelError::Authentication(failure),
        408 => SteelError::TransientNetwork(failure),
        429 => SteelError::RateLimit {
            retry_after: retry_after(headers),
            failure,
        },
        500..=599 => SteelError::TransientNetwork(failure),
        _ => SteelError::Api(failure),
    }
}

fn plan_limitation(failure: RemoteFailure, requested: &[PlanFeature]) -> SteelError {
    let feature = PlanFeature::detect(&failure.message)
        .or_else(|| requested.first().copied())
        .unwrap_or(PlanFeature::Unknown);
    SteelError::PlanLimitation { feature, failure }
}

fn extract_message(detail: &JsonValue) -> Option<String> {
    ["message", "error", "detail"].iter().find_map(|key| {
        match detail.get(key)? {
            JsonValue::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            JsonValue::Object(inner) => inner
                .get("message")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            _ => None,
        }
    })
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
