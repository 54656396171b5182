//! Error taxonomy and HTTP error classification.
//!
//! Every failure surfaced by the transport is an [`Error`]: one struct with a
//! shared payload (message, status, provider code, free-form context, cause)
//! and an [`ErrorKind`] discriminant. [`classify`] turns an HTTP status plus a
//! raw error body into the right kind, tolerating whatever shape the body has.

use reqwest::StatusCode;
use serde_json::{Map, Value};

/// Provider error code for a missing character on a 404.
pub const CHARACTER_NOT_FOUND: &str = "CHARACTER_NOT_FOUND";
/// Provider error code for a missing model on a 404.
pub const MODEL_NOT_FOUND: &str = "MODEL_NOT_FOUND";

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Discriminant of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Network failure or timeout; no HTTP status was received.
    Connection,
    /// Any HTTP error without a more specific kind.
    Api,
    /// HTTP 429.
    RateLimit {
        /// Seconds the server asked us to wait, if it said.
        retry_after: Option<u64>,
    },
    /// HTTP 401.
    Unauthorized,
    /// Malformed or unprocessable request (400, 422, generic 404).
    InvalidRequest,
    /// 404 carrying the `CHARACTER_NOT_FOUND` code.
    CharacterNotFound,
    /// 404 carrying the `MODEL_NOT_FOUND` code.
    ModelNotFound,
    /// Invalid configuration or HTTP client construction failure.
    Config,
    /// A successful response body did not decode as the requested type.
    Decode,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection_error",
            ErrorKind::Api => "api_error",
            ErrorKind::RateLimit { .. } => "rate_limit_error",
            ErrorKind::Unauthorized => "unauthorized_error",
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::CharacterNotFound => "character_not_found_error",
            ErrorKind::ModelNotFound => "model_not_found_error",
            ErrorKind::Config => "config_error",
            ErrorKind::Decode => "decode_error",
        }
    }

    /// True for the resource-specific 404 kinds and the generic invalid request.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidRequest | ErrorKind::CharacterNotFound | ErrorKind::ModelNotFound
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Connection => "Connection failed",
            ErrorKind::Api => "API error",
            ErrorKind::RateLimit { .. } => "Rate limit exceeded",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::InvalidRequest => "Invalid request",
            ErrorKind::CharacterNotFound => "Character not found",
            ErrorKind::ModelNotFound => "Model not found",
            ErrorKind::Config => "Configuration error",
            ErrorKind::Decode => "Decode error",
        };
        f.write_str(label)
    }
}

/// Error type for all client operations.
///
/// Carries enough context for a caller to decide what to do next: the HTTP
/// status, the provider's error code, the request id and `retry_after` when
/// the server supplied them.
#[derive(Debug, thiserror::Error)]
#[error("{kind}{}: {message}", fmt_status(.status))]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    code: Option<String>,
    context: Map<String, Value>,
    #[source]
    source: Option<BoxError>,
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            context: Map::new(),
            source: None,
        }
    }

    pub fn connection(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::new(ErrorKind::Connection, message).with_source(source)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn decode(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::new(ErrorKind::Decode, message).with_source(source)
    }

    /// Build the typed error for an HTTP failure from an already-parsed body.
    ///
    /// `retry_after` is the value of the `Retry-After` header; when absent the
    /// body's `error.retry_after` is used instead.
    pub fn from_body(status: u16, body: ErrorBody, retry_after: Option<u64>) -> Self {
        let retry_after = retry_after.or(body.retry_after);
        let kind = match status {
            401 => ErrorKind::Unauthorized,
            429 => ErrorKind::RateLimit { retry_after },
            404 => match body.code.as_deref() {
                Some(code) if code.eq_ignore_ascii_case(CHARACTER_NOT_FOUND) => {
                    ErrorKind::CharacterNotFound
                }
                Some(code) if code.eq_ignore_ascii_case(MODEL_NOT_FOUND) => {
                    ErrorKind::ModelNotFound
                }
                _ => ErrorKind::InvalidRequest,
            },
            400 | 422 => ErrorKind::InvalidRequest,
            _ => ErrorKind::Api,
        };

        let mut context = body.context;
        if let Some(secs) = retry_after {
            context.insert("retry_after".into(), Value::from(secs));
        }

        Self {
            kind,
            message: body.message,
            status: Some(status),
            code: body.code,
            context,
            source: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status
    }

    pub fn error_code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self.kind {
            ErrorKind::RateLimit { retry_after } => retry_after,
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context.get("request_id").and_then(Value::as_str)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind, ErrorKind::RateLimit { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::CharacterNotFound | ErrorKind::ModelNotFound
        ) || (self.kind == ErrorKind::InvalidRequest && self.status == Some(404))
    }

    /// Whether a later identical call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Connection | ErrorKind::RateLimit { .. } => true,
            ErrorKind::Api => matches!(self.status, Some(500..=599)),
            _ => false,
        }
    }
}

/// Normalized view of an HTTP error body, whatever shape it arrived in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorBody {
    pub message: String,
    pub code: Option<String>,
    pub retry_after: Option<u64>,
    pub context: Map<String, Value>,
}

impl ErrorBody {
    /// Parse a raw error body.
    ///
    /// Accepts `{"error": {"code", "message", "retry_after"}}`,
    /// `{"error": "text"}`, `{"message": "text"}` and non-JSON text. Top-level
    /// `details` and `request_id` are copied into the context. Never fails.
    pub fn parse(status: u16, text: &str) -> Self {
        let root = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(root)) => root,
            _ => {
                let trimmed = text.trim();
                let message = if trimmed.is_empty() {
                    status_reason(status)
                } else {
                    trimmed.to_string()
                };
                return Self {
                    message,
                    ..Default::default()
                };
            }
        };

        let mut context = Map::new();
        let mut code = None;
        let mut retry_after = None;

        let message = match root.get("error") {
            Some(Value::Object(detail)) => {
                code = detail.get("code").and_then(code_from_value);
                retry_after = detail.get("retry_after").and_then(seconds_from_value);
                context.insert("error".into(), Value::Object(detail.clone()));
                detail
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            }
            Some(Value::String(message)) => Some(message.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
        .or_else(|| {
            root.get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| status_reason(status));

        if code.is_none() {
            code = root.get("code").and_then(code_from_value);
        }
        for key in ["details", "request_id"] {
            if let Some(value) = root.get(key) {
                context.insert(key.into(), value.clone());
            }
        }

        Self {
            message,
            code,
            retry_after,
            context,
        }
    }
}

/// Classify an HTTP failure into a typed [`Error`].
///
/// Pure: identical inputs always produce the same kind and message.
pub fn classify(status: u16, body: &str, retry_after: Option<u64>) -> Error {
    Error::from_body(status, ErrorBody::parse(status, body), retry_after)
}

fn status_reason(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

fn code_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn seconds_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.ceil() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
