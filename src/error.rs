// src/error.rs
use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Response code KuCoin puts in every successful envelope.
pub const KUCOIN_OK_CODE: &str = "200000";
/// Envelope code for "too many requests".
pub const KUCOIN_RATE_LIMIT_CODE: &str = "429000";

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Missing or invalid local configuration. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Timeouts, resets, refused connections.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Websocket closed, dropped or silent for too long.
    #[error("stream disconnected: {0}")]
    StreamDisconnect(String),

    /// Payload did not match the expected schema.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Exchange answered with a non-success envelope code.
    #[error("exchange rejected request ({code}): {msg}")]
    Api { code: String, msg: String },

    /// Fatal to the current strategy run.
    #[error("{0}")]
    Domain(String),

    #[error("indicator error: {0}")]
    Indicator(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ExchangeError {
    /// Failures the HTTP retry policy is allowed to repeat.
    pub fn is_transient_http(&self) -> bool {
        match self {
            ExchangeError::TransientNetwork(_) => true,
            ExchangeError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ExchangeError::Api { code, .. } => code == KUCOIN_RATE_LIMIT_CODE,
            _ => false,
        }
    }

    /// Failures that justify a full websocket resubscribe.
    pub fn is_stream_retryable(&self) -> bool {
        matches!(self, ExchangeError::StreamDisconnect(_)) || self.is_transient_http()
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExchangeError::Protocol(e.to_string())
        } else if e.is_builder() {
            ExchangeError::Configuration(e.to_string())
        } else if let Some(status) = e.status() {
            ExchangeError::HttpStatus {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            ExchangeError::TransientNetwork(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        ExchangeError::Protocol(e.to_string())
    }
}

impl From<tungstenite::Error> for ExchangeError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Url(inner) => ExchangeError::Configuration(inner.to_string()),
            other => ExchangeError::StreamDisconnect(other.to_string()),
        }
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(e: url::ParseError) -> Self {
        ExchangeError::Protocol(format!("invalid url: {}", e))
    }
}
