use std::time::Duration;

use crate::constants::CREDENTIAL_FAILURE_SIGNATURE;

/// Failures raised by the chat and video adapters.
#[derive(Debug, thiserror::Error)]
pub enum FitStreamError {
    #[error("no API key is configured (set GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("operation {name} failed: {message}")]
    Operation { name: String, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("No video URI returned")]
    NoVideoResult,
    #[error("Failed to download video content (status {0})")]
    Download(u16),
    #[error("video generation did not finish within {0:?}")]
    Timeout(Duration),
    #[error("media store error: {0}")]
    Media(#[from] std::io::Error),
}

impl FitStreamError {
    pub(crate) fn http(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Build an `Api` error from a non-success response body, preferring the
    /// `error.message` field Google APIs put in their JSON error envelope.
    pub(crate) fn from_api_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| body.trim().to_string());
        Self::Api { status, message }
    }

    /// True when the failure means the API key is missing or was rejected.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, Self::MissingApiKey) || self.to_string().contains(CREDENTIAL_FAILURE_SIGNATURE)
    }
}

pub type Result<T> = std::result::Result<T, FitStreamError>;
