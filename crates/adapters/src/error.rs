use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: Box<AdapterError>,
    },
    #[error("model service reported an error: {0}")]
    Service(String),
    #[error("API returned an empty response")]
    EmptyResponse,
}

impl AdapterError {
    pub fn retry_exhausted(attempts: usize, source: AdapterError) -> Self {
        AdapterError::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }
}
