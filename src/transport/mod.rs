//! HTTP transport shared by all adapters.

pub mod http;

pub use http::{bearer, extract_error_message, Headers, HttpTransport};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
