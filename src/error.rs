use std::path::PathBuf;

use thiserror::Error;

/// Startup problems. All of them are fatal before any message is pulled.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("config file is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid pod name regex '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("topic '{0}' doesn't exist")]
    TopicNotFound(String),
}

/// Failures talking to the messaging backend.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid message payload: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error("unable to obtain access token: {0}")]
    Auth(String),

    #[error("message handler failed: {0}")]
    Handler(#[from] DeliveryError),

    #[error("delivery task panicked: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures inside one per-message cycle.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("failed to write log line: {0}")]
    Render(#[from] std::io::Error),
}
