use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the SQLite store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage connection poisoned")]
    Poisoned,

    #[error("could not create database directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid stored value in {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Failures loading the service catalog file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures delivering a single notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint responded with {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Failures that abort a poll cycle or the polling loop.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("failed to load services: {0}")]
    Load(#[from] StorageError),

    #[error("poller command channel closed")]
    ChannelClosed,
}
