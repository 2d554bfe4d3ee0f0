//! # envelope module
//!
//! Every collector wraps its payload in the same `{data, version, error, errorString}`
//! object so LibreNMS can tell a healthy run from a failed one without knowing
//! anything about the collector itself.

use std::path::PathBuf;

use int_enum::IntEnum;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;
use strum_macros::EnumString;
use thiserror::Error;

use crate::config::ExtendConfigError;

/// Numeric error classes reported in the envelope and used as the process exit code
#[allow(non_camel_case_types)]
#[derive(
    Serialize_repr,
    Deserialize_repr,
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    EnumString,
    IntEnum,
    strum_macros::Display,
)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    ok = 0,
    config = 1,
    io = 2,
    command = 3,
    http = 4,
    parse = 5,
    unsupported = 6,
}

#[derive(Error, Debug)]
pub enum ExtendError {
    #[error("{0}")]
    Config(#[from] ExtendConfigError),
    #[error("Unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },
    #[error("HTTP request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("Unable to parse {what}: {reason}")]
    Parse { what: String, reason: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ExtendError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtendError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        ExtendError::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ExtendError::Config(_) => ErrorCode::config,
            ExtendError::Io { .. } | ExtendError::Task(_) => ErrorCode::io,
            ExtendError::Command { .. } => ErrorCode::command,
            ExtendError::Http { .. } => ErrorCode::http,
            ExtendError::Parse { .. } | ExtendError::Json(_) => ErrorCode::parse,
            ExtendError::Unsupported(_) => ErrorCode::unsupported,
        }
    }
}

/// The JSON object handed to LibreNMS
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct Envelope {
    pub data: serde_json::Value,
    pub version: u32,
    pub error: ErrorCode,
    #[serde(rename = "errorString")]
    pub error_string: String,
}

impl Envelope {
    pub fn success<T: serde::Serialize>(version: u32, data: &T) -> Result<Self, ExtendError> {
        Ok(Envelope {
            data: serde_json::to_value(data)?,
            version,
            error: ErrorCode::ok,
            error_string: String::new(),
        })
    }

    pub fn failure(version: u32, err: &ExtendError) -> Self {
        Envelope {
            data: serde_json::Value::Object(serde_json::Map::new()),
            version,
            error: err.code(),
            error_string: err.to_string(),
        }
    }

    /// Build the envelope for a finished collection, successful or not
    pub fn from_result<T: serde::Serialize>(version: u32, result: Result<T, ExtendError>) -> Self {
        match result.and_then(|data| Envelope::success(version, &data)) {
            Ok(envelope) => envelope,
            Err(err) => Envelope::failure(version, &err),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error != ErrorCode::ok
    }
}
