// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use cpx_core::CpxError;
use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by the `cpx` binary.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CpxError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{origin} line {line}: {message}")]
    Csv {
        origin: String,
        line: usize,
        message: String,
    },

    #[error("{0}")]
    InvalidArgs(String),
}

impl CliError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub fn csv(origin: &str, line: usize, message: impl Into<String>) -> Self {
        Self::Csv {
            origin: origin.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(err) => err.code(),
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Csv { .. } => "csv_error",
            Self::InvalidArgs(_) => "invalid_input",
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorPayload {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        }
    }
}

/// `{ "error": { "code", "message" } }`, written to stderr on failure.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
