//! Error taxonomy for the admin query bridge.
//!
//! Every stage of the pipeline fails fast with exactly one [`BridgeError`].
//! The variant decides the machine-readable code and the HTTP status the
//! server answers with:
//!
//! | Variant | Code | Status |
//! |---------|------|--------|
//! | [`Input`](BridgeError::Input) | `input_error` | 400 |
//! | [`Config`](BridgeError::Config) | `config_error` | 500 |
//! | [`Upstream`](BridgeError::Upstream) | `upstream_error` | 502 |
//! | [`Parse`](BridgeError::Parse) | `parse_error` | 400 |
//! | [`Validation`](BridgeError::Validation) | `validation_error` | 400 |
//! | [`Execution`](BridgeError::Execution) | `execution_error` | 400 |

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Missing or empty caller input. User-correctable.
    #[error("{0}")]
    Input(String),

    /// Missing credential or unusable configuration.
    #[error("{0}")]
    Config(String),

    /// The language model call failed, exhausted its retries, or returned
    /// nothing usable.
    #[error("{0}")]
    Upstream(String),

    /// Candidate text does not match the query grammar, or a sub-expression
    /// failed to decode.
    #[error("{0}")]
    Parse(String),

    /// Decoded query violates the projection or pipeline safety rules.
    #[error("{0}")]
    Validation(String),

    /// The validated query failed against the record store.
    #[error("{0}")]
    Execution(String),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Input(_) => "input_error",
            BridgeError::Config(_) => "config_error",
            BridgeError::Upstream(_) => "upstream_error",
            BridgeError::Parse(_) => "parse_error",
            BridgeError::Validation(_) => "validation_error",
            BridgeError::Execution(_) => "execution_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::Input(_)
            | BridgeError::Parse(_)
            | BridgeError::Validation(_)
            | BridgeError::Execution(_) => StatusCode::BAD_REQUEST,
            BridgeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// A pipeline failure together with the candidate query text, when the
/// model had already produced one.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct Rejection {
    pub error: BridgeError,
    pub candidate: Option<String>,
}

impl Rejection {
    pub fn new(error: BridgeError, candidate: Option<String>) -> Self {
        Self { error, candidate }
    }
}

impl From<BridgeError> for Rejection {
    fn from(error: BridgeError) -> Self {
        Self {
            error,
            candidate: None,
        }
    }
}
