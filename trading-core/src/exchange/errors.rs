// exchange/errors.rs

use thiserror::Error;
use trading_common::DataError;

/// Error types for exchange operations
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Data parsing error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Reconnect attempts exhausted; the stream will not come back on its own
    #[error("Connection fatal after {attempts} failed attempts")]
    ConnectionFatal { attempts: u32 },

    /// The stream was torn down deliberately while a caller was waiting on it
    #[error("Connection closed by disconnect()")]
    Disconnected,

    /// A stream frame failed validation and was discarded
    #[error("Frame dropped: {0}")]
    ValidationDropped(#[from] ValidationError),

    #[error("Signing failed: {0}")]
    SigningFailure(#[from] SigningError),

    #[error("Asset directory not initialized")]
    DirectoryNotInitialized,

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Asset directory validation failed: {0}")]
    DirectoryValidationFailed(String),

    #[error("Request to {endpoint} timed out after {attempts} attempts")]
    RequestTimeout { endpoint: String, attempts: u32 },

    #[error("Exchange rejected {action}: {body}")]
    ApiRejected { action: String, body: String },

    #[error("HTTP {status} from {endpoint}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Malformed response from {endpoint}: {reason} (body: {body})")]
    MalformedResponse {
        endpoint: String,
        reason: String,
        body: String,
    },
}

/// Failures while encoding or signing an L1 action
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("action encoding failed: {0}")]
    Encoding(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("typed data error: {0}")]
    TypedData(String),

    #[error("signature generation failed: {0}")]
    Signature(String),
}

/// Why an inbound stream frame was dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("frame is not valid JSON: {0}")]
    NotJson(String),

    #[error("frame missing '{0}'")]
    MissingField(&'static str),

    #[error("malformed {channel} payload: {reason}")]
    Payload { channel: String, reason: String },

    #[error(transparent)]
    Data(#[from] DataError),
}

// Convert from common error types
impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<DataError> for ExchangeError {
    fn from(err: DataError) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<config::ConfigError> for ExchangeError {
    fn from(err: config::ConfigError) -> Self {
        ExchangeError::ConfigError(err.to_string())
    }
}
