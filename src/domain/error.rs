//! Error types for the harvester.
//!
//! Server errors arrive as a tagged [`ServerError`]. The mapping from message
//! text lives in the RPC adapter; nothing above the infra layer looks at
//! message strings.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Account source error: {0}")]
    AccountSource(#[from] AccountSourceError),
}

/// Error object returned inside a JSON-RPC envelope
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServerError {
    #[error("mining session in progress")]
    MiningSessionInProgress,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{message}")]
    Unclassified { code: Option<i64>, message: String },
}

/// Failure of a single remote procedure call
#[derive(Debug, Error)]
pub enum RpcError {
    /// The peer reset the TCP connection; the only transport failure that is retried
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status_code}: {message}")]
    Http { status_code: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// A `result` was present but lacked the fields the caller needs
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("No bearer token held for this account")]
    MissingToken,
}

impl RpcError {
    /// The held token is missing or was rejected by the server
    #[must_use]
    pub fn needs_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::Server(ServerError::Unauthorized) | Self::MissingToken
        )
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Errors while loading accounts
#[derive(Debug, Error)]
pub enum AccountSourceError {
    #[error("I/O error reading {path}: {message}")]
    Io { path: String, message: String },

    #[error("Malformed accounts file: {0}")]
    Malformed(String),

    #[error("Invalid account record #{index}: {message}")]
    InvalidRecord { index: usize, message: String },

    #[error("No accounts found")]
    Empty,

    #[error("Prompt aborted: {0}")]
    Prompt(String),
}
