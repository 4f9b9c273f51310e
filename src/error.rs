//! Our error types for the relay link, the game server client and board configuration.

use thiserror::Error;

use crate::http::TransportError;

pub type LinkResult<T, I> = core::result::Result<T, LinkError<I>>;

/// Errors raised while talking to the relay station over the serial link.
///
/// Sync loss and CRC mismatches never show up here, the frame decoder counts those and resynchronises.
#[derive(Error, Debug)]
pub enum LinkError<I: embedded_io::Error> {
    #[error("Serial communication error")]
    Serial(I),
    #[error("Frame payload is empty")]
    EmptyPayload,
    #[error("Frame payload of {0} bytes exceeds the link maximum")]
    PayloadTooLarge(usize),
    #[error("Relay report of {0} bytes is not a whole number of pairs")]
    MalformedReport(usize),
}

/// Errors raised by the game server client.
///
/// None of these are fatal. The caller skips the current cycle and tries again on the next tick.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Server answered with HTTP status {0}")]
    HttpStatus(u16),
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Board not registered")]
    NotRegistered,
    #[error("Login rejected by server")]
    LoginRejected,
    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),
    #[error("Response too short: expected {expected} bytes, got {actual}")]
    ResponseTooShort { expected: usize, actual: usize },
    #[error("Protocol version mismatch: got {0:#04x}")]
    VersionMismatch(u8),
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// True for failures caused by the server refusing our credentials or session.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ClientError::NotLoggedIn
                | ClientError::NotRegistered
                | ClientError::LoginRejected
                | ClientError::RegistrationRejected(_)
                | ClientError::HttpStatus(401)
        )
    }
}

/// Errors raised while loading a board profile.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read board profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse board profile: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid board profile: {0}")]
    Invalid(String),
}
