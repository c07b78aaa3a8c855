//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Errors that can occur while driving an SMTP session.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server sent bytes that do not parse as an SMTP reply.
    #[error("failed to parse server reply: {0}")]
    Parse(String),

    /// The server answered a command with a non-positive status code.
    #[error("{command} rejected: {code} {message}")]
    Rejected {
        command: &'static str,
        code: u16,
        message: String,
    },

    /// The server refused our AUTH exchange.
    #[error("authentication failed: {code} {message}")]
    AuthFailed { code: u16, message: String },

    /// TLS setup or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server closed the connection mid-session.
    #[error("connection closed unexpectedly")]
    Closed,

    /// A command exchange exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The server sent bytes that are not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A message could not be assembled from the builder state.
    #[error("invalid message: {0}")]
    Build(String),
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
