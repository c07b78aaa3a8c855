//! Error types for the delivery engine's own plumbing.
//!
//! Send failures never surface as errors. A failed send is handled inside
//! the engine's send loop through classification, rotation, and cooldowns;
//! callers only see the final boolean.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("preference file is not valid TOML: {0}")]
    PreferenceFormat(#[from] toml::de::Error),

    #[error("could not encode preferences: {0}")]
    PreferenceEncode(#[from] toml::ser::Error),

    #[error("DKIM key rejected: {0}")]
    Signature(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
