//! Shared configuration types for the submission credential pool.

pub mod tls;

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::config::tls::Encryption;

/// One outbound submission account: a relay endpoint plus the login and
/// sender identity used through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Relay hostname to submit through.
    pub host: String,

    /// Submission port.
    ///
    /// Default: 587
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login name for SMTP AUTH. An empty string skips authentication,
    /// for relays that trust the source address instead.
    #[serde(default)]
    pub username: String,

    /// Password or app token for SMTP AUTH.
    #[serde(default)]
    pub password: String,

    /// Envelope and header sender address.
    pub from_address: String,

    /// Display name placed in the From header.
    #[serde(default)]
    pub from_name: Option<String>,

    /// How this endpoint expects the connection to be encrypted.
    ///
    /// Default: `start_tls`
    #[serde(default)]
    pub encryption: Encryption,

    /// Path to a PEM private key for DKIM signing. When unset, a key is
    /// looked up under the engine's key directory by sender domain.
    #[serde(default)]
    pub dkim_key: Option<std::path::PathBuf>,

    /// DKIM selector (the `s=` tag).
    ///
    /// Default: "default"
    #[serde(default)]
    pub dkim_selector: Option<String>,

    /// DKIM signing domain (the `d=` tag). Defaults to the domain of
    /// `from_address`.
    #[serde(default)]
    pub dkim_domain: Option<String>,
}

const fn default_port() -> u16 {
    587
}

impl Credential {
    /// Stable identity of this account across endpoint changes.
    #[must_use]
    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(&self.host, &self.username)
    }

    /// Domain part of the sender address, if it has one.
    #[must_use]
    pub fn from_domain(&self) -> Option<&str> {
        self.from_address.rsplit_once('@').map(|(_, domain)| domain)
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Identity of a credential: `host:username`.
///
/// Ports and encryption modes are not part of the key: endpoint
/// negotiation moves an account between ports without changing which
/// account it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CredentialKey(Arc<str>);

impl CredentialKey {
    #[must_use]
    pub fn new(host: &str, username: &str) -> Self {
        Self(Arc::from(format!("{host}:{username}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timeout configuration for SMTP transport operations.
///
/// Keeps a hung relay from stalling the whole sending run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Timeout for TCP connection establishment and the TLS handshake.
    ///
    /// Default: 10 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Timeout for each command/reply exchange (EHLO, AUTH, MAIL, ...).
    ///
    /// Default: 10 seconds
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Timeout for transmitting the message body after DATA.
    ///
    /// This is longer than other timeouts to accommodate large messages.
    /// Default: 120 seconds
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Timeout for the closing QUIT exchange.
    ///
    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            command_secs: default_command_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    10
}

const fn default_command_timeout() -> u64 {
    10
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

impl Timeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}
