//! Transport encryption settings for submission endpoints.

use serde::{Deserialize, Serialize};

/// How a submission endpoint expects the connection to be encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    /// Plaintext for the whole session. Common on ports 25 and 2525,
    /// and on relays sitting behind a TLS-terminating proxy.
    None,

    /// Connect in plaintext, then upgrade via the STARTTLS verb (RFC 3207).
    ///
    /// This is the default and what most providers expect on port 587.
    #[default]
    StartTls,

    /// TLS from the first byte, before any SMTP traffic. The usual
    /// arrangement on port 465.
    Implicit,
}

impl Encryption {
    /// Returns `true` if the session carries TLS at some point.
    #[must_use]
    pub const fn uses_tls(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns `true` if the socket must speak TLS before SMTP does.
    #[must_use]
    pub const fn is_implicit(&self) -> bool {
        matches!(self, Self::Implicit)
    }

    /// Short lowercase label for log lines.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::StartTls => "starttls",
            Self::Implicit => "implicit",
        }
    }
}

impl std::fmt::Display for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Certificate validation policy for TLS sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CertificatePolicy {
    /// Whether to accept invalid TLS certificates (self-signed, expired, etc.).
    ///
    /// **SECURITY WARNING**: Setting this to `true` disables certificate
    /// validation and makes the connection vulnerable to man-in-the-middle
    /// attacks. Only set it for relays you operate yourself.
    ///
    /// Default: `false` (validate certificates)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl CertificatePolicy {
    /// Policy that validates certificates against the system trust store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            accept_invalid_certs: false,
        }
    }

    /// Policy that accepts any certificate.
    #[must_use]
    pub const fn insecure() -> Self {
        Self {
            accept_invalid_certs: true,
        }
    }
}
