//! Failure classification for send attempts.
//!
//! Every failed attempt is reduced to a [`FailureClass`] that drives the
//! engine's recovery: rotate, fall back to another endpoint, relax
//! certificate checks, cool a credential down, or drop it from the pool.

/// What a failed attempt says about the credential and its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The relay rejected the username or password. The credential is
    /// useless and gets removed from the pool.
    AuthRejected,
    /// The sending address or IP is on a blocklist.
    Blacklisted,
    /// The relay does not implement STARTTLS on this port.
    StarttlsUnsupported,
    /// The TLS handshake failed certificate validation.
    CertificateFailure,
    /// The relay could not be reached at all.
    ConnectionFailure,
    /// A policy rejection (quota, rate, suspension) worth rotating away
    /// from for a while.
    RotateWorthy,
    /// Nothing recognizable; the engine just moves on.
    Unknown,
}

impl FailureClass {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AuthRejected => "auth-rejected",
            Self::Blacklisted => "blacklisted",
            Self::StarttlsUnsupported => "starttls-unsupported",
            Self::CertificateFailure => "certificate-failure",
            Self::ConnectionFailure => "connection-failure",
            Self::RotateWorthy => "rotate-worthy",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Maps the text of a failure to a [`FailureClass`].
///
/// Implementations must be cheap; the engine classifies on every failed
/// attempt inside the send loop.
pub trait Classifier: Send + Sync {
    fn classify(&self, detail: &str) -> FailureClass;
}

/// The default classifier: matches provider reply text against known
/// substrings, most specific class first.
///
/// Authentication markers win over everything else so that a reply like
/// `535 5.7.8 authentication failed: connection not permitted` removes the
/// credential instead of merely cooling it down.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringClassifier;

const AUTH_MARKERS: &[&str] = &[
    "invalid login",
    "bad credentials",
    "authentication failed",
    "could not authenticate",
    "authentication unsuccessful",
    "535",
    "5.7.8",
    "5.7.3",
];

const BLACKLIST_MARKERS: &[&str] = &[
    "rbl",
    "blacklist",
    "listed",
    "spamhaus",
    "spamcop",
    "barracuda",
];

const STARTTLS_MARKERS: &[&str] = &[
    "starttls",
    "command not implemented",
    "does not support",
];

const CERTIFICATE_MARKERS: &[&str] = &[
    "certificate",
    "unknown issuer",
    "handshake",
    "verify",
];

const CONNECTION_MARKERS: &[&str] = &[
    "refused",
    "timed out",
    "timeout",
    "unreachable",
    "connection closed",
    "broken pipe",
    "reset",
    "connect",
];

const ROTATE_MARKERS: &[&str] = &[
    "quota",
    "limit",
    "rate",
    "too many",
    "suspended",
    "blocked",
    "denied",
    "try again later",
    "ssl",
];

impl Classifier for SubstringClassifier {
    fn classify(&self, detail: &str) -> FailureClass {
        let lowered = detail.to_lowercase();

        if contains_any(&lowered, AUTH_MARKERS) {
            FailureClass::AuthRejected
        } else if contains_any(&lowered, BLACKLIST_MARKERS) {
            FailureClass::Blacklisted
        } else if contains_any(&lowered, STARTTLS_MARKERS) {
            FailureClass::StarttlsUnsupported
        } else if contains_any(&lowered, CERTIFICATE_MARKERS) {
            FailureClass::CertificateFailure
        } else if contains_any(&lowered, CONNECTION_MARKERS) {
            FailureClass::ConnectionFailure
        } else if contains_any(&lowered, ROTATE_MARKERS) {
            FailureClass::RotateWorthy
        } else {
            FailureClass::Unknown
        }
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| text.contains(marker))
}
