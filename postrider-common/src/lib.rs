pub mod collab;
pub mod config;
pub mod logging;

pub use tracing;

pub use config::{Credential, CredentialKey, Timeouts};
pub use config::tls::{CertificatePolicy, Encryption};
