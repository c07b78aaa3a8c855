//! Pooled SMTP sessions.
//!
//! Opening a submission session costs a TCP handshake, usually a TLS
//! handshake, an EHLO and an AUTH round trip, so sessions are kept alive
//! across sends and across credential rotation. A pooled session is reused
//! only when the endpoint (port, encryption, certificate policy) still
//! matches and the relay still answers an RSET; anything else replaces it.

use ahash::AHashMap;
use postrider_common::{Credential, CredentialKey, Encryption, Timeouts};
use postrider_smtp::{ClientError, SmtpClient};

/// The endpoint a session was opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EffectiveEndpoint {
    pub(crate) port: u16,
    pub(crate) encryption: Encryption,
    pub(crate) relax_certificates: bool,
}

impl std::fmt::Display for EffectiveEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.port, self.encryption)?;
        if self.relax_certificates {
            f.write_str(" (certificate checks off)")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Session {
    client: SmtpClient,
    endpoint: EffectiveEndpoint,
}

/// One live session per credential, keyed like the pool.
#[derive(Debug)]
pub(crate) struct SessionPool {
    sessions: AHashMap<CredentialKey, Session>,
    timeouts: Timeouts,
    helo: String,
}

impl SessionPool {
    pub(crate) fn new(timeouts: Timeouts, helo: impl Into<String>) -> Self {
        Self {
            sessions: AHashMap::new(),
            timeouts,
            helo: helo.into(),
        }
    }

    /// Returns a ready-to-use session for `credential` at `endpoint`,
    /// reusing the pooled one when it still fits.
    ///
    /// # Errors
    ///
    /// Returns an error when a fresh session cannot be opened, greeted,
    /// upgraded, or authenticated.
    pub(crate) async fn acquire(
        &mut self,
        credential: &Credential,
        endpoint: EffectiveEndpoint,
    ) -> Result<&mut SmtpClient, ClientError> {
        let key = credential.key();

        let reusable = match self.sessions.get_mut(&key) {
            Some(session) if session.endpoint == endpoint => {
                // A dead connection shows up here instead of mid-send
                session
                    .client
                    .rset()
                    .await
                    .is_ok_and(|reply| reply.is_positive())
            }
            _ => false,
        };

        if !reusable {
            if let Some(mut stale) = self.sessions.remove(&key) {
                let _ = stale.client.quit().await;
            }

            let client = self.open(credential, endpoint).await?;
            self.sessions.insert(key.clone(), Session { client, endpoint });
        }

        self.sessions
            .get_mut(&key)
            .map(|session| &mut session.client)
            .ok_or(ClientError::Closed)
    }

    /// Drops the pooled session without a QUIT. Used after transport
    /// errors, where the connection is not worth a goodbye.
    pub(crate) fn discard(&mut self, key: &CredentialKey) {
        self.sessions.remove(key);
    }

    /// Opens, greets and closes a session without pooling it.
    ///
    /// # Errors
    ///
    /// Returns an error when any step up to and including AUTH fails.
    pub(crate) async fn probe(
        &self,
        credential: &Credential,
        endpoint: EffectiveEndpoint,
    ) -> Result<(), ClientError> {
        let mut client = self.open(credential, endpoint).await?;
        let _ = client.quit().await;
        Ok(())
    }

    async fn open(
        &self,
        credential: &Credential,
        endpoint: EffectiveEndpoint,
    ) -> Result<SmtpClient, ClientError> {
        let mut client = match endpoint.encryption {
            Encryption::Implicit => {
                SmtpClient::connect_tls(
                    &credential.host,
                    endpoint.port,
                    self.timeouts,
                    endpoint.relax_certificates,
                )
                .await?
            }
            Encryption::StartTls | Encryption::None => {
                SmtpClient::connect(
                    &credential.host,
                    endpoint.port,
                    self.timeouts,
                    endpoint.relax_certificates,
                )
                .await?
            }
        };

        client.read_greeting().await?;
        let mut ehlo = client.ehlo(&self.helo).await?;

        if endpoint.encryption == Encryption::StartTls {
            client.starttls().await?;
            ehlo = client.ehlo(&self.helo).await?;
        }

        if !credential.username.is_empty() {
            let mechanisms = ehlo
                .capability("AUTH")
                .map(str::to_ascii_uppercase)
                .unwrap_or_default();
            let login_only = mechanisms.split_whitespace().any(|m| m == "LOGIN")
                && !mechanisms.split_whitespace().any(|m| m == "PLAIN");

            if login_only {
                client
                    .auth_login(&credential.username, &credential.password)
                    .await?;
            } else {
                client
                    .auth_plain(&credential.username, &credential.password)
                    .await?;
            }
        }

        Ok(client)
    }
}
