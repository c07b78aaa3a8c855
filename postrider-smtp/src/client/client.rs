//! The SMTP session driver: connect, negotiate, authenticate, submit.

use std::time::Duration;

use postrider_common::{Timeouts, incoming, outgoing};

use super::connection::SmtpConnection;
use super::encode;
use super::error::{ClientError, Result};
use super::reply::Reply;

/// Initial size of the read buffer for server replies.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// An SMTP client session against one submission endpoint.
///
/// Every command exchange is bounded by the configured [`Timeouts`], so a
/// stalled relay turns into a `Timeout` error instead of a hung task.
#[derive(Debug)]
pub struct SmtpClient {
    connection: Option<SmtpConnection>,
    buffer: Vec<u8>,
    filled: usize,
    timeouts: Timeouts,
    host: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Connects over plain TCP. The session may later upgrade via
    /// [`starttls`](Self::starttls).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established within the
    /// connect timeout.
    pub async fn connect(
        host: &str,
        port: u16,
        timeouts: Timeouts,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let connection = tokio::time::timeout(timeouts.connect(), SmtpConnection::open(host, port))
            .await
            .map_err(|_| ClientError::Timeout("connect"))??;

        Ok(Self::with_connection(
            connection,
            host,
            timeouts,
            accept_invalid_certs,
        ))
    }

    /// Connects with TLS from the first byte (implicit TLS, usually 465).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails or times out.
    pub async fn connect_tls(
        host: &str,
        port: u16,
        timeouts: Timeouts,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let connection = tokio::time::timeout(
            timeouts.connect(),
            SmtpConnection::open_tls(host, port, accept_invalid_certs),
        )
        .await
        .map_err(|_| ClientError::Timeout("TLS connect"))??;

        Ok(Self::with_connection(
            connection,
            host,
            timeouts,
            accept_invalid_certs,
        ))
    }

    fn with_connection(
        connection: SmtpConnection,
        host: &str,
        timeouts: Timeouts,
        accept_invalid_certs: bool,
    ) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            filled: 0,
            timeouts,
            host: host.to_string(),
            accept_invalid_certs,
        }
    }

    /// Returns `true` once the transport carries TLS.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        match &self.connection {
            Some(connection) => connection.is_tls(),
            None => false,
        }
    }

    /// Reads the server banner sent on connect.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the banner is not a 220.
    pub async fn read_greeting(&mut self) -> Result<Reply> {
        let reply = tokio::time::timeout(self.timeouts.command(), self.read_reply())
            .await
            .map_err(|_| ClientError::Timeout("greeting"))??;
        incoming!("{reply}");

        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(ClientError::Rejected {
                command: "greeting",
                code: reply.code,
                message: reply.text(),
            })
        }
    }

    /// Sends EHLO and returns the capability listing.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the server does not accept the greeting.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Reply> {
        let reply = self.exchange(&format!("EHLO {domain}"), "EHLO").await?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(ClientError::Rejected {
                command: "EHLO",
                code: reply.code,
                message: reply.text(),
            })
        }
    }

    /// Sends STARTTLS and upgrades the transport on a positive reply.
    ///
    /// The caller must send EHLO again afterwards (RFC 3207 Section 4.2).
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the server refuses STARTTLS, or `Tls` if the
    /// handshake fails.
    pub async fn starttls(&mut self) -> Result<Reply> {
        let reply = self.exchange("STARTTLS", "STARTTLS").await?;
        if !reply.is_positive() {
            return Err(ClientError::Rejected {
                command: "STARTTLS",
                code: reply.code,
                message: reply.text(),
            });
        }

        let connection = self.connection.take().ok_or(ClientError::Closed)?;
        let upgraded = tokio::time::timeout(
            self.timeouts.connect(),
            connection.into_tls(&self.host, self.accept_invalid_certs),
        )
        .await
        .map_err(|_| ClientError::Timeout("STARTTLS"))??;
        self.connection = Some(upgraded);

        Ok(reply)
    }

    /// Authenticates with `AUTH PLAIN` using an initial response
    /// (RFC 4616).
    ///
    /// # Errors
    ///
    /// Returns `AuthFailed` if the server refuses the credentials.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<()> {
        let payload = encode::base64(format!("\0{username}\0{password}").as_bytes());
        let reply = self
            .exchange_with(
                &format!("AUTH PLAIN {payload}"),
                "AUTH PLAIN ****",
                "AUTH",
                self.timeouts.command(),
            )
            .await?;

        if reply.is_positive() {
            Ok(())
        } else {
            Err(ClientError::AuthFailed {
                code: reply.code,
                message: reply.text(),
            })
        }
    }

    /// Authenticates with the older two-step `AUTH LOGIN` exchange, for
    /// relays that do not offer PLAIN.
    ///
    /// # Errors
    ///
    /// Returns `AuthFailed` if any step of the exchange is refused.
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<()> {
        let opening = self.exchange("AUTH LOGIN", "AUTH").await?;
        if !opening.is_intermediate() {
            return Err(ClientError::AuthFailed {
                code: opening.code,
                message: opening.text(),
            });
        }

        let challenge = self
            .exchange_with(
                &encode::base64(username.as_bytes()),
                "****",
                "AUTH",
                self.timeouts.command(),
            )
            .await?;
        if !challenge.is_intermediate() {
            return Err(ClientError::AuthFailed {
                code: challenge.code,
                message: challenge.text(),
            });
        }

        let outcome = self
            .exchange_with(
                &encode::base64(password.as_bytes()),
                "****",
                "AUTH",
                self.timeouts.command(),
            )
            .await?;
        if outcome.is_positive() {
            Ok(())
        } else {
            Err(ClientError::AuthFailed {
                code: outcome.code,
                message: outcome.text(),
            })
        }
    }

    /// Opens the envelope with MAIL FROM.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the sender is refused.
    pub async fn mail_from(&mut self, from: &str) -> Result<Reply> {
        let reply = self
            .exchange(&format!("MAIL FROM:<{from}>"), "MAIL FROM")
            .await?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(ClientError::Rejected {
                command: "MAIL FROM",
                code: reply.code,
                message: reply.text(),
            })
        }
    }

    /// Adds the recipient with RCPT TO.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the recipient is refused.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Reply> {
        let reply = self.exchange(&format!("RCPT TO:<{to}>"), "RCPT TO").await?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(ClientError::Rejected {
                command: "RCPT TO",
                code: reply.code,
                message: reply.text(),
            })
        }
    }

    /// Sends DATA and waits for the go-ahead.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` unless the server answers 354.
    pub async fn data(&mut self) -> Result<Reply> {
        let reply = self.exchange("DATA", "DATA").await?;
        if reply.is_intermediate() {
            Ok(reply)
        } else {
            Err(ClientError::Rejected {
                command: "DATA",
                code: reply.code,
                message: reply.text(),
            })
        }
    }

    /// Transmits the message after a 354, with CRLF normalization and
    /// dot-stuffing, and waits for the final verdict.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the server refuses the message.
    pub async fn send_body(&mut self, body: &str) -> Result<Reply> {
        let payload = prepare_body(body);
        outgoing!("({} bytes of message data)", payload.len());

        let reply = tokio::time::timeout(self.timeouts.data(), async {
            self.connection
                .as_mut()
                .ok_or(ClientError::Closed)?
                .send(&payload)
                .await?;
            self.read_reply().await
        })
        .await
        .map_err(|_| ClientError::Timeout("DATA"))??;
        incoming!("{reply}");

        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(ClientError::Rejected {
                command: "DATA",
                code: reply.code,
                message: reply.text(),
            })
        }
    }

    /// Resets the current mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails. The reply is returned
    /// unchecked so callers can decide what a non-250 means for them.
    pub async fn rset(&mut self) -> Result<Reply> {
        self.exchange("RSET", "RSET").await
    }

    /// Ends the session politely.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails or times out.
    pub async fn quit(&mut self) -> Result<Reply> {
        self.exchange_with("QUIT", "QUIT", "QUIT", self.timeouts.quit())
            .await
    }

    async fn exchange(&mut self, line: &str, label: &'static str) -> Result<Reply> {
        self.exchange_with(line, line, label, self.timeouts.command())
            .await
    }

    /// Sends one line and reads one reply within `limit`. `trace` is what
    /// goes to the log, so AUTH secrets can be masked.
    async fn exchange_with(
        &mut self,
        line: &str,
        trace: &str,
        label: &'static str,
        limit: Duration,
    ) -> Result<Reply> {
        outgoing!("{trace}");

        let reply = tokio::time::timeout(limit, async {
            self.send_line(line).await?;
            self.read_reply().await
        })
        .await
        .map_err(|_| ClientError::Timeout(label))??;
        incoming!("{reply}");

        Ok(reply)
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let data = format!("{line}\r\n");
        self.connection
            .as_mut()
            .ok_or(ClientError::Closed)?
            .send(data.as_bytes())
            .await
    }

    /// Reads a complete reply, buffering partial lines across reads.
    async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            if let Some((reply, consumed)) = Reply::parse(&self.buffer[..self.filled])? {
                self.buffer.copy_within(consumed..self.filled, 0);
                self.filled -= consumed;
                return Ok(reply);
            }

            if self.filled == self.buffer.len() {
                let grown = self.buffer.len() * 2;
                if grown > MAX_BUFFER_SIZE {
                    return Err(ClientError::Parse(format!(
                        "reply exceeds {MAX_BUFFER_SIZE} bytes"
                    )));
                }
                self.buffer.resize(grown, 0);
            }

            let connection = self.connection.as_mut().ok_or(ClientError::Closed)?;
            let n = connection.read(&mut self.buffer[self.filled..]).await?;
            self.filled += n;
        }
    }
}

/// Normalizes line endings to CRLF, dot-stuffs leading dots (RFC 5321
/// Section 4.5.2), and appends the end-of-data marker.
fn prepare_body(body: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 64);

    if !body.is_empty() {
        let trimmed = body
            .strip_suffix("\r\n")
            .or_else(|| body.strip_suffix('\n'))
            .unwrap_or(body);

        for line in trimmed.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.starts_with('.') {
                payload.push(b'.');
            }
            payload.extend_from_slice(line.as_bytes());
            payload.extend_from_slice(b"\r\n");
        }
    }

    payload.extend_from_slice(b".\r\n");
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_body_normalizes_line_endings() {
        assert_eq!(prepare_body("a\nb"), b"a\r\nb\r\n.\r\n");
        assert_eq!(prepare_body("a\r\nb\r\n"), b"a\r\nb\r\n.\r\n");
        assert_eq!(prepare_body("a\nb\n"), b"a\r\nb\r\n.\r\n");
    }

    #[test]
    fn test_prepare_body_dot_stuffing() {
        assert_eq!(prepare_body(".hidden"), b"..hidden\r\n.\r\n");
        assert_eq!(prepare_body("safe\n.\nafter"), b"safe\r\n..\r\nafter\r\n.\r\n");
    }

    #[test]
    fn test_prepare_body_empty() {
        assert_eq!(prepare_body(""), b".\r\n");
    }

    #[test]
    fn test_prepare_body_keeps_blank_lines() {
        assert_eq!(prepare_body("a\n\nb"), b"a\r\n\r\nb\r\n.\r\n");
    }
}
