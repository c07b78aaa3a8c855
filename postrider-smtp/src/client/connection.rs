//! Transport layer for SMTP sessions: plain TCP or TLS over TCP.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use postrider_common::tracing;

use super::error::{ClientError, Result};

/// One SMTP transport, before or after TLS.
#[derive(Debug)]
pub(super) enum SmtpConnection {
    Plain(TcpStream),
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl SmtpConnection {
    /// Opens a plain TCP connection.
    pub(super) async fn open(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self::Plain(stream))
    }

    /// Opens a connection that speaks TLS from the first byte.
    pub(super) async fn open_tls(
        host: &str,
        port: u16,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        handshake(stream, host, accept_invalid_certs).await
    }

    /// Upgrades a plain connection to TLS after a positive STARTTLS reply.
    pub(super) async fn into_tls(self, host: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => handshake(stream, host, accept_invalid_certs).await,
            Self::Tls(_) => Err(ClientError::Tls("connection is already TLS".to_string())),
        }
    }

    pub(super) const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub(super) async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    /// Reads into `buf`, treating EOF as a protocol error.
    pub(super) async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::Closed);
        }
        Ok(n)
    }
}

async fn handshake(
    stream: TcpStream,
    host: &str,
    accept_invalid_certs: bool,
) -> Result<SmtpConnection> {
    let connector = TlsConnector::from(tls_config(accept_invalid_certs)?);
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ClientError::Tls(format!("invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| ClientError::Tls(e.to_string()))?;

    Ok(SmtpConnection::Tls(tls_stream))
}

fn tls_config(accept_invalid_certs: bool) -> Result<Arc<ClientConfig>> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        root_store
            .add(cert)
            .map_err(|e| ClientError::Tls(format!("failed to add certificate: {e}")))?;
    }
    // Log errors but don't fail if some certs couldn't be loaded
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(InsecureVerifier));
    }

    Ok(Arc::new(config))
}

/// A certificate verifier that accepts anything. Installed only when the
/// operator has opted into `accept_invalid_certs` or a one-time relaxed
/// retry is in progress.
#[derive(Debug)]
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}
