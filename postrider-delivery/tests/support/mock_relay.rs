//! Mock SMTP relay for exercising the delivery engine end to end.
//!
//! The relay accepts real TCP connections and answers each command from a
//! configurable reply table, so tests can stage rejections at any point of
//! the submission dialogue: a 4xx greeting, a refused AUTH, a rejected
//! recipient, or a connection that silently drops mid-session. Every
//! command the relay sees is recorded for later assertions.

#![allow(dead_code)] // Shared test harness; not every test uses every knob

use std::{
    fmt::Write as _,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::WriteHalf},
    sync::RwLock,
    time::timeout,
};

/// One command observed by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content received after a 354.
    Message(Vec<u8>),
    /// AUTH with its mechanism and any initial response.
    Auth(String),
    /// A base64 line sent during an AUTH LOGIN exchange.
    AuthData(String),
    Rset,
    StartTls,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct RelayReply {
    code: u16,
    message: String,
}

impl RelayReply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct RelayConfig {
    greeting: RelayReply,
    ehlo_capabilities: Vec<String>,
    auth: RelayReply,
    mail_from: RelayReply,
    rcpt_to: RelayReply,
    data: RelayReply,
    data_end: RelayReply,
    rset: RelayReply,
    quit: RelayReply,
    starttls: Option<RelayReply>,
    /// Silently close the connection once this many commands were served.
    drop_after: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            greeting: RelayReply::new(220, "mock.local ESMTP ready"),
            ehlo_capabilities: vec![
                "mock.local".to_string(),
                "SIZE 10485760".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
            ],
            auth: RelayReply::new(235, "2.7.0 Authentication successful"),
            mail_from: RelayReply::new(250, "2.1.0 OK"),
            rcpt_to: RelayReply::new(250, "2.1.5 OK"),
            data: RelayReply::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end: RelayReply::new(250, "2.0.0 OK: queued"),
            rset: RelayReply::new(250, "2.0.0 OK"),
            quit: RelayReply::new(221, "2.0.0 Bye"),
            starttls: None,
            drop_after: None,
        }
    }
}

/// A live mock relay bound to an ephemeral local port.
pub struct MockRelay {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<RelayCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            config: RelayConfig::default(),
        }
    }

    /// Starts a relay that accepts everything.
    pub async fn start() -> std::io::Result<Self> {
        Self::builder().start().await
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command seen so far, across all connections.
    pub async fn commands(&self) -> Vec<RelayCommand> {
        self.commands.read().await.clone()
    }

    /// Message bodies accepted so far.
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                RelayCommand::Message(body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// How many times a command matching `filter` was seen.
    pub async fn count(&self, filter: impl Fn(&RelayCommand) -> bool) -> usize {
        self.commands
            .read()
            .await
            .iter()
            .filter(|command| filter(command))
            .count()
    }

    /// Number of connections accepted since the relay started.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn serve(
        mut stream: TcpStream,
        config: Arc<RelayConfig>,
        commands: Arc<RwLock<Vec<RelayCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut served = 0usize;

        send(&mut writer, &config.greeting).await?;

        loop {
            if config.drop_after.is_some_and(|limit| served >= limit) {
                return Ok(());
            }

            line.clear();
            let Ok(Ok(bytes)) = timeout(Duration::from_secs(5), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if bytes == 0 {
                return Ok(());
            }
            served += 1;

            let trimmed = line.trim();
            let (verb, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));

            match verb.to_ascii_uppercase().as_str() {
                "EHLO" => {
                    commands
                        .write()
                        .await
                        .push(RelayCommand::Ehlo(rest.to_string()));

                    let mut reply = String::new();
                    let last = config.ehlo_capabilities.len().saturating_sub(1);
                    for (index, capability) in config.ehlo_capabilities.iter().enumerate() {
                        let separator = if index == last { ' ' } else { '-' };
                        let _ = write!(&mut reply, "250{separator}{capability}\r\n");
                    }
                    writer.write_all(reply.as_bytes()).await?;
                    writer.flush().await?;
                }
                "AUTH" => {
                    commands
                        .write()
                        .await
                        .push(RelayCommand::Auth(rest.to_string()));

                    if rest.to_ascii_uppercase().starts_with("LOGIN") {
                        // Two-step exchange: prompt for the username and
                        // password as base64 lines before the verdict.
                        for prompt in ["334 VXNlcm5hbWU6\r\n", "334 UGFzc3dvcmQ6\r\n"] {
                            writer.write_all(prompt.as_bytes()).await?;
                            writer.flush().await?;

                            line.clear();
                            if reader.read_line(&mut line).await? == 0 {
                                return Ok(());
                            }
                            commands
                                .write()
                                .await
                                .push(RelayCommand::AuthData(line.trim().to_string()));
                        }
                    }
                    send(&mut writer, &config.auth).await?;
                }
                "MAIL" => {
                    commands
                        .write()
                        .await
                        .push(RelayCommand::MailFrom(rest.to_string()));
                    send(&mut writer, &config.mail_from).await?;
                }
                "RCPT" => {
                    commands
                        .write()
                        .await
                        .push(RelayCommand::RcptTo(rest.to_string()));
                    send(&mut writer, &config.rcpt_to).await?;
                }
                "DATA" => {
                    commands.write().await.push(RelayCommand::Data);
                    send(&mut writer, &config.data).await?;

                    if config.data.code == 354 {
                        let mut body = Vec::new();
                        loop {
                            line.clear();
                            if reader.read_line(&mut line).await? == 0 {
                                return Ok(());
                            }
                            if line.trim_end() == "." {
                                break;
                            }
                            body.extend_from_slice(line.as_bytes());
                        }
                        commands.write().await.push(RelayCommand::Message(body));
                        send(&mut writer, &config.data_end).await?;
                    }
                }
                "RSET" => {
                    commands.write().await.push(RelayCommand::Rset);
                    send(&mut writer, &config.rset).await?;
                }
                "STARTTLS" => {
                    commands.write().await.push(RelayCommand::StartTls);
                    match &config.starttls {
                        Some(reply) => send(&mut writer, reply).await?,
                        None => {
                            send(
                                &mut writer,
                                &RelayReply::new(502, "5.5.1 Command not implemented"),
                            )
                            .await?;
                        }
                    }
                }
                "QUIT" => {
                    commands.write().await.push(RelayCommand::Quit);
                    send(&mut writer, &config.quit).await?;
                    return Ok(());
                }
                _ => {
                    commands
                        .write()
                        .await
                        .push(RelayCommand::Other(trimmed.to_string()));
                    send(&mut writer, &RelayReply::new(500, "5.5.2 Unrecognized command"))
                        .await?;
                }
            }
        }
    }
}

async fn send(writer: &mut WriteHalf<'_>, reply: &RelayReply) -> std::io::Result<()> {
    writer.write_all(&reply.to_bytes()).await?;
    writer.flush().await
}

pub struct MockRelayBuilder {
    config: RelayConfig,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = RelayReply::new(code, message);
        self
    }

    #[must_use]
    pub fn ehlo_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.config.ehlo_capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn auth_reply(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.auth = RelayReply::new(code, message);
        self
    }

    #[must_use]
    pub fn mail_from_reply(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from = RelayReply::new(code, message);
        self
    }

    #[must_use]
    pub fn rcpt_to_reply(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to = RelayReply::new(code, message);
        self
    }

    #[must_use]
    pub fn data_end_reply(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = RelayReply::new(code, message);
        self
    }

    #[must_use]
    pub fn starttls_reply(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls = Some(RelayReply::new(code, message));
        self
    }

    /// Serve this many commands, then close the connection without a word.
    #[must_use]
    pub const fn drop_after(mut self, commands: usize) -> Self {
        self.config.drop_after = Some(commands);
        self
    }

    /// Binds an ephemeral port and starts accepting connections.
    pub async fn start(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_config = Arc::clone(&config);
        let accept_commands = Arc::clone(&commands);
        let accept_connections = Arc::clone(&connections);
        let accept_shutdown = Arc::clone(&shutdown);

        tokio::spawn(async move {
            loop {
                if accept_shutdown.load(Ordering::Relaxed) {
                    break;
                }

                let accepted = timeout(Duration::from_millis(100), listener.accept()).await;
                if let Ok(Ok((stream, _peer))) = accepted {
                    accept_connections.fetch_add(1, Ordering::Relaxed);

                    let config = Arc::clone(&accept_config);
                    let commands = Arc::clone(&accept_commands);
                    tokio::spawn(async move {
                        let _ = MockRelay::serve(stream, config, commands).await;
                    });
                }
            }
        });

        Ok(MockRelay {
            addr,
            commands,
            connections,
            shutdown,
        })
    }
}
