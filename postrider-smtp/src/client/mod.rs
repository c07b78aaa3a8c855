//! SMTP client for outbound mail submission.
//!
//! The client drives one session against a submission endpoint. It
//! supports:
//!
//! - Plain TCP, implicit TLS, and STARTTLS-upgraded connections
//! - `AUTH PLAIN` and `AUTH LOGIN`
//! - Timeout-wrapped command exchanges
//! - MIME message assembly with attachments via [`MessageBuilder`]
//!
//! # Examples
//!
//! ```no_run
//! use postrider_common::Timeouts;
//! use postrider_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("smtp.example.com", 587, Timeouts::default(), false).await?;
//! client.read_greeting().await?;
//! client.ehlo("mail.example.com").await?;
//! client.starttls().await?;
//! client.ehlo("mail.example.com").await?;
//! client.auth_plain("mailer@example.com", "hunter2").await?;
//!
//! let message = MessageBuilder::new()
//!     .from("news@example.com")
//!     .to("user@example.org")
//!     .subject("Hello")
//!     .body("This is the message body")
//!     .message_id("example.com")
//!     .build()?;
//!
//! client.mail_from("news@example.com").await?;
//! client.rcpt_to("user@example.org").await?;
//! client.data().await?;
//! client.send_body(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
mod encode;
mod error;
mod message;
mod reply;

pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use message::{Attachment, MessageBuilder};
pub use reply::Reply;
