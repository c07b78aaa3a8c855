//! SMTP submission client for the postrider bulk mailer.
//!
//! This crate speaks the client side of SMTP against mail submission
//! endpoints: plain, STARTTLS-upgraded, and implicit-TLS sessions, with
//! AUTH and MIME message assembly on top.

pub mod client;

pub use client::{Attachment, ClientError, MessageBuilder, Reply, SmtpClient};
