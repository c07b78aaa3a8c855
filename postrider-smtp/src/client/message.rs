//! Email message builder with headers, body, and MIME attachments.

use std::{io::Write, path::Path};

use ulid::Ulid;

use super::encode;
use super::error::{ClientError, Result};

/// An email attachment with filename, content type, and data.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// The filename to use in the MIME header.
    pub filename: String,
    /// The MIME content type (e.g., "application/pdf").
    pub content_type: String,
    /// The attachment data.
    pub data: Vec<u8>,
}

/// Builder for submission-ready email messages.
///
/// Produces RFC 5322 header and body text including Date and Message-ID,
/// with a plain-text or HTML body and optional MIME attachments.
///
/// # Examples
///
/// ```
/// use postrider_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("news@example.com")
///     .from_name("Example News")
///     .to("user@example.org")
///     .subject("Hello")
///     .body("This is the message body")
///     .message_id("example.com")
///     .build()
///     .unwrap();
/// # assert!(message.contains("From: Example News <news@example.com>"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    from_name: Option<String>,
    to: Vec<String>,
    reply_to: Option<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
    html: bool,
    message_id_domain: Option<String>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    /// Creates a new empty message builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender address.
    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Sets the display name shown alongside the sender address.
    #[must_use]
    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    /// Sets the Reply-To header.
    #[must_use]
    pub fn reply_to(mut self, email: impl Into<String>) -> Self {
        self.reply_to = Some(email.into());
        self
    }

    /// Sets the Subject header.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header. Headers appear in insertion order.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the message body content.
    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    /// Marks the body as `text/html` rather than `text/plain`.
    #[must_use]
    pub const fn html(mut self, html: bool) -> Self {
        self.html = html;
        self
    }

    /// Generates a `Message-ID` header under the given domain.
    #[must_use]
    pub fn message_id(mut self, domain: impl Into<String>) -> Self {
        self.message_id_domain = Some(domain.into());
        self
    }

    /// Adds an attachment from raw data.
    #[must_use]
    pub fn attach(
        mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Adds an attachment by reading from the filesystem, guessing the
    /// content type from the file extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or has no usable name.
    pub async fn attach_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::Build(format!("invalid filename: {}", path.display())))?
            .to_string();

        let data = tokio::fs::read(path).await.map_err(|e| {
            ClientError::Build(format!("failed to read file {}: {e}", path.display()))
        })?;

        let content_type = guess_content_type(path);

        self.attachments.push(Attachment {
            filename,
            content_type,
            data,
        });

        Ok(self)
    }

    /// Builds the final message text.
    ///
    /// # Errors
    ///
    /// Returns `Build` if the sender or recipients are missing.
    pub fn build(self) -> Result<String> {
        if self.from.is_none() {
            return Err(ClientError::Build("message requires a sender".to_string()));
        }
        if self.to.is_empty() {
            return Err(ClientError::Build(
                "message requires at least one recipient".to_string(),
            ));
        }

        if self.attachments.is_empty() {
            self.build_simple()
        } else {
            self.build_multipart()
        }
    }

    fn build_simple(self) -> Result<String> {
        let mut message = Vec::with_capacity(1024);

        self.write_headers(&mut message)?;
        write!(&mut message, "MIME-Version: 1.0\r\n")?;
        write!(&mut message, "Content-Type: {}\r\n", self.content_type())?;
        write!(&mut message, "\r\n")?;

        if let Some(body) = &self.body {
            write!(&mut message, "{body}")?;
        }

        String::from_utf8(message).map_err(|e| ClientError::Utf8(e.utf8_error()))
    }

    fn build_multipart(self) -> Result<String> {
        let boundary = format!("----=_Part_{}", Ulid::new());
        let mut message = Vec::with_capacity(2048);

        self.write_headers(&mut message)?;
        write!(&mut message, "MIME-Version: 1.0\r\n")?;
        write!(
            &mut message,
            "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n"
        )?;
        write!(&mut message, "\r\n")?;

        // Body part first
        write!(&mut message, "--{boundary}\r\n")?;
        write!(&mut message, "Content-Type: {}\r\n", self.content_type())?;
        write!(&mut message, "\r\n")?;
        if let Some(body) = &self.body {
            write!(&mut message, "{body}")?;
        }
        write!(&mut message, "\r\n")?;

        for attachment in &self.attachments {
            write!(&mut message, "--{boundary}\r\n")?;
            write!(
                &mut message,
                "Content-Type: {}\r\n",
                attachment.content_type
            )?;
            write!(&mut message, "Content-Transfer-Encoding: base64\r\n")?;
            write!(
                &mut message,
                "Content-Disposition: attachment; filename=\"{}\"\r\n",
                attachment.filename
            )?;
            write!(&mut message, "\r\n")?;
            write!(&mut message, "{}", encode::base64_mime(&attachment.data))?;
        }

        write!(&mut message, "--{boundary}--\r\n")?;

        String::from_utf8(message).map_err(|e| ClientError::Utf8(e.utf8_error()))
    }

    fn write_headers(&self, message: &mut Vec<u8>) -> Result<()> {
        write!(
            message,
            "Date: {}\r\n",
            chrono::Utc::now().to_rfc2822()
        )?;

        if let Some(from) = &self.from {
            match &self.from_name {
                Some(name) if !name.is_empty() => {
                    write!(message, "From: {name} <{from}>\r\n")?;
                }
                _ => write!(message, "From: {from}\r\n")?,
            }
        }

        write!(message, "To: {}\r\n", self.to.join(", "))?;

        if let Some(reply_to) = &self.reply_to {
            write!(message, "Reply-To: {reply_to}\r\n")?;
        }

        if let Some(subject) = &self.subject {
            write!(message, "Subject: {subject}\r\n")?;
        }

        if let Some(domain) = &self.message_id_domain {
            write!(message, "Message-ID: <{}@{domain}>\r\n", Ulid::new())?;
        }

        for (name, value) in &self.headers {
            write!(message, "{name}: {value}\r\n")?;
        }

        Ok(())
    }

    const fn content_type(&self) -> &'static str {
        if self.html {
            "text/html; charset=utf-8"
        } else {
            "text/plain; charset=utf-8"
        }
    }
}

/// Guesses the MIME content type based on file extension.
fn guess_content_type(path: &Path) -> String {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "zip" => "application/zip",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_message() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Test")
            .body("Hello World")
            .build()
            .unwrap();

        assert!(message.starts_with("Date: "));
        assert!(message.contains("From: sender@example.com\r\n"));
        assert!(message.contains("To: recipient@example.com\r\n"));
        assert!(message.contains("Subject: Test\r\n"));
        assert!(message.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(message.ends_with("\r\n\r\nHello World"));
    }

    #[test]
    fn test_from_display_name() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .from_name("Example Sender")
            .to("recipient@example.com")
            .build()
            .unwrap();

        assert!(message.contains("From: Example Sender <sender@example.com>\r\n"));
    }

    #[test]
    fn test_reply_to_and_custom_headers_in_order() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .reply_to("replies@example.com")
            .header("X-Campaign", "spring")
            .header("List-Unsubscribe", "<mailto:stop@example.com>")
            .build()
            .unwrap();

        assert!(message.contains("Reply-To: replies@example.com\r\n"));
        let campaign = message.find("X-Campaign: spring").unwrap();
        let unsubscribe = message.find("List-Unsubscribe:").unwrap();
        assert!(campaign < unsubscribe);
    }

    #[test]
    fn test_html_content_type() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .body("<p>Hello</p>")
            .html(true)
            .build()
            .unwrap();

        assert!(message.contains("Content-Type: text/html; charset=utf-8\r\n"));
    }

    #[test]
    fn test_message_id_generated_under_domain() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .message_id("example.com")
            .build()
            .unwrap();

        let line = message
            .lines()
            .find(|line| line.starts_with("Message-ID: "))
            .unwrap();
        assert!(line.ends_with("@example.com>"));
        assert!(line.contains('<'));
    }

    #[test]
    fn test_multiple_recipients() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("one@example.com")
            .to("two@example.com")
            .build()
            .unwrap();

        assert!(message.contains("To: one@example.com, two@example.com\r\n"));
    }

    #[test]
    fn test_with_attachment() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Test")
            .body("See attachment")
            .attach("test.txt", "text/plain", b"File content".to_vec())
            .build()
            .unwrap();

        assert!(message.contains("multipart/mixed"));
        assert!(message.contains("Content-Disposition: attachment; filename=\"test.txt\""));
        assert!(message.contains("Content-Transfer-Encoding: base64"));
        assert!(message.contains("RmlsZSBjb250ZW50"));
        // Closing boundary present
        assert!(message.trim_end().ends_with("--"));
    }

    #[test]
    fn test_missing_sender_or_recipient() {
        let missing_from = MessageBuilder::new().to("recipient@example.com").build();
        assert!(matches!(missing_from, Err(ClientError::Build(_))));

        let missing_to = MessageBuilder::new().from("sender@example.com").build();
        assert!(matches!(missing_to, Err(ClientError::Build(_))));
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a.pdf")), "application/pdf");
        assert_eq!(guess_content_type(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(guess_content_type(Path::new("a.unknown")), "application/octet-stream");
        assert_eq!(guess_content_type(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_attach_file_reads_and_types_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, br#"{"ok":true}"#).unwrap();

        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .attach_file(&path)
            .await
            .unwrap()
            .build()
            .unwrap();

        assert!(message.contains("Content-Type: application/json\r\n"));
        assert!(message.contains("Content-Disposition: attachment; filename=\"report.json\""));
    }

    #[tokio::test]
    async fn test_attach_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = MessageBuilder::new()
            .attach_file(dir.path().join("absent.bin"))
            .await;

        assert!(matches!(result, Err(ClientError::Build(_))));
    }
}
