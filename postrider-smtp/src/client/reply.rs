//! SMTP reply parsing and classification.

use super::error::{ClientError, Result};

/// A complete SMTP reply, possibly spanning several `code-text` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The three-digit status code shared by every line.
    pub code: u16,
    /// The text of each line, in order, without codes or separators.
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All line texts joined into one log-friendly string.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("; ")
    }

    /// Returns `true` for 2xx codes.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Returns `true` for 3xx codes (DATA's 354, AUTH's 334).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Returns `true` for 4xx codes.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// Returns `true` for 5xx codes.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Looks up an EHLO capability line by keyword, returning its
    /// parameters (which may be empty).
    #[must_use]
    pub fn capability(&self, keyword: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let rest = line.strip_prefix(keyword).or_else(|| {
                line.get(..keyword.len())
                    .filter(|head| head.eq_ignore_ascii_case(keyword))
                    .map(|_| &line[keyword.len()..])
            })?;
            match rest.as_bytes().first() {
                None => Some(""),
                Some(b' ' | b'=') => Some(rest[1..].trim()),
                Some(_) => None,
            }
        })
    }

    /// Returns `true` if an EHLO reply advertises the given extension.
    #[must_use]
    pub fn advertises(&self, keyword: &str) -> bool {
        self.capability(keyword).is_some()
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` when
    /// the buffer does not yet hold a full reply.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Parse` if the bytes are not a valid reply.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let text = std::str::from_utf8(buffer)?;
        let mut lines = Vec::new();
        let mut code = None;
        let mut consumed = 0;
        let mut rest = text;

        loop {
            let Some(newline) = rest.find('\n') else {
                return Ok(None);
            };
            let raw = &rest[..newline];
            rest = &rest[newline + 1..];
            consumed += newline + 1;

            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                continue;
            }

            let (line_code, last, message) = parse_line(line)?;
            match code {
                Some(expected) if expected != line_code => {
                    return Err(ClientError::Parse(format!(
                        "status code changed mid-reply: {expected} then {line_code}"
                    )));
                }
                None => code = Some(line_code),
                Some(_) => {}
            }
            lines.push(message.to_string());

            if last {
                // code is always set once a line has parsed
                let code = code.unwrap_or_default();
                return Ok(Some((Self::new(code, lines), consumed)));
            }
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

/// Splits one `250-text` or `250 text` line into its parts.
fn parse_line(line: &str) -> Result<(u16, bool, &str)> {
    let code = line
        .get(..3)
        .and_then(|digits| digits.parse::<u16>().ok())
        .ok_or_else(|| ClientError::Parse(format!("malformed reply line: '{line}'")))?;

    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(other) => Err(ClientError::Parse(format!(
            "invalid separator {:?} in reply line: '{line}'",
            char::from(*other)
        ))),
    }
}
