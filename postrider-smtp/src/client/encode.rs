//! Base64 helpers for AUTH exchanges and MIME bodies.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};

/// Encodes `data` as a single unwrapped base64 line, as AUTH wants it.
pub(crate) fn base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Encodes `data` as base64 wrapped at 76 columns with CRLF line endings,
/// as MIME transfer encoding wants it (RFC 2045 Section 6.8).
pub(crate) fn base64_mime(data: &[u8]) -> String {
    let encoded = base64(data);
    let mut out = String::with_capacity(encoded.len() + (encoded.len() / 76 + 1) * 2);

    for chunk in encoded.as_bytes().chunks(76) {
        // base64 output is pure ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_vectors() {
        // RFC 4648 test vectors
        assert_eq!(base64(b""), "");
        assert_eq!(base64(b"f"), "Zg==");
        assert_eq!(base64(b"fo"), "Zm8=");
        assert_eq!(base64(b"foo"), "Zm9v");
        assert_eq!(base64(b"foob"), "Zm9vYg==");
        assert_eq!(base64(b"fooba"), "Zm9vYmE=");
        assert_eq!(base64(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn test_base64_auth_plain_shape() {
        assert_eq!(
            base64(b"\0mailer@example.com\0hunter2"),
            "AG1haWxlckBleGFtcGxlLmNvbQBodW50ZXIy"
        );
    }

    #[test]
    fn test_base64_no_wrapping() {
        let encoded = base64(&[0xAB; 120]);
        assert_eq!(encoded.len(), 160);
        assert!(!encoded.contains('\r'));
        assert!(!encoded.contains('\n'));
    }

    #[test]
    fn test_base64_mime_wraps_at_76() {
        let encoded = base64_mime(&[0xAB; 120]);
        let lines: Vec<&str> = encoded.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1].len(), 76);
        assert_eq!(lines[2].len(), 8);
        assert!(encoded.ends_with("\r\n"));
    }

    #[test]
    fn test_base64_mime_short_input() {
        assert_eq!(base64_mime(b"Hello World"), "SGVsbG8gV29ybGQ=\r\n");
    }
}
