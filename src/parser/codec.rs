//! Transfer-encoding and charset codecs used by payload units.
//!
//! Decoded text is canonical: UTF-8 with `\n` line endings. Encoding goes the
//! other way and restores the message's own line-ending style.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use encoding_rs::Encoding;
use serde::Serialize;

use crate::error::DecodeError;
use crate::model::content::TransferEncoding;

/// Base64 engine that tolerates missing or superfluous padding, as found in
/// hand-crafted bulk mail.
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Maximum encoded line length for base64 output (RFC 2045 §6.8).
const BASE64_LINE_LEN: usize = 76;

/// Line-ending style of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// Pick the style of the first line break in `data` (LF when there is none).
    pub fn detect(data: &[u8]) -> Self {
        match data.iter().position(|&b| b == b'\n') {
            Some(pos) if pos > 0 && data[pos - 1] == b'\r' => Self::CrLf,
            _ => Self::Lf,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

// ── Transfer encodings ──────────────────────────────────────────

/// Decode a base64 body. Whitespace is ignored; any other byte outside the
/// base64 alphabet is a [`DecodeError::MalformedEncoding`].
pub fn decode_base64(raw: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut compact = Vec::with_capacity(raw.len());
    for (offset, &b) in raw.iter().enumerate() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' | b'=' => compact.push(b),
            b' ' | b'\t' | b'\r' | b'\n' => {}
            other => {
                return Err(DecodeError::MalformedEncoding {
                    encoding: TransferEncoding::Base64,
                    reason: format!("invalid byte 0x{other:02x} at offset {offset}"),
                });
            }
        }
    }

    LENIENT_BASE64
        .decode(&compact)
        .map_err(|e| DecodeError::MalformedEncoding {
            encoding: TransferEncoding::Base64,
            reason: e.to_string(),
        })
}

/// Base64-encode `bytes`, wrapped at 76 columns, each line terminated.
pub fn encode_base64(bytes: &[u8], line_ending: LineEnding) -> Vec<u8> {
    let encoded = STANDARD.encode(bytes);
    let mut out = Vec::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LEN * 2 + 2);
    for chunk in encoded.as_bytes().chunks(BASE64_LINE_LEN) {
        out.extend_from_slice(chunk);
        out.extend_from_slice(line_ending.as_bytes());
    }
    out
}

/// Check that every `=` in a quoted-printable body starts a hex escape or a
/// soft line break. Returns the offset of the first violation.
pub fn find_invalid_qp_escape(raw: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'=' {
            i += 1;
            continue;
        }
        let rest = &raw[i + 1..];
        let is_hex_escape =
            rest.len() >= 2 && rest[0].is_ascii_hexdigit() && rest[1].is_ascii_hexdigit();
        if is_hex_escape {
            i += 3;
            continue;
        }
        // Soft line break, possibly with transport padding before the newline
        let after_ws = rest
            .iter()
            .position(|&b| b != b' ' && b != b'\t')
            .unwrap_or(rest.len());
        let tail = &rest[after_ws..];
        if tail.is_empty() || tail.starts_with(b"\n") || tail.starts_with(b"\r\n") {
            i += 1;
            continue;
        }
        return Some(i);
    }
    None
}

/// Decode a quoted-printable body into bytes with `\n` hard line breaks.
pub fn decode_quoted_printable(raw: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if let Some(offset) = find_invalid_qp_escape(raw) {
        let end = (offset + 3).min(raw.len());
        return Err(DecodeError::MalformedEncoding {
            encoding: TransferEncoding::QuotedPrintable,
            reason: format!(
                "invalid escape {:?} at offset {offset}",
                String::from_utf8_lossy(&raw[offset..end])
            ),
        });
    }

    // The decoder silently drops unescaped 8-bit bytes, which bulk mail is
    // full of. Escape them first so they survive.
    let mut escaped = Vec::with_capacity(raw.len());
    for &b in raw {
        if b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\r' | b'\n') {
            escaped.push(b);
        } else {
            escaped.extend_from_slice(format!("={b:02X}").as_bytes());
        }
    }

    let decoded = quoted_printable::decode(&escaped, quoted_printable::ParseMode::Robust)
        .map_err(|e| DecodeError::MalformedEncoding {
            encoding: TransferEncoding::QuotedPrintable,
            reason: e.to_string(),
        })?;

    let mut out = replace_crlf(&decoded);
    // A final hard line break is not reproduced by the decoder
    if ends_with_hard_break(raw) && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    Ok(out)
}

fn ends_with_hard_break(raw: &[u8]) -> bool {
    let Some(body) = raw.strip_suffix(b"\n") else {
        return false;
    };
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    let body_end = body
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |p| p + 1);
    body.get(..body_end).map_or(true, |b| !b.ends_with(b"="))
}

/// Quoted-printable-encode canonical (`\n`-terminated) text bytes.
pub fn encode_quoted_printable(bytes: &[u8], line_ending: LineEnding) -> Vec<u8> {
    // The encoder treats CRLF as a hard line break and escapes bare LF.
    let mut crlf = Vec::with_capacity(bytes.len() + bytes.len() / 40);
    for &b in bytes {
        if b == b'\n' {
            crlf.push(b'\r');
        }
        crlf.push(b);
    }

    let encoded = quoted_printable::encode(&crlf);
    match line_ending {
        LineEnding::CrLf => encoded,
        LineEnding::Lf => replace_crlf(&encoded),
    }
}

fn replace_crlf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

// ── Charsets and line endings ───────────────────────────────────

/// Resolve a charset label (`"iso-8859-1"`, `"UTF8"`, …) to an encoding.
pub fn resolve_charset(label: &str) -> Result<&'static Encoding, DecodeError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| DecodeError::UnsupportedCharset(label.to_string()))
}

/// Decode bytes with the given encoding into canonical text.
///
/// Malformed sequences become U+FFFD; a BOM for this encoding is dropped.
pub fn decode_text(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (decoded, _had_errors) = encoding.decode_with_bom_removal(bytes);
    canonicalize_line_endings(&decoded)
}

/// Convert CRLF line endings to LF.
pub fn canonicalize_line_endings(text: &str) -> String {
    if text.contains('\r') {
        text.replace("\r\n", "\n")
    } else {
        text.to_string()
    }
}

/// Convert canonical LF line endings to the given style.
pub fn restore_line_endings(text: &str, line_ending: LineEnding) -> String {
    match line_ending {
        LineEnding::Lf => text.to_string(),
        LineEnding::CrLf => text.replace('\n', "\r\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_ending_detect() {
        assert_eq!(LineEnding::detect(b"a: b\r\nc: d\r\n"), LineEnding::CrLf);
        assert_eq!(LineEnding::detect(b"a: b\nc: d\n"), LineEnding::Lf);
        assert_eq!(LineEnding::detect(b"no newline"), LineEnding::Lf);
    }

    #[test]
    fn test_decode_base64_wrapped() {
        let raw = b"SGVsbG8g\r\nV29ybGQ=\r\n";
        assert_eq!(decode_base64(raw).unwrap(), b"Hello World");
    }

    #[test]
    fn test_decode_base64_missing_padding() {
        assert_eq!(decode_base64(b"SGVsbG8").unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_base64_rejects_invalid_alphabet() {
        let err = decode_base64(b"SGVs*bG8=\n").unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MalformedEncoding {
                encoding: TransferEncoding::Base64,
                ..
            }
        ));
    }

    #[test]
    fn test_encode_base64_wraps_lines() {
        let data = vec![b'x'; 100];
        let encoded = encode_base64(&data, LineEnding::CrLf);
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(text.lines().all(|l| l.len() <= 76));
        assert!(text.ends_with("\r\n"));
        assert_eq!(decode_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn test_decode_quoted_printable() {
        assert_eq!(
            decode_quoted_printable(b"Hello=20World").unwrap(),
            b"Hello World"
        );
        assert_eq!(
            decode_quoted_printable(b"caf=C3=A9 soft=\nbreak").unwrap(),
            "café softbreak".as_bytes()
        );
    }

    #[test]
    fn test_decode_quoted_printable_rejects_bad_escape() {
        let err = decode_quoted_printable(b"price=ZZ").unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MalformedEncoding {
                encoding: TransferEncoding::QuotedPrintable,
                ..
            }
        ));
    }

    #[test]
    fn test_find_invalid_qp_escape() {
        assert_eq!(find_invalid_qp_escape(b"a=3Db=\r\nc="), None);
        assert_eq!(find_invalid_qp_escape(b"key=value"), Some(3));
    }

    #[test]
    fn test_encode_quoted_printable_round_trip() {
        let text = "Grüße, =equal= and a line\nsecond line\n";
        for le in [LineEnding::Lf, LineEnding::CrLf] {
            let encoded = encode_quoted_printable(text.as_bytes(), le);
            assert!(encoded.is_ascii());
            let decoded = decode_quoted_printable(&encoded).unwrap();
            assert_eq!(String::from_utf8(decoded).unwrap(), text);
        }
    }

    #[test]
    fn test_decode_quoted_printable_keeps_raw_8bit() {
        let decoded = decode_quoted_printable("café =C3=A9\r\n".as_bytes()).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "café é\n");
    }

    #[test]
    fn test_decode_quoted_printable_trailing_soft_break() {
        assert_eq!(decode_quoted_printable(b"abc=\n").unwrap(), b"abc");
        assert_eq!(decode_quoted_printable(b"abc\n").unwrap(), b"abc\n");
    }

    #[test]
    fn test_resolve_charset() {
        assert_eq!(resolve_charset("UTF8").unwrap().name(), "UTF-8");
        assert_eq!(resolve_charset(" iso-8859-1 ").unwrap().name(), "windows-1252");
        assert_eq!(
            resolve_charset("x-klingon"),
            Err(DecodeError::UnsupportedCharset("x-klingon".into()))
        );
    }

    #[test]
    fn test_decode_text_canonicalizes() {
        let enc = resolve_charset("iso-8859-1").unwrap();
        assert_eq!(decode_text(b"caf\xe9\r\nbar\r\n", enc), "café\nbar\n");
    }

    #[test]
    fn test_restore_line_endings() {
        assert_eq!(restore_line_endings("a\nb\n", LineEnding::CrLf), "a\r\nb\r\n");
        assert_eq!(restore_line_endings("a\nb\n", LineEnding::Lf), "a\nb\n");
    }
}
