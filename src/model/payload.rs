//! A single decodable part of a message and its decode/re-encode lifecycle.
//!
//! ```text
//! Raw ──decode──▶ Decoded ──set_text_content──▶ Anonymized ──reencode──▶ Reencoded
//!                    └──────────────reencode──────────────────────────────▲
//! ```
//!
//! Transitions only move forward. A re-encoded unit can be decoded again,
//! which starts a new pass from the re-encoded bytes.

use std::borrow::Cow;
use std::ops::Range;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DecodeError, PrepError};
use crate::model::content::{ContentType, TransferEncoding};
use crate::model::headers::HeaderMap;
use crate::parser::codec::{self, LineEnding};
use crate::parser::header::{header_param, media_type, set_header_param};
use crate::parser::patterns::{DetectionSource, Diagnostic, PatternCatalog, DEFAULT_CHARSET};

/// Lifecycle state of a [`PayloadUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Raw,
    Decoded,
    Anonymized,
    Reencoded,
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Raw => "raw",
            Self::Decoded => "decoded",
            Self::Anonymized => "anonymized",
            Self::Reencoded => "reencoded",
        };
        f.write_str(label)
    }
}

/// One leaf part of a message.
#[derive(Debug, Clone)]
pub struct PayloadUnit {
    raw: Vec<u8>,
    span: Range<usize>,
    content_type: ContentType,
    transfer_encoding: TransferEncoding,
    charset: String,
    media_type: Option<String>,
    text: Option<String>,
    encoded: Option<Vec<u8>>,
    state: UnitState,
    diagnostics: Vec<Diagnostic>,
    line_ending: LineEnding,
}

impl PayloadUnit {
    /// Classify a part body using its header block (the part's own headers,
    /// or the message headers for a single-part message).
    pub fn new(
        raw: Vec<u8>,
        span: Range<usize>,
        headers: &HeaderMap,
        catalog: &PatternCatalog,
        line_ending: LineEnding,
    ) -> Self {
        let content_type_header = headers.get("Content-Type");
        let encoding_header = headers.get("Content-Transfer-Encoding");
        let mut diagnostics = Vec::new();

        let content_type = catalog.inspect_content_type(content_type_header.as_deref(), &raw);
        let encoding = catalog.inspect_transfer_encoding(encoding_header.as_deref(), &raw);
        let charset = catalog.inspect_charset(content_type_header.as_deref());
        let declared_media = content_type_header.as_deref().and_then(media_type);

        if let Some(body) = content_type.conflict {
            warn!(
                header = %content_type.value,
                body = %body,
                offset = span.start,
                "Content-Type header disagrees with payload"
            );
            diagnostics.push(Diagnostic::ContentTypeConflict {
                header: content_type.value,
                body,
            });
        }
        if let Some(body) = encoding.conflict {
            warn!(
                header = %encoding.value,
                body = %body,
                offset = span.start,
                "Content-Transfer-Encoding header disagrees with payload"
            );
            diagnostics.push(Diagnostic::TransferEncodingConflict {
                header: encoding.value,
                body,
            });
        }
        if let Some(value) = &content_type_header {
            if declared_media.is_none() {
                diagnostics.push(Diagnostic::UnrecognizedContentType {
                    value: value.clone(),
                });
            }
        }
        if let Some(value) = &encoding_header {
            if encoding.source != DetectionSource::Header {
                diagnostics.push(Diagnostic::UnrecognizedTransferEncoding {
                    value: value.clone(),
                });
            }
        }
        if let Some(label) = content_type_header
            .as_deref()
            .and_then(|v| header_param(v, "charset"))
        {
            if charset.source == DetectionSource::Fallback {
                debug!(charset = %label, "Unknown charset label");
                diagnostics.push(Diagnostic::UnknownCharset { label });
            }
        }

        debug!(
            offset = span.start,
            len = raw.len(),
            content_type = %content_type.value,
            encoding = %encoding.value,
            charset = %charset.value,
            "Classified payload unit"
        );

        Self {
            raw,
            span,
            content_type: content_type.value,
            transfer_encoding: encoding.value,
            charset: charset.value,
            media_type: declared_media,
            text: None,
            encoded: None,
            state: UnitState::Raw,
            diagnostics,
            line_ending,
        }
    }

    // ── Accessors ───────────────────────────────────────────────

    /// The part body as it appeared in the parsed message.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Byte range of [`raw`](Self::raw) within the parsed input.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.transfer_encoding
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Declared `type/subtype`, if the part had a well-formed `Content-Type`.
    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    /// Decoded text; `None` until a successful decode.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Textual units are decoded by default; others pass through as bytes.
    /// A part without a declared media type is assumed to be text.
    pub fn is_textual(&self) -> bool {
        self.media_type
            .as_deref()
            .is_none_or(|m| m.starts_with("text/"))
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Override the charset used by the next decode.
    ///
    /// Ignored once the unit holds decoded text.
    pub fn set_charset(&mut self, name: &str) {
        match self.state {
            UnitState::Raw => self.charset = name.trim().to_string(),
            state => debug!(%state, charset = name, "Ignoring charset override after decode"),
        }
    }

    /// Transfer-decode and charset-decode the payload into canonical text.
    ///
    /// On failure the unit stays undecoded, a diagnostic is recorded, and
    /// later stages skip it. Decoding a unit that already holds text returns
    /// that text unchanged.
    pub fn decode(&mut self) -> Result<String, DecodeError> {
        match self.state {
            UnitState::Decoded | UnitState::Anonymized => {
                return Ok(self.text.clone().unwrap_or_default());
            }
            UnitState::Reencoded => {
                // New pass: the re-encoded bytes become the source
                if let Some(encoded) = self.encoded.take() {
                    self.raw = encoded;
                }
                self.text = None;
                self.state = UnitState::Raw;
            }
            UnitState::Raw => {}
        }

        match self.decode_raw() {
            Ok(text) => {
                self.text = Some(text.clone());
                self.state = UnitState::Decoded;
                Ok(text)
            }
            Err(err) => {
                warn!(
                    offset = self.span.start,
                    encoding = %self.transfer_encoding,
                    charset = %self.charset,
                    error = %err,
                    "Failed to decode payload unit"
                );
                self.diagnostics.push(Diagnostic::DecodeFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn decode_raw(&self) -> Result<String, DecodeError> {
        let bytes: Cow<'_, [u8]> = match self.transfer_encoding {
            TransferEncoding::Base64 => Cow::Owned(codec::decode_base64(&self.raw)?),
            TransferEncoding::QuotedPrintable => {
                Cow::Owned(codec::decode_quoted_printable(&self.raw)?)
            }
            TransferEncoding::Identity => Cow::Borrowed(&self.raw),
        };
        let encoding = codec::resolve_charset(&self.charset)?;
        Ok(codec::decode_text(&bytes, encoding))
    }

    /// Replace the decoded text. The raw bytes become stale until
    /// [`reencode`](Self::reencode) runs.
    pub fn set_text_content(&mut self, text: impl Into<String>) -> Result<(), PrepError> {
        match self.state {
            UnitState::Decoded | UnitState::Anonymized => {
                self.text = Some(codec::canonicalize_line_endings(&text.into()));
                self.encoded = None;
                self.state = UnitState::Anonymized;
                Ok(())
            }
            state => Err(PrepError::InvalidTransition {
                state,
                operation: "set text content of",
            }),
        }
    }

    /// Re-apply the transfer encoding to the current text, always as UTF-8.
    ///
    /// Units without text return their raw bytes unchanged and stay raw.
    pub fn reencode(&mut self) -> Vec<u8> {
        match self.state {
            UnitState::Raw => self.raw.clone(),
            UnitState::Reencoded => self.encoded.clone().unwrap_or_default(),
            UnitState::Decoded | UnitState::Anonymized => {
                let encoded = self.encode_text();
                self.encoded = Some(encoded.clone());
                self.charset = DEFAULT_CHARSET.to_string();
                self.state = UnitState::Reencoded;
                encoded
            }
        }
    }

    fn encode_text(&self) -> Vec<u8> {
        let text = self.text.as_deref().unwrap_or_default();
        match self.transfer_encoding {
            TransferEncoding::Base64 => {
                let mut out = codec::encode_base64(text.as_bytes(), self.line_ending);
                // Keep the original trailing-newline shape of the part body
                if !self.raw.ends_with(b"\n") {
                    if let Some(kept) = out.strip_suffix(self.line_ending.as_bytes()) {
                        let kept = kept.len();
                        out.truncate(kept);
                    }
                }
                out
            }
            TransferEncoding::QuotedPrintable => {
                codec::encode_quoted_printable(text.as_bytes(), self.line_ending)
            }
            TransferEncoding::Identity => {
                codec::restore_line_endings(text, self.line_ending).into_bytes()
            }
        }
    }

    /// Bytes the serializer writes for this unit.
    ///
    /// Raw and decoded units write their original bytes; anonymized units are
    /// encoded on the fly; re-encoded units write the re-encoded bytes.
    pub fn wire_bytes(&self) -> Cow<'_, [u8]> {
        match self.state {
            UnitState::Raw | UnitState::Decoded => Cow::Borrowed(&self.raw),
            UnitState::Anonymized => Cow::Owned(self.encode_text()),
            UnitState::Reencoded => match &self.encoded {
                Some(encoded) => Cow::Borrowed(encoded),
                None => Cow::Borrowed(&self.raw),
            },
        }
    }

    /// Whether serialization writes bytes produced from the text.
    pub fn is_rewritten(&self) -> bool {
        matches!(self.state, UnitState::Anonymized | UnitState::Reencoded)
    }

    /// Update the owning header block so it describes the rewritten bytes:
    /// `charset=utf-8`, the effective transfer encoding, and `8bit` instead of
    /// `7bit` when identity-encoded text is not ASCII.
    pub fn apply_framing(&self, headers: &mut HeaderMap) {
        if !self.is_rewritten() {
            return;
        }

        match headers.get("Content-Type") {
            Some(value) => headers.set(
                "Content-Type",
                &set_header_param(&value, "charset", "utf-8"),
            ),
            None => headers.set(
                "Content-Type",
                &format!("{}; charset=utf-8", self.content_type.default_mime()),
            ),
        }

        let declared = headers.get("Content-Transfer-Encoding");
        match self.transfer_encoding.header_token() {
            Some(token) => {
                let matches = declared
                    .as_deref()
                    .is_some_and(|d| d.trim().eq_ignore_ascii_case(token));
                if !matches {
                    headers.set("Content-Transfer-Encoding", token);
                }
            }
            None => {
                let non_ascii = self.text.as_deref().is_some_and(|t| !t.is_ascii());
                let seven_bit = declared
                    .as_deref()
                    .is_none_or(|d| d.trim().eq_ignore_ascii_case("7bit"));
                if non_ascii && seven_bit {
                    headers.set("Content-Transfer-Encoding", "8bit");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(headers: &str, body: &[u8]) -> PayloadUnit {
        let headers = HeaderMap::parse(headers.as_bytes());
        PayloadUnit::new(
            body.to_vec(),
            0..body.len(),
            &headers,
            &PatternCatalog::new(),
            LineEnding::Lf,
        )
    }

    #[test]
    fn test_classification_from_headers() {
        let u = unit(
            "Content-Type: text/html; charset=iso-8859-1\nContent-Transfer-Encoding: quoted-printable\n",
            b"<p>caf=E9</p>",
        );
        assert_eq!(u.content_type(), ContentType::HtmlText);
        assert_eq!(u.transfer_encoding(), TransferEncoding::QuotedPrintable);
        assert_eq!(u.charset(), "windows-1252");
        assert_eq!(u.media_type(), Some("text/html"));
        assert!(u.diagnostics().is_empty());
        assert_eq!(u.state(), UnitState::Raw);
    }

    #[test]
    fn test_decode_latin1_qp() {
        let mut u = unit(
            "Content-Type: text/plain; charset=iso-8859-1\nContent-Transfer-Encoding: quoted-printable\n",
            b"caf=E9 cr=E8me\n",
        );
        assert_eq!(u.decode().unwrap(), "café crème\n");
        assert_eq!(u.state(), UnitState::Decoded);
        assert_eq!(u.text(), Some("café crème\n"));
    }

    #[test]
    fn test_decode_failure_leaves_text_absent() {
        let mut u = unit("Content-Transfer-Encoding: base64\n", b"!!!not base64!!!");
        assert!(matches!(
            u.decode(),
            Err(DecodeError::MalformedEncoding { .. })
        ));
        assert_eq!(u.text(), None);
        assert_eq!(u.state(), UnitState::Raw);
        assert!(matches!(
            u.diagnostics().last(),
            Some(Diagnostic::DecodeFailed { .. })
        ));
    }

    #[test]
    fn test_unknown_charset_override() {
        let mut u = unit("Content-Type: text/plain\n", b"hello");
        u.set_charset("x-made-up");
        assert_eq!(
            u.decode(),
            Err(DecodeError::UnsupportedCharset("x-made-up".into()))
        );
        u.set_charset("us-ascii");
        assert_eq!(u.decode().unwrap(), "hello");
        // No effect once decoded
        u.set_charset("utf-16le");
        assert_eq!(u.charset(), "us-ascii");
    }

    #[test]
    fn test_set_text_requires_decode() {
        let mut u = unit("", b"plain body");
        assert!(matches!(
            u.set_text_content("x"),
            Err(PrepError::InvalidTransition {
                state: UnitState::Raw,
                ..
            })
        ));
        u.decode().unwrap();
        u.set_text_content("changed").unwrap();
        assert_eq!(u.state(), UnitState::Anonymized);
        u.set_text_content("changed again").unwrap();
        assert_eq!(u.text(), Some("changed again"));
    }

    #[test]
    fn test_qp_reencode_round_trip() {
        let mut u = unit("Content-Transfer-Encoding: quoted-printable\n", b"Hello=20World");
        assert_eq!(u.decode().unwrap(), "Hello World");
        let bytes = u.reencode();
        assert_eq!(u.state(), UnitState::Reencoded);
        assert_eq!(codec::decode_quoted_printable(&bytes).unwrap(), b"Hello World");
        // A second pass re-decodes the re-encoded bytes
        assert_eq!(u.decode().unwrap(), "Hello World");
        assert_eq!(u.state(), UnitState::Decoded);
    }

    #[test]
    fn test_base64_reencode_keeps_trailing_shape() {
        let mut u = unit("Content-Transfer-Encoding: base64\n", b"SGVsbG8gV29ybGQ=");
        u.decode().unwrap();
        u.set_text_content("Hi there").unwrap();
        let bytes = u.reencode();
        assert_eq!(bytes, b"SGkgdGhlcmU=");
    }

    #[test]
    fn test_empty_base64_reencodes_to_nothing() {
        let mut u = unit("Content-Transfer-Encoding: base64\n", b"");
        assert_eq!(u.decode().unwrap(), "");
        assert!(u.reencode().is_empty());
        assert_eq!(u.state(), UnitState::Reencoded);
        assert!(u.wire_bytes().is_empty());
    }

    #[test]
    fn test_reencode_raw_is_passthrough() {
        let mut u = unit("Content-Type: image/png\n", b"\x89PNG\r\n");
        assert!(!u.is_textual());
        assert_eq!(u.reencode(), b"\x89PNG\r\n");
        assert_eq!(u.state(), UnitState::Raw);
    }

    #[test]
    fn test_wire_bytes_follow_state() {
        let mut u = unit("", b"line one\n");
        assert_eq!(u.wire_bytes().as_ref(), b"line one\n");
        u.decode().unwrap();
        u.set_text_content("line two\n").unwrap();
        assert_eq!(u.wire_bytes().as_ref(), b"line two\n");
        u.reencode();
        assert_eq!(u.wire_bytes().as_ref(), b"line two\n");
    }

    #[test]
    fn test_apply_framing() {
        let mut u = unit(
            "Content-Type: text/plain; charset=us-ascii\nContent-Transfer-Encoding: 7bit\n",
            b"hello\n",
        );
        u.decode().unwrap();
        u.set_text_content("héllo\n").unwrap();
        u.reencode();

        let mut headers = HeaderMap::parse(
            b"Content-Type: text/plain; charset=us-ascii\nContent-Transfer-Encoding: 7bit\n",
        );
        u.apply_framing(&mut headers);
        assert_eq!(
            headers.get("Content-Type").as_deref(),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(headers.get("Content-Transfer-Encoding").as_deref(), Some("8bit"));
    }

    #[test]
    fn test_apply_framing_adds_missing_headers() {
        let mut u = unit("", b"=3Chtml=3E hello =C3=A9");
        assert_eq!(u.transfer_encoding(), TransferEncoding::QuotedPrintable);
        u.decode().unwrap();
        u.reencode();
        let mut headers = HeaderMap::new();
        u.apply_framing(&mut headers);
        assert_eq!(
            headers.get("Content-Type").as_deref(),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(
            headers.get("Content-Transfer-Encoding").as_deref(),
            Some("quoted-printable")
        );
    }

    #[test]
    fn test_conflict_recorded() {
        let u = unit("Content-Type: text/plain\n", b"<html><body>hi</body></html>");
        assert_eq!(u.content_type(), ContentType::PlainText);
        assert_eq!(
            u.diagnostics(),
            &[Diagnostic::ContentTypeConflict {
                header: ContentType::PlainText,
                body: ContentType::HtmlText,
            }]
        );
    }
}
