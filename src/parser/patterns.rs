//! Pattern-based detection of content type, transfer encoding and charset.
//!
//! Headers in bulk mail are frequently missing or wrong, so every unit is
//! classified from two sources: the declared header value, recognized with a
//! compiled pattern, and the body bytes, run through an ordered list of
//! sniffers. A recognized header always wins; a disagreeing body sniff is
//! reported as a conflict so callers can record it.
//!
//! All detection here is pure: no logging, no I/O, no shared state.

use once_cell::sync::Lazy;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use serde::Serialize;

use crate::model::content::{ContentType, TransferEncoding};
use crate::parser::codec::{self, find_invalid_qp_escape};
use crate::parser::header::header_param;

/// A body sniffer: inspects raw payload bytes and either recognizes a value
/// or declines with `None`. Sniffers never fail.
pub type BodyMatcher<T> = fn(&[u8]) -> Option<T>;

/// Only this many leading bytes are inspected by body sniffers.
const SNIFF_LIMIT: usize = 64 * 1024;

/// Charset assumed when nothing else is known.
pub const DEFAULT_CHARSET: &str = "UTF-8";

static CONTENT_TYPE_DECL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)^\s*"?\s*text\s*/\s*(plain|html)\b"#).unwrap());

static TRANSFER_ENCODING_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*"?\s*(base64|quoted-printable|7bit|8bit|binary)\b"#).unwrap()
});

/// Document-level markup, also in its quoted-printable mangled form (`=3C`).
static HTML_DOCUMENT: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r"(?i)(?:<|=3C)\s*(?:!doctype\s+html|html\b|head\b|body\b)").unwrap()
});

static HTML_TAG: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r"(?i)<\s*/?\s*(?:p|div|br|table|tr|td|span|font|img|a\s+href|center|b|i|strong)\b[^>]*>")
        .unwrap()
});

/// How many common tags a body needs before it counts as a markup fragment.
const HTML_TAG_THRESHOLD: usize = 3;

/// Where a detected value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Header,
    Body,
    Fallback,
}

/// Outcome of a detection with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection<T> {
    pub value: T,
    pub source: DetectionSource,
    /// Body-sniffed value that disagreed with the declared header.
    pub conflict: Option<T>,
}

/// Observations recorded on a payload unit during parse and decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    ContentTypeConflict {
        header: ContentType,
        body: ContentType,
    },
    TransferEncodingConflict {
        header: TransferEncoding,
        body: TransferEncoding,
    },
    UnrecognizedContentType {
        value: String,
    },
    UnrecognizedTransferEncoding {
        value: String,
    },
    UnknownCharset {
        label: String,
    },
    MissingBoundary {
        boundary: String,
    },
    DepthLimitReached,
    DecodeFailed {
        reason: String,
    },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentTypeConflict { header, body } => {
                write!(f, "header declares {header} but body looks like {body}")
            }
            Self::TransferEncodingConflict { header, body } => {
                write!(f, "header declares {header} encoding but body looks like {body}")
            }
            Self::UnrecognizedContentType { value } => {
                write!(f, "unrecognized Content-Type {value:?}")
            }
            Self::UnrecognizedTransferEncoding { value } => {
                write!(f, "unrecognized Content-Transfer-Encoding {value:?}")
            }
            Self::UnknownCharset { label } => {
                write!(f, "unknown charset {label:?}, assuming {DEFAULT_CHARSET}")
            }
            Self::MissingBoundary { boundary } => {
                write!(f, "boundary {boundary:?} never appears in the body")
            }
            Self::DepthLimitReached => f.write_str("multipart nesting too deep"),
            Self::DecodeFailed { reason } => write!(f, "decode failed: {reason}"),
        }
    }
}

/// The set of patterns and sniffers used to classify payload units.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    content_type_matchers: Vec<BodyMatcher<ContentType>>,
    transfer_encoding_matchers: Vec<BodyMatcher<TransferEncoding>>,
    default_charset: Option<String>,
}

impl Default for PatternCatalog {
    fn default() -> Self {
        Self {
            content_type_matchers: vec![sniff_html],
            transfer_encoding_matchers: vec![sniff_base64, sniff_quoted_printable],
            default_charset: None,
        }
    }
}

impl PatternCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a content-type sniffer; sniffers run in insertion order.
    pub fn with_content_type_matcher(mut self, matcher: BodyMatcher<ContentType>) -> Self {
        self.content_type_matchers.push(matcher);
        self
    }

    /// Append a transfer-encoding sniffer; sniffers run in insertion order.
    pub fn with_transfer_encoding_matcher(
        mut self,
        matcher: BodyMatcher<TransferEncoding>,
    ) -> Self {
        self.transfer_encoding_matchers.push(matcher);
        self
    }

    /// Charset assumed for units that declare none.
    ///
    /// The label is not validated here; an unresolvable label surfaces as
    /// `DecodeError::UnsupportedCharset` when the unit is decoded.
    pub fn with_default_charset(mut self, label: impl Into<String>) -> Self {
        self.default_charset = Some(label.into());
        self
    }

    pub fn default_charset(&self) -> Option<&str> {
        self.default_charset.as_deref()
    }

    pub fn detect_content_type(&self, header: Option<&str>, body: &[u8]) -> ContentType {
        self.inspect_content_type(header, body).value
    }

    pub fn detect_transfer_encoding(&self, header: Option<&str>, body: &[u8]) -> TransferEncoding {
        self.inspect_transfer_encoding(header, body).value
    }

    pub fn detect_charset(&self, header: Option<&str>) -> String {
        self.inspect_charset(header).value
    }

    /// Classify content type from a `Content-Type` value and the raw body.
    pub fn inspect_content_type(
        &self,
        header: Option<&str>,
        body: &[u8],
    ) -> Detection<ContentType> {
        let declared = header.and_then(recognize_content_type);
        let sniffed = run_matchers(&self.content_type_matchers, body);
        resolve(declared, sniffed, ContentType::Undefined)
    }

    /// Classify transfer encoding from a `Content-Transfer-Encoding` value and
    /// the raw body.
    pub fn inspect_transfer_encoding(
        &self,
        header: Option<&str>,
        body: &[u8],
    ) -> Detection<TransferEncoding> {
        let declared = header.and_then(recognize_transfer_encoding);
        let sniffed = run_matchers(&self.transfer_encoding_matchers, body);
        resolve(declared, sniffed, TransferEncoding::Identity)
    }

    /// Resolve the charset from a `Content-Type` value.
    ///
    /// Returns the canonical encoding name for a recognized `charset`
    /// parameter, the configured default when the parameter is absent, and
    /// UTF-8 when the label is unknown.
    pub fn inspect_charset(&self, header: Option<&str>) -> Detection<String> {
        let label = header.and_then(|value| header_param(value, "charset"));
        match label {
            Some(label) => match codec::resolve_charset(&label) {
                Ok(encoding) => Detection {
                    value: encoding.name().to_string(),
                    source: DetectionSource::Header,
                    conflict: None,
                },
                Err(_) => Detection {
                    value: DEFAULT_CHARSET.to_string(),
                    source: DetectionSource::Fallback,
                    conflict: None,
                },
            },
            None => Detection {
                value: self.default_charset().unwrap_or(DEFAULT_CHARSET).to_string(),
                source: DetectionSource::Fallback,
                conflict: None,
            },
        }
    }
}

fn run_matchers<T>(matchers: &[BodyMatcher<T>], body: &[u8]) -> Option<T> {
    let window = &body[..body.len().min(SNIFF_LIMIT)];
    matchers.iter().find_map(|matcher| matcher(window))
}

fn resolve<T: Copy + PartialEq>(
    declared: Option<T>,
    sniffed: Option<T>,
    fallback: T,
) -> Detection<T> {
    match (declared, sniffed) {
        (Some(value), sniffed) => Detection {
            value,
            source: DetectionSource::Header,
            conflict: sniffed.filter(|s| *s != value),
        },
        (None, Some(value)) => Detection {
            value,
            source: DetectionSource::Body,
            conflict: None,
        },
        (None, None) => Detection {
            value: fallback,
            source: DetectionSource::Fallback,
            conflict: None,
        },
    }
}

/// Recognize a `Content-Type` declaration. Only text types map to a variant.
pub fn recognize_content_type(value: &str) -> Option<ContentType> {
    let caps = CONTENT_TYPE_DECL.captures(value)?;
    match caps[1].to_ascii_lowercase().as_str() {
        "plain" => Some(ContentType::PlainText),
        "html" => Some(ContentType::HtmlText),
        _ => None,
    }
}

/// Recognize a `Content-Transfer-Encoding` declaration.
pub fn recognize_transfer_encoding(value: &str) -> Option<TransferEncoding> {
    let caps = TRANSFER_ENCODING_DECL.captures(value)?;
    match caps[1].to_ascii_lowercase().as_str() {
        "base64" => Some(TransferEncoding::Base64),
        "quoted-printable" => Some(TransferEncoding::QuotedPrintable),
        _ => Some(TransferEncoding::Identity),
    }
}

// ── Default body sniffers ───────────────────────────────────────

/// Markup: a document-level tag, or several common inline tags.
pub fn sniff_html(body: &[u8]) -> Option<ContentType> {
    let tags = HTML_TAG.find_iter(body).take(HTML_TAG_THRESHOLD).count();
    if HTML_DOCUMENT.is_match(body) || tags >= HTML_TAG_THRESHOLD {
        Some(ContentType::HtmlText)
    } else {
        None
    }
}

/// Base64: every non-empty line is made of complete 4-character groups from
/// the base64 alphabet, with padding only at the very end.
pub fn sniff_base64(body: &[u8]) -> Option<TransferEncoding> {
    let lines: Vec<&[u8]> = body
        .split(|&b| b == b'\n')
        .map(|line| {
            let end = line
                .iter()
                .rposition(|b| !b.is_ascii_whitespace())
                .map_or(0, |p| p + 1);
            &line[..end]
        })
        .filter(|line| !line.is_empty())
        .collect();

    let (last, rest) = lines.split_last()?;
    let total: usize = lines.iter().map(|l| l.len()).sum();
    if total < 16 || total % 4 != 0 || rest.iter().any(|l| l.len() % 4 != 0) {
        return None;
    }

    let is_alphabet = |b: &u8| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/';
    if !rest.iter().all(|l| l.iter().all(is_alphabet)) {
        return None;
    }
    let data_len = last.iter().position(|&b| b == b'=').unwrap_or(last.len());
    if !last[..data_len].iter().all(is_alphabet)
        || !last[data_len..].iter().all(|&b| b == b'=')
        || last.len() - data_len > 2
    {
        return None;
    }

    // Long runs of letters alone are more likely words than base64
    let has_marker = lines
        .iter()
        .flat_map(|l| l.iter())
        .any(|&b| b.is_ascii_digit() || matches!(b, b'+' | b'/' | b'='));
    has_marker.then_some(TransferEncoding::Base64)
}

/// Quoted-printable: at least one hex escape or soft line break, and no `=`
/// that is neither.
pub fn sniff_quoted_printable(body: &[u8]) -> Option<TransferEncoding> {
    if find_invalid_qp_escape(body).is_some() {
        return None;
    }
    let has_escape = body.windows(3).any(|w| {
        w[0] == b'='
            && ((w[1].is_ascii_hexdigit() && w[2].is_ascii_hexdigit())
                || w[1] == b'\n'
                || (w[1] == b'\r' && w[2] == b'\n'))
    });
    has_escape.then_some(TransferEncoding::QuotedPrintable)
}
