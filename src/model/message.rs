//! A parsed message: header mapping, MIME part tree, and payload units.

use serde::Serialize;
use tracing::debug;

use crate::error::ParseError;
use crate::model::address::EmailAddress;
use crate::model::content::{ContentType, TransferEncoding};
use crate::model::headers::HeaderMap;
use crate::model::payload::{PayloadUnit, UnitState};
use crate::parser::codec::LineEnding;
use crate::parser::header::decode_encoded_words;
use crate::parser::mime::{self, Envelope, MimeNode, Multipart};
use crate::parser::patterns::{Diagnostic, PatternCatalog};

/// Headers whose addresses identify the recipients of a message.
pub const RECIPIENT_HEADERS: &[&str] = &["To", "Cc", "Delivered-To", "X-Original-To"];

/// A message split into headers and ordered payload units.
///
/// Serialization rebuilds the message from the header mapping and the part
/// tree; offsets recorded at parse time are informational only.
#[derive(Debug, Clone)]
pub struct StructuredMessage {
    envelope: Envelope,
    headers: HeaderMap,
    body: MimeNode,
    units: Vec<PayloadUnit>,
    line_ending: LineEnding,
}

/// Outcome of [`StructuredMessage::decode_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeSummary {
    pub decoded: usize,
    pub failed: usize,
    /// Non-textual units left as raw bytes.
    pub skipped: usize,
}

/// Per-unit description for reports.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub index: usize,
    pub media_type: Option<String>,
    pub content_type: ContentType,
    pub transfer_encoding: TransferEncoding,
    pub charset: String,
    pub state: UnitState,
    pub offset: usize,
    pub size: usize,
    pub textual: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl StructuredMessage {
    /// Parse with the default pattern catalog.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with(raw, &PatternCatalog::default())
    }

    pub fn parse_with(raw: &[u8], catalog: &PatternCatalog) -> Result<Self, ParseError> {
        let parsed = mime::parse_structure(raw, catalog)?;
        Ok(Self {
            envelope: parsed.envelope,
            headers: parsed.headers,
            body: parsed.body,
            units: parsed.units,
            line_ending: parsed.line_ending,
        })
    }

    // ── Headers ─────────────────────────────────────────────────

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Raw (unfolded, still encoded) value of the last `name` header.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }

    /// Set a header in place, or append it when absent.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.set(name, value);
    }

    pub fn subject(&self) -> Option<String> {
        self.header("Subject").map(|v| decode_encoded_words(&v))
    }

    pub fn thread_topic(&self) -> Option<String> {
        self.header("Thread-Topic").map(|v| decode_encoded_words(&v))
    }

    /// First mailbox of the `From` header.
    pub fn sender(&self) -> Option<EmailAddress> {
        let from = self.header("From")?;
        EmailAddress::parse_list(&decode_encoded_words(&from))
            .into_iter()
            .next()
    }

    /// Every mailbox in the recipient headers, in header order.
    pub fn recipients(&self) -> Vec<EmailAddress> {
        RECIPIENT_HEADERS
            .iter()
            .flat_map(|name| self.headers.get_all(name))
            .flat_map(|value| EmailAddress::parse_list(&decode_encoded_words(&value)))
            .collect()
    }

    // ── Structure ───────────────────────────────────────────────

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    pub fn body(&self) -> &MimeNode {
        &self.body
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, MimeNode::Multipart(_))
    }

    pub fn units(&self) -> &[PayloadUnit] {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut [PayloadUnit] {
        &mut self.units
    }

    pub fn unit_reports(&self) -> Vec<UnitReport> {
        self.units
            .iter()
            .enumerate()
            .map(|(index, unit)| UnitReport {
                index,
                media_type: unit.media_type().map(String::from),
                content_type: unit.content_type(),
                transfer_encoding: unit.transfer_encoding(),
                charset: unit.charset().to_string(),
                state: unit.state(),
                offset: unit.span().start,
                size: unit.raw().len(),
                textual: unit.is_textual(),
                diagnostics: unit.diagnostics().to_vec(),
            })
            .collect()
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Decode every textual unit. Failures stay on their unit.
    pub fn decode_all(&mut self) -> DecodeSummary {
        let mut summary = DecodeSummary::default();
        for (index, unit) in self.units.iter_mut().enumerate() {
            if !unit.is_textual() {
                debug!(index, media = unit.media_type(), "Leaving non-textual unit raw");
                summary.skipped += 1;
                continue;
            }
            match unit.decode() {
                Ok(_) => summary.decoded += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// Re-encode every unit holding text; returns how many were re-encoded.
    pub fn reencode_all(&mut self) -> usize {
        let mut count = 0;
        for unit in &mut self.units {
            if matches!(unit.state(), UnitState::Decoded | UnitState::Anonymized) {
                unit.reencode();
                count += 1;
            }
        }
        count
    }

    // ── Serialization ───────────────────────────────────────────

    /// Rebuild the message bytes: envelope, headers, and every unit in its
    /// current form inside the original boundary framing.
    pub fn serialize(&self) -> Vec<u8> {
        let le = self.line_ending;
        let body_len: usize = self.units.iter().map(|u| u.raw().len()).sum();
        let mut out = Vec::with_capacity(body_len + 4096);

        self.envelope.write_to(&mut out);
        match &self.body {
            MimeNode::Leaf(index) => {
                let mut headers = self.headers.clone();
                self.units[*index].apply_framing(&mut headers);
                headers.write_to(&mut out, le);
            }
            MimeNode::Multipart(_) => self.headers.write_to(&mut out, le),
        }
        out.extend_from_slice(le.as_bytes());
        self.write_node(&self.body, &mut out);
        out
    }

    fn write_node(&self, node: &MimeNode, out: &mut Vec<u8>) {
        match node {
            MimeNode::Leaf(index) => out.extend_from_slice(&self.units[*index].wire_bytes()),
            MimeNode::Multipart(multipart) => self.write_multipart(multipart, out),
        }
    }

    fn write_multipart(&self, multipart: &Multipart, out: &mut Vec<u8>) {
        let le = self.line_ending.as_bytes();
        let delimiter = format!("--{}", multipart.boundary);
        // The line break before a delimiter belongs to the delimiter
        let mut need_break = false;

        if let Some(preamble) = &multipart.preamble {
            out.extend_from_slice(preamble);
            need_break = true;
        }

        for part in &multipart.parts {
            if need_break {
                out.extend_from_slice(le);
            }
            out.extend_from_slice(delimiter.as_bytes());
            out.extend_from_slice(le);

            let headers = match &part.body {
                MimeNode::Leaf(index) if self.units[*index].is_rewritten() => {
                    let mut headers = part.headers.clone();
                    self.units[*index].apply_framing(&mut headers);
                    headers
                }
                _ => part.headers.clone(),
            };
            if !(part.headerless && headers.is_empty()) {
                headers.write_to(out, self.line_ending);
                out.extend_from_slice(le);
            }

            self.write_node(&part.body, out);
            need_break = true;
        }

        if let Some(epilogue) = &multipart.epilogue {
            if need_break {
                out.extend_from_slice(le);
            }
            out.extend_from_slice(delimiter.as_bytes());
            out.extend_from_slice(b"--");
            out.extend_from_slice(epilogue);
        }
    }
}
