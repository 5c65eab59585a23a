//! MIME structure: envelope stripping, header/body split, and recursive
//! multipart splitting into a part tree whose leaves are payload units.

use std::ops::Range;

use tracing::{debug, warn};

use crate::error::ParseError;
use crate::model::headers::HeaderMap;
use crate::model::payload::PayloadUnit;
use crate::parser::codec::LineEnding;
use crate::parser::header::{header_param, is_header_line, media_type};
use crate::parser::patterns::{Diagnostic, PatternCatalog};

/// Maximum multipart nesting depth (adversarial input protection).
pub const MAX_DEPTH: usize = 10;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Bytes in front of the RFC 5322 message that are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// A UTF-8 byte-order mark preceded the message.
    pub bom: bool,
    /// Mailbox `From ` separator line, including its line terminator.
    pub from_line: Option<Vec<u8>>,
}

impl Envelope {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        if self.bom {
            out.extend_from_slice(UTF8_BOM);
        }
        if let Some(line) = &self.from_line {
            out.extend_from_slice(line);
        }
    }

    /// Sender and date text of the `From ` line, if any.
    pub fn from_line_text(&self) -> Option<String> {
        self.from_line.as_ref().map(|line| {
            String::from_utf8_lossy(&line[5..])
                .trim_end()
                .to_string()
        })
    }
}

/// Strip a BOM and a mailbox `From ` line; returns the envelope and the
/// offset at which the message itself starts.
pub fn strip_envelope(data: &[u8]) -> (Envelope, usize) {
    let mut envelope = Envelope::default();
    let mut offset = 0;

    if data.starts_with(UTF8_BOM) {
        envelope.bom = true;
        offset = UTF8_BOM.len();
    }

    let rest = &data[offset..];
    if rest.starts_with(b"From ") {
        let line_len = rest
            .iter()
            .position(|&b| b == b'\n')
            .map_or(rest.len(), |p| p + 1);
        envelope.from_line = Some(rest[..line_len].to_vec());
        offset += line_len;
    }

    (envelope, offset)
}

/// Locate the blank line that ends a header block.
///
/// Returns `(header_end, body_start)`: the header block is
/// `data[..header_end]` and the body `data[body_start..]`. When there is no
/// blank line the whole input is headers and the body is empty.
pub fn split_header_body(data: &[u8]) -> (usize, usize) {
    let mut pos = 0;
    while pos < data.len() {
        let (line, next) = next_line(data, pos);
        if line.is_empty() {
            return (pos, next);
        }
        pos = next;
    }
    (data.len(), data.len())
}

/// The line starting at `pos` without its terminator, and the offset of the
/// following line.
fn next_line(data: &[u8], pos: usize) -> (&[u8], usize) {
    let (end, next) = match data[pos..].iter().position(|&b| b == b'\n') {
        Some(p) => (pos + p, pos + p + 1),
        None => (data.len(), data.len()),
    };
    let line = &data[pos..end];
    (line.strip_suffix(b"\r").unwrap_or(line), next)
}

/// Body structure of a message or part.
#[derive(Debug, Clone)]
pub enum MimeNode {
    /// A leaf: index into the message's unit list.
    Leaf(usize),
    Multipart(Multipart),
}

/// A multipart body split on its boundary.
#[derive(Debug, Clone)]
pub struct Multipart {
    pub boundary: String,
    /// Text before the first delimiter; `None` when the body starts with one.
    pub preamble: Option<Vec<u8>>,
    pub parts: Vec<MimePart>,
    /// Everything after the closing `--boundary--`, including its line
    /// terminator. `None` when the closing delimiter is missing.
    pub epilogue: Option<Vec<u8>>,
}

/// One part of a multipart body: its own headers plus its body.
#[derive(Debug, Clone)]
pub struct MimePart {
    pub headers: HeaderMap,
    /// The part had no header block at all (not even an empty one).
    pub headerless: bool,
    pub body: MimeNode,
}

impl MimeNode {
    /// Indices of every leaf unit, in message order.
    pub fn leaves(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<usize>) {
        match self {
            Self::Leaf(index) => out.push(*index),
            Self::Multipart(multipart) => {
                for part in &multipart.parts {
                    part.body.collect_leaves(out);
                }
            }
        }
    }
}

/// Everything [`parse_structure`] recovers from a raw message.
#[derive(Debug)]
pub struct ParsedStructure {
    pub envelope: Envelope,
    pub headers: HeaderMap,
    pub body: MimeNode,
    pub units: Vec<PayloadUnit>,
    pub line_ending: LineEnding,
}

/// Split a raw message into headers, a part tree and payload units.
///
/// Fails when there is no header block, or when the top-level multipart
/// body has no usable boundary. Nested multiparts with a missing boundary
/// degrade to a single leaf carrying a diagnostic.
pub fn parse_structure(
    raw: &[u8],
    catalog: &PatternCatalog,
) -> Result<ParsedStructure, ParseError> {
    let (envelope, start) = strip_envelope(raw);
    let message = &raw[start..];

    if message.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Malformed("empty message".into()));
    }
    let (first_line, _) = next_line(message, 0);
    if !is_header_line(first_line) {
        return Err(ParseError::Malformed(
            "message does not start with a header field".into(),
        ));
    }

    let line_ending = LineEnding::detect(message);
    let (header_end, body_start) = split_header_body(message);
    let headers = HeaderMap::parse(&message[..header_end]);

    let mut builder = TreeBuilder {
        raw,
        catalog,
        line_ending,
        units: Vec::new(),
    };
    let body_range = start + body_start..raw.len();

    let body = match multipart_boundary(&headers) {
        Some(Ok(boundary)) => match builder.split_multipart(&boundary, body_range, 1) {
            Some(multipart) => MimeNode::Multipart(multipart),
            None => {
                return Err(ParseError::Malformed(format!(
                    "multipart boundary {boundary:?} not found in body"
                )));
            }
        },
        Some(Err(media)) => {
            return Err(ParseError::Malformed(format!(
                "{media} message without a boundary parameter"
            )));
        }
        None => builder.leaf(&headers, body_range),
    };

    debug!(
        headers = headers.len(),
        units = builder.units.len(),
        "Parsed message structure"
    );

    Ok(ParsedStructure {
        envelope,
        headers,
        body,
        units: builder.units,
        line_ending,
    })
}

/// `None` for non-multipart content, `Some(Err(media_type))` for a
/// multipart declaration without a boundary.
fn multipart_boundary(headers: &HeaderMap) -> Option<Result<String, String>> {
    let value = headers.get("Content-Type")?;
    let media = media_type(&value)?;
    if !media.starts_with("multipart/") {
        return None;
    }
    Some(
        header_param(&value, "boundary")
            .filter(|b| !b.is_empty())
            .ok_or(media),
    )
}

struct TreeBuilder<'a> {
    raw: &'a [u8],
    catalog: &'a PatternCatalog,
    line_ending: LineEnding,
    units: Vec<PayloadUnit>,
}

/// A boundary delimiter line inside a multipart body.
struct Delimiter {
    line_start: usize,
    /// Just past `--boundary` (or `--boundary--`).
    marker_end: usize,
    next_line: usize,
    closing: bool,
}

impl TreeBuilder<'_> {
    fn leaf(&mut self, headers: &HeaderMap, range: Range<usize>) -> MimeNode {
        let unit = PayloadUnit::new(
            self.raw[range.clone()].to_vec(),
            range,
            headers,
            self.catalog,
            self.line_ending,
        );
        self.units.push(unit);
        MimeNode::Leaf(self.units.len() - 1)
    }

    /// Split `range` on `boundary`. `None` when no delimiter line is found.
    fn split_multipart(
        &mut self,
        boundary: &str,
        range: Range<usize>,
        depth: usize,
    ) -> Option<Multipart> {
        let raw = self.raw;
        let body = &raw[range.clone()];
        let delimiters = find_delimiters(body, boundary);
        let first = delimiters.first()?;

        let preamble = (first.line_start > 0)
            .then(|| body[..before_line_break(body, first.line_start, 0)].to_vec());

        let mut parts = Vec::new();
        let mut epilogue = None;
        for (i, delim) in delimiters.iter().enumerate() {
            if delim.closing {
                epilogue = Some(body[delim.marker_end..].to_vec());
                break;
            }
            let part_end = match delimiters.get(i + 1) {
                Some(next) => before_line_break(body, next.line_start, delim.next_line),
                None => body.len(),
            };
            let part_range = range.start + delim.next_line..range.start + part_end;
            parts.push(self.part(part_range, depth));
        }

        Some(Multipart {
            boundary: boundary.to_string(),
            preamble,
            parts,
            epilogue,
        })
    }

    fn part(&mut self, range: Range<usize>, depth: usize) -> MimePart {
        let raw = self.raw;
        let data = &raw[range.clone()];
        let (first_line, first_next) = if data.is_empty() {
            (&data[..0], 0)
        } else {
            next_line(data, 0)
        };

        let (headers, headerless, body_start) = if first_line.is_empty() {
            (HeaderMap::new(), false, first_next)
        } else if is_header_line(first_line) {
            let (header_end, body_start) = split_header_body(data);
            (HeaderMap::parse(&data[..header_end]), false, body_start)
        } else {
            (HeaderMap::new(), true, 0)
        };
        let body_range = range.start + body_start..range.end;

        let body = match multipart_boundary(&headers) {
            Some(Ok(boundary)) if depth < MAX_DEPTH => {
                match self.split_multipart(&boundary, body_range.clone(), depth + 1) {
                    Some(multipart) => MimeNode::Multipart(multipart),
                    None => {
                        warn!(
                            boundary = %boundary,
                            offset = body_range.start,
                            "Nested boundary not found"
                        );
                        let node = self.leaf(&headers, body_range);
                        self.diagnose_last(Diagnostic::MissingBoundary { boundary });
                        node
                    }
                }
            }
            Some(Ok(_)) => {
                warn!(depth, offset = body_range.start, "Multipart nesting limit reached");
                let node = self.leaf(&headers, body_range);
                self.diagnose_last(Diagnostic::DepthLimitReached);
                node
            }
            Some(Err(media)) => {
                warn!(
                    media = %media,
                    offset = body_range.start,
                    "Nested multipart without boundary"
                );
                let node = self.leaf(&headers, body_range);
                self.diagnose_last(Diagnostic::MissingBoundary {
                    boundary: String::new(),
                });
                node
            }
            None => self.leaf(&headers, body_range),
        };

        MimePart {
            headers,
            headerless,
            body,
        }
    }

    fn diagnose_last(&mut self, diagnostic: Diagnostic) {
        if let Some(unit) = self.units.last_mut() {
            unit.push_diagnostic(diagnostic);
        }
    }
}

/// Scan for `--boundary` lines; stops after the closing `--boundary--`.
fn find_delimiters(body: &[u8], boundary: &str) -> Vec<Delimiter> {
    let marker = format!("--{boundary}");
    let marker = marker.as_bytes();
    let mut delimiters = Vec::new();
    let mut pos = 0;

    while pos < body.len() {
        let (line, next) = next_line(body, pos);
        if let Some(rest) = line.strip_prefix(marker) {
            let (closing, rest) = match rest.strip_prefix(b"--") {
                Some(after) => (true, after),
                None => (false, rest),
            };
            // Transport padding is allowed after the delimiter
            if rest.iter().all(|&b| b == b' ' || b == b'\t') {
                delimiters.push(Delimiter {
                    line_start: pos,
                    marker_end: pos + marker.len() + if closing { 2 } else { 0 },
                    next_line: next,
                    closing,
                });
                if closing {
                    break;
                }
            }
        }
        pos = next;
    }

    delimiters
}

/// Offset of the line break that precedes the line at `line_start`, not
/// going below `floor`. The break belongs to the following delimiter.
fn before_line_break(body: &[u8], line_start: usize, floor: usize) -> usize {
    let mut end = line_start;
    if end > floor && body[end - 1] == b'\n' {
        end -= 1;
        if end > floor && body[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}
