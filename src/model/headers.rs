//! Ordered, case-insensitive header mapping.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::parser::codec::LineEnding;
use crate::parser::header::{decode_header_bytes, split_fields, unfold};

/// One header field as it appeared in the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderField {
    name: String,
    /// Everything after the colon, with folding kept as `\n` + whitespace.
    raw_value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: &str) -> Self {
        Self {
            name: name.into(),
            raw_value: format!(" {}", value.trim()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_value(&self) -> &str {
        &self.raw_value
    }

    /// The unfolded value.
    pub fn value(&self) -> String {
        unfold(&self.raw_value)
    }

    pub fn set_value(&mut self, value: &str) {
        self.raw_value = format!(" {}", value.trim());
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    fn write_to(&self, out: &mut Vec<u8>, line_ending: LineEnding) {
        out.extend_from_slice(self.name.as_bytes());
        out.push(b':');
        for (i, line) in self.raw_value.split('\n').enumerate() {
            if i > 0 {
                out.extend_from_slice(line_ending.as_bytes());
            }
            out.extend_from_slice(line.as_bytes());
        }
        out.extend_from_slice(line_ending.as_bytes());
    }
}

/// Header block of a message or MIME part.
///
/// Field order is preserved exactly. Lookups are case-insensitive and, when a
/// name occurs more than once, read the last occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderMap {
    fields: Vec<HeaderField>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw header block (without the terminating blank line).
    pub fn parse(block: &[u8]) -> Self {
        let text = decode_header_bytes(block);
        let fields = split_fields(&text)
            .into_iter()
            .map(|(name, raw_value)| HeaderField { name, raw_value })
            .collect();
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut HeaderField> {
        self.fields.iter_mut()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.is(name))
    }

    /// Unfolded value of the last field named `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.fields.iter().rev().find(|f| f.is(name)).map(HeaderField::value)
    }

    /// Unfolded values of every field named `name`, in message order.
    pub fn get_all(&self, name: &str) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.is(name))
            .map(HeaderField::value)
            .collect()
    }

    /// Set a header value.
    ///
    /// The last field with this name is rewritten in place; if there is none,
    /// the field is appended. Other fields never move.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().rev().find(|f| f.is(name)) {
            Some(field) => field.set_value(value),
            None => self.append(name, value),
        }
    }

    /// Append a field, even if one with the same name exists.
    pub fn append(&mut self, name: &str, value: &str) {
        self.fields.push(HeaderField::new(name, value));
    }

    /// Remove every field named `name`; returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| !f.is(name));
        before - self.fields.len()
    }

    /// Lowercased name → last unfolded value.
    pub fn mapping(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|f| (f.name.to_ascii_lowercase(), f.value()))
            .collect()
    }

    /// Write every field, each terminated by `line_ending`. The blank line
    /// separating headers from the body is not written.
    pub fn write_to(&self, out: &mut Vec<u8>, line_ending: LineEnding) {
        for field in &self.fields {
            field.write_to(out, line_ending);
        }
    }
}
