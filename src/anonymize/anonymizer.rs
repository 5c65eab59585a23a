//! Replace sensitive spans in a parsed message with store tokens.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::anonymize::rules::{select_non_overlapping, Blocklist, MessageRules, SensitiveClass};
use crate::anonymize::store::AnonymizationStore;
use crate::model::message::StructuredMessage;
use crate::parser::header::{decode_encoded_words, encode_header_value};

/// Anything shaped like a token `SensitiveClass::render_token` produces.
static TOKEN_SHAPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"anon-[0-9a-f]{10,}@example\.invalid",
        r"|https://anon-[0-9a-f]{10,}\.example\.invalid/",
        r"|\b(?:NAME|PHONE|ANON)_[0-9a-f]{10,}\b",
    ))
    .unwrap()
});

/// What one [`Anonymizer::anonymize`] call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnonymizeReport {
    /// Units whose text was replaced and re-encoded.
    pub units_modified: usize,
    /// Units without decoded text, left untouched.
    pub units_skipped: usize,
    pub headers_modified: usize,
    pub substitutions: usize,
    pub by_class: BTreeMap<SensitiveClass, usize>,
}

impl AnonymizeReport {
    /// Add the counts of `other` to this report.
    pub fn merge(&mut self, other: &AnonymizeReport) {
        self.units_modified += other.units_modified;
        self.units_skipped += other.units_skipped;
        self.headers_modified += other.headers_modified;
        self.substitutions += other.substitutions;
        for (class, count) in &other.by_class {
            *self.by_class.entry(*class).or_default() += count;
        }
    }
}

/// Applies blocklist rules to messages, drawing tokens from a shared store.
///
/// Cheap to clone; every clone issues tokens from the same store.
#[derive(Debug, Clone)]
pub struct Anonymizer {
    store: Arc<AnonymizationStore>,
}

impl Anonymizer {
    pub fn new(store: Arc<AnonymizationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<AnonymizationStore> {
        &self.store
    }

    /// Anonymize the selected header fields and every unit holding decoded
    /// text. Modified units are re-encoded before this returns; units without
    /// text pass through unmodified.
    pub fn anonymize(
        &self,
        message: &mut StructuredMessage,
        blocklist: &Blocklist,
    ) -> AnonymizeReport {
        // Recipients are read before any header is rewritten
        let rules = MessageRules::for_message(blocklist, message);
        let mut report = AnonymizeReport::default();

        for field in message.headers_mut().iter_mut() {
            if !blocklist.anonymizes_header(field.name()) {
                continue;
            }
            let decoded = decode_encoded_words(&field.value());
            if let Some(replaced) = self.substitute(&decoded, &rules, &mut report) {
                debug!(header = field.name(), "Anonymized header field");
                field.set_value(&encode_header_value(&replaced));
                report.headers_modified += 1;
            }
        }

        for (index, unit) in message.units_mut().iter_mut().enumerate() {
            let Some(text) = unit.text().map(str::to_owned) else {
                report.units_skipped += 1;
                continue;
            };
            let Some(replaced) = self.substitute(&text, &rules, &mut report) else {
                continue;
            };
            if let Err(e) = unit.set_text_content(replaced) {
                warn!(index, error = %e, "Skipping unit");
                continue;
            }
            unit.reencode();
            report.units_modified += 1;
        }

        debug!(
            substitutions = report.substitutions,
            units = report.units_modified,
            headers = report.headers_modified,
            "Anonymized message"
        );
        report
    }

    /// Replace every selected candidate in `text`, left to right. Returns
    /// `None` when nothing matched.
    fn substitute(
        &self,
        text: &str,
        rules: &MessageRules<'_>,
        report: &mut AnonymizeReport,
    ) -> Option<String> {
        let issued = self.issued_token_spans(text);
        let candidates = rules
            .candidates(text)
            .into_iter()
            .filter(|c| !issued.iter().any(|t| c.start < t.end && t.start < c.end))
            .collect();
        let selected = select_non_overlapping(candidates);
        if selected.is_empty() {
            return None;
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for candidate in &selected {
            out.push_str(&text[cursor..candidate.start]);
            out.push_str(&self.store.token_for_class(candidate.class, &candidate.key));
            cursor = candidate.end;
            *report.by_class.entry(candidate.class).or_default() += 1;
        }
        out.push_str(&text[cursor..]);
        report.substitutions += selected.len();
        Some(out)
    }

    /// Spans of tokens this store already issued; never replaced again.
    fn issued_token_spans(&self, text: &str) -> Vec<Range<usize>> {
        TOKEN_SHAPED
            .find_iter(text)
            .filter(|m| self.store.is_token(m.as_str()))
            .map(|m| m.range())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::payload::UnitState;

    const PLAIN: &str = "From: Shop <deals@shop.example>\n\
To: Alice Smith <alice@example.com>\n\
Subject: Offer for Alice\n\
Content-Type: text/plain; charset=utf-8\n\
\n\
Hello Alice, reply to alice@example.com today.\n";

    fn anonymizer() -> Anonymizer {
        Anonymizer::new(Arc::new(AnonymizationStore::new()))
    }

    fn blocklist() -> Blocklist {
        Blocklist::default().with_headers(vec!["To".into(), "Subject".into()])
    }

    #[test]
    fn test_anonymize_body_and_headers() {
        let anonymizer = anonymizer();
        let mut message = StructuredMessage::parse(PLAIN.as_bytes()).unwrap();
        message.decode_all();

        let report = anonymizer.anonymize(&mut message, &blocklist());
        assert_eq!(report.units_modified, 1);
        assert_eq!(report.headers_modified, 2);
        assert_eq!(report.by_class[&SensitiveClass::Email], 2);

        let email = anonymizer
            .store()
            .token_for_class(SensitiveClass::Email, "alice@example.com");
        let name = anonymizer
            .store()
            .token_for_class(SensitiveClass::Name, "alice");

        let unit = &message.units()[0];
        assert_eq!(unit.state(), UnitState::Reencoded);
        assert_eq!(
            unit.text(),
            Some(format!("Hello {name}, reply to {email} today.\n").as_str())
        );
        assert_eq!(message.subject(), Some(format!("Offer for {name}")));
        assert!(message.header("To").unwrap().contains(&email));
        // Sender is not a recipient and keeps its address
        assert_eq!(
            message.header("From").as_deref(),
            Some("Shop <deals@shop.example>")
        );
    }

    #[test]
    fn test_same_address_same_token_across_messages() {
        let anonymizer = anonymizer();
        let blocklist = Blocklist::new(&[SensitiveClass::Email]).matching_all_addresses(true);

        let mut first = StructuredMessage::parse(
            b"To: x@y.example\n\nContact alice@example.com\n",
        )
        .unwrap();
        let mut second = StructuredMessage::parse(
            b"To: x@y.example\n\nFrom alice@example.com and bob@example.com\n",
        )
        .unwrap();
        first.decode_all();
        second.decode_all();
        anonymizer.anonymize(&mut first, &blocklist);
        anonymizer.anonymize(&mut second, &blocklist);

        let alice = anonymizer
            .store()
            .token_for_class(SensitiveClass::Email, "alice@example.com");
        let bob = anonymizer
            .store()
            .token_for_class(SensitiveClass::Email, "bob@example.com");
        assert_ne!(alice, bob);
        assert_eq!(
            first.units()[0].text(),
            Some(format!("Contact {alice}\n").as_str())
        );
        assert_eq!(
            second.units()[0].text(),
            Some(format!("From {alice} and {bob}\n").as_str())
        );
    }

    #[test]
    fn test_case_variants_are_distinct_originals() {
        let anonymizer = anonymizer();
        let blocklist = Blocklist::new(&[SensitiveClass::Email]).matching_all_addresses(true);
        let mut message = StructuredMessage::parse(
            b"To: x@y.example\n\nAlice@Example.com alice@example.com\n",
        )
        .unwrap();
        message.decode_all();
        anonymizer.anonymize(&mut message, &blocklist);

        let store = anonymizer.store();
        let upper = store.token_for_class(SensitiveClass::Email, "Alice@Example.com");
        let lower = store.token_for_class(SensitiveClass::Email, "alice@example.com");
        assert_ne!(upper, lower);
        assert_eq!(
            message.units()[0].text(),
            Some(format!("{upper} {lower}\n").as_str())
        );
        // The log records the text as it appeared
        let originals: Vec<String> = store.snapshot().into_iter().map(|(o, _)| o).collect();
        assert_eq!(originals, vec!["Alice@Example.com", "alice@example.com"]);
    }

    #[test]
    fn test_undecoded_units_pass_through() {
        let anonymizer = anonymizer();
        let mut message = StructuredMessage::parse(PLAIN.as_bytes()).unwrap();
        // Not decoded: nothing to scan
        let report = anonymizer.anonymize(&mut message, &Blocklist::default());
        assert_eq!(report.units_skipped, 1);
        assert_eq!(report.units_modified, 0);
        assert_eq!(message.serialize(), PLAIN.as_bytes());
    }

    #[test]
    fn test_issued_tokens_are_not_rescanned() {
        let anonymizer = anonymizer();
        let blocklist = Blocklist::new(&[SensitiveClass::Email, SensitiveClass::Phone])
            .matching_all_addresses(true);

        let mut message =
            StructuredMessage::parse(b"To: x@y.example\n\nWrite to carol@example.com\n").unwrap();
        message.decode_all();
        anonymizer.anonymize(&mut message, &blocklist);
        let once = message.units()[0].text().map(str::to_owned);

        // A second pass re-decodes the re-encoded bytes and finds only tokens
        message.decode_all();
        let report = anonymizer.anonymize(&mut message, &blocklist);
        assert_eq!(report.substitutions, 0);
        assert_eq!(message.units()[0].text().map(str::to_owned), once);
        assert_eq!(anonymizer.store().len(), 1);
    }

    #[test]
    fn test_report_merge() {
        let mut total = AnonymizeReport::default();
        let mut one = AnonymizeReport {
            units_modified: 1,
            substitutions: 2,
            ..Default::default()
        };
        one.by_class.insert(SensitiveClass::Name, 2);
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.units_modified, 2);
        assert_eq!(total.substitutions, 4);
        assert_eq!(total.by_class[&SensitiveClass::Name], 4);
    }
}
