//! Integration tests for message parsing, detection, decoding and serialization.

use std::path::Path;

use spamprep::error::{DecodeError, ParseError};
use spamprep::model::content::{ContentType, TransferEncoding};
use spamprep::model::message::StructuredMessage;
use spamprep::model::payload::UnitState;
use spamprep::parser::header::decode_encoded_words;
use spamprep::parser::mime::MimeNode;
use spamprep::parser::patterns::{DetectionSource, Diagnostic, PatternCatalog};

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn read_fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

// ─── Test 1: Nested multipart → ordered units ───────────────────────

#[test]
fn test_parse_nested_multipart_units() {
    let message = StructuredMessage::parse(&read_fixture("multipart_mixed.eml")).unwrap();
    assert!(message.is_multipart());

    let units = message.units();
    assert_eq!(units.len(), 3, "plain, html and image parts");
    assert_eq!(units[0].content_type(), ContentType::PlainText);
    assert_eq!(units[0].transfer_encoding(), TransferEncoding::QuotedPrintable);
    assert_eq!(units[0].charset(), "windows-1252");
    assert_eq!(units[1].content_type(), ContentType::HtmlText);
    assert_eq!(units[1].transfer_encoding(), TransferEncoding::Base64);
    assert_eq!(units[2].media_type(), Some("image/png"));
    assert!(!units[2].is_textual());

    // Offsets point into the original bytes
    let raw = read_fixture("multipart_mixed.eml");
    for unit in units {
        assert_eq!(&raw[unit.span()], unit.raw());
    }

    match message.body() {
        MimeNode::Multipart(outer) => {
            assert_eq!(outer.boundary, "outer");
            assert_eq!(outer.parts.len(), 2);
            assert!(matches!(outer.parts[0].body, MimeNode::Multipart(_)));
            assert_eq!(message.body().leaves(), vec![0, 1, 2]);
        }
        MimeNode::Leaf(_) => panic!("expected a multipart body"),
    }
}

// ─── Test 2: Single-part message → one unit spanning the body ───────

#[test]
fn test_single_part_one_unit() {
    let raw = read_fixture("qp_html.eml");
    let message = StructuredMessage::parse(&raw).unwrap();
    assert!(!message.is_multipart());
    assert_eq!(message.units().len(), 1);

    let unit = &message.units()[0];
    let body_start = raw.windows(2).position(|w| w == b"\n\n").unwrap() + 2;
    assert_eq!(unit.span(), body_start..raw.len());
}

// ─── Test 3: Untouched messages serialize byte-for-byte ─────────────

#[test]
fn test_untouched_serialization_is_identical() {
    for name in [
        "multipart_mixed.eml",
        "qp_html.eml",
        "latin1_plain.eml",
        "broken_base64.eml",
        "mbox_entry.eml",
        "unknown_charset.eml",
    ] {
        let raw = read_fixture(name);
        let message = StructuredMessage::parse(&raw).unwrap();
        assert_eq!(message.serialize(), raw, "{name} changed on serialize");
    }
}

// ─── Test 4: QP Hello=20World decodes and re-encodes losslessly ─────

#[test]
fn test_quoted_printable_roundtrip() {
    let mut message = StructuredMessage::parse(&read_fixture("qp_html.eml")).unwrap();
    let text = message.units_mut()[0].decode().unwrap();
    assert!(text.starts_with("<html><body><p>Hello World</p>"));
    assert!(text.contains("bob@example.org only."));

    let encoded = message.units_mut()[0].reencode();
    let reparsed = StructuredMessage::parse(&message.serialize()).unwrap();
    let mut unit = reparsed.units()[0].clone();
    assert_eq!(unit.transfer_encoding(), TransferEncoding::QuotedPrintable);
    assert_eq!(unit.raw(), encoded.as_slice());
    assert_eq!(unit.decode().unwrap(), text);
}

// ─── Test 5: Round-trip keeps headers, unit count and text ──────────

#[test]
fn test_reencoded_message_reparses() {
    let raw = read_fixture("multipart_mixed.eml");
    let mut message = StructuredMessage::parse(&raw).unwrap();
    let summary = message.decode_all();
    assert_eq!((summary.decoded, summary.failed, summary.skipped), (2, 0, 1));
    let texts: Vec<Option<String>> = message
        .units()
        .iter()
        .map(|u| u.text().map(String::from))
        .collect();

    assert_eq!(message.reencode_all(), 2);
    let output = message.serialize();

    let mut reparsed = StructuredMessage::parse(&output).unwrap();
    assert_eq!(reparsed.headers().mapping(), message.headers().mapping());
    assert_eq!(reparsed.units().len(), message.units().len());
    reparsed.decode_all();
    for (unit, text) in reparsed.units().iter().zip(&texts) {
        assert_eq!(unit.text().map(String::from), *text);
    }
    // Re-encoded text parts now declare UTF-8; the image is untouched
    assert_eq!(reparsed.units()[0].charset(), "UTF-8");
    assert_eq!(reparsed.units()[2].raw(), message.units()[2].raw());
    assert_eq!(reparsed.units()[2].state(), UnitState::Raw);
}

// ─── Test 6: Independent parser agrees with our output ──────────────

#[test]
fn test_output_readable_by_mail_parser() {
    let mut message = StructuredMessage::parse(&read_fixture("multipart_mixed.eml")).unwrap();
    message.decode_all();
    message.reencode_all();
    let output = message.serialize();

    let parsed = mail_parser::MessageParser::default()
        .parse(output.as_slice())
        .expect("mail-parser accepts the output");
    assert_eq!(parsed.subject(), Some("¡Oferta para Alice!"));
    let text = parsed.body_text(0).expect("plain body");
    assert!(text.contains("tu café gratis"), "got: {text}");
    let html = parsed.body_html(0).expect("html body");
    assert!(html.contains("https://track.example/x?u=7"));
    assert_eq!(parsed.attachment_count(), 1);
}

// ─── Test 7: Charset conversion from ISO-8859-1 ─────────────────────

#[test]
fn test_latin1_decoding() {
    let mut message = StructuredMessage::parse(&read_fixture("latin1_plain.eml")).unwrap();
    let text = message.units_mut()[0].decode().unwrap();
    assert_eq!(
        text,
        "Hola José, visita www.tienda.example hoy.\nCafé y té con descuento.\n"
    );
    assert_eq!(message.subject().as_deref(), Some("Oferta especial para José"));
    assert_eq!(message.recipients()[0].display_name, "José García");

    // 8bit stays 8bit, charset becomes utf-8
    message.reencode_all();
    let output = String::from_utf8(message.serialize()).unwrap();
    assert!(output.contains("Content-Type: text/plain; charset=utf-8\n"));
    assert!(output.contains("Content-Transfer-Encoding: 8bit\n"));
    assert!(output.ends_with("Café y té con descuento.\n"));
}

// ─── Test 8: Partial failure stays on its unit ──────────────────────

#[test]
fn test_invalid_base64_unit_is_isolated() {
    let mut message = StructuredMessage::parse(&read_fixture("broken_base64.eml")).unwrap();
    let summary = message.decode_all();
    assert_eq!(summary.decoded, 1);
    assert_eq!(summary.failed, 1);

    let broken = &message.units()[0];
    assert_eq!(broken.state(), UnitState::Raw);
    assert!(broken.text().is_none());
    assert!(matches!(
        broken.diagnostics(),
        [Diagnostic::DecodeFailed { .. }]
    ));
    assert_eq!(
        message.units()[1].text(),
        Some("Please pay now, alice@example.com.")
    );
}

// ─── Test 9: Unknown charset → UnsupportedCharset ───────────────────

#[test]
fn test_unknown_charset_is_reported() {
    let mut message = StructuredMessage::parse(&read_fixture("unknown_charset.eml")).unwrap();
    let unit = &mut message.units_mut()[0];
    assert!(matches!(
        unit.diagnostics(),
        [Diagnostic::UnknownCharset { .. }]
    ));
    // Unknown labels fall back to UTF-8 and decode
    assert_eq!(unit.decode().unwrap(), "Qapla' dave@example.com\n");

    // An unresolvable override is a decode error
    let catalog = PatternCatalog::default().with_default_charset("x-nonexistent");
    let raw = b"Subject: no charset\n\nplain\n";
    let mut message = StructuredMessage::parse_with(raw, &catalog).unwrap();
    assert_eq!(
        message.units_mut()[0].decode(),
        Err(DecodeError::UnsupportedCharset("x-nonexistent".into()))
    );
}

// ─── Test 10: Mailbox envelope line survives ────────────────────────

#[test]
fn test_mbox_envelope_kept() {
    let raw = read_fixture("mbox_entry.eml");
    let mut message = StructuredMessage::parse(&raw).unwrap();
    assert_eq!(
        message.envelope().from_line_text().as_deref(),
        Some("bounce@relay.example Mon Jan  1 10:00:00 2024")
    );
    assert_eq!(message.subject().as_deref(), Some("Delivery notice"));

    message.decode_all();
    message.reencode_all();
    assert!(message
        .serialize()
        .starts_with(b"From bounce@relay.example Mon Jan  1 10:00:00 2024\nFrom: Relay"));
}

// ─── Test 11: Structural failures → ParseError::Malformed ───────────

#[test]
fn test_malformed_messages() {
    let missing = StructuredMessage::parse(&read_fixture("missing_boundary.eml"));
    assert!(matches!(missing, Err(ParseError::Malformed(_))));

    assert!(matches!(
        StructuredMessage::parse(b""),
        Err(ParseError::Malformed(_))
    ));
    assert!(matches!(
        StructuredMessage::parse(b"just some words\nwithout headers\n"),
        Err(ParseError::Malformed(_))
    ));
    assert!(matches!(
        StructuredMessage::parse(b"Content-Type: multipart/mixed\n\n--x\n\nbody\n--x--\n"),
        Err(ParseError::Malformed(_))
    ));
}

// ─── Test 12: Detection is header-first and deterministic ───────────

#[test]
fn test_detection_precedence() {
    let catalog = PatternCatalog::default();
    let html = b"<!DOCTYPE html><html><body>hi</body></html>";

    assert_eq!(
        catalog.detect_content_type(Some("text/plain"), html),
        ContentType::PlainText
    );
    assert_eq!(catalog.detect_content_type(None, html), ContentType::HtmlText);
    assert_eq!(catalog.detect_content_type(None, b"plain words"), ContentType::Undefined);

    let inspected = catalog.inspect_content_type(Some("text/plain"), html);
    assert_eq!(inspected.source, DetectionSource::Header);
    assert_eq!(inspected.conflict, Some(ContentType::HtmlText));

    for _ in 0..3 {
        assert_eq!(
            catalog.detect_transfer_encoding(Some("BASE64"), b"x"),
            TransferEncoding::Base64
        );
    }
    assert_eq!(catalog.detect_charset(None), "UTF-8");
    assert_eq!(
        catalog.detect_charset(Some("text/plain; charset=latin1")),
        "windows-1252"
    );
}

// ─── Test 13: Empty base64 parts survive a full pass ────────────────

#[test]
fn test_empty_base64_part_in_multipart() {
    let raw = b"Content-Type: multipart/mixed; boundary=b\n\n\
--b\nContent-Type: text/plain\nContent-Transfer-Encoding: base64\n\n\
\n--b\nContent-Type: text/plain\n\nhello\n--b--\n";
    let mut message = StructuredMessage::parse(raw).unwrap();
    assert_eq!(message.units().len(), 2);
    assert!(message.units()[0].raw().is_empty());

    let summary = message.decode_all();
    assert_eq!((summary.decoded, summary.failed), (2, 0));
    assert_eq!(message.reencode_all(), 2);

    let mut reparsed = StructuredMessage::parse(&message.serialize()).unwrap();
    assert_eq!(reparsed.units().len(), 2);
    reparsed.decode_all();
    assert_eq!(reparsed.units()[0].text(), Some(""));
    assert_eq!(reparsed.units()[1].text(), Some("hello"));
}

#[test]
fn test_empty_base64_single_part() {
    let raw = b"Subject: x\nContent-Transfer-Encoding: base64\n\n";
    let mut message = StructuredMessage::parse(raw).unwrap();
    assert_eq!(message.units().len(), 1);

    message.decode_all();
    assert_eq!(message.units()[0].text(), Some(""));
    assert_eq!(message.reencode_all(), 1);

    let output = message.serialize();
    let mut reparsed = StructuredMessage::parse(&output).unwrap();
    assert_eq!(reparsed.subject().as_deref(), Some("x"));
    reparsed.decode_all();
    assert_eq!(reparsed.units()[0].text(), Some(""));
}

// ─── Encoded-words ──────────────────────────────────────────────────

#[test]
fn test_decode_encoded_words_base64_utf8() {
    assert_eq!(
        decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="),
        "Hola mundo"
    );
}

#[test]
fn test_decode_encoded_words_q_iso8859() {
    assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
}

#[test]
fn test_decode_encoded_words_plain_passthrough() {
    assert_eq!(decode_encoded_words("Normal subject"), "Normal subject");
}
