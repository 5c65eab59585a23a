//! RFC 5322 header handling: field splitting, unfolding, parameters, and
//! RFC 2047 encoded-words in both directions.

use base64::Engine;
use tracing::{debug, warn};

use crate::parser::codec::LENIENT_BASE64;

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    // Strip BOM if present
    let bytes = bytes.strip_prefix(&[0xEF_u8, 0xBB, 0xBF][..]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Split a header block into `(name, raw_value)` pairs.
///
/// The raw value is everything after the colon. Continuation lines are kept
/// with their leading whitespace and joined with `\n`, so the original folding
/// can be written back. `\r` line terminators are dropped.
pub fn split_fields(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation line
            if let Some(last) = result.last_mut() {
                last.1.push('\n');
                last.1.push_str(line);
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim_end().to_string();
            let value = line[colon_pos + 1..].to_string();
            result.push((name, value));
        } else {
            debug!(line = line, "Skipping header line without a colon");
        }
    }

    result
}

/// Whether a line looks like the start of a header field (`Name: value`).
pub fn is_header_line(line: &[u8]) -> bool {
    let Some(colon) = line.iter().position(|&b| b == b':') else {
        return false;
    };
    let name = trim_ascii_end(&line[..colon]);
    !name.is_empty() && name.iter().all(|&b| b.is_ascii_graphic())
}

fn trim_ascii_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    &bytes[..end]
}

/// Unfold a raw header value: join continuation lines with single spaces.
pub fn unfold(raw: &str) -> String {
    raw.split('\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The lowercase `type/subtype` of a `Content-Type` value, if well formed.
pub fn media_type(value: &str) -> Option<String> {
    let first = value.split(';').next()?.trim().to_lowercase();
    let (main, sub) = first.split_once('/')?;
    if main.is_empty() || sub.is_empty() || first.contains(char::is_whitespace) {
        return None;
    }
    Some(first)
}

/// Look up a parameter (`charset`, `boundary`, …) in a structured header value.
///
/// Parameter names are case-insensitive; surrounding quotes are removed.
pub fn header_param(value: &str, name: &str) -> Option<String> {
    split_params(value).into_iter().skip(1).find_map(|segment| {
        let (key, val) = segment.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(strip_quotes(val.trim()).to_string())
        } else {
            None
        }
    })
}

/// Return `value` with parameter `name` set to `new_value`.
///
/// Other segments are kept verbatim; the parameter is appended if missing.
pub fn set_header_param(value: &str, name: &str, new_value: &str) -> String {
    let mut segments = split_params(value);
    let rendered = format!(" {name}={}", quote_if_needed(new_value));
    let mut replaced = false;

    for segment in segments.iter_mut().skip(1) {
        let matches = segment
            .split_once('=')
            .is_some_and(|(key, _)| key.trim().eq_ignore_ascii_case(name));
        if matches {
            *segment = rendered.clone();
            replaced = true;
        }
    }
    if !replaced {
        segments.push(rendered);
    }
    segments.join(";")
}

/// Split a structured value on `;`, ignoring semicolons inside quotes.
fn split_params(value: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in value.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ';' if !in_quotes => segments.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    segments.push(current);
    // A trailing `;` leaves an empty segment that would be rewritten as `;;`
    if segments.len() > 1 && segments.last().is_some_and(|s| s.trim().is_empty()) {
        segments.pop();
    }
    segments
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn quote_if_needed(s: &str) -> String {
    let special = |c: char| "()<>@,;:\\\"/[]?= \t".contains(c);
    if s.chars().any(special) {
        format!("\"{s}\"")
    } else {
        s.to_string()
    }
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // If the gap between two encoded words is only whitespace, skip it (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        if let Some(decoded) = try_decode_one_word(after_start) {
            result.push_str(&decoded.text);
            remaining = &remaining[start + 2 + decoded.consumed..];
            last_was_encoded = true;
        } else {
            result.push_str("=?");
            remaining = after_start;
            last_was_encoded = false;
        }
    }

    result.push_str(remaining);
    result
}

struct DecodedWord {
    text: String,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn try_decode_one_word(s: &str) -> Option<DecodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    let total_consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = match encoding.to_uppercase().as_str() {
        "B" => LENIENT_BASE64.decode(encoded_text.trim()).ok()?,
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    let text = decode_charset(charset, &bytes);

    Some(DecodedWord {
        text,
        consumed: total_consumed,
    })
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    result.push(byte);
                    i += 3;
                } else {
                    result.push(b'=');
                    i += 1;
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode bytes using a named charset (lossy; headers never fail a message).
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    match encoding_rs::Encoding::for_label(charset.trim().as_bytes()) {
        Some(encoding) => {
            let (decoded, _) = encoding.decode_without_bom_handling(bytes);
            decoded.into_owned()
        }
        None => {
            warn!(
                charset = charset,
                "Unknown charset, falling back to UTF-8 lossy"
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Encode a header value for writing back after modification.
///
/// ASCII values are returned unchanged. Runs of non-ASCII words become
/// `=?UTF-8?B?…?=` encoded-words; ASCII words (addresses, tokens) stay
/// readable so structured headers keep their syntax.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut out: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();

    let flush = |run: &mut Vec<&str>, out: &mut Vec<String>| {
        if !run.is_empty() {
            push_encoded_words(&run.join(" "), out);
            run.clear();
        }
    };

    for word in value.split(' ') {
        if word.is_ascii() {
            flush(&mut run, &mut out);
            out.push(word.to_string());
        } else {
            run.push(word);
        }
    }
    flush(&mut run, &mut out);

    out.join(" ")
}

/// UTF-8 bytes per encoded-word: 60 base64 characters, 72 with the
/// `=?UTF-8?B?` and `?=` delimiters, under the 75 allowed by RFC 2047.
const ENCODED_WORD_BYTES: usize = 45;

/// Split `text` on character boundaries into encoded-words. Decoders drop
/// the whitespace between adjacent encoded-words, so the text is unchanged.
fn push_encoded_words(text: &str, out: &mut Vec<String>) {
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + ENCODED_WORD_BYTES).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        out.push(format!(
            "=?UTF-8?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(&text.as_bytes()[start..end])
        ));
        start = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        let input = "=?UTF-8?B?SG9sYSBtdW5kbw==?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        let input = "=?ISO-8859-1?Q?caf=E9?=";
        assert_eq!(decode_encoded_words(input), "café");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola there");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        let input = "=?Windows-1252?Q?M=FCller?=";
        assert_eq!(decode_encoded_words(input), "Müller");
    }

    #[test]
    fn test_split_fields_keeps_folding() {
        let text = "Subject: This is a long\r\n\tsubject line\r\nFrom: user@example.com\r\n";
        let fields = split_fields(text);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].0, "Subject");
        assert_eq!(fields[0].1, " This is a long\n\tsubject line");
        assert_eq!(unfold(&fields[0].1), "This is a long subject line");
    }

    #[test]
    fn test_is_header_line() {
        assert!(is_header_line(b"Subject: hi"));
        assert!(is_header_line(b"X-Spam-Score:5"));
        assert!(!is_header_line(b"Hello there: friend"));
        assert!(!is_header_line(b": empty name"));
        assert!(!is_header_line(b"no colon here"));
    }

    #[test]
    fn test_media_type() {
        assert_eq!(
            media_type("Text/HTML; charset=utf-8").as_deref(),
            Some("text/html")
        );
        assert_eq!(media_type("garbage"), None);
        assert_eq!(media_type("/plain"), None);
    }

    #[test]
    fn test_header_param() {
        let value = "multipart/alternative; boundary=\"b1;x\"; charset=ISO-8859-1";
        assert_eq!(header_param(value, "boundary").as_deref(), Some("b1;x"));
        assert_eq!(header_param(value, "CHARSET").as_deref(), Some("ISO-8859-1"));
        assert_eq!(header_param(value, "name"), None);
    }

    #[test]
    fn test_set_header_param_replaces() {
        let value = "text/plain; charset=\"iso-8859-1\"; format=flowed";
        assert_eq!(
            set_header_param(value, "charset", "utf-8"),
            "text/plain; charset=utf-8; format=flowed"
        );
    }

    #[test]
    fn test_set_header_param_appends() {
        assert_eq!(
            set_header_param("text/html;", "charset", "utf-8"),
            "text/html; charset=utf-8"
        );
    }

    #[test]
    fn test_encode_header_value_ascii_passthrough() {
        assert_eq!(encode_header_value("NAME_ab12 <x@y.z>"), "NAME_ab12 <x@y.z>");
    }

    #[test]
    fn test_encode_header_value_round_trip() {
        let value = "Grüße aus Köln <anon-1@example.invalid>";
        let encoded = encode_header_value(value);
        assert!(encoded.is_ascii());
        assert!(encoded.ends_with("<anon-1@example.invalid>"));
        assert_eq!(decode_encoded_words(&encoded), value);
    }

    #[test]
    fn test_decode_header_bytes_latin1_fallback() {
        assert_eq!(decode_header_bytes(b"Caf\xe9"), "Café");
    }

    #[test]
    fn test_encode_long_value_splits_words() {
        let value = "Promoción válida únicamente según términos económicos específicos";
        let encoded = encode_header_value(value);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        assert!(words.iter().all(|w| w.starts_with("=?UTF-8?B?") && w.len() <= 75));
        assert_eq!(decode_encoded_words(&encoded), value);
    }
}
