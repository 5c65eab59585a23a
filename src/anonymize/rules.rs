//! What counts as sensitive: candidate classes, the blocklist, and the
//! per-message rules that find candidate spans in decoded text.

use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnonymizeConfig;
use crate::error::{PrepError, Result};
use crate::model::message::StructuredMessage;

/// Recipient name pieces shorter than this are ignored.
pub const MIN_NAME_LEN: usize = 3;

/// Phone candidates need at least this many digits.
const MIN_PHONE_DIGITS: usize = 8;
const MAX_PHONE_DIGITS: usize = 15;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)[a-z0-9._%+-]+@",
        r"[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+",
    ))
    .unwrap()
});

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"'`{}\[\]|\\^]+"#).unwrap());

static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:\+|\b)\d(?:[\d ().-]*\d)?").unwrap());

static DOMAIN_SHAPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^@?[a-z0-9](?:[a-z0-9-]*[a-z0-9])?",
        r"(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.[a-z]{2,}$",
    ))
    .unwrap()
});

/// A kind of sensitive value. Determines how candidates are found and how
/// their placeholder tokens look.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SensitiveClass {
    Email,
    Name,
    Url,
    Phone,
    /// Exact blocklist entries; always active.
    Literal,
}

impl SensitiveClass {
    /// Render a placeholder token around a hex digest prefix.
    pub fn render_token(self, hex: &str) -> String {
        match self {
            Self::Email => format!("anon-{hex}@example.invalid"),
            Self::Name => format!("NAME_{hex}"),
            Self::Url => format!("https://anon-{hex}.example.invalid/"),
            Self::Phone => format!("PHONE_{hex}"),
            Self::Literal => format!("ANON_{hex}"),
        }
    }
}

impl std::fmt::Display for SensitiveClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Email => "email",
            Self::Name => "name",
            Self::Url => "url",
            Self::Phone => "phone",
            Self::Literal => "literal",
        };
        f.write_str(label)
    }
}

impl FromStr for SensitiveClass {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "name" => Ok(Self::Name),
            "url" => Ok(Self::Url),
            "phone" => Ok(Self::Phone),
            "literal" => Ok(Self::Literal),
            other => Err(PrepError::Config(format!(
                "unknown class '{other}' (expected email, name, url, phone or literal)"
            ))),
        }
    }
}

/// Configured set of sensitive classes, domains, literals and header fields.
#[derive(Debug, Clone)]
pub struct Blocklist {
    classes: Vec<SensitiveClass>,
    domains: Vec<String>,
    literals: Vec<String>,
    literal_pattern: Option<Regex>,
    headers: Vec<String>,
    match_all_addresses: bool,
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new(&[SensitiveClass::Email, SensitiveClass::Name])
    }
}

impl Blocklist {
    /// A blocklist with the given classes, no entries and no headers.
    pub fn new(classes: &[SensitiveClass]) -> Self {
        Self {
            classes: classes.to_vec(),
            domains: Vec::new(),
            literals: Vec::new(),
            literal_pattern: None,
            headers: Vec::new(),
            match_all_addresses: false,
        }
    }

    /// Build from configuration, including the optional blocklist file.
    pub fn from_config(config: &AnonymizeConfig) -> Result<Self> {
        let mut domains = config.domains.clone();
        let mut literals = config.literals.clone();
        if let Some(path) = &config.blocklist_file {
            let (file_domains, file_literals) = load_blocklist_file(path)?;
            domains.extend(file_domains);
            literals.extend(file_literals);
        }

        let blocklist = Self::new(&config.classes)
            .with_domains(domains)
            .with_literals(literals)?
            .with_headers(config.headers.iter().cloned())
            .matching_all_addresses(config.match_all_addresses);
        Ok(blocklist)
    }

    pub fn with_domains(mut self, domains: impl IntoIterator<Item = String>) -> Self {
        for domain in domains {
            let domain = domain.trim().trim_start_matches('@').to_ascii_lowercase();
            if !domain.is_empty() && !self.domains.contains(&domain) {
                self.domains.push(domain);
            }
        }
        self
    }

    /// Add literal entries; fails if the combined pattern cannot be compiled.
    pub fn with_literals(mut self, literals: impl IntoIterator<Item = String>) -> Result<Self> {
        for literal in literals {
            if !literal.is_empty() && !self.literals.contains(&literal) {
                self.literals.push(literal);
            }
        }
        self.literal_pattern = compile_alternation(&self.literals, false)?;
        Ok(self)
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn matching_all_addresses(mut self, enabled: bool) -> Self {
        self.match_all_addresses = enabled;
        self
    }

    pub fn enabled(&self, class: SensitiveClass) -> bool {
        class == SensitiveClass::Literal || self.classes.contains(&class)
    }

    pub fn classes(&self) -> &[SensitiveClass] {
        &self.classes
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn literals(&self) -> &[String] {
        &self.literals
    }

    /// Whether `domain` or one of its parent domains is listed.
    pub fn domain_listed(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        self.domains.iter().any(|listed| {
            domain == *listed
                || domain
                    .strip_suffix(listed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Whether header field `name` is anonymized.
    pub fn anonymizes_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|h| h == "*" || h.eq_ignore_ascii_case(name))
    }
}

/// Read a blocklist file: one entry per line, `#` comments, blank lines
/// ignored. Domain-shaped entries become domains, the rest literals.
pub fn load_blocklist_file(path: &Path) -> Result<(Vec<String>, Vec<String>)> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PrepError::FileNotFound(path.to_path_buf())
        } else {
            PrepError::io(path, e)
        }
    })?;
    let entries = parse_blocklist(&text);
    debug!(
        path = %path.display(),
        domains = entries.0.len(),
        literals = entries.1.len(),
        "Loaded blocklist file"
    );
    Ok(entries)
}

/// Split blocklist text into `(domains, literals)`.
pub fn parse_blocklist(text: &str) -> (Vec<String>, Vec<String>) {
    let mut domains = Vec::new();
    let mut literals = Vec::new();
    for line in text.lines() {
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        if DOMAIN_SHAPED.is_match(entry) {
            domains.push(entry.trim_start_matches('@').to_ascii_lowercase());
        } else {
            literals.push(entry.to_string());
        }
    }
    (domains, literals)
}

/// Compile `words` into one alternation, longest first so that the longest
/// entry wins at a given position.
fn compile_alternation(words: &[String], whole_words: bool) -> Result<Option<Regex>> {
    if words.is_empty() {
        return Ok(None);
    }
    let mut sorted: Vec<&String> = words.iter().collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = sorted
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = if whole_words {
        format!(r"\b(?:{alternation})\b")
    } else {
        alternation
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(whole_words)
        .build()
        .map(Some)
        .map_err(|e| PrepError::Config(format!("blocklist pattern: {e}")))
}

/// A span of text to replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub start: usize,
    pub end: usize,
    pub class: SensitiveClass,
    /// Store key: the original value, normalized per class so that variants
    /// of the same value share a token.
    pub key: String,
}

/// Blocklist specialized to one message: knows its recipients and their
/// name pieces.
#[derive(Debug)]
pub struct MessageRules<'a> {
    blocklist: &'a Blocklist,
    recipients: Vec<String>,
    name_pattern: Option<Regex>,
}

impl<'a> MessageRules<'a> {
    pub fn for_message(blocklist: &'a Blocklist, message: &StructuredMessage) -> Self {
        let sender = message.sender();
        let recipients: Vec<_> = message
            .recipients()
            .into_iter()
            .filter(|r| r.is_valid())
            .collect();

        let name_pattern = if blocklist.enabled(SensitiveClass::Name) {
            let words: Vec<String> = recipients
                .iter()
                .filter(|r| sender.as_ref().is_none_or(|s| !s.same_mailbox(r)))
                .flat_map(|r| r.name_words(MIN_NAME_LEN))
                .collect();
            // Escaped plain words always compile
            compile_alternation(&words, true).ok().flatten()
        } else {
            None
        };

        Self {
            blocklist,
            recipients: recipients
                .iter()
                .map(|r| r.address.to_ascii_lowercase())
                .collect(),
            name_pattern,
        }
    }

    /// Every candidate span in `text`, unsorted and possibly overlapping.
    pub fn candidates(&self, text: &str) -> Vec<Candidate> {
        let mut out = Vec::new();

        if let Some(pattern) = &self.blocklist.literal_pattern {
            for m in pattern.find_iter(text) {
                let key = m.as_str();
                out.push(candidate(m.start(), m.end(), SensitiveClass::Literal, key));
            }
        }

        if self.blocklist.enabled(SensitiveClass::Email) {
            for m in EMAIL.find_iter(text) {
                let trimmed = m.as_str().trim_start_matches('.');
                if self.email_is_sensitive(&trimmed.to_ascii_lowercase()) {
                    let start = m.end() - trimmed.len();
                    out.push(candidate(start, m.end(), SensitiveClass::Email, trimmed));
                }
            }
        }

        if let Some(pattern) = &self.name_pattern {
            for m in pattern.find_iter(text) {
                let key = m.as_str().to_lowercase();
                out.push(candidate(m.start(), m.end(), SensitiveClass::Name, &key));
            }
        }

        if self.blocklist.enabled(SensitiveClass::Url) {
            for m in URL.find_iter(text) {
                let url = trim_url(m.as_str());
                let end = m.start() + url.len();
                out.push(candidate(m.start(), end, SensitiveClass::Url, url));
            }
        }

        if self.blocklist.enabled(SensitiveClass::Phone) {
            for m in PHONE.find_iter(text) {
                let digits: String = m.as_str().chars().filter(char::is_ascii_digit).collect();
                if (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
                    let key = if m.as_str().starts_with('+') {
                        format!("+{digits}")
                    } else {
                        digits
                    };
                    out.push(candidate(m.start(), m.end(), SensitiveClass::Phone, &key));
                }
            }
        }

        out
    }

    fn email_is_sensitive(&self, address: &str) -> bool {
        if address.ends_with("@example.invalid") {
            return false;
        }
        self.blocklist.match_all_addresses
            || self.recipients.iter().any(|r| r == address)
            || address
                .rsplit_once('@')
                .is_some_and(|(_, domain)| self.blocklist.domain_listed(domain))
    }
}

fn candidate(start: usize, end: usize, class: SensitiveClass, key: &str) -> Candidate {
    Candidate {
        start,
        end,
        class,
        key: key.to_string(),
    }
}

/// Drop trailing punctuation that usually ends the sentence, not the URL.
fn trim_url(url: &str) -> &str {
    let mut trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']);
    // Keep a closing parenthesis only if the URL opened one
    while trimmed.ends_with(')') && trimmed.matches('(').count() < trimmed.matches(')').count() {
        trimmed = trimmed[..trimmed.len() - 1].trim_end_matches(['.', ',', ';', ':', '!', '?']);
    }
    trimmed
}

/// Keep the leftmost candidate at each position, preferring the longest, and
/// drop anything overlapping an already selected span.
pub fn select_non_overlapping(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    let mut selected: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut cursor = 0;
    for c in candidates {
        if c.start >= cursor && c.end > c.start {
            cursor = c.end;
            selected.push(c);
        }
    }
    selected
}
