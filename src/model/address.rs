//! Mailbox addresses from `From`/`To`/`Cc` headers and the name pieces
//! derived from them.

use serde::Serialize;

/// A parsed mailbox: `Display Name <local@domain>`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare address (`local@domain`), or the raw text when unparseable.
    pub address: String,
}

impl EmailAddress {
    /// Parse a single mailbox.
    ///
    /// Accepts `user@domain`, `<user@domain>`, `Name <user@domain>` and
    /// `"Quoted, Name" <user@domain>`. Unparseable input is kept as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: strip_quotes(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Parse a comma-separated address list, honoring commas inside quotes
    /// and angle brackets. Empty entries are dropped.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        for ch in raw.chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                '<' if !in_quotes => in_angle = true,
                '>' if !in_quotes => in_angle = false,
                ',' | ';' if !in_quotes && !in_angle => {
                    results.push(Self::parse(&current));
                    current.clear();
                    continue;
                }
                _ => {}
            }
            current.push(ch);
        }
        results.push(Self::parse(&current));

        results.retain(|addr| !addr.address.is_empty());
        results
    }

    /// Whether `address` has the `local@domain` shape.
    pub fn is_valid(&self) -> bool {
        matches!(self.address.split_once('@'), Some((l, d)) if !l.is_empty() && d.contains('.'))
    }

    pub fn local_part(&self) -> Option<&str> {
        self.address.split_once('@').map(|(local, _)| local)
    }

    pub fn domain(&self) -> Option<&str> {
        self.address.rsplit_once('@').map(|(_, domain)| domain)
    }

    /// Name-like words that identify this person: display-name words plus the
    /// local part split on `.`, `_` and `-`. Words shorter than `min_len`
    /// characters or containing digits are dropped; duplicates are removed
    /// case-insensitively.
    pub fn name_words(&self, min_len: usize) -> Vec<String> {
        let display = self
            .display_name
            .split(|c: char| c.is_whitespace() || c == ',' || c == '"');
        let local = self
            .local_part()
            .into_iter()
            .flat_map(|l| l.split(['.', '_', '-', '+']));

        let mut words: Vec<String> = Vec::new();
        for word in display.chain(local) {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.chars().count() < min_len || word.chars().any(|c| c.is_ascii_digit()) {
                continue;
            }
            if !words.iter().any(|w| w.eq_ignore_ascii_case(word)) {
                words.push(word.to_string());
            }
        }
        words
    }

    /// Case-insensitive address comparison.
    pub fn same_mailbox(&self, other: &Self) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.display_name.is_empty() {
            f.write_str(&self.address)
        } else {
            write!(f, "{} <{}>", self.display_name, self.address)
        }
    }
}
