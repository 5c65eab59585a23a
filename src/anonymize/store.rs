//! Corpus-wide mapping from original sensitive values to placeholder tokens.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::anonymize::rules::SensitiveClass;

/// Hex digits of the digest used in a token before any collision.
const MIN_TOKEN_HEX: usize = 10;

/// One entry of the append-only issuance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issuance {
    /// Position in issuance order, starting at 1.
    pub sequence: u64,
    pub class: SensitiveClass,
    pub original: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    by_original: HashMap<String, String>,
    issued: HashSet<String>,
    log: Vec<Issuance>,
}

/// Thread-safe original → token map shared by every message of a run.
///
/// The lookup and the insert of [`token_for`](Self::token_for) happen under
/// one lock, so concurrent callers asking for the same original all receive
/// the same token and no token is ever issued twice. Issued tokens are never
/// withdrawn.
#[derive(Debug, Default)]
pub struct AnonymizationStore {
    state: Mutex<StoreState>,
}

impl AnonymizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `original`, shaped as a generic literal placeholder when it
    /// has not been seen before.
    pub fn token_for(&self, original: &str) -> String {
        self.token_for_class(SensitiveClass::Literal, original)
    }

    /// Token for `original`, shaped after `class` when first issued.
    ///
    /// The token is derived from a SHA-256 digest of the original, so a run
    /// over the same corpus yields the same tokens. On a prefix collision the
    /// prefix is lengthened until the token is unique.
    pub fn token_for_class(&self, class: SensitiveClass, original: &str) -> String {
        let mut state = self.lock();
        if let Some(token) = state.by_original.get(original) {
            return token.clone();
        }

        let digest = format!("{:x}", Sha256::digest(original.as_bytes()));
        let token = unique_token(&state.issued, class, &digest);

        let sequence = state.log.len() as u64 + 1;
        state.issued.insert(token.clone());
        state
            .by_original
            .insert(original.to_string(), token.clone());
        state.log.push(Issuance {
            sequence,
            class,
            original: original.to_string(),
            token: token.clone(),
            issued_at: Utc::now(),
        });
        tracing::trace!(%class, sequence, "Issued token");
        token
    }

    /// Whether `candidate` is a token this store issued.
    pub fn is_token(&self, candidate: &str) -> bool {
        self.lock().issued.contains(candidate)
    }

    /// `(original, token)` pairs in issuance order.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.lock()
            .log
            .iter()
            .map(|i| (i.original.clone(), i.token.clone()))
            .collect()
    }

    /// The full issuance log, in order.
    pub fn issuances(&self) -> Vec<Issuance> {
        self.lock().log.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Maps are only mutated after a token is computed; poisoned state is consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn unique_token(issued: &HashSet<String>, class: SensitiveClass, digest: &str) -> String {
    for len in (MIN_TOKEN_HEX..=digest.len()).step_by(2) {
        let token = class.render_token(&digest[..len]);
        if !issued.contains(&token) {
            return token;
        }
    }
    // Full digest already taken: only possible for a hash collision
    (1u64..)
        .map(|n| class.render_token(&format!("{digest}{n}")))
        .find(|token| !issued.contains(token))
        .unwrap_or_else(|| class.render_token(digest))
}
