//! Consistent anonymization: rules find sensitive spans, the store maps each
//! original to a stable token, the anonymizer rewrites messages.

pub mod anonymizer;
pub mod rules;
pub mod store;

pub use anonymizer::{AnonymizeReport, Anonymizer};
pub use rules::{Blocklist, SensitiveClass};
pub use store::{AnonymizationStore, Issuance};
