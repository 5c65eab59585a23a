//! `spamprep` — normalize and consistently anonymize raw email messages
//! before similarity-based spam clustering.
//!
//! A message is parsed into a header mapping and ordered payload units
//! ([`model::message::StructuredMessage`]). Each unit is decoded from its
//! transfer encoding and charset into UTF-8 text, sensitive values are
//! replaced with tokens from a corpus-wide [`anonymize::AnonymizationStore`],
//! and the message is serialized back with every modified unit re-encoded.

pub mod anonymize;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod pipeline;
