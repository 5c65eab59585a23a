//! Core data model: header mappings, payload units, and structured messages.

pub mod address;
pub mod content;
pub mod headers;
pub mod message;
pub mod payload;
