//! Message parsing: header handling, MIME structure, transfer codecs and
//! pattern-based detection.

pub mod codec;
pub mod header;
pub mod mime;
pub mod patterns;
