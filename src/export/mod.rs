//! Output: processed `.eml` files and token issuance audits (JSON, CSV).

pub mod csv;
pub mod eml;
pub mod mapping;
