//! Export the store's issuance log for auditing.

use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::anonymize::store::{AnonymizationStore, Issuance};
use crate::error::PrepError;

/// File format of an issuance export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingFormat {
    Json,
    Csv,
}

impl MappingFormat {
    /// Guess from the file extension; JSON unless it is `.csv`.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

impl FromStr for MappingFormat {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(PrepError::Config(format!(
                "unknown mapping format '{other}' (expected json or csv)"
            ))),
        }
    }
}

#[derive(Serialize)]
struct MappingDocument<'a> {
    token_count: usize,
    issuances: &'a [Issuance],
}

/// Write every issuance of `store`, in issuance order, to `path`.
pub fn export_mapping(
    store: &AnonymizationStore,
    path: &Path,
    format: MappingFormat,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let issuances = store.issuances();
    match format {
        MappingFormat::Csv => super::csv::export_csv(&issuances, path)?,
        MappingFormat::Json => {
            let document = MappingDocument {
                token_count: issuances.len(),
                issuances: &issuances,
            };
            let file = std::io::BufWriter::new(std::fs::File::create(path)?);
            serde_json::to_writer_pretty(file, &document)?;
        }
    }

    tracing::info!(
        path = %path.display(),
        tokens = issuances.len(),
        "Exported token mapping"
    );
    Ok(())
}
