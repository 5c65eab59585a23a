//! Export the token issuance log to CSV.
//!
//! Output is UTF-8 with BOM for Excel compatibility.

use std::io::Write;
use std::path::Path;

use crate::anonymize::store::Issuance;

/// Write `issuances` to a CSV file.
///
/// Columns: Sequence, Class, Original, Token, Issued_At
pub fn export_csv(issuances: &[Issuance], output_path: &Path) -> anyhow::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(output_path)?);

    // UTF-8 BOM for Excel
    file.write_all(&[0xEF, 0xBB, 0xBF])?;
    writeln!(file, "Sequence,Class,Original,Token,Issued_At")?;

    for issuance in issuances {
        writeln!(
            file,
            "{},{},{},{},{}",
            issuance.sequence,
            issuance.class,
            csv_escape(&issuance.original),
            csv_escape(&issuance.token),
            issuance.issued_at.to_rfc3339(),
        )?;
    }

    file.flush()?;
    Ok(())
}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains commas, quotes, or newlines.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
