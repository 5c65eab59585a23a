//! Write processed messages as individual `.eml` files.

use std::path::{Path, PathBuf};

use crate::error::{PrepError, Result};

/// Output file name for `input`.
///
/// Inputs keep their file name when it is valid UTF-8 and already ends in
/// `.eml`; anything else gets a sanitized stem, truncated to 200 chars.
pub fn eml_filename(input: &Path) -> String {
    if let Some(name) = input.file_name().and_then(|n| n.to_str()) {
        let is_eml = Path::new(name)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("eml"));
        if is_eml {
            return name.to_string();
        }
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}.eml", sanitize_filename_part(&stem, 196))
}

/// Write `bytes` to `output_dir/name`, creating the directory if needed.
///
/// Returns the path of the created file.
pub fn write_eml(output_dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).map_err(|e| PrepError::io(output_dir, e))?;
    let path = output_dir.join(name);
    std::fs::write(&path, bytes).map_err(|e| PrepError::io(&path, e))?;
    Ok(path)
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_len`.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename_part("hello world", 20), "hello_world");
        assert_eq!(sanitize_filename_part("a/b\\c:d*e", 20), "a_b_c_d_e");
        assert_eq!(sanitize_filename_part("", 20), "unknown");
    }

    #[test]
    fn test_eml_filename_keeps_eml_names() {
        assert_eq!(eml_filename(Path::new("/in/spam 01.eml")), "spam 01.eml");
        assert_eq!(eml_filename(Path::new("/in/SPAM.EML")), "SPAM.EML");
        assert_eq!(eml_filename(Path::new("/in/msg:1.txt")), "msg_1.eml");
        assert_eq!(eml_filename(Path::new("/")), "unknown.eml");
    }

    #[test]
    fn test_write_eml_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let path = write_eml(&out, "a.eml", b"Subject: x\n\nbody\n").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"Subject: x\n\nbody\n");
    }
}
