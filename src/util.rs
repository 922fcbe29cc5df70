//! Shared utility functions for the testpilot crate.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Atomically replace `path` with `content`.
///
/// Writes to a temporary file in the target's directory, fsyncs it, then
/// renames it over the target so readers see either the old or the new file.
pub fn write_file_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Clip `text` to at most `max_chars` characters, appending an ellipsis
/// when anything was cut. Never splits a UTF-8 code point.
pub fn clip_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
