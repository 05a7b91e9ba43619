//! Filesystem helpers for artifacts the tool owns.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Replace `path` with `contents` via a sibling temp file and a rename.
///
/// Readers never observe a partially written file. Parent directories are created
/// as needed.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Source text as written to disk: always newline-terminated.
pub fn source_text(code: &str) -> String {
    let mut text = code.to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Read a file that may legitimately be absent.
pub fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
