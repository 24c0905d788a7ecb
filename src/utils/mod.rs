//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the pipeline stages.

pub mod retry;

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Collapse runs of `/` into a single slash
pub fn collapse_slashes(path: &str) -> String {
    static SLASHES_RE: OnceLock<Regex> = OnceLock::new();

    let re = SLASHES_RE.get_or_init(|| Regex::new(r"/{2,}").expect("Invalid regex pattern"));

    re.replace_all(path, "/").to_string()
}

/// Turn a path or name into an identifier-safe slug (`/v2/entities/a:b` -> `v2_entities_a_b`)
pub fn slugify(text: &str) -> String {
    static NON_WORD_RE: OnceLock<Regex> = OnceLock::new();

    let re = NON_WORD_RE
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").expect("Invalid regex pattern"));

    re.replace_all(text, "_").trim_matches('_').to_string()
}

/// Decode percent-encoded colons (`%3A` / `%3a`) back to `:`
pub fn decode_colons(iri: &str) -> String {
    static COLON_RE: OnceLock<Regex> = OnceLock::new();

    let re = COLON_RE.get_or_init(|| Regex::new(r"%3[aA]").expect("Invalid regex pattern"));

    re.replace_all(iri, ":").to_string()
}

/// Read a file to a string, attaching the path to any error
pub fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))
}

/// Write a file atomically (write to a temp file next to it, then rename)
///
/// Readers never observe a half-written artifact and a failed write leaves nothing behind.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
    }

    let temp_path = path.with_extension("tmp");
    if let Err(e) = std::fs::write(&temp_path, content) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::io("write", &temp_path, e));
    }

    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        Error::io("rename", path, e)
    })
}
