//! Repair of mis-decoded archive file names.
//!
//! Archives created on legacy systems often carry names stored in a single-byte
//! code page (Windows-1252). Depending on the tool that unpacked them, those
//! names arrive either as raw non-UTF-8 bytes or as UTF-8 "mojibake"
//! (`CapÃ­tulo` instead of `Capítulo`). Both are recovered here, then the name
//! is folded to plain ASCII letters and stripped of characters no filesystem
//! accepts.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use encoding_rs::WINDOWS_1252;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use tokio::fs;

use crate::error::Result;
use crate::path_utils::strip_diacritics;

lazy_static! {
    static ref ILLEGAL_CHARS: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).unwrap();
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
    static ref UNDERSCORE_RUN: Regex = Regex::new(r"_{2,}").unwrap();
}

/// Reinterprets UTF-8 text that was decoded from Windows-1252 bytes one time too many.
///
/// Returns `None` unless the round trip yields valid, non-empty text that differs
/// from the input.
pub fn repair_mojibake(text: &str) -> Option<String> {
    if text.is_ascii() {
        return None;
    }
    let (bytes, _, unmappable) = WINDOWS_1252.encode(text);
    if unmappable {
        return None;
    }
    let repaired = std::str::from_utf8(&bytes).ok()?;
    if repaired.is_empty() || repaired == text {
        None
    } else {
        Some(repaired.to_string())
    }
}

/// Decodes a file name, recovering single-byte encoded names.
pub fn decode_file_name(name: &OsStr) -> String {
    match name.to_str() {
        Some(text) => repair_mojibake(text).unwrap_or_else(|| text.to_string()),
        None => decode_legacy_bytes(name),
    }
}

#[cfg(unix)]
fn decode_legacy_bytes(name: &OsStr) -> String {
    use std::os::unix::ffi::OsStrExt;

    let (text, _) = WINDOWS_1252.decode_without_bom_handling(name.as_bytes());
    text.into_owned()
}

#[cfg(not(unix))]
fn decode_legacy_bytes(name: &OsStr) -> String {
    name.to_string_lossy().into_owned()
}

/// Folds diacritics, replaces filesystem-illegal characters with `_` and
/// collapses whitespace and underscore runs.
pub fn normalize_name(name: &str) -> String {
    let folded = strip_diacritics(name);
    let replaced = ILLEGAL_CHARS.replace_all(&folded, "_");
    let spaced = WHITESPACE_RUN.replace_all(&replaced, " ");
    let collapsed = UNDERSCORE_RUN.replace_all(&spaced, "_");
    collapsed.trim().to_string()
}

/// Repairs the file name of `path` on disk.
///
/// Returns `path` unchanged (no I/O) when the name is already clean. Otherwise
/// the file is renamed to the repaired name, unless something already occupies
/// that destination: then the existing destination is returned and nothing is
/// overwritten.
pub async fn normalize_file_name(path: &Path) -> Result<PathBuf> {
    let Some(original) = path.file_name() else {
        return Ok(path.to_path_buf());
    };

    let candidate = normalize_name(&decode_file_name(original));
    if candidate.is_empty() || OsStr::new(&candidate) == original {
        return Ok(path.to_path_buf());
    }

    let target = path.with_file_name(&candidate);
    if fs::try_exists(&target).await? {
        warn!("Not renaming {:?}: {:?} already exists", original, target);
        return Ok(target);
    }

    fs::rename(path, &target).await?;
    info!("Repaired file name {:?} -> {:?}", original, candidate);
    Ok(target)
}
