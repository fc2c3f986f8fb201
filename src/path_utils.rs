//! Path utilities for safe and bounded file path handling.
//!
//! This module turns arbitrary, human-typed titles into filesystem-safe tokens
//! ([`sanitize_filename`]) and builds absolute output paths that never exceed a
//! platform length ceiling ([`budget_path`], [`budget_chapter_path`],
//! [`shorten_source_path`]). When a name cannot fit, a short random identifier
//! is used instead, so a valid path is always produced while the base directory
//! itself leaves room for one.
//!
//! Lengths are measured in bytes of the OS string. Sanitized components are ASCII,
//! so this never undercounts against a UTF-16 based ceiling.

use std::ffi::OsStr;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use tokio::fs;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Ceiling for generic output paths (covers, chapter directories).
pub const DEFAULT_MAX_PATH: usize = 260;
/// Ceiling for source archives that may need a rename in place.
pub const DEFAULT_MAX_SOURCE_PATH: usize = 240;
/// Below this many characters a single-component name is replaced by a short id.
pub const MIN_NAME_BUDGET: usize = 6;
/// Below this many characters a series/chapter pair is replaced by short ids.
pub const MIN_CHAPTER_BUDGET: usize = 8;

const SHORT_ID_LENGTH: usize = 8;
/// Share of a chapter path budget given to the series component.
const SERIES_BUDGET_PERCENT: usize = 40;

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
    static ref UNDERSCORE_RUN: Regex = Regex::new(r"_{2,}").unwrap();
    static ref DOT_RUN: Regex = Regex::new(r"\.{2,}").unwrap();
    static ref PDF_SUFFIX: Regex = Regex::new(r"(?i)\.pdf$").unwrap();
    /// Matches "001", "1", "1.5" etc.
    pub static ref DEFAULT_NUMBER_REGEX: Regex = Regex::new(r"\d+\.?\d*").unwrap();
}

/// Gets the file name from a path with fallback to lossy conversion.
///
/// # Arguments
///
/// * `path` - The path to extract the file name from
///
/// # Returns
///
/// * `String` - The file name, using lossy conversion if necessary
pub fn get_file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Checks if a filename starts with a dot (hidden file).
pub fn is_hidden_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Length of a path as the OS sees it.
pub fn path_len(path: &Path) -> usize {
    path.as_os_str().len()
}

/// Extracts the last number in a file stem using the given regex.
///
/// # Arguments
///
/// * `path` - The path to extract numbers from
/// * `regex` - The regex pattern to use for extraction
///
/// # Returns
///
/// * `Option<f64>` - The extracted number, or None if not found or conversion failed
pub fn extract_number_from_filename_safe(path: &Path, regex: &Regex) -> Option<f64> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    regex.captures_iter(&stem).last().and_then(|cap| {
        let capture = cap.get(1).or_else(|| cap.get(0))?.as_str();
        let capture = capture.trim_end_matches('.');
        if capture.contains('.') {
            capture.parse::<f64>().ok()
        } else {
            // "000" trims to "" and still means zero
            let trimmed = capture.trim_start_matches('0');
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
    })
}

/// Removes diacritics by canonical decomposition, dropping combining marks.
pub fn strip_diacritics(input: &str) -> String {
    input.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Sanitizes a title or filename into a token made only of `[A-Za-z0-9._-]`.
///
/// Whitespace runs become `_`, accented letters lose their accents, everything
/// else outside the allowed set (`<>:"/\|?*`, `#`, `!`, control bytes, other
/// scripts) is removed. Underscore and dot runs are collapsed, leading/trailing
/// dashes and trailing dots are stripped and a `.pdf` suffix is dropped.
///
/// The result is a fixed point: `sanitize_filename(&sanitize_filename(x)) ==
/// sanitize_filename(x)`. It may be empty; callers decide what to do then.
pub fn sanitize_filename(filename: &str) -> String {
    let mut current = sanitize_pass(filename);
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_pass(input: &str) -> String {
    let folded = strip_diacritics(input.trim());
    let spaced = WHITESPACE_RUN.replace_all(&folded, "_");
    let kept: String = spaced
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let collapsed = UNDERSCORE_RUN.replace_all(&kept, "_");
    let collapsed = DOT_RUN.replace_all(&collapsed, ".");
    let trimmed = collapsed
        .trim_start_matches('-')
        .trim_end_matches(['-', '.', ' ']);
    PDF_SUFFIX.replace(trimmed, "").into_owned()
}

/// First `len` hex characters of a random UUID (at most 32).
pub fn short_id(len: usize) -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..len.clamp(1, id.len())].to_string()
}

/// Truncates an already sanitized (ASCII) name to `budget` characters without
/// leaving a dangling dot or dash behind.
fn truncate_component(name: &str, budget: usize) -> String {
    let cut = &name[..name.len().min(budget)];
    cut.trim_end_matches(['-', '.']).to_string()
}

fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim_start_matches('.');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{}", trimmed)
    }
}

/// Builds `<base_dir>/<name><extension>` as an absolute path no longer than `ceiling`.
///
/// The name is sanitized and truncated to the remaining budget. If that budget
/// is under [`MIN_NAME_BUDGET`], or the sanitized name is empty, a short random
/// id is used instead.
///
/// # Errors
///
/// [`Error::PathTooLong`] when the base directory and extension alone leave no room.
pub fn budget_path(base_dir: &Path, name: &str, extension: &str, ceiling: usize) -> Result<PathBuf> {
    let base = std::path::absolute(base_dir)?;
    let extension = normalize_extension(extension);
    let static_length = path_len(&base) + MAIN_SEPARATOR.len_utf8() + extension.len();

    let budget = ceiling
        .checked_sub(static_length)
        .filter(|budget| *budget > 0)
        .ok_or_else(|| Error::PathTooLong(base.clone(), ceiling))?;

    let sanitized = truncate_component(&sanitize_filename(name), budget);
    let stem = if budget < MIN_NAME_BUDGET || sanitized.is_empty() {
        debug!("Using a short id for '{}' (budget {})", name, budget);
        short_id(budget.min(SHORT_ID_LENGTH))
    } else {
        sanitized
    };

    Ok(base.join(format!("{}{}", stem, extension)))
}

/// Builds `<base_dir>/<series>/<chapter>` as an absolute path no longer than `ceiling`.
///
/// The budget left after the base directory is split 40/60 between the series
/// and chapter components. If it is under [`MIN_CHAPTER_BUDGET`], or the
/// assembled path still exceeds the ceiling, both components become short ids.
///
/// # Errors
///
/// [`Error::PathTooLong`] when the base directory leaves no room for two components.
pub fn budget_chapter_path(
    base_dir: &Path,
    series: &str,
    chapter: &str,
    ceiling: usize,
) -> Result<PathBuf> {
    let base = std::path::absolute(base_dir)?;
    let static_length = path_len(&base) + 2 * MAIN_SEPARATOR.len_utf8();

    let budget = ceiling
        .checked_sub(static_length)
        .filter(|budget| *budget >= 2)
        .ok_or_else(|| Error::PathTooLong(base.clone(), ceiling))?;

    if budget < MIN_CHAPTER_BUDGET {
        return Ok(short_id_pair(&base, budget));
    }

    let series_budget = budget * SERIES_BUDGET_PERCENT / 100;
    let chapter_budget = budget - series_budget;

    let assembled = base
        .join(fit_component(series, series_budget))
        .join(fit_component(chapter, chapter_budget));

    if path_len(&assembled) > ceiling {
        warn!(
            "Chapter path {:?} exceeds {} characters, using short ids",
            assembled, ceiling
        );
        return Ok(short_id_pair(&base, budget));
    }

    Ok(assembled)
}

fn fit_component(name: &str, budget: usize) -> String {
    let fitted = truncate_component(&sanitize_filename(name), budget);
    if fitted.is_empty() {
        short_id(budget.min(SHORT_ID_LENGTH))
    } else {
        fitted
    }
}

fn short_id_pair(base: &Path, budget: usize) -> PathBuf {
    let len = (budget / 2).min(SHORT_ID_LENGTH);
    base.join(short_id(len)).join(short_id(len))
}

/// Ensures a source archive path fits within `ceiling`, renaming the file in
/// place when it does not.
///
/// Returns the original path untouched when it already fits. Otherwise the
/// file is moved to a budgeted sibling path and the new path is returned. The
/// move is a single `rename`, so on failure the original file stays where it was.
pub async fn shorten_source_path(path: &Path, ceiling: usize) -> Result<PathBuf> {
    if path_len(&std::path::absolute(path)?) <= ceiling {
        return Ok(path.to_path_buf());
    }

    let parent = path.parent().ok_or_else(|| {
        Error::InvalidPath(path.to_path_buf(), "Source path has no parent".to_string())
    })?;
    let stem = path
        .file_stem()
        .map(OsStr::to_string_lossy)
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(OsStr::to_string_lossy)
        .unwrap_or_default();

    let mut target = budget_path(parent, &stem, &extension, ceiling)?;
    if fs::try_exists(&target).await? {
        warn!("{:?} already exists, falling back to a short id", target);
        target = budget_path(parent, "", &extension, ceiling)?;
    }

    fs::rename(path, &target).await?;
    info!("Shortened source path {:?} -> {:?}", path, target);
    Ok(target)
}
