//! Filename-based chapter ordering.
//!
//! Two independent heuristics, selected by [`MediaKind`]:
//!
//! - **Manga**: `Vol.<n>` / `Ch.<n>` / `Chapter <n>` / `Capítulo <n>` tokens; the
//!   chapter number is the only sort key and ties keep their input order.
//! - **Comic**: reading index, part index ("X de Y"), issue number and category
//!   (normal, special, extra), with the original scan index as last tie-break.
//!
//! Both produce a total, deterministic order for a fixed input list.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;

use crate::path_utils::{DEFAULT_NUMBER_REGEX, extract_number_from_filename_safe};
use crate::types::{ArchiveEntry, Category, MediaKind, OrderedChapter};

/// Reading index assumed for comics without a leading number.
pub const DEFAULT_READING_INDEX: u32 = 9999;
/// Part index assumed for comics without an "X de Y" token.
pub const DEFAULT_PART_INDEX: u32 = 0;

lazy_static! {
    /// Manga volume (group 1) and chapter (groups 2/3) tokens.
    pub static ref MANGA_TOKEN_REGEX: Regex = Regex::new(
        r"(?i)\bvol\.?\s*(\d+)|(?:chapter|cap[ií]tulo)\s*(\d+(?:\.\d+)?)|\bch\.?\s*(\d+(?:\.\d+)?)"
    )
    .unwrap();
    static ref COMIC_SEPARATORS: Regex = Regex::new(r"[\s_+.\-]+").unwrap();
    static ref READING_INDEX: Regex = Regex::new(r"^(\d{1,3})\b").unwrap();
    static ref PART_INDEX: Regex = Regex::new(r"(\d{1,3})\s*de\s*(\d{1,3})").unwrap();
    static ref ISSUE_HASH: Regex = Regex::new(r"#\s*(\d+)").unwrap();
    static ref ISSUE_STANDALONE: Regex = Regex::new(r"\b(\d{2,4})\b").unwrap();
    static ref VOLUME_ISSUE: Regex = Regex::new(r"\bv(\d{1,4})\s+(\d{1,4})\b").unwrap();
    static ref SPECIAL_KEYWORDS: Regex =
        Regex::new(r"annual|one shot|edição especial|edicao especial|special").unwrap();
    static ref EXTRA_KEYWORDS: Regex = Regex::new(r"sketch|esboç|esboc|guia|handbook").unwrap();
}

/// Comic ordering keys parsed from a single file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ComicKeys {
    pub reading_index: Option<u32>,
    pub part_index: Option<u32>,
    pub issue_number: Option<u32>,
    pub volume: Option<u32>,
    pub category: Category,
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Orders archives with the heuristic matching the media kind.
pub fn order_chapters(kind: MediaKind, entries: &[ArchiveEntry]) -> Vec<OrderedChapter> {
    match kind {
        MediaKind::Manga => order_manga(entries),
        MediaKind::Comic => order_comics(entries),
    }
}

/// Extracts `(volume, chapter)` from a manga file name. The last occurrence of
/// each token wins.
pub fn parse_manga_name(name: &str) -> (Option<u32>, Option<f64>) {
    let mut volume = None;
    let mut chapter = None;

    for caps in MANGA_TOKEN_REGEX.captures_iter(name) {
        if let Some(v) = caps.get(1) {
            volume = v.as_str().parse().ok().or(volume);
        }
        if let Some(c) = caps.get(2).or_else(|| caps.get(3)) {
            chapter = c.as_str().parse().ok().or(chapter);
        }
    }

    (volume, chapter)
}

/// Sorts manga archives by chapter number only.
///
/// The volume is extracted and kept on the record but is not a sort key.
/// Archives without a chapter number go last; ties keep their input order.
pub fn order_manga(entries: &[ArchiveEntry]) -> Vec<OrderedChapter> {
    let mut chapters: Vec<OrderedChapter> = entries
        .iter()
        .map(|entry| {
            let (volume, chapter_number) = parse_manga_name(&file_stem(&entry.path));
            OrderedChapter {
                volume,
                chapter_number,
                ..OrderedChapter::unkeyed(entry)
            }
        })
        .collect();

    // par_sort_by is stable
    chapters.par_sort_by(compare_manga);
    chapters
}

pub fn compare_manga(a: &OrderedChapter, b: &OrderedChapter) -> Ordering {
    match (a.chapter_number, b.chapter_number) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Lowercases and turns `_ + . -` and whitespace runs into single spaces.
pub fn normalize_comic_name(name: &str) -> String {
    COMIC_SEPARATORS
        .replace_all(name, " ")
        .trim()
        .to_lowercase()
}

/// Extracts the comic ordering keys from a file stem.
///
/// The issue number is searched after the reading index and the part token
/// are removed, so neither is mistaken for an issue: `#<n>` first, then any
/// standalone 2–4 digit token, and a `v<n> <n>` volume-issue pair overrides both.
pub fn parse_comic_name(name: &str) -> ComicKeys {
    let normalized = normalize_comic_name(name);

    let (reading_index, rest) = match READING_INDEX.captures(&normalized) {
        Some(caps) => (
            caps[1].parse().ok(),
            &normalized[caps.get(0).map_or(0, |m| m.end())..],
        ),
        None => (None, normalized.as_str()),
    };

    let part_index = PART_INDEX
        .captures(rest)
        .and_then(|caps| caps[1].parse().ok());
    let issue_source = PART_INDEX.replace(rest, " ");

    let mut issue_number = ISSUE_HASH
        .captures(&issue_source)
        .or_else(|| ISSUE_STANDALONE.captures(&issue_source))
        .and_then(|caps| caps[1].parse().ok());

    let mut volume = None;
    if let Some(caps) = VOLUME_ISSUE.captures(&issue_source) {
        volume = caps[1].parse().ok();
        issue_number = caps[2].parse().ok().or(issue_number);
    }

    let category = if SPECIAL_KEYWORDS.is_match(&normalized) {
        Category::Special
    } else if EXTRA_KEYWORDS.is_match(&normalized) {
        Category::Extra
    } else {
        Category::Normal
    };

    ComicKeys {
        reading_index,
        part_index,
        issue_number,
        volume,
        category,
    }
}

/// Sorts comic archives by reading index, part index, issue number, category
/// and finally the original scan index.
pub fn order_comics(entries: &[ArchiveEntry]) -> Vec<OrderedChapter> {
    let mut chapters: Vec<OrderedChapter> = entries
        .iter()
        .map(|entry| {
            let keys = parse_comic_name(&file_stem(&entry.path));
            OrderedChapter {
                volume: keys.volume,
                reading_index: keys.reading_index,
                part_index: keys.part_index,
                issue_number: keys.issue_number,
                category: keys.category,
                ..OrderedChapter::unkeyed(entry)
            }
        })
        .collect();

    chapters.par_sort_by(compare_comic);
    chapters
}

pub fn compare_comic(a: &OrderedChapter, b: &OrderedChapter) -> Ordering {
    let reading = |c: &OrderedChapter| c.reading_index.unwrap_or(DEFAULT_READING_INDEX);
    let part = |c: &OrderedChapter| c.part_index.unwrap_or(DEFAULT_PART_INDEX);

    reading(a)
        .cmp(&reading(b))
        .then_with(|| part(a).cmp(&part(b)))
        .then_with(|| compare_issue(a.issue_number, b.issue_number))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.original_scan_index.cmp(&b.original_scan_index))
}

/// Numbered issues come before unnumbered ones.
fn compare_issue(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Orders extracted page images: by parent folder, then by the last number in
/// the file name (unnumbered first), then by file name.
pub fn compare_pages(a: &PathBuf, b: &PathBuf) -> Ordering {
    let an = extract_number_from_filename_safe(a, &DEFAULT_NUMBER_REGEX);
    let bn = extract_number_from_filename_safe(b, &DEFAULT_NUMBER_REGEX);

    a.parent()
        .cmp(&b.parent())
        .then_with(|| match (an, bn) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.file_name().cmp(&b.file_name()))
}

/// Sorts extracted page images in reading order.
pub fn order_pages(pages: &mut [PathBuf]) {
    pages.par_sort_by(compare_pages);
}
