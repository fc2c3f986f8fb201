//! Core data types, enums, and reports for the Hondana ingestion pipeline.
//!
//! This module defines the fundamental data structures used throughout Hondana:
//! - Scan and ordering records (`ArchiveEntry`, `OrderedChapter`)
//! - Extraction and cover-selection results (`ExtractionResult`, `CoverCandidate`, `CoverOutcome`)
//! - Persisted records handed to collaborators (`ChapterRecord`, `SeriesRecord`)
//! - Workflow reports (`SeriesIngest`, `ChapterMaterialization`, `BatchReport`)

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::error::{Error, Result};

/// Extensions accepted as chapter sources (compared case-insensitively).
pub const SOURCE_EXTENSIONS: [&str; 5] = ["cbz", "cbr", "zip", "rar", "pdf"];

/// Extensions accepted as page images after extraction (compared case-insensitively).
pub const PAGE_IMAGE_EXTENSIONS: [&str; 8] =
    ["jpeg", "jpg", "png", "webp", "tiff", "gif", "bmp", "tif"];

/// Extension of the canonical page/cover format.
pub const CANONICAL_EXTENSION: &str = "jpg";

/// Kind of media a series holds. Selects the ordering heuristic and the
/// `<images-root>/<media-kind>/` directory.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MediaKind {
    #[default]
    Manga,
    Comic,
}

impl MediaKind {
    /// Directory name used under the images root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Manga => "manga",
            MediaKind::Comic => "comic",
        }
    }
}

/// Comic edition category. The declaration order is the sort order.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Category {
    #[default]
    Normal,
    Special,
    Extra,
}

/// A source archive found by a directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArchiveEntry {
    pub path: PathBuf,
    /// Position of the entry in the scan.
    pub discovered_at: usize,
}

impl ArchiveEntry {
    pub fn new(path: impl Into<PathBuf>, discovered_at: usize) -> Self {
        Self {
            path: path.into(),
            discovered_at,
        }
    }
}

/// An archive with the ordering keys extracted from its file name.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderedChapter {
    pub source_path: PathBuf,
    pub volume: Option<u32>,
    pub chapter_number: Option<f64>,
    pub reading_index: Option<u32>,
    pub part_index: Option<u32>,
    pub issue_number: Option<u32>,
    pub category: Category,
    pub original_scan_index: usize,
}

impl OrderedChapter {
    /// A chapter with no ordering keys, only its scan position.
    pub fn unkeyed(entry: &ArchiveEntry) -> Self {
        Self {
            source_path: entry.path.clone(),
            volume: None,
            chapter_number: None,
            reading_index: None,
            part_index: None,
            issue_number: None,
            category: Category::Normal,
            original_scan_index: entry.discovered_at,
        }
    }

    /// Display name: the source file name without its extension.
    pub fn name(&self) -> String {
        self.source_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Source type of a chapter file, decided by magic bytes first and extension second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SourceKind {
    Pdf,
    Archive,
}

/// How many pages an extraction needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageScope {
    /// Only what cover selection needs (first page for PDFs).
    Cover,
    /// Every page.
    All,
}

/// Files materialized from one source into a scoped temp directory.
///
/// The temp directory is removed when this value is dropped or closed.
#[derive(Debug)]
pub struct ExtractionResult {
    pub(crate) temp_dir: TempDir,
    pub candidate_image_paths: Vec<PathBuf>,
    pub partial_failure: bool,
    pub used_fallback_mode: bool,
}

impl ExtractionResult {
    pub fn output_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Deletes the temp directory, reporting any error instead of swallowing it.
    pub fn close(self) -> Result<()> {
        self.temp_dir.close().map_err(Error::Io)
    }
}

/// An extracted image scored for cover selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverCandidate {
    pub path: PathBuf,
    pub file_name: String,
    /// The digit run at the end of the file stem, verbatim (keeps leading zeros).
    pub trailing_digits: Option<String>,
    pub trailing_numeric_value: Option<u64>,
    pub matched_keyword: bool,
}

/// Result of the cover workflow.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoverOutcome {
    Selected {
        cover_path: PathBuf,
        /// File name of the extracted image the cover was made from.
        source_image: String,
        partial_failure: bool,
        used_fallback_mode: bool,
    },
    /// Extraction worked but no candidate satisfied any cover tier, even after
    /// the unfiltered pass.
    NoValidCover {
        partial_failure: bool,
        used_fallback_mode: bool,
    },
}

impl CoverOutcome {
    pub fn cover_path(&self) -> Option<&Path> {
        match self {
            CoverOutcome::Selected { cover_path, .. } => Some(cover_path),
            CoverOutcome::NoValidCover { .. } => None,
        }
    }
}

/// What happened to a single image during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted,
    /// Already canonical at the canonical destination, no work done.
    AlreadyCanonical,
}

/// Report of a chapter directory normalization.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChapterNormalization {
    pub pages: Vec<PathBuf>,
    /// Files that failed the magic-byte image check.
    pub skipped: Vec<PathBuf>,
}

/// Download state of a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DownloadStatus {
    #[default]
    NotDownloaded,
    Downloading,
    Downloaded,
}

/// A chapter as persisted by the external record store.
///
/// `archives_path` never changes once set; `chapter_path` and `status` are only
/// mutated by this pipeline through the transition methods.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChapterRecord {
    /// 1-based position in the series order.
    pub number: usize,
    pub name: String,
    pub sanitized_name: String,
    archives_path: PathBuf,
    chapter_path: Option<PathBuf>,
    status: DownloadStatus,
    pub ordering: OrderedChapter,
    pub created_at: DateTime<Utc>,
}

impl ChapterRecord {
    pub fn new(number: usize, ordering: OrderedChapter) -> Self {
        let name = ordering.name();
        Self {
            number,
            sanitized_name: crate::path_utils::sanitize_filename(&name),
            name,
            archives_path: ordering.source_path.clone(),
            chapter_path: None,
            status: DownloadStatus::NotDownloaded,
            ordering,
            created_at: Utc::now(),
        }
    }

    pub fn archives_path(&self) -> &Path {
        &self.archives_path
    }

    pub fn chapter_path(&self) -> Option<&Path> {
        self.chapter_path.as_deref()
    }

    pub fn status(&self) -> DownloadStatus {
        self.status
    }

    pub fn is_downloaded(&self) -> bool {
        self.status == DownloadStatus::Downloaded
    }

    /// `NotDownloaded -> Downloading`
    pub fn begin_download(&mut self) -> Result<()> {
        self.transition(DownloadStatus::NotDownloaded, DownloadStatus::Downloading)
    }

    /// `Downloading -> Downloaded`, recording where the pages landed.
    pub fn finish_download(&mut self, chapter_path: PathBuf) -> Result<()> {
        self.transition(DownloadStatus::Downloading, DownloadStatus::Downloaded)?;
        self.chapter_path = Some(chapter_path);
        Ok(())
    }

    /// `Downloading -> NotDownloaded` after a failed materialization.
    pub fn rollback_download(&mut self) -> Result<()> {
        self.transition(DownloadStatus::Downloading, DownloadStatus::NotDownloaded)
    }

    /// `Downloaded -> NotDownloaded`, for user-initiated deletion of the pages.
    pub fn mark_deleted(&mut self) -> Result<()> {
        self.transition(DownloadStatus::Downloaded, DownloadStatus::NotDownloaded)?;
        self.chapter_path = None;
        Ok(())
    }

    fn transition(&mut self, from: DownloadStatus, to: DownloadStatus) -> Result<()> {
        if self.status != from {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// A series as handed to the external record store after ingestion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeriesRecord {
    pub name: String,
    pub sanitized_name: String,
    pub media_kind: MediaKind,
    pub archives_dir: PathBuf,
    pub cover_path: Option<PathBuf>,
    pub chapters: Vec<ChapterRecord>,
    pub created_at: DateTime<Utc>,
}

/// Input of the "ingest a new series" workflow.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeriesRequest {
    pub name: String,
    pub media_kind: MediaKind,
    pub archives_dir: PathBuf,
}

impl SeriesRequest {
    pub fn new(name: impl Into<String>, media_kind: MediaKind, archives_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            media_kind,
            archives_dir: archives_dir.into(),
        }
    }
}

/// Output of the "ingest a new series" workflow.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeriesIngest {
    pub series: SeriesRecord,
    /// `None` when the series has no chapters to take a cover from.
    pub cover: Option<CoverOutcome>,
}

/// Output of the "materialize one chapter" workflow.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChapterMaterialization {
    pub chapter_path: PathBuf,
    pub pages: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub partial_failure: bool,
    pub used_fallback_mode: bool,
}

/// Summary of a batch ingestion: one series failing never aborts the others.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    /// `(series name, error message)`
    pub failed: Vec<(String, String)>,
}

/// Lowercased extension of a path, if any.
pub fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Whether the path has one of the accepted chapter source extensions.
pub fn is_source_file(path: &Path) -> bool {
    extension_lowercase(path).is_some_and(|e| SOURCE_EXTENSIONS.contains(&e.as_str()))
}

/// Whether the path has one of the accepted page image extensions.
pub fn is_page_image(path: &Path) -> bool {
    extension_lowercase(path).is_some_and(|e| PAGE_IMAGE_EXTENSIONS.contains(&e.as_str()))
}
