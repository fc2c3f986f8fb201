//! Hondana - Comic and Manga Archive Ingestion Library
//!
//! This crate turns directories of user-supplied chapter archives
//! (`.cbz/.cbr/.zip/.rar/.pdf` with inconsistent, human-typed names) into a
//! normalized library on disk: sanitized paths within OS length limits,
//! deterministically ordered chapters, pages re-encoded to a canonical JPEG and
//! a selected cover per series.
//!
//! # Getting Started
//!
//! Configure the pipeline once with the `HondanaConfig` builder, then run one of
//! its workflows.
//!
//! ```rust,no_run
//! use hondana::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> hondana::error::Result<()> {
//!     let config = HondanaConfig::builder()
//!         .images_root(PathBuf::from("./library/images"))
//!         .showcase_root(PathBuf::from("./library/showcase"))
//!         .build()?;
//!     config.preflight_check().await?;
//!
//!     // 1. Scan, order and pick a cover
//!     let request = SeriesRequest::new("One Piece", MediaKind::Manga, "./downloads/one_piece");
//!     let mut ingest = config.ingest_series(request).await?;
//!
//!     // 2. Materialize a chapter on demand
//!     let series = ingest.series.clone();
//!     if let Some(chapter) = ingest.series.chapters.first_mut() {
//!         let pages = config.materialize_chapter(&series, chapter).await?;
//!         println!("{} pages in {:?}", pages.pages.len(), pages.chapter_path);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! Archive extraction is delegated to an external tool (7-Zip) and PDF rendering
//! to Pdfium, both behind the [`ArchiveTool`](extractor::ArchiveTool) and
//! [`PageRenderer`](extractor::PageRenderer) ports.

pub mod collector;
pub mod cover;
pub mod encoding;
pub mod error;
pub mod extractor;
pub mod hondana;
pub mod normalizer;
pub mod ordering;
pub mod path_utils;
pub mod store;
pub mod types;

// Publicly expose the main `HondanaConfig` struct and its builder
pub use hondana::HondanaConfig;
pub use hondana::HondanaConfigBuilder;

// Re-export error and core types for direct access
pub use types::{
    ArchiveEntry, BatchReport, Category, ChapterMaterialization, ChapterRecord, CoverOutcome,
    DownloadStatus, ExtractionResult, MediaKind, OrderedChapter, PageScope, SeriesIngest,
    SeriesRecord, SeriesRequest, SourceKind,
};

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and traits, allowing you to
/// import everything you need with a single `use hondana::prelude::*;` statement.
pub mod prelude {
    pub use super::{
        ArchiveEntry, BatchReport, Category, ChapterMaterialization, ChapterRecord,
        CoverOutcome, DownloadStatus, ExtractionResult, HondanaConfig, HondanaConfigBuilder,
        MediaKind, OrderedChapter, PageScope, SeriesIngest, SeriesRecord, SeriesRequest,
        SourceKind, error, types,
    };
    pub use crate::collector::Collector;
    pub use crate::extractor::{ArchiveExtractor, ArchiveTool, PageRenderer, ToolOutput};
    pub use crate::store::{MemoryStore, SeriesStore};
    pub use std::path::{Path, PathBuf};
    pub use std::sync::Arc;
}
