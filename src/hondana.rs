use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::fs;
use tokio::spawn;
use tokio::sync::{Mutex, Semaphore};

use crate::collector::{Collector, MAX_CONCURRENT_SCANS};
use crate::cover::select_cover;
use crate::encoding::normalize_file_name;
use crate::error::{Error, Result};
use crate::extractor::pdf::PdfiumRenderer;
use crate::extractor::seven_zip::SevenZip;
use crate::extractor::{ArchiveExtractor, ArchiveTool, PageRenderer};
use crate::normalizer::{DEFAULT_QUALITY, ImageNormalizer, sniff_image};
use crate::ordering::{order_chapters, order_pages};
use crate::path_utils::{
    DEFAULT_MAX_PATH, DEFAULT_MAX_SOURCE_PATH, budget_chapter_path, budget_path,
    get_file_name_lossy, sanitize_filename, short_id, shorten_source_path,
};
use crate::store::SeriesStore;
use crate::types::{
    ArchiveEntry, BatchReport, CANONICAL_EXTENSION, ChapterMaterialization, ChapterNormalization,
    ChapterRecord, CoverOutcome, ExtractionResult, PageScope, SeriesIngest, SeriesRecord,
    SeriesRequest, extension_lowercase,
};

/// Smallest accepted path ceiling.
pub const MIN_PATH_CEILING: usize = 32;
/// Room kept under the ceiling for page file names inside a chapter directory (`/0001.jpeg`).
const PAGE_FILE_RESERVE: usize = 10;
/// Extension given to extracted files that had none.
const UNKNOWN_PAGE_EXTENSION: &str = "img";

/// One async lock per series directory, so a series is never ingested twice at once.
#[derive(Debug, Default)]
struct SeriesLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SeriesLocks {
    async fn for_series(&self, archives_dir: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(archives_dir.to_path_buf()).or_default())
    }
}

/// The Hondana pipeline configuration, built once and passed around explicitly.
///
/// It owns every path root and limit the pipeline needs, plus the two external
/// engines (archive tool and PDF renderer). The workflows live on it:
///
/// - [`ingest_series`](HondanaConfig::ingest_series): scan, repair, order and pick a cover
/// - [`ingest_many`](HondanaConfig::ingest_many): the same over many series, failures collected
/// - [`materialize_chapter`](HondanaConfig::materialize_chapter): extract and normalize one chapter
/// - [`materialize_cover`](HondanaConfig::materialize_cover): extract and write one cover
///
/// ```rust,no_run
/// # use hondana::prelude::*;
/// # use std::path::PathBuf;
/// let config = HondanaConfig::builder()
///     .images_root(PathBuf::from("./library/images"))
///     .showcase_root(PathBuf::from("./library/showcase"))
///     .build()
///     .expect("Invalid configuration");
/// ```
#[derive(Clone, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct HondanaConfig {
    /// Root of the chapter page tree: `<images_root>/<media-kind>/<series>/<chapter>/`.
    #[builder(setter(into))]
    pub images_root: PathBuf,

    /// Directory covers are written to, one file per series.
    #[builder(setter(into))]
    pub showcase_root: PathBuf,

    /// Where extraction temp directories are created.
    #[builder(setter(into), default = "std::env::temp_dir()")]
    pub temp_root: PathBuf,

    /// Ceiling for every path the pipeline creates.
    #[builder(default = "DEFAULT_MAX_PATH")]
    pub max_path_length: usize,

    /// Ceiling for source archive paths; longer ones are renamed in place.
    #[builder(default = "DEFAULT_MAX_SOURCE_PATH")]
    pub max_source_path_length: usize,

    /// Maximum concurrent directory scans and concurrent series in a batch.
    #[builder(default = "MAX_CONCURRENT_SCANS")]
    pub scan_concurrency: usize,

    /// JPEG quality (1-100) of canonical pages and covers.
    #[builder(default = "DEFAULT_QUALITY")]
    pub image_quality: u8,

    /// Whether mis-decoded archive file names are repaired before ordering.
    #[builder(default = "true")]
    pub normalize_encoding: bool,

    #[builder(default = "Arc::new(SevenZip::default()) as Arc<dyn ArchiveTool>")]
    pub archive_tool: Arc<dyn ArchiveTool>,

    #[builder(default = "Arc::new(PdfiumRenderer::default()) as Arc<dyn PageRenderer>")]
    pub page_renderer: Arc<dyn PageRenderer>,

    #[builder(setter(skip), default)]
    series_locks: Arc<SeriesLocks>,
}

impl std::fmt::Debug for HondanaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HondanaConfig")
            .field("images_root", &self.images_root)
            .field("showcase_root", &self.showcase_root)
            .field("temp_root", &self.temp_root)
            .field("max_path_length", &self.max_path_length)
            .field("max_source_path_length", &self.max_source_path_length)
            .field("scan_concurrency", &self.scan_concurrency)
            .field("image_quality", &self.image_quality)
            .field("normalize_encoding", &self.normalize_encoding)
            .finish()
    }
}

impl HondanaConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(quality) = self.image_quality {
            if !(1..=100).contains(&quality) {
                return Err(format!(
                    "Image quality must be between 1 and 100, got {}",
                    quality
                ));
            }
        }

        if self.scan_concurrency == Some(0) {
            return Err("Scan concurrency must be at least 1".to_string());
        }

        let max_path = self.max_path_length.unwrap_or(DEFAULT_MAX_PATH);
        let max_source = self
            .max_source_path_length
            .unwrap_or(DEFAULT_MAX_SOURCE_PATH);
        if max_path < MIN_PATH_CEILING || max_source < MIN_PATH_CEILING {
            return Err(format!(
                "Path ceilings must be at least {} characters",
                MIN_PATH_CEILING
            ));
        }
        if max_source > max_path {
            return Err(format!(
                "Source path ceiling ({}) cannot exceed the path ceiling ({})",
                max_source, max_path
            ));
        }

        Ok(())
    }
}

impl HondanaConfig {
    /// Creates a new builder for configuring `HondanaConfig`.
    pub fn builder() -> HondanaConfigBuilder {
        HondanaConfigBuilder::default()
    }

    /// Makes sure the output and temp roots exist and are directories.
    pub async fn preflight_check(&self) -> Result<&Self> {
        for root in [&self.images_root, &self.showcase_root, &self.temp_root] {
            if root.as_os_str().is_empty() {
                return Err(Error::InvalidPath(
                    root.clone(),
                    "Root directories must be set".to_string(),
                ));
            }

            fs::create_dir_all(root).await?;
            if !fs::metadata(root).await?.is_dir() {
                return Err(Error::InvalidPath(
                    root.clone(),
                    "Root path is not a directory".to_string(),
                ));
            }
        }
        Ok(self)
    }

    pub fn collector(&self) -> Collector {
        Collector::new(self.scan_concurrency)
    }

    pub fn extractor(&self) -> ArchiveExtractor {
        ArchiveExtractor::new(
            Arc::clone(&self.archive_tool),
            Arc::clone(&self.page_renderer),
            self.temp_root.clone(),
        )
    }

    pub fn normalizer(&self) -> ImageNormalizer {
        ImageNormalizer::new(self.image_quality)
    }

    /// Ingests a new series: scans its archive directory, repairs and shortens
    /// archive file names, orders the chapters and writes the series cover from
    /// the first chapter.
    ///
    /// A directory without archives yields a series with no chapters and no cover.
    pub async fn ingest_series(&self, request: SeriesRequest) -> Result<SeriesIngest> {
        let lock = self.series_locks.for_series(&request.archives_dir).await;
        let _guard = lock.lock().await;

        let entries = self.scan_series(&request.archives_dir).await?;
        let chapters: Vec<ChapterRecord> = order_chapters(request.media_kind, &entries)
            .into_iter()
            .enumerate()
            .map(|(index, ordering)| ChapterRecord::new(index + 1, ordering))
            .collect();

        let cover = match chapters.first() {
            Some(first) => Some(
                self.materialize_cover(&request.name, first.archives_path())
                    .await?,
            ),
            None => {
                warn!("Series '{}' has no chapters", request.name);
                None
            }
        };

        let series = SeriesRecord {
            sanitized_name: sanitize_filename(&request.name),
            name: request.name,
            media_kind: request.media_kind,
            archives_dir: request.archives_dir,
            cover_path: cover
                .as_ref()
                .and_then(|c| c.cover_path().map(Path::to_path_buf)),
            chapters,
            created_at: Utc::now(),
        };

        info!(
            "Ingested series '{}' with {} chapter(s)",
            series.name,
            series.chapters.len()
        );
        Ok(SeriesIngest { series, cover })
    }

    async fn scan_series(&self, archives_dir: &Path) -> Result<Vec<ArchiveEntry>> {
        let entries = self.collector().collect_archives(archives_dir).await?;
        let mut prepared = Vec::with_capacity(entries.len());

        for entry in entries {
            let mut path = entry.path;
            if self.normalize_encoding {
                let repaired = normalize_file_name(&path).await?;
                // Still on disk: the repaired name belongs to another archive
                if repaired != path && fs::try_exists(&path).await? {
                    warn!(
                        "Keeping {:?}, its repaired name is taken by {:?}",
                        path, repaired
                    );
                } else {
                    path = repaired;
                }
            }
            path = shorten_source_path(&path, self.max_source_path_length).await?;
            prepared.push(ArchiveEntry::new(path, entry.discovered_at));
        }

        Ok(prepared)
    }

    /// Ingests every request with at most `scan_concurrency` series in flight.
    ///
    /// Each successful series is saved to `store` on its own; a failing series
    /// is recorded in the report and never aborts the others.
    pub async fn ingest_many(
        &self,
        requests: Vec<SeriesRequest>,
        store: Arc<dyn SeriesStore>,
    ) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.scan_concurrency.max(1)));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let config = self.clone();
            let store = Arc::clone(&store);
            let semaphore = Arc::clone(&semaphore);
            let name = request.name.clone();

            handles.push((
                name,
                spawn(async move {
                    let _permit = semaphore.acquire_owned().await?;
                    let ingest = config.ingest_series(request).await?;
                    store.save_series(&ingest.series).await?;
                    Ok::<SeriesIngest, Error>(ingest)
                }),
            ));
        }

        let mut report = BatchReport::default();
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::AsyncTaskError(format!(
                    "Ingestion task for '{}' failed: {}",
                    name, e
                ))),
            };

            match outcome {
                Ok(_) => report.succeeded.push(name),
                Err(e) => {
                    warn!("Failed to ingest series '{}': {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            "Batch ingestion finished: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    /// Extracts `source` and writes the best cover image to the showcase directory.
    ///
    /// When no candidate matches a cover tier, the unfiltered extraction pass
    /// is tried once before giving up with [`CoverOutcome::NoValidCover`].
    pub async fn materialize_cover(&self, series_name: &str, source: &Path) -> Result<CoverOutcome> {
        let extractor = self.extractor();

        let extraction = extractor.extract(source, PageScope::Cover).await?;
        if let Some(outcome) = self.write_cover(series_name, &extraction).await? {
            release(extraction);
            return Ok(outcome);
        }

        let partial_failure = extraction.partial_failure;
        let already_unfiltered = extraction.used_fallback_mode;
        release(extraction);

        if already_unfiltered {
            warn!("No cover found in {:?}", source);
            return Ok(CoverOutcome::NoValidCover {
                partial_failure,
                used_fallback_mode: true,
            });
        }

        info!("No cover tier matched in {:?}, retrying unfiltered", source);
        let retry = extractor.extract_unfiltered(source, PageScope::Cover).await?;
        let outcome = match self.write_cover(series_name, &retry).await? {
            Some(outcome) => outcome,
            None => {
                warn!("No cover found in {:?}", source);
                CoverOutcome::NoValidCover {
                    partial_failure: partial_failure || retry.partial_failure,
                    used_fallback_mode: true,
                }
            }
        };
        release(retry);
        Ok(outcome)
    }

    async fn write_cover(
        &self,
        series_name: &str,
        extraction: &ExtractionResult,
    ) -> Result<Option<CoverOutcome>> {
        let mut candidates = Vec::with_capacity(extraction.candidate_image_paths.len());
        for path in &extraction.candidate_image_paths {
            match sniff_image(path).await {
                Ok(_) => candidates.push(path.clone()),
                Err(e) => debug!("Not a cover candidate: {}", e),
            }
        }
        order_pages(&mut candidates);

        let Some(chosen) = select_cover(&candidates) else {
            return Ok(None);
        };

        fs::create_dir_all(&self.showcase_root).await?;
        let cover_path = self.cover_path(series_name).await?;
        self.normalizer().convert(&chosen, &cover_path).await?;

        info!("Cover for '{}' written to {:?}", series_name, cover_path);
        Ok(Some(CoverOutcome::Selected {
            cover_path,
            source_image: get_file_name_lossy(&chosen),
            partial_failure: extraction.partial_failure,
            used_fallback_mode: extraction.used_fallback_mode,
        }))
    }

    /// Budgeted cover path, never one already written for another series or an
    /// earlier ingestion.
    async fn cover_path(&self, series_name: &str) -> Result<PathBuf> {
        let budget = |name: &str| {
            budget_path(
                &self.showcase_root,
                name,
                CANONICAL_EXTENSION,
                self.max_path_length,
            )
        };

        let candidate = budget(series_name)?;
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }

        warn!("{:?} is already in use, writing the cover to a new file", candidate);
        let disambiguated = budget(&format!("{}_{}", series_name, short_id(6)))?;
        if !fs::try_exists(&disambiguated).await? {
            return Ok(disambiguated);
        }
        // Truncation cut the suffix off
        budget("")
    }

    /// Extracts one chapter, lays its pages out as `0001.jpg`, `0002.jpg`, ...
    /// under the budgeted chapter directory and normalizes them.
    ///
    /// The record goes `NotDownloaded -> Downloading -> Downloaded`; on any
    /// failure it is rolled back to `NotDownloaded` and the chapter directory
    /// is removed.
    pub async fn materialize_chapter(
        &self,
        series: &SeriesRecord,
        chapter: &mut ChapterRecord,
    ) -> Result<ChapterMaterialization> {
        chapter.begin_download()?;

        match self.extract_chapter(series, chapter).await {
            Ok(materialized) => {
                chapter.finish_download(materialized.chapter_path.clone())?;
                info!(
                    "Materialized '{}' chapter {} ({} pages) into {:?}",
                    series.name,
                    chapter.number,
                    materialized.pages.len(),
                    materialized.chapter_path
                );
                Ok(materialized)
            }
            Err(e) => {
                chapter.rollback_download()?;
                warn!(
                    "Failed to materialize '{}' chapter {}: {}",
                    series.name, chapter.number, e
                );
                Err(e)
            }
        }
    }

    async fn extract_chapter(
        &self,
        series: &SeriesRecord,
        chapter: &ChapterRecord,
    ) -> Result<ChapterMaterialization> {
        let chapter_dir = self.chapter_dir(series, chapter).await?;
        let extraction = self
            .extractor()
            .extract(chapter.archives_path(), PageScope::All)
            .await?;

        let mut pages = extraction.candidate_image_paths.clone();
        order_pages(&mut pages);
        if pages.is_empty() {
            return Err(Error::NoPages(chapter.archives_path().to_path_buf()));
        }

        fs::create_dir_all(&chapter_dir).await?;
        let normalized = match self.lay_out_pages(&pages, &chapter_dir).await {
            Ok(normalized) if !normalized.pages.is_empty() => normalized,
            Ok(_) => {
                remove_chapter_dir(&chapter_dir).await;
                return Err(Error::NoPages(chapter.archives_path().to_path_buf()));
            }
            Err(e) => {
                remove_chapter_dir(&chapter_dir).await;
                return Err(e);
            }
        };

        let partial_failure = extraction.partial_failure;
        let used_fallback_mode = extraction.used_fallback_mode;
        release(extraction);

        Ok(ChapterMaterialization {
            chapter_path: chapter_dir,
            pages: normalized.pages,
            skipped: normalized.skipped,
            partial_failure,
            used_fallback_mode,
        })
    }

    async fn lay_out_pages(
        &self,
        pages: &[PathBuf],
        chapter_dir: &Path,
    ) -> Result<ChapterNormalization> {
        for (index, page) in pages.iter().enumerate() {
            let extension =
                extension_lowercase(page).unwrap_or_else(|| UNKNOWN_PAGE_EXTENSION.to_string());
            let target = chapter_dir.join(format!("{:04}.{}", index + 1, extension));
            move_file(page, &target).await?;
        }

        self.normalizer().normalize_chapter(chapter_dir).await
    }

    /// Budgeted chapter directory, never one that already holds files.
    async fn chapter_dir(&self, series: &SeriesRecord, chapter: &ChapterRecord) -> Result<PathBuf> {
        let base = self.images_root.join(series.media_kind.dir_name());
        let ceiling = self.max_path_length.saturating_sub(PAGE_FILE_RESERVE);

        let candidate = budget_chapter_path(&base, &series.name, &chapter.name, ceiling)?;
        if !is_occupied(&candidate).await? {
            return Ok(candidate);
        }

        let disambiguated = format!("{}_{}", chapter.name, short_id(6));
        warn!(
            "{:?} is already in use, materializing into a new directory",
            candidate
        );
        let renamed = budget_chapter_path(&base, &series.name, &disambiguated, ceiling)?;
        if !is_occupied(&renamed).await? {
            return Ok(renamed);
        }
        // Truncation cut the suffix off
        budget_chapter_path(&base, &series.name, "", ceiling)
    }

    /// Counts the canonical page files of each chapter, with at most
    /// `scan_concurrency` directories read at once. Chapters that are not
    /// downloaded, or whose directory cannot be read, count 0.
    pub async fn page_counts(&self, chapters: &[ChapterRecord]) -> Vec<usize> {
        let downloaded: Vec<(usize, PathBuf)> = chapters
            .iter()
            .enumerate()
            .filter_map(|(index, chapter)| {
                chapter
                    .chapter_path()
                    .filter(|_| chapter.is_downloaded())
                    .map(|path| (index, path.to_path_buf()))
            })
            .collect();

        let directories = downloaded.iter().map(|(_, path)| path.clone()).collect();
        let found = self
            .collector()
            .count_files_by_extension(directories, &[CANONICAL_EXTENSION])
            .await;

        let mut counts = vec![0; chapters.len()];
        for ((index, _), count) in downloaded.iter().zip(found) {
            counts[*index] = count;
        }
        counts
    }
}

async fn is_occupied(directory: &Path) -> Result<bool> {
    if !fs::try_exists(directory).await? {
        return Ok(false);
    }
    let mut entries = fs::read_dir(directory).await?;
    Ok(entries.next_entry().await?.is_some())
}

/// Renames `from` to `to`, copying across filesystems when a rename is not possible.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await?;
    Ok(())
}

/// Deletes an extraction's temp directory. The work built from it is already
/// in place, so a failure here is only logged.
fn release(extraction: ExtractionResult) {
    let output_dir = extraction.output_dir().to_path_buf();
    if let Err(e) = extraction.close() {
        warn!("Failed to remove temp directory {:?}: {}", output_dir, e);
    }
}

async fn remove_chapter_dir(chapter_dir: &Path) {
    if let Err(e) = fs::remove_dir_all(chapter_dir).await {
        warn!("Failed to clean up {:?}: {}", chapter_dir, e);
    }
}
