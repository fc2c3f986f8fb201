//! Archive and PDF extraction into scoped temp directories.
//!
//! The heavy lifting is delegated to external engines behind two blocking
//! ports, [`ArchiveTool`] and [`PageRenderer`], so tests can swap in fakes.
//! [`ArchiveExtractor`] drives them from async code, decides what counts as a
//! partial success and guarantees the temp directory disappears on every path:
//! it is owned by the returned [`ExtractionResult`], or dropped with the error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::task::spawn_blocking;

use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::normalizer::sniff_image;
use crate::types::{
    ExtractionResult, PAGE_IMAGE_EXTENSIONS, PageScope, SourceKind, extension_lowercase,
    is_page_image,
};

pub mod pdf;
pub mod seven_zip;

/// Bytes read from the head of a source file to decide its kind.
pub const SNIFF_LENGTH: usize = 8 * 1024;
/// A PDF header may be preceded by junk, but only within this window.
const PDF_HEADER_WINDOW: usize = 1024;
/// Exit status the archive tool uses for CRC/data errors.
pub const PARTIAL_DATA_EXIT_CODE: i32 = 2;

const PDF_MAGIC: &[u8] = b"%PDF-";
const ARCHIVE_MAGICS: [&[u8]; 5] = [
    b"PK\x03\x04",
    b"PK\x05\x06",
    b"PK\x07\x08",
    b"Rar!\x1a\x07",
    b"7z\xbc\xaf\x27\x1c",
];

lazy_static! {
    static ref PARTIAL_DATA_OUTPUT: Regex = Regex::new(r"CRC Failed|Data Error").unwrap();
}

/// Captured result of one archive tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Port to the external compression tool.
///
/// Implementations block until the tool exits. A non-zero exit is reported in
/// [`ToolOutput`], not as an error; only failing to run the tool at all is an error.
pub trait ArchiveTool: Send + Sync {
    /// Extracts `archive` into `output_dir`, keeping only entries matching
    /// `filters` (glob patterns such as `*.jpg`) when any are given.
    fn run(&self, archive: &Path, output_dir: &Path, filters: &[String]) -> Result<ToolOutput>;
}

/// Port to a PDF rasterizer.
pub trait PageRenderer: Send + Sync {
    /// Renders up to `max_pages` pages (all when `None`) of `document` as image
    /// files inside `output_dir`, returning them in page order.
    fn render_pages(
        &self,
        document: &Path,
        output_dir: &Path,
        max_pages: Option<usize>,
    ) -> Result<Vec<PathBuf>>;
}

/// Glob filters for the image-only extraction pass.
pub fn image_filters() -> Vec<String> {
    PAGE_IMAGE_EXTENSIONS
        .iter()
        .map(|extension| format!("*.{}", extension))
        .collect()
}

/// Decides the source kind from its leading bytes, falling back to the extension.
pub fn classify_source(header: &[u8], path: &Path) -> Result<SourceKind> {
    let pdf_window = &header[..header.len().min(PDF_HEADER_WINDOW)];
    if pdf_window
        .windows(PDF_MAGIC.len())
        .any(|window| window == PDF_MAGIC)
    {
        return Ok(SourceKind::Pdf);
    }
    if ARCHIVE_MAGICS.iter().any(|magic| header.starts_with(magic)) {
        return Ok(SourceKind::Archive);
    }

    match extension_lowercase(path).as_deref() {
        Some("pdf") => Ok(SourceKind::Pdf),
        Some("cbz" | "cbr" | "zip" | "rar") => Ok(SourceKind::Archive),
        _ => Err(Error::Unsupported(format!(
            "Cannot tell the format of {:?}",
            path
        ))),
    }
}

/// Reads the head of `path` and classifies it.
pub async fn sniff_source(path: &Path) -> Result<SourceKind> {
    let file = fs::File::open(path).await?;
    let mut header = Vec::with_capacity(SNIFF_LENGTH);
    file.take(SNIFF_LENGTH as u64)
        .read_to_end(&mut header)
        .await?;
    classify_source(&header, path)
}

/// Applies the exit status policy of the archive tool.
///
/// Returns `Ok(false)` on success, `Ok(true)` on a partial success (CRC or data
/// error reported with [`PARTIAL_DATA_EXIT_CODE`]) and an error for anything else.
pub fn interpret_tool_output(output: &ToolOutput) -> Result<bool> {
    let combined = output.combined();
    match output.exit_code {
        Some(0) => Ok(false),
        Some(PARTIAL_DATA_EXIT_CODE) if PARTIAL_DATA_OUTPUT.is_match(&combined) => Ok(true),
        code => Err(Error::ArchiveTool {
            code,
            output: combined.trim().to_string(),
        }),
    }
}

/// Materializes chapter sources into temp directories.
#[derive(Clone)]
pub struct ArchiveExtractor {
    tool: Arc<dyn ArchiveTool>,
    renderer: Arc<dyn PageRenderer>,
    temp_root: PathBuf,
}

impl std::fmt::Debug for ArchiveExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveExtractor")
            .field("temp_root", &self.temp_root)
            .finish()
    }
}

impl ArchiveExtractor {
    pub fn new(
        tool: Arc<dyn ArchiveTool>,
        renderer: Arc<dyn PageRenderer>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tool,
            renderer,
            temp_root: temp_root.into(),
        }
    }

    /// Extracts `source` worst-first: an image-only pass, then an unfiltered
    /// pass if the first one produced no image at all.
    pub async fn extract(&self, source: &Path, scope: PageScope) -> Result<ExtractionResult> {
        self.extract_with(source, scope, true).await
    }

    /// Extracts everything in one unfiltered pass.
    pub async fn extract_unfiltered(
        &self,
        source: &Path,
        scope: PageScope,
    ) -> Result<ExtractionResult> {
        self.extract_with(source, scope, false).await
    }

    async fn extract_with(
        &self,
        source: &Path,
        scope: PageScope,
        filtered_first: bool,
    ) -> Result<ExtractionResult> {
        let kind = sniff_source(source).await?;

        fs::create_dir_all(&self.temp_root).await?;
        let temp_dir = tempfile::Builder::new()
            .prefix("hondana-")
            .tempdir_in(&self.temp_root)?;

        let mut result = ExtractionResult {
            temp_dir,
            candidate_image_paths: Vec::new(),
            partial_failure: false,
            used_fallback_mode: false,
        };

        match kind {
            SourceKind::Pdf => {
                let max_pages = match scope {
                    PageScope::Cover => Some(1),
                    PageScope::All => None,
                };
                result.candidate_image_paths = self
                    .render(source, result.output_dir(), max_pages)
                    .await?;
            }
            SourceKind::Archive => {
                self.extract_archive(source, &mut result, filtered_first)
                    .await?;
            }
        }

        info!(
            "Extracted {} image(s) from {:?} (partial: {}, fallback: {})",
            result.candidate_image_paths.len(),
            source,
            result.partial_failure,
            result.used_fallback_mode
        );
        Ok(result)
    }

    async fn extract_archive(
        &self,
        source: &Path,
        result: &mut ExtractionResult,
        filtered_first: bool,
    ) -> Result<()> {
        let output_dir = result.output_dir().to_path_buf();

        if filtered_first {
            result.partial_failure |= self.run_tool(source, &output_dir, image_filters()).await?;
            result.candidate_image_paths = image_files(&output_dir, false).await?;
            if !result.candidate_image_paths.is_empty() {
                return Ok(());
            }
            warn!(
                "Image-only pass found nothing in {:?}, extracting everything",
                source
            );
        }

        result.used_fallback_mode = true;
        result.partial_failure |= self.run_tool(source, &output_dir, Vec::new()).await?;
        result.candidate_image_paths = image_files(&output_dir, true).await?;
        Ok(())
    }

    async fn run_tool(&self, source: &Path, output_dir: &Path, filters: Vec<String>) -> Result<bool> {
        let tool = Arc::clone(&self.tool);
        let archive = source.to_path_buf();
        let output = output_dir.to_path_buf();

        let tool_output =
            spawn_blocking(move || tool.run(&archive, &output, &filters)).await??;

        let partial = interpret_tool_output(&tool_output)?;
        if partial {
            warn!(
                "Partial extraction of {:?}: {}",
                source,
                tool_output.combined().trim()
            );
        }
        Ok(partial)
    }

    async fn render(
        &self,
        source: &Path,
        output_dir: &Path,
        max_pages: Option<usize>,
    ) -> Result<Vec<PathBuf>> {
        let renderer = Arc::clone(&self.renderer);
        let document = source.to_path_buf();
        let output = output_dir.to_path_buf();

        spawn_blocking(move || renderer.render_pages(&document, &output, max_pages)).await?
    }
}

/// Lists extracted image files. With `sniff_unknown`, files without a known
/// image extension are kept when their magic bytes say they are images.
async fn image_files(directory: &Path, sniff_unknown: bool) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for path in Collector::collect_files(directory).await? {
        if is_page_image(&path) {
            images.push(path);
        } else if sniff_unknown && sniff_image(&path).await.is_ok() {
            debug!("Keeping {:?}: content sniffs as an image", path);
            images.push(path);
        }
    }
    Ok(images)
}
