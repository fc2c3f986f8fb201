//! Common test utilities and fakes for the Hondana crate.
//!
//! Provides test directory setup, tiny generated images and archives, and
//! golden-output fakes for the archive tool and PDF renderer ports.

use hondana::error::{Error, Result};
use hondana::extractor::{ArchiveTool, PageRenderer, ToolOutput};
use image::{ImageFormat, Rgb, RgbImage};
use rand::{Rng, distributions::Alphanumeric};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;

#[allow(dead_code)]
pub const TEST_TMP_DIR: &str = "tests/tmp";
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-test directory layout, unique per call.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct TestDirs {
    pub base: PathBuf,
    pub source_dir: PathBuf,
    pub images_root: PathBuf,
    pub showcase_root: PathBuf,
    pub temp_root: PathBuf,
}

/// Creates a clean, uniquely named test directory with the pipeline roots inside.
#[allow(dead_code)]
pub async fn setup_test_dirs(sub_path: &str) -> TestDirs {
    let rand_string: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let unique_sub_path = format!("{}-{}", sub_path, rand_string);
    let base = PathBuf::from(TEST_TMP_DIR).join(unique_sub_path);
    if base.exists() {
        fs::remove_dir_all(&base).await.unwrap();
    }

    let dirs = TestDirs {
        source_dir: base.join("source"),
        images_root: base.join("images"),
        showcase_root: base.join("showcase"),
        temp_root: base.join("temp"),
        base,
    };
    fs::create_dir_all(&dirs.source_dir).await.unwrap();
    fs::create_dir_all(&dirs.temp_root).await.unwrap();
    dirs
}

/// Number of entries left in a directory (0 if it does not exist).
#[allow(dead_code)]
pub async fn count_entries(dir: &Path) -> usize {
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return 0;
    };
    let mut count = 0;
    while let Ok(Some(_)) = entries.next_entry().await {
        count += 1;
    }
    count
}

/// Writes a small solid-color image synchronously, creating parent directories.
#[allow(dead_code)]
pub fn write_image_sync(path: &Path, format: ImageFormat) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let img = RgbImage::from_pixel(16, 16, Rgb([200, 40, 40]));
    img.save_with_format(path, format).map_err(Error::Image)
}

/// Creates a minimal dummy JPEG image at the given path.
#[allow(dead_code)]
pub async fn create_dummy_image(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_image_sync(&path, ImageFormat::Jpeg))
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))?
}

/// Creates a minimal dummy PNG image at the given path.
#[allow(dead_code)]
pub async fn create_dummy_png(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_image_sync(&path, ImageFormat::Png))
        .await
        .map_err(|e| Error::AsyncTaskError(e.to_string()))?
}

/// Writes a real zip archive (used as `.cbz`) with the given entries.
#[allow(dead_code)]
pub fn create_zip(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// Creates a placeholder chapter archive; the fake tool never reads its content.
#[allow(dead_code)]
pub fn create_archive(path: &Path) {
    create_zip(path, &[("placeholder.txt", &b"page data"[..])]);
}

/// Content a fake pass writes for one output file.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum FakeContent {
    Jpeg,
    Png,
    Bytes(Vec<u8>),
}

/// One scripted archive tool invocation.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct FakePass {
    pub files: Vec<(String, FakeContent)>,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

#[allow(dead_code)]
impl FakePass {
    fn with(files: &[(&str, FakeContent)], exit_code: Option<i32>, stderr: &str) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, content)| (name.to_string(), content.clone()))
                .collect(),
            exit_code,
            stderr: stderr.to_string(),
        }
    }

    pub fn ok(files: &[(&str, FakeContent)]) -> Self {
        Self::with(files, Some(0), "")
    }

    /// Exit 2 with a CRC error on stderr.
    pub fn crc(files: &[(&str, FakeContent)]) -> Self {
        Self::with(files, Some(2), "ERROR: CRC Failed : broken.jpg")
    }

    pub fn fatal(exit_code: i32) -> Self {
        Self::with(&[], Some(exit_code), "ERROR: Can not open the file as archive")
    }
}

/// Golden-output [`ArchiveTool`]: each call consumes the next scripted pass and
/// writes its files, honoring extension filters like the real tool. Once the
/// script is exhausted, the `repeat` pass (if any) is served forever.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct FakeArchiveTool {
    passes: Mutex<VecDeque<FakePass>>,
    repeat: Option<FakePass>,
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

#[allow(dead_code)]
impl FakeArchiveTool {
    pub fn new(passes: Vec<FakePass>) -> Arc<Self> {
        Arc::new(Self {
            passes: Mutex::new(passes.into()),
            ..Default::default()
        })
    }

    pub fn repeating(pass: FakePass) -> Arc<Self> {
        Arc::new(Self {
            repeat: Some(pass),
            ..Default::default()
        })
    }

    /// `(output_dir, filters)` of every invocation, in order.
    pub fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ArchiveTool for FakeArchiveTool {
    fn run(&self, _archive: &Path, output_dir: &Path, filters: &[String]) -> Result<ToolOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((output_dir.to_path_buf(), filters.to_vec()));

        let pass = self
            .passes
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_else(|| FakePass::ok(&[]));

        for (name, content) in &pass.files {
            let lowered = name.to_lowercase();
            let selected = filters.is_empty()
                || filters
                    .iter()
                    .any(|f| lowered.ends_with(f.trim_start_matches('*')));
            if !selected {
                continue;
            }

            let target = output_dir.join(name);
            match content {
                FakeContent::Jpeg => write_image_sync(&target, ImageFormat::Jpeg)?,
                FakeContent::Png => write_image_sync(&target, ImageFormat::Png)?,
                FakeContent::Bytes(bytes) => {
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&target, bytes)?;
                }
            }
        }

        Ok(ToolOutput {
            exit_code: pass.exit_code,
            stdout: String::new(),
            stderr: pass.stderr,
        })
    }
}

/// [`PageRenderer`] fake producing `pages` PNG pages per document.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct FakeRenderer {
    pages: usize,
    requests: Mutex<Vec<Option<usize>>>,
}

#[allow(dead_code)]
impl FakeRenderer {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            ..Default::default()
        })
    }

    /// The `max_pages` argument of every call.
    pub fn requests(&self) -> Vec<Option<usize>> {
        self.requests.lock().unwrap().clone()
    }
}

impl PageRenderer for FakeRenderer {
    fn render_pages(
        &self,
        document: &Path,
        output_dir: &Path,
        max_pages: Option<usize>,
    ) -> Result<Vec<PathBuf>> {
        self.requests.lock().unwrap().push(max_pages);

        let count = max_pages.map_or(self.pages, |max| max.min(self.pages));
        if count == 0 {
            return Err(Error::NoPages(document.to_path_buf()));
        }

        (1..=count)
            .map(|page| {
                let path = output_dir.join(format!("page_{:04}.png", page));
                write_image_sync(&path, ImageFormat::Png)?;
                Ok(path)
            })
            .collect()
    }
}
