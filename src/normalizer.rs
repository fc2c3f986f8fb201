//! Byte-level image validation and re-encoding to the canonical format.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use log::{debug, info, warn};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::task::spawn_blocking;

use crate::collector::Collector;
use crate::error::{Error, Result};
use crate::ordering::order_pages;
use crate::types::{CANONICAL_EXTENSION, ChapterNormalization, ConversionOutcome};

/// JPEG quality used for every canonical page and cover.
pub const DEFAULT_QUALITY: u8 = 85;
/// Bytes read to recognize an image format.
const IMAGE_SNIFF_LENGTH: u64 = 512;
/// Marks a converted page waiting to replace its original (`0001.staged.jpg`).
const STAGING_SUFFIX: &str = "staged";

/// Identifies the image format of `path` from its content, never its extension.
///
/// # Errors
///
/// `UnsupportedFormat` when the leading bytes are not a known image type.
pub async fn sniff_image(path: &Path) -> Result<ImageFormat> {
    let file = fs::File::open(path).await?;
    let mut header = Vec::with_capacity(IMAGE_SNIFF_LENGTH as usize);
    file.take(IMAGE_SNIFF_LENGTH)
        .read_to_end(&mut header)
        .await?;

    let format = image::guess_format(&header)
        .map_err(|_| Error::UnsupportedFormat(path.to_path_buf(), "unknown".to_string()))?;

    let mime = format.to_mime_type();
    if !mime.starts_with("image/") {
        return Err(Error::UnsupportedFormat(path.to_path_buf(), mime.to_string()));
    }
    Ok(format)
}

/// Where the canonical version of `source` lives.
pub fn canonical_path(source: &Path) -> PathBuf {
    source.with_extension(CANONICAL_EXTENSION)
}

/// Re-encodes images to JPEG at a fixed quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageNormalizer {
    quality: u8,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl ImageNormalizer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Converts `source` into the canonical format at `destination`.
    ///
    /// Nothing is re-encoded when `source` already is a JPEG at `destination`,
    /// or when a different file already exists at `destination`. The output is
    /// written next to the destination and renamed into place, so a failed
    /// conversion never leaves a truncated page behind.
    pub async fn convert(&self, source: &Path, destination: &Path) -> Result<ConversionOutcome> {
        let format = sniff_image(source).await?;

        if source == destination {
            if format == ImageFormat::Jpeg {
                return Ok(ConversionOutcome::AlreadyCanonical);
            }
        } else if fs::try_exists(destination).await? {
            debug!("{:?} already exists, skipping conversion", destination);
            return Ok(ConversionOutcome::AlreadyCanonical);
        }

        let quality = self.quality;
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        spawn_blocking(move || encode_canonical(&source, &destination, format, quality)).await??;

        Ok(ConversionOutcome::Converted)
    }

    /// Converts every page of a chapter directory, all or nothing.
    ///
    /// Files failing the image check are skipped. If any conversion fails, the
    /// outputs created so far are removed and the originals are left untouched.
    /// Pages that carry the canonical name but another format are converted
    /// into a staging file and only swapped in once every page succeeded, then
    /// the originals and skipped files are deleted.
    pub async fn normalize_chapter(&self, chapter_dir: &Path) -> Result<ChapterNormalization> {
        let mut files = Collector::collect_top_level_files(chapter_dir).await?;
        order_pages(&mut files);

        let mut pages: Vec<PathBuf> = Vec::new();
        let mut skipped: Vec<PathBuf> = Vec::new();
        let mut created: Vec<PathBuf> = Vec::new();
        let mut originals: Vec<PathBuf> = Vec::new();
        let mut swaps: Vec<(PathBuf, PathBuf)> = Vec::new();

        for file in files {
            let destination = canonical_path(&file);

            let converted = match conversion_target(&file).await {
                Ok(target) => self
                    .convert(&file, &target)
                    .await
                    .map(|outcome| (target, outcome)),
                Err(e) => Err(e),
            };

            match converted {
                Ok((target, outcome)) => {
                    if target != file {
                        if outcome == ConversionOutcome::Converted {
                            created.push(target.clone());
                        }
                        if destination == file {
                            swaps.push((target, file));
                        } else {
                            originals.push(file);
                        }
                    }
                    if !pages.contains(&destination) {
                        pages.push(destination);
                    }
                }
                Err(Error::UnsupportedFormat(path, kind)) => {
                    warn!("Skipping {:?}: not an image ({})", path, kind);
                    skipped.push(file);
                }
                Err(e) => {
                    for output in &created {
                        if let Err(remove_error) = fs::remove_file(output).await {
                            warn!("Failed to remove {:?}: {}", output, remove_error);
                        }
                    }
                    return Err(e);
                }
            }
        }

        for (staged, page) in &swaps {
            fs::rename(staged, page).await?;
        }

        for original in originals.iter().chain(skipped.iter()) {
            if pages.contains(original) {
                continue;
            }
            fs::remove_file(original).await?;
        }

        info!(
            "Normalized {} page(s) in {:?}, skipped {}",
            pages.len(),
            chapter_dir,
            skipped.len()
        );
        Ok(ChapterNormalization { pages, skipped })
    }
}

/// Where a chapter page is converted to: its canonical name, or a staging
/// sibling when that name is taken by the page itself in another format.
async fn conversion_target(file: &Path) -> Result<PathBuf> {
    let destination = canonical_path(file);
    if destination != file || sniff_image(file).await? == ImageFormat::Jpeg {
        return Ok(destination);
    }

    let staged = file.with_extension(format!("{}.{}", STAGING_SUFFIX, CANONICAL_EXTENSION));
    if fs::try_exists(&staged).await? {
        fs::remove_file(&staged).await?;
    }
    Ok(staged)
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

fn encode_canonical(
    source: &Path,
    destination: &Path,
    format: ImageFormat,
    quality: u8,
) -> Result<()> {
    let bytes = std::fs::read(source)?;
    let image = image::load_from_memory_with_format(&bytes, format)?.to_rgb8();

    let partial = partial_path(destination);
    let written = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&partial)?);
        JpegEncoder::new_with_quality(&mut writer, quality).encode_image(&image)?;
        writer.flush()?;
        Ok(())
    })();

    if let Err(e) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }

    std::fs::rename(&partial, destination)?;
    Ok(())
}
