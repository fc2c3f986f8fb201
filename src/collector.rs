//! Directory scanning for source archives and extracted files.
//!
//! This module lists chapter archives in a series directory, walks extraction
//! output, and counts files across many directories with a bounded number of
//! scans in flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, warn};
use tokio::fs::{ReadDir, read_dir};
use tokio::spawn;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::path_utils::is_hidden_file;
use crate::types::{ArchiveEntry, extension_lowercase, is_source_file};

/// Limits the number of concurrent directory scans
pub const MAX_CONCURRENT_SCANS: usize = 8;
/// Resource-fork folders added by macOS archivers
const MACOS_METADATA_DIR: &str = "__MACOSX";

/// Scans directories for archives, pages and file counts.
#[derive(Debug, Clone)]
pub struct Collector {
    max_concurrent_scans: usize,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_SCANS)
    }
}

impl Collector {
    /// Creates a new Collector allowing `max_concurrent_scans` scans at once (at least one).
    pub fn new(max_concurrent_scans: usize) -> Self {
        Self {
            max_concurrent_scans: max_concurrent_scans.max(1),
        }
    }

    /// Lists the chapter archives of a series directory.
    ///
    /// Entries are sorted by file name before their scan indices are assigned,
    /// so an unchanged directory always yields the same list. An empty result
    /// is not an error.
    ///
    /// # Arguments
    ///
    /// * `directory` - Series directory holding `.cbz/.cbr/.zip/.rar/.pdf` files
    ///
    /// # Returns
    ///
    /// * `Result<Vec<ArchiveEntry>>` - Archives in scan order
    pub async fn collect_archives(&self, directory: &Path) -> Result<Vec<ArchiveEntry>> {
        let mut archives: Vec<PathBuf> = Self::collect_top_level_files(directory)
            .await?
            .into_iter()
            .filter(|path| is_source_file(path))
            .collect();

        archives.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        if archives.is_empty() {
            warn!("No archives found in {:?}", directory);
        }

        Ok(archives
            .into_iter()
            .enumerate()
            .map(|(index, path)| ArchiveEntry::new(path, index))
            .collect())
    }

    /// Counts the files with one of `extensions` directly inside each directory.
    ///
    /// At most `max_concurrent_scans` directories are read at once; the rest
    /// wait for a permit. A directory that cannot be read counts as 0 instead
    /// of failing the batch. Counts are returned in input order.
    pub async fn count_files_by_extension(
        &self,
        directories: Vec<PathBuf>,
        extensions: &[&str],
    ) -> Vec<usize> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_scans));
        let extensions: Arc<Vec<String>> =
            Arc::new(extensions.iter().map(|e| e.to_ascii_lowercase()).collect());
        let mut handles: Vec<JoinHandle<usize>> = Vec::new();

        for directory in directories {
            let semaphore = Arc::clone(&semaphore);
            let extensions = Arc::clone(&extensions);

            handles.push(spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        warn!("Scan limiter closed before {:?}: {}", directory, e);
                        return 0;
                    }
                };

                match Self::count_in_directory(&directory, &extensions).await {
                    Ok(count) => count,
                    Err(e) => {
                        warn!("Failed to scan {:?}, counting 0: {}", directory, e);
                        0
                    }
                }
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|e| {
                    warn!("Scan task failed, counting 0: {}", e);
                    0
                })
            })
            .collect()
    }

    async fn count_in_directory(directory: &Path, extensions: &[String]) -> Result<usize> {
        let count = Self::collect_top_level_files(directory)
            .await?
            .iter()
            .filter(|path| extension_lowercase(path).is_some_and(|e| extensions.contains(&e)))
            .count();
        debug!("{:?}: {} matching files", directory, count);
        Ok(count)
    }

    /// Recursively lists every regular file under `directory`, skipping hidden
    /// entries and macOS resource-fork folders.
    pub async fn collect_files(directory: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![directory.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries: ReadDir = read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if is_hidden_file(&path) {
                    continue;
                }

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if entry.file_name() != MACOS_METADATA_DIR {
                        pending.push(path);
                    }
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }

    /// Collects the non-hidden files directly inside `directory`.
    pub async fn collect_top_level_files(directory: &Path) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = Vec::new();

        let mut paths: ReadDir = read_dir(directory).await?;

        while let Some(entry) = paths.next_entry().await? {
            let path = entry.path();

            if is_hidden_file(&path) {
                continue;
            }

            if !entry.file_type().await?.is_file() {
                continue;
            }

            entries.push(path);
        }

        Ok(entries)
    }
}
