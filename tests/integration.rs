//! Integration tests for the Hondana crate.
//!
//! These tests run the extraction and ingestion workflows end to end against
//! scripted fakes of the archive tool and the PDF renderer.

use hondana::error::{Error, Result};
use hondana::extractor::seven_zip::SevenZip;
use hondana::normalizer::sniff_image;
use hondana::prelude::*;
use image::ImageFormat;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::timeout;

mod common;
use common::{
    FakeArchiveTool, FakeContent, FakePass, FakeRenderer, TEST_TIMEOUT, TestDirs, count_entries,
    create_archive, setup_test_dirs, write_image_sync,
};

fn config(dirs: &TestDirs, tool: Arc<FakeArchiveTool>, renderer: Arc<FakeRenderer>) -> HondanaConfig {
    HondanaConfig::builder()
        .images_root(dirs.images_root.clone())
        .showcase_root(dirs.showcase_root.clone())
        .temp_root(dirs.temp_root.clone())
        .archive_tool(tool)
        .page_renderer(renderer)
        .build()
        .unwrap()
}

fn manga_pages() -> FakePass {
    FakePass::ok(&[
        ("credits.png", FakeContent::Png),
        ("p002.jpg", FakeContent::Jpeg),
        ("p001.jpg", FakeContent::Jpeg),
    ])
}

#[tokio::test]
async fn test_crc_partial_extraction_is_a_warning() -> Result<()> {
    let dirs = setup_test_dirs("crc_partial").await;
    let archive = dirs.source_dir.join("Ch.1.cbz");
    create_archive(&archive);

    let tool = FakeArchiveTool::new(vec![FakePass::crc(&[
        ("001.jpg", FakeContent::Jpeg),
        ("002.jpg", FakeContent::Jpeg),
    ])]);
    let extractor = ArchiveExtractor::new(tool.clone(), FakeRenderer::new(1), &dirs.temp_root);

    let extraction = extractor.extract(&archive, PageScope::Cover).await?;
    assert!(extraction.partial_failure);
    assert!(!extraction.used_fallback_mode);
    assert_eq!(extraction.candidate_image_paths.len(), 2);
    assert_eq!(tool.calls().len(), 1);

    let output_dir = extraction.output_dir().to_path_buf();
    assert!(output_dir.starts_with(&dirs.temp_root));
    extraction.close()?;
    assert!(!output_dir.exists());
    Ok(())
}

#[tokio::test]
async fn test_crc_without_files_yields_no_valid_cover() -> Result<()> {
    let dirs = setup_test_dirs("crc_empty").await;
    let archive = dirs.source_dir.join("Ch.1.cbz");
    create_archive(&archive);

    let tool = FakeArchiveTool::new(vec![FakePass::crc(&[]), FakePass::crc(&[])]);
    let config = config(&dirs, tool.clone(), FakeRenderer::new(1));

    let outcome = config.materialize_cover("Broken Series", &archive).await?;
    assert_eq!(
        outcome,
        CoverOutcome::NoValidCover {
            partial_failure: true,
            used_fallback_mode: true,
        }
    );
    assert_eq!(count_entries(&dirs.temp_root).await, 0);
    assert_eq!(count_entries(&dirs.showcase_root).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_fatal_tool_errors_clean_up_temp_dirs() -> Result<()> {
    let dirs = setup_test_dirs("fatal_exit").await;
    let archive = dirs.source_dir.join("Ch.1.cbz");
    create_archive(&archive);

    let tool = FakeArchiveTool::new(vec![FakePass::fatal(7)]);
    let extractor = ArchiveExtractor::new(tool, FakeRenderer::new(1), &dirs.temp_root);
    let result = extractor.extract(&archive, PageScope::All).await;
    assert!(matches!(result, Err(Error::ArchiveTool { code: Some(7), .. })));
    assert_eq!(count_entries(&dirs.temp_root).await, 0);

    let missing_binary = Arc::new(SevenZip::new("/nonexistent/bin/7z"));
    let extractor = ArchiveExtractor::new(missing_binary, FakeRenderer::new(1), &dirs.temp_root);
    let result = extractor.extract(&archive, PageScope::All).await;
    assert!(matches!(result, Err(Error::ToolUnavailable(_))));
    assert_eq!(count_entries(&dirs.temp_root).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_unfiltered_pass_when_filter_finds_nothing() -> Result<()> {
    let dirs = setup_test_dirs("fallback_pass").await;
    let archive = dirs.source_dir.join("Ch.1.cbr");
    create_archive(&archive);

    let tool = FakeArchiveTool::repeating(FakePass::ok(&[
        ("scans/page01.dat", FakeContent::Jpeg),
        ("readme.txt", FakeContent::Bytes(b"scanned by someone".to_vec())),
    ]));
    let extractor = ArchiveExtractor::new(tool.clone(), FakeRenderer::new(1), &dirs.temp_root);

    let extraction = extractor.extract(&archive, PageScope::Cover).await?;
    assert!(extraction.used_fallback_mode);
    assert!(!extraction.partial_failure);
    assert_eq!(extraction.candidate_image_paths.len(), 1);
    assert!(extraction.candidate_image_paths[0].ends_with("scans/page01.dat"));

    let calls = tool.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].1.contains(&"*.jpg".to_string()));
    assert!(calls[1].1.is_empty());
    // Both passes share the same output directory
    assert_eq!(calls[0].0, calls[1].0);

    drop(extraction);
    assert_eq!(count_entries(&dirs.temp_root).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_cover_retries_unfiltered_pass() -> Result<()> {
    let dirs = setup_test_dirs("cover_retry").await;
    let archive = dirs.source_dir.join("Ch.1.cbz");
    create_archive(&archive);

    // The image-only pass finds pages without any cover signal; the full pass
    // also yields a numbered page hidden behind an odd extension.
    let tool = FakeArchiveTool::new(vec![
        FakePass::ok(&[("alpha.jpg", FakeContent::Jpeg)]),
        FakePass::ok(&[
            ("alpha.jpg", FakeContent::Jpeg),
            ("scan_000.bin", FakeContent::Jpeg),
        ]),
    ]);
    let config = config(&dirs, tool.clone(), FakeRenderer::new(1));

    let outcome = config.materialize_cover("Retry", &archive).await?;
    match &outcome {
        CoverOutcome::Selected {
            source_image,
            used_fallback_mode,
            cover_path,
            ..
        } => {
            assert_eq!(source_image, "scan_000.bin");
            assert!(*used_fallback_mode);
            assert_eq!(sniff_image(cover_path).await?, ImageFormat::Jpeg);
        }
        other => panic!("expected a cover, got {:?}", other),
    }
    assert_eq!(tool.calls().len(), 2);
    assert_eq!(count_entries(&dirs.temp_root).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_ingest_and_materialize_manga_series() -> Result<()> {
    let dirs = setup_test_dirs("ingest_manga").await;
    let series_dir = dirs.source_dir.join("One Piece");
    for name in ["Vol.1 Ch.2.cbz", "Extras.cbz", "Vol.1 Ch.1.cbz"] {
        create_archive(&series_dir.join(name));
    }

    let tool = FakeArchiveTool::repeating(manga_pages());
    let config = config(&dirs, tool, FakeRenderer::new(1));
    config.preflight_check().await?;

    let request = SeriesRequest::new("One Piece", MediaKind::Manga, series_dir.clone());
    let ingest = timeout(TEST_TIMEOUT, config.ingest_series(request))
        .await
        .expect("Test timed out")?;

    let mut series = ingest.series;
    let names: Vec<&str> = series.chapters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Vol.1 Ch.1", "Vol.1 Ch.2", "Extras"]);
    assert_eq!(
        series.chapters.iter().map(|c| c.number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(series.sanitized_name, "One_Piece");

    let cover = ingest.cover.expect("series has chapters");
    let cover_path = cover.cover_path().expect("a cover was selected").to_path_buf();
    assert_eq!(cover_path.file_name().unwrap(), "One_Piece.jpg");
    assert!(cover_path.starts_with(std::path::absolute(&dirs.showcase_root)?));
    assert_eq!(sniff_image(&cover_path).await?, ImageFormat::Jpeg);
    assert_eq!(series.cover_path.as_deref(), Some(cover_path.as_path()));
    assert!(matches!(cover, CoverOutcome::Selected { ref source_image, .. } if source_image == "p001.jpg"));

    // Materialize the first chapter on demand
    let snapshot = series.clone();
    let chapter = &mut series.chapters[0];
    let materialized = config.materialize_chapter(&snapshot, chapter).await?;

    let expected_dir = std::path::absolute(&dirs.images_root)?
        .join("manga")
        .join("One_Piece")
        .join("Vol.1_Ch.1");
    assert_eq!(materialized.chapter_path, expected_dir);
    assert_eq!(
        materialized.pages,
        vec![
            expected_dir.join("0001.jpg"),
            expected_dir.join("0002.jpg"),
            expected_dir.join("0003.jpg"),
        ]
    );
    assert!(!materialized.partial_failure);
    assert!(chapter.is_downloaded());
    assert_eq!(chapter.chapter_path(), Some(expected_dir.as_path()));
    assert_eq!(count_entries(&expected_dir).await, 3);
    assert!(!expected_dir.join("0001.png").exists());

    assert_eq!(config.page_counts(&series.chapters).await, vec![3, 0, 0]);

    // Already downloaded
    let chapter = &mut series.chapters[0];
    assert!(matches!(
        config.materialize_chapter(&snapshot, chapter).await,
        Err(Error::InvalidTransition { .. })
    ));
    assert!(chapter.is_downloaded());
    assert_eq!(count_entries(&dirs.temp_root).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_chapter_is_rolled_back() -> Result<()> {
    let dirs = setup_test_dirs("rollback").await;
    let series_dir = dirs.source_dir.join("Naruto");
    create_archive(&series_dir.join("Ch.1.cbz"));

    let tool = FakeArchiveTool::new(vec![manga_pages(), FakePass::fatal(9)]);
    let config = config(&dirs, tool, FakeRenderer::new(1));

    let request = SeriesRequest::new("Naruto", MediaKind::Manga, series_dir);
    let mut series = config.ingest_series(request).await?.series;
    let snapshot = series.clone();
    let chapter = &mut series.chapters[0];

    let result = config.materialize_chapter(&snapshot, chapter).await;
    assert!(matches!(result, Err(Error::ArchiveTool { code: Some(9), .. })));
    assert_eq!(chapter.status(), DownloadStatus::NotDownloaded);
    assert_eq!(chapter.chapter_path(), None);
    assert_eq!(count_entries(&dirs.images_root.join("manga").join("Naruto")).await, 0);
    assert_eq!(count_entries(&dirs.temp_root).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_pdf_comic_series() -> Result<()> {
    let dirs = setup_test_dirs("pdf_comic").await;
    let series_dir = dirs.source_dir.join("Hulk");
    tokio::fs::create_dir_all(&series_dir).await?;
    for name in ["02 Hulk #2.pdf", "01 Hulk #1.pdf"] {
        tokio::fs::write(series_dir.join(name), b"%PDF-1.4\n%fake\n").await?;
    }

    let renderer = FakeRenderer::new(4);
    let config = config(&dirs, FakeArchiveTool::new(Vec::new()), renderer.clone());

    let request = SeriesRequest::new("Hulk", MediaKind::Comic, series_dir);
    let ingest = config.ingest_series(request).await?;
    let mut series = ingest.series;
    assert_eq!(series.chapters[0].name, "01 Hulk #1");
    assert_eq!(series.chapters[0].ordering.reading_index, Some(1));
    assert_eq!(series.chapters[0].ordering.issue_number, Some(1));
    assert!(matches!(ingest.cover, Some(CoverOutcome::Selected { .. })));

    let snapshot = series.clone();
    let materialized = config
        .materialize_chapter(&snapshot, &mut series.chapters[1])
        .await?;
    assert_eq!(materialized.pages.len(), 4);
    assert!(
        materialized
            .chapter_path
            .starts_with(std::path::absolute(&dirs.images_root)?.join("comic"))
    );
    assert_eq!(materialized.chapter_path.file_name().unwrap(), "02_Hulk_2");

    // Cover renders only the first page, chapters render everything
    assert_eq!(renderer.requests(), vec![Some(1), None]);
    Ok(())
}

#[tokio::test]
async fn test_ingest_repairs_archive_names() -> Result<()> {
    let dirs = setup_test_dirs("ingest_encoding").await;
    let series_dir = dirs.source_dir.join("Berserk");
    create_archive(&series_dir.join("Cap\u{00C3}\u{00AD}tulo 2.cbz"));
    create_archive(&series_dir.join("Capitulo 1.cbz"));

    let config = config(
        &dirs,
        FakeArchiveTool::repeating(manga_pages()),
        FakeRenderer::new(1),
    );
    let request = SeriesRequest::new("Berserk", MediaKind::Manga, series_dir.clone());
    let series = config.ingest_series(request).await?.series;

    let names: Vec<&str> = series.chapters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Capitulo 1", "Capitulo 2"]);
    assert_eq!(series.chapters[1].ordering.chapter_number, Some(2.0));
    assert!(series_dir.join("Capitulo 2.cbz").exists());
    Ok(())
}

#[tokio::test]
async fn test_empty_series_directory() -> Result<()> {
    let dirs = setup_test_dirs("empty_series").await;
    let series_dir = dirs.source_dir.join("Nothing Yet");
    tokio::fs::create_dir_all(&series_dir).await?;

    let tool = FakeArchiveTool::new(Vec::new());
    let config = config(&dirs, tool.clone(), FakeRenderer::new(1));
    let ingest = config
        .ingest_series(SeriesRequest::new("Nothing Yet", MediaKind::Comic, series_dir))
        .await?;

    assert!(ingest.series.chapters.is_empty());
    assert!(ingest.cover.is_none());
    assert!(ingest.series.cover_path.is_none());
    assert!(tool.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_ingest_many_collects_failures() -> Result<()> {
    let dirs = setup_test_dirs("ingest_many").await;
    let mut requests = Vec::new();
    for name in ["Bleach", "Gintama"] {
        let series_dir = dirs.source_dir.join(name);
        create_archive(&series_dir.join("Ch.1.cbz"));
        create_archive(&series_dir.join("Ch.2.cbz"));
        requests.push(SeriesRequest::new(name, MediaKind::Manga, series_dir));
    }
    requests.insert(
        1,
        SeriesRequest::new("Ghost", MediaKind::Manga, dirs.source_dir.join("missing")),
    );

    let config = config(
        &dirs,
        FakeArchiveTool::repeating(manga_pages()),
        FakeRenderer::new(1),
    );
    let store = Arc::new(MemoryStore::new());

    let report = timeout(TEST_TIMEOUT, config.ingest_many(requests, store.clone()))
        .await
        .expect("Test timed out");

    assert_eq!(report.succeeded, vec!["Bleach", "Gintama"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "Ghost");
    assert_eq!(store.len().await, 2);
    assert_eq!(store.get("Gintama").await.unwrap().chapters.len(), 2);
    assert!(store.get("Ghost").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_ingestion_of_one_series() -> Result<()> {
    let dirs = setup_test_dirs("same_series").await;
    let series_dir = dirs.source_dir.join("Monster");
    create_archive(&series_dir.join("Ch.1.cbz"));

    let config = config(
        &dirs,
        FakeArchiveTool::repeating(manga_pages()),
        FakeRenderer::new(1),
    );
    let request = SeriesRequest::new("Monster", MediaKind::Manga, series_dir);

    let (first, second) = tokio::join!(
        config.ingest_series(request.clone()),
        config.ingest_series(request)
    );
    let (first, second) = (first?, second?);
    assert_eq!(first.series.chapters.len(), 1);
    assert_eq!(
        first.series.chapters[0].archives_path(),
        second.series.chapters[0].archives_path()
    );

    // Serialized runs: the second one writes a fresh cover next to the first
    let first_cover = first.series.cover_path.expect("first cover");
    let second_cover = second.series.cover_path.expect("second cover");
    assert_ne!(first_cover, second_cover);
    assert!(first_cover.exists());
    assert!(second_cover.exists());
    assert_eq!(count_entries(&dirs.showcase_root).await, 2);
    Ok(())
}

#[tokio::test]
async fn test_repaired_name_collision_keeps_both_archives() -> Result<()> {
    let dirs = setup_test_dirs("encoding_collision").await;
    let series_dir = dirs.source_dir.join("Vagabond");
    let plain = series_dir.join("Capitulo 1.cbz");
    let accented = series_dir.join("Cap\u{00ED}tulo 1.cbz");
    create_archive(&plain);
    create_archive(&accented);

    let config = config(
        &dirs,
        FakeArchiveTool::repeating(manga_pages()),
        FakeRenderer::new(1),
    );
    let request = SeriesRequest::new("Vagabond", MediaKind::Manga, series_dir);
    let series = config.ingest_series(request).await?.series;

    let mut archives: Vec<PathBuf> = series
        .chapters
        .iter()
        .map(|c| c.archives_path().to_path_buf())
        .collect();
    archives.sort();
    let mut expected = vec![plain.clone(), accented.clone()];
    expected.sort();
    assert_eq!(archives, expected);
    assert!(plain.exists());
    assert!(accented.exists());
    Ok(())
}

#[tokio::test]
async fn test_covers_never_overwrite_another_series() -> Result<()> {
    let dirs = setup_test_dirs("cover_collision").await;
    let first_dir = dirs.source_dir.join("first");
    let second_dir = dirs.source_dir.join("second");
    create_archive(&first_dir.join("Ch.1.cbz"));
    create_archive(&second_dir.join("Ch.1.cbz"));

    let first_config = config(
        &dirs,
        FakeArchiveTool::repeating(manga_pages()),
        FakeRenderer::new(1),
    );
    let second_config = config(
        &dirs,
        FakeArchiveTool::repeating(FakePass::ok(&[("000.png", FakeContent::Png)])),
        FakeRenderer::new(1),
    );

    // Both names sanitize to "One_Piece"
    let first = first_config
        .ingest_series(SeriesRequest::new("One Piece!", MediaKind::Manga, first_dir))
        .await?;
    let first_cover = first.series.cover_path.clone().expect("first cover");
    let first_bytes = tokio::fs::read(&first_cover).await?;

    let second = second_config
        .ingest_series(SeriesRequest::new("One Piece?", MediaKind::Manga, second_dir))
        .await?;
    let second_cover = second.series.cover_path.clone().expect("second cover");

    assert_ne!(first_cover, second_cover);
    assert!(
        second_cover
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("One_Piece_")
    );
    assert!(matches!(
        second.cover,
        Some(CoverOutcome::Selected { ref source_image, .. }) if source_image == "000.png"
    ));
    assert_eq!(sniff_image(&second_cover).await?, ImageFormat::Jpeg);
    assert_eq!(tokio::fs::read(&first_cover).await?, first_bytes);
    assert_eq!(count_entries(&dirs.showcase_root).await, 2);
    Ok(())
}

/// Renders pages outside the extraction directory, then removes that
/// directory, so releasing the extraction fails once the pages are taken.
#[derive(Debug, Default)]
struct VanishingRenderer {
    pages_root: PathBuf,
    calls: AtomicUsize,
}

impl PageRenderer for VanishingRenderer {
    fn render_pages(
        &self,
        _document: &Path,
        output_dir: &Path,
        max_pages: Option<usize>,
    ) -> Result<Vec<PathBuf>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let pages_dir = self.pages_root.join(format!("render-{}", call));
        let count = max_pages.map_or(3, |max| max.min(3));

        let pages = (1..=count)
            .map(|page| {
                let path = pages_dir.join(format!("page_{:04}.png", page));
                write_image_sync(&path, ImageFormat::Png)?;
                Ok(path)
            })
            .collect::<Result<Vec<_>>>()?;

        std::fs::remove_dir(output_dir)?;
        Ok(pages)
    }
}

#[tokio::test]
async fn test_temp_cleanup_failure_keeps_finished_chapter() -> Result<()> {
    let dirs = setup_test_dirs("cleanup_failure").await;
    let series_dir = dirs.source_dir.join("Akira");
    tokio::fs::create_dir_all(&series_dir).await?;
    tokio::fs::write(series_dir.join("Ch.1.pdf"), b"%PDF-1.4\n%fake\n").await?;

    let renderer = Arc::new(VanishingRenderer {
        pages_root: dirs.base.join("rendered"),
        ..Default::default()
    });
    let config = HondanaConfig::builder()
        .images_root(dirs.images_root.clone())
        .showcase_root(dirs.showcase_root.clone())
        .temp_root(dirs.temp_root.clone())
        .archive_tool(FakeArchiveTool::new(Vec::new()))
        .page_renderer(renderer)
        .build()?;

    let request = SeriesRequest::new("Akira", MediaKind::Manga, series_dir);
    let mut series = config.ingest_series(request).await?.series;
    assert!(series.cover_path.is_some());

    let snapshot = series.clone();
    let materialized = config
        .materialize_chapter(&snapshot, &mut series.chapters[0])
        .await?;

    assert_eq!(materialized.pages.len(), 3);
    assert!(series.chapters[0].is_downloaded());
    assert_eq!(count_entries(&materialized.chapter_path).await, 3);
    Ok(())
}
