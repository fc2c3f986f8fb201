use std::env;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbaImage};
use log::debug;
use pdfium_render::prelude::{PdfRenderConfig, Pdfium, PdfiumError};

use crate::error::{Error, Result};
use crate::extractor::PageRenderer;

/// Width, in pixels, pages are rasterized at.
pub const RENDER_TARGET_WIDTH: i32 = 1600;
/// Environment variable pointing at the directory holding the Pdfium library.
pub const PDFIUM_LIBRARY_ENV: &str = "PDFIUM_LIBRARY_PATH";

/// [`PageRenderer`] backed by Pdfium, loaded at runtime.
///
/// The library is looked up in the configured directory, then in
/// `PDFIUM_LIBRARY_PATH`, then through the system loader.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library_dir: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library_dir(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: Some(library_dir.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium> {
        let configured = self
            .library_dir
            .clone()
            .or_else(|| env::var_os(PDFIUM_LIBRARY_ENV).map(PathBuf::from));

        if let Some(dir) = configured {
            let library = Pdfium::pdfium_platform_library_name_at_path(&dir);
            match Pdfium::bind_to_library(&library) {
                Ok(bindings) => return Ok(Pdfium::new(bindings)),
                Err(e) => debug!("Pdfium not usable at {:?}: {}", library, e),
            }
        }

        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(pdf_error)
    }
}

fn pdf_error(error: PdfiumError) -> Error {
    Error::Pdf(error.to_string())
}

impl PageRenderer for PdfiumRenderer {
    fn render_pages(
        &self,
        document: &Path,
        output_dir: &Path,
        max_pages: Option<usize>,
    ) -> Result<Vec<PathBuf>> {
        let pdfium = self.bind()?;
        let pdf = pdfium
            .load_pdf_from_file(document, None)
            .map_err(pdf_error)?;

        let render_config = PdfRenderConfig::new().set_target_width(RENDER_TARGET_WIDTH);
        let limit = max_pages.unwrap_or(usize::MAX);
        let mut pages = Vec::new();

        for (page_index, page) in pdf.pages().iter().enumerate().take(limit) {
            let bitmap = page.render_with_config(&render_config).map_err(pdf_error)?;
            let width = bitmap.width() as u32;
            let height = bitmap.height() as u32;

            let image = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes()).ok_or_else(
                || Error::Pdf(format!("page {} rendered to a malformed bitmap", page_index + 1)),
            )?;

            let page_path = output_dir.join(format!("page_{:04}.png", page_index + 1));
            image.save_with_format(&page_path, ImageFormat::Png)?;
            pages.push(page_path);
        }

        if pages.is_empty() {
            return Err(Error::NoPages(document.to_path_buf()));
        }

        debug!("Rendered {} page(s) of {:?}", pages.len(), document);
        Ok(pages)
    }
}
