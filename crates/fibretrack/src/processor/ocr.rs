use std::io::Cursor;
use std::sync::Arc;

use crate::error::ProcessError;

/// Tesseract-backed page OCR, the consumed `ocr_page` capability.
#[derive(Clone)]
pub struct OcrEngine {
    inner: Arc<OcrEngineInner>,
}

struct OcrEngineInner {
    languages: String,
    dpi: u32,
}

impl OcrEngine {
    pub fn new(languages: &[String], dpi: u32) -> Self {
        let lang_str = if languages.is_empty() {
            "ita+eng".to_string()
        } else {
            languages.join("+")
        };

        Self {
            inner: Arc::new(OcrEngineInner {
                languages: lang_str,
                dpi,
            }),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.inner.dpi
    }

    /// Runs OCR over one rendered page image.
    pub fn ocr_page(&self, image_data: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.ocr").entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to load image: {}", e)))?;

        // leptess wants an encoded image; normalize to PNG in memory.
        let mut png_data = Vec::new();
        let mut cursor = Cursor::new(&mut png_data);
        img.write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, &self.inner.languages).map_err(|e| {
            ProcessError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| ProcessError::OcrFailed(format!("OCR failed: {}", e)))
    }
}
