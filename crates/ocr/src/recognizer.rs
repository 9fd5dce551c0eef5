use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    #[error("OCR engine error: {0}")]
    Engine(String),
}

/// Turns binarized PNG bytes into raw text, one receipt line per text line.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError>;
}

/// Answers every request with a transcript supplied up front.
///
/// Used when the receipt text is already known (typed in, or produced by an
/// engine running elsewhere) and in tests.
#[derive(Debug, Clone)]
pub struct TranscriptRecognizer {
    transcript: String,
}

impl TranscriptRecognizer {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self { transcript: transcript.into() }
    }
}

impl OcrBackend for TranscriptRecognizer {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
        Ok(self.transcript.clone())
    }
}

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::{OcrBackend, OcrError};
    use leptess::{LepTess, Variable};

    /// Single uniform block of text: one receipt column.
    const PSM_SINGLE_BLOCK: &str = "6";

    /// Binarized PNGs carry no DPI.
    const ASSUMED_DPI: i32 = 300;

    /// Runs a fresh Tesseract instance per receipt.
    pub struct TesseractRecognizer {
        tessdata: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        pub fn new(tessdata: Option<String>, lang: &str) -> Self {
            Self { tessdata, lang: lang.to_string() }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, png: &[u8]) -> Result<String, OcrError> {
            let engine = |e: &dyn std::fmt::Display| OcrError::Engine(e.to_string());

            let mut tess = LepTess::new(self.tessdata.as_deref(), &self.lang).map_err(|e| engine(&e))?;
            tess.set_variable(Variable::TesseditPagesegMode, PSM_SINGLE_BLOCK)
                .map_err(|e| engine(&e))?;
            tess.set_image_from_mem(png)
                .map_err(|e| OcrError::ImageDecode(e.to_string()))?;
            tess.set_source_resolution(ASSUMED_DPI);

            let text = tess.get_utf8_text().map_err(|e| engine(&e))?;
            tracing::debug!(lang = %self.lang, chars = text.len(), "tesseract pass finished");
            Ok(text)
        }
    }
}
