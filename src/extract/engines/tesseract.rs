//! Tesseract OCR engine.

use std::time::Duration;

use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, run_command},
    cpu_limit::with_cpu_permit,
    errors::PageError,
    prelude::*,
};

use super::{OcrEngine, RasterizedPage};

/// OCR engine wrapping the `tesseract` CLI tool.
#[non_exhaustive]
pub struct TesseractOcrEngine {}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(page = image.page_index, language = %language))]
    async fn recognize(
        &self,
        image: &RasterizedPage,
        language: &str,
        timeout: Duration,
    ) -> Result<String, PageError> {
        let ocr_err = |err: anyhow::Error| PageError::Ocr {
            page: image.page_index,
            message: format!("{:#}", err),
        };

        // "stdout" as the output base tells tesseract not to write a file.
        let mut cmd = Command::new("tesseract");
        cmd.arg(&image.path).arg("stdout").arg("-l").arg(language);
        let output = with_cpu_permit(move || async move {
            run_command("tesseract", &mut cmd, Some(timeout)).await
        })
        .await
        .map_err(ocr_err)?;
        check_for_command_failure("tesseract", &output, None).map_err(ocr_err)?;

        let text = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        trace!(%text, "Recognized text");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreadable_image_is_an_ocr_error() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let image = RasterizedPage {
            page_index: 4,
            path: tmp.path().join("missing.png"),
        };
        // Whether or not tesseract is installed, this must fail as an OCR
        // error for page 4.
        let err = TesseractOcrEngine::new()
            .recognize(&image, "eng", Duration::from_secs(5))
            .await
            .expect_err("should fail");
        assert_eq!(err.page(), 4);
        assert!(matches!(err, PageError::Ocr { .. }));
        Ok(())
    }
}
