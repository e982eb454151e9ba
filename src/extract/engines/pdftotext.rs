//! Digital text extraction using poppler's `pdfinfo` and `pdftotext`.

use std::collections::BTreeMap;

use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, run_command},
    cpu_limit::with_cpu_permit,
    errors::ExtractionError,
    extract::{DigitalText, Document, PageText},
    prelude::*,
};

use super::DigitalTextExtractor;

/// The only document type we know how to parse.
const PDF_MIME_TYPE: &str = "application/pdf";

/// Text extractor wrapping the `pdftotext` CLI tool from `poppler-utils`.
///
/// This reads the text layer only. Scanned pages come back empty.
#[non_exhaustive]
pub struct PdfToTextExtractor {}

impl PdfToTextExtractor {
    /// Create a new `pdftotext` extractor.
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl DigitalTextExtractor for PdfToTextExtractor {
    #[instrument(level = "debug", skip_all, fields(path = %document.path.display()))]
    async fn extract(&self, document: &Document) -> Result<DigitalText, ExtractionError> {
        extract_inner(document)
            .await
            .map_err(|err| ExtractionError::Parse {
                path: document.path.clone(),
                message: format!("{:#}", err),
            })
    }
}

/// Perform actual work for [`PdfToTextExtractor::extract`].
async fn extract_inner(document: &Document) -> Result<DigitalText> {
    let path = &document.path;
    if !path.is_file() {
        return Err(anyhow!("no such document"));
    }
    let mime_type = get_mime_type(path)?;
    if mime_type != PDF_MIME_TYPE {
        return Err(anyhow!(
            "unsupported document type {} (expected {})",
            mime_type,
            PDF_MIME_TYPE
        ));
    }

    let page_count = get_pdf_page_count(path, document.password.as_deref()).await?;

    // Write all pages to stdout. pdftotext ends every page with a form feed.
    let mut cmd = Command::new("pdftotext");
    cmd.arg("-enc").arg("UTF-8");
    if let Some(password) = &document.password {
        cmd.arg("-opw").arg(password);
    }
    cmd.arg(path).arg("-");
    let output = with_cpu_permit(move || async move {
        run_command("pdftotext", &mut cmd, None).await
    })
    .await?;
    check_for_command_failure("pdftotext", &output, None)?;

    let text = String::from_utf8_lossy(&output.stdout);
    let pages = split_pages(&text, page_count);
    debug!(
        page_count,
        chars = pages.iter().map(|p| p.text.len()).sum::<usize>(),
        "Extracted digital text"
    );
    Ok(DigitalText { page_count, pages })
}

/// Split `pdftotext` output into exactly `page_count` pages, collapsing each
/// run of whitespace into a single space.
fn split_pages(text: &str, page_count: usize) -> Vec<PageText> {
    let mut raw_pages = text.split('\u{000C}');
    (1..=page_count)
        .map(|page_index| {
            let text = raw_pages
                .next()
                .map(|raw| raw.split_whitespace().collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            PageText { page_index, text }
        })
        .collect()
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path, password: Option<&str>) -> Result<usize> {
    let mut cmd = Command::new("pdfinfo");
    if let Some(password) = password {
        cmd.arg("-opw").arg(password);
    }
    cmd.arg(path);
    let output = run_command("pdfinfo", &mut cmd, None).await?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // Parse the output of pdfinfo into properties.
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key.to_string(), value.to_string());
    }

    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count_str.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Get the MIME type of a file.
pub fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_pages_normalizes_whitespace() {
        let text = "Hello   world\nsecond  line\n\u{000C}  Page\ttwo \n\u{000C}";
        let pages = split_pages(text, 2);
        assert_eq!(
            pages,
            vec![
                PageText {
                    page_index: 1,
                    text: "Hello world second line".to_owned()
                },
                PageText {
                    page_index: 2,
                    text: "Page two".to_owned()
                },
            ]
        );
    }

    #[test]
    fn split_pages_pads_missing_pages() {
        let pages = split_pages("only one\u{000C}", 3);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].text, "only one");
        assert_eq!(pages[1].text, "");
        assert_eq!(pages[2].page_index, 3);
        assert_eq!(pages[2].text, "");
    }

    #[test]
    fn split_pages_of_image_only_pdf_is_blank() {
        let pages = split_pages("\u{000C}\u{000C}", 2);
        assert!(pages.iter().all(|p| p.text.is_empty()));
    }

    #[tokio::test]
    async fn missing_file_is_a_parse_error() {
        let document = Document::new("/definitely/not/here.pdf", None);
        let err = PdfToTextExtractor::new()
            .extract(&document)
            .await
            .expect_err("should fail");
        assert!(matches!(err, ExtractionError::Parse { .. }));
        assert!(err.to_string().contains("no such document"));
    }

    #[tokio::test]
    async fn non_pdf_is_a_parse_error() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let path = tmp.path().join("image.png");
        // PNG signature followed by junk.
        std::fs::write(&path, b"\x89PNG\r\n\x1a\n0000000000000000")?;
        let err = PdfToTextExtractor::new()
            .extract(&Document::new(&path, None))
            .await
            .expect_err("should fail");
        assert!(matches!(err, ExtractionError::Parse { .. }));
        assert!(err.to_string().contains("image/png"));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn corrupt_pdf_is_a_parse_error() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let path = tmp.path().join("corrupt.pdf");
        std::fs::write(&path, b"%PDF-1.7\nthis is not really a pdf\n")?;
        let err = PdfToTextExtractor::new()
            .extract(&Document::new(&path, None))
            .await
            .expect_err("should fail");
        assert!(matches!(err, ExtractionError::Parse { .. }));
        Ok(())
    }
}
