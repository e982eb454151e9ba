//! Page rasterization using poppler's `pdftocairo`.

use std::time::Duration;

use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, run_command, spawn_blocking_propagating_panics},
    cpu_limit::with_cpu_permit,
    errors::PageError,
    extract::Document,
    prelude::*,
};

use super::{PageRasterizer, RasterizeOptions, RasterizedPage, is_error_line};

/// Rasterizer wrapping the `pdftocairo` CLI tool from `poppler-utils`.
pub struct PdfToCairoRasterizer {
    opts: RasterizeOptions,
}

impl PdfToCairoRasterizer {
    /// Create a new `pdftocairo` rasterizer.
    pub fn new(opts: RasterizeOptions) -> Self {
        Self { opts }
    }

    /// Build the `pdftocairo` command for one page. `out_prefix` gets `.png`
    /// appended by `pdftocairo` itself.
    fn command(&self, document: &Document, page_index: usize, out_prefix: &Path) -> Command {
        let page = page_index.to_string();
        let mut cmd = Command::new("pdftocairo");
        cmd.arg("-png")
            .arg("-singlefile")
            .arg("-f")
            .arg(&page)
            .arg("-l")
            .arg(&page)
            .arg("-r")
            .arg(self.opts.rasterize_dpi.to_string())
            .arg("-scale-to-x")
            .arg(self.opts.rasterize_width.to_string())
            .arg("-scale-to-y")
            .arg(self.opts.rasterize_height.to_string());
        if let Some(password) = &document.password {
            cmd.arg("-opw").arg(password);
        }
        cmd.arg(&document.path).arg(out_prefix);
        cmd
    }
}

#[async_trait]
impl PageRasterizer for PdfToCairoRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %document.path.display(), page = page_index))]
    async fn rasterize(
        &self,
        document: &Document,
        page_index: usize,
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<RasterizedPage, PageError> {
        let rasterize_err = |message: String| PageError::Rasterize {
            page: page_index,
            message,
        };

        if let Some(page_count) = document.page_count
            && !(1..=page_count).contains(&page_index)
        {
            return Err(rasterize_err(format!(
                "page index out of range (document has {} pages)",
                page_count
            )));
        }

        let out_prefix = work_dir.join(format!("page-{:05}", page_index));
        let path = out_prefix.with_extension("png");
        let mut cmd = self.command(document, page_index, &out_prefix);

        // We use `with_cpu_permit` because `pdftocairo` will use _at least_
        // 100% of a CPU. The timeout only starts once we have the permit.
        let output = with_cpu_permit(move || async move {
            run_command("pdftocairo", &mut cmd, Some(timeout)).await
        })
        .await
        .map_err(|err| rasterize_err(format!("{:#}", err)))?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))
            .map_err(|err| rasterize_err(format!("{:#}", err)))?;

        // Make sure we actually got an image we can hand to OCR.
        let image_path = path.clone();
        let (width, height) =
            spawn_blocking_propagating_panics(move || image::image_dimensions(&image_path))
                .await
                .map_err(|err| {
                    rasterize_err(format!("rendered page is not a readable image: {}", err))
                })?;
        debug!(width, height, "Rasterized page");

        Ok(RasterizedPage { page_index, path })
    }
}
