//! Poppler/LibreOffice converter
//!
//! `pdftoppm` writes the page under a hidden name in the output directory
//! which is renamed into place only after the tool succeeded, so a failed
//! run never leaves a readable file at `<prefix>_page<N>.<ext>`. Staged
//! output is removed when the conversion fails or is dropped mid-run.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempPath;
use uuid::Uuid;

use super::process::run_tool;
use crate::config::ToolsConfig;
use crate::render::{ConvertRequest, ImageFormat, PageConverter, RenderError, RenderResult};

/// Page converter driving the Poppler and LibreOffice command line tools
#[derive(Debug, Clone)]
pub struct PopplerConverter {
    tools: ToolsConfig,
}

impl PopplerConverter {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    async fn ensure_readable(source: &Path) -> RenderResult<()> {
        match tokio::fs::metadata(source).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(RenderError::Conversion(format!(
                "source {} is not a file",
                source.display()
            ))),
            Err(e) => Err(RenderError::Conversion(format!(
                "source {} is unreadable: {}",
                source.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl PageConverter for PopplerConverter {
    async fn page_count(&self, source: &Path) -> RenderResult<u32> {
        Self::ensure_readable(source).await?;
        let stdout = run_tool(&self.tools.pdfinfo, [source.as_os_str()]).await?;
        parse_page_count(&stdout)
    }

    async fn convert_page(&self, request: &ConvertRequest) -> RenderResult<PathBuf> {
        Self::ensure_readable(&request.source).await?;
        if request.page_index == 0 {
            return Err(RenderError::Conversion("page indices start at 1".into()));
        }

        let target = request.output_path();
        let staging_root = request.output_dir.join(format!(
            ".{}_page{}.{}",
            request.prefix,
            request.page_index,
            Uuid::new_v4()
        ));
        // pdftoppm appends the extension itself in -singlefile mode.
        let mut staged = staging_root.clone().into_os_string();
        staged.push(".");
        staged.push(request.format.extension());
        let staged = PathBuf::from(staged);

        let page = request.page_index.to_string();
        let args: Vec<OsString> = vec![
            "-f".into(),
            page.clone().into(),
            "-l".into(),
            page.into(),
            "-scale-to".into(),
            request.scale.to_string().into(),
            "-singlefile".into(),
            match request.format {
                ImageFormat::Png => "-png".into(),
                ImageFormat::Jpeg => "-jpeg".into(),
            },
            request.source.clone().into_os_string(),
            staging_root.into_os_string(),
        ];

        // Deleted on every early exit, including a dropped future.
        let staged = TempPath::from_path(staged);
        run_tool(&self.tools.pdftoppm, &args).await?;

        if let Err(e) = tokio::fs::rename(&staged, &target).await {
            return Err(if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::Conversion(format!(
                    "pdftoppm produced no output for page {} of {}",
                    request.page_index,
                    request.source.display()
                ))
            } else {
                RenderError::Conversion(format!(
                    "Failed to move {} into place: {}",
                    target.display(),
                    e
                ))
            });
        }
        // The staged name is gone after the rename.
        let _ = staged.keep();

        tracing::debug!(
            page = request.page_index,
            output = %target.display(),
            "pdftoppm wrote page"
        );
        Ok(target)
    }

    async fn normalize_to_pdf(&self, source: &Path, output_dir: &Path) -> RenderResult<PathBuf> {
        Self::ensure_readable(source).await?;
        let stem = source
            .file_stem()
            .ok_or_else(|| RenderError::Conversion(format!("{} has no file name", source.display())))?;
        let mut pdf_name = stem.to_os_string();
        pdf_name.push(".pdf");
        let pdf = TempPath::from_path(output_dir.join(pdf_name));

        // Concurrent soffice runs need separate profiles.
        let profile = tempfile::tempdir()
            .map_err(|e| RenderError::Io(format!("Failed to create soffice profile: {}", e)))?;
        let mut profile_arg = OsString::from("-env:UserInstallation=file://");
        profile_arg.push(profile.path().as_os_str());

        let args: Vec<OsString> = vec![
            profile_arg,
            "--headless".into(),
            "--convert-to".into(),
            "pdf".into(),
            "--outdir".into(),
            output_dir.as_os_str().to_os_string(),
            source.as_os_str().to_os_string(),
        ];
        run_tool(&self.tools.soffice, &args).await?;

        if !tokio::fs::try_exists(&pdf).await.unwrap_or(false) {
            return Err(RenderError::Conversion(format!(
                "soffice produced no PDF for {}",
                source.display()
            )));
        }
        pdf.keep()
            .map_err(|e| RenderError::Io(format!("Failed to keep {}: {}", e.path.display(), e.error)))
    }
}

/// Extract the page count from `pdfinfo` output
pub fn parse_page_count(pdfinfo: &str) -> RenderResult<u32> {
    pdfinfo
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| RenderError::Conversion("pdfinfo reported no page count".into()))
}
