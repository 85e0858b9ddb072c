//! Monthly report pipeline: record → context → filled DOCX → PDF.

pub mod context;
pub mod convert;
pub mod docx;
pub mod placeholder;
pub mod renderer;

use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, instrument, Span};

use crate::config::ReportConfig;
use crate::models::ReportRecord;

pub use convert::{ConversionFailure, DocumentConverter};
pub use docx::DocxError;
pub use renderer::TemplateRenderer;

#[derive(Debug, Error)]
pub enum ReportError {
    /// Deployment problem: nothing a caller can fix by retrying.
    #[error("report template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),
    #[error("report template is not a usable document: {0}")]
    Template(#[from] DocxError),
    #[error("PDF conversion failed: {0}")]
    ConversionFailed(#[from] ConversionFailure),
    #[error("report workspace I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("report rendering task failed: {0}")]
    RenderTask(#[from] tokio::task::JoinError),
}

/// Renders and converts one report per call; holds no per-request state.
#[derive(Debug, Clone)]
pub struct ReportService {
    renderer: TemplateRenderer,
    converter: DocumentConverter,
}

impl ReportService {
    pub fn new(renderer: TemplateRenderer, converter: DocumentConverter) -> Self {
        Self {
            renderer,
            converter,
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(
            TemplateRenderer::from_config(config),
            DocumentConverter::from_config(config),
        )
    }

    #[instrument(
        skip_all,
        fields(
            report_id = %uuid::Uuid::new_v4(),
            student_id = record.student_id,
            year = record.year,
            month = record.month,
        )
    )]
    pub async fn generate(&self, record: &ReportRecord) -> Result<Vec<u8>, ReportError> {
        let context = context::build_context(record);
        let document = self.render(context).await?;
        let pdf = self.converter.convert(&document).await?;
        info!(bytes = pdf.len(), "report generated");
        Ok(pdf)
    }

    /// Fills the template on the blocking pool; archive and XML work is
    /// synchronous.
    async fn render(&self, context: placeholder::Context) -> Result<docx::Document, ReportError> {
        let renderer = self.renderer.clone();
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| renderer.render(&context))).await?
    }
}

/// Download name for a report. Digits, underscores and ASCII letters only.
pub fn report_filename(student_id: i64, year: i32, month: i32) -> String {
    format!("report_{student_id}_{year}_{month:02}.pdf")
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::report::context::sample_record;
    use crate::report::docx::fixtures::{docx, paragraph};

    fn service(template: &Path, binary: &str, temp_root: &Path) -> ReportService {
        ReportService::new(
            TemplateRenderer::new(template),
            DocumentConverter::new(binary, Duration::from_secs(10), Some(temp_root.to_path_buf())),
        )
    }

    #[test]
    fn filename_is_zero_padded_ascii() {
        assert_eq!(report_filename(42, 2024, 3), "report_42_2024_03.pdf");
        assert_eq!(report_filename(7, 2025, 11), "report_7_2025_11.pdf");
        assert!(report_filename(1, 2024, 1).is_ascii());
    }

    #[tokio::test]
    async fn missing_template_fails_before_any_workspace_exists() {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let service = service(&dir.path().join("nope.docx"), "libreoffice", temp_root.path());

        let result = service.generate(&sample_record()).await;

        assert!(matches!(result, Err(ReportError::TemplateNotFound(_))));
        assert_eq!(std::fs::read_dir(temp_root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unavailable_toolchain_is_conversion_failed_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let template = dir.path().join("report_template.docx");
        std::fs::write(&template, docx(&paragraph(&["[[first_name]]"]), None, None)).unwrap();
        let service = service(&template, "/nonexistent/soffice", temp_root.path());

        let result = service.generate(&sample_record()).await;

        assert!(matches!(result, Err(ReportError::ConversionFailed(_))));
        assert_eq!(std::fs::read_dir(temp_root.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn renders_on_the_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let template = dir.path().join("report_template.docx");
        std::fs::write(&template, docx(&paragraph(&["[[first_name]] [[month_he]]"]), None, None))
            .unwrap();
        let reports = service(&template, "libreoffice", temp_root.path());

        let filled = reports
            .render(context::build_context(&sample_record()))
            .await
            .unwrap();

        assert_eq!(
            filled.paragraph_texts(filled.main_part()).unwrap(),
            ["Anna מרץ"]
        );

        let missing = service(&dir.path().join("absent.docx"), "libreoffice", temp_root.path());
        assert!(matches!(
            missing.render(context::build_context(&sample_record())).await,
            Err(ReportError::TemplateNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn end_to_end_with_stub_toolchain() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let template = dir.path().join("report_template.docx");
        std::fs::write(
            &template,
            docx(
                &paragraph(&[
                    "[[first_name]] [[last_name]] — [[month_ru]] [[year]]: ",
                    "[[GrammarE]] ([[hours_studied]]h)",
                ]),
                None,
                None,
            ),
        )
        .unwrap();

        // Hands the filled DOCX back as the "PDF" so the test can read it.
        let binary = dir.path().join("office");
        std::fs::write(
            &binary,
            "#!/bin/sh\nfor last; do :; done\ncp \"$last\" \"$(dirname \"$last\")/report.pdf\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let service = service(&template, &binary.display().to_string(), temp_root.path());
        let output = service.generate(&sample_record()).await.unwrap();

        let filled = docx::Document::from_bytes(&output).unwrap();
        assert_eq!(
            filled.paragraph_texts(filled.main_part()).unwrap(),
            ["Anna Ivanova — март 2024: Present Perfect (4h)"]
        );
        assert_eq!(std::fs::read_dir(temp_root.path()).unwrap().count(), 0);
    }
}
