use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::debug;

use crate::config::ReportConfig;
use crate::report::docx::{DocxError, Document, HeaderFooterKind};
use crate::report::placeholder::{self, Context};
use crate::report::ReportError;

/// Loads the report template and fills it in memory.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    template_path: PathBuf,
}

impl TemplateRenderer {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
        }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(config.template_path())
    }

    pub fn load(&self) -> Result<Document, ReportError> {
        if !self.template_path.is_file() {
            return Err(ReportError::TemplateNotFound(self.template_path.clone()));
        }

        Document::open(&self.template_path).map_err(|error| match error {
            DocxError::Io(io) if io.kind() == ErrorKind::NotFound => {
                ReportError::TemplateNotFound(self.template_path.clone())
            }
            other => ReportError::Template(other),
        })
    }

    /// Placeholder names the template uses, each once, in document order.
    pub fn placeholders(&self) -> Result<Vec<String>, ReportError> {
        let document = self.load()?;
        let mut names: Vec<String> = Vec::new();

        for part in text_parts(&document) {
            if document.part(&part).is_none() {
                continue;
            }
            for text in document.paragraph_texts(&part)? {
                for name in placeholder::placeholder_names(&text) {
                    if !names.iter().any(|known| known == name) {
                        names.push(name.to_string());
                    }
                }
            }
        }

        Ok(names)
    }

    pub fn render(&self, context: &Context) -> Result<Document, ReportError> {
        let mut document = self.load()?;
        let changed = fill_document(&mut document, context)?;
        debug!(
            template = %self.template_path.display(),
            paragraphs = changed,
            "template filled"
        );
        Ok(document)
    }
}

/// Parts that carry report text: the body (tables included) first, then
/// every header and footer some section references, each once.
fn text_parts(document: &Document) -> Vec<String> {
    let mut parts = vec![document.main_part().to_string()];

    for section in document.sections() {
        for kind in HeaderFooterKind::ALL {
            for part in [section.header(kind), section.footer(kind)].into_iter().flatten() {
                if !parts.iter().any(|known| known == part) {
                    parts.push(part.to_string());
                }
            }
        }
    }

    parts
}

/// Substitutes `context` into every paragraph that holds a placeholder.
pub fn fill_document(document: &mut Document, context: &Context) -> Result<usize, DocxError> {
    let mut changed = 0;

    for part in text_parts(document) {
        // A relationship may point at a part the package does not ship.
        if document.part(&part).is_none() {
            debug!(part = %part, "referenced header/footer part absent, skipping");
            continue;
        }

        changed += document.rewrite_paragraphs(&part, |text| {
            if !placeholder::may_contain_placeholder(text) {
                return None;
            }
            Some(placeholder::substitute(text, context))
        })?;
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::report::context::{build_context, sample_record};
    use crate::report::docx::fixtures::{docx, paragraph, table};

    fn write_template(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("report_template.docx");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = TemplateRenderer::new(dir.path().join("absent.docx"));
        assert!(matches!(
            renderer.render(&Context::new()),
            Err(ReportError::TemplateNotFound(path)) if path.ends_with("absent.docx")
        ));
    }

    #[test]
    fn corrupt_template_is_a_template_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), b"PK not really");
        assert!(matches!(
            TemplateRenderer::new(path).render(&Context::new()),
            Err(ReportError::Template(_))
        ));
    }

    #[test]
    fn fills_body_tables_headers_and_footers() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!(
            "{}{}",
            paragraph(&[
                "[[first_name]] [[last_name]] — ",
                "[[month_ru]] [[year]]: [[GrammarE]] ([[hours_studied]]h)",
            ]),
            table(&["[[ month_he ]]", "[[unknown]]x"])
        );
        let header = paragraph(&["[[ first_name ]]"]);
        let footer = paragraph(&["page of [[year]]"]);
        let path = write_template(
            dir.path(),
            &docx(&body, Some(header.as_str()), Some(footer.as_str())),
        );

        let context = build_context(&sample_record());
        let document = TemplateRenderer::new(path).render(&context).unwrap();

        assert_eq!(
            document.paragraph_texts(document.main_part()).unwrap(),
            ["Anna Ivanova — март 2024: Present Perfect (4h)", "מרץ", "x"]
        );
        assert_eq!(
            document.paragraph_texts("word/header1.xml").unwrap(),
            ["Anna"]
        );
        assert_eq!(
            document.paragraph_texts("word/footer1.xml").unwrap(),
            ["page of 2024"]
        );
    }

    #[test]
    fn lists_placeholders_across_parts() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{}{}", paragraph(&["[[year]] [[mon", "th]]"]), table(&["[[ Typo ]]"]));
        let footer = paragraph(&["[[year]] [[first_name]]"]);
        let path = write_template(dir.path(), &docx(&body, None, Some(footer.as_str())));

        let names = TemplateRenderer::new(path).placeholders().unwrap();

        assert_eq!(names, ["year", "month", "Typo", "first_name"]);
    }

    #[test]
    fn sections_without_header_or_footer_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), &docx(&paragraph(&["[[year]]"]), None, None));

        let document = TemplateRenderer::new(path)
            .render(&build_context(&sample_record()))
            .unwrap();

        assert_eq!(document.sections()[0].header(HeaderFooterKind::Default), None);
        assert_eq!(document.paragraph_texts(document.main_part()).unwrap(), ["2024"]);
    }

    #[test]
    fn template_without_placeholders_is_left_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{}{}", paragraph(&["Monthly ", "report"]), table(&["a &lt; b"]));
        let path = write_template(dir.path(), &docx(&body, None, None));
        let renderer = TemplateRenderer::new(path);

        let original = renderer.load().unwrap();
        let rendered = renderer.render(&build_context(&sample_record())).unwrap();

        assert_eq!(
            rendered.part(rendered.main_part()),
            original.part(original.main_part())
        );
        assert_eq!(
            rendered.paragraph_texts(rendered.main_part()).unwrap(),
            ["Monthly report", "a < b"]
        );
    }

    #[test]
    fn rendering_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let body = paragraph(&["[[first_name]] [[month_he]] [[ReadingE]]"]);
        let path = write_template(dir.path(), &docx(&body, Some(body.as_str()), None));
        let renderer = TemplateRenderer::new(path);
        let context = build_context(&sample_record());

        let first = renderer.render(&context).unwrap();
        let second = renderer.render(&context).unwrap();

        for part in text_parts(&first) {
            assert_eq!(first.part(&part), second.part(&part), "{part}");
        }
    }

    #[test]
    fn values_with_markup_characters_stay_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), &docx(&paragraph(&["[[GrammarE]]"]), None, None));
        let mut record = sample_record();
        record.grammar_e = Some("<b>{{ x }}</b> & \"y\"".to_string());

        let document = TemplateRenderer::new(path)
            .render(&build_context(&record))
            .unwrap();
        let reloaded = Document::from_bytes(&document.to_bytes().unwrap()).unwrap();

        assert_eq!(
            reloaded.paragraph_texts(reloaded.main_part()).unwrap(),
            ["<b>{{ x }}</b> & \"y\""]
        );
    }
}
