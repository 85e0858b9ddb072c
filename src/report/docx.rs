//! Minimal WordprocessingML package model.
//!
//! Keeps every archive entry as raw bytes and only parses what the report
//! pipeline touches: paragraph text in the main document and in the
//! header/footer parts referenced by each section.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const W_P: &[u8] = b"w:p";
const W_T: &[u8] = b"w:t";
const W_SECT_PR: &[u8] = b"w:sectPr";
const W_HEADER_REF: &[u8] = b"w:headerReference";
const W_FOOTER_REF: &[u8] = b"w:footerReference";
const RELATIONSHIP: &[u8] = b"Relationship";

const PACKAGE_RELS: &str = "_rels/.rels";
const DEFAULT_MAIN_PART: &str = "word/document.xml";
const OFFICE_DOCUMENT_REL: &str = "/officeDocument";

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("invalid document archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("invalid document XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("document part {0} is missing")]
    MissingPart(String),
    #[error("document I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Which page variant a header or footer applies to (`w:type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderFooterKind {
    Default,
    First,
    Even,
}

impl HeaderFooterKind {
    pub const ALL: [HeaderFooterKind; 3] = [Self::Default, Self::First, Self::Even];

    fn from_attr(value: Option<&str>) -> Option<Self> {
        match value.unwrap_or("default") {
            "default" => Some(Self::Default),
            "first" => Some(Self::First),
            "even" => Some(Self::Even),
            _ => None,
        }
    }
}

/// One `w:sectPr`, with its header/footer references resolved to part names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    headers: HashMap<HeaderFooterKind, String>,
    footers: HashMap<HeaderFooterKind, String>,
}

impl Section {
    pub fn header(&self, kind: HeaderFooterKind) -> Option<&str> {
        self.headers.get(&kind).map(String::as_str)
    }

    pub fn footer(&self, kind: HeaderFooterKind) -> Option<&str> {
        self.footers.get(&kind).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct Document {
    entries: Vec<Entry>,
    main_part: String,
    sections: Vec<Section>,
}

impl Document {
    pub fn open(path: &Path) -> Result<Self, DocxError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocxError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
            file.read_to_end(&mut data)?;
            entries.push(Entry {
                name: file.name().to_string(),
                data,
                is_dir: file.is_dir(),
            });
        }

        let mut document = Self {
            entries,
            main_part: DEFAULT_MAIN_PART.to_string(),
            sections: Vec::new(),
        };
        document.main_part = document.resolve_main_part()?;
        document.sections = document.parse_sections()?;
        Ok(document)
    }

    pub fn main_part(&self) -> &str {
        &self.main_part
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|entry| !entry.is_dir && entry.name == name)
            .map(|entry| entry.data.as_slice())
    }

    fn part_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        self.entries
            .iter_mut()
            .find(|entry| !entry.is_dir && entry.name == name)
            .map(|entry| &mut entry.data)
    }

    /// Runs `rewrite` over the text of every paragraph in `part`.
    ///
    /// When the closure returns a replacement, the paragraph's first text
    /// node receives the whole new text (keeping that run's formatting) and
    /// the other text nodes are emptied. Returns how many paragraphs changed.
    pub fn rewrite_paragraphs<F>(&mut self, part: &str, mut rewrite: F) -> Result<usize, DocxError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let data = self
            .part_mut(part)
            .ok_or_else(|| DocxError::MissingPart(part.to_string()))?;

        let (changed, rewritten) = {
            let mut reader = Reader::from_reader(data.as_slice());
            let mut writer = Writer::new(Vec::with_capacity(data.len()));
            // Text boxes nest whole paragraphs inside a run, so each open
            // `w:p` gets its own buffer and is rewritten on its own.
            let mut open: Vec<Vec<Piece<'_>>> = Vec::new();
            let mut changed = 0usize;

            loop {
                let event = reader.read_event()?;
                if matches!(event, Event::Eof) {
                    break;
                }

                if matches!(&event, Event::Start(e) if e.name().as_ref() == W_P) {
                    open.push(vec![Piece::Event(event)]);
                    continue;
                }
                let closes = matches!(&event, Event::End(e) if e.name().as_ref() == W_P);

                let Some(current) = open.last_mut() else {
                    writer.write_event(event)?;
                    continue;
                };
                current.push(Piece::Event(event));
                if !closes {
                    continue;
                }

                if let Some(pieces) = open.pop() {
                    let mut rendered = Writer::new(Vec::new());
                    if flush_paragraph(&mut rendered, pieces, &mut rewrite)? {
                        changed += 1;
                    }
                    let bytes = rendered.into_inner();
                    match open.last_mut() {
                        Some(parent) => parent.push(Piece::Nested(bytes)),
                        None => writer.get_mut().write_all(&bytes)?,
                    }
                }
            }

            // Unclosed paragraphs at end of input are copied as they came.
            for pieces in open {
                for piece in pieces {
                    write_piece(&mut writer, piece)?;
                }
            }

            (changed, writer.into_inner())
        };

        if changed > 0 {
            *data = rewritten;
        }
        Ok(changed)
    }

    /// Plain text of each paragraph in `part`, in document order.
    ///
    /// A paragraph nested in a text box is listed on its own, right after
    /// the paragraph that holds it.
    pub fn paragraph_texts(&self, part: &str) -> Result<Vec<String>, DocxError> {
        let data = self
            .part(part)
            .ok_or_else(|| DocxError::MissingPart(part.to_string()))?;

        let mut reader = Reader::from_reader(data);
        let mut texts: Vec<String> = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        let mut in_text = false;

        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(e) if e.name().as_ref() == W_P => {
                    open.push(texts.len());
                    texts.push(String::new());
                }
                Event::End(e) if e.name().as_ref() == W_P => {
                    open.pop();
                }
                Event::Empty(e) if e.name().as_ref() == W_P => texts.push(String::new()),
                Event::Start(e) if e.name().as_ref() == W_T => in_text = true,
                Event::End(e) if e.name().as_ref() == W_T => in_text = false,
                Event::Text(t) if in_text => {
                    if let Some(&slot) = open.last() {
                        texts[slot].push_str(&t.unescape()?);
                    }
                }
                _ => {}
            }
        }

        Ok(texts)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in &self.entries {
            if entry.is_dir {
                writer.add_directory(entry.name.as_str(), options)?;
            } else {
                writer.start_file(entry.name.as_str(), options)?;
                writer.write_all(&entry.data)?;
            }
        }

        Ok(writer.finish()?.into_inner())
    }

    fn resolve_main_part(&self) -> Result<String, DocxError> {
        let Some(rels) = self.part(PACKAGE_RELS) else {
            return Ok(DEFAULT_MAIN_PART.to_string());
        };

        let main = parse_relationships(rels)?
            .into_iter()
            .find(|rel| rel.kind.ends_with(OFFICE_DOCUMENT_REL))
            .map(|rel| resolve_target("", &rel.target))
            .unwrap_or_else(|| DEFAULT_MAIN_PART.to_string());

        if self.part(&main).is_none() {
            return Err(DocxError::MissingPart(main));
        }
        Ok(main)
    }

    fn parse_sections(&self) -> Result<Vec<Section>, DocxError> {
        let (dir, file) = match self.main_part.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", self.main_part.as_str()),
        };
        let rels_name = if dir.is_empty() {
            format!("_rels/{file}.rels")
        } else {
            format!("{dir}/_rels/{file}.rels")
        };

        let targets: HashMap<String, String> = match self.part(&rels_name) {
            Some(rels) => parse_relationships(rels)?
                .into_iter()
                .map(|rel| (rel.id, resolve_target(dir, &rel.target)))
                .collect(),
            None => HashMap::new(),
        };

        let data = self
            .part(&self.main_part)
            .ok_or_else(|| DocxError::MissingPart(self.main_part.clone()))?;
        let mut reader = Reader::from_reader(data);
        let mut sections = Vec::new();
        let mut current: Option<Section> = None;

        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(e) if e.name().as_ref() == W_SECT_PR => {
                    current.get_or_insert_with(Section::default);
                }
                Event::Empty(e) if e.name().as_ref() == W_SECT_PR => {
                    sections.push(Section::default());
                }
                Event::End(e) if e.name().as_ref() == W_SECT_PR => {
                    sections.extend(current.take());
                }
                Event::Start(e) | Event::Empty(e) => {
                    let Some(section) = current.as_mut() else {
                        continue;
                    };
                    let slot = match e.name().as_ref() {
                        W_HEADER_REF => &mut section.headers,
                        W_FOOTER_REF => &mut section.footers,
                        _ => continue,
                    };
                    let kind = HeaderFooterKind::from_attr(attr_value(&e, b"w:type")?.as_deref());
                    let target = attr_value(&e, b"r:id")?.and_then(|id| targets.get(&id).cloned());
                    if let (Some(kind), Some(target)) = (kind, target) {
                        slot.insert(kind, target);
                    }
                }
                _ => {}
            }
        }

        Ok(sections)
    }
}

/// Writes one buffered paragraph, rewritten if the closure asks for it.
/// Buffered content of one paragraph. Nested paragraphs are already
/// rewritten and kept as raw bytes.
enum Piece<'a> {
    Event(Event<'a>),
    Nested(Vec<u8>),
}

fn write_piece(writer: &mut Writer<Vec<u8>>, piece: Piece<'_>) -> Result<(), DocxError> {
    match piece {
        Piece::Event(event) => writer.write_event(event)?,
        Piece::Nested(bytes) => writer.get_mut().write_all(&bytes)?,
    }
    Ok(())
}

fn flush_paragraph<F>(
    writer: &mut Writer<Vec<u8>>,
    pieces: Vec<Piece<'_>>,
    rewrite: &mut F,
) -> Result<bool, DocxError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut text_nodes: Vec<usize> = Vec::new();
    let mut joined = String::new();
    let mut in_text = false;

    for (index, piece) in pieces.iter().enumerate() {
        let Piece::Event(event) = piece else {
            continue;
        };
        match event {
            Event::Start(e) if e.name().as_ref() == W_T => in_text = true,
            Event::End(e) if e.name().as_ref() == W_T => in_text = false,
            Event::Text(t) if in_text => {
                joined.push_str(&t.unescape()?);
                text_nodes.push(index);
            }
            _ => {}
        }
    }

    let replacement = match text_nodes.first() {
        Some(_) => rewrite(&joined).filter(|new_text| *new_text != joined),
        None => None,
    };

    let Some(replacement) = replacement else {
        for piece in pieces {
            write_piece(writer, piece)?;
        }
        return Ok(false);
    };

    let first = text_nodes[0];
    for (index, piece) in pieces.into_iter().enumerate() {
        let event = match piece {
            Piece::Event(event) => event,
            nested => {
                write_piece(writer, nested)?;
                continue;
            }
        };
        match event {
            Event::Start(e) if e.name().as_ref() == W_T => {
                writer.write_event(Event::Start(preserve_space(&e)?))?;
            }
            Event::Text(_) if index == first => {
                writer.write_event(Event::Text(BytesText::new(&replacement)))?;
            }
            Event::Text(_) if text_nodes.binary_search(&index).is_ok() => {}
            other => writer.write_event(other)?,
        }
    }
    Ok(true)
}

/// Copy of a `w:t` start tag with `xml:space="preserve"`, so leading and
/// trailing spaces of substituted values survive.
fn preserve_space(start: &BytesStart<'_>) -> Result<BytesStart<'static>, DocxError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut copy = BytesStart::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() != b"xml:space" {
            copy.push_attribute(attr);
        }
    }
    copy.push_attribute(("xml:space", "preserve"));
    Ok(copy)
}

fn attr_value(start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, DocxError> {
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

struct Relationship {
    id: String,
    kind: String,
    target: String,
}

fn parse_relationships(data: &[u8]) -> Result<Vec<Relationship>, DocxError> {
    let mut reader = Reader::from_reader(data);
    let mut relationships = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == RELATIONSHIP => {
                let id = attr_value(&e, b"Id")?;
                let target = attr_value(&e, b"Target")?;
                if let (Some(id), Some(target)) = (id, target) {
                    relationships.push(Relationship {
                        id,
                        kind: attr_value(&e, b"Type")?.unwrap_or_default(),
                        target,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(relationships)
}

fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    if base_dir.is_empty() {
        target.to_string()
    } else {
        format!("{base_dir}/{target}")
    }
}
