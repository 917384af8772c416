//! Plain-text extraction for document files.
//!
//! Supported: txt, pdf, docx, xlsx, pptx. Anything else is reported as
//! unsupported and skipped by the indexer.

use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

/// Stored in place of empty extracted text, so the file still gets an entry
/// and is not re-extracted on every pass.
pub const EMPTY_TEXT_SENTINEL: &str = "No text detected";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported document type: {0}")]
    Unsupported(String),

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

impl ExtractError {
    fn parse(path: &Path, message: impl ToString) -> Self {
        ExtractError::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Trim extracted text and substitute the sentinel when nothing is left.
pub fn prepare_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        EMPTY_TEXT_SENTINEL.to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl TextExtractor for DocumentExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "txt" => extract_txt(path),
            "pdf" => extract_pdf(path),
            "docx" => extract_docx(path),
            "xlsx" => extract_xlsx(path),
            "pptx" => extract_pptx(path),
            other => Err(ExtractError::Unsupported(other.to_string())),
        }
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn extract_txt(path: &Path) -> Result<String, ExtractError> {
    let bytes = read_bytes(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed files
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(path))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::parse(path, e)),
        Err(_) => Err(ExtractError::parse(path, "pdf parser panicked")),
    }
}

fn extract_docx(path: &Path) -> Result<String, ExtractError> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild};

    let bytes = read_bytes(path)?;
    let docx = docx_rs::read_docx(&bytes).map_err(|e| ExtractError::parse(path, e))?;

    let mut paragraphs = vec![];
    for child in &docx.document.children {
        let DocumentChild::Paragraph(paragraph) = child else {
            continue;
        };

        let mut line = String::new();
        for p_child in &paragraph.children {
            let ParagraphChild::Run(run) = p_child else {
                continue;
            };
            for r_child in &run.children {
                if let RunChild::Text(t) = r_child {
                    line.push_str(&t.text);
                }
            }
        }
        paragraphs.push(line);
    }

    Ok(paragraphs.join("\n"))
}

fn extract_xlsx(path: &Path) -> Result<String, ExtractError> {
    use calamine::{Data, Reader};

    let mut workbook =
        calamine::open_workbook_auto(path).map_err(|e| ExtractError::parse(path, e))?;

    let mut cells = vec![];
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                log::warn!("{}: skipping sheet {name:?}: {e}", path.display());
                continue;
            }
        };

        for row in range.rows() {
            for cell in row {
                if !matches!(cell, Data::Empty) {
                    cells.push(cell.to_string());
                }
            }
        }
    }

    Ok(cells.join(" "))
}

/// Slide text in slide order, one line per paragraph.
fn extract_pptx(path: &Path) -> Result<String, ExtractError> {
    let file = std::fs::File::open(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ExtractError::parse(path, e))?;

    // slide10 sorts after slide9, not after slide1
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut lines = vec![];
    for (_, name) in slides {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|e| ExtractError::parse(path, e))?
            .read_to_string(&mut xml)
            .map_err(|e| ExtractError::parse(path, e))?;

        lines.extend(slide_paragraphs(&xml).map_err(|e| ExtractError::parse(path, e))?);
    }

    Ok(lines.join("\n"))
}

/// Collect `<a:t>` runs of a slide, joined per `<a:p>` paragraph.
fn slide_paragraphs(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut paragraphs = vec![];
    let mut line = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"a:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"a:t" => in_text = false,
                b"a:p" if !line.is_empty() => paragraphs.push(std::mem::take(&mut line)),
                _ => {}
            },
            Event::Text(t) if in_text => line.push_str(&t.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    if !line.is_empty() {
        paragraphs.push(line);
    }
    Ok(paragraphs)
}
