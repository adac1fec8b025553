//! Text extraction for `.docx` documents.
//!
//! Extraction is an ordered fallback chain (see
//! [`fortune_rag_core::fallback::run_chain`]):
//!
//! 1. [`ParagraphExtractor`]: one line per `w:p` paragraph, which also
//!    yields table cells since every cell holds its own paragraphs.
//! 2. [`RunExtractor`]: every `w:t` text run concatenated, for documents
//!    whose paragraph structure fails to parse.
//!
//! A document for which every strategy fails or yields only whitespace is
//! skipped by ingestion.

use std::io::{Cursor, Read};

use fortune_rag_core::fallback::{run_chain, StageOutcome, Strategy};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_XML: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("not a valid docx archive: {0}")]
    Archive(String),
    #[error("word/document.xml not found")]
    MissingDocument,
    #[error("word/document.xml exceeds size limit")]
    TooLarge,
    #[error("malformed XML: {0}")]
    Xml(String),
}

fn read_document_xml(bytes: &[u8]) -> Result<Vec<u8>, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Archive(e.to_string()))?;
    let entry = archive
        .by_name(DOCUMENT_XML)
        .map_err(|_| ExtractError::MissingDocument)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::TooLarge);
    }
    Ok(out)
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// One line per paragraph (body and table cells alike).
pub struct ParagraphExtractor;

impl ParagraphExtractor {
    fn paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut paragraphs = Vec::new();
        let mut current = String::new();
        let mut in_text = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"p" => current.clear(),
                    b"t" => in_text = true,
                    _ => {}
                },
                Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"tab" => current.push('\t'),
                    b"br" => current.push(' '),
                    _ => {}
                },
                Ok(Event::Text(te)) if in_text => {
                    let text = te.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                    current.push_str(&text);
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"t" => in_text = false,
                    b"p" => {
                        let line = current.trim();
                        if !line.is_empty() {
                            paragraphs.push(line.to_string());
                        }
                        current.clear();
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(ExtractError::Xml(e.to_string())),
                _ => {}
            }
            buf.clear();
        }
        Ok(paragraphs)
    }
}

impl Strategy<[u8], String> for ParagraphExtractor {
    fn name(&self) -> &str {
        "paragraphs"
    }

    fn attempt(&self, bytes: &[u8]) -> anyhow::Result<Option<String>> {
        let xml = read_document_xml(bytes)?;
        Ok(non_blank(Self::paragraphs(&xml)?.join("\n")))
    }
}

/// All `w:t` runs concatenated, ignoring structure and XML errors after
/// the first readable text.
pub struct RunExtractor;

impl RunExtractor {
    fn runs(xml: &[u8]) -> Result<String, ExtractError> {
        let mut out = String::new();
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) if out.is_empty() => return Err(ExtractError::Xml(e.to_string())),
                Err(_) => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(out)
    }
}

impl Strategy<[u8], String> for RunExtractor {
    fn name(&self) -> &str {
        "text-runs"
    }

    fn attempt(&self, bytes: &[u8]) -> anyhow::Result<Option<String>> {
        let xml = read_document_xml(bytes)?;
        Ok(non_blank(Self::runs(&xml)?))
    }
}

/// Extract text from docx bytes through the strategy chain.
///
/// `Degraded(None)` when no strategy produced text.
pub fn extract_docx(bytes: &[u8]) -> StageOutcome<Option<String>> {
    let strategies: [&dyn Strategy<[u8], String>; 2] = [&ParagraphExtractor, &RunExtractor];
    run_chain("extract", bytes, &strategies)
}
