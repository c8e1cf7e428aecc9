use crate::chunking::normalize_whitespace;
use crate::error::IndexError;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IndexError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IndexError> {
        let document =
            Document::load(path).map_err(|error| IndexError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IndexError::PdfParse(error.to_string()))?;

            let text = clean_page_text(&text);
            if !text.is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IndexError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// Collapses runs of spaces inside each line and keeps blank lines as
/// paragraph breaks.
fn clean_page_text(raw: &str) -> String {
    let mut cleaned = Vec::new();
    let mut previous_blank = true;
    for line in raw.lines() {
        let line = normalize_whitespace(line);
        if line.is_empty() {
            if !previous_blank {
                cleaned.push(String::new());
            }
            previous_blank = true;
        } else {
            cleaned.push(line);
            previous_blank = false;
        }
    }
    cleaned.join("\n").trim().to_string()
}
