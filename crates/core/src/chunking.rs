use crate::config::ChunkingOptions;
use crate::extractor::PageText;
use crate::models::SourceType;

const SECTION_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl From<ChunkingOptions> for ChunkingConfig {
    fn from(value: ChunkingOptions) -> Self {
        Self {
            max_chars: value.chunk_tokens * value.chars_per_token,
            overlap_chars: value.overlap_tokens * value.chars_per_token,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingOptions::default().into()
    }
}

impl ChunkingConfig {
    /// Largest single piece, leaving room for the carried overlap.
    fn piece_limit(&self) -> usize {
        self.max_chars
            .saturating_sub(self.overlap_chars)
            .saturating_sub(SECTION_SEPARATOR.len())
            .max(1)
    }
}

/// Text of a source file ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceContent {
    Markdown(String),
    Pdf(Vec<PageText>),
}

impl SourceContent {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Markdown(_) => SourceType::Markdown,
            Self::Pdf(_) => SourceType::Pdf,
        }
    }

    pub fn chunks(&self, config: ChunkingConfig) -> Chunks<'_> {
        match self {
            Self::Markdown(text) => chunk_markdown(text, config),
            Self::Pdf(pages) => chunk_pages(pages, config),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkText {
    pub text: String,
    pub page_number: Option<u32>,
}

pub fn chunk_markdown(text: &str, config: ChunkingConfig) -> Chunks<'_> {
    Chunks::new(vec![(None, text)], config)
}

/// Pages are chunked independently; no chunk spans two pages.
pub fn chunk_pages(pages: &[PageText], config: ChunkingConfig) -> Chunks<'_> {
    let segments = pages
        .iter()
        .map(|page| (Some(page.number), page.text.as_str()))
        .collect();
    Chunks::new(segments, config)
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Lazy chunk sequence. Cloning it restarts from the same position.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    config: ChunkingConfig,
    segments: Vec<(Option<u32>, &'a str)>,
    segment: usize,
    pieces: Vec<&'a str>,
    piece: usize,
    page: Option<u32>,
    carry: Option<String>,
}

impl<'a> Chunks<'a> {
    fn new(segments: Vec<(Option<u32>, &'a str)>, config: ChunkingConfig) -> Self {
        Self {
            config,
            segments,
            segment: 0,
            pieces: Vec::new(),
            piece: 0,
            page: None,
            carry: None,
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = ChunkText;

    fn next(&mut self) -> Option<ChunkText> {
        while self.piece >= self.pieces.len() {
            let (page, text) = *self.segments.get(self.segment)?;
            self.segment += 1;
            self.pieces = split_pieces(text, self.config.piece_limit());
            self.piece = 0;
            self.page = page;
            self.carry = None;
        }

        let max = self.config.max_chars;
        let mut text = self.carry.take().unwrap_or_default();
        let first = self.pieces[self.piece];
        if !text.is_empty() && text.len() + SECTION_SEPARATOR.len() + first.len() > max {
            text.clear();
        }
        push_piece(&mut text, first);
        self.piece += 1;

        while let Some(next) = self.pieces.get(self.piece) {
            if text.len() + SECTION_SEPARATOR.len() + next.len() > max {
                break;
            }
            push_piece(&mut text, next);
            self.piece += 1;
        }

        if self.piece < self.pieces.len() {
            self.carry = overlap_tail(&text, self.config.overlap_chars).map(str::to_string);
        }

        Some(ChunkText {
            text,
            page_number: self.page,
        })
    }
}

fn push_piece(target: &mut String, piece: &str) {
    if !target.is_empty() {
        target.push_str(SECTION_SEPARATOR);
    }
    target.push_str(piece);
}

/// Splits on blank lines and before markdown headings, then breaks any
/// section longer than `limit` at whitespace.
fn split_pieces(text: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    for section in sections(text) {
        split_long(section, limit, &mut pieces);
    }
    pieces
}

fn sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            push_section(&mut sections, &text[start..offset]);
            start = offset + line.len();
        } else if trimmed.starts_with('#') {
            push_section(&mut sections, &text[start..offset]);
            start = offset;
        }
        offset += line.len();
    }
    push_section(&mut sections, &text[start..]);
    sections
}

fn push_section<'a>(sections: &mut Vec<&'a str>, section: &'a str) {
    let section = section.trim();
    if !section.is_empty() {
        sections.push(section);
    }
}

fn split_long<'a>(section: &'a str, limit: usize, pieces: &mut Vec<&'a str>) {
    let mut rest = section;
    while rest.len() > limit {
        let mut cut = floor_char_boundary(rest, limit);
        if let Some(space) = rest[..cut].rfind(char::is_whitespace) {
            if space > 0 {
                cut = space;
            }
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let head = rest[..cut].trim_end();
        if !head.is_empty() {
            pieces.push(head);
        }
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// The last `overlap` bytes of `text`, starting on a word boundary.
fn overlap_tail(text: &str, overlap: usize) -> Option<&str> {
    if overlap == 0 || text.len() <= overlap {
        return None;
    }
    let mut start = text.len() - overlap;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let window = &text[start..];
    let tail = if text[..start].ends_with(char::is_whitespace) {
        window
    } else {
        window
            .find(char::is_whitespace)
            .map_or(window, |space| &window[space..])
    };
    let tail = tail.trim();
    (!tail.is_empty()).then_some(tail)
}
