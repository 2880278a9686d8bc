use crate::cleaning::{clean_text, is_reference_chunk, remove_references_section};
use crate::config::ChunkingConfig;
use crate::document::Document;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Separators tried in order, from paragraph breaks down to single characters
const SEPARATORS: &[&str] = &[
    "\n\n", "\n", "。", "！", "？", ".", "!", "?", ";", "；", " ", "",
];

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// `{source_file}#{chunk_index}`
    pub id: String,
    /// The actual text content of this chunk
    pub text: String,
    /// Estimated token count for this chunk
    pub token_count: usize,
    /// File name of the document this chunk belongs to
    pub source_file: String,
    /// 1-based page the chunk was cut from
    pub page: u32,
    /// Position among the document's chunks
    pub chunk_index: usize,
    /// Byte offset of this chunk in its page text
    pub start_position: usize,
}

impl TextChunk {
    pub fn make_id(source_file: &str, chunk_index: usize) -> String {
        format!("{}#{}", source_file, chunk_index)
    }
}

/// Character-based splitter that recursively falls back to finer separators
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveSplitter {
    pub fn new(config: ChunkingConfig) -> Self {
        RecursiveSplitter {
            chunk_size: config.chunk_size.max(1),
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Split text into trimmed, non-empty chunks of at most `chunk_size` characters
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in split_keep_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge_splits(&fitting));
                fitting.clear();
            }

            if finer.is_empty() {
                let piece = piece.trim();
                if !piece.is_empty() {
                    chunks.push(piece.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge_splits(&fitting));
        }

        chunks
    }

    /// Greedily pack pieces into chunks, carrying an overlapping tail forward
    fn merge_splits(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !current.is_empty() {
                push_joined(&mut merged, &current);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            current.push_back(piece);
            total += len;
        }

        push_joined(&mut merged, &current);
        merged
    }
}

fn push_joined(out: &mut Vec<String>, pieces: &VecDeque<&str>) {
    let joined: String = pieces.iter().copied().collect();
    let joined = joined.trim();
    if !joined.is_empty() {
        out.push(joined.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split on a separator, keeping it at the end of the piece it terminates
fn split_keep_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(idx, c)| &text[idx..idx + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut last = 0;
    for (idx, matched) in text.match_indices(separator) {
        let end = idx + matched.len();
        pieces.push(&text[last..end]);
        last = end;
    }
    if last < text.len() {
        pieces.push(&text[last..]);
    }
    pieces
}

/// Clean and split a document into indexed chunks.
///
/// With `clean` set, the reference section is cut, page markers are removed
/// and bibliography-looking chunks are filtered out before indexing.
pub fn split_document(document: &Document, config: ChunkingConfig, clean: bool) -> Vec<TextChunk> {
    let splitter = RecursiveSplitter::new(config);

    let pages = if clean {
        remove_references_section(document.pages.clone())
            .into_iter()
            .map(|mut page| {
                page.text = clean_text(&page.text);
                page
            })
            .collect()
    } else {
        document.pages.clone()
    };

    let mut chunks = Vec::new();
    let mut removed = 0;

    for page in &pages {
        // Chunk starts never decrease, and a chunk can start where the previous one did
        let mut cursor = 0;
        for text in splitter.split_text(&page.text) {
            let start_position = page.text[cursor..]
                .find(&text)
                .map_or(cursor, |pos| cursor + pos);
            cursor = start_position;

            if clean && is_reference_chunk(&text) {
                removed += 1;
                continue;
            }

            let chunk_index = chunks.len();
            chunks.push(TextChunk {
                id: TextChunk::make_id(&document.document_id, chunk_index),
                token_count: estimate_token_count(&text),
                text,
                source_file: document.document_id.clone(),
                page: page.number,
                chunk_index,
                start_position,
            });
        }
    }

    if removed > 0 {
        info!(
            "Filtered {} reference chunks from {}",
            removed, document.document_id
        );
    }

    chunks
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}

/// Calculate approximate token count for a text.
/// Words plus punctuation, with every CJK character counted as a token.
pub fn estimate_token_count(text: &str) -> usize {
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    let words = text
        .split_whitespace()
        .filter(|w| !w.chars().all(is_cjk))
        .count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + cjk + punctuation
}
