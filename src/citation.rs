//! `[doc_N]` citation markers: tagging retrieved chunks, resolving markers in
//! answers and rendering them for the terminal.

use crate::chunking::TextChunk;
use crate::vector_store::ScoredChunk;
use colored::Colorize;
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Marker colours, indexed by `N % 10`
pub const CITATION_COLORS: [&str; 10] = [
    "#8B5CF6", "#06B6D4", "#F59E0B", "#10B981", "#EC4899", "#3B82F6", "#EF4444", "#84CC16",
    "#F97316", "#6366F1",
];

/// Maximum characters of chunk text shown per source
pub const SOURCE_PREVIEW_CHARS: usize = 500;

fn marker_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[doc_(\d+)\]").expect("Invalid regex"))
}

/// A retrieved chunk as presented to the model
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    /// `doc_{i}`, the position in retrieval order
    pub tag: String,
    pub chunk: TextChunk,
    pub score: f32,
}

impl Source {
    /// `file · page p`
    pub fn label(&self) -> String {
        format!("{} · page {}", self.chunk.source_file, self.chunk.page)
    }
}

/// A marker in the answer that resolves to a retrieved source
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub marker: String,
    pub index: usize,
    pub chunk_id: String,
    pub source_file: String,
    pub page: u32,
}

/// Tag retrieved chunks `doc_0..doc_{k-1}` in retrieval order
pub fn tag_sources(results: Vec<ScoredChunk>) -> Vec<Source> {
    results
        .into_iter()
        .enumerate()
        .map(|(i, result)| Source {
            tag: format!("doc_{}", i),
            chunk: result.chunk,
            score: result.score,
        })
        .collect()
}

/// Render sources as the context block handed to the model
pub fn format_context(sources: &[Source]) -> String {
    sources
        .iter()
        .map(|s| {
            format!(
                "[{}] (source: {}, page {})\n{}",
                s.tag, s.chunk.source_file, s.chunk.page, s.chunk.text
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// Every `[doc_N]` occurrence in the text, with its index.
/// An index too large to represent is `None` and never resolves.
pub fn extract_markers(text: &str) -> Vec<(String, Option<usize>)> {
    marker_pattern()
        .captures_iter(text)
        .map(|cap| match cap[1].parse::<usize>() {
            Ok(index) => (format!("doc_{}", index), Some(index)),
            Err(_) => (format!("doc_{}", &cap[1]), None),
        })
        .collect()
}

/// Resolve the markers in an answer against its sources.
///
/// Returns distinct resolved citations in order of first appearance, and
/// distinct markers with no matching source.
pub fn resolve_citations(answer: &str, sources: &[Source]) -> (Vec<Citation>, Vec<String>) {
    let mut citations: Vec<Citation> = Vec::new();
    let mut unresolved: Vec<String> = Vec::new();

    for (marker, index) in extract_markers(answer) {
        match index.and_then(|i| sources.get(i).map(|source| (i, source))) {
            Some((index, source)) => {
                if !citations.iter().any(|c| c.index == index) {
                    citations.push(Citation {
                        marker,
                        index,
                        chunk_id: source.chunk.id.clone(),
                        source_file: source.chunk.source_file.clone(),
                        page: source.chunk.page,
                    });
                }
            }
            None => {
                if !unresolved.contains(&marker) {
                    unresolved.push(marker);
                }
            }
        }
    }

    (citations, unresolved)
}

pub fn marker_color(index: usize) -> &'static str {
    CITATION_COLORS[index % CITATION_COLORS.len()]
}

fn hex_to_rgb(hex: &str) -> (u8, u8, u8) {
    let hex = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .unwrap_or(0)
    };
    (channel(0..2), channel(2..4), channel(4..6))
}

/// Colour each marker in the answer with its palette colour
pub fn colorize_answer(answer: &str) -> String {
    marker_pattern()
        .replace_all(answer, |cap: &Captures| {
            let index: usize = cap[1].parse().unwrap_or(0);
            let (r, g, b) = hex_to_rgb(marker_color(index));
            cap[0].truecolor(r, g, b).bold().to_string()
        })
        .into_owned()
}

/// Truncate to `max_chars` characters, appending `...` when cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Render the source panel listing each retrieved chunk
pub fn render_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let (r, g, b) = hex_to_rgb(marker_color(i));
            format!(
                "{} {}\n{}",
                format!("[{}]", source.tag).truecolor(r, g, b).bold(),
                source.label().dimmed(),
                truncate_chars(&source.chunk.text, SOURCE_PREVIEW_CHARS)
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}
