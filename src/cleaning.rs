//! Noise removal for academic papers: page markers, reference sections and
//! bibliography-heavy chunks.

use crate::document::Page;
use log::info;
use regex::Regex;
use std::sync::OnceLock;

const VENUE_KEYWORDS: &[&str] = &[
    "IEEE",
    "ACM",
    "CVPR",
    "ICCV",
    "ECCV",
    "NeurIPS",
    "ICML",
    "ICLR",
    "AAAI",
    "IJCAI",
    "preprint",
    "Proceedings",
    "Conference",
    "Journal",
    "Transactions",
    "vol.",
    "pp.",
    "eds.",
    "Research",
    "Review",
];

/// Only the trailing part of a paper is searched for its reference heading
const REFERENCE_SCAN_FROM: f64 = 0.6;
const REFERENCE_HEADING_LINES: usize = 8;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("Invalid regex"))
}

fn chinese_page_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"第\s*\d+\s*页")
}

fn english_page_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)page\s*\d+\s*(of\s*\d+)?")
}

fn blank_lines() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\n{3,}")
}

fn numbered_references_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^(\d+|[ivx]+)\.?\s*references$")
}

fn bracket_citation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\[\d+(?:,\s*\d+)*\]")
}

fn arxiv_mention() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)arXiv")
}

fn year() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\b(19|20)\d{2}\b")
}

/// Remove page headers/footers and collapse blank lines
pub fn clean_text(text: &str) -> String {
    let text = chinese_page_marker().replace_all(text, "");
    let text = english_page_marker().replace_all(&text, "");
    let text = blank_lines().replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn is_references_heading(line: &str) -> bool {
    let line = line.trim().to_lowercase();
    matches!(line.as_str(), "references" | "reference" | "bibliography")
        || numbered_references_heading().is_match(&line)
}

/// Drop the page that opens the reference section and every page after it
pub fn remove_references_section(pages: Vec<Page>) -> Vec<Page> {
    if pages.is_empty() {
        return pages;
    }

    let scan_from = (pages.len() as f64 * REFERENCE_SCAN_FROM) as usize;
    let cutoff = (scan_from..pages.len()).rev().find(|&idx| {
        pages[idx]
            .text
            .split('\n')
            .take(REFERENCE_HEADING_LINES)
            .any(is_references_heading)
    });

    match cutoff {
        Some(idx) => {
            info!(
                "Reference section starts on page {}, dropping {} trailing pages",
                pages[idx].number,
                pages.len() - idx
            );
            let mut pages = pages;
            pages.truncate(idx);
            pages
        }
        None => pages,
    }
}

/// Heuristic: does this chunk consist mostly of bibliography entries
pub fn is_reference_chunk(text: &str) -> bool {
    let text_length = text.chars().count();
    if text_length < 50 {
        return false;
    }

    let citations = bracket_citation().find_iter(text).count();
    let arxiv_refs = arxiv_mention().find_iter(text).count();
    let years = year().find_iter(text).count();

    let lowered = text.to_lowercase();
    let venue_count = VENUE_KEYWORDS
        .iter()
        .filter(|kw| lowered.contains(&kw.to_lowercase()))
        .count();

    if years >= 3 && venue_count >= 2 {
        return true;
    }
    if citations >= 3 || arxiv_refs >= 2 {
        return true;
    }

    // Citation features per hundred characters, a year counting as half
    let density =
        (citations as f64 + arxiv_refs as f64 + years as f64 * 0.5) / (text_length as f64 / 100.0);
    density > 1.0
}
