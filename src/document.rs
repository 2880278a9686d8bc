use crate::error::RagError;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use std::fs;
use std::path::Path;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// One page of extracted text
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based page number
    pub number: u32,
    pub text: String,
}

/// Represents a loaded document split into pages
#[derive(Debug, Clone)]
pub struct Document {
    /// The document's file name (used as document ID and `source_file` of its chunks)
    pub document_id: String,
    /// The document's MIME type
    pub mime_type: String,
    /// Extracted pages in reading order
    pub pages: Vec<Page>,
}

impl Document {
    /// Load a document from a file path, dispatching on its MIME type
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        let file_name = path
            .file_name()
            .context("Invalid file name")?
            .to_str()
            .context("Invalid file name encoding")?
            .to_string();

        let mime = from_path(path).first_or_octet_stream();
        let mime_type = mime.to_string();
        debug!("Detected MIME type: {}", mime_type);

        let pages = read_document_pages(path, &mime_type)?;
        let document = Document {
            document_id: file_name,
            mime_type,
            pages,
        };

        if document.is_empty() {
            return Err(RagError::EmptyDocument(document.document_id).into());
        }

        Ok(document)
    }

    /// Build a single-page document from in-memory text
    pub fn from_text(document_id: impl Into<String>, text: &str) -> Self {
        Document {
            document_id: document_id.into(),
            mime_type: "text/plain".to_string(),
            pages: vec![Page {
                number: 1,
                text: normalize_whitespace(text),
            }],
        }
    }

    /// True when no page carries any text
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }

    /// Full text with pages separated by paragraph breaks
    pub fn content(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Read the pages of a document based on its MIME type
pub fn read_document_pages<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<Vec<Page>> {
    let path = file_path.as_ref();

    match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Processing PDF document: {}", path.display());
            let raw_pages = pdf_extract::extract_text_by_pages(path)
                .with_context(|| format!("Failed to extract text from PDF: {}", path.display()))?;

            let pages: Vec<Page> = raw_pages
                .iter()
                .enumerate()
                .map(|(idx, text)| Page {
                    number: idx as u32 + 1,
                    text: normalize_whitespace(text),
                })
                .collect();

            if pages.iter().all(|p| p.text.is_empty()) {
                warn!("Extracted PDF content is empty or contains only whitespace");
            }
            debug!("Extracted {} pages from {}", pages.len(), path.display());

            Ok(pages)
        }

        DOCX_MIME => {
            info!("Processing Word document: {}", path.display());
            let bytes = fs::read(path)
                .with_context(|| format!("Failed to read Word file: {}", path.display()))?;
            let text = extract_docx_text(&bytes).map_err(|reason| RagError::DocumentParse {
                file: path.display().to_string(),
                reason,
            })?;

            // Word documents carry no page boundaries
            Ok(vec![Page { number: 1, text }])
        }

        mime if mime.starts_with("text/") => {
            info!("Processing text document: {}", path.display());
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read text file: {}", path.display()))?;
            Ok(vec![Page {
                number: 1,
                text: normalize_whitespace(&content),
            }])
        }

        _ => Err(RagError::UnsupportedFormat(mime_type.to_string()).into()),
    }
}

/// Collect the non-empty paragraphs of a DOCX file, separated by blank lines
fn extract_docx_text(bytes: &[u8]) -> std::result::Result<String, String> {
    let docx = docx_rs::read_docx(bytes).map_err(|e| e.to_string())?;

    let mut paragraphs = Vec::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            let mut text = String::new();
            for child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            if !text.trim().is_empty() {
                paragraphs.push(text.trim().to_string());
            }
        }
    }

    Ok(paragraphs.join("\n\n"))
}

/// Normalize whitespace in extracted text.
///
/// Carriage returns are dropped, tabs become spaces, runs of spaces collapse
/// to one, trailing spaces on a line are removed and runs of three or more
/// newlines become a single paragraph break.
pub fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut newline_count = 0;
    let mut pending_space = false;

    for c in text.chars() {
        match c {
            '\r' => {}
            '\n' => {
                newline_count += 1;
                pending_space = false;
            }
            ' ' | '\t' => pending_space = true,
            _ => {
                if newline_count > 0 {
                    normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
                    newline_count = 0;
                } else if pending_space && !normalized.is_empty() {
                    normalized.push(' ');
                }
                pending_space = false;
                normalized.push(c);
            }
        }
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_normalize_whitespace() {
        let text = "Deep   retrieval\t models.  \n\n\n\nSecond paragraph.\r\nSame paragraph.   ";
        let expected = "Deep retrieval models.\n\nSecond paragraph.\nSame paragraph.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_normalize_whitespace_keeps_leading_word() {
        assert_eq!(normalize_whitespace("\n\n  Abstract"), "Abstract");
        assert_eq!(normalize_whitespace("   \n\t "), "");
    }

    #[test]
    fn test_text_file_loads_as_single_page() {
        let mut file = Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "Abstract\n\nWe study retrieval augmented generation.").unwrap();

        let document = Document::from_file(file.path()).unwrap();

        assert_eq!(document.mime_type, "text/plain");
        assert_eq!(document.pages.len(), 1);
        assert_eq!(document.pages[0].number, 1);
        assert!(document.content().contains("retrieval augmented generation"));
    }

    #[test]
    fn test_docx_paragraphs_join_with_blank_lines() {
        use docx_rs::{Docx, Paragraph, Run};

        let file = Builder::new().suffix(".docx").tempfile().unwrap();
        Docx::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Abstract")))
            .add_paragraph(Paragraph::new())
            .add_paragraph(
                Paragraph::new()
                    .add_run(Run::new().add_text("We study "))
                    .add_run(Run::new().add_text("knowledge graphs.")),
            )
            .build()
            .pack(file.reopen().unwrap())
            .unwrap();

        let document = Document::from_file(file.path()).unwrap();

        assert_eq!(document.mime_type, DOCX_MIME);
        assert_eq!(document.pages.len(), 1);
        assert_eq!(document.pages[0].number, 1);
        assert_eq!(document.pages[0].text, "Abstract\n\nWe study knowledge graphs.");
    }

    #[test]
    fn test_corrupt_docx_is_a_parse_error() {
        let mut file = Builder::new().suffix(".docx").tempfile().unwrap();
        file.write_all(b"not a zip archive").unwrap();

        let err = Document::from_file(file.path()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::DocumentParse { .. })
        ));
    }

    /// Single-font PDF with one text line per page
    fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                (0..pages.len())
                    .map(|i| format!("{} 0 R", 4 + 2 * i))
                    .collect::<Vec<_>>()
                    .join(" "),
                pages.len()
            ),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_string(),
        ];
        for (i, text) in pages.iter().enumerate() {
            let stream = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                5 + 2 * i
            ));
            objects.push(format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                stream.len(),
                stream
            ));
        }

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, object) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend(format!("{} 0 obj\n{}\nendobj\n", i + 1, object).into_bytes());
        }
        let xref = pdf.len();
        pdf.extend(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).into_bytes());
        for offset in offsets {
            pdf.extend(format!("{:010} 00000 n \n", offset).into_bytes());
        }
        pdf.extend(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref
            )
            .into_bytes(),
        );
        pdf
    }

    #[test]
    fn test_pdf_pages_are_numbered_in_order() {
        let mut file = Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(&pdf_with_pages(&["Attention is all you need", "Graph attention networks"]))
            .unwrap();

        let document = Document::from_file(file.path()).unwrap();

        assert_eq!(document.mime_type, "application/pdf");
        assert_eq!(document.pages.len(), 2);
        assert_eq!(document.pages[0].number, 1);
        assert_eq!(document.pages[1].number, 2);
        assert!(document.pages[0].text.contains("Attention"));
        assert!(document.pages[1].text.contains("Graph"));
        assert!(!document.pages[0].text.contains("Graph"));
    }

    #[test]
    fn test_empty_text_file_is_rejected() {
        let file = Builder::new().suffix(".txt").tempfile().unwrap();

        let err = Document::from_file(file.path()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::EmptyDocument(_))
        ));
    }

    #[test]
    fn test_unsupported_format() {
        let mut file = Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(&[0x89, b'P', b'N', b'G']).unwrap();

        let err = Document::from_file(file.path()).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_document_from_text() {
        let document = Document::from_text("notes.txt", "one\n\n\n\ntwo");
        assert_eq!(document.pages[0].text, "one\n\ntwo");
        assert!(!document.is_empty());
    }
}
