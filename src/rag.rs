use crate::chunking::split_document;
use crate::citation::{
    colorize_answer, format_context, render_sources, resolve_citations, tag_sources, Citation,
    Source,
};
use crate::config::ChunkingConfig;
use crate::document::Document;
use crate::embeddings::EmbeddingService;
use crate::error::RagError;
use crate::providers::{ChatModel, GenerationParams};
use crate::vector_store::VectorStore;
use anyhow::{Context, Result};
use colored::Colorize;
use log::{error, info, warn};
use std::io::{self, Write};
use std::sync::Arc;

/// Prompt used for grounded answers; `{context}` and `{question}` are substituted
pub const RAG_PROMPT_TEMPLATE: &str = r#"You are a professional assistant for analysing academic literature. Answer the user's question using the retrieved passages below.

[Retrieved passages]
{context}

[Question]
{question}

[Answering rules]
1. Prefer the original text: when the passages contain what the question needs, quote or closely summarise them.
2. Tell the question types apart:
   - For a specific fact (which methods, what numbers) that the passages do not contain, answer plainly that the retrieved content of the document does not mention it.
   - For an overall summary (what the paper is about, its main contributions), synthesise across the passages.
3. Stay objective and accurate. Use only the retrieved content and never invent facts.
4. Organise the answer in Markdown with headings and lists where they help.
5. Tables must use standard Markdown pipe syntax, every row starting and ending with `|` and a `| --- |` separator under the header. Never align plain-text tables with spaces.
6. Cite the passages you rely on with their markers, for example [doc_0] or [doc_3].
7. Answer in the language of the question.

[Answer]"#;

/// Fill a prompt template with the rendered context and question
pub fn build_prompt(template: &str, context: &str, question: &str) -> String {
    template
        .replace("{context}", context)
        .replace("{question}", question)
}

/// How an ingest treats data already in the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Drop the collection first so old and new documents never mix
    Replace,
    /// Keep other documents, replacing only chunks of the same source file
    Append,
}

/// Outcome of indexing one document
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub source_file: String,
    pub chunks: usize,
}

/// A generated answer with its retrieved sources
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Retrieved chunks in retrieval order, tagged `doc_i`
    pub sources: Vec<Source>,
    /// Distinct resolved markers in order of first appearance
    pub citations: Vec<Citation>,
    /// Markers naming no retrieved source
    pub unresolved_markers: Vec<String>,
}

/// RAG (Retrieval-Augmented Generation) engine
pub struct RagEngine {
    store: Arc<dyn VectorStore>,
    embeddings: EmbeddingService,
    chat: Arc<dyn ChatModel>,
    params: GenerationParams,
    chunking: ChunkingConfig,
    retrieval_k: u64,
    prompt_template: String,
}

impl RagEngine {
    /// Create a new RAG engine
    pub fn new(
        store: Arc<dyn VectorStore>,
        embeddings: EmbeddingService,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        RagEngine {
            store,
            embeddings,
            chat,
            params: GenerationParams::default(),
            chunking: ChunkingConfig::default(),
            retrieval_k: 12,
            prompt_template: RAG_PROMPT_TEMPLATE.to_string(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_retrieval_k(mut self, retrieval_k: u64) -> Self {
        self.retrieval_k = retrieval_k.max(1);
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    /// Check if the corpus collection exists
    pub async fn collection_exists(&self, corpus: &str) -> Result<bool> {
        self.store.collection_exists(corpus).await
    }

    /// Index documents into a corpus
    pub async fn ingest(
        &self,
        documents: &[Document],
        corpus: &str,
        mode: IngestMode,
        clean: bool,
    ) -> Result<Vec<IngestReport>> {
        if mode == IngestMode::Replace && self.store.collection_exists(corpus).await? {
            info!("Replacing existing collection for corpus {}", corpus);
            self.store.delete_collection(corpus).await?;
        }

        let mut reports = Vec::with_capacity(documents.len());
        for document in documents {
            let chunks = self
                .process_document(document, corpus, clean)
                .await
                .with_context(|| format!("Failed to process {}", document.document_id))?;
            reports.push(IngestReport {
                source_file: document.document_id.clone(),
                chunks,
            });
        }

        Ok(reports)
    }

    /// Process a document: chunk it, generate embeddings, and store them.
    /// Earlier chunks of the same source file are replaced.
    pub async fn process_document(
        &self,
        document: &Document,
        corpus: &str,
        clean: bool,
    ) -> Result<usize> {
        // Split content into chunks
        let chunks = split_document(document, self.chunking, clean);
        if chunks.is_empty() {
            return Err(RagError::EmptyDocument(document.document_id.clone()).into());
        }
        info!("Split {} into {} chunks", document.document_id, chunks.len());

        // Generate embeddings for chunks
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embeddings.embed_documents(&texts).await?;
        let dimension = embeddings
            .first()
            .map(|e| e.dimension() as u64)
            .ok_or_else(|| RagError::MalformedResponse("no embeddings returned".to_string()))?;

        if self.store.collection_exists(corpus).await? {
            self.store
                .delete_document(corpus, &document.document_id)
                .await?;
        } else {
            self.store.create_collection(corpus, dimension).await?;
        }

        // Store chunks in the vector store
        self.store.store_chunks(corpus, &chunks, embeddings).await?;
        info!(
            "Stored {} chunks of {} in {} store",
            chunks.len(),
            document.document_id,
            self.store.name()
        );

        Ok(chunks.len())
    }

    /// Delete the corpus collection
    pub async fn clear(&self, corpus: &str) -> Result<()> {
        self.store.delete_collection(corpus).await?;
        info!("Cleared corpus {}", corpus);
        Ok(())
    }

    /// Retrieve and tag the chunks nearest to a question
    pub async fn retrieve(
        &self,
        corpus: &str,
        question: &str,
        document: Option<&str>,
    ) -> Result<Vec<Source>> {
        let question_embedding = self.embeddings.embed_query(question).await?;

        let results = self
            .store
            .search(&question_embedding, corpus, self.retrieval_k, document)
            .await?;

        Ok(tag_sources(results))
    }

    /// Answer a question from the corpus, optionally restricted to one source file
    pub async fn query(
        &self,
        corpus: &str,
        question: &str,
        document: Option<&str>,
    ) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion.into());
        }

        let sources = self.retrieve(corpus, question, document).await?;
        if sources.is_empty() {
            return Err(RagError::NoRelevantChunks(corpus.to_string()).into());
        }

        let context = format_context(&sources);
        let prompt = build_prompt(&self.prompt_template, &context, question);

        let text = self
            .chat
            .complete(&prompt, self.params)
            .await
            .context("Failed to generate answer")?;

        let (citations, unresolved_markers) = resolve_citations(&text, &sources);
        if !unresolved_markers.is_empty() {
            warn!(
                "Answer cites unknown sources: {}",
                unresolved_markers.join(", ")
            );
        }

        Ok(Answer {
            text,
            sources,
            citations,
            unresolved_markers,
        })
    }

    /// Run the query loop for a corpus
    pub async fn run_query_loop(&self, corpus: &str, document: Option<&str>) -> Result<()> {
        info!(
            "Ready to answer questions about {}. Type 'exit' to quit.",
            document.unwrap_or(corpus)
        );

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut buffer = String::new();

        loop {
            print!("\n{} ", "Your question:".bold());
            stdout.flush()?;

            buffer.clear();
            if stdin.read_line(&mut buffer)? == 0 {
                break;
            }

            let question = buffer.trim();
            if question.is_empty() {
                continue;
            }

            if question.to_lowercase() == "exit" {
                info!("Goodbye!");
                break;
            }

            match self.query(corpus, question, document).await {
                Ok(answer) => print_answer(&answer),
                Err(e) => error!("{:#}", e),
            }
        }

        Ok(())
    }
}

/// Print an answer with coloured markers followed by its sources
pub fn print_answer(answer: &Answer) {
    println!("\n{}", colorize_answer(&answer.text));
    println!("\n{}", "Sources".bold().underline());
    println!("{}", render_sources(&answer.sources));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_substitutes_placeholders() {
        let prompt = build_prompt(RAG_PROMPT_TEMPLATE, "[doc_0] (source: a.pdf, page 1)\nText", "What?");
        assert!(prompt.contains("[doc_0] (source: a.pdf, page 1)\nText"));
        assert!(prompt.contains("[Question]\nWhat?"));
        assert!(!prompt.contains("{context}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn test_custom_template() {
        let prompt = build_prompt("Q: {question}\nC: {context}", "ctx", "why");
        assert_eq!(prompt, "Q: why\nC: ctx");
    }
}
