use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dotenv::dotenv;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

use scholar_rag::chunking::split_document;
use scholar_rag::config::{save_api_key, AppConfig, ProviderKind, VectorBackend};
use scholar_rag::database::{QdrantConfig, QdrantStore};
use scholar_rag::document::Document;
use scholar_rag::embeddings::{EmbeddingConfig, EmbeddingService};
use scholar_rag::entity_extractor::EntityExtractor;
use scholar_rag::gemini::{GeminiClient, GeminiConfig};
use scholar_rag::graph_view::write_html;
use scholar_rag::knowledge_graph::{GraphStatistics, KnowledgeGraph};
use scholar_rag::local_store::LocalStore;
use scholar_rag::openai::{OpenAiClient, OpenAiConfig};
use scholar_rag::providers::{ChatModel, Embedder, GenerationParams};
use scholar_rag::rag::{print_answer, IngestMode, RagEngine};
use scholar_rag::vector_store::VectorStore;

const DEFAULT_CORPUS: &str = "academic_docs";

/// Question answering and knowledge graphs over academic papers
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index documents (PDF, DOCX or text) into a corpus
    Ingest {
        /// Files to process
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Corpus to index into
        #[arg(long, default_value = DEFAULT_CORPUS)]
        corpus: String,

        /// Keep documents already in the corpus
        #[arg(long)]
        append: bool,

        /// Skip reference-section and page-marker cleaning
        #[arg(long)]
        no_clean: bool,
    },

    /// Ask a question, or start an interactive session without one
    Ask {
        /// Corpus to search
        #[arg(long, default_value = DEFAULT_CORPUS)]
        corpus: String,

        /// Restrict retrieval to one source file
        #[arg(long)]
        document: Option<String>,

        /// Number of chunks to retrieve
        #[arg(short)]
        k: Option<u64>,

        question: Option<String>,
    },

    /// Extract entities and build a knowledge graph
    Graph {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Extract from individual chunks instead of the joined opening chunks
        #[arg(long)]
        per_chunk: bool,

        /// Output directory, defaults to DATA_DIR/graphs
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        no_clean: bool,
    },

    /// Delete a corpus
    Clear {
        #[arg(long, default_value = DEFAULT_CORPUS)]
        corpus: String,
    },

    /// Save the API key into .env
    SetKey {
        key: String,

        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },
}

/// Clients for the configured provider
fn build_providers(
    config: &AppConfig,
) -> Result<(Arc<dyn Embedder>, Arc<dyn ChatModel>, GenerationParams)> {
    match config.provider {
        ProviderKind::OpenAi => {
            let client = OpenAiClient::new(OpenAiConfig::from_env()?);
            let params = client.config().params;
            info!(
                "Using {} for chat and {} for embeddings",
                client.config().chat_model,
                client.config().embedding_model
            );
            let embedder: Arc<dyn Embedder> = Arc::new(client.clone());
            let chat: Arc<dyn ChatModel> = Arc::new(client);
            Ok((embedder, chat, params))
        }
        ProviderKind::Gemini => {
            let client = GeminiClient::new(GeminiConfig::from_env()?);
            info!("Using Gemini for chat and embeddings");
            let embedder: Arc<dyn Embedder> = Arc::new(client.clone());
            let chat: Arc<dyn ChatModel> = Arc::new(client);
            Ok((embedder, chat, GenerationParams::default()))
        }
    }
}

fn build_store(config: &AppConfig) -> Result<Arc<dyn VectorStore>> {
    match config.storage.backend {
        VectorBackend::Local => Ok(Arc::new(LocalStore::open(
            config.storage.local_store_path(),
        )?)),
        VectorBackend::Qdrant => {
            let qdrant_config = QdrantConfig::from_env()?;
            let store =
                QdrantStore::new(qdrant_config).context("Failed to initialize Qdrant client")?;
            Ok(Arc::new(store))
        }
    }
}

fn build_engine(config: &AppConfig) -> Result<RagEngine> {
    let (embedder, chat, params) = build_providers(config)?;
    let store = build_store(config)?;
    let embeddings = EmbeddingService::new(embedder, EmbeddingConfig::default());

    Ok(RagEngine::new(store, embeddings, chat)
        .with_chunking(config.chunking)
        .with_retrieval_k(config.retrieval_k)
        .with_params(params))
}

/// Load every readable file, reporting the ones that fail
fn load_documents(files: &[PathBuf]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for path in files {
        if !path.exists() {
            error!("File not found: {}", path.display());
            continue;
        }

        match Document::from_file(path) {
            Ok(document) => {
                info!(
                    "Loaded {} ({}, {} pages)",
                    document.document_id,
                    document.mime_type,
                    document.pages.len()
                );
                documents.push(document);
            }
            Err(e) => error!("Skipping {}: {:#}", path.display(), e),
        }
    }

    if documents.is_empty() {
        return Err(anyhow!("No documents could be loaded"));
    }
    Ok(documents)
}

fn print_statistics(stats: &GraphStatistics) {
    let ranked = |items: &[(String, usize)]| {
        items
            .iter()
            .map(|(name, count)| format!("{} ({})", name, count))
            .collect::<Vec<String>>()
            .join(", ")
    };

    println!("\n{}", "Knowledge graph".bold().underline());
    println!(
        "{} nodes, {} edges",
        stats.total_nodes.to_string().bright_yellow(),
        stats.total_edges.to_string().bright_yellow()
    );
    println!(
        "documents {} · keywords {} · methods {} · fields {} · datasets {} · applications {}",
        stats.document_count,
        stats.keyword_count,
        stats.method_count,
        stats.field_count,
        stats.dataset_count,
        stats.application_count
    );
    println!("Top keywords: {}", ranked(&stats.top_keywords));
    println!("Top methods:  {}", ranked(&stats.top_methods));
    println!("Top fields:   {}", ranked(&stats.top_fields));
    println!("Documents:    {}", stats.documents.join(", "));
}

fn load_config() -> Result<AppConfig> {
    AppConfig::from_env().context("Invalid configuration")
}

/// Every command except `set-key` needs a valid configuration
async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Ingest {
            files,
            corpus,
            append,
            no_clean,
        } => {
            let config = load_config()?;
            let documents = load_documents(&files)?;
            let engine = build_engine(&config)?;
            let mode = if append {
                IngestMode::Append
            } else {
                IngestMode::Replace
            };

            let reports = engine
                .ingest(&documents, &corpus, mode, !no_clean)
                .await
                .context("Failed to ingest documents")?;

            for report in &reports {
                println!(
                    "{} {} ({} chunks)",
                    "indexed".green(),
                    report.source_file,
                    report.chunks
                );
            }
            let total: usize = reports.iter().map(|r| r.chunks).sum();
            println!("{} chunks in corpus {}", total, corpus.bright_yellow());
        }

        Commands::Ask {
            corpus,
            document,
            k,
            question,
        } => {
            let config = load_config()?;
            let mut engine = build_engine(&config)?;
            if let Some(k) = k {
                engine = engine.with_retrieval_k(k);
            }

            if !engine.collection_exists(&corpus).await? {
                return Err(anyhow!(
                    "Corpus {} does not exist, run `ingest` first",
                    corpus
                ));
            }

            match question {
                Some(question) => {
                    let answer = engine.query(&corpus, &question, document.as_deref()).await?;
                    print_answer(&answer);
                }
                None => {
                    engine
                        .run_query_loop(&corpus, document.as_deref())
                        .await
                        .context("Error in query loop")?;
                }
            }
        }

        Commands::Graph {
            files,
            per_chunk,
            output,
            no_clean,
        } => {
            let config = load_config()?;
            let documents = load_documents(&files)?;
            let (_, chat, _) = build_providers(&config)?;

            let chunks: Vec<_> = documents
                .iter()
                .flat_map(|d| split_document(d, config.chunking, !no_clean))
                .collect();
            info!("Extracting entities from {} chunks", chunks.len());

            let extractor = EntityExtractor::new(chat, config.graph);
            let results = extractor.extract_from_documents(&chunks, !per_chunk).await;

            let mut graph = KnowledgeGraph::new();
            graph.build_from_extraction_results(&results);

            let output = output.unwrap_or_else(|| config.storage.graphs_dir());
            graph.save(output.join("knowledge_graph.json"))?;
            write_html(&graph, output.join("knowledge_graph.html"))?;

            print_statistics(&graph.statistics());
            println!(
                "\nSaved {}",
                output.join("knowledge_graph.html").display().to_string().bright_yellow()
            );
        }

        Commands::Clear { corpus } => {
            let store = build_store(&load_config()?)?;
            store.delete_collection(&corpus).await?;
            println!("{} corpus {}", "cleared".green(), corpus);
        }

        Commands::SetKey { key, env_file } => {
            save_api_key(&env_file, &key)?;
            println!("{} API key saved to {}", "ok".green(), env_file.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli.command).await {
        error!("{:#}", e);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_key_works_with_invalid_settings() {
        std::env::set_var("CHUNK_SIZE", "abc");
        assert!(load_config().is_err());

        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        let result = run(Commands::SetKey {
            key: "sk-test".to_string(),
            env_file: env_file.clone(),
        })
        .await;
        std::env::remove_var("CHUNK_SIZE");

        result.unwrap();
        let saved = std::fs::read_to_string(&env_file).unwrap();
        assert!(saved.contains("DEEPSEEK_API_KEY=sk-test"));
    }
}
