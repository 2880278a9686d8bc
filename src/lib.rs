pub mod chunking;
pub mod citation;
pub mod cleaning;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod entity_extractor;
pub mod error;
pub mod gemini;
pub mod graph_view;
pub mod knowledge_graph;
pub mod local_store;
pub mod openai;
pub mod providers;
pub mod rag;
pub mod vector_store;
