//! Undirected document–entity graph built from extraction results.
//!
//! Document nodes link to the keywords, methods, fields, datasets and
//! applications extracted from them; two documents are related through the
//! entities they share.

use crate::entity_extractor::{DocumentEntities, EntityKind, ExtractedEntities};
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Document,
    Keyword,
    Method,
    Dataset,
    Field,
    Application,
}

impl From<EntityKind> for NodeType {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Keyword => NodeType::Keyword,
            EntityKind::Method => NodeType::Method,
            EntityKind::Field => NodeType::Field,
            EntityKind::Dataset => NodeType::Dataset,
            EntityKind::Application => NodeType::Application,
        }
    }
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Document => "document",
            NodeType::Keyword => "keyword",
            NodeType::Method => "method",
            NodeType::Dataset => "dataset",
            NodeType::Field => "field",
            NodeType::Application => "application",
        }
    }

    fn title_prefix(self) -> &'static str {
        match self {
            NodeType::Document => "Document",
            NodeType::Keyword => "Keyword",
            NodeType::Method => "Method",
            NodeType::Dataset => "Dataset",
            NodeType::Field => "Field",
            NodeType::Application => "Application",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    ContainsKeyword,
    UsesMethod,
    UsesDataset,
    BelongsToField,
    HasApplication,
}

impl EdgeType {
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Keyword => EdgeType::ContainsKeyword,
            EntityKind::Method => EdgeType::UsesMethod,
            EntityKind::Dataset => EdgeType::UsesDataset,
            EntityKind::Field => EdgeType::BelongsToField,
            EntityKind::Application => EdgeType::HasApplication,
        }
    }

    pub fn weight(self) -> f64 {
        match self {
            EdgeType::ContainsKeyword => 1.0,
            EdgeType::UsesMethod => 1.5,
            EdgeType::UsesDataset => 1.2,
            EdgeType::BelongsToField => 1.3,
            EdgeType::HasApplication => 1.1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::ContainsKeyword => "CONTAINS_KEYWORD",
            EdgeType::UsesMethod => "USES_METHOD",
            EdgeType::UsesDataset => "USES_DATASET",
            EdgeType::BelongsToField => "BELONGS_TO_FIELD",
            EdgeType::HasApplication => "HAS_APPLICATION",
        }
    }

    /// "Uses Method" style label
    pub fn label(self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub label: String,
    pub title: String,
    /// Chunk ids supporting an entity node; empty for documents
    #[serde(default)]
    pub supports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    pub weight: f64,
}

/// Persisted form of the graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphData {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    document_entities: BTreeMap<String, ExtractedEntities>,
    /// Per plural kind key, entity name to number of documents mentioning it
    entity_counts: BTreeMap<String, BTreeMap<String, usize>>,
}

/// Counts and rankings summarising a graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub document_count: usize,
    pub keyword_count: usize,
    pub method_count: usize,
    pub dataset_count: usize,
    pub field_count: usize,
    pub application_count: usize,
    pub top_keywords: Vec<(String, usize)>,
    pub top_methods: Vec<(String, usize)>,
    pub top_fields: Vec<(String, usize)>,
    pub documents: Vec<String>,
}

#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    data: GraphData,
    node_index: HashMap<String, usize>,
    edge_index: HashMap<(String, String), usize>,
}

fn edge_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// File stem when the name carries a path, the name itself otherwise
fn document_name(name: &str) -> String {
    if name.contains('/') || name.contains('\\') {
        let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
        match file.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => file.to_string(),
        }
    } else {
        name.to_string()
    }
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn rebuild_indices(&mut self) {
        self.node_index = self
            .data
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        self.edge_index = self
            .data
            .edges
            .iter()
            .enumerate()
            .map(|(i, e)| (edge_key(&e.source, &e.target), i))
            .collect();
    }

    fn upsert_node(&mut self, id: &str, node_type: NodeType) -> usize {
        if let Some(&idx) = self.node_index.get(id) {
            return idx;
        }
        self.data.nodes.push(Node {
            id: id.to_string(),
            node_type,
            label: id.to_string(),
            title: format!("{}: {}", node_type.title_prefix(), id),
            supports: Vec::new(),
        });
        let idx = self.data.nodes.len() - 1;
        self.node_index.insert(id.to_string(), idx);
        idx
    }

    fn upsert_edge(&mut self, source: &str, target: &str, edge_type: EdgeType) {
        let edge = Edge {
            source: source.to_string(),
            target: target.to_string(),
            edge_type,
            weight: edge_type.weight(),
        };
        match self.edge_index.get(&edge_key(source, target)) {
            Some(&idx) => self.data.edges[idx] = edge,
            None => {
                self.data.edges.push(edge);
                self.edge_index
                    .insert(edge_key(source, target), self.data.edges.len() - 1);
            }
        }
    }

    /// Add a document node and link it to each of its entities
    pub fn add_document(&mut self, document: &DocumentEntities) {
        let doc_name = document_name(&document.source_file);

        self.data
            .document_entities
            .insert(doc_name.clone(), document.entities.clone());
        // A document named like an earlier entity takes the node over
        let idx = self.upsert_node(&doc_name, NodeType::Document);
        let node = &mut self.data.nodes[idx];
        if node.node_type != NodeType::Document {
            node.node_type = NodeType::Document;
            node.title = format!("{}: {}", NodeType::Document.title_prefix(), doc_name);
            node.supports.clear();
        }

        for (kind, entity) in document.entities.iter() {
            if entity == doc_name {
                continue;
            }

            // The first kind an entity is seen with wins
            let idx = self.upsert_node(entity, kind.into());
            if let Some(ids) = document.supports.get(entity) {
                let supports = &mut self.data.nodes[idx].supports;
                for id in ids {
                    if !supports.contains(id) {
                        supports.push(id.clone());
                    }
                }
            }

            self.upsert_edge(&doc_name, entity, EdgeType::for_kind(kind));
            *self
                .data
                .entity_counts
                .entry(kind.json_key().to_string())
                .or_default()
                .entry(entity.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn build_from_extraction_results(&mut self, results: &[DocumentEntities]) {
        for document in results {
            self.add_document(document);
        }
        info!(
            "Knowledge graph has {} nodes and {} edges",
            self.data.nodes.len(),
            self.data.edges.len()
        );
    }

    pub fn nodes(&self) -> &[Node] {
        &self.data.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.data.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&idx| &self.data.nodes[idx])
    }

    /// Neighbours of a node in edge insertion order
    pub fn neighbors(&self, id: &str) -> Vec<&str> {
        self.data
            .edges
            .iter()
            .filter_map(|e| {
                if e.source == id {
                    Some(e.target.as_str())
                } else if e.target == id {
                    Some(e.source.as_str())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn degree(&self, id: &str) -> usize {
        self.neighbors(id).len()
    }

    pub fn document_nodes(&self) -> Vec<&str> {
        self.data
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Document)
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Entity nodes, optionally of one kind only
    pub fn entity_nodes(&self, kind: Option<EntityKind>) -> Vec<&str> {
        self.data
            .nodes
            .iter()
            .filter(|n| match kind {
                Some(kind) => n.node_type == NodeType::from(kind),
                None => n.node_type != NodeType::Document,
            })
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Entities linked to both documents
    pub fn shared_entities(&self, doc1: &str, doc2: &str) -> Vec<String> {
        let other = self.neighbors(doc2);
        self.neighbors(doc1)
            .into_iter()
            .filter(|n| other.contains(n))
            .map(String::from)
            .collect()
    }

    /// Other documents sharing entities with `doc_name`, most shared first
    pub fn related_documents(&self, doc_name: &str) -> Vec<(String, Vec<String>)> {
        if self.node(doc_name).is_none() {
            return Vec::new();
        }

        let mut related: Vec<(String, Vec<String>)> = Vec::new();
        for entity in self.neighbors(doc_name) {
            for neighbor in self.neighbors(entity) {
                let is_document = self
                    .node(neighbor)
                    .is_some_and(|n| n.node_type == NodeType::Document);
                if neighbor == doc_name || !is_document {
                    continue;
                }
                match related.iter_mut().find(|(doc, _)| doc == neighbor) {
                    Some((_, shared)) => shared.push(entity.to_string()),
                    None => related.push((neighbor.to_string(), vec![entity.to_string()])),
                }
            }
        }

        related.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        related
    }

    fn top_entities(&self, kind: EntityKind, n: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .data
            .entity_counts
            .get(kind.json_key())
            .map(|c| c.iter().map(|(name, count)| (name.clone(), *count)).collect())
            .unwrap_or_default();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(n);
        counts
    }

    pub fn statistics(&self) -> GraphStatistics {
        let kind_count = |kind| self.entity_nodes(Some(kind)).len();
        let documents: Vec<String> = self.document_nodes().into_iter().map(String::from).collect();

        GraphStatistics {
            total_nodes: self.data.nodes.len(),
            total_edges: self.data.edges.len(),
            document_count: documents.len(),
            keyword_count: kind_count(EntityKind::Keyword),
            method_count: kind_count(EntityKind::Method),
            dataset_count: kind_count(EntityKind::Dataset),
            field_count: kind_count(EntityKind::Field),
            application_count: kind_count(EntityKind::Application),
            top_keywords: self.top_entities(EntityKind::Keyword, 5),
            top_methods: self.top_entities(EntityKind::Method, 5),
            top_fields: self.top_entities(EntityKind::Field, 3),
            documents,
        }
    }

    /// Save the graph as pretty-printed JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.data)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Knowledge graph saved to {}", path.display());

        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let data: GraphData = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid knowledge graph file {}", path.display()))?;

        let mut graph = KnowledgeGraph {
            data,
            ..Default::default()
        };
        graph.rebuild_indices();
        info!(
            "Knowledge graph loaded: {} nodes, {} edges",
            graph.data.nodes.len(),
            graph.data.edges.len()
        );

        Ok(graph)
    }

    pub fn clear(&mut self) {
        *self = KnowledgeGraph::default();
    }

    pub fn is_empty(&self) -> bool {
        self.data.nodes.is_empty()
    }
}
