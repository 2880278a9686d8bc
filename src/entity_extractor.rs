use crate::chunking::TextChunk;
use crate::config::GraphConfig;
use crate::providers::{ChatModel, GenerationParams};
use anyhow::Result;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Texts shorter than this are not worth an LLM call
const MIN_TEXT_CHARS: usize = 50;
/// Longer texts are cut before prompting
const MAX_TEXT_CHARS: usize = 3000;
/// Chunks joined per document in aggregate mode
const AGGREGATE_CHUNKS: usize = 3;
/// Chunks extracted one by one per document in per-chunk mode
const PER_CHUNK_LIMIT: usize = 5;

const EXTRACTION_PROMPT: &str = r#"You are an expert in analysing academic literature. Extract the core entities from the academic text below so they can be linked into a knowledge network.

[Text]
{text}

[What to extract]
1. keywords: up to {max_keywords} core concepts, terms or research topics (research objects, core problems, contributions).
2. methods: up to {max_methods} methods or techniques (algorithms, frameworks, models, tools), e.g. Transformer, BERT, RAG, knowledge graph, vector retrieval.
3. fields: up to {max_fields} research fields (disciplines, sub-areas, cross-disciplinary areas), e.g. natural language processing, information retrieval.
4. datasets: up to {max_datasets} dataset names; use an empty array when none are named.
5. applications: up to {max_applications} application scenarios (practical uses, industries, problems solved), e.g. question answering, document retrieval.

[Output format]
Reply with JSON only, no other text:
{
  "keywords": ["keyword 1", "keyword 2"],
  "methods": ["method 1"],
  "fields": ["field 1"],
  "datasets": ["dataset 1"],
  "applications": ["application 1"]
}

Prefer specific, distinctive entities over broad ones and keep the entity names in the language of the text."#;

fn json_object_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").expect("Invalid regex"))
}

/// Entity categories extracted from a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Keyword,
    Method,
    Field,
    Dataset,
    Application,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Keyword,
        EntityKind::Method,
        EntityKind::Field,
        EntityKind::Dataset,
        EntityKind::Application,
    ];

    /// Singular name, as used for graph node types
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Keyword => "keyword",
            EntityKind::Method => "method",
            EntityKind::Field => "field",
            EntityKind::Dataset => "dataset",
            EntityKind::Application => "application",
        }
    }

    /// Plural key used in the extraction JSON
    pub fn json_key(self) -> &'static str {
        match self {
            EntityKind::Keyword => "keywords",
            EntityKind::Method => "methods",
            EntityKind::Field => "fields",
            EntityKind::Dataset => "datasets",
            EntityKind::Application => "applications",
        }
    }

    fn limit(self, limits: &GraphConfig) -> usize {
        match self {
            EntityKind::Keyword => limits.max_keywords,
            EntityKind::Method => limits.max_methods,
            EntityKind::Field => limits.max_fields,
            EntityKind::Dataset => limits.max_datasets,
            EntityKind::Application => limits.max_applications,
        }
    }
}

/// Entity names per kind, de-duplicated, in extraction order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub applications: Vec<String>,
}

impl ExtractedEntities {
    pub fn get(&self, kind: EntityKind) -> &[String] {
        match kind {
            EntityKind::Keyword => &self.keywords,
            EntityKind::Method => &self.methods,
            EntityKind::Field => &self.fields,
            EntityKind::Dataset => &self.datasets,
            EntityKind::Application => &self.applications,
        }
    }

    fn get_mut(&mut self, kind: EntityKind) -> &mut Vec<String> {
        match kind {
            EntityKind::Keyword => &mut self.keywords,
            EntityKind::Method => &mut self.methods,
            EntityKind::Field => &mut self.fields,
            EntityKind::Dataset => &mut self.datasets,
            EntityKind::Application => &mut self.applications,
        }
    }

    /// All entities with their kinds, kind by kind
    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &str)> + '_ {
        EntityKind::ALL
            .into_iter()
            .flat_map(move |kind| self.get(kind).iter().map(move |name| (kind, name.as_str())))
    }

    pub fn len(&self) -> usize {
        EntityKind::ALL.iter().map(|k| self.get(*k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append entities not already present, keeping order
    pub fn merge(&mut self, other: ExtractedEntities) {
        for kind in EntityKind::ALL {
            let target = self.get_mut(kind);
            for name in other.get(kind) {
                if !target.contains(name) {
                    target.push(name.clone());
                }
            }
        }
    }

    /// Cut each kind to its configured limit
    pub fn truncate(&mut self, limits: &GraphConfig) {
        for kind in EntityKind::ALL {
            self.get_mut(kind).truncate(kind.limit(limits));
        }
    }
}

/// Entities of one source file with the chunks supporting each entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntities {
    pub source_file: String,
    pub entities: ExtractedEntities,
    /// Entity name to supporting chunk ids
    pub supports: BTreeMap<String, Vec<String>>,
}

/// Parse an extraction response: whole JSON first, then the first flat `{...}` block
pub fn parse_entities(response: &str) -> ExtractedEntities {
    let value = serde_json::from_str::<Value>(response.trim())
        .ok()
        .filter(Value::is_object)
        .or_else(|| {
            json_object_pattern()
                .find(response)
                .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        });

    let Some(value) = value else {
        let preview: String = response.chars().take(100).collect();
        warn!("No valid JSON in extraction response: {}...", preview);
        return ExtractedEntities::default();
    };

    let mut entities = ExtractedEntities::default();
    for kind in EntityKind::ALL {
        let Some(items) = value.get(kind.json_key()).and_then(Value::as_array) else {
            continue;
        };
        let target = entities.get_mut(kind);
        for item in items {
            let name = match item {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !name.is_empty() && !target.contains(&name) {
                target.push(name);
            }
        }
    }

    entities
}

/// Chunk ids among `chunks` mentioning each entity; all of them when none does
fn find_supports(entities: &ExtractedEntities, chunks: &[&TextChunk]) -> BTreeMap<String, Vec<String>> {
    let lowered: Vec<String> = chunks.iter().map(|c| c.text.to_lowercase()).collect();
    let mut supports = BTreeMap::new();

    for (_, name) in entities.iter() {
        if supports.contains_key(name) {
            continue;
        }
        let needle = name.to_lowercase();
        let mut ids: Vec<String> = chunks
            .iter()
            .zip(&lowered)
            .filter(|(_, text)| text.contains(&needle))
            .map(|(chunk, _)| chunk.id.clone())
            .collect();
        if ids.is_empty() {
            ids = chunks.iter().map(|c| c.id.clone()).collect();
        }
        supports.insert(name.to_string(), ids);
    }

    supports
}

/// LLM-backed extractor of keywords, methods, fields, datasets and applications
pub struct EntityExtractor {
    chat: Arc<dyn ChatModel>,
    limits: GraphConfig,
}

impl EntityExtractor {
    pub fn new(chat: Arc<dyn ChatModel>, limits: GraphConfig) -> Self {
        EntityExtractor { chat, limits }
    }

    fn build_prompt(&self, text: &str) -> String {
        EXTRACTION_PROMPT
            .replace("{max_keywords}", &self.limits.max_keywords.to_string())
            .replace("{max_methods}", &self.limits.max_methods.to_string())
            .replace("{max_fields}", &self.limits.max_fields.to_string())
            .replace("{max_datasets}", &self.limits.max_datasets.to_string())
            .replace("{max_applications}", &self.limits.max_applications.to_string())
            .replace("{text}", text)
    }

    /// Extract entities from one passage of text
    pub async fn extract_entities(&self, text: &str) -> Result<ExtractedEntities> {
        if text.trim().chars().count() < MIN_TEXT_CHARS {
            return Ok(ExtractedEntities::default());
        }

        let text = match text.char_indices().nth(MAX_TEXT_CHARS) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.to_string(),
        };

        let response = self
            .chat
            .complete(&self.build_prompt(&text), GenerationParams::extraction())
            .await?;
        debug!("Extraction response: {} chars", response.len());

        Ok(parse_entities(&response))
    }

    /// Extract entities per source file, in first-seen order.
    ///
    /// Aggregate mode extracts once from the first chunks joined together;
    /// otherwise each of the first chunks is extracted and the results unioned.
    pub async fn extract_from_documents(
        &self,
        chunks: &[TextChunk],
        aggregate_by_file: bool,
    ) -> Vec<DocumentEntities> {
        let mut grouped: Vec<(String, Vec<&TextChunk>)> = Vec::new();
        for chunk in chunks {
            match grouped.iter_mut().find(|(file, _)| *file == chunk.source_file) {
                Some((_, group)) => group.push(chunk),
                None => grouped.push((chunk.source_file.clone(), vec![chunk])),
            }
        }

        let mut results = Vec::with_capacity(grouped.len());
        for (source_file, group) in grouped {
            info!("Extracting entities from {}", source_file);

            let limit = if aggregate_by_file {
                AGGREGATE_CHUNKS
            } else {
                PER_CHUNK_LIMIT
            };
            let used: Vec<&TextChunk> = group.into_iter().take(limit).collect();

            let mut entities = if aggregate_by_file {
                let combined = used
                    .iter()
                    .map(|c| c.text.as_str())
                    .collect::<Vec<&str>>()
                    .join("\n\n");
                self.extract_entities(&combined).await.unwrap_or_else(|e| {
                    warn!("Entity extraction failed for {}: {:#}", source_file, e);
                    ExtractedEntities::default()
                })
            } else {
                let mut merged = ExtractedEntities::default();
                for chunk in &used {
                    match self.extract_entities(&chunk.text).await {
                        Ok(found) => merged.merge(found),
                        Err(e) => {
                            warn!("Entity extraction failed for {}: {:#}", chunk.id, e);
                        }
                    }
                }
                merged
            };
            entities.truncate(&self.limits);

            info!(
                "{}: {} keywords, {} methods, {} fields, {} datasets, {} applications",
                source_file,
                entities.keywords.len(),
                entities.methods.len(),
                entities.fields.len(),
                entities.datasets.len(),
                entities.applications.len()
            );

            let supports = find_supports(&entities, &used);
            results.push(DocumentEntities {
                source_file,
                entities,
                supports,
            });
        }

        results
    }
}
