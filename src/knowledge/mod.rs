// Knowledge entries and rules persisted per scope

pub mod rules;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::storage::registry::ScopeStats;
use crate::storage::Scope;

pub use rules::{NewRule, Rule, RulePatch, RuleStore};
pub use store::KnowledgeStore;

/// Upper bound on entries returned by a retrieval, whatever the caller asks for
pub const MAX_RETRIEVE_LIMIT: usize = 20;

/// Upper bound on entries returned by a listing
pub const MAX_LIST_LIMIT: usize = 50;

/// Link from a knowledge entry to a code symbol. Only a name is required:
/// entries may describe code that was never indexed or has since moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// A stored free-text snippet
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub scope: Scope,
    pub content: String,
    pub tags: BTreeSet<String>,
    pub context: Option<String>,
    pub source: String,
    pub metadata: serde_json::Value,
    pub related_files: Vec<String>,
    pub related_symbols: Vec<SymbolRef>,
    pub active_file: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Full-text relevance, higher is better; absent for recency-ordered results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Input for storing a knowledge entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewKnowledge {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Caller-supplied links; when absent the enricher fills them in
    #[serde(default)]
    pub related_files: Option<Vec<String>>,
    #[serde(default)]
    pub related_symbols: Option<Vec<SymbolRef>>,
    #[serde(default)]
    pub active_file: Option<String>,
}

impl NewKnowledge {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// What enrichment contributed to a stored entry
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentSummary {
    pub enriched: bool,
    pub related_files: usize,
    pub related_symbols: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredKnowledge {
    pub id: String,
    pub scope: Scope,
    pub enrichment: EnrichmentSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeListing {
    pub entries: Vec<KnowledgeEntry>,
    pub scopes: Vec<ScopeStats>,
}

/// Trim tags, drop empty ones and collapse duplicates
pub fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> BTreeSet<String> {
    tags.iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Clamp a requested limit into `1..=max`
pub fn clamp_limit(requested: usize, max: usize) -> usize {
    requested.clamp(1, max)
}
