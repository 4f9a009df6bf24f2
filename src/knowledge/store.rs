use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    clamp_limit, normalize_tags, EnrichmentSummary, KnowledgeEntry, KnowledgeListing, NewKnowledge,
    StoredKnowledge, SymbolRef, MAX_LIST_LIMIT, MAX_RETRIEVE_LIMIT,
};
use crate::enrich::ContextEnricher;
use crate::error::{Error, Result};
use crate::storage::registry::ScopeStats;
use crate::storage::schema::KnowledgeLayout;
use crate::storage::{like_pattern, now, Scope, ScopeDatabase, ScopeRegistry, ScopeSelector};

/// Matches rows carrying at least one requested tag; `'[]'` disables the filter
const TAG_FILTER: &str = "(?2 = '[]' OR EXISTS (
    SELECT 1 FROM knowledge_tags t
    WHERE t.entry_id = k.id
      AND lower(t.tag) IN (SELECT lower(value) FROM json_each(?2))
))";

/// Same filter over a JSON array `tags` column
const JSON_TAG_FILTER: &str = "(?2 = '[]' OR EXISTS (
    SELECT 1 FROM json_each(CASE WHEN json_valid(k.tags) THEN k.tags ELSE '[]' END) t
    WHERE lower(t.value) IN (SELECT lower(value) FROM json_each(?2))
))";

/// CRUD and ranked search over knowledge entries across scopes
pub struct KnowledgeStore {
    registry: Arc<ScopeRegistry>,
    enricher: Option<ContextEnricher>,
}

impl KnowledgeStore {
    pub fn new(registry: Arc<ScopeRegistry>) -> Self {
        Self {
            registry,
            enricher: None,
        }
    }

    /// Link new entries to indexed code when the caller supplies no links
    pub fn with_enricher(mut self, enricher: ContextEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Persist a new entry and return its id
    pub fn store(&self, scope: Scope, input: NewKnowledge) -> Result<StoredKnowledge> {
        let content = input.content.trim();
        if content.is_empty() {
            return Err(Error::validation("content must not be empty"));
        }

        let tags = normalize_tags(&input.tags);
        let (related_files, related_symbols, enriched) = self.resolve_links(content, &input);

        let metadata = match &input.metadata {
            Some(value) => serde_json::to_string(value)?,
            None => "{}".to_string(),
        };
        let source = input
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("tool");
        let context = input
            .context
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let active_file = input
            .active_file
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let id = Uuid::new_v4().to_string();
        let timestamp = now();

        let db = self.registry.open(scope)?;
        let layout = db.layout();

        let optional = |value: Option<&str>| value.map_or(Value::Null, |v| Value::Text(v.to_string()));
        let mut row = vec![
            ("id", Value::Text(id.clone())),
            ("content", Value::Text(content.to_string())),
            ("context", optional(context)),
            ("source", Value::Text(source.to_string())),
            ("metadata", Value::Text(metadata)),
            ("active_file", optional(active_file)),
            ("created_at", Value::Integer(timestamp)),
            ("updated_at", Value::Integer(timestamp)),
        ];
        if layout.json_tags() {
            row.push(("tags", Value::Text(serde_json::to_string(&tags)?)));
        }
        if layout.json_files() {
            row.push(("related_files", Value::Text(serde_json::to_string(&related_files)?)));
        }
        if layout.json_symbols() {
            row.push(("related_symbols", Value::Text(serde_json::to_string(&related_symbols)?)));
        }
        row.retain(|(column, _)| layout.has(column));

        let columns: Vec<&str> = row.iter().map(|(column, _)| *column).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();

        let mut conn = db.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO knowledge ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ),
            params_from_iter(row.iter().map(|(_, value)| value)),
        )?;

        if !layout.json_tags() {
            for tag in &tags {
                tx.execute(
                    "INSERT OR IGNORE INTO knowledge_tags (entry_id, tag) VALUES (?1, ?2)",
                    params![id, tag],
                )?;
            }
        }

        if !layout.json_files() {
            for (position, path) in related_files.iter().enumerate() {
                tx.execute(
                    "INSERT INTO knowledge_files (entry_id, position, path) VALUES (?1, ?2, ?3)",
                    params![id, position as i64, path],
                )?;
            }
        }

        if !layout.json_symbols() {
            for (position, symbol) in related_symbols.iter().enumerate() {
                tx.execute(
                    "INSERT INTO knowledge_symbols (entry_id, position, name, kind, file)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, position as i64, symbol.name, symbol.kind, symbol.file],
                )?;
            }
        }

        tx.commit()?;

        info!(
            "Stored knowledge {} in {} scope ({} tags, {} files, {} symbols)",
            id,
            scope,
            tags.len(),
            related_files.len(),
            related_symbols.len()
        );

        Ok(StoredKnowledge {
            id,
            scope,
            enrichment: EnrichmentSummary {
                enriched,
                related_files: related_files.len(),
                related_symbols: related_symbols.len(),
            },
        })
    }

    /// Fetch a single entry by id
    pub fn get(&self, scope: Scope, id: &str) -> Result<KnowledgeEntry> {
        let db = self.registry.open(scope)?;
        let layout = db.layout();
        let conn = db.conn()?;

        let entry = conn
            .query_row(
                &format!("SELECT {} FROM knowledge k WHERE k.id = ?1", entry_columns(layout)),
                [id],
                |row| row_to_entry(row, scope, None),
            )
            .optional()?;

        match entry {
            Some(mut entry) => {
                load_links(&conn, layout, &mut entry)?;
                Ok(entry)
            }
            None => Err(Error::not_found("knowledge entry", id)),
        }
    }

    /// Ranked retrieval. An empty query returns the most recently updated entries.
    pub fn retrieve(
        &self,
        selector: ScopeSelector,
        query: &str,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>> {
        let limit = clamp_limit(limit, MAX_RETRIEVE_LIMIT);
        let tag_json = serde_json::to_string(&normalize_tags(tags))?;

        self.fan_out(selector, limit, |db| {
            retrieve_scope(db, query.trim(), &tag_json, limit)
        })
    }

    /// Most recent entries plus per-scope figures. `optimize` also runs an
    /// engine-level compaction and statistics pass, best effort.
    pub fn list(
        &self,
        selector: ScopeSelector,
        tags: &[String],
        limit: usize,
        optimize: bool,
    ) -> Result<KnowledgeListing> {
        let limit = clamp_limit(limit, MAX_LIST_LIMIT);
        let tag_json = serde_json::to_string(&normalize_tags(tags))?;

        if optimize {
            for scope in selector.scopes() {
                match self.registry.open(scope) {
                    Ok(db) => {
                        if let Err(e) = optimize_scope(&db) {
                            warn!("Optimize skipped for {} scope: {}", scope, e);
                        }
                    }
                    Err(e) => warn!("Optimize skipped for {} scope: {}", scope, e),
                }
            }
        }

        let entries = self.fan_out(selector, limit, |db| {
            let conn = db.conn()?;
            recent(&conn, db.layout(), db.scope(), &tag_json, limit)
        })?;

        let mut scopes = Vec::new();
        for scope in selector.scopes() {
            let stats = self
                .registry
                .open(scope)
                .and_then(|db| ScopeStats::collect(&db));
            match stats {
                Ok(stats) => scopes.push(stats),
                Err(e) if selector == ScopeSelector::All => {
                    warn!("No statistics for {} scope: {}", scope, e)
                }
                Err(e) => return Err(e),
            }
        }

        Ok(KnowledgeListing { entries, scopes })
    }

    /// Run `query` against each selected scope independently and merge results.
    /// Scopes may sit at different schema versions, so nothing is joined at
    /// the engine level. Ranked entries lead the merge by score, the rest
    /// follow by recency.
    fn fan_out<F>(&self, selector: ScopeSelector, limit: usize, query: F) -> Result<Vec<KnowledgeEntry>>
    where
        F: Fn(&ScopeDatabase) -> Result<Vec<KnowledgeEntry>>,
    {
        match selector {
            ScopeSelector::One(scope) => {
                let db = self.registry.open(scope)?;
                query(db.as_ref())
            }
            ScopeSelector::All => {
                let mut merged = Vec::new();
                for scope in Scope::ALL {
                    let result = self.registry.open(scope).and_then(|db| query(db.as_ref()));
                    match result {
                        Ok(entries) => merged.extend(entries),
                        Err(e) => warn!("Skipping {} scope: {}", scope, e),
                    }
                }
                merged.sort_by(merge_order);
                merged.truncate(limit);
                Ok(merged)
            }
        }
    }

    fn resolve_links(&self, content: &str, input: &NewKnowledge) -> (Vec<String>, Vec<SymbolRef>, bool) {
        let mut related_files = input.related_files.clone();
        let mut related_symbols = input.related_symbols.clone();
        let mut enriched = false;

        if related_files.is_none() || related_symbols.is_none() {
            if let Some(enricher) = &self.enricher {
                match enricher.enrich(content, input.active_file.as_deref()) {
                    Ok(found) => {
                        enriched = true;
                        related_files.get_or_insert(found.related_files);
                        related_symbols.get_or_insert(found.related_symbols);
                    }
                    Err(e) => warn!("Enrichment failed, storing without code links: {}", e),
                }
            }
        }

        let mut files: Vec<String> = Vec::new();
        for path in related_files.unwrap_or_default() {
            let path = path.trim().to_string();
            if !path.is_empty() && !files.contains(&path) {
                files.push(path);
            }
        }

        let symbols = related_symbols
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !s.name.trim().is_empty())
            .collect();

        (files, symbols, enriched)
    }
}

/// Higher score first, then newer. Unscored entries sort after scored ones.
fn merge_order(a: &KnowledgeEntry, b: &KnowledgeEntry) -> Ordering {
    let by_score = match (a.score, b.score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_score.then_with(|| b.updated_at.cmp(&a.updated_at))
}

/// SELECT list in `row_to_entry` order; columns an older layout lacks read as defaults
fn entry_columns(layout: &KnowledgeLayout) -> String {
    [
        "k.id".to_string(),
        "k.content".to_string(),
        layout.column_or("context", "NULL"),
        layout.column_or("source", "'tool'"),
        layout.column_or("metadata", "'{}'"),
        layout.column_or("active_file", "NULL"),
        layout.column_or("created_at", "0"),
        layout.updated_at(),
    ]
    .join(", ")
}

fn tag_filter(layout: &KnowledgeLayout) -> &'static str {
    if layout.json_tags() {
        JSON_TAG_FILTER
    } else {
        TAG_FILTER
    }
}

fn retrieve_scope(db: &ScopeDatabase, query: &str, tag_json: &str, limit: usize) -> Result<Vec<KnowledgeEntry>> {
    let conn = db.conn()?;
    let layout = db.layout();
    let scope = db.scope();

    if query.is_empty() {
        return recent(&conn, layout, scope, tag_json, limit);
    }

    if db.full_text() {
        if let Some(fts_query) = fts_query(query) {
            match full_text_search(&conn, layout, scope, &fts_query, tag_json, limit) {
                Ok(entries) => return Ok(entries),
                Err(e) => warn!(
                    "Full-text search failed in {} scope, falling back to substring match: {}",
                    scope, e
                ),
            }
        }
    } else {
        debug!("Full-text search disabled in {} scope", scope);
    }

    substring_search(&conn, layout, scope, query, tag_json, limit)
}

fn recent(
    conn: &Connection,
    layout: &KnowledgeLayout,
    scope: Scope,
    tag_json: &str,
    limit: usize,
) -> Result<Vec<KnowledgeEntry>> {
    let sql = format!(
        "SELECT {} FROM knowledge k
         WHERE ?1 = ?1 AND {}
         ORDER BY {} DESC, k.rowid DESC
         LIMIT ?3",
        entry_columns(layout),
        tag_filter(layout),
        layout.updated_at()
    );
    query_entries(conn, layout, scope, &sql, "", tag_json, limit, false)
}

fn full_text_search(
    conn: &Connection,
    layout: &KnowledgeLayout,
    scope: Scope,
    fts_query: &str,
    tag_json: &str,
    limit: usize,
) -> Result<Vec<KnowledgeEntry>> {
    let sql = format!(
        "SELECT {}, bm25(knowledge_fts) AS rank
         FROM knowledge_fts
         JOIN knowledge k ON k.rowid = knowledge_fts.rowid
         WHERE knowledge_fts MATCH ?1 AND {}
         ORDER BY rank ASC, {} DESC, k.rowid DESC
         LIMIT ?3",
        entry_columns(layout),
        tag_filter(layout),
        layout.updated_at()
    );
    query_entries(conn, layout, scope, &sql, fts_query, tag_json, limit, true)
}

fn substring_search(
    conn: &Connection,
    layout: &KnowledgeLayout,
    scope: Scope,
    query: &str,
    tag_json: &str,
    limit: usize,
) -> Result<Vec<KnowledgeEntry>> {
    let pattern = like_pattern(query);
    let tag_match = if layout.json_tags() {
        "lower(coalesce(k.tags, '')) LIKE ?1 ESCAPE '\\'"
    } else {
        "EXISTS (SELECT 1 FROM knowledge_tags t
                 WHERE t.entry_id = k.id AND lower(t.tag) LIKE ?1 ESCAPE '\\')"
    };
    let sql = format!(
        "SELECT {} FROM knowledge k
         WHERE (lower(k.content) LIKE ?1 ESCAPE '\\'
                OR lower(coalesce({}, '')) LIKE ?1 ESCAPE '\\'
                OR {})
           AND {}
         ORDER BY {} DESC, k.rowid DESC
         LIMIT ?3",
        entry_columns(layout),
        layout.column_or("context", "NULL"),
        tag_match,
        tag_filter(layout),
        layout.updated_at()
    );
    query_entries(conn, layout, scope, &sql, &pattern, tag_json, limit, false)
}

#[allow(clippy::too_many_arguments)]
fn query_entries(
    conn: &Connection,
    layout: &KnowledgeLayout,
    scope: Scope,
    sql: &str,
    needle: &str,
    tag_json: &str,
    limit: usize,
    ranked: bool,
) -> Result<Vec<KnowledgeEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let mut entries = stmt
        .query_map(params![needle, tag_json, limit as i64], |row| {
            let score = if ranked {
                Some(-row.get::<_, f64>(8)?)
            } else {
                None
            };
            row_to_entry(row, scope, score)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for entry in &mut entries {
        load_links(conn, layout, entry)?;
    }
    Ok(entries)
}

fn row_to_entry(row: &Row, scope: Scope, score: Option<f64>) -> rusqlite::Result<KnowledgeEntry> {
    let metadata: Option<String> = row.get(4)?;
    let metadata = match metadata {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)),
        None => serde_json::Value::Null,
    };

    Ok(KnowledgeEntry {
        id: row.get(0)?,
        scope,
        content: row.get(1)?,
        tags: Default::default(),
        context: row.get(2)?,
        source: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        metadata,
        related_files: Vec::new(),
        related_symbols: Vec::new(),
        active_file: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        score,
    })
}

/// Fill tags and code links from the side tables, or from the JSON columns
/// of an older layout
fn load_links(conn: &Connection, layout: &KnowledgeLayout, entry: &mut KnowledgeEntry) -> Result<()> {
    entry.tags = if layout.json_tags() {
        json_column::<Vec<String>>(conn, "tags", &entry.id)?
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    } else {
        let mut stmt = conn.prepare_cached("SELECT tag FROM knowledge_tags WHERE entry_id = ?1")?;
        let tags = stmt
            .query_map([&entry.id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        tags
    };

    entry.related_files = if layout.json_files() {
        json_column(conn, "related_files", &entry.id)?
    } else {
        let mut stmt = conn.prepare_cached(
            "SELECT path FROM knowledge_files WHERE entry_id = ?1 ORDER BY position",
        )?;
        let files = stmt
            .query_map([&entry.id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        files
    };

    entry.related_symbols = if layout.json_symbols() {
        json_column(conn, "related_symbols", &entry.id)?
    } else {
        let mut stmt = conn.prepare_cached(
            "SELECT name, kind, file FROM knowledge_symbols WHERE entry_id = ?1 ORDER BY position",
        )?;
        let symbols = stmt
            .query_map([&entry.id], |row| {
                Ok(SymbolRef {
                    name: row.get(0)?,
                    kind: row.get(1)?,
                    file: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        symbols
    };

    Ok(())
}

/// Decode a JSON column of one knowledge row. Missing or malformed values read as empty.
fn json_column<T: DeserializeOwned + Default>(conn: &Connection, column: &str, id: &str) -> Result<T> {
    let raw: Option<String> = conn.query_row(
        &format!("SELECT {} FROM knowledge WHERE id = ?1", column),
        [id],
        |row| row.get(0),
    )?;
    Ok(raw
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default())
}

fn optimize_scope(db: &ScopeDatabase) -> Result<()> {
    let conn = db.conn()?;
    if db.full_text() {
        conn.execute("INSERT INTO knowledge_fts(knowledge_fts) VALUES ('optimize')", [])?;
        conn.execute("INSERT INTO symbols_fts(symbols_fts) VALUES ('optimize')", [])?;
    }
    conn.execute_batch("PRAGMA optimize; ANALYZE;")?;
    debug!("Optimized {} scope", db.scope());
    Ok(())
}

/// Turn free text into an FTS5 query: every word quoted, any word may match.
/// Returns `None` when nothing searchable is left.
pub(crate) fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
