use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    BatchProgress, FileSymbols, Import, Importer, IndexOutcome, IndexReport, IndexStats,
    LanguageStats, ReferenceQuery, References, SourceFile, Symbol, SymbolKind, WorkspaceFile,
};
use crate::error::{Error, Result};
use crate::indexer::ExtractorRegistry;
use crate::storage::{escape_like, like_pattern, now, Scope, ScopeDatabase, ScopeRegistry};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_ERRORS: usize = 20;
pub const DEFAULT_SYMBOL_LIMIT: usize = 20;
pub const MAX_SYMBOL_LIMIT: usize = 100;
pub const MAX_REFERENCE_LIMIT: usize = 50;

const SYMBOL_COLUMNS: &str = "s.id, f.relative_path, f.language, s.name, s.kind, s.container, \
     s.start_line, s.start_column, s.end_line, s.end_column, s.exported, s.signature, s.doc";

const FILE_COLUMNS: &str = "id, relative_path, absolute_path, language, content_hash, line_count, \
     byte_size, modified_at, indexed_at, deleted";

/// Extensions tried when resolving a local import to an indexed file
const RESOLVE_SUFFIXES: &[&str] = &[
    "", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".py", ".rs", ".go", "/index.ts", "/index.tsx",
    "/index.js", "/__init__.py", "/mod.rs",
];

/// File, symbol and import catalog for one scope
#[derive(Clone)]
pub struct CodeIndex {
    registry: Arc<ScopeRegistry>,
    extractors: Arc<ExtractorRegistry>,
    scope: Scope,
    batch_size: usize,
    max_errors: usize,
}

impl CodeIndex {
    pub fn new(registry: Arc<ScopeRegistry>, extractors: Arc<ExtractorRegistry>) -> Self {
        Self {
            registry,
            extractors,
            scope: Scope::Project,
            batch_size: DEFAULT_BATCH_SIZE,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    fn db(&self) -> Result<Arc<ScopeDatabase>> {
        self.registry.open(self.scope)
    }

    /// Index a single file in its own transaction
    pub fn index_file(&self, file: &WorkspaceFile, force: bool) -> Result<IndexOutcome> {
        let db = self.db()?;
        let mut conn = db.conn()?;
        let tx = conn.transaction()?;
        let outcome = self.process(&tx, file, force)?;
        tx.commit()?;

        match &outcome {
            IndexOutcome::Indexed { symbols, imports } => info!(
                "Indexed {} ({} symbols, {} imports)",
                file.relative_path, symbols, imports
            ),
            IndexOutcome::Skipped => debug!("Skipped unchanged {}", file.relative_path),
            IndexOutcome::Failed { error } => warn!("Could not index {}: {}", file.relative_path, error),
        }
        Ok(outcome)
    }

    /// Index many files in fixed-size batches, then remove soft-deleted records
    pub fn index_workspace(&self, files: &[WorkspaceFile], incremental: bool) -> Result<IndexReport> {
        self.index_workspace_with_progress(files, incremental, |_| {})
    }

    /// Like [`index_workspace`](Self::index_workspace), reporting after every batch.
    ///
    /// Each batch is one transaction and each file one savepoint inside it, so
    /// a failing file rolls back only its own writes. Only a failure of the
    /// batch transaction itself fails the whole batch.
    pub fn index_workspace_with_progress<F>(
        &self,
        files: &[WorkspaceFile],
        incremental: bool,
        mut progress: F,
    ) -> Result<IndexReport>
    where
        F: FnMut(&BatchProgress),
    {
        let db = self.db()?;
        let mut report = IndexReport::default();
        let batches = files.len().div_ceil(self.batch_size);
        let mut processed = 0;

        info!(
            "Indexing {} files in {} batches (incremental: {})",
            files.len(),
            batches,
            incremental
        );

        for (batch_idx, chunk) in files.chunks(self.batch_size).enumerate() {
            match self.index_batch(&db, chunk, !incremental) {
                Ok(results) => {
                    for (file, result) in chunk.iter().zip(results) {
                        match result {
                            Ok(IndexOutcome::Indexed { symbols, imports }) => {
                                report.indexed += 1;
                                report.total_symbols += symbols;
                                report.total_imports += imports;
                            }
                            Ok(IndexOutcome::Skipped) => report.skipped += 1,
                            Ok(IndexOutcome::Failed { error }) => {
                                self.record_failure(&mut report, &file.relative_path, &error)
                            }
                            Err(e) => self.record_failure(&mut report, &file.relative_path, &e.to_string()),
                        }
                    }
                }
                Err(e) => {
                    warn!("Batch {} failed: {}", batch_idx + 1, e);
                    for file in chunk {
                        self.record_failure(&mut report, &file.relative_path, &e.to_string());
                    }
                }
            }

            processed += chunk.len();
            debug!("Batch {}/{} done ({} files)", batch_idx + 1, batches, processed);
            progress(&BatchProgress {
                batch: batch_idx + 1,
                batches,
                processed,
                total: files.len(),
            });
        }

        report.removed = self.cleanup_deleted()?;

        info!(
            "Indexing finished: {} indexed, {} skipped, {} failed, {} removed",
            report.indexed, report.skipped, report.failed, report.removed
        );
        Ok(report)
    }

    fn index_batch(
        &self,
        db: &ScopeDatabase,
        chunk: &[WorkspaceFile],
        force: bool,
    ) -> Result<Vec<Result<IndexOutcome>>> {
        let mut conn = db.conn()?;
        let mut tx = conn.transaction()?;
        let mut results = Vec::with_capacity(chunk.len());

        for file in chunk {
            let sp = tx.savepoint()?;
            match self.process(&sp, file, force) {
                Ok(outcome @ IndexOutcome::Failed { .. }) => results.push(Ok(outcome)),
                Ok(outcome) => {
                    sp.commit()?;
                    results.push(Ok(outcome));
                }
                // Dropping the savepoint rolls it back
                Err(e) => results.push(Err(e)),
            }
        }

        tx.commit()?;
        Ok(results)
    }

    fn record_failure(&self, report: &mut IndexReport, path: &str, error: &str) {
        report.failed += 1;
        if report.errors.len() < self.max_errors {
            report.errors.push(format!("{}: {}", path, error));
        }
    }

    /// Hash, skip-check, extract and write one file on `conn`
    fn process(&self, conn: &Connection, file: &WorkspaceFile, force: bool) -> Result<IndexOutcome> {
        let Some(language) = self.extractors.language_for_path(&file.relative_path) else {
            return Ok(IndexOutcome::Failed {
                error: "unsupported file type".to_string(),
            });
        };
        let Some(extractor) = self.extractors.extractor_for(language) else {
            return Ok(IndexOutcome::Failed {
                error: format!("no extractor for {}", language),
            });
        };

        let content = match &file.content {
            Some(content) => content.clone(),
            None => std::fs::read_to_string(&file.absolute_path)
                .map_err(|e| Error::io(&file.absolute_path, e))?,
        };
        let hash = content_hash(&content);

        let existing: Option<(String, bool)> = conn
            .query_row(
                "SELECT content_hash, deleted FROM files WHERE relative_path = ?1",
                [&file.relative_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if !force {
            if let Some((existing_hash, deleted)) = &existing {
                if *existing_hash == hash && !deleted {
                    return Ok(IndexOutcome::Skipped);
                }
            }
        }

        let extraction = match extractor.extract(&content) {
            Ok(extraction) => extraction,
            Err(e) => {
                return Ok(IndexOutcome::Failed {
                    error: format!("could not parse: {}", e),
                })
            }
        };

        let modified_at = std::fs::metadata(&file.absolute_path)
            .and_then(|m| m.modified())
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp())
            .unwrap_or_else(|_| now());

        conn.execute(
            "INSERT INTO files (relative_path, absolute_path, language, content_hash, line_count,
                                byte_size, modified_at, indexed_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
             ON CONFLICT(relative_path) DO UPDATE SET
                absolute_path = excluded.absolute_path,
                language = excluded.language,
                content_hash = excluded.content_hash,
                line_count = excluded.line_count,
                byte_size = excluded.byte_size,
                modified_at = excluded.modified_at,
                indexed_at = excluded.indexed_at,
                deleted = 0",
            params![
                file.relative_path,
                file.absolute_path.to_string_lossy(),
                language,
                hash,
                content.lines().count() as i64,
                content.len() as i64,
                modified_at,
                now(),
            ],
        )?;

        let file_id: i64 = conn.query_row(
            "SELECT id FROM files WHERE relative_path = ?1",
            [&file.relative_path],
            |row| row.get(0),
        )?;

        conn.execute("DELETE FROM symbols WHERE file_id = ?1", [file_id])?;
        conn.execute("DELETE FROM imports WHERE file_id = ?1", [file_id])?;

        let mut insert_symbol = conn.prepare_cached(
            "INSERT INTO symbols (file_id, name, kind, container, start_line, start_column,
                                  end_line, end_column, exported, signature, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for symbol in &extraction.symbols {
            insert_symbol.execute(params![
                file_id,
                symbol.name,
                symbol.kind.as_str(),
                symbol.container,
                symbol.start_line,
                symbol.start_column,
                symbol.end_line,
                symbol.end_column,
                symbol.exported,
                symbol.signature,
                symbol.doc,
            ])?;
        }

        let mut insert_import = conn.prepare_cached(
            "INSERT INTO imports (file_id, path, kind, is_local, line) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for import in &extraction.imports {
            insert_import.execute(params![file_id, import.path, import.kind, import.is_local, import.line])?;
        }

        Ok(IndexOutcome::Indexed {
            symbols: extraction.symbols.len(),
            imports: extraction.imports.len(),
        })
    }

    /// Ranked symbol search: exact-name matches first, then full-text relevance.
    /// Falls back to substring matching when full-text search is unavailable
    /// or finds nothing.
    pub fn search_symbols(
        &self,
        query: &str,
        kinds: &[SymbolKind],
        exported_only: bool,
        limit: usize,
    ) -> Result<Vec<Symbol>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::validation("query must not be empty"));
        }

        let limit = limit.clamp(1, MAX_SYMBOL_LIMIT);
        let kinds_json = serde_json::to_string(&kinds.iter().map(SymbolKind::as_str).collect::<Vec<_>>())?;

        let db = self.db()?;
        let conn = db.conn()?;

        if db.full_text() {
            if let Some(fts) = prefix_query(query) {
                let sql = format!(
                    "SELECT {} FROM symbols_fts
                     JOIN symbols s ON s.id = symbols_fts.rowid
                     JOIN files f ON f.id = s.file_id
                     WHERE symbols_fts MATCH ?1
                       AND f.deleted = 0
                       AND (?2 = '[]' OR s.kind IN (SELECT value FROM json_each(?2)))
                       AND (?3 = 0 OR s.exported = 1)
                     ORDER BY (lower(s.name) = lower(?4)) DESC, bm25(symbols_fts), s.name
                     LIMIT ?5",
                    SYMBOL_COLUMNS
                );
                match query_symbols(&conn, &sql, params![fts, kinds_json, exported_only, query, limit as i64]) {
                    Ok(symbols) if !symbols.is_empty() => return Ok(symbols),
                    Ok(_) => debug!("No full-text symbol match for '{}', trying substring", query),
                    Err(e) => warn!("Symbol full-text search failed, falling back to substring match: {}", e),
                }
            }
        }

        let sql = format!(
            "SELECT {} FROM symbols s
             JOIN files f ON f.id = s.file_id
             WHERE (lower(s.name) LIKE ?1 ESCAPE '\\'
                    OR lower(coalesce(s.container, '')) LIKE ?1 ESCAPE '\\'
                    OR lower(coalesce(s.signature, '')) LIKE ?1 ESCAPE '\\'
                    OR lower(coalesce(s.doc, '')) LIKE ?1 ESCAPE '\\')
               AND f.deleted = 0
               AND (?2 = '[]' OR s.kind IN (SELECT value FROM json_each(?2)))
               AND (?3 = 0 OR s.exported = 1)
             ORDER BY (lower(s.name) = lower(?4)) DESC, length(s.name), s.name
             LIMIT ?5",
            SYMBOL_COLUMNS
        );
        query_symbols(
            &conn,
            &sql,
            params![like_pattern(query), kinds_json, exported_only, query, limit as i64],
        )
    }

    /// Symbols of one file ordered by line, optionally with its imports
    pub fn get_file_symbols(&self, path: &str, include_imports: bool) -> Result<FileSymbols> {
        let db = self.db()?;
        let conn = db.conn()?;

        let file = conn
            .query_row(
                &format!(
                    "SELECT {} FROM files
                     WHERE (relative_path = ?1 OR absolute_path = ?1) AND deleted = 0",
                    FILE_COLUMNS
                ),
                [path],
                row_to_file,
            )
            .optional()?
            .ok_or_else(|| Error::not_found("file", path))?;

        let symbols = query_symbols(
            &conn,
            &format!(
                "SELECT {} FROM symbols s JOIN files f ON f.id = s.file_id
                 WHERE s.file_id = ?1
                 ORDER BY s.start_line, s.start_column",
                SYMBOL_COLUMNS
            ),
            params![file.id],
        )?;

        let imports = if include_imports {
            let mut stmt = conn.prepare(
                "SELECT id, path, kind, is_local, line FROM imports WHERE file_id = ?1 ORDER BY line, id",
            )?;
            let mut imports = stmt
                .query_map([file.id], |row| {
                    Ok(Import {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        kind: row.get(2)?,
                        is_local: row.get(3)?,
                        line: row.get(4)?,
                        resolved: None,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for import in imports.iter_mut().filter(|i| i.is_local) {
                import.resolved = resolve_import(&conn, &file.relative_path, &import.path)?;
            }
            Some(imports)
        } else {
            None
        };

        Ok(FileSymbols {
            file,
            symbols,
            imports,
        })
    }

    /// Definitions of a name, or files importing a module path
    pub fn find_references(&self, query: &ReferenceQuery, limit: usize) -> Result<References> {
        let limit = limit.clamp(1, MAX_REFERENCE_LIMIT) as i64;
        let db = self.db()?;
        let conn = db.conn()?;

        match query {
            ReferenceQuery::Symbol(name) => {
                let sql = format!(
                    "SELECT {} FROM symbols s JOIN files f ON f.id = s.file_id
                     WHERE s.name = ?1 AND f.deleted = 0
                     ORDER BY f.relative_path, s.start_line
                     LIMIT ?2",
                    SYMBOL_COLUMNS
                );
                Ok(References::Definitions(query_symbols(&conn, &sql, params![name, limit])?))
            }
            ReferenceQuery::Module(path) => {
                let mut stmt = conn.prepare(
                    "SELECT f.relative_path, i.path, i.kind, i.line
                     FROM imports i JOIN files f ON f.id = i.file_id
                     WHERE f.deleted = 0 AND lower(i.path) LIKE ?1 ESCAPE '\\'
                     ORDER BY f.relative_path, i.line
                     LIMIT ?2",
                )?;
                let importers = stmt
                    .query_map(params![like_pattern(path), limit], |row| {
                        Ok(Importer {
                            file: row.get(0)?,
                            import_path: row.get(1)?,
                            kind: row.get(2)?,
                            line: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(References::Importers(importers))
            }
        }
    }

    /// Indexed paths equal to `mention` or ending with `/<mention>`
    pub fn resolve_path(&self, mention: &str) -> Result<Vec<String>> {
        let mention = mention.trim().trim_start_matches("./");
        if mention.is_empty() {
            return Ok(Vec::new());
        }

        let db = self.db()?;
        let conn = db.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT relative_path FROM files
             WHERE deleted = 0 AND (relative_path = ?1 OR relative_path LIKE ?2 ESCAPE '\\')
             ORDER BY (relative_path = ?1) DESC, length(relative_path)
             LIMIT 5",
        )?;
        let paths = stmt
            .query_map(params![mention, format!("%/{}", escape_like(mention))], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    pub fn get_index_stats(&self, include_language_breakdown: bool) -> Result<IndexStats> {
        let db = self.db()?;
        let conn = db.conn()?;

        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };

        let files = count("SELECT COUNT(*) FROM files WHERE deleted = 0")?;
        let deleted_files = count("SELECT COUNT(*) FROM files WHERE deleted = 1")?;
        let symbols = count(
            "SELECT COUNT(*) FROM symbols s JOIN files f ON f.id = s.file_id WHERE f.deleted = 0",
        )?;
        let imports = count(
            "SELECT COUNT(*) FROM imports i JOIN files f ON f.id = i.file_id WHERE f.deleted = 0",
        )?;

        let languages = if include_language_breakdown {
            let mut stmt = conn.prepare(
                "SELECT language, COUNT(*), COALESCE(SUM(line_count), 0)
                 FROM files WHERE deleted = 0
                 GROUP BY language
                 ORDER BY COUNT(*) DESC, language",
            )?;
            let languages = stmt
                .query_map([], |row| {
                    Ok(LanguageStats {
                        language: row.get(0)?,
                        files: row.get::<_, i64>(1)? as u64,
                        lines: row.get::<_, i64>(2)? as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Some(languages)
        } else {
            None
        };

        Ok(IndexStats {
            files,
            symbols,
            imports,
            deleted_files,
            languages,
        })
    }

    /// Relative paths of every live indexed file
    pub fn indexed_paths(&self) -> Result<Vec<String>> {
        let db = self.db()?;
        let conn = db.conn()?;
        let mut stmt = conn.prepare("SELECT relative_path FROM files WHERE deleted = 0 ORDER BY relative_path")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Soft-delete a file. Returns false when the path is not indexed.
    pub fn mark_file_deleted(&self, path: &str) -> Result<bool> {
        let db = self.db()?;
        let conn = db.conn()?;
        let changed = conn.execute(
            "UPDATE files SET deleted = 1 WHERE relative_path = ?1 AND deleted = 0",
            [path],
        )?;
        if changed > 0 {
            debug!("Marked {} deleted", path);
        }
        Ok(changed > 0)
    }

    /// Remove soft-deleted files with their symbols and imports
    pub fn cleanup_deleted(&self) -> Result<usize> {
        let db = self.db()?;
        let mut conn = db.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM symbols WHERE file_id IN (SELECT id FROM files WHERE deleted = 1)",
            [],
        )?;
        tx.execute(
            "DELETE FROM imports WHERE file_id IN (SELECT id FROM files WHERE deleted = 1)",
            [],
        )?;
        let removed = tx.execute("DELETE FROM files WHERE deleted = 1", [])?;
        tx.commit()?;

        if removed > 0 {
            info!("Removed {} deleted files from the index", removed);
        }
        Ok(removed)
    }
}

/// Hex blake3 digest of file content
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Every word as a quoted prefix term, any of which may match
fn prefix_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn query_symbols(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Symbol>> {
    let mut stmt = conn.prepare(sql)?;
    let symbols = stmt
        .query_map(params, row_to_symbol)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(symbols)
}

fn row_to_symbol(row: &Row) -> rusqlite::Result<Symbol> {
    let kind: String = row.get(4)?;
    let kind = kind.parse::<SymbolKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Symbol {
        id: row.get(0)?,
        file: row.get(1)?,
        language: row.get(2)?,
        name: row.get(3)?,
        kind,
        container: row.get(5)?,
        start_line: row.get(6)?,
        start_column: row.get(7)?,
        end_line: row.get(8)?,
        end_column: row.get(9)?,
        exported: row.get(10)?,
        signature: row.get(11)?,
        doc: row.get(12)?,
    })
}

fn row_to_file(row: &Row) -> rusqlite::Result<SourceFile> {
    Ok(SourceFile {
        id: row.get(0)?,
        relative_path: row.get(1)?,
        absolute_path: row.get(2)?,
        language: row.get(3)?,
        content_hash: row.get(4)?,
        line_count: row.get(5)?,
        byte_size: row.get::<_, i64>(6)? as u64,
        modified_at: row.get(7)?,
        indexed_at: row.get(8)?,
        deleted: row.get(9)?,
    })
}

/// Indexed file a local import points at, if any
fn resolve_import(conn: &Connection, importer: &str, import: &str) -> Result<Option<String>> {
    let Some(base) = import_base(importer, import) else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare_cached("SELECT 1 FROM files WHERE relative_path = ?1 AND deleted = 0")?;
    for suffix in RESOLVE_SUFFIXES {
        let candidate = format!("{}{}", base, suffix);
        if stmt.exists([&candidate])? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Workspace-relative path an import refers to, before extension probing
fn import_base(importer: &str, import: &str) -> Option<String> {
    let dir = Path::new(importer).parent().unwrap_or_else(|| Path::new(""));

    let joined: PathBuf = if import.starts_with("./") || import.starts_with("../") || import == "." || import == ".." {
        dir.join(import)
    } else if let Some(rooted) = import.strip_prefix('/') {
        PathBuf::from(rooted)
    } else if import.starts_with('.') {
        // Python relative module: one dot per package level
        let rest = import.trim_start_matches('.');
        let levels = import.len() - rest.len();
        let mut base = dir.to_path_buf();
        for _ in 1..levels {
            base.pop();
        }
        base.join(rest.replace('.', "/"))
    } else {
        return None;
    };

    let mut parts: Vec<String> = Vec::new();
    for component in joined.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop()?;
            }
            _ => {}
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ExtractedImport, ExtractedSymbol, Extraction, SymbolExtractor};
    use proptest::prelude::*;

    /// `fn NAME` lines become functions, `use PATH` lines imports, and a
    /// line containing `!!` fails extraction.
    struct LineExtractor;

    impl SymbolExtractor for LineExtractor {
        fn supports(&self, language: &str) -> bool {
            language == "lines"
        }

        fn extract(&self, content: &str) -> anyhow::Result<Extraction> {
            let mut out = Extraction::default();
            for (idx, line) in content.lines().enumerate() {
                let line_no = idx as u32 + 1;
                if line.contains("!!") {
                    anyhow::bail!("syntax error on line {}", line_no);
                }
                if let Some(rest) = line.strip_prefix("fn ") {
                    let (name, doc) = match rest.split_once(" # ") {
                        Some((name, doc)) => (name.trim(), Some(doc.trim().to_string())),
                        None => (rest.trim(), None),
                    };
                    let mut symbol = ExtractedSymbol::new(name, SymbolKind::Function, line_no);
                    symbol.exported = !name.starts_with('_');
                    symbol.signature = Some(format!("fn {}", name));
                    symbol.doc = doc;
                    out.symbols.push(symbol);
                }
                if let Some(path) = line.strip_prefix("use ") {
                    out.imports.push(ExtractedImport {
                        path: path.trim().to_string(),
                        kind: "import".to_string(),
                        is_local: path.starts_with('.'),
                        line: line_no,
                    });
                }
            }
            Ok(out)
        }
    }

    fn index() -> CodeIndex {
        let mut extractors = ExtractorRegistry::with_defaults();
        extractors.register_language("lines", &["ln"]);
        extractors.register(Box::new(LineExtractor));
        CodeIndex::new(
            Arc::new(ScopeRegistry::in_memory("code")),
            Arc::new(extractors),
        )
        .with_batch_size(2)
    }

    fn file(path: &str, content: &str) -> WorkspaceFile {
        WorkspaceFile::new(format!("/nonexistent/ws/{}", path), path).with_content(content)
    }

    #[test]
    fn test_index_then_get_file_symbols() {
        let index = index();
        let outcome = index
            .index_file(&file("src/a.ln", "fn alpha\nuse ./b\nfn _beta\n"), false)
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Indexed { symbols: 2, imports: 1 });

        let found = index.get_file_symbols("src/a.ln", true).unwrap();
        assert_eq!(found.file.language, "lines");
        assert_eq!(found.file.line_count, 3);
        let names: Vec<_> = found.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "_beta"]);
        assert!(!found.symbols[1].exported);
        assert_eq!(found.imports.unwrap()[0].path, "./b");
    }

    #[test]
    fn test_unchanged_content_is_skipped() {
        let index = index();
        let input = file("a.ln", "fn one\n");
        assert!(matches!(index.index_file(&input, false).unwrap(), IndexOutcome::Indexed { .. }));
        assert_eq!(index.index_file(&input, false).unwrap(), IndexOutcome::Skipped);
        assert!(matches!(index.index_file(&input, true).unwrap(), IndexOutcome::Indexed { .. }));
    }

    #[test]
    fn test_reindex_replaces_symbols() {
        let index = index();
        index.index_file(&file("a.ln", "fn old_one\nfn old_two\n"), false).unwrap();
        index.index_file(&file("a.ln", "fn fresh\n"), false).unwrap();

        let found = index.get_file_symbols("a.ln", false).unwrap();
        let names: Vec<_> = found.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["fresh"]);
        assert!(found.imports.is_none());
        assert!(index.search_symbols("old_one", &[], false, 10).unwrap().is_empty());
    }

    #[test]
    fn test_parse_failure_is_an_outcome() {
        let index = index();
        let outcome = index.index_file(&file("bad.ln", "fn ok\n!!\n"), false).unwrap();
        assert!(matches!(outcome, IndexOutcome::Failed { .. }));
        assert!(matches!(
            index.get_file_symbols("bad.ln", true).unwrap_err(),
            Error::NotFound { .. }
        ));

        let outcome = index.index_file(&file("notes.txt", "hello"), false).unwrap();
        assert!(matches!(outcome, IndexOutcome::Failed { .. }));
    }

    #[test]
    fn test_workspace_batch_isolates_failures() {
        let index = index();
        let files = vec![
            file("a.ln", "fn from_a\n"),
            file("b.ln", "fn from_b\n!!\n"),
            file("c.ln", "fn from_c\nuse ./a\n"),
        ];

        let mut batches = Vec::new();
        let report = index
            .index_workspace_with_progress(&files, true, |p| batches.push((p.batch, p.processed)))
            .unwrap();

        assert_eq!(report.indexed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("b.ln"));
        assert_eq!(report.total_symbols, 2);
        assert_eq!(batches, vec![(1, 2), (2, 3)]);

        assert_eq!(index.get_file_symbols("a.ln", true).unwrap().symbols[0].name, "from_a");
        assert_eq!(index.get_file_symbols("c.ln", true).unwrap().symbols[0].name, "from_c");
        assert!(index.get_file_symbols("b.ln", true).is_err());

        let again = index.index_workspace(&files, true).unwrap();
        assert_eq!(again.skipped, 2);
        assert_eq!(again.failed, 1);
    }

    #[test]
    fn test_error_list_is_bounded() {
        let index = index().with_max_errors(2);
        let files: Vec<_> = (0..5).map(|i| file(&format!("bad{}.ln", i), "!!")).collect();
        let report = index.index_workspace(&files, true).unwrap();
        assert_eq!(report.failed, 5);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_search_symbols_ranks_exact_first() {
        let index = index();
        index
            .index_file(&file("a.ln", "fn fetchUserList\nfn fetchUser\n_x\nfn _fetchUserCache\n"), false)
            .unwrap();

        let found = index.search_symbols("fetchUser", &[], false, 10).unwrap();
        assert_eq!(found[0].name, "fetchUser");
        assert_eq!(found.len(), 3);

        let exported = index.search_symbols("fetchUser", &[], true, 10).unwrap();
        assert!(exported.iter().all(|s| s.exported));
        assert_eq!(exported.len(), 2);

        let classes = index.search_symbols("fetchUser", &[SymbolKind::Class], false, 10).unwrap();
        assert!(classes.is_empty());

        // Substring inside a camelCase word only the fallback can find
        let partial = index.search_symbols("UserCa", &[], false, 10).unwrap();
        assert_eq!(partial[0].name, "_fetchUserCache");

        assert!(matches!(
            index.search_symbols("  ", &[], false, 10).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn test_substring_search_covers_docs() {
        let index = index();
        index
            .index_file(
                &file("net.ln", "fn retry_fetch # exponential backoff for flaky upstreams\nfn connect\n"),
                false,
            )
            .unwrap();

        // Whole word through full text, word fragment through the fallback
        for query in ["backoff", "ckof"] {
            let found = index.search_symbols(query, &[], false, 10).unwrap();
            assert_eq!(found.len(), 1, "query {}", query);
            assert_eq!(found[0].name, "retry_fetch");
            assert_eq!(found[0].doc.as_deref(), Some("exponential backoff for flaky upstreams"));
        }
    }

    #[test]
    fn test_find_references() {
        let index = index();
        index.index_file(&file("a.ln", "fn shared\nuse ./lib/http\n"), false).unwrap();
        index.index_file(&file("b.ln", "fn shared\nfn other\n"), false).unwrap();
        index.index_file(&file("c.ln", "use ../vendor/HTTP-client\n"), false).unwrap();

        let defs = index
            .find_references(&ReferenceQuery::Symbol("shared".into()), 50)
            .unwrap();
        match defs {
            References::Definitions(symbols) => {
                let files: Vec<_> = symbols.iter().map(|s| s.file.as_str()).collect();
                assert_eq!(files, vec!["a.ln", "b.ln"]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let importers = index
            .find_references(&ReferenceQuery::Module("http".into()), 50)
            .unwrap();
        match importers {
            References::Importers(found) => {
                let files: Vec<_> = found.iter().map(|i| i.file.as_str()).collect();
                assert_eq!(files, vec!["a.ln", "c.ln"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_soft_delete_and_cleanup() {
        let index = index();
        index.index_file(&file("gone.ln", "fn ghost\n"), false).unwrap();
        index.index_file(&file("kept.ln", "fn kept\n"), false).unwrap();

        assert!(index.mark_file_deleted("gone.ln").unwrap());
        assert!(!index.mark_file_deleted("gone.ln").unwrap());
        assert_eq!(index.indexed_paths().unwrap(), vec!["kept.ln"]);
        assert!(index.get_file_symbols("gone.ln", true).is_err());
        assert!(index.search_symbols("ghost", &[], false, 10).unwrap().is_empty());

        let stats = index.get_index_stats(false).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.deleted_files, 1);

        // Same content on a deleted path is indexed again, not skipped
        let revived = index.index_file(&file("gone.ln", "fn ghost\n"), false).unwrap();
        assert!(matches!(revived, IndexOutcome::Indexed { .. }));
        assert!(index.mark_file_deleted("gone.ln").unwrap());

        assert_eq!(index.cleanup_deleted().unwrap(), 1);
        assert_eq!(index.get_index_stats(false).unwrap().deleted_files, 0);
    }

    #[test]
    fn test_index_stats_language_breakdown() {
        let index = index();
        index.index_file(&file("a.ln", "fn a\nfn b\n"), false).unwrap();
        index.index_file(&file("b.ln", "fn c\n"), false).unwrap();
        index
            .index_file(&file("web/app.ts", "export function start() {}\n"), false)
            .unwrap();

        let stats = index.get_index_stats(true).unwrap();
        assert_eq!(stats.files, 3);
        assert_eq!(stats.symbols, 4);

        let languages = stats.languages.unwrap();
        assert_eq!(languages[0].language, "lines");
        assert_eq!(languages[0].files, 2);
        assert_eq!(languages[0].lines, 3);
        assert_eq!(languages[1].language, "typescript");
    }

    #[test]
    fn test_local_imports_resolve_at_lookup() {
        let index = index();
        index.index_file(&file("src/api/users.ts", "export function fetchUser() {}\n"), false).unwrap();
        index
            .index_file(
                &file(
                    "src/app/main.ts",
                    "import { fetchUser } from '../api/users';\nimport x from 'lodash';\n",
                ),
                false,
            )
            .unwrap();

        let imports = index.get_file_symbols("src/app/main.ts", true).unwrap().imports.unwrap();
        assert_eq!(imports[0].resolved.as_deref(), Some("src/api/users.ts"));
        assert_eq!(imports[1].resolved, None);
    }

    #[test]
    fn test_reads_from_disk_without_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.ln");
        std::fs::write(&path, "fn on_disk\n").unwrap();

        let index = index();
        let outcome = index.index_file(&WorkspaceFile::new(&path, "disk.ln"), false).unwrap();
        assert_eq!(outcome, IndexOutcome::Indexed { symbols: 1, imports: 0 });

        let missing = WorkspaceFile::new(dir.path().join("missing.ln"), "missing.ln");
        assert!(matches!(index.index_file(&missing, false).unwrap_err(), Error::Io { .. }));
    }

    #[test]
    fn test_import_base() {
        assert_eq!(import_base("src/app/main.ts", "../api/users").as_deref(), Some("src/api/users"));
        assert_eq!(import_base("src/main.ts", "./util").as_deref(), Some("src/util"));
        assert_eq!(import_base("pkg/sub/mod.py", ".models").as_deref(), Some("pkg/sub/models"));
        assert_eq!(import_base("pkg/sub/mod.py", "..core.db").as_deref(), Some("pkg/core/db"));
        assert_eq!(import_base("main.ts", "/lib/x").as_deref(), Some("lib/x"));
        assert_eq!(import_base("main.ts", "react"), None);
        assert_eq!(import_base("main.ts", "../../escape"), None);
    }

    #[test]
    fn test_resolve_path_by_suffix() {
        let index = index();
        index.index_file(&file("src/api/users.ts", "export const x = 1;\n"), false).unwrap();
        index.index_file(&file("legacy/users.ts", "export const y = 1;\n"), false).unwrap();

        assert_eq!(index.resolve_path("api/users.ts").unwrap(), vec!["src/api/users.ts"]);
        assert_eq!(index.resolve_path("users.ts").unwrap().len(), 2);
        assert!(index.resolve_path("other.ts").unwrap().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_same_content_skips(lines in proptest::collection::vec("[a-z_]{1,12}", 0..20)) {
            let index = index();
            let content = lines.iter().map(|l| format!("fn {}\n", l)).collect::<String>();
            let input = file("p.ln", &content);

            let first = index.index_file(&input, false).unwrap();
            let indexed = matches!(first, IndexOutcome::Indexed { .. });
            prop_assert!(indexed, "first pass must index the file");
            prop_assert_eq!(index.index_file(&input, false).unwrap(), IndexOutcome::Skipped);
            prop_assert_eq!(content_hash(&content), content_hash(&content.clone()));
        }
    }
}
