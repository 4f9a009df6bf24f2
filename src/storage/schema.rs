use rusqlite::{Connection, Result};
use tracing::{debug, info, warn};

/// Latest schema version; fresh databases are stamped with every version up to it
pub const SCHEMA_VERSION: i32 = 3;

/// Columns of the knowledge full-text table, in declaration order
pub const KNOWLEDGE_FTS_COLUMNS: [&str; 4] = ["content", "tags", "context", "related_files"];

/// Triggers that keep `knowledge_fts` in step with the knowledge tables
pub const KNOWLEDGE_FTS_TRIGGERS: [&str; 5] = [
    "knowledge_fts_insert",
    "knowledge_fts_delete",
    "knowledge_fts_update",
    "knowledge_tags_fts_insert",
    "knowledge_files_fts_insert",
];

const VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);";

const KNOWLEDGE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS knowledge (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    context TEXT,
    source TEXT NOT NULL DEFAULT 'tool',
    metadata TEXT NOT NULL DEFAULT '{}',
    active_file TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_knowledge_updated ON knowledge(updated_at);";

const KNOWLEDGE_LINK_TABLES: &str = "
CREATE TABLE IF NOT EXISTS knowledge_tags (
    entry_id TEXT NOT NULL REFERENCES knowledge(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (entry_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_knowledge_tags_tag ON knowledge_tags(tag);

CREATE TABLE IF NOT EXISTS knowledge_files (
    entry_id TEXT NOT NULL REFERENCES knowledge(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    path TEXT NOT NULL,
    PRIMARY KEY (entry_id, position)
);

CREATE TABLE IF NOT EXISTS knowledge_symbols (
    entry_id TEXT NOT NULL REFERENCES knowledge(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    kind TEXT,
    file TEXT,
    PRIMARY KEY (entry_id, position)
);

CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'general',
    priority INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rules_priority ON rules(enabled, priority);";

const CODE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    relative_path TEXT NOT NULL UNIQUE,
    absolute_path TEXT NOT NULL,
    language TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    line_count INTEGER NOT NULL DEFAULT 0,
    byte_size INTEGER NOT NULL DEFAULT 0,
    modified_at INTEGER NOT NULL DEFAULT 0,
    indexed_at INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_files_language ON files(language);

CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    container TEXT,
    start_line INTEGER NOT NULL,
    start_column INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_column INTEGER NOT NULL,
    exported INTEGER NOT NULL DEFAULT 0,
    signature TEXT,
    doc TEXT
);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id, start_line);
CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    kind TEXT NOT NULL,
    is_local INTEGER NOT NULL DEFAULT 0,
    line INTEGER NOT NULL,
    resolved_file_id INTEGER
);
CREATE INDEX IF NOT EXISTS idx_imports_file ON imports(file_id, line);
CREATE INDEX IF NOT EXISTS idx_imports_path ON imports(path);";

const SYMBOLS_FTS: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
    name,
    container,
    signature,
    doc,
    content='symbols',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS symbols_fts_insert AFTER INSERT ON symbols
BEGIN
    INSERT INTO symbols_fts(rowid, name, container, signature, doc)
    VALUES (new.id, new.name, new.container, new.signature, new.doc);
END;

CREATE TRIGGER IF NOT EXISTS symbols_fts_delete AFTER DELETE ON symbols
BEGIN
    INSERT INTO symbols_fts(symbols_fts, rowid, name, container, signature, doc)
    VALUES ('delete', old.id, old.name, old.container, old.signature, old.doc);
END;

CREATE TRIGGER IF NOT EXISTS symbols_fts_update AFTER UPDATE ON symbols
BEGIN
    INSERT INTO symbols_fts(symbols_fts, rowid, name, container, signature, doc)
    VALUES ('delete', old.id, old.name, old.container, old.signature, old.doc);
    INSERT INTO symbols_fts(rowid, name, container, signature, doc)
    VALUES (new.id, new.name, new.container, new.signature, new.doc);
END;";

const KNOWLEDGE_FTS: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
    content,
    tags,
    context,
    related_files,
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS knowledge_fts_insert AFTER INSERT ON knowledge
BEGIN
    INSERT INTO knowledge_fts(rowid, content, tags, context, related_files)
    VALUES (new.rowid, new.content, '', coalesce(new.context, ''), '');
END;

CREATE TRIGGER IF NOT EXISTS knowledge_fts_delete AFTER DELETE ON knowledge
BEGIN
    DELETE FROM knowledge_fts WHERE rowid = old.rowid;
END;

CREATE TRIGGER IF NOT EXISTS knowledge_fts_update AFTER UPDATE OF content, context ON knowledge
BEGIN
    UPDATE knowledge_fts
    SET content = new.content,
        context = coalesce(new.context, '')
    WHERE rowid = new.rowid;
END;

CREATE TRIGGER IF NOT EXISTS knowledge_tags_fts_insert AFTER INSERT ON knowledge_tags
BEGIN
    UPDATE knowledge_fts
    SET tags = trim(tags || ' ' || new.tag)
    WHERE rowid = (SELECT rowid FROM knowledge WHERE id = new.entry_id);
END;

CREATE TRIGGER IF NOT EXISTS knowledge_files_fts_insert AFTER INSERT ON knowledge_files
BEGIN
    UPDATE knowledge_fts
    SET related_files = trim(related_files || ' ' || new.path)
    WHERE rowid = (SELECT rowid FROM knowledge WHERE id = new.entry_id);
END;";

/// Create every table, index and full-text structure that is missing.
///
/// `upgraded` is false when migrations failed for this scope: the existing
/// knowledge table is left exactly as it was, missing side tables are still
/// created, full-text structures are left alone and the version is not
/// stamped. Returns whether full-text search is usable.
pub fn create_schema(conn: &Connection, upgraded: bool) -> Result<bool> {
    debug!("Creating schema (upgraded: {})", upgraded);

    conn.execute_batch(VERSION_TABLE)?;
    if upgraded || !table_exists(conn, "knowledge")? {
        conn.execute_batch(KNOWLEDGE_TABLE)?;
    }
    conn.execute_batch(KNOWLEDGE_LINK_TABLES)?;
    conn.execute_batch(CODE_TABLES)?;

    if !upgraded {
        warn!("Schema left at its previous version; full-text search disabled for this scope");
        return Ok(false);
    }

    stamp_current(conn)?;

    let full_text = conn
        .execute_batch(KNOWLEDGE_FTS)
        .and_then(|_| conn.execute_batch(SYMBOLS_FTS));

    match full_text {
        Ok(()) => Ok(true),
        Err(e) => {
            warn!("Full-text search unavailable, using substring search: {}", e);
            Ok(false)
        }
    }
}

/// Record every version up to `SCHEMA_VERSION` as applied
pub fn stamp_current(conn: &Connection) -> Result<()> {
    for version in 1..=SCHEMA_VERSION {
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }
    Ok(())
}

/// Highest recorded schema version, 0 when nothing has been recorded
pub fn current_version(conn: &Connection) -> Result<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<Result<Vec<String>>>()?;
    Ok(columns)
}

/// Names of triggers attached to any of the knowledge tables
pub fn knowledge_triggers(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'trigger'
           AND tbl_name IN ('knowledge', 'knowledge_tags', 'knowledge_files')
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>>>()?;
    Ok(names)
}

/// Whether `knowledge_fts` exists with the current column and trigger set
pub fn knowledge_fts_is_current(conn: &Connection) -> Result<bool> {
    if !table_exists(conn, "knowledge_fts")? {
        return Ok(false);
    }

    let columns = table_columns(conn, "knowledge_fts")?;
    if columns != KNOWLEDGE_FTS_COLUMNS {
        debug!("knowledge_fts columns {:?} differ from current set", columns);
        return Ok(false);
    }

    let mut triggers = knowledge_triggers(conn)?;
    triggers.sort();
    let mut expected: Vec<String> = KNOWLEDGE_FTS_TRIGGERS.iter().map(|t| t.to_string()).collect();
    expected.sort();
    Ok(triggers == expected)
}

/// Drop the knowledge full-text table and every trigger on the knowledge tables
pub fn drop_knowledge_fts(conn: &Connection) -> Result<()> {
    for trigger in knowledge_triggers(conn)? {
        debug!("Dropping trigger {}", trigger);
        conn.execute_batch(&format!("DROP TRIGGER IF EXISTS \"{}\";", trigger))?;
    }
    conn.execute_batch("DROP TABLE IF EXISTS knowledge_fts;")?;
    Ok(())
}

/// Create the knowledge full-text table against the current column set and
/// re-derive its contents from every knowledge row. Returns the row count.
pub fn install_knowledge_fts(conn: &Connection) -> Result<usize> {
    conn.execute_batch(KNOWLEDGE_FTS)?;

    let rows = conn.execute(
        "INSERT INTO knowledge_fts(rowid, content, tags, context, related_files)
         SELECT k.rowid,
                k.content,
                coalesce((SELECT group_concat(t.tag, ' ') FROM knowledge_tags t WHERE t.entry_id = k.id), ''),
                coalesce(k.context, ''),
                coalesce((SELECT group_concat(f.path, ' ') FROM knowledge_files f WHERE f.entry_id = k.id), '')
         FROM knowledge k",
        [],
    )?;

    info!("Repopulated knowledge_fts from {} rows", rows);
    Ok(rows)
}

/// Where a scope keeps each part of a knowledge entry.
///
/// Current databases use the full column set plus the tag, file and symbol
/// side tables. A scope whose upgrade failed keeps its previous layout, with
/// some columns missing and links stored as JSON arrays on the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeLayout {
    columns: Vec<String>,
}

impl KnowledgeLayout {
    /// Layout of a database created by this version
    pub fn current() -> Self {
        Self {
            columns: [
                "id",
                "content",
                "context",
                "source",
                "metadata",
                "active_file",
                "created_at",
                "updated_at",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        }
    }

    pub fn inspect(conn: &Connection) -> Result<Self> {
        Ok(Self {
            columns: table_columns(conn, "knowledge")?,
        })
    }

    pub fn has(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// `k.<column>` when present, otherwise the SQL literal `fallback`
    pub fn column_or(&self, column: &str, fallback: &str) -> String {
        if self.has(column) {
            format!("k.{}", column)
        } else {
            fallback.to_string()
        }
    }

    /// Expression ordering entries by recency
    pub fn updated_at(&self) -> String {
        self.column_or("updated_at", &self.column_or("created_at", "0"))
    }

    /// Tags live in a JSON array column instead of `knowledge_tags`
    pub fn json_tags(&self) -> bool {
        self.has("tags")
    }

    /// Related files live in a JSON array column instead of `knowledge_files`
    pub fn json_files(&self) -> bool {
        self.has("related_files")
    }

    /// Related symbols live in a JSON array column instead of `knowledge_symbols`
    pub fn json_symbols(&self) -> bool {
        self.has("related_symbols")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_create_schema() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(create_schema(&conn, true).unwrap());

        let tables = names(&conn, "table");
        for table in [
            "knowledge",
            "knowledge_tags",
            "knowledge_files",
            "knowledge_symbols",
            "rules",
            "files",
            "symbols",
            "imports",
            "knowledge_fts",
            "symbols_fts",
            "schema_version",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }

        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(knowledge_fts_is_current(&conn).unwrap());
    }

    #[test]
    fn test_idempotent_create() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn, true).unwrap();
        create_schema(&conn, true).unwrap();

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, SCHEMA_VERSION);
    }

    #[test]
    fn test_degraded_create_skips_full_text() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!create_schema(&conn, false).unwrap());

        assert!(!table_exists(&conn, "knowledge_fts").unwrap());
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_reinstall_knowledge_fts() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn, true).unwrap();
        conn.execute(
            "INSERT INTO knowledge (id, content, created_at, updated_at) VALUES ('a', 'alpha note', 1, 1)",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO knowledge_tags (entry_id, tag) VALUES ('a', 'beta')", [])
            .unwrap();

        drop_knowledge_fts(&conn).unwrap();
        assert!(knowledge_triggers(&conn).unwrap().is_empty());
        assert_eq!(install_knowledge_fts(&conn).unwrap(), 1);

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM knowledge_fts WHERE knowledge_fts MATCH 'beta'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_degraded_create_keeps_legacy_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE knowledge (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                tags TEXT DEFAULT '[]',
                created_at INTEGER NOT NULL
            );",
        )
        .unwrap();

        assert!(!create_schema(&conn, false).unwrap());
        assert!(table_exists(&conn, "rules").unwrap());
        assert!(table_exists(&conn, "knowledge_tags").unwrap());

        let layout = KnowledgeLayout::inspect(&conn).unwrap();
        assert!(layout.json_tags());
        assert!(!layout.json_files());
        assert!(!layout.has("updated_at"));
        assert_eq!(layout.updated_at(), "k.created_at");
        assert_eq!(layout.column_or("source", "'tool'"), "'tool'");

        let fresh = Connection::open_in_memory().unwrap();
        create_schema(&fresh, true).unwrap();
        assert_eq!(KnowledgeLayout::inspect(&fresh).unwrap(), KnowledgeLayout::current());
    }
}
