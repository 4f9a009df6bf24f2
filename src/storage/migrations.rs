// Versioned in-place upgrades for scope databases

use rusqlite::{Connection, Transaction};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::schema::{self, SCHEMA_VERSION};
use crate::error::Result;

/// One ordered schema upgrade, applied exactly once per database
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    apply: fn(&Transaction) -> Result<()>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline knowledge columns",
        apply: baseline_columns,
    },
    Migration {
        version: 2,
        name: "code link columns",
        apply: link_columns,
    },
    Migration {
        version: 3,
        name: "tag junction and full-text rebuild",
        apply: tag_junction,
    },
];

/// Outcome of a migration run
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub from_version: i32,
    pub to_version: i32,
    pub applied: Vec<i32>,
    pub fts_rebuilt: bool,
    /// Version whose upgrade failed
    pub failed_version: Option<i32>,
    /// Set when the run failed; nothing was applied and the scope stays on `from_version`
    pub error: Option<String>,
}

impl MigrationReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Bring an existing database up to the current schema.
///
/// Runs before schema creation. Fresh databases (no knowledge table) are left
/// untouched. Every pending migration runs in one transaction, so a failure
/// rolls the scope back to the version it was opened at. Errors never escape:
/// they are logged and recorded in the report.
pub fn migrate(conn: &mut Connection) -> MigrationReport {
    let mut report = MigrationReport::default();

    if let Err(e) = run(conn, &mut report) {
        match report.failed_version {
            Some(version) => error!(
                "Migration v{} failed, schema stays at v{}: {}",
                version, report.from_version, e
            ),
            None => error!("Migration run failed at v{}: {}", report.from_version, e),
        }
        report.to_version = report.from_version;
        report.applied.clear();
        report.fts_rebuilt = false;
        report.error = Some(e.to_string());
    }

    report
}

fn run(conn: &mut Connection, report: &mut MigrationReport) -> Result<()> {
    if !schema::table_exists(conn, "knowledge")? {
        debug!("No knowledge table, fresh database; nothing to migrate");
        report.from_version = SCHEMA_VERSION;
        report.to_version = SCHEMA_VERSION;
        return Ok(());
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current = schema::current_version(conn)?;
    report.from_version = current;
    report.to_version = current;

    if current < SCHEMA_VERSION {
        info!("Upgrading schema from v{} to v{}", current, SCHEMA_VERSION);
    }

    let tx = conn.transaction()?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!("Applying migration v{} ({})", migration.version, migration.name);
        report.failed_version = Some(migration.version);

        (migration.apply)(&tx)?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;

        report.applied.push(migration.version);
        report.to_version = migration.version;
        if migration.version == 3 {
            report.fts_rebuilt = true;
        }
    }
    report.failed_version = None;

    if !schema::knowledge_fts_is_current(&tx)? {
        info!("knowledge_fts does not match the current column set, rebuilding");
        schema::drop_knowledge_fts(&tx)?;
        schema::install_knowledge_fts(&tx)?;
        report.fts_rebuilt = true;
    }

    tx.commit()?;

    if !report.applied.is_empty() {
        info!("Migrations {:?} committed", report.applied);
    }
    Ok(())
}

/// Add a column unless it is already there. "duplicate column" is not an error.
fn add_column(conn: &Connection, table: &str, definition: &str) -> Result<bool> {
    let column = definition.split_whitespace().next().unwrap_or(definition);
    if schema::table_columns(conn, table)?.iter().any(|c| c == column) {
        return Ok(false);
    }

    match conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {};", table, definition)) {
        Ok(()) => {
            info!("Added column {}.{}", table, column);
            Ok(true)
        }
        Err(e) if e.to_string().contains("duplicate column") => {
            debug!("Column {}.{} already exists", table, column);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(schema::table_columns(conn, table)?.iter().any(|c| c == column))
}

fn baseline_columns(tx: &Transaction) -> Result<()> {
    add_column(tx, "knowledge", "context TEXT")?;
    add_column(tx, "knowledge", "created_at INTEGER NOT NULL DEFAULT 0")?;
    if add_column(tx, "knowledge", "updated_at INTEGER NOT NULL DEFAULT 0")? {
        tx.execute("UPDATE knowledge SET updated_at = created_at WHERE updated_at = 0", [])?;
    }
    Ok(())
}

fn link_columns(tx: &Transaction) -> Result<()> {
    add_column(tx, "knowledge", "source TEXT NOT NULL DEFAULT 'tool'")?;
    add_column(tx, "knowledge", "metadata TEXT NOT NULL DEFAULT '{}'")?;
    add_column(tx, "knowledge", "active_file TEXT")?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS knowledge_files (
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
        );",
    )?;

    let legacy_files = has_column(tx, "knowledge", "related_files")?;
    let legacy_symbols = has_column(tx, "knowledge", "related_symbols")?;
    if !legacy_files && !legacy_symbols {
        return Ok(());
    }

    // Old full-text structures may reference the columns about to be dropped
    schema::drop_knowledge_fts(tx)?;

    if legacy_files {
        let copied = tx.execute(
            "INSERT OR IGNORE INTO knowledge_files (entry_id, position, path)
             SELECT k.id, CAST(j.key AS INTEGER), CAST(j.value AS TEXT)
             FROM knowledge k,
                  json_each(CASE WHEN json_valid(k.related_files) THEN k.related_files ELSE '[]' END) j
             WHERE j.type = 'text' AND trim(j.value) <> ''",
            [],
        )?;
        info!("Moved {} related file references into knowledge_files", copied);
        tx.execute_batch("ALTER TABLE knowledge DROP COLUMN related_files;")?;
    }

    if legacy_symbols {
        let copied = tx.execute(
            "INSERT OR IGNORE INTO knowledge_symbols (entry_id, position, name, kind, file)
             SELECT k.id,
                    CAST(j.key AS INTEGER),
                    json_extract(j.value, '$.name'),
                    json_extract(j.value, '$.kind'),
                    json_extract(j.value, '$.file')
             FROM knowledge k,
                  json_each(CASE WHEN json_valid(k.related_symbols) THEN k.related_symbols ELSE '[]' END) j
             WHERE j.type = 'object' AND json_extract(j.value, '$.name') IS NOT NULL",
            [],
        )?;
        info!("Moved {} related symbol references into knowledge_symbols", copied);
        tx.execute_batch("ALTER TABLE knowledge DROP COLUMN related_symbols;")?;
    }

    Ok(())
}

fn tag_junction(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS knowledge_tags (
            entry_id TEXT NOT NULL REFERENCES knowledge(id) ON DELETE CASCADE,
            tag TEXT NOT NULL,
            PRIMARY KEY (entry_id, tag)
        );
        CREATE INDEX IF NOT EXISTS idx_knowledge_tags_tag ON knowledge_tags(tag);",
    )?;

    schema::drop_knowledge_fts(tx)?;

    if has_column(tx, "knowledge", "tags")? {
        let copied = tx.execute(
            "INSERT OR IGNORE INTO knowledge_tags (entry_id, tag)
             SELECT k.id, trim(CAST(j.value AS TEXT))
             FROM knowledge k,
                  json_each(CASE WHEN json_valid(k.tags) THEN k.tags ELSE '[]' END) j
             WHERE j.type = 'text' AND trim(j.value) <> ''",
            [],
        )?;
        info!("Moved {} tags into knowledge_tags", copied);
        tx.execute_batch("ALTER TABLE knowledge DROP COLUMN tags;")?;
    } else {
        warn!("Legacy knowledge table has no tags column; nothing to copy");
    }

    let rows = schema::install_knowledge_fts(tx)?;
    debug!("Full-text rebuild covered {} knowledge rows", rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    /// A pre-versioning database: JSON array columns and an external-content
    /// full-text table over the old column set.
    fn legacy_database() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE knowledge (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                tags TEXT DEFAULT '[]',
                context TEXT,
                related_files TEXT,
                related_symbols TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE VIRTUAL TABLE knowledge_fts USING fts5(
                content, tags, context, content='knowledge', content_rowid='rowid'
            );
            CREATE TRIGGER knowledge_ai AFTER INSERT ON knowledge BEGIN
                INSERT INTO knowledge_fts(rowid, content, tags, context)
                VALUES (new.rowid, new.content, new.tags, new.context);
            END;
            INSERT INTO knowledge (id, content, tags, context, related_files, related_symbols, created_at)
            VALUES ('k1', 'cache invalidation happens in the store layer', '[\"cache\",\"store\"]',
                    'refactor', '[\"src/store.ts\"]',
                    '[{\"name\":\"Store\",\"kind\":\"class\",\"file\":\"src/store.ts\"}]', 100);
            INSERT INTO knowledge (id, content, tags, context, created_at)
            VALUES ('k2', 'prefer async iterators for paging', 'not json', NULL, 200);",
        )
        .unwrap();
        conn
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_fresh_database_is_skipped() {
        let mut conn = Connection::open_in_memory().unwrap();
        let report = migrate(&mut conn);

        assert!(report.succeeded());
        assert!(report.applied.is_empty());
        assert!(!schema::table_exists(&conn, "knowledge").unwrap());
    }

    #[test]
    fn test_legacy_upgrade_preserves_rows() {
        let mut conn = legacy_database();
        let report = migrate(&mut conn);

        assert!(report.succeeded(), "{:?}", report.error);
        assert_eq!(report.from_version, 0);
        assert_eq!(report.applied, vec![1, 2, 3]);
        assert!(report.fts_rebuilt);

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM knowledge"), 2);
        assert_eq!(count(&conn, "SELECT updated_at FROM knowledge WHERE id = 'k2'"), 200);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM knowledge_tags WHERE entry_id = 'k1'"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM knowledge_tags WHERE entry_id = 'k2'"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM knowledge_files"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM knowledge_symbols WHERE name = 'Store'"), 1);

        let columns = schema::table_columns(&conn, "knowledge").unwrap();
        assert!(!columns.contains(&"tags".to_string()));
        assert!(columns.contains(&"active_file".to_string()));

        assert!(schema::knowledge_fts_is_current(&conn).unwrap());
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM knowledge_fts WHERE knowledge_fts MATCH 'cache'"),
            1
        );
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM knowledge_fts WHERE knowledge_fts MATCH 'iterators'"),
            1
        );
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut conn = legacy_database();
        assert!(migrate(&mut conn).succeeded());

        let before: Vec<(String, String)> = conn
            .prepare("SELECT id, content FROM knowledge ORDER BY id")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();

        let report = migrate(&mut conn);
        assert!(report.succeeded());
        assert!(report.applied.is_empty());
        assert!(!report.fts_rebuilt);
        assert_eq!(report.from_version, SCHEMA_VERSION);

        let after: Vec<(String, String)> = conn
            .prepare("SELECT id, content FROM knowledge ORDER BY id")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(before, after);
    }

    /// Legacy table whose `related_files` column cannot be dropped, so the
    /// second upgrade step fails after the first one has run
    fn blocked_legacy_database() -> Connection {
        let conn = legacy_database();
        conn.execute_batch("CREATE INDEX idx_legacy_related ON knowledge(related_files);")
            .unwrap();
        conn
    }

    #[test]
    fn test_failed_migration_rolls_back_every_step() {
        let mut conn = blocked_legacy_database();
        let before = schema::table_columns(&conn, "knowledge").unwrap();

        let report = migrate(&mut conn);

        assert!(!report.succeeded());
        assert_eq!(report.failed_version, Some(2));
        assert!(report.applied.is_empty());
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, 0);
        assert_eq!(schema::current_version(&conn).unwrap(), 0);

        // Columns added by the first step are gone again
        assert_eq!(schema::table_columns(&conn, "knowledge").unwrap(), before);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM knowledge"), 2);
        assert!(!schema::table_exists(&conn, "knowledge_files").unwrap());
    }

    #[test]
    fn test_stale_fts_shape_is_rebuilt() {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::create_schema(&conn, true).unwrap();
        conn.execute(
            "INSERT INTO knowledge (id, content, created_at, updated_at) VALUES ('k', 'tokio runtime notes', 1, 1)",
            [],
        )
        .unwrap();
        schema::drop_knowledge_fts(&conn).unwrap();
        conn.execute_batch("CREATE VIRTUAL TABLE knowledge_fts USING fts5(content);")
            .unwrap();

        let report = migrate(&mut conn);

        assert!(report.succeeded());
        assert!(report.applied.is_empty());
        assert!(report.fts_rebuilt);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM knowledge_fts WHERE knowledge_fts MATCH 'tokio'"),
            1
        );
    }
}
