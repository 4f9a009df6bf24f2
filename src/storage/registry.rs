use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::migrations::{self, MigrationReport};
use super::schema::{self, KnowledgeLayout};
use super::Scope;
use crate::error::{Error, Result};

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const DEFAULT_POOL_SIZE: u32 = 4;
const DEFAULT_CACHE_KIB: i64 = 16 * 1024;

/// Where scope databases live
#[derive(Debug, Clone)]
pub enum StorageLocation {
    /// One `<scope>.db` file per scope under this directory
    Directory(PathBuf),
    /// Private in-memory database per scope, gone when the registry is dropped
    Memory,
}

/// An open, initialised scope database
pub struct ScopeDatabase {
    scope: Scope,
    path: Option<PathBuf>,
    pool: ConnectionPool,
    full_text: bool,
    layout: KnowledgeLayout,
    migration: MigrationReport,
}

impl ScopeDatabase {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Backing file, `None` for in-memory scopes
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Whether full-text search structures are usable for this scope
    pub fn full_text(&self) -> bool {
        self.full_text
    }

    /// Knowledge columns as they exist on disk
    pub fn layout(&self) -> &KnowledgeLayout {
        &self.layout
    }

    pub fn migration(&self) -> &MigrationReport {
        &self.migration
    }

    /// Schema version currently recorded in the database
    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn()?;
        Ok(schema::current_version(&conn)?)
    }

    /// Database size in bytes as reported by the engine
    pub fn size_bytes(&self) -> Result<u64> {
        let conn = self.conn()?;
        let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((pages * page_size).max(0) as u64)
    }

    /// Flush the write-ahead log into the main database file
    pub fn checkpoint(&self) -> Result<()> {
        if self.path.is_none() {
            return Ok(());
        }
        let conn = self.conn()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        debug!("Checkpointed {} scope", self.scope);
        Ok(())
    }
}

/// Lazily opens and caches one database handle per scope.
///
/// Owned by the application root and shared by reference; nothing here is
/// process-global, so tests can run isolated in-memory registries side by side.
pub struct ScopeRegistry {
    location: StorageLocation,
    project_name: String,
    pool_size: u32,
    cache_size_kib: i64,
    handles: Mutex<HashMap<Scope, Arc<ScopeDatabase>>>,
}

impl ScopeRegistry {
    pub fn new(root: impl Into<PathBuf>, project_name: impl Into<String>) -> Self {
        Self::with_location(StorageLocation::Directory(root.into()), project_name)
    }

    pub fn in_memory(project_name: impl Into<String>) -> Self {
        Self::with_location(StorageLocation::Memory, project_name)
    }

    pub fn with_location(location: StorageLocation, project_name: impl Into<String>) -> Self {
        Self {
            location,
            project_name: sanitize_file_stem(&project_name.into()),
            pool_size: DEFAULT_POOL_SIZE,
            cache_size_kib: DEFAULT_CACHE_KIB,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_cache_size_kib(mut self, cache_size_kib: i64) -> Self {
        self.cache_size_kib = cache_size_kib.max(256);
        self
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Storage file for a scope: the project scope is named after the workspace
    pub fn scope_path(&self, scope: Scope) -> Option<PathBuf> {
        match &self.location {
            StorageLocation::Directory(root) => {
                let stem = match scope {
                    Scope::Project => self.project_name.as_str(),
                    other => other.as_str(),
                };
                Some(root.join(format!("{}.db", stem)))
            }
            StorageLocation::Memory => None,
        }
    }

    pub fn is_open(&self, scope: Scope) -> bool {
        self.handles.lock().contains_key(&scope)
    }

    /// Open a scope, initialising it on first use. Later calls return the
    /// cached handle without touching the database.
    pub fn open(&self, scope: Scope) -> Result<Arc<ScopeDatabase>> {
        let mut handles = self.handles.lock();
        if let Some(db) = handles.get(&scope) {
            return Ok(Arc::clone(db));
        }

        let db = Arc::new(self.initialize(scope)?);
        handles.insert(scope, Arc::clone(&db));
        Ok(db)
    }

    /// Handles opened so far, in scope order
    pub fn open_scopes(&self) -> Vec<Arc<ScopeDatabase>> {
        let handles = self.handles.lock();
        let mut open: Vec<_> = handles.values().cloned().collect();
        open.sort_by_key(|db| db.scope());
        open
    }

    /// Checkpoint every open scope and release the handles
    pub fn close(&self) {
        let mut handles = self.handles.lock();
        for (scope, db) in handles.drain() {
            if let Err(e) = db.checkpoint() {
                warn!("Failed to checkpoint {} scope: {}", scope, e);
            }
        }
    }

    fn initialize(&self, scope: Scope) -> Result<ScopeDatabase> {
        let path = self.scope_path(scope);

        let manager = match &path {
            Some(path) => {
                info!("Opening {} scope at: {}", scope, path.display());
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
                }
                SqliteConnectionManager::file(path)
            }
            None => {
                debug!("Opening in-memory {} scope", scope);
                SqliteConnectionManager::memory()
            }
        };

        let cache_size_kib = self.cache_size_kib;
        let manager = manager.with_init(move |conn| {
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA cache_size = -{};",
                cache_size_kib
            ))
        });

        // An in-memory database lives and dies with its only connection
        let pool_size = if path.is_some() { self.pool_size } else { 1 };
        let pool = Pool::builder()
            .max_size(pool_size)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(10))
            .build(manager)?;

        let mut conn = pool.get()?;
        if path.is_some() {
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            debug!("{} scope journal mode: {}", scope, mode);
        }

        let migration = migrations::migrate(&mut conn);
        if !migration.applied.is_empty() {
            info!(
                "{} scope migrated from v{} to v{}",
                scope, migration.from_version, migration.to_version
            );
        }

        let full_text = schema::create_schema(&conn, migration.succeeded())?;
        let layout = KnowledgeLayout::inspect(&conn)?;
        if layout != KnowledgeLayout::current() {
            warn!("{} scope serving knowledge from its previous layout", scope);
        }
        drop(conn);

        Ok(ScopeDatabase {
            scope,
            path,
            pool,
            full_text,
            layout,
            migration,
        })
    }
}

impl Drop for ScopeRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

/// Keep a project name usable as a file stem
fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();

    match cleaned.as_str() {
        "" | "user" | "global" => format!("project-{}", if cleaned.is_empty() { "default" } else { &cleaned }),
        _ => cleaned,
    }
}

/// Per-scope figures reported alongside listings
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStats {
    pub scope: Scope,
    pub entries: u64,
    pub rules: u64,
    pub size_bytes: u64,
    pub schema_version: i32,
    pub full_text: bool,
}

impl ScopeStats {
    pub fn collect(db: &ScopeDatabase) -> Result<Self> {
        let (entries, rules) = {
            let conn = db.conn()?;
            let entries: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge", [], |row| row.get(0))?;
            let rules: i64 = conn.query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;
            (entries, rules)
        };

        Ok(Self {
            scope: db.scope(),
            entries: entries as u64,
            rules: rules as u64,
            size_bytes: db.size_bytes()?,
            schema_version: db.schema_version()?,
            full_text: db.full_text(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_scope_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");
        let registry = ScopeRegistry::new(&root, "my-app");

        assert!(!registry.is_open(Scope::Project));
        let db = registry.open(Scope::Project).unwrap();
        assert!(registry.is_open(Scope::Project));
        assert!(!registry.is_open(Scope::User));

        assert_eq!(db.path().unwrap(), root.join("my-app.db"));
        assert!(root.join("my-app.db").exists());
        assert!(db.full_text());

        registry.open(Scope::Global).unwrap();
        assert!(root.join("global.db").exists());
    }

    #[test]
    fn test_open_is_cached() {
        let registry = ScopeRegistry::in_memory("cached");
        let first = registry.open(Scope::User).unwrap();
        let second = registry.open(Scope::User).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.open_scopes().len(), 1);
    }

    #[test]
    fn test_in_memory_scopes_are_isolated() {
        let registry = ScopeRegistry::in_memory("iso");
        let project = registry.open(Scope::Project).unwrap();
        let user = registry.open(Scope::User).unwrap();

        project
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO rules (id, title, content, created_at, updated_at) VALUES ('r', 't', 'c', 0, 0)",
                [],
            )
            .unwrap();

        assert_eq!(ScopeStats::collect(&project).unwrap().rules, 1);
        assert_eq!(ScopeStats::collect(&user).unwrap().rules, 0);
    }

    #[test]
    fn test_reopen_after_close_keeps_data() {
        let dir = tempdir().unwrap();
        {
            let registry = ScopeRegistry::new(dir.path(), "persist");
            let db = registry.open(Scope::Project).unwrap();
            db.conn()
                .unwrap()
                .execute(
                    "INSERT INTO knowledge (id, content, created_at, updated_at) VALUES ('a', 'kept', 1, 1)",
                    [],
                )
                .unwrap();
            registry.close();
            assert!(!registry.is_open(Scope::Project));
        }

        let registry = ScopeRegistry::new(dir.path(), "persist");
        let db = registry.open(Scope::Project).unwrap();
        let stats = ScopeStats::collect(&db).unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.schema_version, schema::SCHEMA_VERSION);
        assert!(db.migration().applied.is_empty());
    }

    #[test]
    fn test_open_fails_when_root_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let registry = ScopeRegistry::new(blocker.join("nested"), "x");
        assert!(registry.open(Scope::Project).is_err());
        assert!(!registry.is_open(Scope::Project));
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("my app"), "my_app");
        assert_eq!(sanitize_file_stem("user"), "project-user");
        assert_eq!(sanitize_file_stem(""), "project-default");
    }
}
