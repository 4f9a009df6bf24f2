// Configuration management for Codelore

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = ".codelore.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub storage: StorageConfig,
    pub indexing: IndexingConfig,
    pub enrichment: EnrichmentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Names the project scope database; empty means the workspace directory name
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one database per scope; empty means the default location
    pub root: Option<PathBuf>,
    pub pool_size: u32,
    pub cache_size_kib: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub batch_size: usize,
    pub max_errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub max_related_files: usize,
    pub max_related_symbols: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            pool_size: 4,
            cache_size_kib: 16 * 1024,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude: vec![
                "target/".to_string(),
                "node_modules/".to_string(),
                "dist/".to_string(),
                "build/".to_string(),
                ".git/".to_string(),
                ".codelore/".to_string(),
                "*.min.js".to_string(),
                "*.d.ts".to_string(),
                "**/__pycache__/**".to_string(),
            ],
            include: vec![],
            batch_size: crate::index::db::DEFAULT_BATCH_SIZE,
            max_errors: crate::index::db::DEFAULT_MAX_ERRORS,
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_related_files: crate::enrich::DEFAULT_MAX_RELATED_FILES,
            max_related_symbols: crate::enrich::DEFAULT_MAX_RELATED_SYMBOLS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .codelore.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let project_dir = project_dir.as_ref();
        let config_path = project_dir.join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            match Self::from_file(&config_path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid config {}: {}", config_path.display(), e);
                    Self::default()
                }
            }
        } else {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE_NAME, project_dir.display());
            Self::default()
        };

        if config.project.name.trim().is_empty() {
            config.project.name = workspace_name(project_dir);
        }
        config
    }

    /// Directory the scope databases live in
    pub fn storage_root(&self, project_dir: &Path) -> PathBuf {
        if let Some(root) = self.storage.root.as_ref().filter(|r| !r.as_os_str().is_empty()) {
            return if root.is_absolute() {
                root.clone()
            } else {
                project_dir.join(root)
            };
        }

        dirs::data_dir()
            .map(|dir| dir.join("codelore"))
            .unwrap_or_else(|| project_dir.join(".codelore"))
    }

    /// Check if a file path should be indexed based on include/exclude patterns
    pub fn should_index_file(&self, file_path: &str) -> bool {
        // Check exclude patterns first
        if self.indexing.exclude.iter().any(|p| matches_pattern(file_path, p)) {
            return false;
        }

        // If include patterns are specified, file must match at least one
        self.indexing.include.is_empty()
            || self.indexing.include.iter().any(|p| matches_pattern(file_path, p))
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.pool_size == 0 {
            return Err(anyhow::anyhow!("Pool size must be greater than 0"));
        }

        if self.indexing.batch_size == 0 {
            return Err(anyhow::anyhow!("Batch size must be greater than 0"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty", "full"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

/// Base name of the workspace directory
pub fn workspace_name(project_dir: &Path) -> String {
    let resolved = project_dir.canonicalize().unwrap_or_else(|_| project_dir.to_path_buf());
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}

/// Glob-ish matching: `dir/`, `*.ext`, `**/name/**`, else substring
fn matches_pattern(file_path: &str, pattern: &str) -> bool {
    if pattern.ends_with('/') {
        let dir = pattern.trim_end_matches('/');
        file_path.starts_with(pattern) || file_path.contains(&format!("/{}/", dir))
    } else if let Some(suffix) = pattern.strip_prefix('*').filter(|s| !s.starts_with('*')) {
        file_path.ends_with(suffix)
    } else if let Some(inner) = pattern.strip_prefix("**/") {
        let inner = inner.trim_end_matches("/**");
        file_path.starts_with(&format!("{}/", inner)) || file_path.contains(&format!("/{}/", inner))
    } else {
        file_path.contains(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.enrichment.enabled);
        assert_eq!(config.indexing.batch_size, 50);
        assert!(config.indexing.exclude.contains(&"node_modules/".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_should_index_file() {
        let config = Config::default();

        assert!(config.should_index_file("src/main.rs"));
        assert!(config.should_index_file("web/app.ts"));

        assert!(!config.should_index_file("target/debug/build.rs"));
        assert!(!config.should_index_file("web/node_modules/react/index.js"));
        assert!(!config.should_index_file("types/global.d.ts"));
        assert!(!config.should_index_file("pkg/__pycache__/mod.py"));
    }

    #[test]
    fn test_include_patterns() {
        let mut config = Config::default();
        config.indexing.include = vec!["src/".to_string()];

        assert!(config.should_index_file("src/lib.rs"));
        assert!(!config.should_index_file("scripts/gen.py"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[indexing]\nbatch_size = 10\n\n[enrichment]\nenabled = false\n",
        )
        .unwrap();

        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.indexing.batch_size, 10);
        assert_eq!(config.indexing.max_errors, 20);
        assert!(!config.enrichment.enabled);
        assert_eq!(config.storage.pool_size, 4);
        assert!(!config.project.name.is_empty());
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[logging]\nformat = \"xml\"\n").unwrap();

        let config = Config::from_project_dir(dir.path());
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_relative_storage_root() {
        let mut config = Config::default();
        config.storage.root = Some(PathBuf::from("state"));
        assert_eq!(config.storage_root(Path::new("/ws")), PathBuf::from("/ws/state"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.indexing.batch_size = 0;
        assert!(config.validate().is_err());
        config.indexing.batch_size = 50;

        config.storage.pool_size = 0;
        assert!(config.validate().is_err());
        config.storage.pool_size = 4;

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
