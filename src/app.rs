// Application root: owns the scope registry and wires the components to it

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::enrich::ContextEnricher;
use crate::index::CodeIndex;
use crate::indexer::ExtractorRegistry;
use crate::knowledge::{KnowledgeStore, RuleStore};
use crate::storage::{ScopeRegistry, StorageLocation};

pub struct Codelore {
    workspace: PathBuf,
    config: Config,
    registry: Arc<ScopeRegistry>,
    index: CodeIndex,
    knowledge: KnowledgeStore,
    rules: RuleStore,
}

impl Codelore {
    /// Open the stores for a workspace using its configuration
    pub fn open(workspace: impl AsRef<Path>) -> anyhow::Result<Self> {
        let workspace = workspace.as_ref();
        let workspace = workspace
            .canonicalize()
            .with_context(|| format!("Workspace not found: {}", workspace.display()))?;
        let config = Config::from_project_dir(&workspace);
        let root = config.storage_root(&workspace);

        info!("Storage root for {}: {}", config.project.name, root.display());
        Ok(Self::with_location(workspace, config, StorageLocation::Directory(root)))
    }

    /// Ephemeral stores that vanish on drop
    pub fn in_memory(workspace: impl Into<PathBuf>, config: Config) -> Self {
        Self::with_location(workspace.into(), config, StorageLocation::Memory)
    }

    pub fn with_location(workspace: PathBuf, config: Config, location: StorageLocation) -> Self {
        let registry = Arc::new(
            ScopeRegistry::with_location(location, config.project.name.clone())
                .with_pool_size(config.storage.pool_size)
                .with_cache_size_kib(config.storage.cache_size_kib),
        );

        let index = CodeIndex::new(Arc::clone(&registry), Arc::new(ExtractorRegistry::with_defaults()))
            .with_batch_size(config.indexing.batch_size)
            .with_max_errors(config.indexing.max_errors);

        let mut knowledge = KnowledgeStore::new(Arc::clone(&registry));
        if config.enrichment.enabled {
            knowledge = knowledge.with_enricher(ContextEnricher::new(index.clone()).with_limits(
                config.enrichment.max_related_files,
                config.enrichment.max_related_symbols,
            ));
        }

        let rules = RuleStore::new(Arc::clone(&registry));

        Self {
            workspace,
            config,
            registry,
            index,
            knowledge,
            rules,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ScopeRegistry> {
        &self.registry
    }

    pub fn index(&self) -> &CodeIndex {
        &self.index
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Checkpoint and release every open scope
    pub fn close(&self) {
        self.registry.close();
    }
}
