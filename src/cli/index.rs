use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use codelore::config::Config;
use codelore::index::WorkspaceFile;
use codelore::indexer::ExtractorRegistry;
use codelore::Codelore;

pub async fn index_project(project: String, rebuild: bool) -> Result<()> {
    let app = Codelore::open(&project)?;
    let root = app.workspace().to_path_buf();

    println!("Codelore Indexer v{}", env!("CARGO_PKG_VERSION"));
    println!("Project: {} ({})", app.config().project.name, root.display());
    println!("Rebuild: {}", rebuild);

    println!("\nScanning project files...");
    let files = scan_workspace(&root, app.config(), app.index().extractors());
    println!("Found {} indexable files", files.len());

    // Files that vanished since the last run are soft-deleted, then
    // removed by the cleanup at the end of the workspace pass
    let present: HashSet<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
    let mut missing = 0;
    for path in app.index().indexed_paths()? {
        if !present.contains(path.as_str()) && app.index().mark_file_deleted(&path)? {
            missing += 1;
        }
    }
    if missing > 0 {
        info!("{} indexed files no longer exist", missing);
    }

    let batches = files.len().div_ceil(app.config().indexing.batch_size.max(1));
    let bar = ProgressBar::new(batches as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] batch {pos}/{len} {msg}")?.progress_chars("=> "),
    );

    let report = app.index().index_workspace_with_progress(&files, !rebuild, |progress| {
        bar.set_position(progress.batch as u64);
        bar.set_message(format!("{}/{} files", progress.processed, progress.total));
    })?;
    bar.finish_and_clear();

    println!("\nIndexing complete!");
    println!("  Indexed: {}", report.indexed);
    println!("  Unchanged: {}", report.skipped);
    println!("  Failed: {}", report.failed);
    println!("  Removed: {}", report.removed);
    println!("  Symbols: {}", report.total_symbols);
    println!("  Imports: {}", report.total_imports);

    if !report.errors.is_empty() {
        println!("\nErrors:");
        for error in &report.errors {
            println!("  - {}", error);
        }
        if report.failed > report.errors.len() {
            println!("  ... and {} more", report.failed - report.errors.len());
        }
    }

    app.close();
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Indexable files under `root`, with workspace-relative forward-slash paths
pub fn scan_workspace(root: &Path, config: &Config, extractors: &ExtractorRegistry) -> Vec<WorkspaceFile> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy().replace('\\', "/");

        if !config.should_index_file(&relative) {
            debug!("Excluded by config: {}", relative);
            continue;
        }
        if !extractors.is_supported(&relative) {
            continue;
        }
        files.push(WorkspaceFile::new(entry.path(), relative));
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_scan_workspace_filters() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        for path in [
            "src/main.rs",
            "src/util.py",
            "web/app.ts",
            "README.md",
            "node_modules/lib/index.js",
            ".git/hooks/pre-commit.py",
            "target/debug/build.rs",
        ] {
            let full = root.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, "").unwrap();
        }

        let files = scan_workspace(root, &Config::default(), &ExtractorRegistry::with_defaults());
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.rs", "src/util.py", "web/app.ts"]);
        assert!(files[0].absolute_path.ends_with("src/main.rs"));
        assert!(files[0].content.is_none());
    }
}
