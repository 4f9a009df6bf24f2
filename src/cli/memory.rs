use anyhow::Result;

use codelore::knowledge::NewKnowledge;
use codelore::storage::{Scope, ScopeSelector};
use codelore::Codelore;

/// Store a knowledge entry from the command line
pub async fn remember(
    content: String,
    tags: Vec<String>,
    scope: String,
    active_file: Option<String>,
    project: String,
) -> Result<()> {
    let app = Codelore::open(&project)?;
    let scope: Scope = scope.parse()?;

    let mut input = NewKnowledge::new(content).with_tags(tags);
    input.source = Some("cli".to_string());
    input.active_file = active_file;

    let stored = app.knowledge().store(scope, input)?;

    println!("Stored {} in {} scope", stored.id, stored.scope);
    if stored.enrichment.enriched {
        println!(
            "  Linked {} files and {} symbols",
            stored.enrichment.related_files, stored.enrichment.related_symbols
        );
    }

    app.close();
    Ok(())
}

/// Print entries matching a query, most relevant first
pub async fn recall(query: String, tags: Vec<String>, scope: String, limit: usize, project: String) -> Result<()> {
    let app = Codelore::open(&project)?;
    let selector: ScopeSelector = scope.parse()?;

    let entries = app.knowledge().retrieve(selector, &query, &tags, limit)?;

    if entries.is_empty() {
        println!("Nothing stored matches '{}'", query);
    }
    for entry in entries {
        let when = chrono::DateTime::from_timestamp(entry.updated_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("[{}] {} ({})", entry.scope, entry.id, when);
        println!("  {}", entry.content.replace('\n', "\n  "));
        if !entry.tags.is_empty() {
            println!("  tags: {}", entry.tags.iter().cloned().collect::<Vec<_>>().join(", "));
        }
        if !entry.related_files.is_empty() {
            println!("  files: {}", entry.related_files.join(", "));
        }
        if !entry.related_symbols.is_empty() {
            let symbols: Vec<String> = entry.related_symbols.iter().map(|s| s.name.clone()).collect();
            println!("  symbols: {}", symbols.join(", "));
        }
    }

    app.close();
    Ok(())
}
