use anyhow::Result;

use codelore::storage::registry::ScopeStats;
use codelore::storage::Scope;
use codelore::Codelore;

pub async fn show_stats(project: String, verbose: bool) -> Result<()> {
    let app = Codelore::open(&project)?;

    println!("Codelore Statistics v{}", env!("CARGO_PKG_VERSION"));
    println!("Project: {} ({})", app.config().project.name, app.workspace().display());

    let stats = app.index().get_index_stats(verbose)?;

    println!("\n📊 Index Statistics:");
    println!("  Files: {}", stats.files);
    println!("  Symbols: {}", stats.symbols);
    println!("  Imports: {}", stats.imports);
    if stats.deleted_files > 0 {
        println!("  Pending removal: {}", stats.deleted_files);
    }

    if let Some(languages) = &stats.languages {
        if !languages.is_empty() {
            println!("\n  Languages:");
            for language in languages {
                println!("    {}: {} files, {} lines", language.language, language.files, language.lines);
            }
        }
    }

    println!("\n📚 Scopes:");
    for scope in Scope::ALL {
        let db = app.registry().open(scope)?;
        let scope_stats = ScopeStats::collect(&db)?;
        println!(
            "  {:<8} {} entries, {} rules, {:.2} MB{}",
            scope.as_str(),
            scope_stats.entries,
            scope_stats.rules,
            scope_stats.size_bytes as f64 / (1024.0 * 1024.0),
            if scope_stats.full_text { "" } else { " (substring search only)" }
        );

        if verbose {
            if let Some(path) = db.path() {
                println!("           {}", path.display());
            }
            println!("           schema v{}", scope_stats.schema_version);
            if let Some(error) = &db.migration().error {
                println!("           migration error: {}", error);
            }
        }
    }

    app.close();
    Ok(())
}
