use anyhow::Result;

use codelore::index::SymbolKind;
use codelore::Codelore;

pub async fn search_symbols(
    query: String,
    project: String,
    kind: Option<String>,
    exported: bool,
    limit: usize,
) -> Result<()> {
    let app = Codelore::open(&project)?;

    let kinds = match kind {
        Some(kinds) => kinds
            .split(',')
            .map(|k| k.parse::<SymbolKind>())
            .collect::<codelore::Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let symbols = app.index().search_symbols(&query, &kinds, exported, limit)?;

    if symbols.is_empty() {
        println!("No symbols found matching '{}'", query);
    } else {
        println!("Found {} symbols matching '{}':", symbols.len(), query);
        for symbol in symbols {
            let name = match &symbol.container {
                Some(container) => format!("{}.{}", container, symbol.name),
                None => symbol.name.clone(),
            };
            println!(
                "  {}:{} - {} ({}{})",
                symbol.file,
                symbol.start_line,
                name,
                symbol.kind,
                if symbol.exported { ", exported" } else { "" }
            );
        }
    }

    app.close();
    Ok(())
}
