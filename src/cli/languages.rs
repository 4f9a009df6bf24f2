use codelore::indexer::ExtractorRegistry;

pub fn list_languages() {
    let registry = ExtractorRegistry::with_defaults();

    println!("Supported languages:");
    for (language, extensions) in registry.languages() {
        let extensions: Vec<String> = extensions.iter().map(|e| format!(".{}", e)).collect();
        println!("  {:<12} {}", language, extensions.join(" "));
    }
}
