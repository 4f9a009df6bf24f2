// Language detection and symbol extractors

pub mod parser;
pub mod script;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::index::SymbolExtractor;

/// Maps file extensions to language ids and language ids to extractors
pub struct ExtractorRegistry {
    languages: HashMap<String, String>,
    extractors: Vec<Box<dyn SymbolExtractor>>,
}

impl ExtractorRegistry {
    /// Empty registry, nothing is indexable until languages are registered
    pub fn new() -> Self {
        Self {
            languages: HashMap::new(),
            extractors: Vec::new(),
        }
    }

    /// Registry with every built-in extractor
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_language("python", &["py", "pyi"]);
        registry.register_language("rust", &["rs"]);
        registry.register_language("go", &["go"]);
        registry.register_language("java", &["java"]);
        registry.register_language("typescript", &["ts", "tsx", "mts", "cts"]);
        registry.register_language("javascript", &["js", "jsx", "mjs", "cjs"]);

        registry.register(Box::new(parser::PythonExtractor::new()));
        registry.register(Box::new(parser::RustExtractor::new()));
        registry.register(Box::new(parser::GoExtractor::new()));
        registry.register(Box::new(parser::JavaExtractor::new()));
        registry.register(Box::new(script::ScriptExtractor::new()));

        registry
    }

    pub fn register_language(&mut self, language: &str, extensions: &[&str]) {
        for ext in extensions {
            self.languages
                .insert(ext.trim_start_matches('.').to_ascii_lowercase(), language.to_string());
        }
    }

    /// Later registrations take precedence for the languages they support
    pub fn register(&mut self, extractor: Box<dyn SymbolExtractor>) {
        self.extractors.insert(0, extractor);
    }

    pub fn language_for_path(&self, path: &str) -> Option<&str> {
        let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
        self.languages.get(&ext).map(String::as_str)
    }

    pub fn extractor_for(&self, language: &str) -> Option<&dyn SymbolExtractor> {
        self.extractors
            .iter()
            .find(|e| e.supports(language))
            .map(|e| e.as_ref())
    }

    pub fn is_supported(&self, path: &str) -> bool {
        self.language_for_path(path)
            .map(|language| self.extractor_for(language).is_some())
            .unwrap_or(false)
    }

    /// Language ids with their extensions, sorted
    pub fn languages(&self) -> BTreeMap<String, Vec<String>> {
        let mut languages: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (ext, language) in &self.languages {
            languages.entry(language.clone()).or_default().push(ext.clone());
        }
        for extensions in languages.values_mut() {
            extensions.sort();
        }
        languages
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
