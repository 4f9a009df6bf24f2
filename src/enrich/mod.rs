// Links free text to indexed code: lexical entity extraction plus index lookups

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::error::Result;
use crate::index::{CodeIndex, ReferenceQuery, References};
use crate::knowledge::SymbolRef;

pub const DEFAULT_MAX_RELATED_FILES: usize = 10;
pub const DEFAULT_MAX_RELATED_SYMBOLS: usize = 10;

/// Candidates fetched per name before keeping exact matches
const LOOKUP_LIMIT: usize = 10;

static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[\w+-]*\n?(.*?)```").unwrap());

static FILE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|[\s`'(\[])((?:\.{1,2}/)?(?:[\w.-]+/)*[\w-][\w.-]*\.(?:tsx?|jsx?|mjs|cjs|mts|cts|py|pyi|rs|go|java|json|toml|ya?ml|md))\b",
    )
    .unwrap()
});

static IMPORT_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bimport\s[^'"\n]*?\bfrom\s+['"]([^'"]+)['"]"#).unwrap());

static REQUIRE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());

static PYTHON_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))").unwrap());

static RUST_USE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\buse\s+((?:crate|super|self|\w+)(?:::\w+)+)").unwrap());

static CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_$][\w$]*)\s*\(").unwrap());

static BACKTICKED: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([A-Za-z_$][\w$]*)(?:\(\))?`").unwrap());

static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([a-z][a-z0-9]*[A-Z][A-Za-z0-9]*)\b").unwrap());

static SNAKE_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([a-z][a-z0-9]*(?:_[a-z0-9]+)+)\b").unwrap());

static PASCAL_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z][a-z0-9]+(?:[A-Z][a-z0-9]*)+)\b").unwrap());

static DECLARED_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:class|struct|interface|trait|enum|extends|implements)\s+([A-Z]\w*)").unwrap());

/// Keywords and ubiquitous identifiers that never name project code
static STOPLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "if", "else", "for", "while", "do", "switch", "case", "return", "break", "continue", "new",
        "delete", "typeof", "instanceof", "void", "function", "class", "const", "let", "var", "this",
        "super", "self", "import", "export", "from", "require", "async", "await", "yield", "try",
        "catch", "finally", "throw", "def", "lambda", "pass", "print", "and", "or", "not", "in",
        "is", "with", "as", "fn", "impl", "match", "mut", "pub", "use", "mod", "func", "go", "defer",
        "struct", "enum", "trait", "interface", "type", "public", "private", "protected", "static",
        "true", "false", "null", "undefined", "None", "True", "False", "nil", "console", "log",
        "len", "str", "int", "map", "filter", "reduce", "push", "get", "set", "then", "main",
        "setTimeout", "setInterval", "parseInt", "toString", "forEach", "Ok", "Err", "Some",
        "assert", "unwrap", "expect", "clone", "println", "format", "vec", "JSON", "Promise",
        "Object", "Array", "String", "Error", "Math", "Date",
    ]
    .into_iter()
    .collect()
});

/// Entity mentions found in a piece of text
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Entities {
    pub file_paths: BTreeSet<String>,
    pub import_mentions: BTreeSet<String>,
    pub function_call_names: BTreeSet<String>,
    pub class_names: BTreeSet<String>,
    pub code_blocks: Vec<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.file_paths.is_empty()
            && self.import_mentions.is_empty()
            && self.function_call_names.is_empty()
            && self.class_names.is_empty()
    }
}

/// Code links discovered for a piece of text
#[derive(Debug, Clone, Default, Serialize)]
pub struct Enrichment {
    pub related_files: Vec<String>,
    pub related_symbols: Vec<SymbolRef>,
}

fn is_noise(name: &str) -> bool {
    name.len() < 3 || STOPLIST.contains(name)
}

/// Pull file paths, import targets and identifier names out of free text
pub fn extract_entities(text: &str) -> Entities {
    let mut entities = Entities {
        code_blocks: CODE_BLOCK
            .captures_iter(text)
            .map(|c| c[1].trim().to_string())
            .filter(|block| !block.is_empty())
            .collect(),
        ..Entities::default()
    };

    for cap in FILE_PATH.captures_iter(text) {
        entities.file_paths.insert(cap[1].trim_start_matches("./").to_string());
    }

    for re in [&*IMPORT_FROM, &*REQUIRE] {
        for cap in re.captures_iter(text) {
            entities.import_mentions.insert(cap[1].to_string());
        }
    }
    for cap in PYTHON_IMPORT.captures_iter(text) {
        if let Some(module) = cap.get(1).or_else(|| cap.get(2)) {
            entities.import_mentions.insert(module.as_str().to_string());
        }
    }
    for cap in RUST_USE.captures_iter(text) {
        entities.import_mentions.insert(cap[1].to_string());
    }

    // File names must not be read as identifiers
    let without_paths = FILE_PATH.replace_all(text, " ");

    for re in [&*CALL, &*BACKTICKED, &*CAMEL_CASE, &*SNAKE_CASE] {
        for cap in re.captures_iter(&without_paths) {
            let name = &cap[1];
            if !is_noise(name) && !name.starts_with(|c: char| c.is_ascii_uppercase()) {
                entities.function_call_names.insert(name.to_string());
            }
        }
    }

    for re in [&*PASCAL_CASE, &*DECLARED_TYPE] {
        for cap in re.captures_iter(&without_paths) {
            let name = &cap[1];
            if !is_noise(name) {
                entities.class_names.insert(name.to_string());
            }
        }
    }
    for cap in BACKTICKED.captures_iter(&without_paths) {
        let name = &cap[1];
        if !is_noise(name) && name.starts_with(|c: char| c.is_ascii_uppercase()) {
            entities.class_names.insert(name.to_string());
        }
    }

    entities
}

/// Cross-references text mentions against the code index
#[derive(Clone)]
pub struct ContextEnricher {
    index: CodeIndex,
    max_related_files: usize,
    max_related_symbols: usize,
}

impl ContextEnricher {
    pub fn new(index: CodeIndex) -> Self {
        Self {
            index,
            max_related_files: DEFAULT_MAX_RELATED_FILES,
            max_related_symbols: DEFAULT_MAX_RELATED_SYMBOLS,
        }
    }

    pub fn with_limits(mut self, max_related_files: usize, max_related_symbols: usize) -> Self {
        self.max_related_files = max_related_files;
        self.max_related_symbols = max_related_symbols;
        self
    }

    /// Related files and symbols for `text`. Individual lookups that fail are
    /// logged and skipped.
    pub fn enrich(&self, text: &str, active_file: Option<&str>) -> Result<Enrichment> {
        let entities = extract_entities(text);
        let mut files = LinkSet::new(self.max_related_files);
        let mut symbols: Vec<SymbolRef> = Vec::new();

        if let Some(active) = active_file.map(str::trim).filter(|a| !a.is_empty()) {
            files.push(active.to_string());
        }

        for mention in &entities.file_paths {
            match self.index.resolve_path(mention) {
                Ok(paths) => paths.into_iter().for_each(|p| files.push(p)),
                Err(e) => warn!("Could not resolve path '{}': {}", mention, e),
            }
        }

        for module in &entities.import_mentions {
            let query = ReferenceQuery::Module(module.clone());
            match self.index.find_references(&query, self.max_related_files.max(1)) {
                Ok(References::Importers(importers)) => {
                    importers.into_iter().for_each(|i| files.push(i.file))
                }
                Ok(References::Definitions(_)) => {}
                Err(e) => warn!("Import lookup for '{}' failed: {}", module, e),
            }
        }

        let names = entities
            .function_call_names
            .iter()
            .chain(entities.class_names.iter());
        for name in names {
            if symbols.len() >= self.max_related_symbols {
                break;
            }
            let found = match self.index.search_symbols(name, &[], false, LOOKUP_LIMIT) {
                Ok(found) => found,
                Err(e) => {
                    warn!("Symbol lookup for '{}' failed: {}", name, e);
                    continue;
                }
            };

            for symbol in found.into_iter().filter(|s| s.name == *name) {
                let duplicate = symbols
                    .iter()
                    .any(|s| s.name == symbol.name && s.file.as_deref() == Some(symbol.file.as_str()));
                if duplicate || symbols.len() >= self.max_related_symbols {
                    continue;
                }
                files.push(symbol.file.clone());
                symbols.push(SymbolRef {
                    name: symbol.name,
                    kind: Some(symbol.kind.to_string()),
                    file: Some(symbol.file),
                });
            }
        }

        debug!(
            "Enriched text with {} files and {} symbols",
            files.paths.len(),
            symbols.len()
        );

        Ok(Enrichment {
            related_files: files.paths,
            related_symbols: symbols,
        })
    }
}

/// Insertion-ordered, deduplicated and capped list of paths
struct LinkSet {
    paths: Vec<String>,
    cap: usize,
}

impl LinkSet {
    fn new(cap: usize) -> Self {
        Self { paths: Vec::new(), cap }
    }

    fn push(&mut self, path: String) {
        if self.paths.len() < self.cap && !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::WorkspaceFile;
    use crate::indexer::ExtractorRegistry;
    use crate::knowledge::{KnowledgeStore, NewKnowledge};
    use crate::storage::{Scope, ScopeRegistry};
    use std::sync::Arc;

    fn setup() -> (Arc<ScopeRegistry>, CodeIndex) {
        let registry = Arc::new(ScopeRegistry::in_memory("enrich"));
        let index = CodeIndex::new(Arc::clone(&registry), Arc::new(ExtractorRegistry::with_defaults()));

        let files = [
            (
                "api/users.ts",
                "export async function fetchUser(id: string) {\n  return http.get(`/users/${id}`);\n}\n",
            ),
            (
                "web/profile.ts",
                "import { fetchUser } from '../api/users';\nexport class ProfileView {}\n",
            ),
            ("legacy/users.py", "def fetch_user(uid):\n    return None\n"),
        ];
        for (path, content) in files {
            index
                .index_file(&WorkspaceFile::new(format!("/ws/{}", path), path).with_content(content), false)
                .unwrap();
        }
        (registry, index)
    }

    #[test]
    fn test_extract_entities() {
        let text = "The `UserStore` in src/store/user.ts calls fetchUser() and load_profile.\n\
                    ```ts\nimport { api } from './client';\nconst x = require('lodash');\n```\n\
                    See ./docs/guide.md and if (ready) return.";
        let entities = extract_entities(text);

        assert!(entities.file_paths.contains("src/store/user.ts"));
        assert!(entities.file_paths.contains("docs/guide.md"));
        assert!(entities.import_mentions.contains("./client"));
        assert!(entities.import_mentions.contains("lodash"));
        assert!(entities.function_call_names.contains("fetchUser"));
        assert!(entities.function_call_names.contains("load_profile"));
        assert!(entities.class_names.contains("UserStore"));
        assert_eq!(entities.code_blocks.len(), 1);
        assert!(!entities.function_call_names.contains("if"));
        assert!(!entities.function_call_names.contains("require"));
        assert!(!entities.function_call_names.contains("user"));
    }

    #[test]
    fn test_extract_entities_from_plain_prose() {
        let entities = extract_entities("nothing to see here, move along");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_enrich_links_symbol_and_file() {
        let (_registry, index) = setup();
        let enricher = ContextEnricher::new(index);

        let found = enricher.enrich("use fetchUser from api/users.ts", None).unwrap();
        assert!(found.related_symbols.contains(&SymbolRef {
            name: "fetchUser".into(),
            kind: Some("function".into()),
            file: Some("api/users.ts".into()),
        }));
        assert_eq!(found.related_files[0], "api/users.ts");
    }

    #[test]
    fn test_enrich_active_file_first_and_caps() {
        let (_registry, index) = setup();
        let enricher = ContextEnricher::new(index).with_limits(2, 1);

        let found = enricher
            .enrich(
                "fetchUser and fetch_user both load users; ProfileView imports from '../api/users'",
                Some("web/app.ts"),
            )
            .unwrap();
        assert_eq!(found.related_files[0], "web/app.ts");
        assert_eq!(found.related_files.len(), 2);
        assert_eq!(found.related_symbols.len(), 1);
    }

    #[test]
    fn test_enrich_import_mentions_find_importers() {
        let (_registry, index) = setup();
        let enricher = ContextEnricher::new(index);

        let found = enricher
            .enrich("who does import { fetchUser } from '../api/users' today?", None)
            .unwrap();
        assert!(found.related_files.contains(&"web/profile.ts".to_string()));
    }

    #[test]
    fn test_store_uses_enricher() {
        let (registry, index) = setup();
        let store = KnowledgeStore::new(Arc::clone(&registry)).with_enricher(ContextEnricher::new(index));

        let stored = store
            .store(Scope::Project, NewKnowledge::new("use fetchUser from api/users.ts"))
            .unwrap();
        assert!(stored.enrichment.enriched);

        let entry = store.get(Scope::Project, &stored.id).unwrap();
        assert!(entry
            .related_symbols
            .iter()
            .any(|s| s.name == "fetchUser" && s.file.as_deref() == Some("api/users.ts")));
        assert!(entry.related_files.contains(&"api/users.ts".to_string()));
    }

    #[test]
    fn test_enrich_survives_missing_index_tables() {
        let (registry, index) = setup();
        registry
            .open(Scope::Project)
            .unwrap()
            .conn()
            .unwrap()
            .execute_batch("DROP TABLE imports;")
            .unwrap();

        let enricher = ContextEnricher::new(index);
        let found = enricher
            .enrich("import x from './gone' and fetchUser", None)
            .unwrap();
        assert!(found.related_symbols.iter().any(|s| s.name == "fetchUser"));
    }
}
