// Code index: files, symbols and imports per workspace

pub mod db;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

pub use db::CodeIndex;

/// Symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Interface,
    Function,
    Method,
    Variable,
    Constant,
    Struct,
    Enum,
    Trait,
    Type,
    Module,
    Field,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::Trait => "trait",
            SymbolKind::Type => "type",
            SymbolKind::Module => "module",
            SymbolKind::Field => "field",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" => Ok(SymbolKind::Class),
            "interface" => Ok(SymbolKind::Interface),
            "function" => Ok(SymbolKind::Function),
            "method" => Ok(SymbolKind::Method),
            "variable" => Ok(SymbolKind::Variable),
            "constant" => Ok(SymbolKind::Constant),
            "struct" => Ok(SymbolKind::Struct),
            "enum" => Ok(SymbolKind::Enum),
            "trait" => Ok(SymbolKind::Trait),
            "type" => Ok(SymbolKind::Type),
            "module" => Ok(SymbolKind::Module),
            "field" => Ok(SymbolKind::Field),
            other => Err(Error::validation(format!("unknown symbol kind: {}", other))),
        }
    }
}

/// Symbol produced by an extractor. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub container: Option<String>,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub exported: bool,
    pub signature: Option<String>,
    pub doc: Option<String>,
}

impl ExtractedSymbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, line: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            container: None,
            start_line: line,
            start_column: 1,
            end_line: line,
            end_column: 1,
            exported: false,
            signature: None,
            doc: None,
        }
    }
}

/// Import produced by an extractor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedImport {
    pub path: String,
    /// Mechanism: "import", "require", "dynamic", "export", "use"
    pub kind: String,
    pub is_local: bool,
    pub line: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub symbols: Vec<ExtractedSymbol>,
    pub imports: Vec<ExtractedImport>,
}

/// Lexical symbol extraction for one family of languages
pub trait SymbolExtractor: Send + Sync {
    fn supports(&self, language: &str) -> bool;
    fn extract(&self, content: &str) -> anyhow::Result<Extraction>;
}

/// Indexed source file
#[derive(Debug, Clone, Serialize)]
pub struct SourceFile {
    pub id: i64,
    pub relative_path: String,
    pub absolute_path: String,
    pub language: String,
    pub content_hash: String,
    pub line_count: u32,
    pub byte_size: u64,
    pub modified_at: i64,
    pub indexed_at: i64,
    pub deleted: bool,
}

/// Symbol stored in the index
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub id: i64,
    pub file: String,
    pub language: String,
    pub name: String,
    pub kind: SymbolKind,
    pub container: Option<String>,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub exported: bool,
    pub signature: Option<String>,
    pub doc: Option<String>,
}

/// Import stored in the index; `resolved` is computed at lookup
#[derive(Debug, Clone, Serialize)]
pub struct Import {
    pub id: i64,
    pub path: String,
    pub kind: String,
    pub is_local: bool,
    pub line: u32,
    pub resolved: Option<String>,
}

/// A file handed to the indexer. `content` skips the disk read when present.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceFile {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl WorkspaceFile {
    pub fn new(absolute_path: impl Into<PathBuf>, relative_path: impl Into<String>) -> Self {
        Self {
            absolute_path: absolute_path.into(),
            relative_path: relative_path.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Result of indexing one file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IndexOutcome {
    Indexed { symbols: usize, imports: usize },
    Skipped,
    Failed { error: String },
}

/// Aggregate result of a workspace pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
    pub total_symbols: usize,
    pub total_imports: usize,
    pub errors: Vec<String>,
}

/// Reported after every batch of a workspace pass
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    pub batch: usize,
    pub batches: usize,
    pub processed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSymbols {
    pub file: SourceFile,
    pub symbols: Vec<Symbol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imports: Option<Vec<Import>>,
}

/// What `find_references` looks for: exactly one of the two
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceQuery {
    Symbol(String),
    Module(String),
}

impl ReferenceQuery {
    pub fn from_options(symbol_name: Option<&str>, module_path: Option<&str>) -> crate::Result<Self> {
        let symbol_name = symbol_name.map(str::trim).filter(|s| !s.is_empty());
        let module_path = module_path.map(str::trim).filter(|s| !s.is_empty());

        match (symbol_name, module_path) {
            (Some(name), None) => Ok(ReferenceQuery::Symbol(name.to_string())),
            (None, Some(path)) => Ok(ReferenceQuery::Module(path.to_string())),
            (Some(_), Some(_)) => Err(Error::validation(
                "provide either symbolName or modulePath, not both",
            )),
            (None, None) => Err(Error::validation("symbolName or modulePath is required")),
        }
    }
}

/// File importing a module
#[derive(Debug, Clone, Serialize)]
pub struct Importer {
    pub file: String,
    pub import_path: String,
    pub kind: String,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "results", rename_all = "lowercase")]
pub enum References {
    Definitions(Vec<Symbol>),
    Importers(Vec<Importer>),
}

impl References {
    pub fn len(&self) -> usize {
        match self {
            References::Definitions(symbols) => symbols.len(),
            References::Importers(importers) => importers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageStats {
    pub language: String,
    pub files: u64,
    pub lines: u64,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub files: u64,
    pub symbols: u64,
    pub imports: u64,
    pub deleted_files: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<LanguageStats>>,
}
