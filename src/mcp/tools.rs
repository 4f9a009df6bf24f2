// MCP tool handlers

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::index::db::MAX_REFERENCE_LIMIT;
use crate::index::{ReferenceQuery, SymbolKind, WorkspaceFile};
use crate::knowledge::{NewKnowledge, NewRule, RulePatch, SymbolRef};
use crate::storage::{Scope, ScopeSelector};
use crate::Codelore;

/// MCP tool definition
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Dispatch a tool call by name
pub async fn call(app: &Codelore, name: &str, args: Value) -> Result<Value> {
    match name {
        "store_knowledge" => store_knowledge(app, args).await,
        "retrieve_knowledge" => retrieve_knowledge(app, args).await,
        "list_knowledge" => list_knowledge(app, args).await,
        "store_rule" => store_rule(app, args).await,
        "update_rule" => update_rule(app, args).await,
        "delete_rule" => delete_rule(app, args).await,
        "list_rules" => list_rules(app, args).await,
        "retrieve_rules" => retrieve_rules(app, args).await,
        "index_file" => index_file(app, args).await,
        "index_workspace" => index_workspace(app, args).await,
        "search_symbols" => search_symbols(app, args).await,
        "get_file_symbols" => get_file_symbols(app, args).await,
        "find_references" => find_references(app, args).await,
        "get_index_stats" => get_index_stats(app, args).await,
        _ => Err(anyhow::anyhow!("Unknown tool: {}", name)),
    }
}

fn parse<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).with_context(|| format!("Invalid arguments for {}", tool))
}

fn write_scope(scope: Option<&str>) -> Result<Scope> {
    Ok(scope.map(str::parse::<Scope>).transpose()?.unwrap_or(Scope::Project))
}

fn read_scope(scope: Option<&str>) -> Result<ScopeSelector> {
    Ok(scope.map(str::parse::<ScopeSelector>).transpose()?.unwrap_or(ScopeSelector::All))
}

#[derive(Deserialize)]
struct StoreKnowledgeArgs {
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    context: Option<String>,
    scope: Option<String>,
    source: Option<String>,
    metadata: Option<Value>,
    related_files: Option<Vec<String>>,
    related_symbols: Option<Vec<SymbolRef>>,
    active_file: Option<String>,
}

/// Store knowledge tool handler
pub async fn store_knowledge(app: &Codelore, args: Value) -> Result<Value> {
    let args: StoreKnowledgeArgs = parse("store_knowledge", args)?;
    let scope = write_scope(args.scope.as_deref())?;

    let stored = app.knowledge().store(
        scope,
        NewKnowledge {
            content: args.content,
            tags: args.tags,
            context: args.context,
            source: args.source,
            metadata: args.metadata,
            related_files: args.related_files,
            related_symbols: args.related_symbols,
            active_file: args.active_file,
        },
    )?;
    Ok(serde_json::to_value(stored)?)
}

#[derive(Deserialize)]
struct RetrieveKnowledgeArgs {
    query: String,
    #[serde(default)]
    tags: Vec<String>,
    limit: Option<usize>,
    scope: Option<String>,
}

/// Retrieve knowledge tool handler
pub async fn retrieve_knowledge(app: &Codelore, args: Value) -> Result<Value> {
    let args: RetrieveKnowledgeArgs = parse("retrieve_knowledge", args)?;
    let selector = read_scope(args.scope.as_deref())?;

    let entries = app
        .knowledge()
        .retrieve(selector, &args.query, &args.tags, args.limit.unwrap_or(10))?;
    Ok(json!({ "count": entries.len(), "entries": entries }))
}

#[derive(Deserialize)]
struct ListKnowledgeArgs {
    #[serde(default)]
    tags: Vec<String>,
    limit: Option<usize>,
    scope: Option<String>,
    #[serde(default)]
    optimize: bool,
}

/// List knowledge tool handler
pub async fn list_knowledge(app: &Codelore, args: Value) -> Result<Value> {
    let args: ListKnowledgeArgs = parse("list_knowledge", args)?;
    let selector = read_scope(args.scope.as_deref())?;

    let listing = app
        .knowledge()
        .list(selector, &args.tags, args.limit.unwrap_or(20), args.optimize)?;
    Ok(serde_json::to_value(listing)?)
}

#[derive(Deserialize)]
struct StoreRuleArgs {
    #[serde(flatten)]
    rule: NewRule,
    scope: Option<String>,
}

/// Store rule tool handler
pub async fn store_rule(app: &Codelore, args: Value) -> Result<Value> {
    let args: StoreRuleArgs = parse("store_rule", args)?;
    let scope = write_scope(args.scope.as_deref())?;

    let rule = app.rules().create(scope, args.rule)?;
    Ok(json!({ "id": rule.id, "rule": rule }))
}

#[derive(Deserialize)]
struct UpdateRuleArgs {
    id: String,
    #[serde(flatten)]
    patch: RulePatch,
    scope: Option<String>,
}

/// Update rule tool handler
pub async fn update_rule(app: &Codelore, args: Value) -> Result<Value> {
    let args: UpdateRuleArgs = parse("update_rule", args)?;
    let scope = write_scope(args.scope.as_deref())?;

    let rule = app.rules().update(scope, &args.id, args.patch)?;
    Ok(json!({ "id": rule.id, "rule": rule }))
}

#[derive(Deserialize)]
struct DeleteRuleArgs {
    id: String,
    scope: Option<String>,
}

/// Delete rule tool handler
pub async fn delete_rule(app: &Codelore, args: Value) -> Result<Value> {
    let args: DeleteRuleArgs = parse("delete_rule", args)?;
    let scope = write_scope(args.scope.as_deref())?;

    app.rules().delete(scope, &args.id)?;
    Ok(json!({ "id": args.id, "deleted": true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRulesArgs {
    scope: Option<String>,
    category: Option<String>,
    #[serde(default)]
    include_disabled: bool,
}

/// List rules tool handler
pub async fn list_rules(app: &Codelore, args: Value) -> Result<Value> {
    let args: ListRulesArgs = parse("list_rules", args)?;
    let selector = read_scope(args.scope.as_deref())?;

    let rules = app
        .rules()
        .list(selector, args.category.as_deref(), args.include_disabled)?;
    Ok(json!({ "count": rules.len(), "rules": rules }))
}

#[derive(Deserialize)]
struct RetrieveRulesArgs {
    query: Option<String>,
    category: Option<String>,
    limit: Option<usize>,
    scope: Option<String>,
}

/// Retrieve rules tool handler
pub async fn retrieve_rules(app: &Codelore, args: Value) -> Result<Value> {
    let args: RetrieveRulesArgs = parse("retrieve_rules", args)?;
    let selector = read_scope(args.scope.as_deref())?;

    let rules = app.rules().retrieve(
        selector,
        args.query.as_deref(),
        args.category.as_deref(),
        args.limit.unwrap_or(20),
    )?;
    Ok(json!({ "count": rules.len(), "rules": rules }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileArgs {
    file_path: PathBuf,
    relative_path: String,
    content: Option<String>,
}

impl From<FileArgs> for WorkspaceFile {
    fn from(args: FileArgs) -> Self {
        WorkspaceFile {
            absolute_path: args.file_path,
            relative_path: args.relative_path,
            content: args.content,
        }
    }
}

#[derive(Deserialize)]
struct IndexFileArgs {
    #[serde(flatten)]
    file: FileArgs,
    #[serde(default)]
    force: bool,
}

/// Index file tool handler
pub async fn index_file(app: &Codelore, args: Value) -> Result<Value> {
    let args: IndexFileArgs = parse("index_file", args)?;
    let file = WorkspaceFile::from(args.file);

    let outcome = app.index().index_file(&file, args.force)?;
    Ok(json!({ "file": file.relative_path, "result": outcome }))
}

#[derive(Deserialize)]
struct IndexWorkspaceArgs {
    files: Vec<FileArgs>,
    #[serde(default = "default_true")]
    incremental: bool,
}

fn default_true() -> bool {
    true
}

/// Index workspace tool handler
pub async fn index_workspace(app: &Codelore, args: Value) -> Result<Value> {
    let args: IndexWorkspaceArgs = parse("index_workspace", args)?;
    let files: Vec<WorkspaceFile> = args.files.into_iter().map(WorkspaceFile::from).collect();

    let report = app.index().index_workspace(&files, args.incremental)?;
    Ok(serde_json::to_value(report)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSymbolsArgs {
    query: String,
    #[serde(default)]
    kinds: Vec<String>,
    #[serde(default)]
    exported_only: bool,
    limit: Option<usize>,
}

/// Search symbols tool handler
pub async fn search_symbols(app: &Codelore, args: Value) -> Result<Value> {
    let args: SearchSymbolsArgs = parse("search_symbols", args)?;
    let kinds = args
        .kinds
        .iter()
        .map(|k| k.parse::<SymbolKind>())
        .collect::<crate::Result<Vec<_>>>()?;

    let symbols = app.index().search_symbols(
        &args.query,
        &kinds,
        args.exported_only,
        args.limit.unwrap_or(crate::index::db::DEFAULT_SYMBOL_LIMIT),
    )?;
    Ok(json!({ "count": symbols.len(), "symbols": symbols }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileSymbolsArgs {
    file_path: String,
    #[serde(default = "default_true")]
    include_imports: bool,
}

/// File symbols tool handler
pub async fn get_file_symbols(app: &Codelore, args: Value) -> Result<Value> {
    let args: FileSymbolsArgs = parse("get_file_symbols", args)?;

    let found = app.index().get_file_symbols(&args.file_path, args.include_imports)?;
    Ok(serde_json::to_value(found)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindReferencesArgs {
    symbol_name: Option<String>,
    module_path: Option<String>,
    limit: Option<usize>,
}

/// References tool handler
pub async fn find_references(app: &Codelore, args: Value) -> Result<Value> {
    let args: FindReferencesArgs = parse("find_references", args)?;
    let query = ReferenceQuery::from_options(args.symbol_name.as_deref(), args.module_path.as_deref())?;

    let references = app
        .index()
        .find_references(&query, args.limit.unwrap_or(MAX_REFERENCE_LIMIT))?;
    Ok(json!({ "count": references.len(), "references": references }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStatsArgs {
    #[serde(default = "default_true")]
    include_language_breakdown: bool,
}

/// Stats tool handler
pub async fn get_index_stats(app: &Codelore, args: Value) -> Result<Value> {
    let args: IndexStatsArgs = parse("get_index_stats", args)?;

    let stats = app.index().get_index_stats(args.include_language_breakdown)?;
    Ok(serde_json::to_value(stats)?)
}

/// Tool definitions advertised by `tools/list`
pub fn definitions() -> Vec<ToolDefinition> {
    let scope_write = json!({
        "type": "string",
        "enum": ["project", "user", "global"],
        "default": "project"
    });
    let scope_read = json!({
        "type": "string",
        "enum": ["project", "user", "global", "all"],
        "default": "all"
    });
    let file_props = json!({
        "filePath": { "type": "string", "description": "Absolute path of the file" },
        "relativePath": { "type": "string", "description": "Path relative to the workspace root" },
        "content": { "type": "string", "description": "File content; read from disk when absent" }
    });

    vec![
        ToolDefinition {
            name: "store_knowledge",
            description: "Store a knowledge snippet, linked to related code when possible",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "context": { "type": "string" },
                    "source": { "type": "string" },
                    "metadata": { "type": "object" },
                    "scope": scope_write,
                    "related_files": { "type": "array", "items": { "type": "string" } },
                    "related_symbols": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "kind": { "type": "string" },
                                "file": { "type": "string" }
                            },
                            "required": ["name"]
                        }
                    },
                    "active_file": { "type": "string" }
                },
                "required": ["content"]
            }),
        },
        ToolDefinition {
            name: "retrieve_knowledge",
            description: "Search stored knowledge by relevance",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "limit": { "type": "integer", "default": 10, "maximum": 20 },
                    "scope": scope_read
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "list_knowledge",
            description: "List recent knowledge with per-scope statistics",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "limit": { "type": "integer", "default": 50, "maximum": 50 },
                    "scope": scope_read,
                    "optimize": { "type": "boolean", "default": false }
                }
            }),
        },
        ToolDefinition {
            name: "store_rule",
            description: "Create a rule",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "content": { "type": "string" },
                    "category": { "type": "string" },
                    "priority": { "type": "integer", "default": 0 },
                    "enabled": { "type": "boolean", "default": true },
                    "scope": scope_write
                },
                "required": ["title", "content"]
            }),
        },
        ToolDefinition {
            name: "update_rule",
            description: "Change fields of an existing rule",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "title": { "type": "string" },
                    "content": { "type": "string" },
                    "category": { "type": "string" },
                    "priority": { "type": "integer" },
                    "enabled": { "type": "boolean" },
                    "scope": scope_write
                },
                "required": ["id"]
            }),
        },
        ToolDefinition {
            name: "delete_rule",
            description: "Delete a rule",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "scope": scope_write
                },
                "required": ["id"]
            }),
        },
        ToolDefinition {
            name: "list_rules",
            description: "List rules, highest priority first",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "scope": scope_read,
                    "category": { "type": "string" },
                    "includeDisabled": { "type": "boolean", "default": false }
                }
            }),
        },
        ToolDefinition {
            name: "retrieve_rules",
            description: "Enabled rules matching a query, highest priority first",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "category": { "type": "string" },
                    "limit": { "type": "integer", "default": 50, "maximum": 50 },
                    "scope": scope_read
                }
            }),
        },
        ToolDefinition {
            name: "index_file",
            description: "Index one source file",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filePath": file_props["filePath"],
                    "relativePath": file_props["relativePath"],
                    "content": file_props["content"],
                    "force": { "type": "boolean", "default": false }
                },
                "required": ["filePath", "relativePath"]
            }),
        },
        ToolDefinition {
            name: "index_workspace",
            description: "Index many files in batches",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": file_props,
                            "required": ["filePath", "relativePath"]
                        }
                    },
                    "incremental": { "type": "boolean", "default": true }
                },
                "required": ["files"]
            }),
        },
        ToolDefinition {
            name: "search_symbols",
            description: "Search indexed symbols by name",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "kinds": {
                        "type": "array",
                        "items": {
                            "type": "string",
                            "enum": ["class", "interface", "function", "method", "variable", "constant",
                                     "struct", "enum", "trait", "type", "module", "field"]
                        }
                    },
                    "exportedOnly": { "type": "boolean", "default": false },
                    "limit": { "type": "integer", "default": 20, "maximum": 100 }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "get_file_symbols",
            description: "Symbols and imports of one file",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filePath": { "type": "string" },
                    "includeImports": { "type": "boolean", "default": true }
                },
                "required": ["filePath"]
            }),
        },
        ToolDefinition {
            name: "find_references",
            description: "Definitions of a symbol name, or files importing a module",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "symbolName": { "type": "string" },
                    "modulePath": { "type": "string" },
                    "limit": { "type": "integer", "default": 50, "maximum": 50 }
                }
            }),
        },
        ToolDefinition {
            name: "get_index_stats",
            description: "Index counts with an optional per-language breakdown",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "includeLanguageBreakdown": { "type": "boolean", "default": true }
                }
            }),
        },
    ]
}
