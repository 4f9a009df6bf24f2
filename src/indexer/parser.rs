// Tree-sitter extractors for Python, Rust, Go and Java

use tree_sitter::{Language, Node, Parser as TreeParser, Tree};

use crate::index::{ExtractedImport, ExtractedSymbol, Extraction, SymbolExtractor, SymbolKind};

const MAX_SIGNATURE_CHARS: usize = 200;

/// Python extractor using tree-sitter
pub struct PythonExtractor;

/// Rust extractor using tree-sitter
pub struct RustExtractor;

/// Go extractor using tree-sitter
pub struct GoExtractor;

/// Java extractor using tree-sitter
pub struct JavaExtractor;

fn parse_tree(language: Language, content: &str, name: &str) -> anyhow::Result<Tree> {
    let mut parser = TreeParser::new();
    parser.set_language(&language)?;

    parser
        .parse(content, None)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse {} code", name))
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

fn field_text<'a>(node: Node, field: &str, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, source))
        .filter(|t| !t.is_empty())
}

fn symbol_at(node: Node, name: &str, kind: SymbolKind, container: Option<&str>) -> ExtractedSymbol {
    let start = node.start_position();
    let end = node.end_position();

    ExtractedSymbol {
        name: name.to_string(),
        kind,
        container: container.map(str::to_string),
        start_line: start.row as u32 + 1,
        start_column: start.column as u32 + 1,
        end_line: end.row as u32 + 1,
        end_column: end.column as u32 + 1,
        exported: false,
        signature: None,
        doc: None,
    }
}

fn import_at(node: Node, path: &str, kind: &str, is_local: bool) -> ExtractedImport {
    ExtractedImport {
        path: path.to_string(),
        kind: kind.to_string(),
        is_local,
        line: node.start_position().row as u32 + 1,
    }
}

/// Declaration text up to its body, whitespace collapsed
fn header(node: Node, body_field: &str, source: &str) -> Option<String> {
    let end = node
        .child_by_field_name(body_field)
        .map(|body| body.start_byte())
        .unwrap_or_else(|| node.end_byte());
    let text = source.get(node.start_byte()..end)?;

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches([':', '{', ';', ' ']);
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_SIGNATURE_CHARS).collect())
}

/// Comments directly above `node`, nearest last. Attributes and annotations
/// between the comments and the node are skipped.
fn leading_comments(node: Node, source: &str, doc: fn(&str) -> Option<String>) -> Option<String> {
    let mut lines = Vec::new();
    let mut current = node.prev_sibling();

    while let Some(sibling) = current {
        match sibling.kind() {
            "comment" | "line_comment" | "block_comment" => match doc(node_text(sibling, source)) {
                Some(line) => lines.push(line),
                None => break,
            },
            "attribute_item" | "decorator" => {}
            _ => break,
        }
        current = sibling.prev_sibling();
    }

    lines.reverse();
    let text = lines.join("\n").trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn is_upper_snake(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn visit_children<F>(node: Node, mut visit: F)
where
    F: FnMut(Node),
{
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child);
    }
}

impl PythonExtractor {
    pub fn new() -> Self {
        Self
    }

    fn visit(&self, node: Node, source: &str, container: Option<&str>, out: &mut Extraction) {
        match node.kind() {
            "function_definition" => {
                if let Some(name) = field_text(node, "name", source) {
                    let kind = if container.is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    };
                    let mut symbol = symbol_at(node, name, kind, container);
                    symbol.exported = !name.starts_with('_');
                    symbol.signature = header(node, "body", source);
                    symbol.doc = docstring(node, source);
                    out.symbols.push(symbol);
                }
                // Bodies hold locals only
                return;
            }
            "class_definition" => {
                if let Some(name) = field_text(node, "name", source) {
                    let mut symbol = symbol_at(node, name, SymbolKind::Class, container);
                    symbol.exported = !name.starts_with('_');
                    symbol.signature = header(node, "body", source);
                    symbol.doc = docstring(node, source);
                    out.symbols.push(symbol);

                    if let Some(body) = node.child_by_field_name("body") {
                        visit_children(body, |child| self.visit(child, source, Some(name), out));
                    }
                }
                return;
            }
            "assignment" => {
                if let Some(left) = node.child_by_field_name("left") {
                    if left.kind() == "identifier" {
                        let name = node_text(left, source);
                        let kind = if container.is_some() {
                            SymbolKind::Field
                        } else if is_upper_snake(name) {
                            SymbolKind::Constant
                        } else {
                            SymbolKind::Variable
                        };
                        let mut symbol = symbol_at(node, name, kind, container);
                        symbol.exported = !name.starts_with('_');
                        out.symbols.push(symbol);
                    }
                }
                return;
            }
            "import_statement" => {
                visit_children(node, |child| {
                    let path = match child.kind() {
                        "dotted_name" => Some(node_text(child, source)),
                        "aliased_import" => field_text(child, "name", source),
                        _ => None,
                    };
                    if let Some(path) = path {
                        out.imports.push(import_at(node, path, "import", false));
                    }
                });
                return;
            }
            "import_from_statement" => {
                if let Some(module) = field_text(node, "module_name", source) {
                    out.imports
                        .push(import_at(node, module, "import", module.starts_with('.')));
                }
                return;
            }
            _ => {}
        }

        visit_children(node, |child| self.visit(child, source, container, out));
    }
}

/// First string statement of a Python body
fn docstring(node: Node, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }

    let text = node_text(string, source)
        .trim_start_matches(['r', 'u', 'b', 'R', 'U', 'B'])
        .trim_matches(['"', '\''])
        .trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

impl SymbolExtractor for PythonExtractor {
    fn supports(&self, language: &str) -> bool {
        language == "python"
    }

    fn extract(&self, content: &str) -> anyhow::Result<Extraction> {
        let tree = parse_tree(tree_sitter_python::LANGUAGE.into(), content, "Python")?;
        let mut out = Extraction::default();
        self.visit(tree.root_node(), content, None, &mut out);
        Ok(out)
    }
}

impl RustExtractor {
    pub fn new() -> Self {
        Self
    }

    fn visit(&self, node: Node, source: &str, container: Option<&str>, out: &mut Extraction) {
        let kind = match node.kind() {
            "function_item" | "function_signature_item" => {
                let in_type = matches!(
                    node.parent().and_then(|p| p.parent()).map(|g| g.kind()),
                    Some("impl_item") | Some("trait_item")
                );
                if in_type {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                }
            }
            "struct_item" | "union_item" => SymbolKind::Struct,
            "enum_item" => SymbolKind::Enum,
            "trait_item" => SymbolKind::Trait,
            "type_item" => SymbolKind::Type,
            "const_item" => SymbolKind::Constant,
            "static_item" => SymbolKind::Variable,
            "mod_item" => SymbolKind::Module,
            "impl_item" => {
                let target = field_text(node, "type", source);
                if let Some(body) = node.child_by_field_name("body") {
                    visit_children(body, |child| self.visit(child, source, target, out));
                }
                return;
            }
            "use_declaration" => {
                if let Some(path) = field_text(node, "argument", source) {
                    let local = ["crate::", "self::", "super::"]
                        .iter()
                        .any(|prefix| path.starts_with(prefix));
                    out.imports.push(import_at(node, path, "use", local));
                }
                return;
            }
            _ => {
                visit_children(node, |child| self.visit(child, source, container, out));
                return;
            }
        };

        let Some(name) = field_text(node, "name", source) else {
            return;
        };

        let mut symbol = symbol_at(node, name, kind, container);
        symbol.exported = has_visibility(node);
        symbol.doc = leading_comments(node, source, rust_doc_line);
        if matches!(kind, SymbolKind::Function | SymbolKind::Method) {
            symbol.signature = header(node, "body", source);
        }
        out.symbols.push(symbol);

        // Trait and module items carry their own declarations
        if matches!(kind, SymbolKind::Trait | SymbolKind::Module) {
            if let Some(body) = node.child_by_field_name("body") {
                let scope = if kind == SymbolKind::Trait { Some(name) } else { container };
                visit_children(body, |child| self.visit(child, source, scope, out));
            }
        }
    }
}

fn has_visibility(node: Node) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| child.kind() == "visibility_modifier");
    found
}

fn rust_doc_line(text: &str) -> Option<String> {
    text.strip_prefix("///").map(|rest| rest.trim().to_string())
}

impl SymbolExtractor for RustExtractor {
    fn supports(&self, language: &str) -> bool {
        language == "rust"
    }

    fn extract(&self, content: &str) -> anyhow::Result<Extraction> {
        let tree = parse_tree(tree_sitter_rust::LANGUAGE.into(), content, "Rust")?;
        let mut out = Extraction::default();
        self.visit(tree.root_node(), content, None, &mut out);
        Ok(out)
    }
}

impl GoExtractor {
    pub fn new() -> Self {
        Self
    }

    fn visit(&self, node: Node, source: &str, out: &mut Extraction) {
        match node.kind() {
            "function_declaration" => {
                if let Some(name) = field_text(node, "name", source) {
                    let mut symbol = symbol_at(node, name, SymbolKind::Function, None);
                    symbol.exported = is_go_exported(name);
                    symbol.signature = header(node, "body", source);
                    symbol.doc = leading_comments(node, source, go_doc_line);
                    out.symbols.push(symbol);
                }
            }
            "method_declaration" => {
                if let Some(name) = field_text(node, "name", source) {
                    let receiver = field_text(node, "receiver", source).map(receiver_type);
                    let mut symbol = symbol_at(node, name, SymbolKind::Method, receiver.as_deref());
                    symbol.exported = is_go_exported(name);
                    symbol.signature = header(node, "body", source);
                    symbol.doc = leading_comments(node, source, go_doc_line);
                    out.symbols.push(symbol);
                }
            }
            "type_declaration" => {
                let doc = leading_comments(node, source, go_doc_line);
                visit_children(node, |spec| {
                    if !matches!(spec.kind(), "type_spec" | "type_alias") {
                        return;
                    }
                    let Some(name) = field_text(spec, "name", source) else {
                        return;
                    };
                    let kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
                        Some("struct_type") => SymbolKind::Struct,
                        Some("interface_type") => SymbolKind::Interface,
                        _ => SymbolKind::Type,
                    };
                    let mut symbol = symbol_at(spec, name, kind, None);
                    symbol.exported = is_go_exported(name);
                    symbol.doc = doc.clone();
                    out.symbols.push(symbol);
                });
            }
            "const_declaration" | "var_declaration" => {
                let kind = if node.kind() == "const_declaration" {
                    SymbolKind::Constant
                } else {
                    SymbolKind::Variable
                };
                collect_go_specs(node, source, kind, out);
            }
            "import_declaration" => collect_go_imports(node, source, out),
            _ => visit_children(node, |child| self.visit(child, source, out)),
        }
    }
}

fn collect_go_specs(node: Node, source: &str, kind: SymbolKind, out: &mut Extraction) {
    visit_children(node, |child| match child.kind() {
        "const_spec" | "var_spec" => {
            visit_children(child, |part| {
                if part.kind() == "identifier" {
                    let name = node_text(part, source);
                    let mut symbol = symbol_at(child, name, kind, None);
                    symbol.exported = is_go_exported(name);
                    out.symbols.push(symbol);
                }
            });
        }
        "var_spec_list" => collect_go_specs(child, source, kind, out),
        _ => {}
    });
}

fn collect_go_imports(node: Node, source: &str, out: &mut Extraction) {
    visit_children(node, |child| match child.kind() {
        "import_spec" => {
            if let Some(path) = field_text(child, "path", source) {
                let path = path.trim_matches(['"', '`']);
                out.imports.push(import_at(child, path, "import", path.starts_with('.')));
            }
        }
        "import_spec_list" => collect_go_imports(child, source, out),
        _ => {}
    });
}

fn is_go_exported(name: &str) -> bool {
    name.chars().next().map(char::is_uppercase).unwrap_or(false)
}

/// `(s *Server[T])` -> `Server`
fn receiver_type(receiver: &str) -> String {
    let without_params = receiver
        .trim_matches(['(', ')'])
        .split('[')
        .next()
        .unwrap_or_default();
    without_params
        .split_whitespace()
        .last()
        .unwrap_or_default()
        .trim_start_matches('*')
        .to_string()
}

fn go_doc_line(text: &str) -> Option<String> {
    text.strip_prefix("//").map(|rest| rest.trim().to_string())
}

impl SymbolExtractor for GoExtractor {
    fn supports(&self, language: &str) -> bool {
        language == "go"
    }

    fn extract(&self, content: &str) -> anyhow::Result<Extraction> {
        let tree = parse_tree(tree_sitter_go::LANGUAGE.into(), content, "Go")?;
        let mut out = Extraction::default();
        self.visit(tree.root_node(), content, &mut out);
        Ok(out)
    }
}

impl JavaExtractor {
    pub fn new() -> Self {
        Self
    }

    fn visit(&self, node: Node, source: &str, container: Option<&str>, out: &mut Extraction) {
        match node.kind() {
            "class_declaration" | "record_declaration" | "interface_declaration"
            | "enum_declaration" | "annotation_type_declaration" => {
                let kind = match node.kind() {
                    "interface_declaration" | "annotation_type_declaration" => SymbolKind::Interface,
                    "enum_declaration" => SymbolKind::Enum,
                    _ => SymbolKind::Class,
                };
                if let Some(name) = field_text(node, "name", source) {
                    let mut symbol = symbol_at(node, name, kind, container);
                    symbol.exported = java_modifiers(node, source).contains(&"public");
                    symbol.signature = header(node, "body", source);
                    symbol.doc = leading_comments(node, source, java_doc);
                    out.symbols.push(symbol);

                    if let Some(body) = node.child_by_field_name("body") {
                        visit_children(body, |child| self.visit(child, source, Some(name), out));
                    }
                }
            }
            "method_declaration" | "constructor_declaration" => {
                if let Some(name) = field_text(node, "name", source) {
                    let mut symbol = symbol_at(node, name, SymbolKind::Method, container);
                    symbol.exported = java_modifiers(node, source).contains(&"public");
                    symbol.signature = header(node, "body", source);
                    symbol.doc = leading_comments(node, source, java_doc);
                    out.symbols.push(symbol);
                }
            }
            "field_declaration" => {
                let modifiers = java_modifiers(node, source);
                let kind = if modifiers.contains(&"static") && modifiers.contains(&"final") {
                    SymbolKind::Constant
                } else {
                    SymbolKind::Field
                };
                let exported = modifiers.contains(&"public");
                let doc = leading_comments(node, source, java_doc);

                visit_children(node, |child| {
                    if child.kind() != "variable_declarator" {
                        return;
                    }
                    if let Some(name) = field_text(child, "name", source) {
                        let mut symbol = symbol_at(node, name, kind, container);
                        symbol.exported = exported;
                        symbol.doc = doc.clone();
                        out.symbols.push(symbol);
                    }
                });
            }
            "import_declaration" => {
                let path = node_text(node, source)
                    .trim_start_matches("import")
                    .trim()
                    .trim_start_matches("static ")
                    .trim_end_matches(';')
                    .trim();
                if !path.is_empty() {
                    out.imports.push(import_at(node, path, "import", false));
                }
            }
            _ => visit_children(node, |child| self.visit(child, source, container, out)),
        }
    }
}

fn java_modifiers<'a>(node: Node, source: &'a str) -> Vec<&'a str> {
    let mut cursor = node.walk();
    let modifiers = node
        .children(&mut cursor)
        .find(|child| child.kind() == "modifiers")
        .map(|m| node_text(m, source).split_whitespace().collect())
        .unwrap_or_default();
    modifiers
}

fn java_doc(text: &str) -> Option<String> {
    let body = text.strip_prefix("/**")?.strip_suffix("*/")?;
    let lines: Vec<&str> = body
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .filter(|line| !line.is_empty())
        .collect();
    Some(lines.join("\n"))
}

impl SymbolExtractor for JavaExtractor {
    fn supports(&self, language: &str) -> bool {
        language == "java"
    }

    fn extract(&self, content: &str) -> anyhow::Result<Extraction> {
        let tree = parse_tree(tree_sitter_java::LANGUAGE.into(), content, "Java")?;
        let mut out = Extraction::default();
        self.visit(tree.root_node(), content, None, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(extraction: &'a Extraction, name: &str) -> &'a ExtractedSymbol {
        extraction
            .symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("missing symbol {}", name))
    }

    #[test]
    fn test_python_symbols_and_imports() {
        let code = r#""""Module doc."""
import os
from .models import User
MAX_RETRIES = 3
_cache = {}

class UserService:
    """Loads users."""
    def get(self, user_id):
        return None

def fetch_user(user_id):
    return UserService().get(user_id)
"#;
        let extraction = PythonExtractor::new().extract(code).unwrap();

        let constant = find(&extraction, "MAX_RETRIES");
        assert_eq!(constant.kind, SymbolKind::Constant);
        assert!(constant.exported);
        assert!(!find(&extraction, "_cache").exported);

        let class = find(&extraction, "UserService");
        assert_eq!(class.kind, SymbolKind::Class);
        assert_eq!(class.doc.as_deref(), Some("Loads users."));

        let method = find(&extraction, "get");
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.container.as_deref(), Some("UserService"));

        let function = find(&extraction, "fetch_user");
        assert_eq!(function.kind, SymbolKind::Function);
        assert_eq!(function.start_line, 12);
        assert_eq!(function.signature.as_deref(), Some("def fetch_user(user_id)"));
        assert!(extraction.symbols.iter().all(|s| s.name != "user_id"));

        assert_eq!(extraction.imports.len(), 2);
        assert_eq!(extraction.imports[0].path, "os");
        assert!(!extraction.imports[0].is_local);
        assert_eq!(extraction.imports[1].path, ".models");
        assert!(extraction.imports[1].is_local);
        assert_eq!(extraction.imports[1].line, 3);
    }

    #[test]
    fn test_rust_symbols_and_imports() {
        let code = r#"use crate::storage::Scope;
use std::fmt;

/// Loads things.
pub struct Loader {
    count: usize,
}

impl Loader {
    pub fn load(&self) -> usize {
        self.count
    }
}

pub const LIMIT: usize = 3;
fn helper() {}
"#;
        let extraction = RustExtractor::new().extract(code).unwrap();

        let loader = find(&extraction, "Loader");
        assert_eq!(loader.kind, SymbolKind::Struct);
        assert!(loader.exported);
        assert_eq!(loader.doc.as_deref(), Some("Loads things."));
        assert_eq!(loader.start_line, 5);

        let load = find(&extraction, "load");
        assert_eq!(load.kind, SymbolKind::Method);
        assert_eq!(load.container.as_deref(), Some("Loader"));
        assert_eq!(load.signature.as_deref(), Some("pub fn load(&self) -> usize"));

        assert_eq!(find(&extraction, "LIMIT").kind, SymbolKind::Constant);
        let helper = find(&extraction, "helper");
        assert_eq!(helper.kind, SymbolKind::Function);
        assert!(!helper.exported);

        let paths: Vec<_> = extraction.imports.iter().map(|i| (i.path.as_str(), i.is_local)).collect();
        assert_eq!(paths, vec![("crate::storage::Scope", true), ("std::fmt", false)]);
    }

    #[test]
    fn test_go_symbols_and_imports() {
        let code = r#"package users

import (
	"fmt"
	"./internal"
)

// Server handles requests.
type Server struct {
	name string
}

func (s *Server) Start() error {
	return nil
}

func helper() {}

const MaxConns = 10
"#;
        let extraction = GoExtractor::new().extract(code).unwrap();

        let server = find(&extraction, "Server");
        assert_eq!(server.kind, SymbolKind::Struct);
        assert!(server.exported);
        assert_eq!(server.doc.as_deref(), Some("Server handles requests."));

        let start = find(&extraction, "Start");
        assert_eq!(start.kind, SymbolKind::Method);
        assert_eq!(start.container.as_deref(), Some("Server"));

        assert!(!find(&extraction, "helper").exported);
        assert_eq!(find(&extraction, "MaxConns").kind, SymbolKind::Constant);

        let paths: Vec<_> = extraction.imports.iter().map(|i| (i.path.as_str(), i.is_local)).collect();
        assert_eq!(paths, vec![("fmt", false), ("./internal", true)]);
    }

    #[test]
    fn test_java_symbols_and_imports() {
        let code = r#"package com.acme;

import java.util.List;

/** Stores users. */
public class UserRepo {
    public static final int LIMIT = 10;
    private String name;

    public List<String> findAll() {
        return null;
    }
}
"#;
        let extraction = JavaExtractor::new().extract(code).unwrap();

        let repo = find(&extraction, "UserRepo");
        assert_eq!(repo.kind, SymbolKind::Class);
        assert!(repo.exported);
        assert_eq!(repo.doc.as_deref(), Some("Stores users."));

        let limit = find(&extraction, "LIMIT");
        assert_eq!(limit.kind, SymbolKind::Constant);
        assert!(limit.exported);

        let name = find(&extraction, "name");
        assert_eq!(name.kind, SymbolKind::Field);
        assert!(!name.exported);

        let find_all = find(&extraction, "findAll");
        assert_eq!(find_all.kind, SymbolKind::Method);
        assert_eq!(find_all.container.as_deref(), Some("UserRepo"));

        assert_eq!(extraction.imports.len(), 1);
        assert_eq!(extraction.imports[0].path, "java.util.List");
    }

    #[test]
    fn test_receiver_type() {
        assert_eq!(receiver_type("(s *Server)"), "Server");
        assert_eq!(receiver_type("(Cache[K, V])"), "Cache");
        assert_eq!(receiver_type("(c *Cache[K])"), "Cache");
    }
}
