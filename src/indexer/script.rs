// Line-based extractor for TypeScript and JavaScript

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::index::{ExtractedImport, ExtractedSymbol, Extraction, SymbolExtractor, SymbolKind};

const MAX_SIGNATURE_CHARS: usize = 200;

static FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(export\s+)?(default\s+)?(declare\s+)?(async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)").unwrap()
});

static CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(export\s+)?(default\s+)?(declare\s+)?(abstract\s+)?class\s+([A-Za-z_$][\w$]*)").unwrap()
});

static INTERFACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(export\s+)?(declare\s+)?interface\s+([A-Za-z_$][\w$]*)").unwrap()
});

static TYPE_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(export\s+)?(declare\s+)?type\s+([A-Za-z_$][\w$]*)\s*(<[^=]*>)?\s*=").unwrap()
});

static ENUM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(export\s+)?(declare\s+)?(const\s+)?enum\s+([A-Za-z_$][\w$]*)").unwrap()
});

static VARIABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(export\s+)?(declare\s+)?(const|let|var)\s+([A-Za-z_$][\w$]*)\s*(:[^=]*)?(=\s*(.*))?$").unwrap()
});

static ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(async\s+)?(<[^>]*>\s*)?(\([^)]*\)|[A-Za-z_$][\w$]*)\s*(:\s*[^=]+?)?\s*=>").unwrap()
});

static FUNCTION_EXPRESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(async\s+)?(function\b|\($)").unwrap());

static METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:public|private|protected|static|async|readonly|abstract|override|get|set)\s+)*\*?\s*(#?[A-Za-z_$][\w$]*)\s*(<[^>]*>)?\s*\(").unwrap()
});

static FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:public|private|protected|static|readonly|declare|override)\s+)*(#?[A-Za-z_$][\w$]*)\s*[?!]?\s*(:[^=;(]+)?(=|;|$)").unwrap()
});

static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"^export\s+(type\s+)?\{([^}]*)\}").unwrap());

static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^export\s+(type\s+)?(\*|\{[^}]*\})(\s+as\s+[\w$]+)?\s+from\s+['"]([^'"]+)['"]"#).unwrap()
});

static IMPORT_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^import\s.*\bfrom\s+['"]([^'"]+)['"]"#).unwrap());

static IMPORT_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^\}?\s*from\s+['"]([^'"]+)['"]"#).unwrap());

static SIDE_EFFECT_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^import\s+['"]([^'"]+)['"]"#).unwrap());

static REQUIRE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());

static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\bimport\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());

static UPPER_SNAKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap());

/// Words that look like method calls inside class bodies but are not declarations
const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "new", "await", "super", "typeof",
];

/// TypeScript and JavaScript extractor. Tracks brace depth line by line to
/// find top-level declarations, class members and declaration end lines.
pub struct ScriptExtractor;

struct OpenClass {
    name: String,
    exported: bool,
    body_depth: usize,
}

#[derive(Default)]
struct ScanState {
    depth: usize,
    in_block_comment: bool,
    doc_lines: Vec<String>,
    collecting_doc: bool,
    pending_doc: Option<(String, usize)>,
    pending_import: Option<u32>,
    classes: Vec<OpenClass>,
    /// Symbols whose closing brace has not been seen: (symbol index, depth before opening)
    open: Vec<(usize, usize)>,
    exported_names: HashSet<String>,
}

impl ScriptExtractor {
    pub fn new() -> Self {
        Self
    }

    fn scan(&self, content: &str) -> Extraction {
        let mut out = Extraction::default();
        let mut state = ScanState::default();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = raw.trim();

            if self.scan_comment(&mut state, trimmed, idx) {
                continue;
            }

            scan_imports(&mut state, trimmed, line_no, &mut out.imports);

            let depth = state.depth;
            while state.classes.last().map(|c| c.body_depth > depth).unwrap_or(false) {
                state.classes.pop();
            }

            let doc = match state.pending_doc.take() {
                Some((text, end)) if end + 1 == idx => Some(text),
                _ => None,
            };

            if trimmed.starts_with('@') {
                // Decorators keep the preceding doc attached
                if let Some(text) = doc {
                    state.pending_doc = Some((text, idx));
                }
            } else if !trimmed.is_empty() {
                let symbol = if depth == 0 {
                    self.top_level(trimmed, line_no, &mut state)
                } else {
                    state
                        .classes
                        .last()
                        .filter(|c| c.body_depth == depth)
                        .and_then(|class| class_member(trimmed, line_no, class))
                };

                if let Some(mut symbol) = symbol {
                    symbol.start_column = (raw.len() - raw.trim_start().len()) as u32 + 1;
                    symbol.doc = doc;
                    symbol.signature = Some(signature(trimmed));

                    let (opens, closes) = brace_counts(raw);
                    if opens > closes {
                        state.open.push((out.symbols.len(), depth));
                        if symbol.kind == SymbolKind::Class {
                            state.classes.push(OpenClass {
                                name: symbol.name.clone(),
                                exported: symbol.exported,
                                body_depth: depth + 1,
                            });
                        }
                    } else {
                        symbol.end_line = line_no;
                        symbol.end_column = raw.len() as u32;
                    }
                    out.symbols.push(symbol);
                }
            }

            let (opens, closes) = brace_counts(raw);
            state.depth = (state.depth + opens).saturating_sub(closes);

            while let Some(&(symbol_idx, before)) = state.open.last() {
                if state.depth > before {
                    break;
                }
                state.open.pop();
                if let Some(symbol) = out.symbols.get_mut(symbol_idx) {
                    symbol.end_line = line_no;
                    symbol.end_column = raw.len() as u32;
                }
            }
        }

        for symbol in &mut out.symbols {
            if symbol.container.is_none() && state.exported_names.contains(&symbol.name) {
                symbol.exported = true;
            }
        }

        out
    }

    /// Handles block comments and JSDoc. Returns true when the line is
    /// entirely comment.
    fn scan_comment(&self, state: &mut ScanState, trimmed: &str, idx: usize) -> bool {
        if state.in_block_comment {
            if state.collecting_doc {
                let text = trimmed.trim_end_matches("*/").trim_start_matches('*').trim();
                if !text.is_empty() {
                    state.doc_lines.push(text.to_string());
                }
            }
            if trimmed.contains("*/") {
                state.in_block_comment = false;
                if state.collecting_doc {
                    state.collecting_doc = false;
                    let text = state.doc_lines.join("\n");
                    state.doc_lines.clear();
                    state.pending_doc = (!text.is_empty()).then_some((text, idx));
                }
            }
            return true;
        }

        if let Some(rest) = trimmed.strip_prefix("/**") {
            if let Some(inner) = rest.strip_suffix("*/") {
                let text = inner.trim().to_string();
                state.pending_doc = (!text.is_empty()).then_some((text, idx));
            } else {
                state.in_block_comment = true;
                state.collecting_doc = true;
                let text = rest.trim();
                if !text.is_empty() {
                    state.doc_lines.push(text.to_string());
                }
            }
            return true;
        }

        if trimmed.starts_with("/*") {
            state.in_block_comment = !trimmed.contains("*/");
            return true;
        }

        trimmed.starts_with("//")
    }

    fn top_level(&self, line: &str, line_no: u32, state: &mut ScanState) -> Option<ExtractedSymbol> {
        if let Some(caps) = EXPORT_LIST.captures(line) {
            if !EXPORT_FROM.is_match(line) {
                for item in caps[2].split(',') {
                    // `local as public` exports `local`
                    if let Some(local) = item.split_whitespace().next() {
                        state.exported_names.insert(local.to_string());
                    }
                }
            }
            return None;
        }

        let exported = line.starts_with("export ");

        if let Some(caps) = FUNCTION.captures(line) {
            return Some(declared(&caps[5], SymbolKind::Function, line_no, exported));
        }
        if let Some(caps) = CLASS.captures(line) {
            return Some(declared(&caps[5], SymbolKind::Class, line_no, exported));
        }
        if let Some(caps) = INTERFACE.captures(line) {
            return Some(declared(&caps[3], SymbolKind::Interface, line_no, exported));
        }
        if let Some(caps) = TYPE_ALIAS.captures(line) {
            return Some(declared(&caps[3], SymbolKind::Type, line_no, exported));
        }
        if let Some(caps) = ENUM.captures(line) {
            return Some(declared(&caps[4], SymbolKind::Enum, line_no, exported));
        }
        if let Some(caps) = VARIABLE.captures(line) {
            let name = &caps[4];
            let value = caps.get(7).map(|m| m.as_str().trim()).unwrap_or_default();
            let kind = if ARROW.is_match(value) || FUNCTION_EXPRESSION.is_match(value) {
                SymbolKind::Function
            } else if &caps[3] == "const" && UPPER_SNAKE.is_match(name) {
                SymbolKind::Constant
            } else {
                SymbolKind::Variable
            };
            return Some(declared(name, kind, line_no, exported));
        }

        None
    }
}

fn class_member(line: &str, line_no: u32, class: &OpenClass) -> Option<ExtractedSymbol> {
    let private = line.starts_with("private ") || line.starts_with('#');

    let (name, kind) = if let Some(caps) = METHOD.captures(line) {
        (caps[2].to_string(), SymbolKind::Method)
    } else if let Some(caps) = FIELD.captures(line) {
        (caps[2].to_string(), SymbolKind::Field)
    } else {
        return None;
    };

    if CONTROL_KEYWORDS.contains(&name.as_str()) {
        return None;
    }

    let mut symbol = declared(&name, kind, line_no, class.exported && !private);
    symbol.container = Some(class.name.clone());
    Some(symbol)
}

fn declared(name: &str, kind: SymbolKind, line_no: u32, exported: bool) -> ExtractedSymbol {
    let mut symbol = ExtractedSymbol::new(name, kind, line_no);
    symbol.exported = exported;
    symbol
}

fn scan_imports(state: &mut ScanState, line: &str, line_no: u32, imports: &mut Vec<ExtractedImport>) {
    let mut push = |path: &str, kind: &str, at: u32| {
        imports.push(ExtractedImport {
            path: path.to_string(),
            kind: kind.to_string(),
            is_local: path.starts_with('.') || path.starts_with('/'),
            line: at,
        });
    };

    if let Some(start) = state.pending_import {
        if let Some(caps) = IMPORT_TAIL.captures(line) {
            push(&caps[1], "import", start);
            state.pending_import = None;
        } else if line.starts_with("import ") || line.starts_with("export ") {
            state.pending_import = None;
        } else {
            return;
        }
    }

    if let Some(caps) = EXPORT_FROM.captures(line) {
        push(&caps[4], "export", line_no);
    } else if let Some(caps) = IMPORT_FROM.captures(line) {
        push(&caps[1], "import", line_no);
    } else if let Some(caps) = SIDE_EFFECT_IMPORT.captures(line) {
        push(&caps[1], "import", line_no);
    } else if line.starts_with("import ") && line.contains('{') && !line.contains('}') {
        state.pending_import = Some(line_no);
    }

    for caps in REQUIRE.captures_iter(line) {
        push(&caps[1], "require", line_no);
    }
    for caps in DYNAMIC_IMPORT.captures_iter(line) {
        push(&caps[1], "dynamic", line_no);
    }
}

/// Braces outside strings and line comments
fn brace_counts(line: &str) -> (usize, usize) {
    let mut opens = 0;
    let mut closes = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev = '\0';

    for c in line.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            prev = c;
            continue;
        }

        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '/' if prev == '/' => break,
            '{' => opens += 1,
            '}' => closes += 1,
            _ => {}
        }
        prev = c;
    }

    (opens, closes)
}

fn signature(line: &str) -> String {
    let head = line.split('{').next().unwrap_or(line).trim();
    let head = head.trim_end_matches([';', '=']).trim_end();
    head.chars().take(MAX_SIGNATURE_CHARS).collect()
}

impl SymbolExtractor for ScriptExtractor {
    fn supports(&self, language: &str) -> bool {
        matches!(language, "typescript" | "javascript")
    }

    fn extract(&self, content: &str) -> anyhow::Result<Extraction> {
        Ok(self.scan(content))
    }
}
