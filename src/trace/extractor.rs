//! Regex symbol extraction
//!
//! A deliberately approximate, line-oriented extractor. Per language it
//! recognizes definition forms (named functions, receiver/impl methods,
//! record-like types, interface-like constructs) and reference forms (an
//! identifier followed by `(`). Brace depth and a container stack decide
//! whether a function is a method; the innermost enclosing definition at a
//! call site supplies the caller name. Keywords and common built-ins are
//! filtered per language to avoid spurious captures.

use super::{Reference, Symbol, SymbolKind};
use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Extensions the extractor understands, dot-prefixed.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".go", ".js", ".jsx", ".ts", ".tsx", ".py", ".php", ".c", ".h", ".zig", ".rs", ".cpp",
    ".hpp", ".cc", ".cxx", ".hxx",
];

const GO_KEYWORDS: &[&str] = &[
    "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough",
    "for", "func", "go", "goto", "if", "import", "interface", "map", "package", "range",
    "return", "select", "struct", "switch", "type", "var", "append", "cap", "close", "copy",
    "delete", "len", "make", "new", "panic", "print", "println", "recover",
];

const JS_KEYWORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "default", "delete", "do", "else",
    "export", "extends", "finally", "for", "function", "if", "import", "in", "instanceof",
    "let", "new", "return", "super", "switch", "this", "throw", "try", "typeof", "var", "void",
    "while", "with", "yield", "await", "async", "require", "console",
];

const PY_KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del",
    "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield", "print",
    "len", "range", "str", "int", "float", "list", "dict", "set", "tuple", "isinstance",
    "super", "type",
];

const PHP_KEYWORDS: &[&str] = &[
    "abstract", "array", "as", "break", "case", "catch", "class", "clone", "const", "continue",
    "declare", "default", "do", "echo", "else", "elseif", "empty", "extends", "final",
    "finally", "for", "foreach", "function", "if", "implements", "include", "instanceof",
    "interface", "isset", "list", "namespace", "new", "print", "private", "protected",
    "public", "require", "return", "static", "switch", "throw", "trait", "try", "unset",
    "use", "while",
];

const C_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "return", "break", "continue",
    "goto", "sizeof", "typedef", "struct", "union", "enum", "static", "extern", "const",
    "void", "int", "char", "float", "double", "long", "short", "unsigned", "signed",
    "malloc", "calloc", "realloc", "free", "printf", "fprintf", "sprintf", "scanf", "memcpy",
    "memset", "strlen", "strcmp", "strcpy",
];

const CPP_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "return", "break", "continue",
    "goto", "sizeof", "typedef", "struct", "union", "enum", "class", "static", "extern",
    "const", "constexpr", "void", "int", "char", "float", "double", "long", "short",
    "unsigned", "signed", "new", "delete", "template", "typename", "namespace", "using",
    "public", "private", "protected", "virtual", "override", "static_cast", "dynamic_cast",
    "const_cast", "reinterpret_cast", "throw", "try", "catch", "operator", "this", "printf",
    "malloc", "free", "abs",
];

const RUST_KEYWORDS: &[&str] = &[
    "as", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern", "false",
    "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub",
    "ref", "return", "self", "static", "struct", "super", "trait", "true", "type", "unsafe",
    "use", "where", "while", "async", "await", "println", "print", "panic", "vec", "format",
    "write", "writeln", "assert", "assert_eq", "Some", "None", "Ok", "Err", "Box", "String",
];

const ZIG_KEYWORDS: &[&str] = &[
    "align", "and", "anyframe", "anytype", "asm", "async", "await", "break", "catch",
    "comptime", "const", "continue", "defer", "else", "enum", "errdefer", "error", "export",
    "extern", "fn", "for", "if", "inline", "noalias", "or", "orelse", "packed", "pub",
    "resume", "return", "struct", "suspend", "switch", "test", "try", "union", "unreachable",
    "var", "volatile", "while", "print", "import",
];

/// True when `word` is a keyword or filtered built-in for `lang` (a language
/// tag such as `"rust"`, `"c"`, `"zig"`).
pub fn is_keyword(word: &str, lang: &str) -> bool {
    let list: &[&str] = match lang {
        "go" => GO_KEYWORDS,
        "javascript" | "typescript" => JS_KEYWORDS,
        "python" => PY_KEYWORDS,
        "php" => PHP_KEYWORDS,
        "c" => C_KEYWORDS,
        "cpp" => CPP_KEYWORDS,
        "rust" => RUST_KEYWORDS,
        "zig" => ZIG_KEYWORDS,
        _ => return false,
    };
    list.contains(&word)
}

struct LanguageRules {
    lang: &'static str,
    /// Function-like definitions; capture 1 = name. Whether a match becomes
    /// Function or Method depends on container nesting (or a dedicated
    /// method regex below).
    functions: Vec<Regex>,
    /// Definitions that are methods regardless of nesting (e.g. Go receiver
    /// functions).
    methods: Vec<Regex>,
    /// Type-like definitions that open a container body.
    types: Vec<(Regex, SymbolKind)>,
    /// Non-emitted containers that make inner functions methods (Rust impl).
    containers: Vec<Regex>,
}

/// Pure regex extractor for symbols and references.
pub struct RegexExtractor {
    rules: HashMap<&'static str, LanguageRules>,
    reference: Regex,
}

impl Default for RegexExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexExtractor {
    pub fn new() -> Self {
        let mut rules = HashMap::new();
        for spec in build_rules() {
            rules.insert(spec.lang, spec);
        }
        Self {
            rules,
            reference: Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap(),
        }
    }

    /// Dot-prefixed extensions the extractor can process.
    pub fn supported_languages(&self) -> Vec<&'static str> {
        SUPPORTED_EXTENSIONS.to_vec()
    }

    /// True when `ext` (dot-prefixed, e.g. `".go"`) is traceable.
    pub fn supports_extension(&self, ext: &str) -> bool {
        SUPPORTED_EXTENSIONS.contains(&ext)
    }

    /// Extract definitions and call references in one pass.
    pub fn extract(&self, file_path: &str, content: &str) -> (Vec<Symbol>, Vec<Reference>) {
        let Some(lang) = language_for_path(file_path) else {
            return (Vec::new(), Vec::new());
        };
        let Some(rules) = self.rules.get(lang) else {
            return (Vec::new(), Vec::new());
        };

        if lang == "python" {
            self.scan_python(file_path, content, rules)
        } else {
            self.scan_braced(file_path, content, rules)
        }
    }

    pub fn extract_symbols(&self, file_path: &str, content: &str) -> Result<Vec<Symbol>> {
        Ok(self.extract(file_path, content).0)
    }

    pub fn extract_references(&self, file_path: &str, content: &str) -> Result<Vec<Reference>> {
        Ok(self.extract(file_path, content).1)
    }

    /// Scan a brace-delimited language, tracking nesting to classify methods
    /// and attribute call sites to their enclosing definition.
    fn scan_braced(
        &self,
        file_path: &str,
        content: &str,
        rules: &LanguageRules,
    ) -> (Vec<Symbol>, Vec<Reference>) {
        let mut symbols = Vec::new();
        let mut references = Vec::new();
        let feature = feature_path(file_path);

        // (open depth) stacks: containers gate method classification, the
        // innermost function attributes references.
        let mut containers: Vec<usize> = Vec::new();
        let mut current_fn: Option<(String, u32, usize)> = None;
        let mut depth: usize = 0;
        let mut pending_typedef: Option<usize> = None;

        for (idx, raw_line) in content.lines().enumerate() {
            let line_no = (idx + 1) as u32;
            let line = strip_line_comment(raw_line);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let mut defined_on_line: Option<String> = None;

            // typedef struct { ... } Name; (C family)
            if (rules.lang == "c" || rules.lang == "cpp")
                && trimmed.starts_with("typedef")
                && (trimmed.contains("struct") || trimmed.contains("union"))
                && !trimmed.contains(';')
            {
                pending_typedef = Some(depth);
            } else if let Some(open_depth) = pending_typedef {
                if depth == open_depth + 1 || depth == open_depth {
                    if let Some(caps) = typedef_close_re().captures(trimmed) {
                        let name = caps[1].to_string();
                        symbols.push(Symbol {
                            name,
                            kind: SymbolKind::Type,
                            file_path: file_path.to_string(),
                            line: line_no,
                            language: rules.lang.to_string(),
                            feature_path: feature.clone(),
                        });
                        pending_typedef = None;
                    }
                }
            }

            for (re, kind) in &rules.types {
                if let Some(caps) = re.captures(line) {
                    let name = caps[1].to_string();
                    if is_keyword(&name, rules.lang) {
                        continue;
                    }
                    defined_on_line = Some(name.clone());
                    symbols.push(Symbol {
                        name,
                        kind: *kind,
                        file_path: file_path.to_string(),
                        line: line_no,
                        language: rules.lang.to_string(),
                        feature_path: feature.clone(),
                    });
                    containers.push(depth);
                    break;
                }
            }

            if defined_on_line.is_none() {
                for re in &rules.containers {
                    if re.is_match(line) {
                        containers.push(depth);
                        defined_on_line = Some(String::new());
                        break;
                    }
                }
            }

            if defined_on_line.is_none() {
                for re in &rules.methods {
                    if let Some(caps) = re.captures(line) {
                        let name = caps[1].to_string();
                        if is_keyword(&name, rules.lang) {
                            continue;
                        }
                        defined_on_line = Some(name.clone());
                        symbols.push(Symbol {
                            name: name.clone(),
                            kind: SymbolKind::Method,
                            file_path: file_path.to_string(),
                            line: line_no,
                            language: rules.lang.to_string(),
                            feature_path: feature.clone(),
                        });
                        current_fn = Some((name, line_no, depth));
                        break;
                    }
                }
            }

            if defined_on_line.is_none() {
                for re in &rules.functions {
                    if let Some(caps) = re.captures(line) {
                        let name = caps[1].to_string();
                        if is_keyword(&name, rules.lang) {
                            continue;
                        }
                        let kind = if containers.is_empty() {
                            SymbolKind::Function
                        } else {
                            SymbolKind::Method
                        };
                        defined_on_line = Some(name.clone());
                        symbols.push(Symbol {
                            name: name.clone(),
                            kind,
                            file_path: file_path.to_string(),
                            line: line_no,
                            language: rules.lang.to_string(),
                            feature_path: feature.clone(),
                        });
                        current_fn = Some((name, line_no, depth));
                        break;
                    }
                }
            }

            // References: identifiers followed by `(`, excluding the line's
            // own definition and keywords.
            for caps in self.reference.captures_iter(line) {
                let name = caps.get(1).unwrap().as_str();
                if is_keyword(name, rules.lang) {
                    continue;
                }
                if defined_on_line.as_deref() == Some(name) {
                    continue;
                }
                let start = caps.get(1).unwrap().start();
                if is_definition_site(line, start) {
                    continue;
                }
                let (caller_name, caller_line) = match &current_fn {
                    Some((n, l, _)) => (n.clone(), *l),
                    None => (String::new(), 0),
                };
                references.push(Reference {
                    callee_name: name.to_string(),
                    caller_name,
                    caller_file: file_path.to_string(),
                    caller_line,
                    call_site_file: file_path.to_string(),
                    call_site_line: line_no,
                    context: Some(trimmed.to_string()),
                });
            }

            // Update nesting after the line's matches were classified.
            let opens = line.matches('{').count();
            let closes = line.matches('}').count();
            depth = depth + opens;
            depth = depth.saturating_sub(closes);

            while let Some(open_depth) = containers.last() {
                if depth <= *open_depth {
                    containers.pop();
                } else {
                    break;
                }
            }
            if let Some((_, _, open_depth)) = &current_fn {
                if depth <= *open_depth {
                    current_fn = None;
                }
            }
        }

        (symbols, references)
    }

    /// Python is indentation-scoped; classes and defs nest by indent.
    fn scan_python(
        &self,
        file_path: &str,
        content: &str,
        rules: &LanguageRules,
    ) -> (Vec<Symbol>, Vec<Reference>) {
        let mut symbols = Vec::new();
        let mut references = Vec::new();
        let feature = feature_path(file_path);

        let mut class_stack: Vec<usize> = Vec::new();
        let mut current_fn: Option<(String, u32, usize)> = None;

        for (idx, raw_line) in content.lines().enumerate() {
            let line_no = (idx + 1) as u32;
            let line = strip_line_comment(raw_line);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let indent = line.len() - line.trim_start().len();

            while let Some(class_indent) = class_stack.last() {
                if indent <= *class_indent {
                    class_stack.pop();
                } else {
                    break;
                }
            }
            if let Some((_, _, fn_indent)) = &current_fn {
                if indent <= *fn_indent {
                    current_fn = None;
                }
            }

            let mut defined_on_line: Option<String> = None;

            for (re, kind) in &rules.types {
                if let Some(caps) = re.captures(line) {
                    let name = caps[1].to_string();
                    defined_on_line = Some(name.clone());
                    symbols.push(Symbol {
                        name,
                        kind: *kind,
                        file_path: file_path.to_string(),
                        line: line_no,
                        language: rules.lang.to_string(),
                        feature_path: feature.clone(),
                    });
                    class_stack.push(indent);
                    break;
                }
            }

            if defined_on_line.is_none() {
                for re in &rules.functions {
                    if let Some(caps) = re.captures(line) {
                        let name = caps[1].to_string();
                        if is_keyword(&name, rules.lang) {
                            continue;
                        }
                        let kind = if class_stack.is_empty() {
                            SymbolKind::Function
                        } else {
                            SymbolKind::Method
                        };
                        defined_on_line = Some(name.clone());
                        symbols.push(Symbol {
                            name: name.clone(),
                            kind,
                            file_path: file_path.to_string(),
                            line: line_no,
                            language: rules.lang.to_string(),
                            feature_path: feature.clone(),
                        });
                        current_fn = Some((name, line_no, indent));
                        break;
                    }
                }
            }

            for caps in self.reference.captures_iter(line) {
                let name = caps.get(1).unwrap().as_str();
                if is_keyword(name, rules.lang) {
                    continue;
                }
                if defined_on_line.as_deref() == Some(name) {
                    continue;
                }
                let start = caps.get(1).unwrap().start();
                if is_definition_site(line, start) {
                    continue;
                }
                let (caller_name, caller_line) = match &current_fn {
                    Some((n, l, _)) => (n.clone(), *l),
                    None => (String::new(), 0),
                };
                references.push(Reference {
                    callee_name: name.to_string(),
                    caller_name,
                    caller_file: file_path.to_string(),
                    caller_line,
                    call_site_file: file_path.to_string(),
                    call_site_line: line_no,
                    context: Some(trimmed.to_string()),
                });
            }
        }

        (symbols, references)
    }
}

/// True when the identifier at `start` is the name in a definition form
/// (preceded by `fn`, `func`, `def`, or `function`).
fn is_definition_site(line: &str, start: usize) -> bool {
    let before = &line[..start];
    let before = before.trim_end();
    before.ends_with("fn")
        || before.ends_with("func")
        || before.ends_with("def")
        || before.ends_with("function")
}

fn typedef_close_re() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\}\s*([A-Za-z_][A-Za-z0-9_]*)\s*;").unwrap())
}

fn strip_line_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Map a path to the extractor language tag.
fn language_for_path(file_path: &str) -> Option<&'static str> {
    let ext = Path::new(file_path).extension()?.to_str()?;
    match ext {
        "go" => Some("go"),
        "js" | "jsx" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "py" => Some("python"),
        "php" => Some("php"),
        "c" | "h" => Some("c"),
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => Some("cpp"),
        "rs" => Some("rust"),
        "zig" => Some("zig"),
        _ => None,
    }
}

/// Directory-derived feature label, e.g. `src/handlers` for
/// `src/handlers/auth.go`. Root-level files carry no feature path.
fn feature_path(file_path: &str) -> Option<String> {
    let parent = Path::new(file_path).parent()?;
    if parent.as_os_str().is_empty() {
        return None;
    }
    Some(parent.to_string_lossy().replace('\\', "/"))
}

fn build_rules() -> Vec<LanguageRules> {
    let re = |s: &str| Regex::new(s).unwrap();
    vec![
        LanguageRules {
            lang: "go",
            functions: vec![re(r"^func\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(")],
            methods: vec![re(r"^func\s+\([^)]+\)\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(")],
            types: vec![
                (re(r"^type\s+([A-Za-z_][A-Za-z0-9_]*)\s+interface\b"), SymbolKind::Interface),
                (re(r"^type\s+([A-Za-z_][A-Za-z0-9_]*)\s+struct\b"), SymbolKind::Type),
            ],
            containers: vec![],
        },
        LanguageRules {
            lang: "javascript",
            functions: vec![
                re(r"^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\("),
                re(r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s+)?\([^)]*\)\s*=>"),
            ],
            methods: vec![],
            types: vec![(
                re(r"^\s*(?:export\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)"),
                SymbolKind::Class,
            )],
            containers: vec![],
        },
        LanguageRules {
            lang: "typescript",
            functions: vec![
                re(r"^\s*(?:export\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\("),
                re(r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s+)?\([^)]*\)\s*=>"),
            ],
            methods: vec![],
            types: vec![
                (
                    re(r"^\s*(?:export\s+)?interface\s+([A-Za-z_$][A-Za-z0-9_$]*)"),
                    SymbolKind::Interface,
                ),
                (
                    re(r"^\s*(?:export\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)"),
                    SymbolKind::Class,
                ),
            ],
            containers: vec![],
        },
        LanguageRules {
            lang: "python",
            functions: vec![re(r"^\s*(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(")],
            methods: vec![],
            types: vec![(
                re(r"^\s*class\s+([A-Za-z_][A-Za-z0-9_]*)"),
                SymbolKind::Class,
            )],
            containers: vec![],
        },
        LanguageRules {
            lang: "php",
            functions: vec![re(
                r"^\s*(?:public\s+|private\s+|protected\s+|static\s+)*function\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(",
            )],
            methods: vec![],
            types: vec![
                (re(r"^\s*interface\s+([A-Za-z_][A-Za-z0-9_]*)"), SymbolKind::Interface),
                (
                    re(r"^\s*(?:abstract\s+|final\s+)?class\s+([A-Za-z_][A-Za-z0-9_]*)"),
                    SymbolKind::Class,
                ),
                (re(r"^\s*trait\s+([A-Za-z_][A-Za-z0-9_]*)"), SymbolKind::Interface),
            ],
            containers: vec![],
        },
        LanguageRules {
            lang: "c",
            functions: vec![re(
                r"^[A-Za-z_][A-Za-z0-9_\s\*]*[\s\*]([A-Za-z_][A-Za-z0-9_]*)\s*\([^;]*$",
            )],
            methods: vec![],
            types: vec![
                (re(r"^struct\s+([A-Za-z_][A-Za-z0-9_]*)\s*\{"), SymbolKind::Type),
                (re(r"^union\s+([A-Za-z_][A-Za-z0-9_]*)\s*\{"), SymbolKind::Type),
                (re(r"^enum\s+([A-Za-z_][A-Za-z0-9_]*)\s*\{"), SymbolKind::Type),
            ],
            containers: vec![],
        },
        LanguageRules {
            lang: "cpp",
            functions: vec![re(
                r"^\s*[A-Za-z_][A-Za-z0-9_:<>,\s\*&]*[\s\*&]([A-Za-z_][A-Za-z0-9_]*)\s*\([^)]*\)\s*(?:const\s*)?\{",
            )],
            methods: vec![],
            types: vec![
                (re(r"^\s*enum\s+(?:class\s+)?([A-Za-z_][A-Za-z0-9_]*)"), SymbolKind::Type),
                (re(r"^\s*class\s+([A-Za-z_][A-Za-z0-9_]*)"), SymbolKind::Class),
                (re(r"^\s*struct\s+([A-Za-z_][A-Za-z0-9_]*)"), SymbolKind::Class),
            ],
            containers: vec![],
        },
        LanguageRules {
            lang: "rust",
            functions: vec![re(
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+\S+\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)",
            )],
            methods: vec![],
            types: vec![
                (re(r"^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+([A-Za-z_][A-Za-z0-9_]*)"), SymbolKind::Interface),
                (re(r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+([A-Za-z_][A-Za-z0-9_]*)"), SymbolKind::Type),
                (re(r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+([A-Za-z_][A-Za-z0-9_]*)"), SymbolKind::Type),
            ],
            containers: vec![re(r"^\s*impl\b")],
        },
        LanguageRules {
            lang: "zig",
            functions: vec![re(
                r"^\s*(?:(?:pub|export|extern|inline)\s+)*fn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(",
            )],
            methods: vec![],
            types: vec![(
                re(r"^\s*(?:pub\s+)?const\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:packed\s+|extern\s+)?(?:struct|enum|union)\b"),
                SymbolKind::Type,
            )],
            containers: vec![],
        },
    ]
}
