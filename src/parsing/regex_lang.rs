use once_cell::sync::Lazy;
use regex::Regex;

use super::generic::scan_comments;
use super::types::{ClassInfo, CodeFile, FunctionInfo, ImportInfo, VariableInfo};
use super::Parser;

/// Regex-level extraction rules for one language. Used directly for
/// languages without a grammar, and as the fallback when a grammar extractor
/// errors out.
pub struct RegexSpec {
    pub language: &'static str,
    pub function: Option<&'static Lazy<Regex>>,
    pub class: Option<&'static Lazy<Regex>>,
    pub variable: Option<&'static Lazy<Regex>>,
    pub import: Option<&'static Lazy<Regex>>,
    pub line_comments: &'static [&'static str],
    pub block_comments: Option<(&'static str, &'static str)>,
    pub doc_prefixes: &'static [&'static str],
    /// Python-style: block extent follows indentation, not braces
    pub indent_blocks: bool,
}

macro_rules! lazy_re {
    ($name:ident, $pattern:literal) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($pattern).unwrap());
    };
}

lazy_re!(GO_FUNC, r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*\(");
lazy_re!(GO_TYPE, r"^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b");
lazy_re!(GO_VAR, r"^(?:var|const)\s+([A-Za-z_]\w*)\b");
lazy_re!(GO_IMPORT, r#"^import\s+(?:\(|"|\w)"#);

lazy_re!(RUST_FUNC, r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)");
lazy_re!(
    RUST_TYPE,
    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+([A-Za-z_]\w*)"
);
lazy_re!(
    RUST_VAR,
    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?:mut\s+)?([A-Za-z_]\w*)\s*:"
);
lazy_re!(RUST_IMPORT, r"^\s*use\s+\S");

lazy_re!(PY_FUNC, r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(");
lazy_re!(PY_CLASS, r"^\s*class\s+([A-Za-z_]\w*)\s*[(:]");
lazy_re!(PY_VAR, r"^([A-Za-z_]\w*)\s*=\s*\S");
lazy_re!(PY_IMPORT, r"^\s*(?:import|from)\s+\S");

lazy_re!(
    JS_FUNC,
    r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\("
);
lazy_re!(JS_CLASS, r"^\s*(?:export\s+)?(?:default\s+)?class\s+([A-Za-z_$][\w$]*)");
lazy_re!(
    JS_VAR,
    r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)"
);
lazy_re!(JS_IMPORT, r#"^\s*import\s+.+from\s+['"]|^\s*import\s+['"]"#);

lazy_re!(
    TS_CLASS,
    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:class|interface)\s+([A-Za-z_$][\w$]*)"
);

lazy_re!(
    JAVA_FUNC,
    r"^\s*(?:public|private|protected|static|final|synchronized|abstract|\s)+[\w<>\[\],\s]+\s+(\w+)\s*\([^;]*$"
);
lazy_re!(JAVA_CLASS, r"^\s*(?:public\s+|final\s+|abstract\s+)*(?:class|interface|enum)\s+(\w+)");
lazy_re!(JAVA_IMPORT, r"^\s*import\s+[\w.]+;");

lazy_re!(C_FUNC, r"^[A-Za-z_][\w\s\*]*?([A-Za-z_]\w*)\s*\([^;]*\)\s*\{?\s*$");
lazy_re!(C_TYPE, r"^\s*(?:typedef\s+)?(?:struct|enum|union)\s+([A-Za-z_]\w*)");
lazy_re!(C_IMPORT, r#"^\s*#\s*include\s+[<"]"#);

lazy_re!(RUBY_FUNC, r"^\s*def\s+(?:self\.)?([A-Za-z_]\w*[?!]?)");
lazy_re!(RUBY_CLASS, r"^\s*(?:class|module)\s+([A-Z]\w*)");
lazy_re!(RUBY_IMPORT, r#"^\s*require(?:_relative)?\s+['"]"#);

lazy_re!(PHP_FUNC, r"^\s*(?:public\s+|private\s+|protected\s+|static\s+)*function\s+([A-Za-z_]\w*)\s*\(");
lazy_re!(PHP_CLASS, r"^\s*(?:abstract\s+|final\s+)?(?:class|interface|trait)\s+([A-Za-z_]\w*)");
lazy_re!(PHP_IMPORT, r"^\s*(?:use|require|include)(?:_once)?\s+\S");

lazy_re!(SH_FUNC, r"^\s*(?:function\s+)?([A-Za-z_]\w*)\s*\(\)\s*\{?");
lazy_re!(SH_VAR, r"^([A-Za-z_]\w*)=");

lazy_re!(CS_FUNC, r"^\s*(?:public|private|protected|internal|static|async|override|virtual|\s)+[\w<>\[\],\s]+\s+(\w+)\s*\(");
lazy_re!(CS_CLASS, r"^\s*(?:public\s+|internal\s+|abstract\s+|sealed\s+|static\s+|partial\s+)*(?:class|interface|struct|record)\s+(\w+)");
lazy_re!(CS_IMPORT, r"^\s*using\s+[\w.]+;");

pub fn spec_for(language: &str) -> Option<&'static RegexSpec> {
    SPECS.iter().find(|spec| spec.language == language)
}

pub fn all_specs() -> &'static [RegexSpec] {
    SPECS
}

static SPECS: &[RegexSpec] = &[
    RegexSpec {
        language: "go",
        function: Some(&GO_FUNC),
        class: Some(&GO_TYPE),
        variable: Some(&GO_VAR),
        import: Some(&GO_IMPORT),
        line_comments: &["//"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &[],
        indent_blocks: false,
    },
    RegexSpec {
        language: "rust",
        function: Some(&RUST_FUNC),
        class: Some(&RUST_TYPE),
        variable: Some(&RUST_VAR),
        import: Some(&RUST_IMPORT),
        line_comments: &["//"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &["///", "//!"],
        indent_blocks: false,
    },
    RegexSpec {
        language: "python",
        function: Some(&PY_FUNC),
        class: Some(&PY_CLASS),
        variable: Some(&PY_VAR),
        import: Some(&PY_IMPORT),
        line_comments: &["#"],
        block_comments: None,
        doc_prefixes: &[],
        indent_blocks: true,
    },
    RegexSpec {
        language: "javascript",
        function: Some(&JS_FUNC),
        class: Some(&JS_CLASS),
        variable: Some(&JS_VAR),
        import: Some(&JS_IMPORT),
        line_comments: &["//"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &[],
        indent_blocks: false,
    },
    RegexSpec {
        language: "typescript",
        function: Some(&JS_FUNC),
        class: Some(&TS_CLASS),
        variable: Some(&JS_VAR),
        import: Some(&JS_IMPORT),
        line_comments: &["//"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &[],
        indent_blocks: false,
    },
    RegexSpec {
        language: "java",
        function: Some(&JAVA_FUNC),
        class: Some(&JAVA_CLASS),
        variable: None,
        import: Some(&JAVA_IMPORT),
        line_comments: &["//"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &["/**"],
        indent_blocks: false,
    },
    RegexSpec {
        language: "c",
        function: Some(&C_FUNC),
        class: Some(&C_TYPE),
        variable: None,
        import: Some(&C_IMPORT),
        line_comments: &["//"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &[],
        indent_blocks: false,
    },
    RegexSpec {
        language: "cpp",
        function: Some(&C_FUNC),
        class: Some(&CS_CLASS),
        variable: None,
        import: Some(&C_IMPORT),
        line_comments: &["//"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &[],
        indent_blocks: false,
    },
    RegexSpec {
        language: "csharp",
        function: Some(&CS_FUNC),
        class: Some(&CS_CLASS),
        variable: None,
        import: Some(&CS_IMPORT),
        line_comments: &["//"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &["///"],
        indent_blocks: false,
    },
    RegexSpec {
        language: "ruby",
        function: Some(&RUBY_FUNC),
        class: Some(&RUBY_CLASS),
        variable: None,
        import: Some(&RUBY_IMPORT),
        line_comments: &["#"],
        block_comments: None,
        doc_prefixes: &[],
        indent_blocks: true,
    },
    RegexSpec {
        language: "php",
        function: Some(&PHP_FUNC),
        class: Some(&PHP_CLASS),
        variable: None,
        import: Some(&PHP_IMPORT),
        line_comments: &["//", "#"],
        block_comments: Some(("/*", "*/")),
        doc_prefixes: &["/**"],
        indent_blocks: false,
    },
    RegexSpec {
        language: "shell",
        function: Some(&SH_FUNC),
        class: None,
        variable: Some(&SH_VAR),
        import: None,
        line_comments: &["#"],
        block_comments: None,
        doc_prefixes: &[],
        indent_blocks: false,
    },
];

/// Fallback extractor: line-oriented regex matching plus a best-effort block
/// extent scan. Suspect inputs produce partial results, never a failure.
pub struct RegexParser {
    spec: &'static RegexSpec,
}

impl RegexParser {
    pub fn new(spec: &'static RegexSpec) -> Self {
        Self { spec }
    }
}

impl Parser for RegexParser {
    fn language(&self) -> &str {
        self.spec.language
    }

    fn parse(&self, content: &str, path: &str) -> CodeFile {
        let mut file = CodeFile::skeleton(content, path, self.spec.language);
        let lines: Vec<&str> = content.lines().collect();

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx as u64 + 1;

            if let Some(re) = self.spec.function {
                if let Some(caps) = re.captures(line) {
                    if let Some(name) = caps.get(1) {
                        let end = block_end(&lines, idx, self.spec.indent_blocks);
                        file.functions.push(FunctionInfo {
                            name: name.as_str().to_owned(),
                            start_line: line_no,
                            end_line: end as u64 + 1,
                            signature: Some(signature_of(line)),
                            parameters: parameters_of(line),
                        });
                        continue;
                    }
                }
            }
            if let Some(re) = self.spec.class {
                if let Some(caps) = re.captures(line) {
                    if let Some(name) = caps.get(1) {
                        let end = block_end(&lines, idx, self.spec.indent_blocks);
                        file.classes.push(ClassInfo {
                            name: name.as_str().to_owned(),
                            start_line: line_no,
                            end_line: end as u64 + 1,
                            kind: None,
                        });
                        continue;
                    }
                }
            }
            if let Some(re) = self.spec.variable {
                if let Some(caps) = re.captures(line) {
                    if let Some(name) = caps.get(1) {
                        file.variables.push(VariableInfo {
                            name: name.as_str().to_owned(),
                            start_line: line_no,
                            kind: None,
                        });
                        continue;
                    }
                }
            }
            if let Some(re) = self.spec.import {
                if re.is_match(line) {
                    file.imports.push(ImportInfo {
                        path: line.trim().to_owned(),
                        start_line: line_no,
                    });
                }
            }
        }

        file.comments = scan_comments(
            content,
            self.spec.line_comments,
            self.spec.block_comments,
            self.spec.doc_prefixes,
        );
        file
    }
}

/// First line of a declaration, trimmed, as a displayable signature.
fn signature_of(line: &str) -> String {
    let sig = line.trim().trim_end_matches('{').trim_end();
    let mut sig = sig.to_owned();
    if sig.len() > 200 {
        sig.truncate(200);
    }
    sig
}

/// Comma-split parameter names from the first `(...)` group, best effort.
fn parameters_of(line: &str) -> Vec<String> {
    let open = match line.find('(') {
        Some(pos) => pos,
        None => return Vec::new(),
    };
    let close = match line[open..].find(')') {
        Some(pos) => open + pos,
        None => return Vec::new(),
    };
    line[open + 1..close]
        .split(',')
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Estimate the extent of a block starting at `start` (0-based index into
/// `lines`). Brace languages count `{`/`}` nesting; indent languages follow
/// the indentation of the opening line.
fn block_end(lines: &[&str], start: usize, indent_blocks: bool) -> usize {
    if indent_blocks {
        let base_indent = indent_of(lines[start]);
        let mut end = start;
        for (offset, line) in lines[start + 1..].iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if indent_of(line) <= base_indent {
                break;
            }
            end = start + 1 + offset;
        }
        return end;
    }

    let mut depth: i64 = 0;
    let mut seen_open = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if seen_open && depth <= 0 {
            return start + offset;
        }
        // declaration without a block within the next couple of lines
        if !seen_open && offset >= 2 {
            break;
        }
    }
    if seen_open {
        lines.len().saturating_sub(1)
    } else {
        start
    }
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(language: &str, content: &str) -> CodeFile {
        let spec = spec_for(language).unwrap();
        RegexParser::new(spec).parse(content, "test.src")
    }

    #[test]
    fn go_function_extraction() {
        let file = parse("go", "package main\n\nfunc Hello() {\n\treturn\n}\n");
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].name, "Hello");
        assert_eq!(file.functions[0].start_line, 3);
        assert_eq!(file.functions[0].end_line, 5);
    }

    #[test]
    fn go_method_receiver() {
        let file = parse("go", "func (s *Server) Start(addr string) error {\n}\n");
        assert_eq!(file.functions[0].name, "Start");
        assert_eq!(file.functions[0].parameters, vec!["s *Server"]);
    }

    #[test]
    fn go_struct_and_import() {
        let src = "package main\n\nimport \"fmt\"\n\ntype Server struct {\n\taddr string\n}\n";
        let file = parse("go", src);
        assert_eq!(file.classes.len(), 1);
        assert_eq!(file.classes[0].name, "Server");
        assert_eq!(file.imports.len(), 1);
    }

    #[test]
    fn python_blocks_follow_indentation() {
        let src = "def outer():\n    x = 1\n    return x\n\ntop = 2\n";
        let file = parse("python", src);
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].end_line, 3);
        // module-level assignment only
        assert!(file.variables.iter().any(|v| v.name == "top"));
    }

    #[test]
    fn rust_items() {
        let src = "use std::fmt;\n\npub struct Point;\n\npub async fn run(a: u8) -> u8 {\n    a\n}\n";
        let file = parse("rust", src);
        assert_eq!(file.classes[0].name, "Point");
        assert_eq!(file.functions[0].name, "run");
        assert_eq!(file.imports.len(), 1);
    }

    #[test]
    fn javascript_items() {
        let src = "import fs from 'fs';\n\nexport function load(path) {\n  return fs.readFileSync(path);\n}\n\nclass Loader {}\n";
        let file = parse("javascript", src);
        assert_eq!(file.functions[0].name, "load");
        assert_eq!(file.classes[0].name, "Loader");
        assert_eq!(file.imports.len(), 1);
    }

    #[test]
    fn parse_is_pure() {
        let src = "func A() {}\nfunc B() {}\n";
        let a = parse("go", src);
        let b = parse("go", src);
        assert_eq!(a.functions, b.functions);
        assert_eq!(a.content_hash, b.content_hash);
    }
}
