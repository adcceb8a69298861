use tree_sitter::{Query, QueryCursor};

use super::types::{ClassInfo, CodeFile, CommentInfo, FunctionInfo, ImportInfo, VariableInfo};

/// Grammar-level extraction rules for one language: a tree-sitter grammar
/// plus the queries that pull out functions, classes, variables, imports and
/// comments. Each query captures the whole item as `@item` and optionally its
/// name as `@name`.
pub struct GrammarConfig {
    pub language_ids: &'static [&'static str],
    pub file_extensions: &'static [&'static str],
    pub grammar: fn() -> tree_sitter::Language,
    pub function_query: &'static str,
    pub class_query: &'static str,
    pub variable_query: &'static str,
    pub import_query: &'static str,
    pub comment_query: &'static str,
    pub doc_prefixes: &'static [&'static str],
}

pub fn rust_grammar_config() -> GrammarConfig {
    GrammarConfig {
        language_ids: &["rust"],
        file_extensions: &["rs"],
        grammar: tree_sitter_rust::language,
        function_query: "(function_item name: (identifier) @name) @item",
        class_query: "[
            (struct_item name: (type_identifier) @name)
            (enum_item name: (type_identifier) @name)
            (trait_item name: (type_identifier) @name)
        ] @item",
        variable_query: "[
            (const_item name: (identifier) @name)
            (static_item name: (identifier) @name)
        ] @item",
        import_query: "(use_declaration) @item",
        comment_query: "[(line_comment) (block_comment)] @item",
        doc_prefixes: &["///", "//!", "/**"],
    }
}

pub fn go_grammar_config() -> GrammarConfig {
    GrammarConfig {
        language_ids: &["go"],
        file_extensions: &["go"],
        grammar: tree_sitter_go::language,
        function_query: "[
            (function_declaration name: (identifier) @name)
            (method_declaration name: (field_identifier) @name)
        ] @item",
        class_query: "(type_declaration (type_spec name: (type_identifier) @name)) @item",
        variable_query: "[
            (var_declaration (var_spec name: (identifier) @name))
            (const_declaration (const_spec name: (identifier) @name))
        ] @item",
        import_query: "(import_declaration) @item",
        comment_query: "(comment) @item",
        doc_prefixes: &[],
    }
}

pub fn python_grammar_config() -> GrammarConfig {
    GrammarConfig {
        language_ids: &["python"],
        file_extensions: &["py", "pyi"],
        grammar: tree_sitter_python::language,
        function_query: "(function_definition name: (identifier) @name) @item",
        class_query: "(class_definition name: (identifier) @name) @item",
        variable_query: "(module (expression_statement (assignment left: (identifier) @name)) @item)",
        import_query: "[(import_statement) (import_from_statement)] @item",
        comment_query: "(comment) @item",
        doc_prefixes: &[],
    }
}

pub fn javascript_grammar_config() -> GrammarConfig {
    GrammarConfig {
        language_ids: &["javascript"],
        file_extensions: &["js", "mjs", "cjs", "jsx"],
        grammar: tree_sitter_javascript::language,
        function_query: "[
            (function_declaration name: (identifier) @name)
            (generator_function_declaration name: (identifier) @name)
            (method_definition name: (property_identifier) @name)
        ] @item",
        class_query: "(class_declaration name: (identifier) @name) @item",
        variable_query: "(variable_declarator name: (identifier) @name) @item",
        import_query: "(import_statement) @item",
        comment_query: "(comment) @item",
        doc_prefixes: &["/**"],
    }
}

pub fn typescript_grammar_config() -> GrammarConfig {
    GrammarConfig {
        language_ids: &["typescript"],
        file_extensions: &["ts", "tsx", "mts", "cts"],
        grammar: tree_sitter_typescript::language_typescript,
        function_query: "[
            (function_declaration name: (identifier) @name)
            (method_definition name: (property_identifier) @name)
        ] @item",
        class_query: "[
            (class_declaration name: (type_identifier) @name)
            (interface_declaration name: (type_identifier) @name)
        ] @item",
        variable_query: "(variable_declarator name: (identifier) @name) @item",
        import_query: "(import_statement) @item",
        comment_query: "(comment) @item",
        doc_prefixes: &["/**"],
    }
}

pub fn grammar_configs() -> Vec<GrammarConfig> {
    vec![
        rust_grammar_config(),
        go_grammar_config(),
        python_grammar_config(),
        javascript_grammar_config(),
        typescript_grammar_config(),
    ]
}

/// Grammar-based extractor. Walks the syntax tree with the configured
/// queries and emits positional records. Inputs with syntax errors still
/// produce a partial result: tree-sitter yields a tree with error nodes and
/// the queries simply match what they can.
pub struct GrammarParser {
    language_tag: &'static str,
    grammar: fn() -> tree_sitter::Language,
    function_query: Query,
    class_query: Query,
    variable_query: Option<Query>,
    import_query: Query,
    comment_query: Query,
    doc_prefixes: &'static [&'static str],
}

impl GrammarParser {
    /// Compile the queries once up front. A config whose queries do not
    /// compile against its own grammar is a bug; the registry treats the
    /// error by falling back to the regex parser for that language.
    pub fn from_config(config: &GrammarConfig) -> anyhow::Result<Self> {
        let language = (config.grammar)();
        let compile = |source: &str| Query::new(language, source);
        Ok(Self {
            language_tag: config.language_ids[0],
            grammar: config.grammar,
            function_query: compile(config.function_query)?,
            class_query: compile(config.class_query)?,
            variable_query: if config.variable_query.is_empty() {
                None
            } else {
                Some(compile(config.variable_query)?)
            },
            import_query: compile(config.import_query)?,
            comment_query: compile(config.comment_query)?,
            doc_prefixes: config.doc_prefixes,
        })
    }

    pub fn language(&self) -> &'static str {
        self.language_tag
    }

    /// Parse and extract. Returns None when tree-sitter cannot produce a
    /// tree at all (timeout/alloc), which the safe wrapper turns into a
    /// regex fallback.
    pub fn extract(&self, content: &str, path: &str) -> Option<CodeFile> {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language((self.grammar)()).ok()?;
        let tree = parser.parse(content, None)?;
        let root = tree.root_node();
        let bytes = content.as_bytes();

        let mut file = CodeFile::skeleton(content, path, self.language_tag);

        for (item, name) in captures(&self.function_query, root, bytes) {
            let name = match name {
                Some(name) => name,
                None => continue,
            };
            let (start, end) = node_lines(&item);
            let first_line = node_text(&item, content)
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_owned();
            file.functions.push(FunctionInfo {
                name: node_text(&name, content).to_owned(),
                start_line: start,
                end_line: end,
                signature: Some(truncated(first_line, 200)),
                parameters: parameter_names(&item, content),
            });
        }

        for (item, name) in captures(&self.class_query, root, bytes) {
            let name = match name {
                Some(name) => name,
                None => continue,
            };
            let (start, end) = node_lines(&item);
            file.classes.push(ClassInfo {
                name: node_text(&name, content).to_owned(),
                start_line: start,
                end_line: end,
                kind: Some(kind_label(item.kind())),
            });
        }

        if let Some(query) = &self.variable_query {
            for (item, name) in captures(query, root, bytes) {
                let name = match name {
                    Some(name) => name,
                    None => continue,
                };
                let (start, _) = node_lines(&item);
                file.variables.push(VariableInfo {
                    name: node_text(&name, content).to_owned(),
                    start_line: start,
                    kind: Some(kind_label(item.kind())),
                });
            }
        }

        for (item, _) in captures(&self.import_query, root, bytes) {
            let (start, _) = node_lines(&item);
            file.imports.push(ImportInfo {
                path: node_text(&item, content).trim().to_owned(),
                start_line: start,
            });
        }

        file.comments = self.extract_comments(root, content, bytes);
        Some(file)
    }

    fn extract_comments(
        &self,
        root: tree_sitter::Node<'_>,
        content: &str,
        bytes: &[u8],
    ) -> Vec<CommentInfo> {
        let mut comments: Vec<CommentInfo> = Vec::new();
        for (item, _) in captures(&self.comment_query, root, bytes) {
            let (start, end) = node_lines(&item);
            let raw = node_text(&item, content);
            let doc = self.doc_prefixes.iter().any(|p| raw.starts_with(p));
            let text = clean_comment_text(raw);
            match comments.last_mut() {
                // runs of adjacent single-line comments merge into one record
                Some(last) if last.end_line + 1 == start && last.doc == doc => {
                    last.text.push('\n');
                    last.text.push_str(&text);
                    last.end_line = end;
                }
                _ => comments.push(CommentInfo {
                    text,
                    start_line: start,
                    end_line: end,
                    doc,
                }),
            }
        }
        comments
    }
}

/// Run a query and pair every `@item` capture with its `@name` capture.
fn captures<'tree>(
    query: &Query,
    root: tree_sitter::Node<'tree>,
    bytes: &[u8],
) -> Vec<(tree_sitter::Node<'tree>, Option<tree_sitter::Node<'tree>>)> {
    let item_index = query.capture_index_for_name("item");
    let name_index = query.capture_index_for_name("name");
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();
    for matched in cursor.matches(query, root, bytes) {
        let mut item = None;
        let mut name = None;
        for capture in matched.captures {
            if Some(capture.index) == item_index {
                item = Some(capture.node);
            } else if Some(capture.index) == name_index {
                name = Some(capture.node);
            }
        }
        if let Some(item) = item {
            out.push((item, name));
        }
    }
    out
}

fn node_lines(node: &tree_sitter::Node<'_>) -> (u64, u64) {
    (
        node.start_position().row as u64 + 1,
        node.end_position().row as u64 + 1,
    )
}

fn node_text<'a>(node: &tree_sitter::Node<'_>, content: &'a str) -> &'a str {
    content.get(node.byte_range()).unwrap_or_default()
}

fn truncated(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

/// Parameter names from the first `parameters`-ish child, comma split.
fn parameter_names(item: &tree_sitter::Node<'_>, content: &str) -> Vec<String> {
    let mut cursor = item.walk();
    let params = item
        .children(&mut cursor)
        .find(|child| child.kind().contains("parameter"));
    let params = match params {
        Some(node) => node,
        None => return Vec::new(),
    };
    node_text(&params, content)
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty())
        .collect()
}

/// `struct_item` -> `struct`, `class_declaration` -> `class`, ...
fn kind_label(kind: &str) -> String {
    kind.trim_end_matches("_item")
        .trim_end_matches("_declaration")
        .trim_end_matches("_definition")
        .trim_end_matches("_spec")
        .to_owned()
}

fn clean_comment_text(raw: &str) -> String {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c == '/' || c == '*' || c == '#' || c == '!')
                .trim_end_matches("*/")
                .trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(config: GrammarConfig, content: &str) -> CodeFile {
        GrammarParser::from_config(&config)
            .unwrap()
            .extract(content, "test.src")
            .unwrap()
    }

    #[test]
    fn go_function_at_line_one() {
        let file = parse(go_grammar_config(), "func Hello() {}\n");
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].name, "Hello");
        assert_eq!(file.functions[0].start_line, 1);
    }

    #[test]
    fn go_struct_method_and_import() {
        let src = r#"package main

import "fmt"

type Greeter struct {
	name string
}

func (g Greeter) Greet() {
	fmt.Println(g.name)
}
"#;
        let file = parse(go_grammar_config(), src);
        assert_eq!(file.classes.len(), 1);
        assert_eq!(file.classes[0].name, "Greeter");
        assert_eq!(file.classes[0].start_line, 5);
        assert_eq!(file.classes[0].end_line, 7);
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].name, "Greet");
        assert_eq!(file.imports.len(), 1);
    }

    #[test]
    fn rust_items_and_doc_comments() {
        let src = "/// Adds one.\npub fn add_one(x: i64) -> i64 {\n    x + 1\n}\n\nstruct Pair(u8, u8);\n";
        let file = parse(rust_grammar_config(), src);
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].name, "add_one");
        assert_eq!(file.functions[0].start_line, 2);
        assert_eq!(file.functions[0].end_line, 4);
        assert!(file.functions[0]
            .signature
            .as_deref()
            .unwrap()
            .starts_with("pub fn add_one"));
        assert_eq!(file.classes.len(), 1);
        assert_eq!(file.comments.len(), 1);
        assert!(file.comments[0].doc);
        assert_eq!(file.comments[0].text, "Adds one.");
    }

    #[test]
    fn python_class_and_assignment() {
        let src = "VERSION = \"1.0\"\n\nclass Runner:\n    def run(self):\n        pass\n";
        let file = parse(python_grammar_config(), src);
        assert_eq!(file.classes[0].name, "Runner");
        assert_eq!(file.functions[0].name, "run");
        assert!(file.variables.iter().any(|v| v.name == "VERSION"));
    }

    #[test]
    fn typescript_interfaces_count_as_classes() {
        let src = "interface Shape {\n  area(): number;\n}\n\nclass Circle {\n  area(): number { return 1; }\n}\n";
        let file = parse(typescript_grammar_config(), src);
        let names: Vec<_> = file.classes.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Shape"));
        assert!(names.contains(&"Circle"));
    }

    #[test]
    fn broken_input_still_yields_partial_result() {
        let src = "func Good() {}\n\nfunc Broken( {\n";
        let file = parse(go_grammar_config(), src);
        assert!(file.functions.iter().any(|f| f.name == "Good"));
    }
}
