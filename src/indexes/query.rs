use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::{
    AllQuery, BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser, TermQuery,
};
use tantivy::schema::{Document, Field, IndexRecordOption};
use tantivy::{SnippetGenerator, Term};
use tracing::debug;

use crate::errors::ToolResult;

use super::store::SearchStore;

const SNIPPET_MAX_CHARS: usize = 200;

/// A typed query against the code index. Empty text with no filters matches
/// every document.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SearchQuery {
    #[serde(default)]
    pub text: String,
    /// file | function | class | variable | comment | chunk
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Repository name or id
    #[serde(default)]
    pub repository: Option<String>,
    /// Path filter, tokenized on separators
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub fuzzy: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    50
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            doc_type: None,
            language: None,
            repository: None,
            path: None,
            fuzzy: false,
            max_results: default_max_results(),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct SearchResult {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub repo_id: String,
    pub repo_name: String,
    pub file_path: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
    pub snippet: String,
    pub start_line: u64,
    pub end_line: u64,
    pub score: f32,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub highlights: HashMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SearchStore {
    /// Compile and execute a `SearchQuery`, ranked by relevance, with
    /// highlight fragments for the analyzed fields.
    pub fn search(&self, query: &SearchQuery, fuzzy_distance: u8) -> ToolResult<Vec<SearchResult>> {
        let searcher = self.reader.searcher();
        let compiled = self.compile(query, fuzzy_distance);
        let limit = query.max_results.max(1);

        let top_docs = searcher
            .search(&compiled, &TopDocs::with_limit(limit))
            .map_err(crate::errors::ToolError::from)?;

        // highlight generators follow the text clause only; filters do not
        // produce highlights
        let mut content_snippets = None;
        let mut name_snippets = None;
        if !query.text.trim().is_empty() {
            if let Some(text_query) = self.text_clause(query, fuzzy_distance) {
                content_snippets = SnippetGenerator::create(
                    &searcher,
                    text_query.as_ref(),
                    self.schema.content,
                )
                .ok()
                .map(|mut gen| {
                    gen.set_max_num_chars(SNIPPET_MAX_CHARS);
                    gen
                });
                name_snippets =
                    SnippetGenerator::create(&searcher, text_query.as_ref(), self.schema.name).ok();
            }
        }

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc = searcher.doc(address).map_err(crate::errors::ToolError::from)?;
            results.push(self.read_result(doc, score, &content_snippets, &name_snippets));
        }
        debug!(
            text = %query.text,
            results = results.len(),
            fuzzy = query.fuzzy,
            "search executed"
        );
        Ok(results)
    }

    /// Compile the full query: the text clause ANDed with one term filter
    /// per populated field.
    fn compile(&self, query: &SearchQuery, fuzzy_distance: u8) -> Box<dyn Query> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        if let Some(text_query) = self.text_clause(query, fuzzy_distance) {
            clauses.push((Occur::Must, text_query));
        }
        if let Some(doc_type) = filled(&query.doc_type) {
            clauses.push((Occur::Must, term_query(self.schema.doc_type, doc_type)));
        }
        if let Some(language) = filled(&query.language) {
            clauses.push((Occur::Must, term_query(self.schema.language, language)));
        }
        if let Some(repository) = filled(&query.repository) {
            // a repository filter matches either the id or the display name
            let either: Vec<Box<dyn Query>> = vec![
                term_query(self.schema.repo_id, repository),
                term_query(self.schema.repo_name, repository),
            ];
            clauses.push((Occur::Must, Box::new(BooleanQuery::union(either))));
        }
        if let Some(path) = filled(&query.path) {
            let tokens: Vec<(Occur, Box<dyn Query>)> = tokenize(path)
                .into_iter()
                .map(|token| {
                    (
                        Occur::Must,
                        term_query(self.schema.file_path, &token) as Box<dyn Query>,
                    )
                })
                .collect();
            if !tokens.is_empty() {
                clauses.push((Occur::Must, Box::new(BooleanQuery::new(tokens))));
            }
        }

        if clauses.is_empty() {
            return Box::new(AllQuery);
        }
        Box::new(BooleanQuery::new(clauses))
    }

    /// The scored part of the query: a disjunction of field matches over
    /// content, name and file_path. Exact terms by default, edit-distance
    /// matches when fuzzy is requested.
    fn text_clause(&self, query: &SearchQuery, fuzzy_distance: u8) -> Option<Box<dyn Query>> {
        let text = query.text.trim();
        if text.is_empty() {
            return None;
        }
        let fields = [self.schema.content, self.schema.name, self.schema.file_path];

        if query.fuzzy {
            let mut token_clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            for token in tokenize(text) {
                let per_field: Vec<Box<dyn Query>> = fields
                    .iter()
                    .map(|field| {
                        Box::new(FuzzyTermQuery::new(
                            Term::from_field_text(*field, &token),
                            fuzzy_distance,
                            true,
                        )) as Box<dyn Query>
                    })
                    .collect();
                token_clauses.push((Occur::Must, Box::new(BooleanQuery::union(per_field))));
            }
            if token_clauses.is_empty() {
                return None;
            }
            return Some(Box::new(BooleanQuery::new(token_clauses)));
        }

        // the query parser gives us per-token disjunction across the three
        // fields; fall back to plain term matching when the text uses parser
        // syntax it cannot digest
        let parser = QueryParser::for_index(&self.index, fields.to_vec());
        match parser.parse_query(text) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                let mut token_clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
                for token in tokenize(text) {
                    let per_field: Vec<Box<dyn Query>> = fields
                        .iter()
                        .map(|field| term_query_lower(*field, &token))
                        .collect();
                    token_clauses.push((Occur::Must, Box::new(BooleanQuery::union(per_field))));
                }
                if token_clauses.is_empty() {
                    None
                } else {
                    Some(Box::new(BooleanQuery::new(token_clauses)))
                }
            }
        }
    }

    fn read_result(
        &self,
        doc: Document,
        score: f32,
        content_snippets: &Option<SnippetGenerator>,
        name_snippets: &Option<SnippetGenerator>,
    ) -> SearchResult {
        let schema = &self.schema;
        let text = |field: Field| -> String {
            doc.get_first(field)
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_owned()
        };
        let number = |field: Field| -> u64 {
            doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
        };

        let content = text(schema.content);
        let mut highlights: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(gen) = content_snippets {
            let fragment = mark_fragment(&gen.snippet_from_doc(&doc));
            if !fragment.is_empty() {
                highlights.insert("content".to_owned(), vec![fragment]);
            }
        }
        if let Some(gen) = name_snippets {
            let fragment = mark_fragment(&gen.snippet_from_doc(&doc));
            if !fragment.is_empty() {
                highlights.insert("name".to_owned(), vec![fragment]);
            }
        }

        let snippet = highlights
            .get("content")
            .and_then(|frags| frags.first().cloned())
            .unwrap_or_else(|| truncate(&content, SNIPPET_MAX_CHARS));

        let name = {
            let value = text(schema.name);
            if value.is_empty() {
                None
            } else {
                Some(value)
            }
        };
        let metadata = doc
            .get_first(schema.metadata)
            .and_then(|v| v.as_json())
            .map(|map| serde_json::Value::Object(map.clone()));

        SearchResult {
            id: text(schema.id),
            doc_type: text(schema.doc_type),
            repo_id: text(schema.repo_id),
            repo_name: text(schema.repo_name),
            file_path: text(schema.file_path),
            language: text(schema.language),
            name,
            content,
            snippet,
            start_line: number(schema.start_line),
            end_line: number(schema.end_line),
            score,
            highlights,
            metadata,
        }
    }

    /// Fetch one document by its exact id.
    pub fn get_by_id(&self, id: &str) -> ToolResult<Option<SearchResult>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.schema.id, id),
            IndexRecordOption::Basic,
        );
        let top = searcher
            .search(&query, &TopDocs::with_limit(1))
            .map_err(crate::errors::ToolError::from)?;
        match top.first() {
            Some((score, address)) => {
                let doc = searcher
                    .doc(*address)
                    .map_err(crate::errors::ToolError::from)?;
                Ok(Some(self.read_result(doc, *score, &None, &None)))
            }
            None => Ok(None),
        }
    }
}

fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// STRING fields store raw values; match them exactly.
fn term_query(field: Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, value),
        IndexRecordOption::Basic,
    ))
}

/// TEXT fields are lowercased by the default tokenizer.
fn term_query_lower(field: Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, &value.to_lowercase()),
        IndexRecordOption::Basic,
    ))
}

/// Split free text the way the default tokenizer does: on non-alphanumeric
/// boundaries, lowercased.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn mark_fragment(snippet: &tantivy::Snippet) -> String {
    snippet
        .to_html()
        .replace("<b>", "<mark>")
        .replace("</b>", "</mark>")
}

fn truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexes::schema::ids;
    use crate::parsing::types::{CodeFile, FunctionInfo};

    async fn seeded_store() -> SearchStore {
        let store = SearchStore::open_in_ram().unwrap();
        let content = "package main\n\nfunc Hello() {\n\tprintln(\"greetings\")\n}\n";
        let mut file = CodeFile::skeleton(content, "main.go", "go");
        file.repo_id = "repo01".into();
        file.relative_path = "main.go".into();
        file.functions.push(FunctionInfo {
            name: "Hello".into(),
            start_line: 3,
            end_line: 5,
            signature: Some("func Hello()".into()),
            parameters: vec![],
        });
        let docs = store.build_documents(&file, "demo", 1, content);
        store
            .replace_file_batch(&ids::path_key("repo01", "main.go"), docs)
            .await
            .unwrap();

        let other = "fn shout() { println!(\"loud\"); }\n";
        let mut file = CodeFile::skeleton(other, "src/lib.rs", "rust");
        file.repo_id = "repo02".into();
        file.relative_path = "src/lib.rs".into();
        file.functions.push(FunctionInfo {
            name: "shout".into(),
            start_line: 1,
            end_line: 1,
            signature: None,
            parameters: vec![],
        });
        let docs = store.build_documents(&file, "other", 1, other);
        store
            .replace_file_batch(&ids::path_key("repo02", "src/lib.rs"), docs)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn function_search_round_trip() {
        let store = seeded_store().await;
        let query = SearchQuery {
            text: "Hello".into(),
            doc_type: Some("function".into()),
            ..Default::default()
        };
        let results = store.search(&query, 2).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name.as_deref(), Some("Hello"));
        assert_eq!(results[0].file_path, "main.go");
        assert_eq!(results[0].start_line, 3);
    }

    #[tokio::test]
    async fn filters_are_anded() {
        let store = seeded_store().await;
        let query = SearchQuery {
            text: String::new(),
            doc_type: Some("function".into()),
            language: Some("rust".into()),
            ..Default::default()
        };
        let results = store.search(&query, 2).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name.as_deref(), Some("shout"));
    }

    #[tokio::test]
    async fn repository_filter_accepts_name_or_id() {
        let store = seeded_store().await;
        for repository in ["demo", "repo01"] {
            let query = SearchQuery {
                repository: Some(repository.into()),
                doc_type: Some("file".into()),
                ..Default::default()
            };
            let results = store.search(&query, 2).unwrap();
            assert_eq!(results.len(), 1, "repository={repository}");
            assert_eq!(results[0].repo_id, "repo01");
        }
    }

    #[tokio::test]
    async fn empty_query_matches_all() {
        let store = seeded_store().await;
        let results = store
            .search(&SearchQuery { max_results: 100, ..Default::default() }, 2)
            .unwrap();
        assert_eq!(results.len(), store.total_documents().unwrap());
    }

    #[tokio::test]
    async fn fuzzy_matches_within_edit_distance() {
        let store = seeded_store().await;
        let query = SearchQuery {
            text: "Helo".into(), // one deletion away
            fuzzy: true,
            doc_type: Some("function".into()),
            ..Default::default()
        };
        let results = store.search(&query, 2).unwrap();
        assert!(results.iter().any(|r| r.name.as_deref() == Some("Hello")));
    }

    #[tokio::test]
    async fn highlights_mark_matched_terms() {
        let store = seeded_store().await;
        let query = SearchQuery {
            text: "greetings".into(),
            doc_type: Some("file".into()),
            ..Default::default()
        };
        let results = store.search(&query, 2).unwrap();
        assert_eq!(results.len(), 1);
        let fragments = results[0].highlights.get("content").unwrap();
        assert!(fragments[0].contains("<mark>"));
        assert!(results[0].snippet.contains("greetings"));
    }

    #[tokio::test]
    async fn snippet_truncates_without_highlight() {
        let store = SearchStore::open_in_ram().unwrap();
        let long_line = "x".repeat(500);
        let mut file = CodeFile::skeleton(&long_line, "big.rs", "rust");
        file.repo_id = "r".into();
        file.relative_path = "big.rs".into();
        let docs = store.build_documents(&file, "demo", 1, &long_line);
        store
            .replace_file_batch(&ids::path_key("r", "big.rs"), docs)
            .await
            .unwrap();
        let results = store
            .search(&SearchQuery::default(), 2)
            .unwrap();
        assert!(results[0].snippet.len() <= SNIPPET_MAX_CHARS + 3);
        assert!(results[0].snippet.ends_with("..."));
    }
}
