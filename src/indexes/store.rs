use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tantivy::collector::Count;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, TermQuery};
use tantivy::schema::{Document, IndexRecordOption};
use tantivy::{Index, IndexReader, IndexWriter, Term};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::parsing::types::CodeFile;

use super::schema::{ids, CodeSchema, DOC_TYPES};

const WRITER_BUFFER_BYTES: usize = 50_000_000;

/// The persistent inverted index. One instance per partition: the shared
/// process-wide index, or one per session when workspace isolation is on.
pub struct SearchStore {
    pub schema: CodeSchema,
    pub index: Index,
    pub reader: IndexReader,
    writer: Mutex<IndexWriter>,
}

impl SearchStore {
    /// Open the index at `path`, creating it when absent. An unreadable
    /// index is wiped and recreated empty: starting fresh is acceptable,
    /// partial corruption is not.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))?;
        let schema = CodeSchema::new();

        let index = match Self::try_open(path, &schema) {
            Ok(index) => index,
            Err(err) => {
                warn!(%err, path = %path.display(), "index unreadable, recreating empty");
                std::fs::remove_dir_all(path)?;
                std::fs::create_dir_all(path)?;
                Self::try_open(path, &schema)?
            }
        };

        Self::from_index(index, schema)
    }

    fn try_open(path: &Path, schema: &CodeSchema) -> anyhow::Result<Index> {
        let directory = MmapDirectory::open(path)?;
        Ok(Index::open_or_create(directory, schema.schema.clone())?)
    }

    /// In-memory index for tests.
    pub fn open_in_ram() -> anyhow::Result<Self> {
        let schema = CodeSchema::new();
        let index = Index::create_in_ram(schema.schema.clone());
        Self::from_index(index, schema)
    }

    fn from_index(index: Index, schema: CodeSchema) -> anyhow::Result<Self> {
        let reader = index.reader()?;
        let writer = index.writer(WRITER_BUFFER_BYTES)?;
        Ok(Self {
            schema,
            index,
            reader,
            writer: Mutex::new(writer),
        })
    }

    /// Replace all documents for one file in a single batch: delete whatever
    /// shares the path key, then add the new set, then commit. Readers see
    /// either the old documents or the new ones, never a mix.
    pub async fn replace_file_batch(
        &self,
        path_key: &str,
        docs: Vec<Document>,
    ) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.delete_term(Term::from_field_text(self.schema.path_key, path_key));
        let count = docs.len();
        for doc in docs {
            writer.add_document(doc)?;
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        debug!(path_key, count, "replaced file batch");
        Ok(())
    }

    /// Drop every document for the given path keys.
    pub async fn delete_paths(&self, path_keys: &[String]) -> anyhow::Result<()> {
        if path_keys.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        for key in path_keys {
            writer.delete_term(Term::from_field_text(self.schema.path_key, key));
        }
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Drop every document belonging to a repository.
    pub async fn delete_repository(&self, repo_id: &str) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.delete_term(Term::from_field_text(self.schema.repo_id, repo_id));
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        info!(repo_id, "deleted repository documents");
        Ok(())
    }

    /// Wipe the whole index (force rebuild path).
    pub async fn clear(&self) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.delete_all_documents()?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    /// Build the batch of documents for one parsed file: the file document
    /// plus one document per symbol, comment and chunk.
    pub fn build_documents(&self, file: &CodeFile, repo_name: &str, indexed_at: i64, content: &str) -> Vec<Document> {
        let schema = &self.schema;
        let repo_id = &file.repo_id;
        let rel = &file.relative_path;
        let path_key = ids::path_key(repo_id, rel);
        let mut docs = Vec::with_capacity(
            1 + file.functions.len()
                + file.classes.len()
                + file.variables.len()
                + file.comments.len()
                + file.chunks.len(),
        );

        let base = |doc: &mut Document, doc_type: &str, id: String| {
            doc.add_text(schema.id, &id);
            doc.add_text(schema.path_key, &path_key);
            doc.add_text(schema.doc_type, doc_type);
            doc.add_text(schema.repo_id, repo_id);
            doc.add_text(schema.repo_name, repo_name);
            doc.add_text(schema.file_path, rel);
            doc.add_text(schema.language, &file.language);
            doc.add_i64(schema.indexed_at, indexed_at);
        };

        {
            let mut doc = Document::default();
            base(&mut doc, "file", ids::file_id(repo_id, rel));
            doc.add_text(schema.content, content);
            doc.add_u64(schema.start_line, 1);
            doc.add_u64(schema.end_line, file.lines.max(1));
            doc.add_json_object(schema.metadata, file_metadata(file));
            docs.push(doc);
        }

        for f in &file.functions {
            let mut doc = Document::default();
            base(
                &mut doc,
                "function",
                ids::symbol_id("function", repo_id, rel, &f.name, f.start_line),
            );
            doc.add_text(schema.name, &f.name);
            doc.add_text(schema.content, slice_lines(content, f.start_line, f.end_line));
            doc.add_u64(schema.start_line, f.start_line);
            doc.add_u64(schema.end_line, f.end_line);
            doc.add_json_object(schema.metadata, json_map(&f));
            docs.push(doc);
        }

        for c in &file.classes {
            let mut doc = Document::default();
            base(
                &mut doc,
                "class",
                ids::symbol_id("class", repo_id, rel, &c.name, c.start_line),
            );
            doc.add_text(schema.name, &c.name);
            doc.add_text(schema.content, slice_lines(content, c.start_line, c.end_line));
            doc.add_u64(schema.start_line, c.start_line);
            doc.add_u64(schema.end_line, c.end_line);
            doc.add_json_object(schema.metadata, json_map(&c));
            docs.push(doc);
        }

        for v in &file.variables {
            let mut doc = Document::default();
            base(
                &mut doc,
                "variable",
                ids::symbol_id("variable", repo_id, rel, &v.name, v.start_line),
            );
            doc.add_text(schema.name, &v.name);
            doc.add_text(schema.content, slice_lines(content, v.start_line, v.start_line));
            doc.add_u64(schema.start_line, v.start_line);
            doc.add_u64(schema.end_line, v.start_line);
            doc.add_json_object(schema.metadata, json_map(&v));
            docs.push(doc);
        }

        for comment in &file.comments {
            let mut doc = Document::default();
            base(
                &mut doc,
                "comment",
                ids::comment_id(repo_id, rel, comment.start_line),
            );
            doc.add_text(schema.content, &comment.text);
            doc.add_u64(schema.start_line, comment.start_line);
            doc.add_u64(schema.end_line, comment.end_line);
            doc.add_json_object(schema.metadata, json_map(&comment));
            docs.push(doc);
        }

        for chunk in &file.chunks {
            let mut doc = Document::default();
            base(
                &mut doc,
                "chunk",
                ids::chunk_id(repo_id, rel, &chunk.id, chunk.start_line),
            );
            if let Some(name) = &chunk.name {
                doc.add_text(schema.name, name);
            }
            doc.add_text(schema.content, &chunk.content);
            doc.add_u64(schema.start_line, chunk.start_line);
            doc.add_u64(schema.end_line, chunk.end_line);
            doc.add_json_object(schema.metadata, json_map(&chunk));
            docs.push(doc);
        }

        docs
    }

    /// Count all live documents.
    pub fn total_documents(&self) -> anyhow::Result<usize> {
        let searcher = self.reader.searcher();
        Ok(searcher.search(&AllQuery, &Count)?)
    }

    pub fn count_by_type(&self) -> anyhow::Result<BTreeMap<String, usize>> {
        let searcher = self.reader.searcher();
        let mut counts = BTreeMap::new();
        for doc_type in DOC_TYPES {
            let query = TermQuery::new(
                Term::from_field_text(self.schema.doc_type, doc_type),
                IndexRecordOption::Basic,
            );
            let count = searcher.search(&query, &Count)?;
            counts.insert((*doc_type).to_owned(), count);
        }
        Ok(counts)
    }

    pub fn count_term(&self, field: tantivy::schema::Field, value: &str) -> anyhow::Result<usize> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(Term::from_field_text(field, value), IndexRecordOption::Basic);
        Ok(searcher.search(&query, &Count)?)
    }

    /// Relative paths of all `file` documents for one repository. Used to
    /// find stale documents after a full re-index.
    pub fn file_paths_for_repo(&self, repo_id: &str) -> anyhow::Result<Vec<String>> {
        use tantivy::collector::TopDocs;
        use tantivy::query::{BooleanQuery, Occur, Query};

        let searcher = self.reader.searcher();
        let query = BooleanQuery::new(vec![
            (
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.schema.repo_id, repo_id),
                    IndexRecordOption::Basic,
                )) as Box<dyn Query>,
            ),
            (
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.schema.doc_type, "file"),
                    IndexRecordOption::Basic,
                )) as Box<dyn Query>,
            ),
        ]);
        let cap = self.total_documents()?.max(1);
        let top = searcher.search(&query, &TopDocs::with_limit(cap))?;
        let mut paths = Vec::with_capacity(top.len());
        for (_score, address) in top {
            let doc = searcher.doc(address)?;
            if let Some(path) = doc.get_first(self.schema.file_path).and_then(|v| v.as_text()) {
                paths.push(path.to_owned());
            }
        }
        Ok(paths)
    }
}

fn file_metadata(file: &CodeFile) -> serde_json::Map<String, serde_json::Value> {
    // the whole parsed file rides along on the file document, which is what
    // makes get_metadata a single index lookup
    match serde_json::to_value(file) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

fn json_map<T: Serialize>(value: &T) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

/// Inclusive 1-based line slice of `content`.
fn slice_lines(content: &str, start: u64, end: u64) -> String {
    content
        .lines()
        .skip(start.saturating_sub(1) as usize)
        .take((end.saturating_sub(start) + 1) as usize)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::types::FunctionInfo;

    fn sample_file() -> (CodeFile, String) {
        let content = "package main\n\nfunc Hello() {\n\tprintln(\"hi\")\n}\n".to_owned();
        let mut file = CodeFile::skeleton(&content, "main.go", "go");
        file.repo_id = "abc123".into();
        file.relative_path = "main.go".into();
        file.functions.push(FunctionInfo {
            name: "Hello".into(),
            start_line: 3,
            end_line: 5,
            signature: Some("func Hello()".into()),
            parameters: vec![],
        });
        (file, content)
    }

    #[tokio::test]
    async fn replace_is_atomic_per_file() {
        let store = SearchStore::open_in_ram().unwrap();
        let (file, content) = sample_file();
        let docs = store.build_documents(&file, "demo", 1, &content);
        let key = ids::path_key("abc123", "main.go");

        store.replace_file_batch(&key, docs).await.unwrap();
        assert_eq!(store.count_by_type().unwrap()["file"], 1);
        assert_eq!(store.count_by_type().unwrap()["function"], 1);

        // re-index the same file: still exactly one file doc
        let (file, content) = sample_file();
        let docs = store.build_documents(&file, "demo", 2, &content);
        store.replace_file_batch(&key, docs).await.unwrap();
        assert_eq!(store.count_by_type().unwrap()["file"], 1);
        assert_eq!(store.count_by_type().unwrap()["function"], 1);
    }

    #[tokio::test]
    async fn delete_repository_removes_everything() {
        let store = SearchStore::open_in_ram().unwrap();
        let (file, content) = sample_file();
        let docs = store.build_documents(&file, "demo", 1, &content);
        store
            .replace_file_batch(&ids::path_key("abc123", "main.go"), docs)
            .await
            .unwrap();
        assert!(store.total_documents().unwrap() > 0);

        store.delete_repository("abc123").await.unwrap();
        assert_eq!(store.total_documents().unwrap(), 0);
    }

    #[test]
    fn unreadable_index_is_recreated_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("meta.json"), "garbage").unwrap();
        let store = SearchStore::open(&path).unwrap();
        assert_eq!(store.total_documents().unwrap(), 0);
    }

    #[test]
    fn document_ids_are_reproducible() {
        let store = SearchStore::open_in_ram().unwrap();
        let (file, content) = sample_file();
        let a = store.build_documents(&file, "demo", 1, &content);
        let b = store.build_documents(&file, "demo", 1, &content);
        let id_of = |doc: &Document| {
            doc.get_first(store.schema.id)
                .and_then(|v| v.as_text())
                .unwrap()
                .to_owned()
        };
        let ids_a: Vec<_> = a.iter().map(&id_of).collect();
        let ids_b: Vec<_> = b.iter().map(&id_of).collect();
        assert_eq!(ids_a, ids_b);
    }
}
