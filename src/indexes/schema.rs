use tantivy::schema::{Field, Schema, FAST, STORED, STRING, TEXT};

/// Document types stored in the flat index. Hierarchy exists only by filter;
/// the index itself is a single store with a `type` discriminator.
pub const DOC_TYPES: &[&str] = &["file", "function", "class", "variable", "comment", "chunk"];

/// Schema for the single flat code index. Every file, symbol, comment and
/// chunk is one document here.
#[derive(Clone)]
pub struct CodeSchema {
    pub schema: Schema,

    /// Unique, deterministic document id (kind + location derived)
    pub id: Field,
    /// `{repo_id}:{relative_path}`, the delete key for re-indexing a file
    pub path_key: Field,
    /// file | function | class | variable | comment | chunk
    pub doc_type: Field,

    pub repo_id: Field,
    pub repo_name: Field,

    /// Path relative to the repo root, tokenized so path segments match
    pub file_path: Field,
    pub language: Field,

    /// Symbol or chunk name, when there is one
    pub name: Field,
    /// Analyzed body; positions retained for highlight generation
    pub content: Field,

    pub start_line: Field,
    pub end_line: Field,
    /// Unix seconds of the indexing batch
    pub indexed_at: Field,

    /// Nested, non-indexed payload (parameters, signature, parsed file, ...)
    pub metadata: Field,
}

impl CodeSchema {
    pub fn new() -> Self {
        let mut builder = Schema::builder();

        let id = builder.add_text_field("id", STRING | STORED);
        let path_key = builder.add_text_field("path_key", STRING | STORED);
        let doc_type = builder.add_text_field("type", STRING | STORED);

        let repo_id = builder.add_text_field("repo_id", STRING | STORED);
        let repo_name = builder.add_text_field("repo_name", STRING | STORED);

        let file_path = builder.add_text_field("file_path", TEXT | STORED);
        let language = builder.add_text_field("language", STRING | STORED);

        let name = builder.add_text_field("name", TEXT | STORED);
        let content = builder.add_text_field("content", TEXT | STORED);

        let start_line = builder.add_u64_field("start_line", FAST | STORED);
        let end_line = builder.add_u64_field("end_line", FAST | STORED);
        let indexed_at = builder.add_i64_field("indexed_at", FAST | STORED);

        let metadata = builder.add_json_field("metadata", STORED);

        Self {
            schema: builder.build(),
            id,
            path_key,
            doc_type,
            repo_id,
            repo_name,
            file_path,
            language,
            name,
            content,
            start_line,
            end_line,
            indexed_at,
            metadata,
        }
    }
}

impl Default for CodeSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic ids. Same content at the same location always produces the
/// same id, so re-indexing replaces rather than accumulates.
pub mod ids {
    pub fn path_key(repo_id: &str, relative_path: &str) -> String {
        format!("{repo_id}:{relative_path}")
    }

    pub fn file_id(repo_id: &str, relative_path: &str) -> String {
        format!("file:{repo_id}:{relative_path}")
    }

    pub fn symbol_id(
        kind: &str,
        repo_id: &str,
        relative_path: &str,
        name: &str,
        start_line: u64,
    ) -> String {
        format!("{kind}:{repo_id}:{relative_path}:{name}:{start_line}")
    }

    pub fn comment_id(repo_id: &str, relative_path: &str, start_line: u64) -> String {
        format!("comment:{repo_id}:{relative_path}:{start_line}")
    }

    pub fn chunk_id(repo_id: &str, relative_path: &str, chunk: &str, start_line: u64) -> String {
        format!("chunk:{repo_id}:{relative_path}:{chunk}:{start_line}")
    }
}
