use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Positional records extracted from one file. Lines are 1-based and
/// inclusive throughout.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub start_line: u64,
    pub end_line: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub start_line: u64,
    pub end_line: u64,
    /// struct / enum / trait / interface / class, whatever the language calls it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub start_line: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ImportInfo {
    /// The import statement as written; no resolution is attempted
    pub path: String,
    pub start_line: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CommentInfo {
    pub text: String,
    pub start_line: u64,
    pub end_line: u64,
    /// Whether this is a documentation comment (`///`, `//!`, docstring style)
    #[serde(default)]
    pub doc: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
    Block,
    LineWindow,
}

/// A retrieval-sized fragment of a file. Content is verbatim; the context
/// fields may reach beyond the chunk's own range but never beyond the file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub start_line: u64,
    pub end_line: u64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_after: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// The parsed, derived representation of one file. On-disk content stays
/// authoritative; this value may lag behind it until the next re-index.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CodeFile {
    pub id: String,
    pub repo_id: String,
    pub relative_path: String,
    pub language: String,
    pub extension: String,
    pub size: u64,
    pub lines: u64,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub functions: Vec<FunctionInfo>,
    #[serde(default)]
    pub classes: Vec<ClassInfo>,
    #[serde(default)]
    pub variables: Vec<VariableInfo>,
    #[serde(default)]
    pub imports: Vec<ImportInfo>,
    #[serde(default)]
    pub comments: Vec<CommentInfo>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl CodeFile {
    /// Structural shell for a parser result: language, extension and line
    /// accounting filled in, identity fields left for the indexer.
    pub fn skeleton(content: &str, path: &str, language: &str) -> Self {
        let extension = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_owned();
        CodeFile {
            language: language.to_owned(),
            extension,
            size: content.len() as u64,
            lines: count_lines(content),
            content_hash: blake3::hash(content.as_bytes()).to_hex().to_string(),
            ..Default::default()
        }
    }
}

/// Logical line count: empty content has zero lines, a trailing newline does
/// not open a phantom line.
pub fn count_lines(content: &str) -> u64 {
    if content.is_empty() {
        return 0;
    }
    let mut count = content.matches('\n').count() as u64;
    if !content.ends_with('\n') {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_counting_handles_trailing_newlines() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a"), 1);
        assert_eq!(count_lines("a\n"), 1);
        assert_eq!(count_lines("a\nb"), 2);
        assert_eq!(count_lines("a\nb\n"), 2);
    }

    #[test]
    fn skeleton_is_deterministic() {
        let a = CodeFile::skeleton("fn x() {}\n", "src/x.rs", "rust");
        let b = CodeFile::skeleton("fn x() {}\n", "src/x.rs", "rust");
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.extension, "rs");
        assert_eq!(a.lines, 1);
    }
}
