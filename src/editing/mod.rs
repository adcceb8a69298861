use std::path::Path;

use serde::Serialize;

use crate::errors::{ToolError, ToolResult};

/// Structured record of one line-level mutation, returned by the editing
/// tools. The caller is expected to refresh the index afterwards; these
/// primitives do not touch it.
#[derive(Serialize, Clone, Debug)]
pub struct MutationRecord {
    pub path: String,
    pub operation: String,
    pub start_line: u64,
    pub end_line: u64,
    pub lines_deleted: u64,
    pub lines_inserted: u64,
    pub old_length: u64,
    pub new_length: u64,
}

/// A file loaded as lines plus the knowledge of whether it ended with a
/// newline, so every mutation can write back byte-faithfully: length
/// arithmetic holds and there is no trailing-newline drift.
struct LineBuffer {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl LineBuffer {
    fn load(path: &Path) -> ToolResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_content(&content))
    }

    fn from_content(content: &str) -> Self {
        if content.is_empty() {
            return Self {
                lines: Vec::new(),
                trailing_newline: false,
            };
        }
        let trailing_newline = content.ends_with('\n');
        let mut lines: Vec<String> = content.split('\n').map(str::to_owned).collect();
        if trailing_newline {
            lines.pop();
        }
        Self {
            lines,
            trailing_newline,
        }
    }

    fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Atomic write: temp sibling + rename, so concurrent readers see either
    /// the old file or the new one.
    fn store(&self, path: &Path) -> ToolResult<()> {
        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("edit")
        ));
        std::fs::write(&tmp, self.render())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.lines.len() as u64
    }
}

fn check_range(buffer: &LineBuffer, start: u64, end: u64) -> ToolResult<()> {
    if start < 1 {
        return Err(ToolError::invalid_argument("start_line must be >= 1"));
    }
    if end < start {
        return Err(ToolError::invalid_argument(
            "end_line must be >= start_line",
        ));
    }
    if end > buffer.len() {
        return Err(ToolError::failed_precondition(format!(
            "line range {start}..{end} exceeds file length {}",
            buffer.len()
        )));
    }
    Ok(())
}

/// Remove lines `[start, end]` inclusive.
pub fn delete_lines(path: &Path, start: u64, end: u64) -> ToolResult<MutationRecord> {
    let mut buffer = LineBuffer::load(path)?;
    check_range(&buffer, start, end)?;
    let old_length = buffer.len();
    buffer
        .lines
        .drain((start - 1) as usize..=(end - 1) as usize);
    if buffer.lines.is_empty() {
        buffer.trailing_newline = false;
    }
    buffer.store(path)?;
    Ok(MutationRecord {
        path: path.display().to_string(),
        operation: "delete_lines".into(),
        start_line: start,
        end_line: end,
        lines_deleted: end - start + 1,
        lines_inserted: 0,
        old_length,
        new_length: buffer.len(),
    })
}

/// Insert `content` immediately before the current `line`. `line` may be
/// `len + 1` to append. Content may itself contain newlines.
pub fn insert_at_line(path: &Path, line: u64, content: &str) -> ToolResult<MutationRecord> {
    let mut buffer = LineBuffer::load(path)?;
    if line < 1 {
        return Err(ToolError::invalid_argument("line_number must be >= 1"));
    }
    if line > buffer.len() + 1 {
        return Err(ToolError::failed_precondition(format!(
            "line {line} exceeds file length {} + 1",
            buffer.len()
        )));
    }
    let old_length = buffer.len();
    let inserted: Vec<String> = if content.is_empty() {
        Vec::new()
    } else {
        content.split('\n').map(str::to_owned).collect()
    };
    let count = inserted.len() as u64;
    if buffer.lines.is_empty() && count > 0 {
        // inserting into an empty file establishes the usual final newline
        buffer.trailing_newline = true;
    }
    buffer
        .lines
        .splice((line - 1) as usize..(line - 1) as usize, inserted);
    buffer.store(path)?;
    Ok(MutationRecord {
        path: path.display().to_string(),
        operation: "insert_at_line".into(),
        start_line: line,
        end_line: line + count.saturating_sub(1),
        lines_deleted: 0,
        lines_inserted: count,
        old_length,
        new_length: buffer.len(),
    })
}

/// Replace lines `[start, end]` with `content`: a delete plus an insert,
/// visible to external readers as one atomic write.
pub fn replace_lines(path: &Path, start: u64, end: u64, content: &str) -> ToolResult<MutationRecord> {
    let mut buffer = LineBuffer::load(path)?;
    check_range(&buffer, start, end)?;
    let old_length = buffer.len();
    let inserted: Vec<String> = if content.is_empty() {
        Vec::new()
    } else {
        content.split('\n').map(str::to_owned).collect()
    };
    let count = inserted.len() as u64;
    buffer
        .lines
        .splice((start - 1) as usize..=(end - 1) as usize, inserted);
    if buffer.lines.is_empty() {
        buffer.trailing_newline = false;
    }
    buffer.store(path)?;
    Ok(MutationRecord {
        path: path.display().to_string(),
        operation: "replace_lines".into(),
        start_line: start,
        end_line: end,
        lines_deleted: end - start + 1,
        lines_inserted: count,
        old_length,
        new_length: buffer.len(),
    })
}

/// Line count as the mutators see it.
pub fn count_lines(path: &Path) -> ToolResult<u64> {
    Ok(LineBuffer::load(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn delete_shrinks_by_exactly_the_range() {
        let (_dir, path) = fixture("l1\nl2\nl3\nl4\nl5\n");
        let record = delete_lines(&path, 2, 4).unwrap();
        assert_eq!(record.old_length, 5);
        assert_eq!(record.new_length, 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "l1\nl5\n");
    }

    #[test]
    fn insert_before_line_with_embedded_newlines() {
        let (_dir, path) = fixture("a\nb\nc\n");
        let record = insert_at_line(&path, 2, "X\nY").unwrap();
        assert_eq!(record.lines_inserted, 2);
        assert_eq!(record.new_length, 5);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nX\nY\nb\nc\n");
    }

    #[test]
    fn insert_append_position_is_allowed() {
        let (_dir, path) = fixture("a\nb\n");
        insert_at_line(&path, 3, "c").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn insert_then_delete_restores_the_original_bytes() {
        let original = "one\ntwo\nthree\nfour\nfive\n";
        let (_dir, path) = fixture(original);
        let record = insert_at_line(&path, 3, "X\nY").unwrap();
        delete_lines(&path, 3, 3 + record.lines_inserted - 1).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn no_trailing_newline_drift() {
        let original = "one\ntwo\nthree";
        let (_dir, path) = fixture(original);
        insert_at_line(&path, 2, "mid").unwrap();
        delete_lines(&path, 2, 2).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn replace_is_delete_plus_insert() {
        let (_dir, path) = fixture("a\nb\nc\nd\n");
        let record = replace_lines(&path, 2, 3, "B").unwrap();
        assert_eq!(record.lines_deleted, 2);
        assert_eq!(record.lines_inserted, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nB\nd\n");
    }

    #[test]
    fn range_validation() {
        let (_dir, path) = fixture("a\nb\n");
        assert_eq!(
            delete_lines(&path, 0, 1).unwrap_err().kind,
            crate::errors::ErrorKind::InvalidArgument
        );
        assert_eq!(
            delete_lines(&path, 2, 1).unwrap_err().kind,
            crate::errors::ErrorKind::InvalidArgument
        );
        assert_eq!(
            delete_lines(&path, 1, 3).unwrap_err().kind,
            crate::errors::ErrorKind::FailedPrecondition
        );
        assert_eq!(
            insert_at_line(&path, 4, "x").unwrap_err().kind,
            crate::errors::ErrorKind::FailedPrecondition
        );
    }

    #[test]
    fn empty_insert_changes_nothing() {
        let (_dir, path) = fixture("a\nb\n");
        let record = insert_at_line(&path, 1, "").unwrap();
        assert_eq!(record.lines_inserted, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }

    #[test]
    fn count_lines_matches_post_conditions() {
        let (_dir, path) = fixture("1\n2\n3\n4\n");
        assert_eq!(count_lines(&path).unwrap(), 4);
        delete_lines(&path, 1, 2).unwrap();
        assert_eq!(count_lines(&path).unwrap(), 2);
    }
}
