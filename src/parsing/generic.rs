use super::types::{CodeFile, CommentInfo};
use super::Parser;

/// Scan for comments line by line. Consecutive line comments merge into one
/// record; block comments may span lines. This is intentionally lossy: a
/// comment marker inside a string literal will be picked up. Good enough for
/// search, not for compilation.
pub fn scan_comments(
    content: &str,
    line_markers: &[&str],
    block_markers: Option<(&str, &str)>,
    doc_prefixes: &[&str],
) -> Vec<CommentInfo> {
    let mut comments: Vec<CommentInfo> = Vec::new();
    let mut block: Option<(u64, Vec<String>)> = None;

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx as u64 + 1;
        let line = raw_line.trim_start();

        if let Some((start_line, lines)) = block.as_mut() {
            let (_, close) = block_markers.expect("block state implies markers");
            if let Some(pos) = raw_line.find(close) {
                lines.push(raw_line[..pos].trim().to_owned());
                let text = lines.join("\n");
                comments.push(CommentInfo {
                    text,
                    start_line: *start_line,
                    end_line: line_no,
                    doc: false,
                });
                block = None;
            } else {
                lines.push(raw_line.trim().to_owned());
            }
            continue;
        }

        if let Some((open, close)) = block_markers {
            if let Some(pos) = line.find(open) {
                // ignore line-comment markers that happen to precede the block
                let is_line_comment = line_markers
                    .iter()
                    .any(|m| line.starts_with(m) && !line.starts_with(open));
                if !is_line_comment {
                    let rest = &line[pos + open.len()..];
                    if let Some(end_pos) = rest.find(close) {
                        let text = rest[..end_pos].trim().to_owned();
                        let doc = line.starts_with("/**");
                        comments.push(CommentInfo {
                            text,
                            start_line: line_no,
                            end_line: line_no,
                            doc,
                        });
                    } else {
                        block = Some((line_no, vec![rest.trim().to_owned()]));
                    }
                    continue;
                }
            }
        }

        if line_markers.iter().any(|m| line.starts_with(m)) {
            let doc = doc_prefixes.iter().any(|p| line.starts_with(p));
            let text = line
                .trim_start_matches(|c: char| c == '/' || c == '#' || c == '!')
                .trim()
                .to_owned();
            match comments.last_mut() {
                // merge runs of adjacent line comments into one record
                Some(last) if last.end_line + 1 == line_no && last.doc == doc => {
                    last.text.push('\n');
                    last.text.push_str(&text);
                    last.end_line = line_no;
                }
                _ => comments.push(CommentInfo {
                    text,
                    start_line: line_no,
                    end_line: line_no,
                    doc,
                }),
            }
        }
    }

    if let Some((start_line, lines)) = block {
        // unterminated block comment: keep what we saw
        comments.push(CommentInfo {
            text: lines.join("\n"),
            start_line,
            end_line: count_end(content),
            doc: false,
        });
    }

    comments
}

fn count_end(content: &str) -> u64 {
    super::types::count_lines(content).max(1)
}

/// The default parser for unknown languages: extracts comments under the
/// three common styles and nothing else.
pub struct GenericParser;

impl Parser for GenericParser {
    fn language(&self) -> &str {
        crate::repo::language::GENERIC
    }

    fn parse(&self, content: &str, path: &str) -> CodeFile {
        let mut file = CodeFile::skeleton(content, path, self.language());
        file.comments = scan_comments(content, &["//", "#"], Some(("/*", "*/")), &["///", "//!"]);
        file
    }
}
