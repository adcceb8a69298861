use std::collections::HashMap;
use std::path::Path;

use chrono::{FixedOffset, TimeZone, Utc};
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{ToolError, ToolResult};

/// One blamed line, normalized from porcelain output.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BlameLine {
    pub line: u64,
    pub commit_hash: String,
    pub author: String,
    pub author_email: String,
    /// RFC3339 commit timestamp
    pub author_time: String,
    pub summary: String,
    pub code: String,
}

async fn run_git(repo_root: &Path, args: &[&str]) -> ToolResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .await
        .map_err(|err| ToolError::internal(format!("failed to spawn git: {err}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::failed_precondition(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn run_git_optional(repo_root: &Path, args: &[&str]) -> Option<String> {
    run_git(repo_root, args).await.ok().map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

/// Current HEAD commit, when the root is a git checkout.
pub async fn head_commit(repo_root: &Path) -> Option<String> {
    run_git_optional(repo_root, &["rev-parse", "HEAD"]).await
}

/// Current branch name, when on one.
pub async fn current_branch(repo_root: &Path) -> Option<String> {
    run_git_optional(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])
        .await
        .filter(|name| name != "HEAD")
}

/// Paths changed between `since` and HEAD, plus untracked files. The input
/// to incremental re-indexing.
pub async fn changed_files(repo_root: &Path, since: &str) -> ToolResult<Vec<String>> {
    let range = format!("{since}..HEAD");
    let diff = run_git(repo_root, &["diff", "--name-only", &range]).await?;
    let untracked = run_git(
        repo_root,
        &["ls-files", "--others", "--exclude-standard"],
    )
    .await?;
    let mut files: Vec<String> = diff
        .lines()
        .chain(untracked.lines())
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect();
    files.sort();
    files.dedup();
    Ok(files)
}

/// Run `git blame --porcelain` over a file (or an inclusive line range of
/// it) and normalize the output. Errors surface as structured tool errors;
/// they never crash the process.
pub async fn blame(
    repo_root: &Path,
    file: &Path,
    range: Option<(u64, u64)>,
) -> ToolResult<Vec<BlameLine>> {
    let file_arg = file.to_string_lossy().into_owned();
    let mut args: Vec<String> = vec!["blame".into(), "--porcelain".into()];
    if let Some((start, end)) = range {
        if start < 1 || end < start {
            return Err(ToolError::invalid_argument(
                "blame range must satisfy 1 <= start_line <= end_line",
            ));
        }
        args.push("-L".into());
        args.push(format!("{start},{end}"));
    }
    args.push("--".into());
    args.push(file_arg);

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let stdout = run_git(repo_root, &arg_refs).await?;
    let lines = parse_porcelain(&stdout);
    debug!(file = %file.display(), lines = lines.len(), "git blame normalized");
    Ok(lines)
}

#[derive(Default, Clone)]
struct CommitMeta {
    author: String,
    author_email: String,
    author_time: String,
    summary: String,
}

/// Parse porcelain blame output. Commit metadata appears once per commit;
/// later references repeat only the header line, so metadata is cached by
/// hash while scanning.
pub fn parse_porcelain(output: &str) -> Vec<BlameLine> {
    let mut commits: HashMap<String, CommitMeta> = HashMap::new();
    let mut result = Vec::new();

    let mut current_hash = String::new();
    let mut current_line: u64 = 0;
    let mut epoch: Option<i64> = None;
    let mut tz_offset: Option<i32> = None;

    for line in output.lines() {
        if let Some(code) = line.strip_prefix('\t') {
            let meta = commits.entry(current_hash.clone()).or_default();
            if meta.author_time.is_empty() {
                meta.author_time = format_time(epoch, tz_offset);
            }
            let meta = meta.clone();
            result.push(BlameLine {
                line: current_line,
                commit_hash: current_hash.clone(),
                author: meta.author,
                author_email: meta.author_email,
                author_time: meta.author_time,
                summary: meta.summary,
                code: code.to_owned(),
            });
            epoch = None;
            tz_offset = None;
            continue;
        }

        if let Some(rest) = header_line(line) {
            current_hash = rest.0;
            current_line = rest.1;
            continue;
        }

        let meta = commits.entry(current_hash.clone()).or_default();
        if let Some(value) = line.strip_prefix("author ") {
            meta.author = value.to_owned();
        } else if let Some(value) = line.strip_prefix("author-mail ") {
            meta.author_email = value.trim_matches(|c| c == '<' || c == '>').to_owned();
        } else if let Some(value) = line.strip_prefix("author-time ") {
            epoch = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("author-tz ") {
            tz_offset = parse_tz(value.trim());
        } else if let Some(value) = line.strip_prefix("summary ") {
            meta.summary = value.to_owned();
        }
    }

    result
}

/// `<sha> <orig-line> <final-line> [<group-size>]`
fn header_line(line: &str) -> Option<(String, u64)> {
    let mut parts = line.split_whitespace();
    let hash = parts.next()?;
    if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let _orig: u64 = parts.next()?.parse().ok()?;
    let final_line: u64 = parts.next()?.parse().ok()?;
    Some((hash.to_owned(), final_line))
}

/// `+0530` / `-0700` into seconds east of UTC.
fn parse_tz(value: &str) -> Option<i32> {
    if value.len() != 5 || !value.is_ascii() {
        return None;
    }
    let sign = match value.as_bytes()[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = value[1..3].parse().ok()?;
    let minutes: i32 = value[3..5].parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60))
}

fn format_time(epoch: Option<i64>, tz_offset: Option<i32>) -> String {
    let epoch = match epoch {
        Some(epoch) => epoch,
        None => return String::new(),
    };
    let offset = tz_offset
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    match offset.timestamp_opt(epoch, 0) {
        chrono::LocalResult::Single(dt) => dt.to_rfc3339(),
        _ => Utc
            .timestamp_opt(epoch, 0)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default(),
    }
}
