use std::path::Path;
use std::sync::Arc;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::errors::{ToolError, ToolResult};
use crate::indexes::query::SearchQuery;
use crate::locking::{LockMode, ResourceType};
use crate::repo::language::language_of;

use super::args::{opt_bool, opt_str, opt_u64, require_str};
use super::paths::resolve_path;
use super::{ParamSpec, ParamType, ToolContext, ToolRegistry};

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(
        "find_files",
        "Fuzzy-match indexed file paths against a pattern",
        "utility",
        vec![
            ParamSpec::required("pattern", ParamType::String, "Pattern matched against file paths"),
            ParamSpec::optional("repository", ParamType::String, "Repository name or id"),
            ParamSpec::optional("include_content", ParamType::Boolean, "Attach a content snippet per hit"),
        ],
        Arc::new(|ctx| find_files(ctx).boxed()),
    );
    registry.register(
        "find_symbols",
        "Look up functions, classes and variables by name",
        "utility",
        vec![
            ParamSpec::required("symbol_name", ParamType::String, "Symbol name to look for"),
            ParamSpec::optional("symbol_type", ParamType::String, "function, class or variable"),
            ParamSpec::optional("language", ParamType::String, "Restrict to a language tag"),
            ParamSpec::optional("repository", ParamType::String, "Repository name or id"),
        ],
        Arc::new(|ctx| find_symbols(ctx).boxed()),
    );
    registry.register(
        "get_file_content",
        "Read a file, optionally only a line range",
        "core",
        vec![
            ParamSpec::required("file_path", ParamType::String, "File path, repo-relative or absolute"),
            ParamSpec::optional("repository", ParamType::String, "Repository name or id"),
            ParamSpec::optional("start_line", ParamType::Number, "First line, 1-based inclusive"),
            ParamSpec::optional("end_line", ParamType::Number, "Last line, 1-based inclusive"),
        ],
        Arc::new(|ctx| get_file_content(ctx).boxed()),
    );
    registry.register(
        "list_directory",
        "List a directory, optionally recursively and filtered",
        "utility",
        vec![
            ParamSpec::required("directory_path", ParamType::String, "Directory, repo-relative or absolute"),
            ParamSpec::optional("repository", ParamType::String, "Repository name or id"),
            ParamSpec::optional("recursive", ParamType::Boolean, "Descend into subdirectories"),
            ParamSpec::optional("file_filter", ParamType::String, "Substring or * wildcard filter on names"),
        ],
        Arc::new(|ctx| list_directory(ctx).boxed()),
    );
    registry.register(
        "get_file_snippet",
        "Extract a line range with optional surrounding context",
        "utility",
        vec![
            ParamSpec::required("file_path", ParamType::String, "File path, repo-relative or absolute"),
            ParamSpec::required("start_line", ParamType::Number, "First line, 1-based inclusive"),
            ParamSpec::required("end_line", ParamType::Number, "Last line, 1-based inclusive"),
            ParamSpec::optional("include_context", ParamType::Boolean, "Include context before/after"),
        ],
        Arc::new(|ctx| get_file_snippet(ctx).boxed()),
    );
    registry.register(
        "find_references",
        "Textual references to an identifier across the index (no scope analysis: this is string matching, not semantic resolution)",
        "utility",
        vec![
            ParamSpec::required("symbol_name", ParamType::String, "Identifier to look for"),
            ParamSpec::optional("symbol_type", ParamType::String, "Definition type filter: function, class or variable"),
            ParamSpec::optional("repository", ParamType::String, "Repository name or id"),
            ParamSpec::optional("include_definitions", ParamType::Boolean, "Also return matching definitions (default true)"),
        ],
        Arc::new(|ctx| find_references(ctx).boxed()),
    );
}

async fn find_files(ctx: ToolContext) -> ToolResult<Value> {
    let pattern = require_str(&ctx.args, "pattern")?;
    let repository = opt_str(&ctx.args, "repository").map(str::to_owned);
    let include_content = opt_bool(&ctx.args, "include_content")?.unwrap_or(false);

    let store = ctx.app.store_for(&ctx.session)?;
    let candidates = store.search(
        &SearchQuery {
            doc_type: Some("file".into()),
            repository,
            max_results: 10_000,
            ..Default::default()
        },
        ctx.app.config.fuzzy_distance,
    )?;

    let matcher = SkimMatcherV2::default();
    let mut hits: Vec<(i64, Value)> = candidates
        .into_iter()
        .filter_map(|doc| {
            let score = matcher.fuzzy_match(&doc.file_path, pattern)?;
            let mut hit = json!({
                "path": doc.file_path,
                "repo": doc.repo_name,
                "language": doc.language,
                "score": score,
            });
            if include_content {
                hit["snippet"] = json!(doc.snippet);
            }
            Some((score, hit))
        })
        .collect();
    hits.sort_by(|a, b| b.0.cmp(&a.0));

    let files: Vec<Value> = hits.into_iter().map(|(_, hit)| hit).collect();
    Ok(json!({
        "pattern": pattern,
        "total": files.len(),
        "files": files,
    }))
}

const SYMBOL_TYPES: &[&str] = &["function", "class", "variable"];

async fn find_symbols(ctx: ToolContext) -> ToolResult<Value> {
    let symbol_name = require_str(&ctx.args, "symbol_name")?;
    let symbol_type = opt_str(&ctx.args, "symbol_type");
    let language = opt_str(&ctx.args, "language").map(str::to_owned);
    let repository = opt_str(&ctx.args, "repository").map(str::to_owned);

    if let Some(requested) = symbol_type {
        if !SYMBOL_TYPES.contains(&requested) {
            return Err(ToolError::invalid_argument(format!(
                "symbol_type must be one of {SYMBOL_TYPES:?}, got `{requested}`"
            )));
        }
    }
    let types: Vec<&str> = match symbol_type {
        Some(requested) => vec![requested],
        None => SYMBOL_TYPES.to_vec(),
    };

    let store = ctx.app.store_for(&ctx.session)?;
    let needle = symbol_name.to_lowercase();
    let mut symbols = Vec::new();
    for doc_type in types {
        let results = store.search(
            &SearchQuery {
                text: symbol_name.to_owned(),
                doc_type: Some(doc_type.to_owned()),
                language: language.clone(),
                repository: repository.clone(),
                max_results: 200,
                ..Default::default()
            },
            ctx.app.config.fuzzy_distance,
        )?;
        for result in results {
            let name = match &result.name {
                Some(name) => name.clone(),
                None => continue,
            };
            if !name.to_lowercase().contains(&needle) {
                continue;
            }
            let signature = result
                .metadata
                .as_ref()
                .and_then(|m| m.get("signature"))
                .and_then(Value::as_str)
                .map(str::to_owned);
            symbols.push(json!({
                "name": name,
                "type": result.doc_type,
                "file": result.file_path,
                "repository": result.repo_name,
                "lines": {"start": result.start_line, "end": result.end_line},
                "signature": signature,
                "context": result.snippet,
            }));
        }
    }

    Ok(json!({
        "symbol": symbol_name,
        "total": symbols.len(),
        "symbols": symbols,
    }))
}

async fn get_file_content(ctx: ToolContext) -> ToolResult<Value> {
    let file_path = require_str(&ctx.args, "file_path")?;
    let repository = opt_str(&ctx.args, "repository");
    let start_line = opt_u64(&ctx.args, "start_line")?;
    let end_line = opt_u64(&ctx.args, "end_line")?;

    let (repo, absolute) = resolve_path(&ctx.app, &ctx.session, repository, file_path)?;

    let lock = ctx
        .app
        .locks
        .acquire(
            ResourceType::File,
            &absolute.to_string_lossy(),
            LockMode::Read,
            &ctx.session.id,
            std::time::Duration::from_secs(ctx.app.config.lock_timeout_secs),
            &ctx.cancel,
        )
        .await?;
    let read = read_bounded(&ctx, repo.as_ref().map(|r| r.path.as_path()), &absolute);
    let _ = ctx.app.locks.release(&lock.id).await;
    let content = read?;

    let total_lines = crate::parsing::types::count_lines(&content);
    let size = content.len() as u64;
    let language = language_of(&absolute);

    let content = match (start_line, end_line) {
        (None, None) => content,
        (start, end) => {
            let start = start.unwrap_or(1).max(1);
            let end = end.unwrap_or(total_lines).min(total_lines);
            if start > end {
                return Err(ToolError::invalid_argument(
                    "start_line must not exceed end_line",
                ));
            }
            content
                .lines()
                .skip((start - 1) as usize)
                .take((end - start + 1) as usize)
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    Ok(json!({
        "path": absolute.to_string_lossy(),
        "content": content,
        "total_lines": total_lines,
        "language": language,
        "size": size,
    }))
}

fn read_bounded(ctx: &ToolContext, repo_root: Option<&Path>, absolute: &Path) -> ToolResult<String> {
    match repo_root {
        // inside a repo the filter applies (gitignore, size caps)
        Some(root) => ctx.app.repo_manager.read_file(root, absolute),
        None => {
            let meta = std::fs::metadata(absolute)?;
            if meta.len() > ctx.app.config.max_file_size {
                return Err(ToolError::failed_precondition(format!(
                    "{} exceeds the configured size limit",
                    absolute.display()
                )));
            }
            Ok(std::fs::read_to_string(absolute)?)
        }
    }
}

async fn list_directory(ctx: ToolContext) -> ToolResult<Value> {
    let directory_path = require_str(&ctx.args, "directory_path")?;
    let repository = opt_str(&ctx.args, "repository");
    let recursive = opt_bool(&ctx.args, "recursive")?.unwrap_or(false);
    let file_filter = opt_str(&ctx.args, "file_filter").map(str::to_owned);

    let (_repo, absolute) = resolve_path(&ctx.app, &ctx.session, repository, directory_path)?;
    if !absolute.is_dir() {
        return Err(ToolError::not_found(format!(
            "{} is not a directory",
            absolute.display()
        )));
    }

    let filter = file_filter.map(|raw| NameFilter::new(&raw));
    let mut entries = Vec::new();
    collect_entries(&absolute, recursive, &filter, &mut entries)?;
    entries.sort_by(|a, b| {
        a["path"]
            .as_str()
            .unwrap_or_default()
            .cmp(b["path"].as_str().unwrap_or_default())
    });

    Ok(json!({
        "directory": absolute.to_string_lossy(),
        "total": entries.len(),
        "entries": entries,
    }))
}

/// `*` wildcards become regex; anything else is a substring match.
struct NameFilter {
    regex: Option<regex::Regex>,
    substring: String,
}

impl NameFilter {
    fn new(raw: &str) -> Self {
        if raw.contains('*') {
            let escaped = regex::escape(raw).replace("\\*", ".*");
            if let Ok(regex) = regex::Regex::new(&format!("^{escaped}$")) {
                return Self {
                    regex: Some(regex),
                    substring: String::new(),
                };
            }
        }
        Self {
            regex: None,
            substring: raw.to_owned(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => name.contains(&self.substring),
        }
    }
}

fn collect_entries(
    dir: &Path,
    recursive: bool,
    filter: &Option<NameFilter>,
    out: &mut Vec<Value>,
) -> ToolResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = entry.metadata()?;
        let modified = meta
            .modified()
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .map(|dt| dt.to_rfc3339());

        if meta.is_dir() {
            if crate::repo::filter::PathFilter::descend_into(&name) {
                out.push(json!({
                    "name": name,
                    "path": path.to_string_lossy(),
                    "size": 0,
                    "modified": modified,
                    "type": "directory",
                }));
                if recursive {
                    collect_entries(&path, true, filter, out)?;
                }
            }
            continue;
        }

        if let Some(filter) = filter {
            if !filter.matches(&name) {
                continue;
            }
        }
        out.push(json!({
            "name": name,
            "path": path.to_string_lossy(),
            "size": meta.len(),
            "modified": modified,
            "type": "file",
            "language": language_of(&path),
        }));
    }
    Ok(())
}

async fn get_file_snippet(ctx: ToolContext) -> ToolResult<Value> {
    let file_path = require_str(&ctx.args, "file_path")?;
    let start_line = super::args::require_u64(&ctx.args, "start_line")?;
    let end_line = super::args::require_u64(&ctx.args, "end_line")?;
    let include_context = opt_bool(&ctx.args, "include_context")?.unwrap_or(false);
    if start_line < 1 || end_line < start_line {
        return Err(ToolError::invalid_argument(
            "snippet range must satisfy 1 <= start_line <= end_line",
        ));
    }

    let (repo, absolute) = resolve_path(&ctx.app, &ctx.session, None, file_path)?;
    let content = read_bounded(&ctx, repo.as_ref().map(|r| r.path.as_path()), &absolute)?;
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len() as u64;
    if end_line > total {
        return Err(ToolError::failed_precondition(format!(
            "line range {start_line}..{end_line} exceeds file length {total}"
        )));
    }

    let snippet = lines[(start_line - 1) as usize..end_line as usize].join("\n");
    let mut result = json!({
        "path": absolute.to_string_lossy(),
        "snippet": snippet,
        "start_line": start_line,
        "end_line": end_line,
    });
    if include_context {
        let before = ctx.app.config.chunk_context_before as u64;
        let after = ctx.app.config.chunk_context_after as u64;
        if start_line > 1 {
            let ctx_start = start_line.saturating_sub(before).max(1);
            result["context_before"] =
                json!(lines[(ctx_start - 1) as usize..(start_line - 1) as usize].join("\n"));
        }
        if end_line < total {
            let ctx_end = (end_line + after).min(total);
            result["context_after"] =
                json!(lines[end_line as usize..ctx_end as usize].join("\n"));
        }
    }
    Ok(result)
}

async fn find_references(ctx: ToolContext) -> ToolResult<Value> {
    let symbol_name = require_str(&ctx.args, "symbol_name")?;
    let symbol_type = opt_str(&ctx.args, "symbol_type").map(str::to_owned);
    let repository = opt_str(&ctx.args, "repository").map(str::to_owned);
    let include_definitions = opt_bool(&ctx.args, "include_definitions")?.unwrap_or(true);

    let store = ctx.app.store_for(&ctx.session)?;

    // reference sites: a word-boundary scan over matching file documents
    let word = regex::Regex::new(&format!(r"\b{}\b", regex::escape(symbol_name)))
        .map_err(|err| ToolError::invalid_argument(format!("bad symbol name: {err}")))?;
    let files = store.search(
        &SearchQuery {
            text: symbol_name.to_owned(),
            doc_type: Some("file".into()),
            repository: repository.clone(),
            max_results: 500,
            ..Default::default()
        },
        ctx.app.config.fuzzy_distance,
    )?;

    let mut references = Vec::new();
    for file in &files {
        for (idx, line) in file.content.lines().enumerate() {
            if word.is_match(line) {
                references.push(json!({
                    "file": file.file_path,
                    "repository": file.repo_name,
                    "line": idx as u64 + 1,
                    "text": line.trim(),
                }));
            }
        }
    }

    let mut definitions = Vec::new();
    if include_definitions {
        let types: Vec<String> = match &symbol_type {
            Some(t) => vec![t.clone()],
            None => SYMBOL_TYPES.iter().map(|t| (*t).to_string()).collect(),
        };
        for doc_type in types {
            let results = store.search(
                &SearchQuery {
                    text: symbol_name.to_owned(),
                    doc_type: Some(doc_type),
                    repository: repository.clone(),
                    max_results: 100,
                    ..Default::default()
                },
                ctx.app.config.fuzzy_distance,
            )?;
            for result in results {
                if result.name.as_deref() == Some(symbol_name) {
                    definitions.push(json!({
                        "name": result.name,
                        "type": result.doc_type,
                        "file": result.file_path,
                        "repository": result.repo_name,
                        "line": result.start_line,
                    }));
                }
            }
        }
    }

    Ok(json!({
        "symbol": symbol_name,
        "references": references,
        "definitions": definitions,
    }))
}
