use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};

use crate::errors::{ToolError, ToolResult};
use crate::indexes::query::SearchQuery;
use crate::indexes::schema::ids;
use crate::locking::{LockMode, ResourceType};
use crate::parsing::types::CodeFile;
use crate::repo::pool::{find_repository, list_repositories};

use super::args::{opt_bool, opt_str, opt_u64, require_str};
use super::paths::{repo_relative, resolve_in_repo};
use super::{ParamSpec, ParamType, ToolContext, ToolRegistry};

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(
        "index_repository",
        "Index a repository from a local path or url so it becomes searchable",
        "core",
        vec![
            ParamSpec::required("path", ParamType::String, "Local path or url of the repository"),
            ParamSpec::optional("name", ParamType::String, "Display name; defaults to the directory name"),
        ],
        Arc::new(|ctx| index_repository(ctx).boxed()),
    );
    registry.register(
        "search_code",
        "Full-text search over indexed files, symbols, comments and chunks",
        "core",
        vec![
            ParamSpec::required("query", ParamType::String, "Search text"),
            ParamSpec::optional("type", ParamType::String, "Restrict to a document type (file, function, class, variable, comment, chunk)"),
            ParamSpec::optional("language", ParamType::String, "Restrict to a language tag"),
            ParamSpec::optional("repository", ParamType::String, "Restrict to one repository (name or id)"),
            ParamSpec::optional("max_results", ParamType::Number, "Result cap, default 50"),
            ParamSpec::optional("fuzzy", ParamType::Boolean, "Tolerate typos (edit distance 2)"),
        ],
        Arc::new(|ctx| search_code(ctx).boxed()),
    );
    registry.register(
        "get_metadata",
        "Structured metadata for one indexed file: symbols, imports, comments, chunks",
        "core",
        vec![
            ParamSpec::required("file_path", ParamType::String, "File path, repo-relative or absolute"),
            ParamSpec::optional("repository", ParamType::String, "Repository name or id"),
        ],
        Arc::new(|ctx| get_metadata(ctx).boxed()),
    );
    registry.register(
        "list_repositories",
        "All indexed repositories with their statistics",
        "core",
        vec![],
        Arc::new(|ctx| list_repositories_tool(ctx).boxed()),
    );
    registry.register(
        "get_index_stats",
        "Document counts by type, language and repository",
        "utility",
        vec![],
        Arc::new(|ctx| get_index_stats(ctx).boxed()),
    );
    registry.register(
        "refresh_index",
        "Re-index one repository, or every repository when none is named",
        "project",
        vec![
            ParamSpec::optional("repository", ParamType::String, "Repository name or id"),
            ParamSpec::optional("force_rebuild", ParamType::Boolean, "Wipe the index before re-indexing"),
        ],
        Arc::new(|ctx| refresh_index(ctx).boxed()),
    );
}

async fn index_repository(ctx: ToolContext) -> ToolResult<Value> {
    let origin = require_str(&ctx.args, "path")?;
    let name = opt_str(&ctx.args, "name");
    let store = ctx.app.store_for(&ctx.session)?;
    let report = ctx
        .app
        .indexer
        .index_repository(&store, origin, name, &ctx.session.id, &ctx.cancel)
        .await?;
    Ok(serde_json::to_value(report).map_err(|err| ToolError::internal(err.to_string()))?)
}

async fn search_code(ctx: ToolContext) -> ToolResult<Value> {
    let query = SearchQuery {
        text: require_str(&ctx.args, "query")?.to_owned(),
        doc_type: opt_str(&ctx.args, "type").map(str::to_owned),
        language: opt_str(&ctx.args, "language").map(str::to_owned),
        repository: opt_str(&ctx.args, "repository").map(str::to_owned),
        path: None,
        fuzzy: opt_bool(&ctx.args, "fuzzy")?.unwrap_or(false),
        max_results: opt_u64(&ctx.args, "max_results")?.unwrap_or(50) as usize,
    };
    let store = ctx.app.store_for(&ctx.session)?;

    let lock = ctx
        .app
        .locks
        .acquire(
            ResourceType::Index,
            "main",
            LockMode::Read,
            &ctx.session.id,
            std::time::Duration::from_secs(ctx.app.config.lock_timeout_secs),
            &ctx.cancel,
        )
        .await?;
    let results = store.search(&query, ctx.app.config.fuzzy_distance);
    let _ = ctx.app.locks.release(&lock.id).await;
    let results = results?;

    Ok(json!({
        "query": query.text,
        "total": results.len(),
        "results": results,
    }))
}

async fn get_metadata(ctx: ToolContext) -> ToolResult<Value> {
    let file_path = require_str(&ctx.args, "file_path")?;
    let repository = opt_str(&ctx.args, "repository");
    let (repo, absolute) = resolve_in_repo(&ctx.app, &ctx.session, repository, file_path)?;
    let relative = repo_relative(&repo, &absolute);

    let store = ctx.app.store_for(&ctx.session)?;
    let doc = store
        .get_by_id(&ids::file_id(&repo.id, &relative))?
        .ok_or_else(|| {
            ToolError::not_found(format!("{relative} is not indexed in {}", repo.name))
        })?;

    // the parsed file rides on the file document's metadata
    let metadata = doc
        .metadata
        .clone()
        .ok_or_else(|| ToolError::internal("file document carries no metadata"))?;
    let file: CodeFile = serde_json::from_value(metadata)
        .map_err(|err| ToolError::internal(format!("stored metadata unreadable: {err}")))?;

    Ok(json!({
        "repository": repo.name,
        "file": file,
    }))
}

async fn list_repositories_tool(ctx: ToolContext) -> ToolResult<Value> {
    let repositories = list_repositories(&ctx.app.repo_pool);
    Ok(json!({
        "total": repositories.len(),
        "repositories": repositories,
    }))
}

async fn get_index_stats(ctx: ToolContext) -> ToolResult<Value> {
    let store = ctx.app.store_for(&ctx.session)?;
    let by_type = store.count_by_type().map_err(ToolError::from)?;
    let total_documents = store.total_documents().map_err(ToolError::from)?;

    let repositories = list_repositories(&ctx.app.repo_pool);
    let mut by_repository = serde_json::Map::new();
    let mut by_language = serde_json::Map::new();
    let mut total_lines: u64 = 0;
    for repo in &repositories {
        let count = store
            .count_term(store.schema.repo_id, &repo.id)
            .map_err(ToolError::from)?;
        by_repository.insert(repo.name.clone(), json!(count));
        total_lines += repo.total_lines;
        for language in &repo.languages {
            if !by_language.contains_key(language) {
                let count = store
                    .count_term(store.schema.language, language)
                    .map_err(ToolError::from)?;
                by_language.insert(language.clone(), json!(count));
            }
        }
    }

    Ok(json!({
        "total_documents": total_documents,
        "by_type": by_type,
        "by_language": by_language,
        "by_repository": by_repository,
        "repositories": repositories.len(),
        "total_lines": total_lines,
    }))
}

async fn refresh_index(ctx: ToolContext) -> ToolResult<Value> {
    let repository = opt_str(&ctx.args, "repository").map(str::to_owned);
    let force_rebuild = opt_bool(&ctx.args, "force_rebuild")?.unwrap_or(false);
    let store = ctx.app.store_for(&ctx.session)?;
    let lock_timeout = std::time::Duration::from_secs(ctx.app.config.lock_timeout_secs);

    if force_rebuild {
        // a rebuild invalidates every reader; take the index exclusively
        let lock = ctx
            .app
            .locks
            .acquire(
                ResourceType::Index,
                "main",
                LockMode::Exclusive,
                &ctx.session.id,
                lock_timeout,
                &ctx.cancel,
            )
            .await?;
        let cleared = store.clear().await;
        let _ = ctx.app.locks.release(&lock.id).await;
        cleared.map_err(ToolError::from)?;
    }

    let targets: Vec<_> = match &repository {
        Some(name_or_id) => {
            let repo = find_repository(&ctx.app.repo_pool, name_or_id).ok_or_else(|| {
                ToolError::not_found(format!("repository {name_or_id} not found"))
            })?;
            vec![repo]
        }
        None => list_repositories(&ctx.app.repo_pool),
    };

    let mut refreshed = Vec::new();
    let mut errors = Vec::new();
    for repo in targets {
        // re-index from the recorded origin so the repo keeps its identity
        let origin = repo
            .url
            .clone()
            .unwrap_or_else(|| repo.path.to_string_lossy().into_owned());
        match ctx
            .app
            .indexer
            .index_repository(&store, &origin, Some(&repo.name), &ctx.session.id, &ctx.cancel)
            .await
        {
            Ok(report) => {
                errors.extend(report.errors.iter().cloned());
                refreshed.push(repo.name.clone());
            }
            Err(err) => errors.push(format!("{}: {}", repo.name, err.message)),
        }
    }

    let updated_stats = json!({
        "total_documents": store.total_documents().map_err(ToolError::from)?,
        "by_type": store.count_by_type().map_err(ToolError::from)?,
        "total_lines": list_repositories(&ctx.app.repo_pool)
            .iter()
            .map(|r| r.total_lines)
            .sum::<u64>(),
    });

    Ok(json!({
        "refreshed": refreshed,
        "errors": errors,
        "updated_stats": updated_stats,
    }))
}
