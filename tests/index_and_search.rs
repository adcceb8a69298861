use std::path::Path;
use std::sync::Arc;

use codescout::application::config::Configuration;
use codescout::application::Application;
use codescout::errors::ErrorKind;
use codescout::tools::ToolCall;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn test_config(dir: &Path) -> Configuration {
    let mut config: Configuration = serde_json::from_str("{}").unwrap();
    config.index_dir = dir.join("state");
    config.repo_dir = dir.join("repos");
    config
}

async fn test_app(config: Configuration) -> Application {
    Application::initialize_with_fetcher(
        config,
        Arc::new(|_: &str, _: &Path| anyhow::bail!("tests never fetch remotes")),
    )
    .await
    .expect("application initializes")
}

async fn call(app: &Application, tool: &str, arguments: Value) -> Result<Value, codescout::errors::ToolError> {
    call_as(app, tool, arguments, None).await
}

async fn call_as(
    app: &Application,
    tool: &str,
    arguments: Value,
    session_id: Option<&str>,
) -> Result<Value, codescout::errors::ToolError> {
    app.tools
        .dispatch(
            app,
            ToolCall {
                tool: tool.to_owned(),
                arguments,
                session_id: session_id.map(str::to_owned),
            },
            None,
            CancellationToken::new(),
        )
        .await
}

#[tokio::test]
async fn index_and_search_a_tiny_repo() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("tiny");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(repo.join("main.go"), "func Hello() {}\n").unwrap();

    let app = test_app(test_config(dir.path())).await;
    let result = call(&app, "index_repository", json!({"path": repo.to_str().unwrap()}))
        .await
        .unwrap();
    assert_eq!(result["repository"]["file_count"], 1);
    assert_eq!(result["repository"]["languages"], json!(["go"]));
    // this app runs as a daemon (multi-session), so the response carries
    // session_info
    assert!(result["session_info"]["id"].is_string());

    let result = call(
        &app,
        "search_code",
        json!({"query": "Hello", "type": "function"}),
    )
    .await
    .unwrap();
    assert_eq!(result["total"], 1);
    let hit = &result["results"][0];
    assert_eq!(hit["name"], "Hello");
    assert_eq!(hit["file_path"], "main.go");
    assert_eq!(hit["start_line"], 1);
}

#[tokio::test]
async fn gitignore_is_honored_on_reindex() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("tiny");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(repo.join("main.go"), "func Hello() {}\n").unwrap();

    let app = test_app(test_config(dir.path())).await;
    let origin = repo.to_str().unwrap().to_owned();
    let result = call(&app, "index_repository", json!({"path": origin})).await.unwrap();
    assert_eq!(result["repository"]["file_count"], 1);

    std::fs::create_dir_all(repo.join("ignored")).unwrap();
    std::fs::write(repo.join(".gitignore"), "ignored/\n").unwrap();
    std::fs::write(repo.join("ignored/skip.go"), "func Skip() {}\n").unwrap();

    let result = call(&app, "index_repository", json!({"path": repo.to_str().unwrap()}))
        .await
        .unwrap();
    assert_eq!(result["repository"]["file_count"], 1, "ignored/ must not be indexed");

    let result = call(&app, "search_code", json!({"query": "Skip", "type": "function"}))
        .await
        .unwrap();
    assert_eq!(result["total"], 0);
}

#[tokio::test]
async fn line_edit_round_trip_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("proj");
    std::fs::create_dir_all(&repo).unwrap();
    let original = "l1\nl2\nl3\nl4\nl5\n";
    let file = repo.join("notes.py");
    std::fs::write(&file, original).unwrap();

    let app = test_app(test_config(dir.path())).await;
    call(&app, "index_repository", json!({"path": repo.to_str().unwrap()}))
        .await
        .unwrap();

    let result = call(
        &app,
        "insert_at_line",
        json!({"file_path": file.to_str().unwrap(), "line_number": 3, "content": "X\nY"}),
    )
    .await
    .unwrap();
    assert_eq!(result["lines_inserted"], 2);
    assert_eq!(result["new_length"], 7);

    let result = call(
        &app,
        "delete_lines",
        json!({"file_path": file.to_str().unwrap(), "start_line": 3, "end_line": 4}),
    )
    .await
    .unwrap();
    assert_eq!(result["new_length"], 5);
    assert_eq!(std::fs::read_to_string(&file).unwrap(), original);
}

#[tokio::test]
async fn workspace_isolated_sessions_read_their_own_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.isolate_workspaces = true;

    let ws_a = dir.path().join("a");
    let ws_b = dir.path().join("b");
    std::fs::create_dir_all(&ws_a).unwrap();
    std::fs::create_dir_all(&ws_b).unwrap();
    std::fs::write(ws_a.join("x.go"), "package a\n").unwrap();
    std::fs::write(ws_b.join("x.go"), "package b\n").unwrap();

    let app = test_app(config).await;
    let session_a = call(
        &app,
        "create_session",
        json!({"name": "a", "workspace_dir": ws_a.to_str().unwrap()}),
    )
    .await
    .unwrap()["session"]["id"]
        .as_str()
        .unwrap()
        .to_owned();
    let session_b = call(
        &app,
        "create_session",
        json!({"name": "b", "workspace_dir": ws_b.to_str().unwrap()}),
    )
    .await
    .unwrap()["session"]["id"]
        .as_str()
        .unwrap()
        .to_owned();

    let read_a = call_as(
        &app,
        "get_file_content",
        json!({"file_path": "x.go"}),
        Some(&session_a),
    )
    .await
    .unwrap();
    let read_b = call_as(
        &app,
        "get_file_content",
        json!({"file_path": "x.go"}),
        Some(&session_b),
    )
    .await
    .unwrap();
    assert_eq!(read_a["content"], "package a\n");
    assert_eq!(read_b["content"], "package b\n");
}

#[tokio::test]
async fn refresh_picks_up_external_edits() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("proj");
    std::fs::create_dir_all(&repo).unwrap();
    let file = repo.join("lib.rs");
    std::fs::write(&file, "pub fn original_marker() {}\n").unwrap();

    let app = test_app(test_config(dir.path())).await;
    call(&app, "index_repository", json!({"path": repo.to_str().unwrap(), "name": "proj"}))
        .await
        .unwrap();

    // edit on disk; the index intentionally lags
    std::fs::write(&file, "pub fn updated_marker() {}\npub fn second() {}\n").unwrap();
    let stale = call(&app, "search_code", json!({"query": "updated_marker"}))
        .await
        .unwrap();
    assert_eq!(stale["total"], 0, "index must lag until refresh");

    let refreshed = call(&app, "refresh_index", json!({"repository": "proj"}))
        .await
        .unwrap();
    assert_eq!(refreshed["refreshed"], json!(["proj"]));
    assert_eq!(refreshed["errors"], json!([]));
    assert_eq!(refreshed["updated_stats"]["total_lines"], 2);

    let fresh = call(&app, "search_code", json!({"query": "updated_marker", "type": "function"}))
        .await
        .unwrap();
    assert_eq!(fresh["total"], 1);
    let gone = call(&app, "search_code", json!({"query": "original_marker", "type": "function"}))
        .await
        .unwrap();
    assert_eq!(gone["total"], 0);
}

#[tokio::test]
async fn metadata_symbols_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("proj");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(
        repo.join("app.py"),
        "import os\n\nVERSION = \"1\"\n\nclass Runner:\n    def run(self):\n        return os.name\n",
    )
    .unwrap();

    let app = test_app(test_config(dir.path())).await;
    call(&app, "index_repository", json!({"path": repo.to_str().unwrap(), "name": "proj"}))
        .await
        .unwrap();

    let metadata = call(
        &app,
        "get_metadata",
        json!({"file_path": "app.py", "repository": "proj"}),
    )
    .await
    .unwrap();
    let file = &metadata["file"];
    assert_eq!(file["language"], "python");
    assert_eq!(file["classes"][0]["name"], "Runner");
    assert_eq!(file["functions"][0]["name"], "run");
    assert!(file["imports"].as_array().unwrap().len() >= 1);

    let symbols = call(
        &app,
        "find_symbols",
        json!({"symbol_name": "Runner", "symbol_type": "class"}),
    )
    .await
    .unwrap();
    assert_eq!(symbols["total"], 1);
    assert_eq!(symbols["symbols"][0]["file"], "app.py");

    let stats = call(&app, "get_index_stats", json!({})).await.unwrap();
    assert_eq!(stats["by_type"]["file"], 1);
    assert!(stats["by_repository"]["proj"].as_u64().unwrap() > 0);
    assert!(stats["by_language"]["python"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn find_files_and_references() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("proj");
    std::fs::create_dir_all(repo.join("src")).unwrap();
    std::fs::write(repo.join("src/handler.go"), "func Process() {}\n").unwrap();
    std::fs::write(
        repo.join("src/caller.go"),
        "func Run() {\n\tProcess()\n}\n",
    )
    .unwrap();

    let app = test_app(test_config(dir.path())).await;
    call(&app, "index_repository", json!({"path": repo.to_str().unwrap(), "name": "proj"}))
        .await
        .unwrap();

    let files = call(&app, "find_files", json!({"pattern": "handler"}))
        .await
        .unwrap();
    assert_eq!(files["total"], 1);
    assert_eq!(files["files"][0]["path"], "src/handler.go");

    let refs = call(&app, "find_references", json!({"symbol_name": "Process"}))
        .await
        .unwrap();
    let references = refs["references"].as_array().unwrap();
    assert!(
        references
            .iter()
            .any(|r| r["file"] == "src/caller.go" && r["line"] == 2),
        "textual reference in caller.go expected: {references:?}"
    );
    let definitions = refs["definitions"].as_array().unwrap();
    assert!(definitions
        .iter()
        .any(|d| d["file"] == "src/handler.go" && d["type"] == "function"));
}

#[tokio::test]
async fn dispatcher_surfaces_structured_errors() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(test_config(dir.path())).await;

    let err = call(&app, "no_such_tool", json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let err = call(&app, "search_code", json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);

    let err = call(&app, "search_code", json!({"query": "x", "max_results": "ten"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);

    let err = call(
        &app,
        "get_metadata",
        json!({"file_path": "/definitely/not/indexed.rs"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn repositories_persist_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("proj");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(repo.join("main.go"), "func Hello() {}\n").unwrap();

    {
        let app = test_app(test_config(dir.path())).await;
        call(&app, "index_repository", json!({"path": repo.to_str().unwrap(), "name": "proj"}))
            .await
            .unwrap();
    }

    // a new process over the same index dir sees the repo and its documents
    let app = test_app(test_config(dir.path())).await;
    let listed = call(&app, "list_repositories", json!({})).await.unwrap();
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["repositories"][0]["name"], "proj");

    let result = call(&app, "search_code", json!({"query": "Hello", "type": "function"}))
        .await
        .unwrap();
    assert_eq!(result["total"], 1);
}
