use std::path::Path;
use std::sync::Arc;

use codescout::application::config::Configuration;
use codescout::application::Application;
use codescout::protocol::{handle_request, RpcRequest};
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn test_app(dir: &Path) -> Application {
    let mut config: Configuration = serde_json::from_str("{}").unwrap();
    config.index_dir = dir.join("state");
    config.repo_dir = dir.join("repos");
    Application::initialize_with_fetcher(
        config,
        Arc::new(|_: &str, _: &Path| anyhow::bail!("tests never fetch remotes")),
    )
    .await
    .unwrap()
}

fn request(id: i64, method: &str, params: serde_json::Value) -> RpcRequest {
    serde_json::from_value(json!({"id": id, "method": method, "params": params})).unwrap()
}

#[tokio::test]
async fn initialize_advertises_server_info_and_tools() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let response = handle_request(
        &app,
        request(1, "initialize", json!({})),
        None,
        CancellationToken::new(),
    )
    .await;
    let result = response.result.unwrap();
    assert_eq!(result["serverInfo"]["name"], "codescout");
    assert!(result["capabilities"]["tools"].is_object());

    let response = handle_request(
        &app,
        request(2, "tools/list", json!({})),
        None,
        CancellationToken::new(),
    )
    .await;
    let result = response.result.unwrap();
    assert!(result["total"].as_u64().unwrap() >= 19);
    assert!(result["tools"]
        .as_array()
        .unwrap()
        .iter()
        .any(|tool| tool["name"] == "search_code"));
}

#[tokio::test]
async fn tools_call_round_trip_over_the_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().join("proj");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(repo.join("main.go"), "func Hello() {}\n").unwrap();

    let app = test_app(dir.path()).await;
    let response = handle_request(
        &app,
        request(
            3,
            "tools/call",
            json!({"tool": "index_repository", "arguments": {"path": repo.to_str().unwrap()}}),
        ),
        None,
        CancellationToken::new(),
    )
    .await;
    assert!(response.error.is_none(), "error: {:?}", response.error);
    let result = response.result.unwrap();
    assert_eq!(result["repository"]["file_count"], 1);

    // MCP-style `name` key works the same
    let response = handle_request(
        &app,
        request(
            4,
            "tools/call",
            json!({"name": "search_code", "arguments": {"query": "Hello"}}),
        ),
        None,
        CancellationToken::new(),
    )
    .await;
    let result = response.result.unwrap();
    assert!(result["total"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn unknown_methods_and_bad_calls_return_structured_errors() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let response = handle_request(
        &app,
        request(5, "resources/list", json!({})),
        None,
        CancellationToken::new(),
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32601);

    let response = handle_request(
        &app,
        request(6, "tools/call", json!({"tool": "search_code", "arguments": {}})),
        None,
        CancellationToken::new(),
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32602);

    let response = handle_request(
        &app,
        request(7, "tools/call", json!({"tool": "not_a_tool"})),
        None,
        CancellationToken::new(),
    )
    .await;
    assert_eq!(response.error.unwrap().code, -32004);
}

#[tokio::test]
async fn stdio_mode_responses_carry_no_session_info() {
    let dir = tempfile::tempdir().unwrap();
    let mut config: Configuration = serde_json::from_str("{}").unwrap();
    config.index_dir = dir.path().join("state");
    config.repo_dir = dir.path().join("repos");
    config.stdio = true;
    let app = Application::initialize_with_fetcher(
        config,
        Arc::new(|_: &str, _: &Path| anyhow::bail!("tests never fetch remotes")),
    )
    .await
    .unwrap();

    let response = handle_request(
        &app,
        request(10, "tools/call", json!({"tool": "list_repositories"})),
        None,
        CancellationToken::new(),
    )
    .await;
    let result = response.result.unwrap();
    // single-client process: the payload stays bare
    assert!(result.get("session_info").is_none());
    assert_eq!(result["total"], 0);
}

#[tokio::test]
async fn transport_session_binds_when_no_explicit_id() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path()).await;

    let response = handle_request(
        &app,
        request(8, "tools/call", json!({"tool": "list_repositories"})),
        Some("editor-42"),
        CancellationToken::new(),
    )
    .await;
    let result = response.result.unwrap();
    assert_eq!(result["session_info"]["id"], "editor-42");

    // explicit argument beats transport metadata
    let response = handle_request(
        &app,
        request(
            9,
            "tools/call",
            json!({"tool": "list_repositories", "session_id": "editor-43"}),
        ),
        Some("editor-42"),
        CancellationToken::new(),
    )
    .await;
    let result = response.result.unwrap();
    assert_eq!(result["session_info"]["id"], "editor-43");
}
