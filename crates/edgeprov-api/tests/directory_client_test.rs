#![allow(clippy::unwrap_used)]
// Integration tests for `DirectoryClient` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use edgeprov_api::{DirectoryClient, Error};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, DirectoryClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = DirectoryClient::with_client(
        reqwest::Client::new(),
        &base_url,
        "isp",
        "provisioner",
        "s3cret".to_string().into(),
    )
    .unwrap();
    (server, client)
}

async fn mount_login(server: &MockServer, uid: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "params": { "service": "common", "method": "authenticate" }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": uid })),
        )
        .mount(server)
        .await;
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn test_authenticate_success() {
    let (server, client) = setup().await;
    mount_login(&server, json!(7)).await;

    assert_eq!(client.authenticate().await.unwrap(), 7);
}

#[tokio::test]
async fn test_authenticate_rejected() {
    let (server, client) = setup().await;
    mount_login(&server, json!(false)).await;

    let result = client.authenticate().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}

// ── Model calls ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_search_authenticates_lazily() {
    let (server, client) = setup().await;
    mount_login(&server, json!(7)).await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "params": {
                "service": "object",
                "method": "execute_kw",
                "args": ["isp", 7, "s3cret", "isp.sector", "search"]
            }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 2, "result": [3] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let ids = client
        .search("isp.sector", json!([["code", "=", "NORTE"]]), Some(1))
        .await
        .unwrap();
    assert_eq!(ids, vec![3]);
}

#[tokio::test]
async fn test_create_returns_id() {
    let (server, client) = setup().await;
    mount_login(&server, json!(7)).await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "params": { "args": ["isp", 7, "s3cret", "isp.device", "create"] }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 2, "result": 42 })),
        )
        .mount(&server)
        .await;

    let id = client
        .create("isp.device", json!({ "name": "CPE-NORTE-5" }))
        .await
        .unwrap();
    assert_eq!(id, 42);
}

#[tokio::test]
async fn test_rpc_error_surfaces_server_message() {
    let (server, client) = setup().await;
    mount_login(&server, json!(7)).await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "params": { "service": "object" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {
                "code": 200,
                "message": "Odoo Server Error",
                "data": { "message": "Access Denied" }
            }
        })))
        .mount(&server)
        .await;

    let err = client
        .write("isp.device", &[1], json!({ "status": "active" }))
        .await
        .unwrap_err();
    match err {
        Error::Directory { message } => assert_eq!(message, "Access Denied"),
        other => panic!("expected Directory error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_garbage_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client.authenticate().await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }), "{err:?}");
}
