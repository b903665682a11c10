//! JSON-RPC endpoint handlers for flat and split addressing.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::JsonRpcResponse;
use tower::ServiceExt;
use tracing::debug;

use super::health::is_ready;
use super::AppState;
use crate::service::Target;

/// `POST /mcp` and `POST /api/mcp`: every backend behind one endpoint.
pub async fn flat_rpc_handler(State(state): State<AppState>, body: Bytes) -> Response {
    handle_rpc(state, None, body).await
}

/// `POST /<backend>/...`: the first path segment names the backend.
pub async fn split_rpc_handler(State(state): State<AppState>, uri: Uri, body: Bytes) -> Response {
    handle_rpc(state, Some(uri.path()), body).await
}

/// First non-empty path segment, if any.
fn backend_segment(path: &str) -> Option<&str> {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

async fn handle_rpc(state: AppState, split_path: Option<&str>, body: Bytes) -> Response {
    let _in_flight = state.shutdown.in_flight_guard();

    if !is_ready(&state) {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not ready").into_response();
    }

    let snapshot = state.registry.snapshot();
    let target = match split_path.map(backend_segment) {
        None => Target::Aggregate,
        Some(None) => {
            return (StatusCode::BAD_REQUEST, "backend name is required in path").into_response();
        }
        Some(Some(name)) if snapshot.get(name).is_none() => {
            return (StatusCode::BAD_REQUEST, format!("backend {name} not found")).into_response();
        }
        Some(Some(name)) => Target::Backend(name.to_string()),
    };

    let op = match state.classifier.classify(&body, target, snapshot) {
        Ok(op) => op,
        Err(e) => {
            debug!(error = %e, "rejected request");
            return Json(e.into_response()).into_response();
        }
    };

    let request_id = op.ctx().request_id.clone();
    let response = match state.pipeline.clone().oneshot(op).await {
        Ok(result) => JsonRpcResponse::success(request_id, result.into_value()),
        Err(e) => JsonRpcResponse::failure(request_id, e.to_error_object()),
    };
    Json(response).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::network::module::build_router;
    use crate::network::NetworkConfig;
    use crate::service::AddressingMode;
    use crate::test_support::{state_with, test_state, MockBackend};

    fn flat_router(backends: &[(&str, &[&str])]) -> (Router, Vec<Arc<MockBackend>>) {
        let (state, mocks) = state_with(backends);
        (
            build_router(state, AddressingMode::Flat, &NetworkConfig::default()),
            mocks,
        )
    }

    fn split_router(backends: &[(&str, &[&str])]) -> (Router, Vec<Arc<MockBackend>>) {
        let (state, mocks) = state_with(backends);
        (
            build_router(state, AddressingMode::Split, &NetworkConfig::default()),
            mocks,
        )
    }

    fn rpc(path: &str, body: Value) -> Request<Body> {
        Request::post(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    async fn send_json(router: Router, request: Request<Body>) -> Value {
        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn backend_segment_takes_first_component() {
        assert_eq!(backend_segment("/files/extra"), Some("files"));
        assert_eq!(backend_segment("/files"), Some("files"));
        assert_eq!(backend_segment("/"), None);
        assert_eq!(backend_segment(""), None);
    }

    #[tokio::test]
    async fn not_ready_before_installation() {
        let (state, _installer) = test_state();
        state.shutdown.set_ready();
        let router = build_router(state, AddressingMode::Flat, &NetworkConfig::default());

        let (status, body) = send(
            router,
            rpc("/mcp", json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&body[..], b"Service not ready");
    }

    #[tokio::test]
    async fn flat_list_and_call() {
        let (router, mocks) = flat_router(&[("A", &["x"]), ("B", &["x", "y"])]);

        let list = send_json(
            router.clone(),
            rpc("/mcp", json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1})),
        )
        .await;
        assert_eq!(list["id"], 1);
        let names: Vec<&str> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["x", "y"]);

        let call = send_json(
            router.clone(),
            rpc(
                "/api/mcp",
                json!({
                    "jsonrpc": "2.0",
                    "method": "tools/call",
                    "params": {"name": "y", "arguments": {"q": 1}},
                    "id": "req-2"
                }),
            ),
        )
        .await;
        assert_eq!(call["id"], "req-2");
        assert_eq!(call["result"]["backend"], "B");
        assert_eq!(call["result"]["arguments"], json!({"q": 1}));

        let missing = send_json(
            router,
            rpc(
                "/mcp",
                json!({"jsonrpc": "2.0", "method": "tools/call", "params": {"name": "z"}, "id": 3}),
            ),
        )
        .await;
        assert_eq!(missing["error"]["code"], -32001);
        assert!(mocks[0].calls().is_empty());
    }

    #[tokio::test]
    async fn flat_mode_rejects_other_paths() {
        let (router, _mocks) = flat_router(&[("A", &["x"])]);
        let (status, _) = send(
            router,
            rpc("/A", json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_post_is_method_not_allowed() {
        let (router, _mocks) = flat_router(&[("A", &["x"])]);
        let (status, _) = send(router, Request::get("/mcp").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn parse_error_has_null_id_in_both_modes() {
        let (flat, _a) = flat_router(&[("A", &["x"])]);
        let (split, _b) = split_router(&[("A", &["x"])]);
        for (router, path) in [(flat, "/mcp"), (split, "/A")] {
            let request = Request::post(path).body(Body::from("{not json")).unwrap();
            let response = send_json(router, request).await;
            assert_eq!(response["error"]["code"], -32700);
            assert_eq!(response["id"], Value::Null);
        }
    }

    #[tokio::test]
    async fn unknown_method_echoes_id() {
        let (router, _mocks) = flat_router(&[("A", &["x"])]);
        let response = send_json(
            router,
            rpc("/mcp", json!({"jsonrpc": "2.0", "method": "prompts/list", "id": 9})),
        )
        .await;
        assert_eq!(response["id"], 9);
        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["error"]["data"], "prompts/list");
    }

    #[tokio::test]
    async fn split_mode_routes_by_first_segment() {
        let (router, mocks) = split_router(&[("A", &["x"]), ("B", &["x", "y"])]);
        let response = send_json(
            router,
            rpc(
                "/B/anything",
                json!({"jsonrpc": "2.0", "method": "tools/call", "params": {"name": "y"}, "id": 1}),
            ),
        )
        .await;
        assert_eq!(response["result"]["backend"], "B");
        assert_eq!(mocks[0].list_calls(), 0);
        assert!(mocks[0].calls().is_empty());
    }

    #[tokio::test]
    async fn split_mode_routing_errors_are_plain_400s() {
        let (router, _mocks) = split_router(&[("A", &["x"])]);
        let body = json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1});

        let (status, text) = send(router.clone(), rpc("/", body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(&text[..], b"backend name is required in path");

        let (status, text) = send(router, rpc("/nope", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(&text[..], b"backend nope not found");
    }

    #[tokio::test]
    async fn split_mode_reaches_backend_named_health() {
        let (router, mocks) = split_router(&[("health", &["x"]), ("other", &["y"])]);

        for path in ["/health", "/health/readiness", "/health/extra"] {
            let response = send_json(
                router.clone(),
                rpc(
                    path,
                    json!({"jsonrpc": "2.0", "method": "tools/call", "params": {"name": "x"}, "id": 1}),
                ),
            )
            .await;
            assert_eq!(response["result"]["backend"], "health", "path {path}");
        }
        assert_eq!(mocks[0].calls().len(), 3);

        let (status, text) = send(
            router,
            Request::get("/health/liveness").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&text[..], b"Liveness OK");
    }

    #[tokio::test]
    async fn initialize_and_initialized() {
        let (router, _mocks) = split_router(&[("A", &["x"])]);
        let init = send_json(
            router.clone(),
            rpc("/A", json!({"jsonrpc": "2.0", "method": "initialize", "id": 0})),
        )
        .await;
        assert_eq!(init["result"]["serverInfo"]["name"], "mcp-relay");

        let ack = send_json(
            router,
            rpc("/A", json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
        )
        .await;
        assert_eq!(ack["result"], json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out_as_internal_error() {
        let (state, mocks) = state_with(&[("A", &["slow"])]);
        mocks[0].set_call_delay(Duration::from_secs(600));
        let router = build_router(state, AddressingMode::Flat, &NetworkConfig::default());

        let response = send_json(
            router,
            rpc(
                "/mcp",
                json!({"jsonrpc": "2.0", "method": "tools/call", "params": {"name": "slow"}, "id": 4}),
            ),
        )
        .await;
        assert_eq!(response["id"], 4);
        assert_eq!(response["error"]["code"], -32603);
        assert_eq!(response["error"]["message"], "Internal error");
    }
}
