use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use ci_insight_core::config::Config;
use ci_insight_db::MemoryStore;
use ci_insight_github::webhook::sign;
use serde_json::json;
use tower::ServiceExt;
use tower_sessions::MemoryStore as MemorySessionStore;
use wiremock::MockServer;

use crate::{AppState, app, build_state};

pub const TEST_SECRET: &str = "test webhook secret";

// Nothing listens here; requests fail fast when a test has no mock server.
const UNREACHABLE: &str = "http://127.0.0.1:1";

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    /// Dev-mode app with in-memory storage. GitHub and OpenAI point at `server` when given.
    pub async fn new(server: Option<&MockServer>, token: Option<&str>) -> Self {
        Self::with_config(test_config(server, token))
    }

    pub fn with_config(config: Config) -> Self {
        let state = build_state(Arc::new(config), Arc::new(MemoryStore::default())).unwrap();
        let router = app(state.clone(), MemorySessionStore::default());
        Self { state, router }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
        let mut request = Request::get(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    /// Log in as the development user and return the session cookie.
    pub async fn dev_login(&self) -> String {
        let response = self.get("/login", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        cookie.split(';').next().unwrap().to_string()
    }
}

/// Dev-mode config signing deliveries with `TEST_SECRET`.
pub fn test_config(server: Option<&MockServer>, token: Option<&str>) -> Config {
    let base = server.map_or_else(|| UNREACHABLE.to_string(), |s| s.uri());
    serde_json::from_value(json!({
        "server": { "port": 0, "dev_mode": true },
        "http": { "timeout_secs": 5 },
        "github": {
            "api_url": base,
            "token": token,
            "webhook_secret": TEST_SECRET,
        },
        "openai": { "api_key": "sk-test", "api_base": base },
    }))
    .unwrap()
}

pub fn signed_webhook(kind: &str, payload: &serde_json::Value) -> Request<Body> {
    let body = payload.to_string();
    Request::post("/api/github/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-GitHub-Event", kind)
        .header("X-GitHub-Delivery", "72d3162e-cc78-11e3-81ab-4c9367dc0958")
        .header("X-Hub-Signature-256", sign(TEST_SECRET.as_bytes(), body.as_bytes()))
        .body(Body::from(body))
        .unwrap()
}

/// `workflow_run.completed` delivery for a failed run of `octo/app`.
pub fn failed_run_event(server: &MockServer, repo_id: u64, run_id: u64) -> serde_json::Value {
    json!({
        "action": "completed",
        "workflow_run": {
            "id": run_id,
            "conclusion": "failure",
            "jobs_url": format!("{}/repos/octo/app/actions/runs/{run_id}/jobs", server.uri()),
        },
        "repository": { "id": repo_id, "full_name": "octo/app" },
        "sender": { "login": "octocat" },
    })
}

pub fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
    })
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
