//! HTTP webhook receiver: URL-verification handshake, token validation,
//! idempotency, sender allowlist, and dispatch into the orchestrator.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use orchestrator_channels::{parse_requirement_event, FeishuChannelConfig, Messenger};
use orchestrator_core::intent::ModelIntentClassifier;
use orchestrator_engine::{DispatchPolicy, Orchestrator, RepoConfig, Requirement};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::idempotency::SeenMessageStore;

pub struct AppState<M: ModelIntentClassifier> {
    pub orchestrator: Arc<Orchestrator<M>>,
    pub messenger: Arc<dyn Messenger>,
    pub repo: RepoConfig,
    pub policy: DispatchPolicy,
    pub feishu: FeishuChannelConfig,
    pub seen_messages: Arc<SeenMessageStore>,
}

impl<M: ModelIntentClassifier> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            messenger: self.messenger.clone(),
            repo: self.repo.clone(),
            policy: self.policy,
            feishu: self.feishu.clone(),
            seen_messages: self.seen_messages.clone(),
        }
    }
}

pub fn app_router<M>(state: AppState<M>) -> Router
where
    M: ModelIntentClassifier + 'static,
{
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/health", get(health))
        .route("/", post(webhook::<M>))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn serve<M>(addr: SocketAddr, state: AppState<M>) -> anyhow::Result<()>
where
    M: ModelIntentClassifier + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("webhook server listening on http://{addr}");
    axum::serve(listener, app_router(state)).await?;
    Ok(())
}

fn token_from_payload(payload: &Value) -> Option<&str> {
    payload
        .get("token")
        .and_then(Value::as_str)
        .or_else(|| payload.get("header").and_then(|header| header.get("token")).and_then(Value::as_str))
}

async fn webhook<M>(State(state): State<AppState<M>>, Json(payload): Json<Value>) -> Response
where
    M: ModelIntentClassifier + 'static,
{
    if payload.get("type").and_then(Value::as_str) == Some("url_verification") {
        return match payload.get("challenge") {
            Some(challenge) => (StatusCode::OK, Json(json!({ "challenge": challenge }))).into_response(),
            None => (StatusCode::BAD_REQUEST, Json(json!({"error": "missing challenge"}))).into_response(),
        };
    }

    if !state.feishu.verification_token.is_empty() {
        let token = token_from_payload(&payload).unwrap_or_default();
        if token != state.feishu.verification_token {
            return (StatusCode::FORBIDDEN, Json(json!({"error": "invalid token"}))).into_response();
        }
    }

    if let Some(event_type) = payload.get("header").and_then(|header| header.get("event_type")).and_then(Value::as_str) {
        if event_type != "im.message.receive_v1" {
            return (
                StatusCode::OK,
                Json(json!({"status": "ignored", "reason": format!("unsupported_event_type:{event_type}")})),
            )
                .into_response();
        }
    }

    let requirement = match parse_requirement_event(&payload) {
        Ok(requirement) => requirement,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()}))).into_response();
        }
    };

    if !state.seen_messages.record_if_new(&requirement.message_id).await {
        return (StatusCode::OK, Json(json!({"status": "duplicate"}))).into_response();
    }

    if !state.feishu.allow_from.is_empty() && !state.feishu.allow_from.contains(&requirement.user_id) {
        return (
            StatusCode::OK,
            Json(json!({"status": "ignored", "reason": "sender_not_allowed"})),
        )
            .into_response();
    }

    let requirement = Requirement {
        source_type: "feishu".to_string(),
        user_id: requirement.user_id,
        chat_id: requirement.chat_id,
        message_id: requirement.message_id,
        text: requirement.text,
    };

    match state.orchestrator.process_feishu_message(&requirement, &state.repo, &state.policy).await {
        Ok((task, reply)) => {
            if let Err(err) = state.messenger.send_text(&requirement.chat_id, &reply).await {
                warn!(task_id = %task.task_id, error = %err, "failed to send webhook reply");
            }
            (StatusCode::OK, Json(json!({"status": "ok", "task_id": task.task_id}))).into_response()
        }
        Err(err) => {
            warn!(error = %err, "webhook dispatch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": err.to_string()}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use orchestrator_agent::{AgentAdapter, BuildResult, ClarifyResult, TestResult, TokenUsage};
    use orchestrator_channels::NullMessenger;
    use orchestrator_core::error::Result;
    use orchestrator_core::intent::HybridIntentClassifier;
    use orchestrator_core::model::{ApprovalGate, Plan, PlanConstraints, PlanMetadata, PlanStep, StepStatus, StepType};
    use orchestrator_core::store::TaskStore;
    use orchestrator_engine::NoopModelClassifier;
    use tower::ServiceExt;

    struct StubAgent;

    #[async_trait]
    impl AgentAdapter for StubAgent {
        async fn clarify(&self, task: &orchestrator_core::model::Task) -> Result<ClarifyResult> {
            Ok(ClarifyResult {
                summary: "stub summary".to_string(),
                plan: Plan {
                    plan_id: "p1".to_string(),
                    task_id: task.task_id.clone(),
                    version: 1,
                    goal: "stub goal".to_string(),
                    assumptions: vec![],
                    constraints: PlanConstraints {
                        allowed_paths: vec!["src/**".to_string()],
                        forbidden_paths: vec![],
                        max_files_changed: 20,
                    },
                    questions: vec![],
                    steps: vec![
                        PlanStep {
                            id: "s_code".to_string(),
                            step_type: StepType::Code,
                            title: "write it".to_string(),
                            command: None,
                            status: StepStatus::Pending,
                        },
                        PlanStep {
                            id: "s_test".to_string(),
                            step_type: StepType::Test,
                            title: "test it".to_string(),
                            command: Some("pytest -q".to_string()),
                            status: StepStatus::Pending,
                        },
                    ],
                    approval_gate: ApprovalGate::default(),
                    metadata: PlanMetadata::default(),
                },
                usage: TokenUsage::default(),
                raw_text: "stub".to_string(),
            })
        }

        async fn build(&self, task: &orchestrator_core::model::Task) -> Result<BuildResult> {
            Ok(BuildResult {
                changed_files: vec!["src/lib.rs".to_string()],
                diff_path: format!("{}/diff.txt", task.task_id),
                output_text: "done".to_string(),
                usage: TokenUsage::default(),
            })
        }

        async fn run_test(&self, _task: &orchestrator_core::model::Task, _command: &str) -> Result<TestResult> {
            Ok(TestResult {
                command: "pytest -q".to_string(),
                exit_code: 0,
                log_path: "log.txt".to_string(),
                duration_ms: 10,
            })
        }
    }

    fn test_state() -> (AppState<NoopModelClassifier>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().join("tasks")).unwrap();
        let orchestrator = Orchestrator::new(
            store,
            Arc::new(StubAgent),
            HybridIntentClassifier::new(None),
            dir.path().join("reports"),
        );
        let seen_messages = SeenMessageStore::load(dir.path().join("seen_messages.json")).unwrap();
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            messenger: Arc::new(NullMessenger),
            repo: RepoConfig {
                name: "demo".to_string(),
                base_branch: "main".to_string(),
                repo_path: std::env::temp_dir(),
                worktrees_root: std::env::temp_dir(),
                branch_prefix: "task".to_string(),
            },
            policy: DispatchPolicy::default(),
            feishu: FeishuChannelConfig::default(),
            seen_messages: Arc::new(seen_messages),
        };
        (state, dir)
    }

    fn message_payload(message_id: &str, user_id: &str, text: &str) -> Value {
        json!({
            "header": { "event_type": "im.message.receive_v1" },
            "event": {
                "message": {
                    "message_id": message_id,
                    "chat_id": "chat-1",
                    "content": format!("{{\"text\":\"{text}\"}}"),
                },
                "sender": { "sender_id": { "open_id": user_id } },
            },
        })
    }

    #[tokio::test]
    async fn health_route_returns_ok() {
        let (state, _dir) = test_state();
        let app = app_router(state);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.get("status").and_then(Value::as_str), Some("ok"));
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let (state, _dir) = test_state();
        let app = app_router(state);
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(json!({"type": "url_verification", "challenge": "abc123"}).to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.get("challenge").and_then(Value::as_str), Some("abc123"));
    }

    #[tokio::test]
    async fn url_verification_without_challenge_is_bad_request() {
        let (state, _dir) = test_state();
        let app = app_router(state);
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(json!({"type": "url_verification"}).to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unsupported_event_type_is_ignored() {
        let (state, _dir) = test_state();
        let app = app_router(state);
        let payload = json!({"header": {"event_type": "im.message.something_else"}});
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.get("status").and_then(Value::as_str), Some("ignored"));
    }

    #[tokio::test]
    async fn new_message_creates_a_task() {
        let (state, _dir) = test_state();
        let app = app_router(state);
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(message_payload("m1", "u1", "add retry logic").to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.get("status").and_then(Value::as_str), Some("ok"));
        assert!(payload.get("task_id").and_then(Value::as_str).is_some());
    }

    #[tokio::test]
    async fn duplicate_message_id_is_reported_as_duplicate() {
        let (state, _dir) = test_state();
        let app = app_router(state);
        let body = message_payload("m1", "u1", "add retry logic").to_string();

        let first = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body.clone()))
            .unwrap();
        let resp = app.clone().oneshot(first).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let second = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let resp = app.oneshot(second).await.unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.get("status").and_then(Value::as_str), Some("duplicate"));
    }

    #[tokio::test]
    async fn sender_not_in_allowlist_is_ignored() {
        let (mut state, _dir) = test_state();
        state.feishu.allow_from = vec!["only-this-user".to_string()];
        let app = app_router(state);
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(message_payload("m1", "someone-else", "approve").to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.get("status").and_then(Value::as_str), Some("ignored"));
        assert_eq!(payload.get("reason").and_then(Value::as_str), Some("sender_not_allowed"));
    }

    #[tokio::test]
    async fn mismatched_token_is_forbidden() {
        let (mut state, _dir) = test_state();
        state.feishu.verification_token = "secret".to_string();
        let app = app_router(state);
        let mut payload = message_payload("m1", "u1", "approve");
        payload["token"] = json!("wrong");
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
