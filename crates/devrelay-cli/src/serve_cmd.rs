//! `devrelay serve`: the HTTP ingress for C1 (Webhook Ingress) and the
//! manual-trigger / status surface spec.md §6 names.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use devrelay_core::queue::{self, reactivation};
use devrelay_core::webhook::guard::{self, SIGNATURE_HEADER};
use devrelay_core::webhook::WebhookSecret;
use devrelay_db::models::{AuditSeverity, ProcessingStatus, ReactivationTrigger, Task};
use devrelay_db::queries::{audit, runs as runs_db, steps as steps_db, tasks as tasks_db, webhook_events as webhook_events_db};

/// The handle tracker comments must mention for a reply to count as the
/// "agent mention" trigger rule in §4.1.
const AGENT_MENTION: &str = "@devrelay";

/// The seven canonical nodes in the order `/workflow/status` reports
/// progress against.
const NODE_SEQUENCE: &[&str] = &[
    "prepare_environment",
    "implement_task",
    "run_tests",
    "human_validation",
    "finalize_pr",
    "update_tracker",
];

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, message: msg.into() }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: format!("{err:#}") }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Shared server state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    webhook_secret: WebhookSecret,
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Expected shape of an inbound tracker webhook payload. Trackers vary in
/// their actual wire format; this is the normalized shape C1 classifies
/// against.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event_type: String,
    external_item_id: Option<String>,
    update_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    repository_url: Option<String>,
    default_branch: Option<String>,
    priority: Option<i32>,
    creator_id: Option<String>,
    creator_email: Option<String>,
    creator_name: Option<String>,
    body: Option<String>,
    reopened: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunRequest {
    external_item_id: String,
    title: String,
    description: String,
    repository_url: String,
    priority: Option<i32>,
}

#[derive(Debug, Serialize)]
struct WorkflowRunResponse {
    task_id: i64,
    status: String,
}

#[derive(Debug, Serialize)]
struct WorkflowStatusResponse {
    status: String,
    current_run_id: Option<i64>,
    current_node: Option<String>,
    progress_pct: u8,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool, webhook_secret: WebhookSecret) -> Router {
    let state = AppState { pool, webhook_secret };
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/webhook/{source}", post(ingest_webhook))
        .route("/workflow/run", post(run_workflow))
        .route("/workflow/status/{task_id}", get(workflow_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, webhook_secret: WebhookSecret, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool, webhook_secret);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!(%addr, "devrelay serve listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("devrelay serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn index(State(state): State<AppState>) -> Result<axum::response::Response, AppError> {
    let tasks = tasks_db::list_tasks(&state.pool).await.map_err(AppError::internal)?;

    let rows = if tasks.is_empty() {
        "<tr><td colspan=\"4\">No tasks found.</td></tr>".to_string()
    } else {
        tasks
            .iter()
            .map(|t| {
                format!(
                    "<tr><td><a href=\"/workflow/status/{id}\">{id}</a></td><td>{source}</td><td>{title}</td><td>{status}</td></tr>",
                    id = t.id,
                    source = t.source,
                    title = t.title,
                    status = t.status,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>devrelay</title></head><body>\
<h1>devrelay</h1>\
<p><a href=\"/health\">/health</a></p>\
<table><tr><th>ID</th><th>Source</th><th>Title</th><th>Status</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

/// `POST /webhook/<source>` -- validate the signature, persist the raw
/// event, and return within bounds. Classification runs synchronously here
/// (there is no separate broker hop in this substrate); a failure after the
/// event is persisted leaves it `unprocessed` for the sweeper to retry.
async fn ingest_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<axum::response::Response, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = guard::check_request(&state.webhook_secret, signature, &body) {
        return Err(AppError::unauthorized(e.to_string()));
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);

    let event = webhook_events_db::insert_event(&state.pool, &source, event_type_of(&payload), payload.clone(), headers_json(&headers), signature)
        .await
        .map_err(AppError::internal)?;

    match classify_and_route(&state.pool, &source, &payload).await {
        Ok(related_task_id) => {
            webhook_events_db::mark_processed(&state.pool, event.id, ProcessingStatus::Processed, related_task_id)
                .await
                .ok();
        }
        Err(ClassifyError::Invalid(reason)) => {
            webhook_events_db::mark_processed(&state.pool, event.id, ProcessingStatus::Invalid, None).await.ok();
            audit::record(&state.pool, "webhook-ingress", "invalid_payload", &format!("webhook_event:{}", event.id), AuditSeverity::Medium, Some(serde_json::json!({"reason": reason})))
                .await
                .ok();
        }
        Err(ClassifyError::Internal(e)) => {
            tracing::warn!(event_id = event.id, error = %e, "classification failed; leaving event unprocessed for the sweeper");
        }
    }

    Ok(StatusCode::OK.into_response())
}

fn event_type_of(payload: &serde_json::Value) -> &str {
    payload.get("event_type").and_then(|v| v.as_str()).unwrap_or("unknown")
}

fn headers_json(headers: &HeaderMap) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .filter(|(name, _)| *name != SIGNATURE_HEADER.to_lowercase())
        .map(|(name, value)| (name.to_string(), serde_json::Value::String(value.to_str().unwrap_or("").to_string())))
        .collect();
    serde_json::Value::Object(map)
}

enum ClassifyError {
    Invalid(String),
    Internal(anyhow::Error),
}

/// Classification per §4.1: new task on creation, reactivation candidate on
/// a mention or reopening, otherwise dropped (but still marked processed).
/// Returns the related task id, if any, for the event's `related_task_id`.
async fn classify_and_route(pool: &PgPool, source: &str, payload: &serde_json::Value) -> Result<Option<i64>, ClassifyError> {
    let parsed: WebhookPayload = serde_json::from_value(payload.clone())
        .map_err(|e| ClassifyError::Invalid(format!("malformed webhook payload: {e}")))?;

    let external_item_id = parsed
        .external_item_id
        .as_deref()
        .ok_or_else(|| ClassifyError::Invalid("missing external_item_id".to_string()))?;

    let existing = tasks_db::get_task_by_external(pool, source, external_item_id)
        .await
        .map_err(ClassifyError::Internal)?;

    match (existing, parsed.event_type.as_str()) {
        (None, "created") => {
            let task = tasks_db::insert_task(
                pool,
                source,
                external_item_id,
                parsed.title.as_deref().unwrap_or(external_item_id),
                parsed.description.as_deref().unwrap_or(""),
                parsed.priority.unwrap_or(0),
                parsed.repository_url.as_deref().unwrap_or(""),
                parsed.default_branch.as_deref().unwrap_or("main"),
                parsed.creator_id.as_deref(),
                parsed.creator_email.as_deref(),
                parsed.creator_name.as_deref(),
            )
            .await
            .map_err(ClassifyError::Internal)?;

            queue::enqueue(pool, external_item_id, Some(task.id), task.priority, payload.clone())
                .await
                .map_err(ClassifyError::Internal)?;

            Ok(Some(task.id))
        }
        (Some(task), "comment") => {
            let mentions_agent = parsed.body.as_deref().map(|b| b.contains(AGENT_MENTION)).unwrap_or(false);
            if !mentions_agent {
                return Ok(Some(task.id));
            }
            let update_id = parsed.update_id.as_deref().unwrap_or_default();
            reactivate(pool, &task, update_id, ReactivationTrigger::Update, payload, &parsed).await?;
            Ok(Some(task.id))
        }
        (Some(task), "status_change") => {
            if parsed.reopened != Some(true) {
                return Ok(Some(task.id));
            }
            let update_id = parsed.update_id.as_deref().unwrap_or_default();
            reactivate(pool, &task, update_id, ReactivationTrigger::StatusChange, payload, &parsed).await?;
            Ok(Some(task.id))
        }
        (existing, _) => Ok(existing.map(|t| t.id)),
    }
}

async fn reactivate(
    pool: &PgPool,
    task: &Task,
    update_id: &str,
    trigger: ReactivationTrigger,
    payload: &serde_json::Value,
    triggering_update: &WebhookPayload,
) -> Result<(), ClassifyError> {
    let decision = reactivation::try_reactivate(pool, task, update_id, trigger, payload.clone())
        .await
        .map_err(ClassifyError::Internal)?;
    tracing::debug!(task_id = task.id, ?decision, "reactivation candidate evaluated");
    if matches!(decision, reactivation::ReactivationDecision::Reactivated) {
        // The next human validation must treat whoever triggered this
        // reactivation as the authorized responder, not the original ticket
        // creator. Fall back to the ticket's recorded creator only when the
        // triggering update itself carries no identity, and say so loudly --
        // that fallback means an unrelated party could be treated as
        // authorized.
        let (creator_id, creator_email, creator_name) = if triggering_update.creator_id.is_some()
            || triggering_update.creator_email.is_some()
            || triggering_update.creator_name.is_some()
        {
            (
                triggering_update.creator_id.as_deref(),
                triggering_update.creator_email.as_deref(),
                triggering_update.creator_name.as_deref(),
            )
        } else {
            tracing::warn!(
                task_id = task.id,
                update_id,
                "reactivation trigger carried no creator identity; falling back to the ticket's original creator"
            );
            (task.creator_id.as_deref(), task.creator_email.as_deref(), task.creator_name.as_deref())
        };
        tasks_db::set_creator(pool, task.id, creator_id, creator_email, creator_name)
            .await
            .map_err(ClassifyError::Internal)?;

        queue::enqueue(pool, &task.external_item_id, Some(task.id), task.priority, payload.clone())
            .await
            .map_err(ClassifyError::Internal)?;
    }
    Ok(())
}

/// `POST /workflow/run` -- manual trigger. Admin-authenticated in
/// production deployments by a reverse proxy in front of this service;
/// this substrate does not implement its own admin auth (out of scope).
async fn run_workflow(
    State(state): State<AppState>,
    Json(req): Json<WorkflowRunRequest>,
) -> Result<axum::response::Response, AppError> {
    if req.external_item_id.trim().is_empty() {
        return Err(AppError::bad_request("external_item_id must not be empty"));
    }

    let task = tasks_db::insert_task(
        &state.pool,
        "manual",
        &req.external_item_id,
        &req.title,
        &req.description,
        req.priority.unwrap_or(0),
        &req.repository_url,
        "main",
        None,
        None,
        None,
    )
    .await
    .map_err(AppError::internal)?;

    queue::enqueue(&state.pool, &req.external_item_id, Some(task.id), task.priority, serde_json::json!({}))
        .await
        .map_err(AppError::internal)?;

    Ok((StatusCode::OK, Json(WorkflowRunResponse { task_id: task.id, status: task.status.to_string() })).into_response())
}

/// `GET /workflow/status/{task_id}`.
async fn workflow_status(State(state): State<AppState>, Path(task_id): Path<i64>) -> Result<axum::response::Response, AppError> {
    let task = tasks_db::get_task(&state.pool, task_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("task {task_id} not found")))?;

    let run = runs_db::get_active_run_for_task(&state.pool, task_id).await.map_err(AppError::internal)?;

    let (current_node, progress_pct) = match &run {
        Some(r) => {
            let step = steps_db::latest_step_for_run(&state.pool, r.id).await.map_err(AppError::internal)?;
            match step {
                Some(s) => {
                    let node = s.node_name.to_string();
                    let position = NODE_SEQUENCE.iter().position(|n| *n == node).unwrap_or(0);
                    let pct = (((position + 1) * 100) / NODE_SEQUENCE.len()) as u8;
                    (Some(node), pct)
                }
                None => (None, 0),
            }
        }
        None => (None, if task.status == devrelay_db::models::TaskStatus::Completed { 100 } else { 0 }),
    };

    Ok(Json(WorkflowStatusResponse {
        status: task.status.to_string(),
        current_run_id: run.map(|r| r.id),
        current_node,
        progress_pct,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;

    use devrelay_core::webhook::{sign, WebhookSecret};
    use devrelay_test_utils::{create_test_db, drop_test_db};

    fn test_secret() -> WebhookSecret {
        WebhookSecret::new(b"serve-cmd-test-secret".to_vec())
    }

    async fn send(pool: PgPool, req: Request<Body>) -> axum::response::Response {
        let app = super::build_router(pool, test_secret());
        app.oneshot(req).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(pool.clone(), Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn index_returns_html() {
        let (pool, db_name) = create_test_db().await;

        let resp = send(pool.clone(), Request::builder().uri("/").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/html"));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn webhook_rejects_missing_signature() {
        let (pool, db_name) = create_test_db().await;

        let body = br#"{"event_type":"created","external_item_id":"PROJ-1"}"#.to_vec();
        let req = Request::builder()
            .method("POST")
            .uri("/webhook/jira")
            .body(Body::from(body))
            .unwrap();
        let resp = send(pool.clone(), req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn webhook_creates_task_on_valid_signature() {
        let (pool, db_name) = create_test_db().await;

        let secret = test_secret();
        let body = br#"{"event_type":"created","external_item_id":"PROJ-1","title":"Fix the thing","description":"d","repository_url":"git@example.com:org/repo.git"}"#.to_vec();
        let sig = sign(&secret, &body);

        let req = Request::builder()
            .method("POST")
            .uri("/webhook/jira")
            .header("X-Signature", sig)
            .body(Body::from(body))
            .unwrap();
        let resp = send(pool.clone(), req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let tasks = devrelay_db::queries::tasks::list_tasks(&pool).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].external_item_id, "PROJ-1");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn workflow_run_creates_task_and_returns_status() {
        let (pool, db_name) = create_test_db().await;

        let payload = serde_json::json!({
            "external_item_id": "MAN-1",
            "title": "Manually triggered",
            "description": "d",
            "repository_url": "git@example.com:org/repo.git",
        });
        let req = Request::builder()
            .method("POST")
            .uri("/workflow/run")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let resp = send(pool.clone(), req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let task_id = json["task_id"].as_i64().unwrap();

        let req = Request::builder().uri(format!("/workflow/status/{task_id}")).body(Body::empty()).unwrap();
        let resp = send(pool.clone(), req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "pending");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn workflow_status_not_found() {
        let (pool, db_name) = create_test_db().await;

        let req = Request::builder().uri("/workflow/status/999999").body(Body::empty()).unwrap();
        let resp = send(pool.clone(), req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
