use crate::catalog::{Question, QuestionCatalog};
use crate::error::{self, CatalogError, SandboxError};
use crate::executor::{ExecuteRequest, Executor};
use crate::model::{ExecutionMode, ExecutionOutcome, Phase};
use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct AppState {
    pub catalog: Arc<dyn QuestionCatalog>,
    pub executor: Arc<Executor>,
}

impl AppState {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            catalog: executor.catalog(),
            executor,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    #[serde(alias = "user_execution_code")]
    pub code: String,
    pub language: String,
    #[serde(alias = "question_code")]
    pub question_code: i64,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// Body of `PUT /questions/:code/test`; the question comes from the path
#[derive(Debug, Deserialize)]
pub struct TestBody {
    #[serde(alias = "user_execution_code")]
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub phase: Phase,
    pub mode: ExecutionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<ExecutionOutcome> for ExecuteResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        Self {
            output: outcome.output_text(),
            phase: outcome.phase,
            mode: outcome.mode,
            reason: outcome.reason,
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Sandbox(SandboxError),
    Catalog(CatalogError),
    BadRequest(String),
}

impl From<SandboxError> for ApiError {
    fn from(err: SandboxError) -> Self {
        ApiError::Sandbox(err)
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Catalog(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Sandbox(e) => (
                StatusCode::from_u16(error::status_code(e))
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                error::kind(e),
                e.to_string(),
            ),
            ApiError::Catalog(e) => {
                let (status, kind) = match e {
                    CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "QuestionNotFound"),
                    CatalogError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
                    CatalogError::Invalid(_) => (StatusCode::BAD_REQUEST, "InvalidQuestion"),
                    CatalogError::Storage { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "CatalogError")
                    }
                };
                (status, kind, e.to_string())
            }
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "InvalidSubmission", message.clone())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(%kind, %message, "request failed");
        }
        let body = json!({ "error": { "kind": kind, "message": message } });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute))
        .route("/questions", get(list_questions).post(create_question))
        .route(
            "/questions/:code",
            get(get_question).put(update_question).delete(delete_question),
        )
        .route("/questions/:code/test", put(test_question))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let mode = state.executor.mode();
    let app = router(state);

    info!(%addr, %mode, "sandexec listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested, draining in-flight runs");
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "mode": state.executor.mode() }))
}

async fn execute(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(body) = body?;
    let outcome = state
        .executor
        .execute(ExecuteRequest {
            source: body.code,
            language: body.language,
            question_code: body.question_code,
            arguments: body.arguments,
        })
        .await?;
    Ok(Json(outcome.into()))
}

async fn test_question(
    State(state): State<Arc<AppState>>,
    Path(code): Path<i64>,
    body: Result<Json<TestBody>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let Json(body) = body?;
    let outcome = state
        .executor
        .execute(ExecuteRequest {
            source: body.code,
            language: body.language,
            question_code: code,
            arguments: body.arguments,
        })
        .await?;
    Ok(Json(outcome.into()))
}

async fn list_questions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Question>>, ApiError> {
    Ok(Json(state.catalog.list().await?))
}

async fn get_question(
    State(state): State<Arc<AppState>>,
    Path(code): Path<i64>,
) -> Result<Json<Question>, ApiError> {
    Ok(Json(state.catalog.get(code).await?))
}

async fn create_question(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Question>, JsonRejection>,
) -> Result<(StatusCode, Json<Question>), ApiError> {
    let Json(question) = body?;
    let created = state.catalog.create(question).await?;
    info!(code = created.code, "question created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_question(
    State(state): State<Arc<AppState>>,
    Path(code): Path<i64>,
    body: Result<Json<Question>, JsonRejection>,
) -> Result<Json<Question>, ApiError> {
    let Json(mut question) = body?;
    question.code = code;
    Ok(Json(state.catalog.update(code, question).await?))
}

async fn delete_question(
    State(state): State<Arc<AppState>>,
    Path(code): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.catalog.delete(code).await?;
    info!(code, "question deleted");
    Ok(StatusCode::NO_CONTENT)
}
