use crate::daemon::http::ApiError;
use crate::{AgentService, TaskSnapshot, TaskSubmission};
use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn router() -> Router {
    Router::new()
        .route("/enqueue", post(enqueue_task))
        .route("/cancel", post(cancel_task))
        .route("/complete_tool", post(complete_tool))
        .route("/tasks/{task_id}", get(get_task))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    task_id: String,
}

async fn enqueue_task(
    Extension(service): Extension<Arc<AgentService>>,
    Json(req): Json<TaskSubmission>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let task_id = service.submit(req)?;
    Ok(Json(EnqueueResponse { task_id }))
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    #[serde(alias = "user_id")]
    owner_id: String,
    task_id: String,
}

async fn cancel_task(
    Extension(service): Extension<Arc<AgentService>>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<Value>, ApiError> {
    service
        .cancel(&req.owner_id, &req.task_id)
        .map_err(|e| ApiError::internal(format!("Failed to cancel task {}: {}", req.task_id, e)))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Task {} marked for cancellation", req.task_id),
    })))
}

#[derive(Debug, Deserialize)]
struct CompleteToolRequest {
    #[serde(alias = "user_id")]
    owner_id: String,
    task_id: String,
    tool_call_id: String,
    result: String,
}

async fn complete_tool(
    Extension(service): Extension<Arc<AgentService>>,
    Json(req): Json<CompleteToolRequest>,
) -> Result<Json<Value>, ApiError> {
    service
        .complete_deferred(&req.owner_id, &req.task_id, &req.tool_call_id, &req.result)
        .map_err(|e| {
            ApiError::internal(format!(
                "Failed to complete tool call {} for task {}: {}",
                req.tool_call_id, req.task_id, e
            ))
        })?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct TaskQuery {
    #[serde(alias = "user_id")]
    owner_id: String,
}

async fn get_task(
    Extension(service): Extension<Arc<AgentService>>,
    Path(task_id): Path<String>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<TaskSnapshot>, ApiError> {
    service
        .get_owned_task(&query.owner_id, &task_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Task"))
}
