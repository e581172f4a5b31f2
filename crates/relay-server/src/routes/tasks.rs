use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use relay_core::task::{SubmitOptions, Task};
use relay_core::types::{Capability, TaskStatus};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

fn parse_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::bad_request(format!("'{id}' is not a task id")))
}

#[derive(serde::Deserialize)]
pub struct SubmitTaskBody {
    pub capability: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub review_required: Option<bool>,
    #[serde(default)]
    pub approval_required: Option<bool>,
}

/// POST /api/tasks: delegate a payload to the worker for `capability`.
///
/// Responds with the new task record plus a `task_id` field. Unknown
/// capabilities are rejected with 400 and no task is created.
pub async fn submit_task(
    State(app): State<AppState>,
    Json(body): Json<SubmitTaskBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let capability: Capability = body.capability.parse()?;
    let defaults = SubmitOptions::default();
    let options = SubmitOptions {
        review_required: body.review_required.unwrap_or(defaults.review_required),
        approval_required: body.approval_required.unwrap_or(defaults.approval_required),
    };
    let id = app.coordinator.submit(capability, body.payload, options).await?;
    let task = app.coordinator.get(id).await?;
    let mut body = serde_json::to_value(&task)?;
    body["task_id"] = serde_json::Value::String(id.to_string());
    Ok((StatusCode::CREATED, Json(body)))
}

#[derive(serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub capability: Option<Capability>,
}

/// GET /api/tasks: all tasks, oldest first, optionally filtered.
pub async fn list_tasks(
    State(app): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Json<Vec<Task>> {
    let tasks = app
        .coordinator
        .list()
        .await
        .into_iter()
        .filter(|t| q.status.map_or(true, |s| t.status == s))
        .filter(|t| q.capability.map_or(true, |c| t.capability == c))
        .collect();
    Json(tasks)
}

/// GET /api/tasks/:id: full task record, verdict history included.
pub async fn get_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = app.coordinator.get(parse_id(&id)?).await?;
    Ok(Json(task))
}

/// POST /api/tasks/:id/cancel: fail a non-terminal task; repeat calls are no-ops.
pub async fn cancel_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = app.coordinator.cancel(parse_id(&id)?).await?;
    Ok(Json(task))
}

/// POST /api/tasks/:id/approve: human sign-off for a parked task.
pub async fn approve_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = app.coordinator.approve(parse_id(&id)?).await?;
    Ok(Json(task))
}

#[derive(serde::Deserialize)]
pub struct DeclineBody {
    pub reason: String,
}

/// POST /api/tasks/:id/decline: human refusal for a parked task.
pub async fn decline_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DeclineBody>,
) -> Result<Json<Task>, AppError> {
    if body.reason.trim().is_empty() {
        return Err(AppError::bad_request("decline reason must not be empty"));
    }
    let task = app.coordinator.decline(parse_id(&id)?, body.reason).await?;
    Ok(Json(task))
}
