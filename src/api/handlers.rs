use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::scheduler::{ProjectStatus, StatusMap};

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// All tracked projects, sorted by name.
pub async fn list_status(State(status): State<StatusMap>) -> Json<Vec<ProjectStatus>> {
    let map = status.read().await;
    let mut all: Vec<ProjectStatus> = map.values().cloned().collect();
    all.sort_by(|a, b| a.name.cmp(&b.name));
    Json(all)
}

pub async fn project_status(
    State(status): State<StatusMap>,
    Path(name): Path<String>,
) -> Result<Json<ProjectStatus>, (StatusCode, String)> {
    status
        .read()
        .await
        .get(&name)
        .cloned()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Project not found".to_string()))
}
