//! Embedding generation and UMAP-style reduction (C11-C12): both are
//! background tasks dispatched with `tokio::spawn`, their progress read
//! back through `crate::sse::poll_progress_stream` (§9 — distinct from
//! ingestion's generator-relay SSE).

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde_json::json;
use tasks::TaskKind;

use crate::error::ApiError;
use crate::sse::{poll_progress_stream, with_keep_alive};
use crate::state::ApiState;

pub async fn generate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let model = state.embedding_model()?.clone();
    let total = state.db.list_samples(&id).await?.len() as u64;
    let handle = state.task_engine.start(&id, TaskKind::Embed, total).await?;
    let db = state.db.clone();
    let storage = state.storage.clone();
    let dataset_id = id.clone();
    tokio::spawn(async move {
        match tasks::embed::run(&db, &storage, model.as_ref(), &dataset_id, &handle).await {
            Ok(written) => handle.complete(Some(format!("embedded {written} samples"))).await,
            Err(err) => handle.fail(err.to_string()).await,
        }
    });
    Ok((axum::http::StatusCode::ACCEPTED, axum::Json(json!({ "started": true }))))
}

pub async fn progress(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    with_keep_alive(poll_progress_stream(state.task_engine.clone(), id, TaskKind::Embed))
}

pub async fn status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.task_engine.snapshot(&id, TaskKind::Embed).await;
    Ok(axum::Json(json!({ "progress": snapshot })))
}

pub async fn reduce(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let total = state.db.list_embeddings(&id).await?.len() as u64;
    let handle = state.task_engine.start(&id, TaskKind::Reduce, total).await?;
    let db = state.db.clone();
    let dataset_id = id.clone();
    tokio::spawn(async move {
        match tasks::reduce::run(&db, &dataset_id, &handle).await {
            Ok(reduced) => handle.complete(Some(format!("reduced {reduced} points"))).await,
            Err(err) => handle.fail(err.to_string()).await,
        }
    });
    Ok((axum::http::StatusCode::ACCEPTED, axum::Json(json!({ "started": true }))))
}

pub async fn reduce_progress(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    with_keep_alive(poll_progress_stream(state.task_engine.clone(), id, TaskKind::Reduce))
}

pub async fn coordinates(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let embeddings = state.db.list_embeddings(&id).await?;
    let points: Vec<_> = embeddings
        .into_iter()
        .filter_map(|e| Some(json!({ "sample_id": e.sample_id, "x": e.x?, "y": e.y? })))
        .collect();
    Ok(axum::Json(json!({ "points": points })))
}
