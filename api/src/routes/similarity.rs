//! Similarity search (read path over the vector index) and near-duplicate
//! detection (a background task whose result is cached to the object
//! store, since it has no natural home in the column-store schema).

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use tasks::{near_duplicate, TaskKind};

use crate::error::ApiError;
use crate::sse::{poll_progress_stream, with_keep_alive};
use crate::state::ApiState;

fn cache_location(dataset_id: &str) -> String {
    format!("{dataset_id}/near_duplicate_groups.json")
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub sample_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn search(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let embeddings = state.db.list_embeddings(&id).await?;
    let source = embeddings
        .iter()
        .find(|e| e.sample_id == q.sample_id)
        .ok_or_else(|| ApiError::NotFound(format!("no embedding for sample {}", q.sample_id)))?;
    let neighbours = state
        .vector_index
        .query(&id, &source.vector, q.limit, Some(&q.sample_id))
        .await?;
    Ok(axum::Json(json!({ "neighbours": neighbours })))
}

pub async fn detect(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let total = state.db.list_embeddings(&id).await?.len() as u64;
    let handle = state.task_engine.start(&id, TaskKind::NearDuplicate, total).await?;
    let db = state.db.clone();
    let storage = state.storage.clone();
    let index = state.vector_index.clone();
    let dataset_id = id.clone();
    tokio::spawn(async move {
        match near_duplicate::run(&db, index.as_ref(), &dataset_id, near_duplicate::DEFAULT_THRESHOLD, &handle).await
        {
            Ok(groups) => {
                let payload = serde_json::to_vec(&groups).unwrap_or_else(|_| b"[]".to_vec());
                if let Err(err) = storage.put(&cache_location(&dataset_id), payload.into()).await {
                    handle.fail(err.to_string()).await;
                    return;
                }
                handle.complete(Some(format!("found {} groups", groups.len()))).await;
            }
            Err(err) => handle.fail(err.to_string()).await,
        }
    });
    Ok((axum::http::StatusCode::ACCEPTED, axum::Json(json!({ "started": true }))))
}

pub async fn progress(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    with_keep_alive(poll_progress_stream(state.task_engine.clone(), id, TaskKind::NearDuplicate))
}

pub async fn cached(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let groups: Vec<Vec<String>> = match state.storage.read_bytes(&cache_location(&id)).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    Ok(axum::Json(json!({ "groups": groups })))
}
