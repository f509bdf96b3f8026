//! Ground-truth annotation CRUD (§6). Predictions are immutable through
//! this surface — they only change via `/datasets/{id}/predictions`.

use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use common::storage::types::annotation::{Annotation, BBox, GROUND_TRUTH_SOURCE};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct CreateAnnotationBody {
    pub dataset_id: String,
    pub sample_id: String,
    pub category_name: String,
    pub bbox: BBox,
    #[serde(default)]
    pub is_crowd: bool,
}

pub async fn create_annotation(
    State(state): State<ApiState>,
    Json(body): Json<CreateAnnotationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let annotation = Annotation {
        dataset_id: body.dataset_id.clone(),
        id: uuid::Uuid::new_v4().to_string(),
        sample_id: body.sample_id,
        category_name: body.category_name,
        area: body.bbox.area(),
        bbox: body.bbox,
        is_crowd: body.is_crowd,
        source: GROUND_TRUTH_SOURCE.to_string(),
        confidence: None,
    };
    state.db.bulk_insert_annotations(vec![annotation.clone()]).await?;
    state.db.recompute_aggregates(&body.dataset_id).await?;
    Ok((axum::http::StatusCode::CREATED, axum::Json(annotation)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateAnnotationBody {
    pub dataset_id: String,
    pub category_name: String,
    pub bbox: BBox,
    #[serde(default)]
    pub is_crowd: bool,
}

pub async fn update_annotation(
    State(state): State<ApiState>,
    Path(annotation_id): Path<String>,
    Json(body): Json<UpdateAnnotationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = state
        .db
        .get_annotation(&body.dataset_id, &annotation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("annotation not found: {annotation_id}")))?;
    if !existing.is_ground_truth() {
        return Err(ApiError::BadInput(
            "only ground-truth annotations can be edited".to_string(),
        ));
    }
    let updated = Annotation {
        category_name: body.category_name,
        area: body.bbox.area(),
        bbox: body.bbox,
        is_crowd: body.is_crowd,
        ..existing
    };
    state.db.bulk_insert_annotations(vec![updated.clone()]).await?;
    state.db.recompute_aggregates(&body.dataset_id).await?;
    Ok(axum::Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAnnotationQuery {
    pub dataset_id: String,
}

pub async fn delete_annotation(
    State(state): State<ApiState>,
    Path(annotation_id): Path<String>,
    axum::extract::Query(q): axum::extract::Query<DeleteAnnotationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = state
        .db
        .get_annotation(&q.dataset_id, &annotation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("annotation not found: {annotation_id}")))?;
    if !existing.is_ground_truth() {
        return Err(ApiError::BadInput(
            "only ground-truth annotations can be deleted".to_string(),
        ));
    }
    state.db.delete_annotation(&q.dataset_id, &annotation_id).await?;
    state.db.recompute_aggregates(&q.dataset_id).await?;
    Ok(axum::Json(json!({ "deleted": true })))
}
