//! Dataset-level triage tags, worst-image ranking, and annotation-triage
//! overrides (§3, §4.10, P9).

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use common::storage::types::annotation_triage::{AnnotationTriageLabel, AnnotationTriageOverride};
use common::storage::types::annotation::GROUND_TRUTH_SOURCE;
use evaluation::triage::{compute_worst_images, overlay_sample_triage};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct SetTriageTagBody {
    pub dataset_id: String,
    pub sample_id: String,
    pub label: String,
}

pub async fn set_triage_tag(
    State(state): State<ApiState>,
    axum::extract::Json(body): axum::extract::Json<SetTriageTagBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut sample = state
        .db
        .get_sample(&body.dataset_id, &body.sample_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sample not found: {}", body.sample_id)))?;
    sample.set_triage_tag(&body.label);
    state
        .db
        .set_sample_tags(&body.dataset_id, &body.sample_id, sample.tags)
        .await?;
    Ok(axum::Json(json!({ "updated": true })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteTriageTagQuery {
    pub dataset_id: String,
}

pub async fn delete_triage_tag(
    State(state): State<ApiState>,
    Path(sample_id): Path<String>,
    Query(q): Query<DeleteTriageTagQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut sample = state
        .db
        .get_sample(&q.dataset_id, &sample_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sample not found: {sample_id}")))?;
    if let Some(tag) = sample.triage_tag().map(str::to_string) {
        sample.remove_tag(&tag);
        state.db.set_sample_tags(&q.dataset_id, &sample_id, sample.tags).await?;
    }
    Ok(axum::Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct WorstImagesQuery {
    pub source: String,
    #[serde(default = "default_iou")]
    pub iou_threshold: f64,
    #[serde(default = "default_conf")]
    pub conf_threshold: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_iou() -> f64 {
    0.5
}
fn default_conf() -> f64 {
    0.25
}
fn default_limit() -> usize {
    50
}

pub async fn worst_images(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<WorstImagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let gt = state.db.list_annotations(&id, Some(GROUND_TRUTH_SOURCE), None).await?;
    let pred = state.db.list_annotations(&id, Some(&q.source), None).await?;
    let scores = compute_worst_images(&gt, &pred, q.iou_threshold, q.conf_threshold, q.limit);
    Ok(axum::Json(scores))
}

#[derive(Debug, Deserialize)]
pub struct AnnotationTriageQuery {
    pub dataset_id: String,
    pub source: String,
    #[serde(default = "default_iou")]
    pub iou_threshold: f64,
    #[serde(default = "default_conf")]
    pub conf_threshold: f64,
}

pub async fn annotation_triage(
    State(state): State<ApiState>,
    Path(sample_id): Path<String>,
    Query(q): Query<AnnotationTriageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let gt: Vec<_> = state
        .db
        .annotations_for_sample(&q.dataset_id, &sample_id)
        .await?
        .into_iter()
        .filter(|a| a.is_ground_truth())
        .collect();
    let pred: Vec<_> = state
        .db
        .annotations_for_sample(&q.dataset_id, &sample_id)
        .await?
        .into_iter()
        .filter(|a| a.source == q.source)
        .collect();
    let overrides = state.db.annotation_triage_for_sample(&q.dataset_id, &sample_id).await?;
    let views = overlay_sample_triage(&gt, &pred, &overrides, q.iou_threshold, q.conf_threshold);
    Ok(axum::Json(views))
}

#[derive(Debug, Deserialize)]
pub struct SetAnnotationTriageBody {
    pub dataset_id: String,
    pub sample_id: String,
    pub annotation_id: String,
    pub label: String,
}

/// Writing an override sets `triage:annotated` on the sample (I4); this
/// flag is additive across however many annotations on the sample carry
/// an override, so it is only ever cleared when the last one is deleted
/// (see `delete_annotation_triage`).
pub async fn set_annotation_triage(
    State(state): State<ApiState>,
    axum::extract::Json(body): axum::extract::Json<SetAnnotationTriageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let label = AnnotationTriageLabel::from_str_opt(&body.label)
        .ok_or_else(|| ApiError::BadInput(format!("unknown triage label: {}", body.label)))?;
    state
        .db
        .upsert_annotation_triage(AnnotationTriageOverride {
            annotation_id: body.annotation_id,
            dataset_id: body.dataset_id.clone(),
            sample_id: body.sample_id.clone(),
            label,
            created_at: Utc::now(),
        })
        .await?;
    if let Some(mut sample) = state.db.get_sample(&body.dataset_id, &body.sample_id).await? {
        sample.add_tag(common::storage::types::sample::TRIAGE_ANNOTATED_TAG);
        state
            .db
            .set_sample_tags(&body.dataset_id, &body.sample_id, sample.tags)
            .await?;
    }
    Ok(axum::Json(json!({ "updated": true })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAnnotationTriageQuery {
    pub dataset_id: String,
    pub sample_id: String,
}

pub async fn delete_annotation_triage(
    State(state): State<ApiState>,
    Path((sample_id, annotation_id)): Path<(String, String)>,
    Query(q): Query<DeleteAnnotationTriageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.delete_annotation_triage(&q.dataset_id, &annotation_id).await?;
    let remaining = state
        .db
        .count_annotation_triage_for_sample(&q.dataset_id, &sample_id)
        .await?;
    if remaining == 0 {
        if let Some(mut sample) = state.db.get_sample(&q.dataset_id, &sample_id).await? {
            sample.remove_tag(common::storage::types::sample::TRIAGE_ANNOTATED_TAG);
            state.db.set_sample_tags(&q.dataset_id, &sample_id, sample.tags).await?;
        }
    }
    Ok(axum::Json(json!({ "deleted": true })))
}
