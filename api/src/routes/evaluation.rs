//! Evaluation endpoints (C7-C9): per-class PR/mAP for detection datasets,
//! direct label metrics for classification datasets, confusion-cell
//! drill-down, and error analysis.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use common::storage::types::dataset::DatasetType;
use evaluation::{classification, detection, error_analysis};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub split: Option<String>,
}

pub async fn statistics(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<StatisticsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let dataset = state
        .db
        .get_dataset(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dataset not found: {id}")))?;
    let samples = state.db.list_samples(&id).await?;
    let samples: Vec<_> = samples
        .into_iter()
        .filter(|s| q.split.as_deref().map(|split| s.split.as_deref() == Some(split)).unwrap_or(true))
        .collect();
    let mut per_split: HashMap<String, u64> = HashMap::new();
    for s in &samples {
        *per_split.entry(s.split.clone().unwrap_or_default()).or_default() += 1;
    }
    let annotations = state.db.list_annotations(&id, None, q.split.as_deref()).await?;
    let mut per_category: HashMap<String, u64> = HashMap::new();
    for a in annotations.iter().filter(|a| a.is_ground_truth()) {
        *per_category.entry(a.category_name.clone()).or_default() += 1;
    }
    Ok(axum::Json(json!({
        "dataset": dataset,
        "sample_count": samples.len(),
        "per_split_sample_count": per_split,
        "per_category_annotation_count": per_category,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EvaluationQuery {
    pub source: String,
    #[serde(default = "default_iou")]
    pub iou_threshold: f64,
    #[serde(default = "default_conf")]
    pub conf_threshold: f64,
    pub split: Option<String>,
}

fn default_iou() -> f64 {
    0.5
}
fn default_conf() -> f64 {
    0.25
}

async fn gt_and_pred(
    state: &ApiState,
    dataset_id: &str,
    source: &str,
    split: Option<&str>,
) -> Result<(Vec<common::storage::types::annotation::Annotation>, Vec<common::storage::types::annotation::Annotation>), ApiError> {
    let gt = state
        .db
        .list_annotations(dataset_id, Some(common::storage::types::annotation::GROUND_TRUTH_SOURCE), split)
        .await?;
    let pred = state.db.list_annotations(dataset_id, Some(source), split).await?;
    Ok((gt, pred))
}

pub async fn evaluation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<EvaluationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let dataset = state
        .db
        .get_dataset(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dataset not found: {id}")))?;
    let (gt, pred) = gt_and_pred(&state, &id, &q.source, q.split.as_deref()).await?;
    match dataset.dataset_type {
        DatasetType::Detection => {
            let result = detection::compute_evaluation(&gt, &pred, q.iou_threshold, q.conf_threshold);
            Ok(axum::Json(json!(result)).into_response())
        }
        DatasetType::Classification => {
            let result = classification::compute_classification_evaluation(&gt, &pred, q.conf_threshold);
            Ok(axum::Json(json!(result)).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfusionCellQuery {
    pub source: String,
    pub actual_class: String,
    pub predicted_class: String,
    #[serde(default = "default_iou")]
    pub iou_threshold: f64,
    #[serde(default = "default_conf")]
    pub conf_threshold: f64,
    pub split: Option<String>,
}

pub async fn confusion_cell_samples(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<ConfusionCellQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let dataset = state
        .db
        .get_dataset(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dataset not found: {id}")))?;
    let (gt, pred) = gt_and_pred(&state, &id, &q.source, q.split.as_deref()).await?;
    let sample_ids = match dataset.dataset_type {
        DatasetType::Detection => detection::confusion_cell_samples(
            &gt,
            &pred,
            &q.actual_class,
            &q.predicted_class,
            q.iou_threshold,
            q.conf_threshold,
        ),
        DatasetType::Classification => {
            classification::confusion_cell_samples(&gt, &pred, &q.actual_class, &q.predicted_class, q.conf_threshold)
        }
    };
    Ok(axum::Json(json!({ "sample_ids": sample_ids })))
}

#[derive(Debug, Deserialize)]
pub struct ErrorAnalysisQuery {
    pub source: String,
    #[serde(default = "default_iou")]
    pub iou_threshold: f64,
    #[serde(default = "default_conf")]
    pub conf_threshold: f64,
    pub split: Option<String>,
}

pub async fn error_analysis(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<ErrorAnalysisQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (gt, pred) = gt_and_pred(&state, &id, &q.source, q.split.as_deref()).await?;
    let result = error_analysis::categorize_errors(&gt, &pred, q.iou_threshold, q.conf_threshold);
    Ok(axum::Json(result))
}
