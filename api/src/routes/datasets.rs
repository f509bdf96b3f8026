//! Dataset CRUD and prediction import (§6, §4.3 "Prediction file formats").

use std::collections::HashMap;

use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use chrono::Utc;
use common::storage::types::annotation::{Annotation, BBox, GROUND_TRUTH_SOURCE};
use ingestion::classification::{
    parse_classification_jsonl, parse_coco_results, parse_detection_annotation_file,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::ApiState;

pub async fn list_datasets(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let datasets = state.db.list_datasets().await?;
    Ok(axum::Json(datasets))
}

pub async fn get_dataset(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let dataset = state
        .db
        .get_dataset(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dataset not found: {id}")))?;
    Ok(axum::Json(dataset))
}

/// Cascades the column-store rows, then clears what lives outside it:
/// the vector index's in-memory collection and any cached thumbnails.
pub async fn delete_dataset(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .get_dataset(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dataset not found: {id}")))?;
    state.db.delete_dataset(&id).await?;
    state.vector_index.invalidate(&id).await;
    let cache_prefix = format!("thumbnails/{id}/");
    state.storage.delete_prefix(&cache_prefix).await.ok();
    Ok(axum::Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct ImportPredictionsBody {
    pub prediction_path: String,
    pub format: String,
    pub run_name: Option<String>,
}

/// Prediction-import races on equal run names (§9 Open Question #4) are
/// not serialised here: the delete-then-insert is two statements on the
/// same connection mutex, so two concurrent imports of the same
/// `run_name` interleave at worst into "last insert wins", never a torn
/// half-deleted state. Forbidding equal names outright is left to a
/// future revision; today the caller is responsible for not racing
/// itself.
pub async fn import_predictions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<ImportPredictionsBody>,
) -> Result<impl IntoResponse, ApiError> {
    let dataset = state
        .db
        .get_dataset(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dataset not found: {id}")))?;

    let samples = state.db.list_samples(&id).await?;
    let by_sample_id: HashMap<&str, &common::storage::types::sample::Sample> =
        samples.iter().map(|s| (s.id.as_str(), s)).collect();
    let by_file_name: HashMap<&str, &common::storage::types::sample::Sample> =
        samples.iter().map(|s| (s.file_name.as_str(), s)).collect();
    let categories = state.db.list_categories(&id).await?;
    let category_by_id: HashMap<i64, &str> = categories
        .iter()
        .map(|c| (c.category_id, c.name.as_str()))
        .collect();

    let (annotations, run_name, skipped) = match body.format.as_str() {
        "coco" => {
            let text = state.storage.read_bytes(&body.prediction_path).await?;
            let text = String::from_utf8_lossy(&text);
            let run_name = body
                .run_name
                .clone()
                .unwrap_or_else(|| prediction_path_stem(&body.prediction_path));
            let mut skipped = 0usize;
            let annotations: Vec<Annotation> = parse_coco_results(&text)
                .filter_map(|record| {
                    let sample_id = record.image_id.to_string();
                    let sample = by_sample_id.get(sample_id.as_str())?;
                    let Some(category_name) = category_by_id.get(&record.category_id) else {
                        skipped += 1;
                        return None;
                    };
                    let bbox = BBox {
                        x: record.bbox[0],
                        y: record.bbox[1],
                        w: record.bbox[2],
                        h: record.bbox[3],
                    };
                    Some(Annotation {
                        dataset_id: id.clone(),
                        id: uuid::Uuid::new_v4().to_string(),
                        sample_id: sample.id.clone(),
                        category_name: category_name.to_string(),
                        area: bbox.area(),
                        bbox,
                        is_crowd: false,
                        source: run_name.clone(),
                        confidence: record.score,
                    })
                })
                .collect();
            (annotations, run_name, skipped)
        }
        "classification_jsonl" => {
            let text = state.storage.read_bytes(&body.prediction_path).await?;
            let text = String::from_utf8_lossy(&text);
            let run_name = body
                .run_name
                .clone()
                .unwrap_or_else(|| prediction_path_stem(&body.prediction_path));
            let mut skipped = 0usize;
            let annotations: Vec<Annotation> = parse_classification_jsonl(&text)
                .filter_map(|record| {
                    let Some(sample) = by_file_name.get(record.file_name.as_str()) else {
                        skipped += 1;
                        return None;
                    };
                    let category_name = record.labels.into_iter().next().unwrap_or_else(|| "unknown".to_string());
                    Some(Annotation {
                        dataset_id: id.clone(),
                        id: uuid::Uuid::new_v4().to_string(),
                        sample_id: sample.id.clone(),
                        category_name,
                        bbox: BBox::ZERO,
                        area: 0.0,
                        is_crowd: false,
                        source: run_name.clone(),
                        confidence: None,
                    })
                })
                .collect();
            (annotations, run_name, skipped)
        }
        "detection_annotation" => {
            let entries = state.storage.list_dir_detail(&body.prediction_path).await?;
            let mut annotations = Vec::new();
            let mut skipped = 0usize;
            let mut derived_source: Option<String> = None;
            let mut derived_created_at: Option<String> = None;
            for entry in entries {
                if entry.kind != common::storage::store::EntryKind::File || !entry.name.ends_with(".json") {
                    continue;
                }
                let file_path = format!("{}/{}", body.prediction_path.trim_end_matches('/'), entry.name);
                let text = state.storage.read_bytes(&file_path).await?;
                let text = String::from_utf8_lossy(&text);
                let parsed = match parse_detection_annotation_file(&text) {
                    Ok(p) => p,
                    Err(_) => {
                        skipped += 1;
                        continue;
                    }
                };
                let Some(sample) = by_file_name.get(parsed.filename.as_str()) else {
                    skipped += parsed.annotations.len();
                    continue;
                };
                if let Some(info) = &parsed.info {
                    if derived_source.is_none() {
                        derived_source = info.annotations_source.clone();
                    }
                    if derived_created_at.is_none() {
                        derived_created_at = info.created_at.clone();
                    }
                }
                for entry in parsed.annotations {
                    let Some(category_name) = parsed.categories.get(&entry.class_id.to_string()) else {
                        skipped += 1;
                        continue;
                    };
                    let bbox = entry.bbox.to_pixels(sample.width, sample.height);
                    annotations.push(Annotation {
                        dataset_id: id.clone(),
                        id: uuid::Uuid::new_v4().to_string(),
                        sample_id: sample.id.clone(),
                        category_name: category_name.clone(),
                        area: bbox.area(),
                        bbox,
                        is_crowd: false,
                        source: String::new(),
                        confidence: entry.confidence,
                    });
                }
            }
            let run_name = body.run_name.clone().unwrap_or_else(|| {
                let source = derived_source.unwrap_or_else(|| "import".to_string());
                format!("{source}-{}", Utc::now().format("%Y%m%d"))
            });
            for a in &mut annotations {
                a.source = run_name.clone();
            }
            (annotations, run_name, skipped)
        }
        other => {
            return Err(ApiError::BadInput(format!("unknown prediction format: {other}")));
        }
    };

    if run_name == GROUND_TRUTH_SOURCE {
        return Err(ApiError::BadInput(
            "run_name must not be `ground_truth`".to_string(),
        ));
    }

    state.db.delete_predictions_by_source(&id, &run_name).await?;
    let imported = annotations.len();
    state.db.bulk_insert_annotations(annotations).await?;
    state.db.recompute_aggregates(&id).await?;

    Ok(axum::Json(json!({
        "dataset_id": dataset.id,
        "run_name": run_name,
        "imported_count": imported,
        "skipped_count": skipped,
    })))
}

fn prediction_path_stem(path: &str) -> String {
    path.rsplit('/')
        .next()
        .unwrap_or(path)
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(path)
        .to_string()
}
