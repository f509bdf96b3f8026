//! Ingestion endpoints (§6): dataset ingest and multi-split import are
//! both SSE generators relaying the pipeline's own progress stream
//! verbatim (§9 — "do not conflate" with the background-task poll
//! pattern in `crate::sse::poll_progress_stream`).

use axum::extract::{Json, State};
use axum::response::IntoResponse;
use common::storage::store::EntryKind;
use common::storage::types::dataset::DatasetFormat;
use futures::StreamExt;
use ingestion::scanner::{DetectedFormat, FolderScanner};
use ingestion::{IngestionPipeline, IngestionRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::sse::{error_stream, with_keep_alive};
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub dataset_id: Option<String>,
    pub dataset_name: String,
    pub annotation_path: String,
    pub image_dir: String,
    pub format: String,
    pub split: Option<String>,
}

fn parse_format(raw: &str) -> Result<DatasetFormat, ApiError> {
    DatasetFormat::from_str_opt(raw)
        .ok_or_else(|| ApiError::BadInput(format!("unknown dataset format: {raw}")))
}

pub async fn ingest_dataset(
    State(state): State<ApiState>,
    Json(body): Json<IngestBody>,
) -> impl IntoResponse {
    let format = match parse_format(&body.format) {
        Ok(f) => f,
        Err(err) => return with_keep_alive(error_stream(err.to_string())),
    };
    let pipeline = IngestionPipeline::new(
        state.db.clone(),
        state.storage.clone(),
        state.plugins.clone(),
        state.thumbnails.clone(),
        state.config.clone(),
    );
    let request = IngestionRequest {
        dataset_id: body.dataset_id,
        dataset_name: body.dataset_name,
        annotation_path: body.annotation_path,
        image_dir: body.image_dir,
        format,
        split: body.split,
    };
    let stream = pipeline
        .ingest(request)
        .map(|event| {
            event
                .map(|progress| {
                    axum::response::sse::Event::default()
                        .event("progress")
                        .data(serde_json::to_string(&progress).unwrap_or_default())
                })
                .map_err(|err| axum::Error::new(err))
        })
        .boxed();
    with_keep_alive(stream)
}

#[derive(Debug, Deserialize)]
pub struct ScanBody {
    pub root_path: String,
}

pub async fn scan(
    State(state): State<ApiState>,
    Json(body): Json<ScanBody>,
) -> Result<impl IntoResponse, ApiError> {
    let scanner = FolderScanner::new(&state.storage);
    let result = scanner.scan(&body.root_path).await?;
    Ok(axum::Json(json!({
        "root_path": result.root_path,
        "dataset_name": result.dataset_name,
        "format": match result.format {
            DetectedFormat::Coco => "coco",
            DetectedFormat::ClassificationJsonl => "classification_jsonl",
        },
        "splits": result.splits.iter().map(|s| json!({
            "name": s.name,
            "annotation_path": s.annotation_path,
            "image_dir": s.image_dir,
            "image_count": s.image_count,
            "annotation_file_size": s.annotation_file_size,
        })).collect::<Vec<_>>(),
        "warnings": result.warnings,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ImportBody {
    pub root_path: String,
    pub dataset_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImportEvent<'a> {
    split: &'a str,
    #[serde(flatten)]
    progress: ingestion::IngestionProgress,
}

pub async fn import(
    State(state): State<ApiState>,
    Json(body): Json<ImportBody>,
) -> impl IntoResponse {
    let scanner = FolderScanner::new(&state.storage);
    let scan_result = match scanner.scan(&body.root_path).await {
        Ok(r) => r,
        Err(err) => return with_keep_alive(error_stream(err.to_string())),
    };
    let format = match scan_result.format {
        DetectedFormat::Coco => DatasetFormat::Coco,
        DetectedFormat::ClassificationJsonl => DatasetFormat::ClassificationJsonl,
    };

    let db = state.db.clone();
    let storage = state.storage.clone();
    let plugins = state.plugins.clone();
    let thumbnails = state.thumbnails.clone();
    let config = state.config.clone();
    let dataset_name = scan_result.dataset_name.clone();
    let split_names: Vec<String> = scan_result.splits.iter().map(|s| s.name.clone()).collect();
    let requests: Vec<IngestionRequest> = scan_result
        .splits
        .into_iter()
        .map(|split| IngestionRequest {
            dataset_id: body.dataset_id.clone(),
            dataset_name: dataset_name.clone(),
            annotation_path: split.annotation_path,
            image_dir: split.image_dir,
            format,
            split: Some(split.name),
        })
        .collect();

    // `ingest_splits` generates (and threads) one shared dataset_id across
    // every split; the caller sees the currently-processing split by
    // counting how many `Complete`-stage events have gone by.
    let stream = async_stream::stream! {
        let pipeline = IngestionPipeline::new(db, storage, plugins, thumbnails, config);
        let mut events = pipeline.ingest_splits(dataset_name, requests);
        let mut split_index = 0usize;
        loop {
            match events.next().await {
                Some(Ok(progress)) => {
                    let split = split_names.get(split_index).map(String::as_str).unwrap_or("");
                    let is_complete = progress.stage == ingestion::IngestionStage::Complete;
                    let payload = ImportEvent { split, progress };
                    yield Ok(axum::response::sse::Event::default()
                        .event("progress")
                        .data(serde_json::to_string(&payload).unwrap_or_default()));
                    if is_complete {
                        split_index += 1;
                    }
                }
                Some(Err(err)) => {
                    yield Ok(axum::response::sse::Event::default().event("error").data(err.to_string()));
                    return;
                }
                None => break,
            }
        }
    }
    .boxed();
    with_keep_alive(stream)
}

#[derive(Debug, Deserialize)]
pub struct BrowseBody {
    pub path: String,
}

pub async fn browse(
    State(state): State<ApiState>,
    Json(body): Json<BrowseBody>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.storage.list_dir_detail(&body.path).await?;
    let filtered: Vec<_> = entries
        .into_iter()
        .filter(|e| e.kind == EntryKind::Dir || e.name.ends_with(".json"))
        .map(|e| json!({ "name": e.name, "is_dir": e.kind == EntryKind::Dir, "size": e.size }))
        .collect();
    Ok(axum::Json(json!({ "entries": filtered })))
}
