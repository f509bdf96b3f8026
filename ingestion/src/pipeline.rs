//! Ingestion orchestrator (C5). Drives the typestate in [`crate::state`]
//! through one pass over a single split's source file, streaming
//! [`IngestionProgress`] events the HTTP layer relays verbatim over SSE —
//! the same `async_stream` + progress-event shape the teacher uses for its
//! own chat-response stream.
//!
//! Follows the teacher's stage-chaining idiom: each stage function consumes
//! the machine in its `from` state and hands back the `to` state via
//! `.map_err(|(_, guard)| map_guard_error(...))`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use chrono::Utc;
use common::capabilities::ThumbnailCodec;
use common::error::AppError;
use common::storage::db::Database;
use common::storage::store::StorageManager;
use common::storage::types::annotation::{Annotation, BBox, GROUND_TRUTH_SOURCE};
use common::storage::types::category::Category;
use common::storage::types::dataset::{Dataset, DatasetFormat, DatasetType};
use common::storage::types::sample::Sample;
use common::utils::config::AppConfig;
use futures::Stream;
use plugins::{IngestStats, PluginRegistry};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::classification::parse_classification_jsonl;
use crate::coco::{parse_coco_str, CocoEvent};
use crate::progress::{IngestionProgress, IngestionStage};
use crate::state;

const BATCH_SIZE: usize = 2000;

/// One split's worth of ingestion input. `dataset_id` is `None` for the
/// first split of a new dataset; subsequent splits of the same dataset
/// pass the id back in so counters accumulate instead of overwrite.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub dataset_id: Option<String>,
    pub dataset_name: String,
    pub annotation_path: String,
    pub image_dir: String,
    pub format: DatasetFormat,
    pub split: Option<String>,
}

fn map_guard_error(event: &str, guard: &state_machines::core::GuardError) -> AppError {
    AppError::Internal(format!("ingestion stage '{event}' out of order: {guard}"))
}

pub struct IngestionPipeline {
    db: Database,
    storage: StorageManager,
    plugins: Arc<PluginRegistry>,
    thumbnails: Option<Arc<dyn ThumbnailCodec>>,
    config: AppConfig,
}

impl IngestionPipeline {
    pub fn new(
        db: Database,
        storage: StorageManager,
        plugins: Arc<PluginRegistry>,
        thumbnails: Option<Arc<dyn ThumbnailCodec>>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            storage,
            plugins,
            thumbnails,
            config,
        }
    }

    /// Ingests one split, returning a lazy progress stream. The stream
    /// itself is the only channel for both progress and the terminal
    /// error: a consumer drains it to completion or until an `Err` arrives.
    pub fn ingest(
        &self,
        request: IngestionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<IngestionProgress, AppError>> + Send>> {
        let db = self.db.clone();
        let storage = self.storage.clone();
        let plugins = self.plugins.clone();
        let thumbnails = self.thumbnails.clone();
        let config = self.config.clone();

        Box::pin(try_stream! {
            if !storage.source_exists(&request.annotation_path).await? {
                Err(AppError::BadInput(format!(
                    "annotation file not found: {}",
                    request.annotation_path
                )))?;
            }

            let dataset_id = request.dataset_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let existing = db.get_dataset(&dataset_id).await?;
            plugins.ingest_start(&dataset_id);

            let machine = state::start();

            let text = String::from_utf8(storage.read_bytes(&request.annotation_path).await?.to_vec())
                .map_err(|e| AppError::ParseError(format!("annotation file is not valid UTF-8: {e}")))?;

            let dataset_type = match request.format {
                DatasetFormat::Coco => DatasetType::Detection,
                DatasetFormat::ClassificationJsonl => DatasetType::Classification,
            };

            let (categories, samples, annotations) = match request.format {
                DatasetFormat::Coco => collect_coco(&text, &dataset_id, &request.image_dir, request.split.as_deref())?,
                DatasetFormat::ClassificationJsonl => {
                    collect_classification(&text, &dataset_id, &request.image_dir, request.split.as_deref())
                }
            };
            let samples: Vec<Sample> = samples
                .into_iter()
                .map(|s| {
                    let patched = plugins.sample_ingested(serde_json::to_value(&s).unwrap_or(Value::Null));
                    serde_json::from_value(patched).unwrap_or(s)
                })
                .collect();

            yield IngestionProgress::new(
                IngestionStage::Categories,
                categories.len() as u64,
                Some(categories.len() as u64),
                format!("loaded {} categories", categories.len()),
            );
            let machine = machine
                .load_categories()
                .map_err(|(_, guard)| map_guard_error("load_categories", &guard))?;

            let total_images = samples.len() as u64;
            let mut inserted_images = 0u64;
            for batch in samples.chunks(BATCH_SIZE) {
                db.bulk_insert_samples(batch.to_vec()).await?;
                inserted_images += batch.len() as u64;
                yield IngestionProgress::new(
                    IngestionStage::ParsingImages,
                    inserted_images,
                    Some(total_images),
                    format!("inserted {inserted_images}/{total_images} images"),
                );
            }
            let machine = machine
                .parse_images()
                .map_err(|(_, guard)| map_guard_error("parse_images", &guard))?;

            let total_annotations = annotations.len() as u64;
            let mut inserted_annotations = 0u64;
            for batch in annotations.chunks(BATCH_SIZE) {
                db.bulk_insert_annotations(batch.to_vec()).await?;
                inserted_annotations += batch.len() as u64;
                yield IngestionProgress::new(
                    IngestionStage::ParsingAnnotations,
                    inserted_annotations,
                    Some(total_annotations),
                    format!("inserted {inserted_annotations}/{total_annotations} annotations"),
                );
            }
            let machine = machine
                .parse_annotations()
                .map_err(|(_, guard)| map_guard_error("parse_annotations", &guard))?;

            match existing {
                Some(_) => {
                    db.add_dataset_counts(&dataset_id, samples.len() as i64, annotations.len() as i64).await?;
                }
                None => {
                    let metadata = serde_json::json!({ "source_split": request.split }).to_string();
                    db.insert_dataset(Dataset {
                        id: dataset_id.clone(),
                        name: request.dataset_name.clone(),
                        annotation_path: request.annotation_path.clone(),
                        image_dir: request.image_dir.clone(),
                        format: request.format,
                        dataset_type,
                        image_count: samples.len() as i64,
                        annotation_count: annotations.len() as i64,
                        category_count: categories.len() as i64,
                        prediction_count: 0,
                        metadata: Some(metadata),
                        created_at: Utc::now(),
                    }).await?;
                }
            }
            db.upsert_categories(categories).await?;

            let mut thumbnail_failures = 0u64;
            let mut thumbnail_attempts = 0u64;
            if let Some(codec) = thumbnails.as_ref() {
                let pending: Vec<Sample> = db
                    .list_samples(&dataset_id)
                    .await?
                    .into_iter()
                    .filter(|s| s.thumbnail_path.is_none())
                    .take(config.thumbnail_backfill_cap)
                    .collect();
                for sample in &pending {
                    thumbnail_attempts += 1;
                    match backfill_one_thumbnail(&storage, &db, codec.as_ref(), &config, sample).await {
                        Ok(()) => {}
                        Err(e) => {
                            thumbnail_failures += 1;
                            warn!(sample_id = %sample.id, error = %e, "thumbnail backfill failed");
                        }
                    }
                }
            }
            yield IngestionProgress::new(
                IngestionStage::Thumbnails,
                thumbnail_attempts.saturating_sub(thumbnail_failures),
                Some(thumbnail_attempts),
                format!("backfilled {}/{} thumbnails", thumbnail_attempts.saturating_sub(thumbnail_failures), thumbnail_attempts),
            );
            let _machine = machine
                .backfill_thumbnails()
                .map_err(|(_, guard)| map_guard_error("backfill_thumbnails", &guard))?;

            let stats = IngestStats {
                image_count: samples.len() as i64,
                annotation_count: annotations.len() as i64,
                category_count: categories.len() as i64,
            };
            plugins.ingest_complete(&dataset_id, &stats);

            yield IngestionProgress::new(
                IngestionStage::Complete,
                1,
                Some(1),
                format!("ingestion complete for dataset {dataset_id}"),
            );
        })
    }

    /// Composes several `ingest` calls under one dataset id so that, e.g.,
    /// train/val/test splits of the same COCO dataset accumulate into a
    /// single dataset row instead of each overwriting the last.
    pub fn ingest_splits(
        &self,
        dataset_name: String,
        splits: Vec<IngestionRequest>,
    ) -> Pin<Box<dyn Stream<Item = Result<IngestionProgress, AppError>> + Send>> {
        let db = self.db.clone();
        let storage = self.storage.clone();
        let plugins = self.plugins.clone();
        let thumbnails = self.thumbnails.clone();
        let config = self.config.clone();
        let pipeline = IngestionPipeline::new(db, storage, plugins, thumbnails, config);

        Box::pin(try_stream! {
            let dataset_id = splits
                .iter()
                .find_map(|s| s.dataset_id.clone())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            for mut split in splits {
                split.dataset_name = dataset_name.clone();
                split.dataset_id = Some(dataset_id.clone());
                let mut stream = pipeline.ingest(split);
                use futures::StreamExt;
                while let Some(event) = stream.next().await {
                    yield event?;
                }
            }
        })
    }
}

#[instrument(level = "trace", skip(text))]
fn collect_coco(
    text: &str,
    dataset_id: &str,
    image_dir: &str,
    split: Option<&str>,
) -> Result<(Vec<Category>, Vec<Sample>, Vec<Annotation>), AppError> {
    let mut categories = Vec::new();
    let mut category_names: HashMap<i64, String> = HashMap::new();
    let mut raw_images = Vec::new();
    let mut raw_annotations = Vec::new();

    for event in parse_coco_str(text) {
        match event? {
            CocoEvent::Category(value) => {
                if let Some(cat) = category_from_value(&value, dataset_id) {
                    category_names.insert(cat.category_id, cat.name.clone());
                    categories.push(cat);
                } else {
                    warn!("skipping malformed COCO category");
                }
            }
            CocoEvent::Image(value) => raw_images.push(value),
            CocoEvent::Annotation(value) => raw_annotations.push(value),
        }
    }

    let samples: Vec<Sample> = raw_images
        .iter()
        .filter_map(|v| sample_from_coco_image(v, dataset_id, image_dir, split))
        .collect();
    let annotations: Vec<Annotation> = raw_annotations
        .iter()
        .filter_map(|v| annotation_from_coco(v, dataset_id, &category_names))
        .collect();

    Ok((categories, samples, annotations))
}

fn collect_classification(
    text: &str,
    dataset_id: &str,
    image_dir: &str,
    split: Option<&str>,
) -> (Vec<Category>, Vec<Sample>, Vec<Annotation>) {
    let mut category_ids: HashMap<String, i64> = HashMap::new();
    let mut next_id = 1i64;
    let mut samples: HashMap<String, Sample> = HashMap::new();
    let mut annotations = Vec::new();

    for record in parse_classification_jsonl(text) {
        samples.entry(record.file_name.clone()).or_insert_with(|| Sample {
            dataset_id: dataset_id.to_string(),
            id: record.file_name.clone(),
            file_name: record.file_name.clone(),
            width: 0,
            height: 0,
            thumbnail_path: None,
            split: split.map(str::to_string),
            tags: Vec::new(),
            image_dir: image_dir.to_string(),
        });
        for label in &record.labels {
            category_ids.entry(label.clone()).or_insert_with(|| {
                let id = next_id;
                next_id += 1;
                id
            });
            annotations.push(Annotation {
                dataset_id: dataset_id.to_string(),
                id: format!("{}:{}", record.file_name, label),
                sample_id: record.file_name.clone(),
                category_name: label.clone(),
                bbox: BBox::ZERO,
                area: 0.0,
                is_crowd: false,
                source: GROUND_TRUTH_SOURCE.to_string(),
                confidence: None,
            });
        }
    }

    let categories = category_ids
        .into_iter()
        .map(|(name, category_id)| Category {
            dataset_id: dataset_id.to_string(),
            category_id,
            name,
            supercategory: None,
        })
        .collect();
    let samples = samples.into_values().collect();

    (categories, samples, annotations)
}

fn category_from_value(value: &Value, dataset_id: &str) -> Option<Category> {
    let obj = value.as_object()?;
    let category_id = obj.get("id")?.as_i64()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let supercategory = obj
        .get("supercategory")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(Category {
        dataset_id: dataset_id.to_string(),
        category_id,
        name,
        supercategory,
    })
}

fn sample_from_coco_image(
    value: &Value,
    dataset_id: &str,
    image_dir: &str,
    split: Option<&str>,
) -> Option<Sample> {
    let obj = value.as_object()?;
    let id = obj.get("id")?.as_i64()?.to_string();
    let file_name = obj.get("file_name")?.as_str()?.to_string();
    let width = obj.get("width").and_then(Value::as_i64).unwrap_or(0) as i32;
    let height = obj.get("height").and_then(Value::as_i64).unwrap_or(0) as i32;
    Some(Sample {
        dataset_id: dataset_id.to_string(),
        id,
        file_name,
        width,
        height,
        thumbnail_path: None,
        split: split.map(str::to_string),
        tags: Vec::new(),
        image_dir: image_dir.to_string(),
    })
}

fn annotation_from_coco(
    value: &Value,
    dataset_id: &str,
    category_names: &HashMap<i64, String>,
) -> Option<Annotation> {
    let obj = value.as_object()?;
    let id = obj.get("id")?.as_i64()?.to_string();
    let image_id = obj.get("image_id")?.as_i64()?.to_string();
    let category_id = obj.get("category_id").and_then(Value::as_i64);
    let category_name = category_id
        .and_then(|cid| category_names.get(&cid).cloned())
        .unwrap_or_else(|| "unknown".to_string());
    let bbox = match obj.get("bbox").and_then(Value::as_array) {
        Some(arr) if arr.len() == 4 => BBox {
            x: arr[0].as_f64().unwrap_or(0.0),
            y: arr[1].as_f64().unwrap_or(0.0),
            w: arr[2].as_f64().unwrap_or(0.0),
            h: arr[3].as_f64().unwrap_or(0.0),
        },
        _ => BBox::ZERO,
    };
    let area = obj
        .get("area")
        .and_then(Value::as_f64)
        .unwrap_or_else(|| bbox.area());
    let is_crowd = obj
        .get("iscrowd")
        .and_then(Value::as_i64)
        .map(|v| v != 0)
        .unwrap_or(false);
    Some(Annotation {
        dataset_id: dataset_id.to_string(),
        id,
        sample_id: image_id,
        category_name,
        bbox,
        area,
        is_crowd,
        source: GROUND_TRUTH_SOURCE.to_string(),
        confidence: None,
    })
}

async fn backfill_one_thumbnail(
    storage: &StorageManager,
    db: &Database,
    codec: &dyn ThumbnailCodec,
    config: &AppConfig,
    sample: &Sample,
) -> Result<(), AppError> {
    let image_path = storage.resolve_image_path(&sample.image_dir, &sample.file_name)?;
    let bytes = storage.read_bytes(&image_path).await?;
    let output = codec
        .make_thumbnail(&bytes, config.thumbnail_default_size, config.thumbnail_webp_quality)
        .await?;
    let cache_location = format!("{}/{}.webp", sample.dataset_id, sample.id);
    storage.put(&cache_location, output.bytes.into()).await?;
    db.set_sample_thumbnail(
        &sample.dataset_id,
        &sample.id,
        &cache_location,
        output.source_width,
        output.source_height,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_coco_maps_category_names_and_defaults_unknown() {
        let doc = r#"{
            "categories": [{"id": 1, "name": "cat"}],
            "images": [{"id": 10, "file_name": "a.jpg", "width": 100, "height": 200}],
            "annotations": [
                {"id": 100, "image_id": 10, "category_id": 1, "bbox": [1,2,3,4]},
                {"id": 101, "image_id": 10, "category_id": 99, "bbox": [0,0,1,1]}
            ]
        }"#;
        let (categories, samples, annotations) = collect_coco(doc, "ds1", "images/train", Some("train")).unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].width, 100);
        assert_eq!(samples[0].split.as_deref(), Some("train"));
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].category_name, "cat");
        assert_eq!(annotations[1].category_name, "unknown");
    }

    #[test]
    fn collect_classification_assigns_sequential_category_ids() {
        let text = "{\"filename\": \"a.jpg\", \"label\": \"cat\"}\n{\"filename\": \"b.jpg\", \"label\": \"dog\"}\n";
        let (categories, samples, annotations) = collect_classification(text, "ds1", "images", Some("train"));
        assert_eq!(categories.len(), 2);
        assert_eq!(samples.len(), 2);
        assert_eq!(annotations.len(), 2);
        assert!(samples.iter().all(|s| s.split.as_deref() == Some("train")));
    }
}
