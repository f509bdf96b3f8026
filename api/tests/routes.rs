use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::storage::db::Database;
use common::storage::store::testing::TestStorageManager;
use common::storage::types::annotation::{BBox, GROUND_TRUTH_SOURCE};
use common::storage::types::dataset::{Dataset, DatasetFormat, DatasetType};
use common::storage::types::sample::Sample;
use common::utils::config::AppConfig;
use plugins::PluginRegistry;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_state() -> api::ApiState {
    let db = Database::open_in_memory().await.expect("open in-memory db");
    let storage = TestStorageManager::new_memory().await.expect("memory storage");
    let plugins = Arc::new(PluginRegistry::new());
    api::ApiState::new(db, storage.clone_storage(), AppConfig::default(), plugins, None, None, None)
}

fn sample_dataset(id: &str) -> Dataset {
    Dataset {
        id: id.to_string(),
        name: "demo".to_string(),
        annotation_path: "ann.json".to_string(),
        image_dir: "images".to_string(),
        format: DatasetFormat::Coco,
        dataset_type: DatasetType::Detection,
        image_count: 1,
        annotation_count: 0,
        category_count: 0,
        prediction_count: 0,
        metadata: None,
        created_at: chrono::Utc::now(),
    }
}

fn sample_row(dataset_id: &str) -> Sample {
    Sample {
        dataset_id: dataset_id.to_string(),
        id: "s1".to_string(),
        file_name: "a.jpg".to_string(),
        width: 10,
        height: 10,
        thumbnail_path: None,
        split: Some("train".to_string()),
        tags: vec![],
        image_dir: "images".to_string(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let state = test_state().await;
    let app = api::api_routes(state);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn get_dataset_not_found_maps_to_404() {
    let state = test_state().await;
    let app = api::api_routes(state);
    let response = app
        .oneshot(Request::builder().uri("/datasets/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_dataset_cascades_and_clears_thumbnail_cache() {
    let state = test_state().await;
    state.db.insert_dataset(sample_dataset("d1")).await.unwrap();
    state
        .storage
        .put("thumbnails/d1/s1_256.webp", "fake".as_bytes().to_vec().into())
        .await
        .unwrap();

    let app = api::api_routes(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/datasets/d1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.db.get_dataset("d1").await.unwrap().is_none());
}

#[tokio::test]
async fn create_annotation_then_reject_edit_of_prediction_source() {
    let state = test_state().await;
    state.db.insert_dataset(sample_dataset("d1")).await.unwrap();
    state.db.bulk_insert_samples(vec![sample_row("d1")]).await.unwrap();

    let app = api::api_routes(state.clone());
    let body = json!({
        "dataset_id": "d1",
        "sample_id": "s1",
        "category_name": "cat",
        "bbox": { "x": 0.0, "y": 0.0, "w": 2.0, "h": 2.0 },
        "is_crowd": false,
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/annotations")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let annotation_id = created["id"].as_str().unwrap().to_string();

    // ground-truth annotation edits fine
    let update = json!({
        "dataset_id": "d1",
        "category_name": "cat2",
        "bbox": { "x": 0.0, "y": 0.0, "w": 3.0, "h": 3.0 },
        "is_crowd": false,
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/annotations/{annotation_id}"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&update).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // a prediction-sourced annotation may not be edited through this endpoint
    let mut predicted = state
        .db
        .annotations_for_sample("d1", "s1")
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.id == annotation_id)
        .unwrap();
    predicted.source = "model_v1".to_string();
    predicted.id = "pred1".to_string();
    state.db.bulk_insert_annotations(vec![predicted]).await.unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/annotations/pred1")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&update).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let _ = GROUND_TRUTH_SOURCE;
}

#[tokio::test]
async fn get_image_original_streams_source_bytes() {
    let state = test_state().await;
    state.db.insert_dataset(sample_dataset("d1")).await.unwrap();
    state.db.bulk_insert_samples(vec![sample_row("d1")]).await.unwrap();
    state
        .storage
        .put("images/a.jpg", b"jpeg-bytes".to_vec().into())
        .await
        .unwrap();

    let app = api::api_routes(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/images/d1/s1?size=original")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"jpeg-bytes");
}

#[tokio::test]
async fn get_image_thumbnail_without_codec_is_503() {
    let state = test_state().await;
    state.db.insert_dataset(sample_dataset("d1")).await.unwrap();
    state.db.bulk_insert_samples(vec![sample_row("d1")]).await.unwrap();
    state.storage.put("images/a.jpg", b"jpeg-bytes".to_vec().into()).await.unwrap();

    let app = api::api_routes(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/images/d1/s1?size=medium")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn bulk_tag_then_untag_round_trips() {
    let state = test_state().await;
    state.db.insert_dataset(sample_dataset("d1")).await.unwrap();
    state.db.bulk_insert_samples(vec![sample_row("d1")]).await.unwrap();

    let app = api::api_routes(state.clone());
    let body = json!({ "dataset_id": "d1", "sample_ids": ["s1"], "tag": "review" });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/samples/bulk-tag")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let tagged = state.db.get_sample("d1", "s1").await.unwrap().unwrap();
    assert!(tagged.tags.contains(&"review".to_string()));

    let response = app
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/samples/bulk-untag")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let untagged = state.db.get_sample("d1", "s1").await.unwrap().unwrap();
    assert!(!untagged.tags.contains(&"review".to_string()));
}
