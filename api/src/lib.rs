//! HTTP surface (C14): the axum router implementing the endpoint list in
//! spec §6. Grounded on the teacher's `api-router` crate for handler
//! style and `ApiState`/`ApiError` shape; every background task is
//! dispatched with `tokio::spawn` straight from its launching handler
//! rather than polling a persisted job queue (§9 "single HTTP server" —
//! see DESIGN.md's Open Question resolution for C14/main).

pub mod error;
pub mod routes;
pub mod sse;
pub mod state;

use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::ApiState;

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/datasets/ingest", post(routes::ingestion::ingest_dataset))
        .route("/ingestion/scan", post(routes::ingestion::scan))
        .route("/ingestion/import", post(routes::ingestion::import))
        .route("/ingestion/browse", post(routes::ingestion::browse))
        .route("/datasets", get(routes::datasets::list_datasets))
        .route("/datasets/{id}", get(routes::datasets::get_dataset))
        .route("/datasets/{id}", delete(routes::datasets::delete_dataset))
        .route("/datasets/{id}/predictions", post(routes::datasets::import_predictions))
        .route("/samples", get(routes::samples::list_samples))
        .route("/samples/filter-facets", get(routes::samples::filter_facets))
        .route("/samples/bulk-tag", patch(routes::samples::bulk_tag))
        .route("/samples/bulk-untag", patch(routes::samples::bulk_untag))
        .route("/samples/{id}/annotations", get(routes::samples::sample_annotations))
        .route("/samples/batch-annotations", get(routes::samples::batch_annotations))
        .route("/annotations", post(routes::annotations::create_annotation))
        .route("/annotations/{id}", put(routes::annotations::update_annotation))
        .route("/annotations/{id}", delete(routes::annotations::delete_annotation))
        .route("/images/{dataset_id}/{sample_id}", get(routes::images::get_image))
        .route("/datasets/{id}/statistics", get(routes::evaluation::statistics))
        .route("/datasets/{id}/evaluation", get(routes::evaluation::evaluation))
        .route(
            "/datasets/{id}/confusion-cell-samples",
            get(routes::evaluation::confusion_cell_samples),
        )
        .route("/datasets/{id}/error-analysis", get(routes::evaluation::error_analysis))
        .route(
            "/datasets/{id}/embeddings/generate",
            post(routes::embeddings::generate),
        )
        .route(
            "/datasets/{id}/embeddings/progress",
            get(routes::embeddings::progress),
        )
        .route("/datasets/{id}/embeddings/status", get(routes::embeddings::status))
        .route("/datasets/{id}/embeddings/reduce", post(routes::embeddings::reduce))
        .route(
            "/datasets/{id}/embeddings/reduce/progress",
            get(routes::embeddings::reduce_progress),
        )
        .route(
            "/datasets/{id}/embeddings/coordinates",
            get(routes::embeddings::coordinates),
        )
        .route(
            "/datasets/{id}/similarity/search",
            get(routes::similarity::search),
        )
        .route(
            "/datasets/{id}/similarity/detect",
            post(routes::similarity::detect),
        )
        .route(
            "/datasets/{id}/similarity/progress",
            get(routes::similarity::progress),
        )
        .route("/datasets/{id}/similarity", get(routes::similarity::cached))
        .route("/samples/set-triage-tag", patch(routes::triage::set_triage_tag))
        .route("/samples/{id}/triage-tag", delete(routes::triage::delete_triage_tag))
        .route("/datasets/{id}/worst-images", get(routes::triage::worst_images))
        .route(
            "/samples/{id}/annotation-triage",
            get(routes::triage::annotation_triage),
        )
        .route(
            "/samples/set-annotation-triage",
            patch(routes::triage::set_annotation_triage),
        )
        .route(
            "/samples/{id}/annotation-triage/{annotation_id}",
            delete(routes::triage::delete_annotation_triage),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
