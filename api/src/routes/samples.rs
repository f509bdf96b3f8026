//! Sample listing, filter facets, bulk tagging, and annotation lookup
//! (§4.6, §6, P8).

use std::collections::HashMap;

use axum::extract::{Json, Path, Query, State};
use axum::response::IntoResponse;
use common::storage::filters::SampleFilter;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct ListSamplesQuery {
    pub dataset_id: String,
    pub split: Option<String>,
    pub category: Option<String>,
    pub file_name_contains: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub annotation_source: Option<String>,
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_desc: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

const DEFAULT_PAGE_SIZE: i64 = 100;

pub async fn list_samples(
    State(state): State<ApiState>,
    Query(q): Query<ListSamplesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = SampleFilter {
        dataset_id: q.dataset_id,
        split: q.split,
        category: q.category,
        file_name_contains: q.file_name_contains,
        tags: q.tags,
        id_allow_list: None,
        annotation_source: q.annotation_source,
        sort_by: q.sort_by,
        sort_desc: q.sort_desc,
    };
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 1000);
    let offset = q.offset.unwrap_or(0).max(0);
    let (samples, total) = state.db.query_samples_filtered(&filter, limit, offset).await?;
    Ok(axum::Json(json!({ "samples": samples, "total": total, "limit": limit, "offset": offset })))
}

#[derive(Debug, Deserialize)]
pub struct FilterFacetsQuery {
    pub dataset_id: String,
}

pub async fn filter_facets(
    State(state): State<ApiState>,
    Query(q): Query<FilterFacetsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (splits, categories, tags) = state.db.sample_filter_facets(&q.dataset_id).await?;
    Ok(axum::Json(json!({ "splits": splits, "categories": categories, "tags": tags })))
}

#[derive(Debug, Deserialize)]
pub struct BulkTagBody {
    pub dataset_id: String,
    pub sample_ids: Vec<String>,
    pub tag: String,
}

/// Idempotent per P8: `add_tag`/`remove_tag` are themselves no-ops on
/// repetition, so re-applying the same bulk op leaves tags unchanged.
pub async fn bulk_tag(
    State(state): State<ApiState>,
    Json(body): Json<BulkTagBody>,
) -> Result<impl IntoResponse, ApiError> {
    apply_bulk(&state, &body, true).await
}

pub async fn bulk_untag(
    State(state): State<ApiState>,
    Json(body): Json<BulkTagBody>,
) -> Result<impl IntoResponse, ApiError> {
    apply_bulk(&state, &body, false).await
}

async fn apply_bulk(
    state: &ApiState,
    body: &BulkTagBody,
    add: bool,
) -> Result<impl IntoResponse, ApiError> {
    if body.sample_ids.len() > state.config.filter_id_list_cap {
        return Err(ApiError::BadInput(format!(
            "sample_ids exceeds cap of {}",
            state.config.filter_id_list_cap
        )));
    }
    let mut samples = state.db.get_samples_by_ids(&body.dataset_id, &body.sample_ids).await?;
    for sample in &mut samples {
        if add {
            sample.add_tag(&body.tag);
        } else {
            sample.remove_tag(&body.tag);
        }
        state
            .db
            .set_sample_tags(&sample.dataset_id, &sample.id, sample.tags.clone())
            .await?;
    }
    Ok(axum::Json(json!({ "updated_count": samples.len() })))
}

#[derive(Debug, Deserialize)]
pub struct SampleAnnotationsQuery {
    pub dataset_id: String,
}

pub async fn sample_annotations(
    State(state): State<ApiState>,
    Path(sample_id): Path<String>,
    Query(q): Query<SampleAnnotationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let annotations = state.db.annotations_for_sample(&q.dataset_id, &sample_id).await?;
    Ok(axum::Json(annotations))
}

#[derive(Debug, Deserialize)]
pub struct BatchAnnotationsQuery {
    pub dataset_id: String,
    #[serde(default)]
    pub ids: Vec<String>,
}

pub async fn batch_annotations(
    State(state): State<ApiState>,
    Query(q): Query<BatchAnnotationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if q.ids.len() > state.config.batch_annotations_cap {
        return Err(ApiError::BadInput(format!(
            "ids exceeds cap of {}",
            state.config.batch_annotations_cap
        )));
    }
    let all = state.db.list_annotations(&q.dataset_id, None, None).await?;
    let wanted: std::collections::HashSet<&str> = q.ids.iter().map(String::as_str).collect();
    let by_sample: HashMap<&str, Vec<&common::storage::types::annotation::Annotation>> =
        all.iter().filter(|a| wanted.contains(a.sample_id.as_str())).fold(
            HashMap::new(),
            |mut acc, a| {
                acc.entry(a.sample_id.as_str()).or_default().push(a);
                acc
            },
        );
    Ok(axum::Json(json!(by_sample)))
}
