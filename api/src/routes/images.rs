//! Thumbnail-on-demand image serving (§6): `small|medium|large` map to
//! 128/256/512px WebP at quality 80, cached under a deterministic name;
//! `original` streams the source bytes untouched.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    #[serde(default = "default_size")]
    pub size: String,
}

fn default_size() -> String {
    "medium".to_string()
}

fn guess_content_type(file_name: &str) -> String {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "gif" => mime::IMAGE_GIF.to_string(),
        "webp" => "image/webp".to_string(),
        "bmp" => mime::IMAGE_BMP.to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

fn size_to_px(size: &str) -> Result<Option<u32>, ApiError> {
    match size {
        "small" => Ok(Some(128)),
        "medium" => Ok(Some(256)),
        "large" => Ok(Some(512)),
        "original" => Ok(None),
        other => Err(ApiError::BadInput(format!("unknown size: {other}"))),
    }
}

pub async fn get_image(
    State(state): State<ApiState>,
    Path((dataset_id, sample_id)): Path<(String, String)>,
    Query(q): Query<ImageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sample = state
        .db
        .get_sample(&dataset_id, &sample_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sample not found: {sample_id}")))?;
    let image_path = state.storage.resolve_image_path(&sample.image_dir, &sample.file_name)?;

    let Some(px) = size_to_px(&q.size)? else {
        let bytes = state.storage.read_bytes(&image_path).await?;
        let content_type = guess_content_type(&sample.file_name);
        return Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response());
    };

    let cache_location = format!("{dataset_id}/{sample_id}_{px}.webp");
    if let Ok(cached) = state.storage.read_bytes(&cache_location).await {
        return Ok(([(header::CONTENT_TYPE, "image/webp".to_string())], cached).into_response());
    }

    let codec = state.thumbnails()?;
    let source_bytes = state.storage.read_bytes(&image_path).await?;
    let output = codec
        .make_thumbnail(&source_bytes, px, state.config.thumbnail_webp_quality)
        .await?;
    state
        .storage
        .put(&cache_location, output.bytes.clone().into())
        .await
        .map_err(common::error::AppError::from)?;
    if sample.width == 0 || sample.height == 0 {
        state
            .db
            .set_sample_thumbnail(&dataset_id, &sample_id, &cache_location, output.source_width, output.source_height)
            .await?;
    }
    Ok(([(header::CONTENT_TYPE, "image/webp".to_string())], output.bytes).into_response())
}
