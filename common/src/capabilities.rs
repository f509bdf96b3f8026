//! External capability interfaces (§1's "out of scope, interfaces only"
//! collaborators): the thumbnail image codec, the embedding model, and the
//! vision-language model. Each is specified purely by its input/output
//! contract; callers depend on the trait object, never a concrete codec
//! or model crate.

use crate::error::AppError;
use async_trait::async_trait;

/// Resizes and re-encodes an image into a cached thumbnail. The codec
/// itself (format, resampling filter) is an external collaborator; this
/// crate only needs the contract.
#[async_trait]
pub trait ThumbnailCodec: Send + Sync {
    /// Returns encoded thumbnail bytes and the (width, height) of the
    /// *original* decoded image, so the caller can backfill `Sample`
    /// width/height alongside the thumbnail path.
    async fn make_thumbnail(
        &self,
        source_bytes: &[u8],
        target_size: u32,
        quality: u8,
    ) -> Result<ThumbnailOutput, AppError>;
}

pub struct ThumbnailOutput {
    pub bytes: Vec<u8>,
    pub source_width: i32,
    pub source_height: i32,
}

/// An embedding model producing fixed-length float vectors for images.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, image_bytes: &[u8]) -> Result<Vec<f32>, AppError>;
}

/// A vision-language model answering one natural-language prompt about one
/// image at a time. Auto-tag (C11) validates the free-form answer against a
/// controlled vocabulary per prompt dimension; the model itself owes no
/// guarantee of staying within it.
#[async_trait]
pub trait VisionLanguageModel: Send + Sync {
    async fn answer(&self, image_bytes: &[u8], prompt: &str) -> Result<String, AppError>;
}
