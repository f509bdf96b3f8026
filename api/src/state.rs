//! Process-wide singletons injected into every handler (§5, §9 "Global
//! state"): the column store, storage manager, plugin registry, task
//! engine, vector index, and the optional model capabilities, loaded
//! lazily and held for the process lifetime. Grounded on the teacher's
//! `api-router::api_state::ApiState`.

use std::sync::Arc;

use common::capabilities::{EmbeddingModel, ThumbnailCodec, VisionLanguageModel};
use common::storage::db::Database;
use common::storage::store::StorageManager;
use common::utils::config::AppConfig;
use plugins::PluginRegistry;
use tasks::{BruteForceIndex, TaskEngine, VectorIndex};

#[derive(Clone)]
pub struct ApiState {
    pub db: Database,
    pub storage: StorageManager,
    pub config: AppConfig,
    pub plugins: Arc<PluginRegistry>,
    pub task_engine: TaskEngine,
    pub vector_index: Arc<dyn VectorIndex>,
    pub embedding_model: Option<Arc<dyn EmbeddingModel>>,
    pub vlm: Option<Arc<dyn VisionLanguageModel>>,
    pub thumbnails: Option<Arc<dyn ThumbnailCodec>>,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        storage: StorageManager,
        config: AppConfig,
        plugins: Arc<PluginRegistry>,
        embedding_model: Option<Arc<dyn EmbeddingModel>>,
        vlm: Option<Arc<dyn VisionLanguageModel>>,
        thumbnails: Option<Arc<dyn ThumbnailCodec>>,
    ) -> Self {
        let vector_index: Arc<dyn VectorIndex> = Arc::new(BruteForceIndex::new(db.clone()));
        Self {
            db,
            storage,
            config,
            plugins,
            task_engine: TaskEngine::new(),
            vector_index,
            embedding_model,
            vlm,
            thumbnails,
        }
    }

    pub fn embedding_model(&self) -> Result<&Arc<dyn EmbeddingModel>, crate::error::ApiError> {
        self.embedding_model
            .as_ref()
            .ok_or_else(|| crate::error::ApiError::CapabilityUnavailable("embedding model not configured".to_string()))
    }

    pub fn vlm(&self) -> Result<&Arc<dyn VisionLanguageModel>, crate::error::ApiError> {
        self.vlm
            .as_ref()
            .ok_or_else(|| crate::error::ApiError::CapabilityUnavailable("vision-language model not configured".to_string()))
    }

    pub fn thumbnails(&self) -> Result<&Arc<dyn ThumbnailCodec>, crate::error::ApiError> {
        self.thumbnails
            .as_ref()
            .ok_or_else(|| crate::error::ApiError::CapabilityUnavailable("thumbnail codec not configured".to_string()))
    }
}
