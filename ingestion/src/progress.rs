//! Progress events emitted by the ingestion orchestrator (C5), relayed
//! verbatim by the HTTP layer as an SSE stream.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    Categories,
    ParsingImages,
    ParsingAnnotations,
    Thumbnails,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionProgress {
    pub stage: IngestionStage,
    pub current: u64,
    /// `None` when the total row count isn't known ahead of time, e.g.
    /// while streaming a COCO array whose length wasn't pre-scanned.
    pub total: Option<u64>,
    pub message: String,
}

impl IngestionProgress {
    pub fn new(stage: IngestionStage, current: u64, total: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            stage,
            current,
            total,
            message: message.into(),
        }
    }
}
