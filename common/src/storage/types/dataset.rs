use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    Coco,
    ClassificationJsonl,
}

impl DatasetFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetFormat::Coco => "coco",
            DatasetFormat::ClassificationJsonl => "classification_jsonl",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "coco" => Some(DatasetFormat::Coco),
            "classification_jsonl" => Some(DatasetFormat::ClassificationJsonl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    Detection,
    Classification,
}

impl Default for DatasetType {
    fn default() -> Self {
        DatasetType::Detection
    }
}

impl DatasetType {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetType::Detection => "detection",
            DatasetType::Classification => "classification",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "detection" => Some(DatasetType::Detection),
            "classification" => Some(DatasetType::Classification),
            _ => None,
        }
    }
}

/// A dataset's aggregate counters, derived from its rows but persisted
/// for O(1) reads (I2 keeps them consistent with the underlying tables).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub annotation_path: String,
    pub image_dir: String,
    pub format: DatasetFormat,
    #[serde(default)]
    pub dataset_type: DatasetType,
    pub image_count: i64,
    pub annotation_count: i64,
    pub category_count: i64,
    pub prediction_count: i64,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}
