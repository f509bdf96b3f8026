use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque filter-state blob the service round-trips without
/// interpreting its shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedView {
    pub id: String,
    pub dataset_id: String,
    pub name: String,
    pub filter_state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
