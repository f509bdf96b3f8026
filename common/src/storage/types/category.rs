use serde::{Deserialize, Serialize};

/// `category_id` is the source format's integer, retained for
/// round-tripping imports; `name` is the join key used everywhere else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub dataset_id: String,
    pub category_id: i64,
    pub name: String,
    pub supercategory: Option<String>,
}
