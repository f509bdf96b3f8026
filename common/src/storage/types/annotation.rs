use serde::{Deserialize, Serialize};

pub const GROUND_TRUTH_SOURCE: &str = "ground_truth";

/// A bounding box in absolute image pixels, `(x, y, w, h)`. Classification
/// annotations use the sentinel-zero box (I3: `w >= 0`, `h >= 0`, `area =
/// w * h`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub const ZERO: BBox = BBox {
        x: 0.0,
        y: 0.0,
        w: 0.0,
        h: 0.0,
    };

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn to_xyxy(self) -> (f64, f64, f64, f64) {
        (self.x, self.y, self.x + self.w, self.y + self.h)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    pub dataset_id: String,
    pub id: String,
    pub sample_id: String,
    pub category_name: String,
    pub bbox: BBox,
    pub area: f64,
    pub is_crowd: bool,
    /// `"ground_truth"` or a run name; any other value is a prediction run.
    pub source: String,
    pub confidence: Option<f64>,
}

impl Annotation {
    pub fn is_ground_truth(&self) -> bool {
        self.source == GROUND_TRUTH_SOURCE
    }

    pub fn is_prediction(&self) -> bool {
        !self.is_ground_truth()
    }
}
