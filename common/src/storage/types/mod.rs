pub mod annotation;
pub mod annotation_triage;
pub mod category;
pub mod dataset;
pub mod embedding;
pub mod saved_view;
pub mod sample;
pub mod triage_tag;

pub use annotation::Annotation;
pub use annotation_triage::{AnnotationTriageLabel, AnnotationTriageOverride};
pub use category::Category;
pub use dataset::{Dataset, DatasetType};
pub use embedding::Embedding;
pub use saved_view::SavedView;
pub use sample::Sample;
