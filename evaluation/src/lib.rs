//! Evaluation & triage (C7–C10): detection metrics, error categorisation,
//! classification metrics, and worst-image ranking. Pure functions over
//! [`common::storage::types::annotation::Annotation`] slices — callers (the
//! `api` crate) own fetching ground truth/predictions from
//! [`common::storage::db::Database`] and any tag bookkeeping the results
//! trigger.

pub mod classification;
pub mod detection;
pub mod error_analysis;
pub mod iou;
pub mod triage;

pub use classification::{ClassificationEvaluation, ClassificationPerClassMetrics};
pub use detection::{ApMetrics, DetectionEvaluation, PerClassMetrics, PrCurve, PrPoint};
pub use error_analysis::{ErrorAnalysis, ErrorSample, ErrorSummary, ErrorType, PerClassErrors};
pub use triage::{TriageAnnotationView, TriageScore};
