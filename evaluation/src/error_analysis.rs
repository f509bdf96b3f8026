//! Error categoriser (C8): the same greedy IoU matching skeleton as
//! [`crate::detection`], but every prediction is labelled TP / label_error /
//! hard_FP rather than reduced to a TP/FP bit, and unmatched GT becomes a
//! false negative. Ported from the original's `error_analysis.py`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use common::storage::types::annotation::Annotation;
use serde::{Deserialize, Serialize};

use crate::iou::{iou_matrix, to_xyxy, Xyxy};

/// Cap on samples returned per error type, to keep preview payloads small.
pub const MAX_SAMPLES_PER_TYPE: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Tp,
    HardFp,
    LabelError,
    FalseNegative,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Tp => "tp",
            ErrorType::HardFp => "hard_fp",
            ErrorType::LabelError => "label_error",
            ErrorType::FalseNegative => "false_negative",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSample {
    pub sample_id: String,
    pub error_type: ErrorType,
    pub category_name: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorSummary {
    pub true_positives: u64,
    pub hard_false_positives: u64,
    pub label_errors: u64,
    pub false_negatives: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerClassErrors {
    pub class_name: String,
    pub tp: u64,
    pub hard_fp: u64,
    pub label_error: u64,
    pub fn_: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorAnalysis {
    pub summary: ErrorSummary,
    pub per_class: Vec<PerClassErrors>,
    pub samples_by_type: HashMap<ErrorType, Vec<ErrorSample>>,
}

fn conf_of(a: &Annotation) -> f64 {
    a.confidence.unwrap_or(1.0)
}

fn empty_samples_by_type() -> HashMap<ErrorType, Vec<ErrorSample>> {
    [
        (ErrorType::Tp, Vec::new()),
        (ErrorType::HardFp, Vec::new()),
        (ErrorType::LabelError, Vec::new()),
        (ErrorType::FalseNegative, Vec::new()),
    ]
    .into_iter()
    .collect()
}

/// Categorise every prediction and every GT miss into TP / hard_FP /
/// label_error / false_negative, aggregated both overall and per class.
pub fn categorize_errors(
    gt: &[Annotation],
    pred: &[Annotation],
    iou_threshold: f64,
    conf_threshold: f64,
) -> ErrorAnalysis {
    if gt.is_empty() && pred.is_empty() {
        return ErrorAnalysis {
            summary: ErrorSummary::default(),
            per_class: vec![],
            samples_by_type: empty_samples_by_type(),
        };
    }

    let mut gt_by_sample: HashMap<&str, Vec<&Annotation>> = HashMap::new();
    for a in gt {
        gt_by_sample.entry(a.sample_id.as_str()).or_default().push(a);
    }
    let mut pred_by_sample: HashMap<&str, Vec<&Annotation>> = HashMap::new();
    for a in pred {
        pred_by_sample.entry(a.sample_id.as_str()).or_default().push(a);
    }
    let mut sample_ids: Vec<&str> = gt_by_sample
        .keys()
        .chain(pred_by_sample.keys())
        .copied()
        .collect();
    sample_ids.sort_unstable();
    sample_ids.dedup();

    let mut summary = ErrorSummary::default();
    let mut per_class_counts: HashMap<String, PerClassErrors> = HashMap::new();
    let mut samples_by_type = empty_samples_by_type();

    for sid in sample_ids {
        let gt_rows = gt_by_sample.get(sid).cloned().unwrap_or_default();
        let mut pred_rows: Vec<&Annotation> = pred_by_sample
            .get(sid)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|a| conf_of(a) >= conf_threshold)
            .collect();
        pred_rows.sort_by(|a, b| conf_of(b).partial_cmp(&conf_of(a)).unwrap_or(Ordering::Equal));

        let gt_xyxy: Vec<Xyxy> = gt_rows.iter().map(|a| to_xyxy(a.bbox)).collect();
        let pred_xyxy: Vec<Xyxy> = pred_rows.iter().map(|a| to_xyxy(a.bbox)).collect();
        let ious = iou_matrix(&pred_xyxy, &gt_xyxy);

        let mut matched_gt: HashSet<usize> = HashSet::new();

        for (pi, pred) in pred_rows.iter().enumerate() {
            let mut best_iou = 0.0_f64;
            let mut best_gi: Option<usize> = None;
            for gi in 0..gt_rows.len() {
                if matched_gt.contains(&gi) {
                    continue;
                }
                if let Some(v) = ious.get(pi).and_then(|row| row.get(gi)) {
                    if *v > best_iou {
                        best_iou = *v;
                        best_gi = Some(gi);
                    }
                }
            }

            let error_type = match best_gi {
                Some(gi) if best_iou >= iou_threshold => {
                    matched_gt.insert(gi);
                    match gt_rows.get(gi) {
                        Some(g) if g.category_name == pred.category_name => ErrorType::Tp,
                        _ => ErrorType::LabelError,
                    }
                }
                _ => ErrorType::HardFp,
            };

            let entry = per_class_counts
                .entry(pred.category_name.clone())
                .or_insert_with(|| PerClassErrors {
                    class_name: pred.category_name.clone(),
                    ..Default::default()
                });
            match error_type {
                ErrorType::Tp => {
                    summary.true_positives += 1;
                    entry.tp += 1;
                }
                ErrorType::LabelError => {
                    summary.label_errors += 1;
                    entry.label_error += 1;
                }
                ErrorType::HardFp => {
                    summary.hard_false_positives += 1;
                    entry.hard_fp += 1;
                }
                ErrorType::FalseNegative => unreachable!("predictions never yield false_negative"),
            }

            if let Some(bucket) = samples_by_type.get_mut(&error_type) {
                if bucket.len() < MAX_SAMPLES_PER_TYPE {
                    bucket.push(ErrorSample {
                        sample_id: sid.to_string(),
                        error_type,
                        category_name: pred.category_name.clone(),
                        confidence: pred.confidence,
                    });
                }
            }
        }

        for (gi, g_ann) in gt_rows.iter().enumerate() {
            if matched_gt.contains(&gi) {
                continue;
            }
            summary.false_negatives += 1;
            let entry = per_class_counts
                .entry(g_ann.category_name.clone())
                .or_insert_with(|| PerClassErrors {
                    class_name: g_ann.category_name.clone(),
                    ..Default::default()
                });
            entry.fn_ += 1;
            if let Some(bucket) = samples_by_type.get_mut(&ErrorType::FalseNegative) {
                if bucket.len() < MAX_SAMPLES_PER_TYPE {
                    bucket.push(ErrorSample {
                        sample_id: sid.to_string(),
                        error_type: ErrorType::FalseNegative,
                        category_name: g_ann.category_name.clone(),
                        confidence: None,
                    });
                }
            }
        }
    }

    let mut per_class: Vec<PerClassErrors> = per_class_counts.into_values().collect();
    per_class.sort_by(|a, b| a.class_name.cmp(&b.class_name));

    ErrorAnalysis {
        summary,
        per_class,
        samples_by_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::annotation::BBox;

    fn ann(sample: &str, class: &str, bbox: BBox, source: &str, conf: Option<f64>) -> Annotation {
        Annotation {
            dataset_id: "ds".to_string(),
            id: format!("{sample}-{class}"),
            sample_id: sample.to_string(),
            category_name: class.to_string(),
            bbox,
            area: bbox.area(),
            is_crowd: false,
            source: source.to_string(),
            confidence: conf,
        }
    }

    #[test]
    fn mismatched_class_at_high_iou_is_a_label_error() {
        let box_ = BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let gt = vec![ann("s1", "cat", box_, "ground_truth", None)];
        let pred = vec![ann("s1", "dog", box_, "run1", Some(0.9))];
        let result = categorize_errors(&gt, &pred, 0.5, 0.1);
        assert_eq!(result.summary.label_errors, 1);
        assert_eq!(result.summary.true_positives, 0);
    }

    #[test]
    fn unmatched_gt_is_a_false_negative() {
        let box_ = BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let gt = vec![ann("s1", "cat", box_, "ground_truth", None)];
        let result = categorize_errors(&gt, &[], 0.5, 0.1);
        assert_eq!(result.summary.false_negatives, 1);
    }
}
