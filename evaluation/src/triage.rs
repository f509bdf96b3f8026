//! Triage scorer & overlay (C10). Worst-image ranking ported from the
//! original's `triage.py`; per-annotation overlay re-runs the C8 matcher for
//! a single sample and overlays manual overrides at read time. The actual
//! tag bookkeeping (`triage:annotated`) is a write concern the HTTP layer
//! performs alongside [`common::storage::db::Database::upsert_annotation_triage`].

use std::collections::{HashMap, HashSet};

use common::storage::types::annotation::Annotation;
use common::storage::types::annotation_triage::{AnnotationTriageLabel, AnnotationTriageOverride};
use serde::{Deserialize, Serialize};

use crate::error_analysis::{categorize_errors, ErrorType};
use crate::iou::{iou_matrix, to_xyxy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriageScore {
    pub sample_id: String,
    pub error_count: u64,
    pub confidence_spread: f64,
    pub score: f64,
}

fn population_stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Ranks samples by `0.6 * err_norm + 0.4 * spread_norm`, descending, capped
/// at `limit`. `err(s)` is the count of non-TP detections for that sample
/// (hard_FP + label_error + FN); `spread(s)` is the population stddev of
/// the confidences behind those errors (0 below two values).
pub fn compute_worst_images(
    gt: &[Annotation],
    pred: &[Annotation],
    iou_threshold: f64,
    conf_threshold: f64,
    limit: usize,
) -> Vec<TriageScore> {
    let result = categorize_errors(gt, pred, iou_threshold, conf_threshold);

    let mut sample_errors: HashMap<String, u64> = HashMap::new();
    let mut sample_confidences: HashMap<String, Vec<f64>> = HashMap::new();

    for error_type in [ErrorType::HardFp, ErrorType::LabelError, ErrorType::FalseNegative] {
        if let Some(samples) = result.samples_by_type.get(&error_type) {
            for s in samples {
                *sample_errors.entry(s.sample_id.clone()).or_insert(0) += 1;
                if let Some(c) = s.confidence {
                    sample_confidences.entry(s.sample_id.clone()).or_default().push(c);
                }
            }
        }
    }

    if sample_errors.is_empty() {
        return vec![];
    }

    let sample_spread: HashMap<String, f64> = sample_errors
        .keys()
        .map(|sid| {
            let spread = match sample_confidences.get(sid) {
                Some(confs) if confs.len() >= 2 => population_stddev(confs),
                _ => 0.0,
            };
            (sid.clone(), spread)
        })
        .collect();

    let max_errors = sample_errors.values().copied().max().unwrap_or(1).max(1);
    let max_spread_raw = sample_spread.values().copied().fold(0.0_f64, f64::max);
    let max_spread = if max_spread_raw == 0.0 { 1.0 } else { max_spread_raw };

    let mut scored: Vec<TriageScore> = sample_errors
        .into_iter()
        .map(|(sample_id, error_count)| {
            let spread = sample_spread.get(&sample_id).copied().unwrap_or(0.0);
            let norm_errors = error_count as f64 / max_errors as f64;
            let norm_spread = spread / max_spread;
            TriageScore {
                sample_id,
                error_count,
                confidence_spread: spread,
                score: 0.6 * norm_errors + 0.4 * norm_spread,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// `annotation_id -> (auto_label, matched_annotation_id, iou)` for one
/// sample's predictions (tp/label_error/hard_fp) and unmatched GT
/// (false_negative) — the raw material the overlay GET endpoint serves.
pub fn auto_label_sample(
    gt: &[Annotation],
    pred: &[Annotation],
    iou_threshold: f64,
    conf_threshold: f64,
) -> HashMap<String, (ErrorType, Option<String>, Option<f64>)> {
    let mut pred_rows: Vec<&Annotation> = pred
        .iter()
        .filter(|a| a.confidence.unwrap_or(1.0) >= conf_threshold)
        .collect();
    pred_rows.sort_by(|a, b| {
        b.confidence
            .unwrap_or(1.0)
            .partial_cmp(&a.confidence.unwrap_or(1.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let gt_xyxy: Vec<_> = gt.iter().map(|a| to_xyxy(a.bbox)).collect();
    let pred_xyxy: Vec<_> = pred_rows.iter().map(|a| to_xyxy(a.bbox)).collect();
    let ious = iou_matrix(&pred_xyxy, &gt_xyxy);

    let mut matched_gt: HashSet<usize> = HashSet::new();
    let mut out = HashMap::new();

    for (pi, p) in pred_rows.iter().enumerate() {
        let mut best_iou = 0.0_f64;
        let mut best_gi: Option<usize> = None;
        for gi in 0..gt.len() {
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
        match best_gi {
            Some(gi) if best_iou >= iou_threshold => {
                matched_gt.insert(gi);
                let label = match gt.get(gi) {
                    Some(g) if g.category_name == p.category_name => ErrorType::Tp,
                    _ => ErrorType::LabelError,
                };
                let matched_id = gt.get(gi).map(|g| g.id.clone());
                out.insert(p.id.clone(), (label, matched_id, Some(best_iou)));
            }
            _ => {
                out.insert(p.id.clone(), (ErrorType::HardFp, None, None));
            }
        }
    }

    for (gi, g) in gt.iter().enumerate() {
        if !matched_gt.contains(&gi) {
            out.insert(g.id.clone(), (ErrorType::FalseNegative, None, None));
        }
    }

    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriageAnnotationView {
    pub annotation_id: String,
    pub auto_label: String,
    pub matched_id: Option<String>,
    pub iou: Option<f64>,
    pub override_label: Option<String>,
    pub displayed_label: String,
}

/// LEFT-JOINs manual overrides onto the auto-computed per-annotation
/// labels: the displayed label is the override when present, else the
/// auto label, with both preserved in the response.
pub fn overlay_sample_triage(
    gt: &[Annotation],
    pred: &[Annotation],
    overrides: &[AnnotationTriageOverride],
    iou_threshold: f64,
    conf_threshold: f64,
) -> Vec<TriageAnnotationView> {
    let auto = auto_label_sample(gt, pred, iou_threshold, conf_threshold);
    let override_by_id: HashMap<&str, AnnotationTriageLabel> =
        overrides.iter().map(|o| (o.annotation_id.as_str(), o.label)).collect();

    let mut views: Vec<TriageAnnotationView> = auto
        .into_iter()
        .map(|(annotation_id, (label, matched_id, iou))| {
            let override_label = override_by_id.get(annotation_id.as_str()).copied();
            let auto_label = label.as_str().to_string();
            let override_label_str = override_label.map(|l| l.as_str().to_string());
            let displayed_label = override_label_str.clone().unwrap_or_else(|| auto_label.clone());
            TriageAnnotationView {
                annotation_id,
                auto_label,
                matched_id,
                iou,
                override_label: override_label_str,
                displayed_label,
            }
        })
        .collect();
    views.sort_by(|a, b| a.annotation_id.cmp(&b.annotation_id));
    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::annotation::BBox;
    use chrono::Utc;

    fn ann(id: &str, sample: &str, class: &str, bbox: BBox, source: &str, conf: Option<f64>) -> Annotation {
        Annotation {
            dataset_id: "ds".to_string(),
            id: id.to_string(),
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
    fn worst_images_empty_when_no_errors() {
        let box_ = BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let gt = vec![ann("g1", "s1", "cat", box_, "ground_truth", None)];
        let pred = vec![ann("p1", "s1", "cat", box_, "run1", Some(0.9))];
        assert!(compute_worst_images(&gt, &pred, 0.5, 0.5, 50).is_empty());
    }

    #[test]
    fn override_label_wins_over_auto_label() {
        let box_ = BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let gt = vec![ann("g1", "s1", "cat", box_, "ground_truth", None)];
        let pred = vec![ann("p1", "s1", "dog", box_, "run1", Some(0.9))];
        let overrides = vec![AnnotationTriageOverride {
            annotation_id: "p1".to_string(),
            dataset_id: "ds".to_string(),
            sample_id: "s1".to_string(),
            label: AnnotationTriageLabel::Tp,
            created_at: Utc::now(),
        }];
        let views = overlay_sample_triage(&gt, &pred, &overrides, 0.5, 0.5);
        let view = views.iter().find(|v| v.annotation_id == "p1").expect("prediction view");
        assert_eq!(view.auto_label, "label_error");
        assert_eq!(view.displayed_label, "tp");
    }
}
