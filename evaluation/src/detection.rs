//! Detection evaluator (C7): PR curves, 101-point interpolated AP, mAP over
//! the COCO IoU threshold sweep, confusion matrix, and confusion-cell
//! drill-down. Ported function-for-function from the original's
//! `evaluation.py`, trading DuckDB row tuples for [`Annotation`] and numpy
//! arrays for plain `Vec`s.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use common::storage::types::annotation::Annotation;
use serde::{Deserialize, Serialize};

use crate::iou::{iou_matrix, to_xyxy, Xyxy};

/// COCO-style IoU sweep used for mAP@50:95.
pub const IOU_THRESHOLDS: [f64; 10] = [0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80, 0.85, 0.90, 0.95];
const MAX_CURVE_POINTS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PrPoint {
    pub recall: f64,
    pub precision: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrCurve {
    pub class_name: String,
    pub points: Vec<PrPoint>,
    pub ap: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ApMetrics {
    pub map50: f64,
    pub map75: f64,
    pub map50_95: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerClassMetrics {
    pub class_name: String,
    pub ap50: f64,
    pub ap75: f64,
    pub ap50_95: f64,
    pub precision: f64,
    pub recall: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionEvaluation {
    pub pr_curves: Vec<PrCurve>,
    pub ap_metrics: ApMetrics,
    pub per_class_metrics: Vec<PerClassMetrics>,
    pub confusion_matrix: Vec<Vec<u64>>,
    pub confusion_matrix_labels: Vec<String>,
    pub iou_threshold: f64,
    pub conf_threshold: f64,
}

fn conf_of(a: &Annotation) -> f64 {
    a.confidence.unwrap_or(1.0)
}

fn by_confidence_desc(a: &Annotation, b: &Annotation) -> Ordering {
    conf_of(b).partial_cmp(&conf_of(a)).unwrap_or(Ordering::Equal)
}

struct Grouped<'a> {
    sample_ids: Vec<String>,
    gt_by_sample: HashMap<&'a str, Vec<&'a Annotation>>,
    pred_by_sample: HashMap<&'a str, Vec<&'a Annotation>>,
    class_names: Vec<String>,
}

fn group<'a>(gt: &'a [Annotation], pred: &'a [Annotation]) -> Grouped<'a> {
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

    let mut classes = std::collections::BTreeSet::new();
    for a in gt.iter().chain(pred.iter()) {
        classes.insert(a.category_name.clone());
    }

    Grouped {
        sample_ids: sample_ids.into_iter().map(String::from).collect(),
        gt_by_sample,
        pred_by_sample,
        class_names: classes.into_iter().collect(),
    }
}

struct TaggedPred {
    confidence: f64,
    is_tp: bool,
    class_name: String,
}

/// Greedy per-sample matching at `iou_threshold`: each prediction, walked in
/// confidence-descending order, claims the highest-IoU unmatched GT box of
/// its own class. Returns every prediction tagged TP/FP plus per-class GT
/// counts, ready for PR-curve construction.
fn tag_predictions(g: &Grouped, iou_threshold: f64) -> (Vec<TaggedPred>, HashMap<String, usize>) {
    let mut gt_counts: HashMap<String, usize> =
        g.class_names.iter().map(|c| (c.clone(), 0usize)).collect();
    let mut tagged = Vec::new();

    for sid in &g.sample_ids {
        let gt = g.gt_by_sample.get(sid.as_str()).cloned().unwrap_or_default();
        let mut pred = g.pred_by_sample.get(sid.as_str()).cloned().unwrap_or_default();

        for a in &gt {
            *gt_counts.entry(a.category_name.clone()).or_insert(0) += 1;
        }
        if pred.is_empty() {
            continue;
        }

        pred.sort_by(|a, b| by_confidence_desc(a, b));
        let gt_xyxy: Vec<Xyxy> = gt.iter().map(|a| to_xyxy(a.bbox)).collect();
        let pred_xyxy: Vec<Xyxy> = pred.iter().map(|a| to_xyxy(a.bbox)).collect();
        let ious = iou_matrix(&pred_xyxy, &gt_xyxy);

        let mut matched_gt: HashSet<usize> = HashSet::new();
        for (pi, p) in pred.iter().enumerate() {
            let mut best_iou = 0.0_f64;
            let mut best_gi: Option<usize> = None;
            for (gi, g_ann) in gt.iter().enumerate() {
                if matched_gt.contains(&gi) || g_ann.category_name != p.category_name {
                    continue;
                }
                if let Some(row) = ious.get(pi) {
                    if let Some(&v) = row.get(gi) {
                        if v > best_iou {
                            best_iou = v;
                            best_gi = Some(gi);
                        }
                    }
                }
            }
            let is_tp = match best_gi {
                Some(gi) if best_iou >= iou_threshold => {
                    matched_gt.insert(gi);
                    true
                }
                _ => false,
            };
            tagged.push(TaggedPred {
                confidence: conf_of(p),
                is_tp,
                class_name: p.category_name.clone(),
            });
        }
    }

    (tagged, gt_counts)
}

fn interpolated_ap(recalls: &[f64], precisions: &[f64]) -> f64 {
    let mut sum = 0.0;
    for k in 0..=100 {
        let r = f64::from(k) / 100.0;
        let mut max_p = 0.0_f64;
        for (recall, precision) in recalls.iter().zip(precisions.iter()) {
            if *recall >= r && *precision > max_p {
                max_p = *precision;
            }
        }
        sum += max_p;
    }
    sum / 101.0
}

fn build_pr_curve(mut preds: Vec<(f64, bool)>, n_gt: usize) -> (Vec<PrPoint>, f64) {
    if preds.is_empty() || n_gt == 0 {
        return (
            vec![PrPoint {
                recall: 0.0,
                precision: 1.0,
                confidence: 1.0,
            }],
            0.0,
        );
    }

    preds.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let mut tp = 0u64;
    let mut fp = 0u64;
    let mut recalls = Vec::with_capacity(preds.len());
    let mut precisions = Vec::with_capacity(preds.len());
    let mut confidences = Vec::with_capacity(preds.len());
    for (conf, is_tp) in &preds {
        if *is_tp {
            tp += 1;
        } else {
            fp += 1;
        }
        recalls.push(tp as f64 / n_gt as f64);
        precisions.push(tp as f64 / (tp + fp) as f64);
        confidences.push(*conf);
    }

    let ap = interpolated_ap(&recalls, &precisions);

    let n = recalls.len();
    let indices: Vec<usize> = if n > MAX_CURVE_POINTS {
        let last = MAX_CURVE_POINTS.saturating_sub(1).max(1);
        (0..MAX_CURVE_POINTS)
            .map(|i| i.saturating_mul(n - 1) / last)
            .collect()
    } else {
        (0..n).collect()
    };

    let points = indices
        .into_iter()
        .filter_map(|i| {
            Some(PrPoint {
                recall: *recalls.get(i)?,
                precision: *precisions.get(i)?,
                confidence: *confidences.get(i)?,
            })
        })
        .collect();

    (points, ap)
}

/// Per-class and overall ("all") PR curves at a single operating `iou_threshold`.
pub fn compute_pr_curves(gt: &[Annotation], pred: &[Annotation], iou_threshold: f64) -> Vec<PrCurve> {
    let g = group(gt, pred);
    let (tagged, gt_counts) = tag_predictions(&g, iou_threshold);

    let mut curves = Vec::new();
    for class_name in &g.class_names {
        let class_preds: Vec<(f64, bool)> = tagged
            .iter()
            .filter(|t| &t.class_name == class_name)
            .map(|t| (t.confidence, t.is_tp))
            .collect();
        let n_gt = gt_counts.get(class_name).copied().unwrap_or(0);
        if n_gt == 0 && class_preds.is_empty() {
            continue;
        }
        let (points, ap) = build_pr_curve(class_preds, n_gt);
        curves.push(PrCurve {
            class_name: class_name.clone(),
            points,
            ap,
        });
    }

    let overall_preds: Vec<(f64, bool)> = tagged.iter().map(|t| (t.confidence, t.is_tp)).collect();
    let total_gt: usize = gt_counts.values().sum();
    if total_gt > 0 || !overall_preds.is_empty() {
        let (points, ap) = build_pr_curve(overall_preds, total_gt);
        curves.insert(
            0,
            PrCurve {
                class_name: "all".to_string(),
                points,
                ap,
            },
        );
    }

    curves
}

/// mAP@50, mAP@75 and mAP@50:95, each macro-averaged over classes that have
/// at least one ground-truth box. Also returns per-class `(ap50, ap75,
/// ap50_95)` for the per-class metrics table.
pub fn compute_map(
    gt: &[Annotation],
    pred: &[Annotation],
) -> (ApMetrics, HashMap<String, (f64, f64, f64)>) {
    let g = group(gt, pred);
    let mut ap_by_class: HashMap<String, Vec<f64>> =
        g.class_names.iter().map(|c| (c.clone(), Vec::new())).collect();
    let mut gt_counts: HashMap<String, usize> = HashMap::new();

    for threshold in IOU_THRESHOLDS {
        let (tagged, counts) = tag_predictions(&g, threshold);
        gt_counts = counts;
        for class_name in &g.class_names {
            let class_preds: Vec<(f64, bool)> = tagged
                .iter()
                .filter(|t| &t.class_name == class_name)
                .map(|t| (t.confidence, t.is_tp))
                .collect();
            let n_gt = gt_counts.get(class_name).copied().unwrap_or(0);
            let (_points, ap) = build_pr_curve(class_preds, n_gt);
            ap_by_class.entry(class_name.clone()).or_default().push(ap);
        }
    }

    let mut per_class: HashMap<String, (f64, f64, f64)> = HashMap::new();
    for class_name in &g.class_names {
        let aps = ap_by_class.get(class_name).cloned().unwrap_or_default();
        let ap50 = aps.first().copied().unwrap_or(0.0);
        let ap75 = aps.get(5).copied().unwrap_or(0.0);
        let ap50_95 = if aps.is_empty() {
            0.0
        } else {
            aps.iter().sum::<f64>() / aps.len() as f64
        };
        per_class.insert(class_name.clone(), (ap50, ap75, ap50_95));
    }

    let classes_with_gt: Vec<&String> = g
        .class_names
        .iter()
        .filter(|c| gt_counts.get(*c).copied().unwrap_or(0) > 0)
        .collect();
    let macro_avg = |pick: fn(&(f64, f64, f64)) -> f64| -> f64 {
        if classes_with_gt.is_empty() {
            return 0.0;
        }
        let sum: f64 = classes_with_gt
            .iter()
            .filter_map(|c| per_class.get(*c))
            .map(pick)
            .sum();
        sum / classes_with_gt.len() as f64
    };

    let ap_metrics = ApMetrics {
        map50: macro_avg(|t| t.0),
        map75: macro_avg(|t| t.1),
        map50_95: macro_avg(|t| t.2),
    };

    (ap_metrics, per_class)
}

/// Per-sample match pairs at the (iou_threshold, conf_threshold) operating
/// point: `(gt_class_or_background, pred_class_or_background)`.
fn match_pairs_for_sample(
    gt: &[&Annotation],
    pred: &[&Annotation],
    iou_threshold: f64,
) -> Vec<(String, String)> {
    let gt_xyxy: Vec<Xyxy> = gt.iter().map(|a| to_xyxy(a.bbox)).collect();
    let pred_xyxy: Vec<Xyxy> = pred.iter().map(|a| to_xyxy(a.bbox)).collect();
    let ious = iou_matrix(&pred_xyxy, &gt_xyxy);

    let mut matched_gt: HashSet<usize> = HashSet::new();
    let mut matched_pred: HashSet<usize> = HashSet::new();
    let mut pairs = Vec::new();

    for (pi, p) in pred.iter().enumerate() {
        let mut best_iou = 0.0_f64;
        let mut best_gi: Option<usize> = None;
        for (gi, g_ann) in gt.iter().enumerate() {
            if matched_gt.contains(&gi) || g_ann.category_name != p.category_name {
                continue;
            }
            if let Some(v) = ious.get(pi).and_then(|row| row.get(gi)) {
                if *v > best_iou {
                    best_iou = *v;
                    best_gi = Some(gi);
                }
            }
        }
        if let Some(gi) = best_gi {
            if best_iou >= iou_threshold {
                matched_gt.insert(gi);
                matched_pred.insert(pi);
                if let Some(g_ann) = gt.get(gi) {
                    pairs.push((g_ann.category_name.clone(), p.category_name.clone()));
                }
            }
        }
    }

    for (pi, p) in pred.iter().enumerate() {
        if !matched_pred.contains(&pi) {
            pairs.push(("background".to_string(), p.category_name.clone()));
        }
    }
    for (gi, g_ann) in gt.iter().enumerate() {
        if !matched_gt.contains(&gi) {
            pairs.push((g_ann.category_name.clone(), "background".to_string()));
        }
    }

    pairs
}

fn filtered_sorted_preds<'a>(preds: Vec<&'a Annotation>, conf_threshold: f64) -> Vec<&'a Annotation> {
    let mut preds: Vec<&Annotation> = preds
        .into_iter()
        .filter(|a| conf_of(a) >= conf_threshold)
        .collect();
    preds.sort_by(|a, b| by_confidence_desc(a, b));
    preds
}

/// Confusion matrix at the operating point; rows/cols are `class_names` plus
/// a trailing `background`.
pub fn compute_confusion_matrix(
    gt: &[Annotation],
    pred: &[Annotation],
    iou_threshold: f64,
    conf_threshold: f64,
) -> (Vec<Vec<u64>>, Vec<String>) {
    let g = group(gt, pred);
    let n = g.class_names.len();
    let class_index: HashMap<&str, usize> = g
        .class_names
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();
    let background = n;
    let mut matrix = vec![vec![0u64; n + 1]; n + 1];

    for sid in &g.sample_ids {
        let gt_s = g.gt_by_sample.get(sid.as_str()).cloned().unwrap_or_default();
        let pred_s = filtered_sorted_preds(
            g.pred_by_sample.get(sid.as_str()).cloned().unwrap_or_default(),
            conf_threshold,
        );
        for (actual, predicted) in match_pairs_for_sample(&gt_s, &pred_s, iou_threshold) {
            let row = if actual == "background" {
                background
            } else {
                class_index.get(actual.as_str()).copied().unwrap_or(background)
            };
            let col = if predicted == "background" {
                background
            } else {
                class_index.get(predicted.as_str()).copied().unwrap_or(background)
            };
            if let Some(row_vec) = matrix.get_mut(row) {
                if let Some(cell) = row_vec.get_mut(col) {
                    *cell += 1;
                }
            }
        }
    }

    let mut labels = g.class_names.clone();
    labels.push("background".to_string());
    (matrix, labels)
}

/// Sample ids contributing at least one detection to confusion cell
/// `(actual_class, predicted_class)` — either may be `"background"`.
pub fn confusion_cell_samples(
    gt: &[Annotation],
    pred: &[Annotation],
    actual_class: &str,
    predicted_class: &str,
    iou_threshold: f64,
    conf_threshold: f64,
) -> Vec<String> {
    let g = group(gt, pred);
    let mut out = Vec::new();
    for sid in &g.sample_ids {
        let gt_s = g.gt_by_sample.get(sid.as_str()).cloned().unwrap_or_default();
        let pred_s = filtered_sorted_preds(
            g.pred_by_sample.get(sid.as_str()).cloned().unwrap_or_default(),
            conf_threshold,
        );
        let pairs = match_pairs_for_sample(&gt_s, &pred_s, iou_threshold);
        if pairs
            .iter()
            .any(|(a, p)| a == actual_class && p == predicted_class)
        {
            out.push(sid.clone());
        }
    }
    out
}

fn empty_evaluation(iou_threshold: f64, conf_threshold: f64) -> DetectionEvaluation {
    DetectionEvaluation {
        pr_curves: vec![],
        ap_metrics: ApMetrics {
            map50: 0.0,
            map75: 0.0,
            map50_95: 0.0,
        },
        per_class_metrics: vec![],
        confusion_matrix: vec![],
        confusion_matrix_labels: vec![],
        iou_threshold,
        conf_threshold,
    }
}

/// Full detection evaluation: PR curves, mAP, per-class AP/P/R and confusion
/// matrix, at the given operating point.
pub fn compute_evaluation(
    gt: &[Annotation],
    pred: &[Annotation],
    iou_threshold: f64,
    conf_threshold: f64,
) -> DetectionEvaluation {
    let g = group(gt, pred);
    if g.class_names.is_empty() {
        return empty_evaluation(iou_threshold, conf_threshold);
    }

    let pr_curves = compute_pr_curves(gt, pred, iou_threshold);
    let (ap_metrics, per_class_ap) = compute_map(gt, pred);
    let (confusion_matrix, confusion_matrix_labels) =
        compute_confusion_matrix(gt, pred, iou_threshold, conf_threshold);

    // Per-class precision/recall: the PR-curve point closest to conf_threshold,
    // so the table matches the curve's marked operating point exactly.
    let mut pr_at_conf: HashMap<String, (f64, f64)> = HashMap::new();
    for curve in &pr_curves {
        if curve.class_name == "all" {
            continue;
        }
        if curve.points.is_empty() {
            pr_at_conf.insert(curve.class_name.clone(), (0.0, 0.0));
            continue;
        }
        let closest = curve.points.iter().min_by(|a, b| {
            (a.confidence - conf_threshold)
                .abs()
                .partial_cmp(&(b.confidence - conf_threshold).abs())
                .unwrap_or(Ordering::Equal)
        });
        if let Some(point) = closest {
            pr_at_conf.insert(curve.class_name.clone(), (point.precision, point.recall));
        }
    }

    let per_class_metrics = g
        .class_names
        .iter()
        .map(|name| {
            let (ap50, ap75, ap50_95) = per_class_ap.get(name).copied().unwrap_or((0.0, 0.0, 0.0));
            let (precision, recall) = pr_at_conf.get(name).copied().unwrap_or((0.0, 0.0));
            PerClassMetrics {
                class_name: name.clone(),
                ap50,
                ap75,
                ap50_95,
                precision,
                recall,
            }
        })
        .collect();

    DetectionEvaluation {
        pr_curves,
        ap_metrics,
        per_class_metrics,
        confusion_matrix,
        confusion_matrix_labels,
        iou_threshold,
        conf_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::annotation::BBox;

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
    fn perfect_prediction_yields_ap_one() {
        let box_ = BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let gt = vec![ann("g1", "s1", "cat", box_, "ground_truth", None)];
        let pred = vec![ann("p1", "s1", "cat", box_, "run1", Some(0.9))];
        let eval = compute_evaluation(&gt, &pred, 0.5, 0.5);
        assert!((eval.ap_metrics.map50 - 1.0).abs() < 1e-9);
        assert_eq!(eval.confusion_matrix_labels, vec!["cat", "background"]);
        assert_eq!(eval.confusion_matrix[0][0], 1);
    }

    #[test]
    fn missed_detection_is_a_false_negative() {
        let box_ = BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 };
        let gt = vec![ann("g1", "s1", "cat", box_, "ground_truth", None)];
        let pred: Vec<Annotation> = vec![];
        let (matrix, labels) = compute_confusion_matrix(&gt, &pred, 0.5, 0.5);
        let cat_idx = labels.iter().position(|l| l == "cat").unwrap_or(0);
        let bg_idx = labels.iter().position(|l| l == "background").unwrap_or(1);
        assert_eq!(matrix[cat_idx][bg_idx], 1);
    }

    #[test]
    fn empty_dataset_returns_empty_evaluation() {
        let eval = compute_evaluation(&[], &[], 0.5, 0.5);
        assert!(eval.pr_curves.is_empty());
        assert_eq!(eval.ap_metrics.map50, 0.0);
    }
}
