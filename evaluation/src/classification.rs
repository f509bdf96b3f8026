//! Classification evaluator (C9): direct label comparison, no IoU matching.
//! Multi-label ground truth is reduced to its lexicographically minimum
//! label for a deterministic single-label comparison (recorded Open
//! Question decision, kept as-is from the original's `classification_evaluation.py`).

use std::collections::{BTreeSet, HashMap};

use common::storage::types::annotation::Annotation;
use serde::{Deserialize, Serialize};

fn conf_of(a: &Annotation) -> f64 {
    a.confidence.unwrap_or(1.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationPerClassMetrics {
    pub class_name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationEvaluation {
    pub accuracy: f64,
    pub macro_f1: f64,
    pub weighted_f1: f64,
    pub per_class_metrics: Vec<ClassificationPerClassMetrics>,
    pub confusion_matrix: Vec<Vec<u64>>,
    pub confusion_matrix_labels: Vec<String>,
    pub conf_threshold: f64,
}

/// Reduces possibly-multi-label ground truth to one label per sample (the
/// lexicographic minimum) and pairs it against every surviving prediction
/// for that sample, filtered by `conf_threshold` (a `None` confidence always
/// passes, matching the original's `OR pred.confidence IS NULL`).
pub fn compute_classification_evaluation(
    gt: &[Annotation],
    pred: &[Annotation],
    conf_threshold: f64,
) -> ClassificationEvaluation {
    let mut gt_by_sample: HashMap<&str, Vec<&str>> = HashMap::new();
    for a in gt {
        gt_by_sample
            .entry(a.sample_id.as_str())
            .or_default()
            .push(a.category_name.as_str());
    }
    let mut pred_by_sample: HashMap<&str, Vec<&Annotation>> = HashMap::new();
    for a in pred {
        pred_by_sample.entry(a.sample_id.as_str()).or_default().push(a);
    }

    let mut confusion_counts: HashMap<(String, Option<String>), u64> = HashMap::new();
    let mut all_classes: BTreeSet<String> = BTreeSet::new();

    for (sid, labels) in &gt_by_sample {
        let gt_label = match labels.iter().min() {
            Some(l) => (*l).to_string(),
            None => continue,
        };
        all_classes.insert(gt_label.clone());

        let filtered: Vec<&&Annotation> = pred_by_sample
            .get(sid)
            .map(|preds| preds.iter().filter(|p| conf_of(p) >= conf_threshold).collect())
            .unwrap_or_default();

        if filtered.is_empty() {
            *confusion_counts.entry((gt_label, None)).or_insert(0) += 1;
        } else {
            for p in filtered {
                all_classes.insert(p.category_name.clone());
                *confusion_counts
                    .entry((gt_label.clone(), Some(p.category_name.clone())))
                    .or_insert(0) += 1;
            }
        }
    }

    let labels: Vec<String> = all_classes.into_iter().collect();
    let label_index: HashMap<&str, usize> =
        labels.iter().enumerate().map(|(i, l)| (l.as_str(), i)).collect();
    let n = labels.len();
    let mut matrix = vec![vec![0u64; n]; n];
    let mut missing_per_class: HashMap<String, u64> = HashMap::new();

    for ((gt_label, pred_label), count) in confusion_counts {
        match pred_label {
            None => {
                *missing_per_class.entry(gt_label).or_insert(0) += count;
            }
            Some(pl) => {
                let gi = label_index.get(gt_label.as_str()).copied().unwrap_or(0);
                let pi = label_index.get(pl.as_str()).copied().unwrap_or(0);
                if let Some(row) = matrix.get_mut(gi) {
                    if let Some(cell) = row.get_mut(pi) {
                        *cell += count;
                    }
                }
            }
        }
    }

    let total: u64 = matrix.iter().flatten().sum();
    let correct: u64 = (0..n)
        .map(|i| matrix.get(i).and_then(|r| r.get(i)).copied().unwrap_or(0))
        .sum();
    let accuracy = if total > 0 { correct as f64 / total as f64 } else { 0.0 };

    let mut per_class = Vec::with_capacity(n);
    let mut f1_scores = Vec::with_capacity(n);
    let mut supports = Vec::with_capacity(n);

    for (i, class_name) in labels.iter().enumerate() {
        let tp = matrix.get(i).and_then(|r| r.get(i)).copied().unwrap_or(0);
        let row_sum: u64 = matrix.get(i).map(|r| r.iter().sum()).unwrap_or(0);
        let missing = missing_per_class.get(class_name).copied().unwrap_or(0);
        let support = row_sum + missing;

        let col_sum: u64 = (0..n)
            .map(|r| matrix.get(r).and_then(|row| row.get(i)).copied().unwrap_or(0))
            .sum();
        let precision = if col_sum > 0 { tp as f64 / col_sum as f64 } else { 0.0 };
        let recall = if support > 0 { tp as f64 / support as f64 } else { 0.0 };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        per_class.push(ClassificationPerClassMetrics {
            class_name: class_name.clone(),
            precision,
            recall,
            f1,
            support,
        });
        f1_scores.push(f1);
        supports.push(support);
    }

    let macro_f1 = if f1_scores.is_empty() {
        0.0
    } else {
        f1_scores.iter().sum::<f64>() / f1_scores.len() as f64
    };
    let total_support: u64 = supports.iter().sum();
    let weighted_f1 = if total_support > 0 {
        f1_scores
            .iter()
            .zip(supports.iter())
            .map(|(f, s)| f * (*s as f64))
            .sum::<f64>()
            / total_support as f64
    } else {
        0.0
    };

    ClassificationEvaluation {
        accuracy,
        macro_f1,
        weighted_f1,
        per_class_metrics: per_class,
        confusion_matrix: matrix,
        confusion_matrix_labels: labels,
        conf_threshold,
    }
}

/// Sample ids whose (reduced GT label, surviving prediction label) pair
/// matches `(actual_class, predicted_class)` — a direct label comparison,
/// no IoU needed.
pub fn confusion_cell_samples(
    gt: &[Annotation],
    pred: &[Annotation],
    actual_class: &str,
    predicted_class: &str,
    conf_threshold: f64,
) -> Vec<String> {
    let mut gt_by_sample: HashMap<&str, Vec<&str>> = HashMap::new();
    for a in gt {
        gt_by_sample
            .entry(a.sample_id.as_str())
            .or_default()
            .push(a.category_name.as_str());
    }
    let mut pred_by_sample: HashMap<&str, Vec<&Annotation>> = HashMap::new();
    for a in pred {
        pred_by_sample.entry(a.sample_id.as_str()).or_default().push(a);
    }

    let mut out = Vec::new();
    for (sid, labels) in &gt_by_sample {
        let gt_label = match labels.iter().min() {
            Some(l) => *l,
            None => continue,
        };
        if gt_label != actual_class {
            continue;
        }
        let has_match = pred_by_sample.get(sid).is_some_and(|preds| {
            preds
                .iter()
                .any(|p| conf_of(p) >= conf_threshold && p.category_name == predicted_class)
        });
        if has_match {
            out.push((*sid).to_string());
        }
    }
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::annotation::BBox;

    fn ann(sample: &str, class: &str, source: &str, conf: Option<f64>) -> Annotation {
        Annotation {
            dataset_id: "ds".to_string(),
            id: format!("{sample}-{class}-{source}"),
            sample_id: sample.to_string(),
            category_name: class.to_string(),
            bbox: BBox::ZERO,
            area: 0.0,
            is_crowd: false,
            source: source.to_string(),
            confidence: conf,
        }
    }

    #[test]
    fn multi_label_gt_reduces_to_min_label() {
        let gt = vec![
            ann("s1", "zebra", "ground_truth", None),
            ann("s1", "antelope", "ground_truth", None),
        ];
        let pred = vec![ann("s1", "antelope", "run1", Some(0.8))];
        let result = compute_classification_evaluation(&gt, &pred, 0.5);
        assert_eq!(result.confusion_matrix_labels, vec!["antelope", "zebra"]);
        assert_eq!(result.accuracy, 1.0);
    }

    #[test]
    fn missing_prediction_counts_as_support_without_a_match() {
        let gt = vec![ann("s1", "cat", "ground_truth", None)];
        let result = compute_classification_evaluation(&gt, &[], 0.5);
        assert_eq!(result.per_class_metrics[0].support, 1);
        assert_eq!(result.per_class_metrics[0].recall, 0.0);
    }
}
