//! Pairwise IoU over axis-aligned boxes (C7). Boxes are converted to xyxy
//! once up front; the matrix is a plain `Vec<Vec<f64>>` rather than an
//! `ndarray` dependency, matching the teacher's general preference for
//! hand-rolled numeric code over heavy numeric crates.

use common::storage::types::annotation::BBox;

/// `(x1, y1, x2, y2)` in absolute pixels.
pub type Xyxy = (f64, f64, f64, f64);

pub fn to_xyxy(bbox: BBox) -> Xyxy {
    bbox.to_xyxy()
}

fn iou(a: Xyxy, b: Xyxy) -> f64 {
    let (ax1, ay1, ax2, ay2) = a;
    let (bx1, by1, bx2, by2) = b;
    let x1 = ax1.max(bx1);
    let y1 = ay1.max(by1);
    let x2 = ax2.min(bx2);
    let y2 = ay2.min(by2);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (ax2 - ax1).max(0.0) * (ay2 - ay1).max(0.0);
    let area_b = (bx2 - bx1).max(0.0) * (by2 - by1).max(0.0);
    let union = area_a + area_b - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Vectorised (in spirit) IoU between two box sets. `matrix[i][j]` is the
/// IoU of `a[i]` against `b[j]`.
pub fn iou_matrix(a: &[Xyxy], b: &[Xyxy]) -> Vec<Vec<f64>> {
    a.iter()
        .map(|&bi| b.iter().map(|&bj| iou(bi, bj)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_boxes_have_iou_one() {
        let b = (0.0, 0.0, 10.0, 10.0);
        assert!((iou(b, b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_boxes_have_iou_zero() {
        let a = (0.0, 0.0, 1.0, 1.0);
        let b = (5.0, 5.0, 6.0, 6.0);
        assert_eq!(iou(a, b), 0.0);
    }

    #[test]
    fn zero_area_boxes_do_not_divide_by_zero() {
        let a = (0.0, 0.0, 0.0, 0.0);
        let b = (0.0, 0.0, 0.0, 0.0);
        assert_eq!(iou(a, b), 0.0);
    }

    #[test]
    fn matrix_matches_pairwise_calls() {
        let a = vec![(0.0, 0.0, 10.0, 10.0)];
        let b = vec![(0.0, 0.0, 10.0, 10.0), (20.0, 20.0, 30.0, 30.0)];
        let m = iou_matrix(&a, &b);
        assert_eq!(m.len(), 1);
        assert!((m[0][0] - 1.0).abs() < 1e-9);
        assert_eq!(m[0][1], 0.0);
    }
}
