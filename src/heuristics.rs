use serde::{Deserialize, Serialize};

use crate::constants::splits::BOUND_ROUNDING_EPSILON;
use crate::splits::SplitSpec;

/// Inclusive item-count window a split may hold while staying within tolerance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBounds {
    /// Smallest admissible item count.
    pub min: usize,
    /// Largest admissible item count.
    pub max: usize,
}

impl SizeBounds {
    /// True when `count` lies inside the window.
    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && count <= self.max
    }
}

/// Ideal (fractional) item count for each split.
pub fn target_counts_for_total(total: usize, splits: &[SplitSpec]) -> Vec<f64> {
    splits
        .iter()
        .map(|split| split.fraction * total as f64)
        .collect()
}

/// Convert `fraction ± tolerance` into integer item-count windows.
///
/// Rounding is inward with a small slack so that a count sitting exactly on
/// the tolerance edge stays admissible despite float noise.
pub fn size_bounds_for_total(
    total: usize,
    splits: &[SplitSpec],
    tolerance: f64,
) -> Vec<SizeBounds> {
    let n = total as f64;
    splits
        .iter()
        .map(|split| {
            let low = ((split.fraction - tolerance) * n - BOUND_ROUNDING_EPSILON).ceil();
            let high = ((split.fraction + tolerance) * n + BOUND_ROUNDING_EPSILON).floor();
            SizeBounds {
                min: low.max(0.0) as usize,
                max: (high.max(0.0) as usize).min(total),
            }
        })
        .collect()
}

/// True when some integer allocation of `total` items can satisfy every window.
pub fn bounds_admit_total(bounds: &[SizeBounds], total: usize) -> bool {
    let min_sum: usize = bounds.iter().map(|b| b.min).sum();
    let max_sum: usize = bounds.iter().map(|b| b.max).sum();
    bounds.iter().all(|b| b.min <= b.max) && min_sum <= total && total <= max_sum
}

/// True when `count / total` is within `tolerance` of `fraction`.
pub fn within_tolerance(count: usize, total: usize, fraction: f64, tolerance: f64) -> bool {
    if total == 0 {
        return false;
    }
    let realized = count as f64 / total as f64;
    (realized - fraction).abs() <= tolerance + BOUND_ROUNDING_EPSILON
}

/// Mean absolute deviation between realized and target fractions.
pub fn balance_score(realized: &[f64], targets: &[f64]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let total: f64 = realized
        .iter()
        .zip(targets)
        .map(|(r, t)| (r - t).abs())
        .sum();
    total / targets.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_way() -> Vec<SplitSpec> {
        vec![SplitSpec::new("train", 0.8), SplitSpec::new("test", 0.2)]
    }

    #[test]
    fn bounds_keep_tolerance_edges_admissible() {
        let bounds = size_bounds_for_total(100, &two_way(), 0.05);
        assert_eq!(bounds[0], SizeBounds { min: 75, max: 85 });
        assert_eq!(bounds[1], SizeBounds { min: 15, max: 25 });
        assert!(bounds_admit_total(&bounds, 100));
        assert!(within_tolerance(75, 100, 0.8, 0.05));
        assert!(!within_tolerance(74, 100, 0.8, 0.05));
    }

    #[test]
    fn bounds_clamp_to_item_range() {
        let splits = vec![SplitSpec::new("a", 0.98), SplitSpec::new("b", 0.02)];
        let bounds = size_bounds_for_total(10, &splits, 0.05);
        assert_eq!(bounds[0].max, 10);
        assert_eq!(bounds[1].min, 0);
    }

    #[test]
    fn tight_tolerance_can_exclude_every_allocation() {
        let splits = vec![
            SplitSpec::new("a", 1.0 / 3.0),
            SplitSpec::new("b", 1.0 / 3.0),
            SplitSpec::new("c", 1.0 / 3.0),
        ];
        let bounds = size_bounds_for_total(4, &splits, 0.01);
        assert!(!bounds_admit_total(&bounds, 4));
    }

    #[test]
    fn target_counts_and_balance_score() {
        let counts = target_counts_for_total(50, &two_way());
        assert!((counts[0] - 40.0).abs() < 1e-9);
        assert!((counts[1] - 10.0).abs() < 1e-9);
        let score = balance_score(&[0.7, 0.3], &[0.8, 0.2]);
        assert!((score - 0.1).abs() < 1e-9);
        assert_eq!(balance_score(&[], &[]), 0.0);
    }
}
