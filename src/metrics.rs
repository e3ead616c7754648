use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::{DistanceMetric, checked_distance};
use crate::data::Dataset;
use crate::errors::SplitError;
use crate::types::{SplitIndex, SplitName};

/// Distribution of per-item minimum distances to the other splits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitDistanceSummary {
    /// Split name.
    pub split: SplitName,
    /// Number of items in the split.
    pub items: usize,
    /// Mean of the per-item minimum distances.
    pub mean: f64,
    /// Population standard deviation of the per-item minimum distances.
    pub std_dev: f64,
    /// Median of the per-item minimum distances.
    pub median: f64,
}

/// How far each split sits from the rest of the data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InterSetDistances {
    /// Summary per non-empty split, in declaration order.
    pub per_split: Vec<SplitDistanceSummary>,
    /// Smallest per-split median: the weakest separation of any split.
    pub dissimilarity: f64,
}

/// For every item, the minimum distance to any item placed in another split,
/// summarized per split.
///
/// Returns `None` when fewer than two splits received items.
pub fn min_interset_distances<F, M>(
    dataset: &Dataset<F>,
    metric: &M,
    split_of_item: &[SplitIndex],
    split_names: &[SplitName],
) -> Result<Option<InterSetDistances>, SplitError>
where
    F: Sync,
    M: DistanceMetric<F>,
{
    let occupied = split_names
        .iter()
        .enumerate()
        .filter(|(split, _)| split_of_item.contains(split))
        .count();
    if occupied < 2 {
        return Ok(None);
    }

    let items = dataset.items();
    // Collected in item order so the first failing pair is reproducible.
    let minima: Vec<Result<f64, SplitError>> = (0..items.len())
        .into_par_iter()
        .map(|i| {
            let mut best = f64::INFINITY;
            for j in 0..items.len() {
                if split_of_item[j] != split_of_item[i] {
                    best = best.min(checked_distance(items, metric, i, j)?);
                }
            }
            Ok(best)
        })
        .collect();
    let minima = minima.into_iter().collect::<Result<Vec<f64>, _>>()?;

    let mut per_split = Vec::new();
    for (split, name) in split_names.iter().enumerate() {
        let mut values: Vec<f64> = minima
            .iter()
            .zip(split_of_item)
            .filter(|(_, s)| **s == split)
            .map(|(d, _)| *d)
            .collect();
        if values.is_empty() {
            continue;
        }
        values.sort_by(f64::total_cmp);
        let count = values.len() as f64;
        let mean = values.iter().sum::<f64>() / count;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        let mid = values.len() / 2;
        let median = if values.len() % 2 == 0 {
            0.5 * (values[mid - 1] + values[mid])
        } else {
            values[mid]
        };
        debug!(
            "[balanced_splits:metrics] split '{}' min inter-set distance median {:.4}",
            name, median
        );
        per_split.push(SplitDistanceSummary {
            split: name.clone(),
            items: values.len(),
            mean,
            std_dev: variance.sqrt(),
            median,
        });
    }
    let dissimilarity = per_split
        .iter()
        .map(|summary| summary.median)
        .fold(f64::INFINITY, f64::min);
    Ok(Some(InterSetDistances {
        per_split,
        dissimilarity,
    }))
}
