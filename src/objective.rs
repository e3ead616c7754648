//! Balance objective: how much a cluster-to-split choice distorts balance.
//!
//! The objective has two parts:
//! - a pairwise cost `cost(c, s)`: for every task, the divergence between the
//!   global label distribution and the distribution of a split sitting at its
//!   target composition once cluster `c` is added to it;
//! - split-level share terms `w_r · |load_{r,s} / total_r − f_s| / f_s`, one
//!   per share row `r` and split `s`. Row 0 counts items (weight
//!   `size_weight`); row `1 + t` counts the present labels of task `t`
//!   (weight of task `t`), so every task's labelled items follow the split
//!   fractions. These depend on a split's total load, so the optimizer
//!   carries them as linearized deviations rather than folding them into
//!   `cost(c, s)`.

use std::collections::BTreeMap;

use crate::config::{CategoricalDivergence, ObjectiveConfig};
use crate::constants::objective::VARIANCE_EPSILON;
use crate::errors::SplitError;
use crate::splits::SplitSpec;
use crate::stats::{TaskStatistics, TaskSummary};
use crate::types::{ClassValue, ClusterId, SplitIndex};

/// Dense `clusters × splits` cost table.
#[derive(Clone, Debug, PartialEq)]
pub struct CostMatrix {
    n_splits: usize,
    values: Vec<f64>,
}

impl CostMatrix {
    /// Cost of assigning `cluster` to `split`.
    pub fn get(&self, cluster: ClusterId, split: SplitIndex) -> f64 {
        self.values[cluster * self.n_splits + split]
    }

    /// Costs of `cluster` for every split, in split order.
    pub fn row(&self, cluster: ClusterId) -> &[f64] {
        let start = cluster * self.n_splits;
        &self.values[start..start + self.n_splits]
    }

    /// Number of clusters (rows).
    pub fn n_clusters(&self) -> usize {
        self.values.len().checked_div(self.n_splits).unwrap_or(0)
    }

    /// Number of splits (columns).
    pub fn n_splits(&self) -> usize {
        self.n_splits
    }
}

/// A quantity whose per-split share should follow the split fractions.
#[derive(Clone, Debug, PartialEq)]
pub struct ShareRow {
    /// Weight of this row's deviation terms.
    pub weight: f64,
    /// Amount contributed by each cluster.
    pub counts: Vec<usize>,
    /// Sum of `counts`.
    pub total: usize,
}

impl ShareRow {
    fn new(weight: f64, counts: Vec<usize>) -> Self {
        Self {
            weight,
            total: counts.iter().sum(),
            counts,
        }
    }
}

/// Immutable balance objective for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceObjective {
    /// Pairwise task-balance costs.
    pub costs: CostMatrix,
    /// Target fraction per split.
    pub fractions: Vec<f64>,
    /// Share rows: items first, then one per task in task order.
    pub rows: Vec<ShareRow>,
}

impl BalanceObjective {
    /// Build the objective from run statistics.
    pub fn build(
        stats: &TaskStatistics,
        cluster_sizes: &[usize],
        splits: &[SplitSpec],
        config: &ObjectiveConfig,
    ) -> Result<Self, SplitError> {
        let task_weights = config.resolved_task_weights(stats.task_count())?;
        let n_splits = splits.len();
        let mut values = Vec::with_capacity(cluster_sizes.len() * n_splits);
        for cluster_stats in &stats.per_cluster {
            for split in splits {
                let cost: f64 = stats
                    .global
                    .iter()
                    .zip(cluster_stats)
                    .zip(&task_weights)
                    .map(|((global, cluster), weight)| {
                        weight * task_cost(global, cluster, split.fraction, config.divergence)
                    })
                    .sum();
                values.push(cost);
            }
        }

        let mut rows = vec![ShareRow::new(config.size_weight, cluster_sizes.to_vec())];
        for (task, weight) in task_weights.iter().enumerate() {
            let counts = stats
                .per_cluster
                .iter()
                .map(|cluster_stats| cluster_stats[task].present_count())
                .collect();
            rows.push(ShareRow::new(*weight, counts));
        }

        Ok(Self {
            costs: CostMatrix { n_splits, values },
            fractions: splits.iter().map(|split| split.fraction).collect(),
            rows,
        })
    }

    /// Deviation penalty of share row `row` when split `split` holds `load`.
    /// Rows without any count contribute nothing.
    pub fn row_penalty(&self, row: usize, split: SplitIndex, load: usize) -> f64 {
        let share = &self.rows[row];
        if share.total == 0 {
            return 0.0;
        }
        let fraction = self.fractions[split];
        let realized = load as f64 / share.total as f64;
        share.weight * (realized - fraction).abs() / fraction
    }

    /// Part of [`BalanceObjective::row_penalty`] that no completion of a
    /// partial assignment can undo: a split already above its target cannot
    /// shrink.
    pub fn row_overshoot(&self, row: usize, split: SplitIndex, load: usize) -> f64 {
        let share = &self.rows[row];
        if share.total == 0 {
            return 0.0;
        }
        let fraction = self.fractions[split];
        let realized = load as f64 / share.total as f64;
        share.weight * (realized - fraction).max(0.0) / fraction
    }

    /// Item-count deviation penalty of split `split` holding `load` items.
    pub fn size_penalty(&self, split: SplitIndex, load: usize) -> f64 {
        self.row_penalty(0, split, load)
    }

    /// Per-row, per-split loads of `split_of` (one split index per cluster).
    pub fn row_loads(&self, split_of: &[SplitIndex]) -> Vec<Vec<usize>> {
        self.rows
            .iter()
            .map(|share| {
                let mut loads = vec![0usize; self.fractions.len()];
                for (split, count) in split_of.iter().zip(&share.counts) {
                    loads[*split] += count;
                }
                loads
            })
            .collect()
    }

    /// Sum of every share-row penalty for the given `loads[row][split]`.
    pub fn share_penalty(&self, loads: &[Vec<usize>]) -> f64 {
        loads
            .iter()
            .enumerate()
            .flat_map(|(row, per_split)| {
                per_split
                    .iter()
                    .enumerate()
                    .map(move |(split, load)| self.row_penalty(row, split, *load))
            })
            .sum()
    }

    /// Full objective value of `split_of` (one split index per cluster).
    pub fn evaluate(&self, split_of: &[SplitIndex]) -> f64 {
        let pair: f64 = split_of
            .iter()
            .enumerate()
            .map(|(cluster, split)| self.costs.get(cluster, *split))
            .sum();
        pair + self.share_penalty(&self.row_loads(split_of))
    }
}

/// Divergence of the global distribution from a split at target composition
/// (`fraction` of the global present labels) after adding `cluster`.
fn task_cost(
    global: &TaskSummary,
    cluster: &TaskSummary,
    fraction: f64,
    divergence: CategoricalDivergence,
) -> f64 {
    match (global, cluster) {
        (
            TaskSummary::Continuous {
                count: global_n,
                mean: global_mean,
                std_dev,
            },
            TaskSummary::Continuous {
                count: cluster_n,
                mean: cluster_mean,
                ..
            },
        ) => {
            let base = fraction * *global_n as f64;
            let n = *cluster_n as f64;
            let mixed = (base * global_mean + n * cluster_mean) / (base + n);
            let shift = (mixed - global_mean).powi(2);
            let variance = std_dev * std_dev;
            if variance > VARIANCE_EPSILON {
                shift / variance
            } else {
                shift
            }
        }
        (
            TaskSummary::Categorical {
                count: global_n, ..
            },
            TaskSummary::Categorical {
                count: cluster_n,
                class_counts,
            },
        ) => {
            let Some(global_freqs) = global.frequencies() else {
                return 0.0;
            };
            let base = fraction * *global_n as f64;
            let denom = base + *cluster_n as f64;
            let mixed: BTreeMap<ClassValue, f64> = global_freqs
                .iter()
                .map(|(class, p)| {
                    let added = class_counts.get(class).copied().unwrap_or(0) as f64;
                    (*class, (base * p + added) / denom)
                })
                .collect();
            categorical_divergence(divergence, &global_freqs, &mixed)
        }
        _ => 0.0,
    }
}

/// Divergence between reference frequencies `p` and candidate frequencies `q`.
///
/// Classes absent from a map count as zero probability.
pub fn categorical_divergence(
    kind: CategoricalDivergence,
    p: &BTreeMap<ClassValue, f64>,
    q: &BTreeMap<ClassValue, f64>,
) -> f64 {
    let classes: Vec<ClassValue> = {
        let mut keys: Vec<ClassValue> = p.keys().chain(q.keys()).copied().collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    };
    let prob = |map: &BTreeMap<ClassValue, f64>, class: &ClassValue| {
        map.get(class).copied().unwrap_or(0.0)
    };
    match kind {
        CategoricalDivergence::JensenShannon => {
            let mut total = 0.0;
            for class in &classes {
                let (pk, qk) = (prob(p, class), prob(q, class));
                let mk = 0.5 * (pk + qk);
                if pk > 0.0 {
                    total += 0.5 * pk * (pk / mk).ln();
                }
                if qk > 0.0 {
                    total += 0.5 * qk * (qk / mk).ln();
                }
            }
            total.max(0.0)
        }
        CategoricalDivergence::ChiSquare => classes
            .iter()
            .map(|class| {
                let (pk, qk) = (prob(p, class), prob(q, class));
                if pk > 0.0 { (qk - pk).powi(2) / pk } else { 0.0 }
            })
            .sum(),
        CategoricalDivergence::TotalVariation => {
            0.5 * classes
                .iter()
                .map(|class| (prob(p, class) - prob(q, class)).abs())
                .sum::<f64>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Clustering;
    use crate::data::{Dataset, Item, TaskSpec};

    fn freqs(pairs: &[(ClassValue, f64)]) -> BTreeMap<ClassValue, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn divergences_vanish_on_identical_distributions() {
        let p = freqs(&[(0, 0.25), (1, 0.75)]);
        for kind in [
            CategoricalDivergence::JensenShannon,
            CategoricalDivergence::ChiSquare,
            CategoricalDivergence::TotalVariation,
        ] {
            assert!(categorical_divergence(kind, &p, &p).abs() < 1e-12);
        }
    }

    #[test]
    fn divergences_match_closed_forms() {
        let p = freqs(&[(0, 0.5), (1, 0.5)]);
        let q = freqs(&[(0, 1.0)]);
        let tv = categorical_divergence(CategoricalDivergence::TotalVariation, &p, &q);
        assert!((tv - 0.5).abs() < 1e-12);
        let chi = categorical_divergence(CategoricalDivergence::ChiSquare, &p, &q);
        assert!((chi - 1.0).abs() < 1e-12);
        let disjoint = categorical_divergence(
            CategoricalDivergence::JensenShannon,
            &freqs(&[(0, 1.0)]),
            &freqs(&[(1, 1.0)]),
        );
        assert!((disjoint - std::f64::consts::LN_2).abs() < 1e-12);
    }

    fn objective_fixture() -> (BalanceObjective, Vec<usize>) {
        // cluster 0 is typical, cluster 1 carries only positives with high values
        let items = vec![
            Item::new("a", (), vec![Some(0.0), Some(0.0)]),
            Item::new("b", (), vec![Some(1.0), Some(1.0)]),
            Item::new("c", (), vec![Some(1.0), Some(3.0)]),
            Item::new("d", (), vec![Some(1.0), None]),
        ];
        let dataset = Dataset::new(
            vec![TaskSpec::categorical("cls"), TaskSpec::continuous("reg")],
            items,
        )
        .unwrap();
        let clustering = Clustering::from_labels(&[0, 0, 1, 1]);
        let stats = TaskStatistics::build(&dataset, &clustering);
        let splits = vec![SplitSpec::new("train", 0.75), SplitSpec::new("test", 0.25)];
        let sizes = clustering.sizes();
        let objective =
            BalanceObjective::build(&stats, &sizes, &splits, &ObjectiveConfig::default()).unwrap();
        (objective, sizes)
    }

    #[test]
    fn atypical_clusters_cost_more_in_small_splits() {
        let (objective, _) = objective_fixture();
        assert_eq!(objective.costs.n_clusters(), 2);
        assert_eq!(objective.costs.n_splits(), 2);
        let atypical = objective.costs.row(1);
        assert!(atypical[1] > atypical[0]);
        assert!(objective.costs.get(1, 1) > objective.costs.get(0, 1));
        assert!(objective.costs.row(0).iter().all(|cost| *cost >= 0.0));
    }

    #[test]
    fn size_terms_track_fraction_deviation() {
        let (objective, _) = objective_fixture();
        assert!(objective.size_penalty(0, 3).abs() < 1e-12);
        assert!((objective.size_penalty(1, 2) - 1.0).abs() < 1e-12);
        assert_eq!(objective.row_overshoot(0, 0, 2), 0.0);
        assert!(objective.row_overshoot(0, 1, 2) > 0.0);

        // rows: items [2, 2], cls labels [2, 2], reg labels [2, 1]
        assert_eq!(objective.rows.len(), 3);
        assert_eq!(objective.rows[2].counts, vec![2, 1]);
        assert_eq!(objective.rows[2].total, 3);

        let value = objective.evaluate(&[0, 1]);
        let pair = objective.costs.get(0, 0) + objective.costs.get(1, 1);
        let items = 1.0 / 3.0 + 1.0;
        let reg = (2.0 / 3.0 - 0.75f64).abs() / 0.75 + (1.0 / 3.0 - 0.25f64).abs() / 0.25;
        assert!((value - (pair + 2.0 * items + reg)).abs() < 1e-12);
    }

    #[test]
    fn label_shares_are_balanced_even_for_uniform_labels() {
        // task "rare" is labelled only in cluster 0 and always with the same
        // class, so it has no divergence cost anywhere
        let items = (0..8)
            .map(|i| {
                let rare = if i < 2 { Some(1.0) } else { None };
                Item::new(format!("i{i}"), (), vec![rare])
            })
            .collect();
        let dataset = Dataset::new(vec![TaskSpec::categorical("rare")], items).unwrap();
        let clustering = Clustering::from_labels(&[0, 0, 1, 1, 2, 2, 3, 3]);
        let stats = TaskStatistics::build(&dataset, &clustering);
        let splits = vec![SplitSpec::new("train", 0.75), SplitSpec::new("test", 0.25)];
        let objective = BalanceObjective::build(
            &stats,
            &clustering.sizes(),
            &splits,
            &ObjectiveConfig::default(),
        )
        .unwrap();
        assert!(objective.costs.row(0).iter().all(|cost| cost.abs() < 1e-12));

        let labelled_in_train = objective.evaluate(&[0, 0, 0, 1]);
        let labelled_in_test = objective.evaluate(&[1, 0, 0, 0]);
        // item loads are exact in both; only the label row contributes
        assert!((labelled_in_train - (1.0 / 3.0 + 1.0)).abs() < 1e-9);
        assert!((labelled_in_test - (1.0 + 3.0)).abs() < 1e-9);
    }

    #[test]
    fn undefined_tasks_leave_cluster_costs_untouched() {
        let labels = [
            (Some(0.0), Some(0.5)),
            (Some(1.0), Some(1.5)),
            (Some(1.0), None),
            (Some(0.0), None),
            (Some(1.0), Some(-1.0)),
            (Some(1.0), Some(2.0)),
        ];
        let clustering = Clustering::from_labels(&[0, 0, 1, 1, 2, 2]);
        let splits = vec![SplitSpec::new("train", 0.75), SplitSpec::new("test", 0.25)];

        let both = Dataset::new(
            vec![TaskSpec::categorical("cls"), TaskSpec::continuous("reg")],
            labels
                .iter()
                .enumerate()
                .map(|(i, (cls, reg))| Item::new(format!("i{i}"), (), vec![*cls, *reg]))
                .collect(),
        )
        .unwrap();
        let cls_only = Dataset::new(
            vec![TaskSpec::categorical("cls")],
            labels
                .iter()
                .enumerate()
                .map(|(i, (cls, _))| Item::new(format!("i{i}"), (), vec![*cls]))
                .collect(),
        )
        .unwrap();

        let build = |dataset: &Dataset<()>| {
            let stats = TaskStatistics::build(dataset, &clustering);
            BalanceObjective::build(
                &stats,
                &clustering.sizes(),
                &splits,
                &ObjectiveConfig::default(),
            )
            .unwrap()
        };
        let with_reg = build(&both);
        let without_reg = build(&cls_only);

        let stats = TaskStatistics::build(&both, &clustering);
        assert!(!stats.per_cluster[1][1].is_defined());
        for (a, b) in with_reg.costs.row(1).iter().zip(without_reg.costs.row(1)) {
            assert!((a - b).abs() < 1e-12, "{a} vs {b}");
        }
        assert_ne!(with_reg.costs.row(0), without_reg.costs.row(0));
    }

    #[test]
    fn zero_weights_silence_tasks() {
        let items = vec![
            Item::new("a", (), vec![Some(0.0)]),
            Item::new("b", (), vec![Some(1.0)]),
        ];
        let dataset = Dataset::new(vec![TaskSpec::categorical("cls")], items).unwrap();
        let clustering = Clustering::from_labels(&[0, 1]);
        let stats = TaskStatistics::build(&dataset, &clustering);
        let splits = vec![SplitSpec::new("a", 0.5), SplitSpec::new("b", 0.5)];
        let config = ObjectiveConfig {
            task_weights: vec![0.0],
            ..ObjectiveConfig::default()
        };
        let objective = BalanceObjective::build(&stats, &clustering.sizes(), &splits, &config)
            .unwrap();
        assert!(objective.costs.row(0).iter().all(|cost| *cost == 0.0));
        assert!(objective.costs.row(1).iter().all(|cost| *cost == 0.0));
    }
}
