//! Expansion of the cluster assignment into item-level splits and reports.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cluster::Clustering;
use crate::data::Dataset;
use crate::hash::assignment_checksum;
use crate::heuristics::{balance_score, within_tolerance};
use crate::metrics::InterSetDistances;
use crate::optimizer::{OptimizationResult, SolveStatus};
use crate::splits::SplitSpec;
use crate::stats::{TaskSummary, summarize_items};
use crate::types::{ItemId, SplitIndex, SplitName, TaskName};

/// Realized distribution of one task inside one split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task name.
    pub task: TaskName,
    /// Summary of the task's present labels in the split.
    pub summary: TaskSummary,
    /// Share of the task's present labels (dataset-wide) held by the split.
    pub label_share: f64,
}

/// Realized size and balance of one split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    /// Split name.
    pub name: SplitName,
    /// Requested fraction.
    pub target_fraction: f64,
    /// Realized fraction of all items.
    pub realized_fraction: f64,
    /// Item count.
    pub item_count: usize,
    /// Cluster count.
    pub cluster_count: usize,
    /// Whether the realized fraction is within tolerance of the target.
    pub within_tolerance: bool,
    /// Per-task realized distributions, in task order.
    pub tasks: Vec<TaskReport>,
}

/// Final output of a split run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitReport {
    /// Split name per item id, in dataset order.
    pub assignments: IndexMap<ItemId, SplitName>,
    /// Per-split summaries, in declaration order.
    pub splits: Vec<SplitSummary>,
    /// Whether the solver result or the greedy fallback was used.
    pub status: SolveStatus,
    /// Objective value of the final assignment.
    pub objective_value: f64,
    /// Mean absolute deviation between each split's share of all present task
    /// labels and its target fraction.
    pub balance_score: f64,
    /// Number of clusters that were assigned.
    pub cluster_count: usize,
    /// Order-sensitive checksum of `assignments`.
    pub checksum: u64,
    /// Minimum inter-set distance diagnostics, when requested.
    pub interset_distances: Option<InterSetDistances>,
}

impl SplitReport {
    /// Split name assigned to `item`.
    pub fn split_of(&self, item: &str) -> Option<&str> {
        self.assignments.get(item).map(String::as_str)
    }

    /// Item ids assigned to `split`, in dataset order.
    pub fn items_in<'a>(&'a self, split: &'a str) -> impl Iterator<Item = &'a ItemId> + 'a {
        self.assignments
            .iter()
            .filter(move |(_, name)| name.as_str() == split)
            .map(|(id, _)| id)
    }

    /// True when the greedy fallback produced the assignment.
    pub fn used_fallback(&self) -> bool {
        self.status.is_fallback()
    }
}

/// Split index of every item under the cluster assignment.
pub fn item_splits(clustering: &Clustering, split_of_cluster: &[SplitIndex]) -> Vec<SplitIndex> {
    (0..clustering.item_count())
        .map(|item| split_of_cluster[clustering.cluster_of(item)])
        .collect()
}

/// Build the report for a finalized assignment.
///
/// `split_of_item` is [`item_splits`] of `result`'s assignment.
pub fn assemble_report<F>(
    dataset: &Dataset<F>,
    clustering: &Clustering,
    splits: &[SplitSpec],
    tolerance: f64,
    split_of_item: &[SplitIndex],
    result: OptimizationResult,
) -> SplitReport {
    let total = dataset.len();

    let assignments: IndexMap<ItemId, SplitName> = dataset
        .items()
        .iter()
        .zip(split_of_item)
        .map(|(item, split)| (item.id.clone(), splits[*split].name.clone()))
        .collect();

    let global_present: Vec<usize> = summarize_items(dataset, 0..total)
        .iter()
        .map(TaskSummary::present_count)
        .collect();

    let summaries: Vec<SplitSummary> = splits
        .iter()
        .enumerate()
        .map(|(split, spec)| {
            let members: Vec<usize> = (0..total)
                .filter(|item| split_of_item[*item] == split)
                .collect();
            let cluster_count = result
                .assignment
                .as_slice()
                .iter()
                .filter(|s| **s == split)
                .count();
            let tasks = dataset
                .tasks()
                .iter()
                .zip(summarize_items(dataset, members.iter().copied()))
                .zip(&global_present)
                .map(|((task, summary), present)| TaskReport {
                    task: task.name.clone(),
                    label_share: if *present == 0 {
                        0.0
                    } else {
                        summary.present_count() as f64 / *present as f64
                    },
                    summary,
                })
                .collect();
            SplitSummary {
                name: spec.name.clone(),
                target_fraction: spec.fraction,
                realized_fraction: members.len() as f64 / total.max(1) as f64,
                item_count: members.len(),
                cluster_count,
                within_tolerance: within_tolerance(members.len(), total, spec.fraction, tolerance),
                tasks,
            }
        })
        .collect();

    let targets: Vec<f64> = summaries.iter().map(|s| s.target_fraction).collect();
    let labels: Vec<usize> = summaries
        .iter()
        .map(|s| s.tasks.iter().map(|t| t.summary.present_count()).sum())
        .collect();
    let label_total: usize = labels.iter().sum();
    // without any present label the score falls back to item fractions
    let realized: Vec<f64> = if label_total == 0 {
        summaries.iter().map(|s| s.realized_fraction).collect()
    } else {
        labels
            .iter()
            .map(|count| *count as f64 / label_total as f64)
            .collect()
    };
    let checksum = assignment_checksum(
        assignments
            .iter()
            .map(|(item, split)| (item.as_str(), split.as_str())),
    );

    SplitReport {
        assignments,
        splits: summaries,
        status: result.status,
        objective_value: result.objective_value,
        balance_score: balance_score(&realized, &targets),
        cluster_count: clustering.len(),
        checksum,
        interset_distances: None,
    }
}
