use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::cluster::Clustering;
use crate::data::{Dataset, TaskKind, TaskSpec, class_of};
use crate::types::{ClassValue, ItemIndex};

/// Summary of one task's present labels over a set of items.
///
/// Missing labels never contribute. A set without any present label yields
/// [`TaskSummary::Undefined`] rather than zeros.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskSummary {
    /// No present labels.
    Undefined,
    /// Mean and population standard deviation of real-valued labels.
    Continuous {
        /// Number of present labels.
        count: usize,
        /// Mean of present labels.
        mean: f64,
        /// Population standard deviation of present labels.
        std_dev: f64,
    },
    /// Class counts of categorical labels.
    Categorical {
        /// Number of present labels.
        count: usize,
        /// Present-label count per class, ordered by class value.
        class_counts: BTreeMap<ClassValue, usize>,
    },
}

impl TaskSummary {
    /// Number of present labels.
    pub fn present_count(&self) -> usize {
        match self {
            TaskSummary::Undefined => 0,
            TaskSummary::Continuous { count, .. } | TaskSummary::Categorical { count, .. } => {
                *count
            }
        }
    }

    /// True unless the summary is [`TaskSummary::Undefined`].
    pub fn is_defined(&self) -> bool {
        !matches!(self, TaskSummary::Undefined)
    }

    /// Normalized class frequencies for categorical summaries.
    pub fn frequencies(&self) -> Option<BTreeMap<ClassValue, f64>> {
        match self {
            TaskSummary::Categorical {
                count,
                class_counts,
            } if *count > 0 => Some(
                class_counts
                    .iter()
                    .map(|(class, n)| (*class, *n as f64 / *count as f64))
                    .collect(),
            ),
            _ => None,
        }
    }
}

enum Accumulator {
    Continuous { count: usize, mean: f64, m2: f64 },
    Categorical(BTreeMap<ClassValue, usize>),
}

impl Accumulator {
    fn new(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Continuous => Accumulator::Continuous {
                count: 0,
                mean: 0.0,
                m2: 0.0,
            },
            TaskKind::Categorical => Accumulator::Categorical(BTreeMap::new()),
        }
    }

    fn push(&mut self, value: f64) {
        match self {
            // Welford update
            Accumulator::Continuous { count, mean, m2 } => {
                *count += 1;
                let delta = value - *mean;
                *mean += delta / *count as f64;
                *m2 += delta * (value - *mean);
            }
            Accumulator::Categorical(counts) => {
                *counts.entry(class_of(value)).or_default() += 1;
            }
        }
    }

    fn finish(self) -> TaskSummary {
        match self {
            Accumulator::Continuous { count: 0, .. } => TaskSummary::Undefined,
            Accumulator::Continuous { count, mean, m2 } => TaskSummary::Continuous {
                count,
                mean,
                std_dev: (m2 / count as f64).max(0.0).sqrt(),
            },
            Accumulator::Categorical(counts) if counts.is_empty() => TaskSummary::Undefined,
            Accumulator::Categorical(class_counts) => TaskSummary::Categorical {
                count: class_counts.values().sum(),
                class_counts,
            },
        }
    }
}

/// Summaries of every task over the items `members`.
pub fn summarize_items<F>(
    dataset: &Dataset<F>,
    members: impl IntoIterator<Item = ItemIndex>,
) -> Vec<TaskSummary> {
    let mut accumulators: Vec<Accumulator> = dataset
        .tasks()
        .iter()
        .map(|task: &TaskSpec| Accumulator::new(task.kind))
        .collect();
    for idx in members {
        for (acc, label) in accumulators.iter_mut().zip(&dataset.item(idx).labels) {
            if let Some(value) = label {
                acc.push(*value);
            }
        }
    }
    accumulators.into_iter().map(Accumulator::finish).collect()
}

/// Global and per-cluster task summaries, computed once per run.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskStatistics {
    /// Summary per task over all items.
    pub global: Vec<TaskSummary>,
    /// `per_cluster[c][t]`: summary of task `t` over cluster `c`.
    pub per_cluster: Vec<Vec<TaskSummary>>,
}

impl TaskStatistics {
    /// Summarize every task globally and per cluster.
    pub fn build<F>(dataset: &Dataset<F>, clustering: &Clustering) -> Self {
        let global = summarize_items(dataset, 0..dataset.len());
        let per_cluster: Vec<Vec<TaskSummary>> = clustering
            .clusters()
            .iter()
            .map(|cluster| summarize_items(dataset, cluster.members.iter().copied()))
            .collect();
        for (task, summary) in dataset.tasks().iter().zip(&global) {
            debug!(
                "[balanced_splits:stats] task '{}' ({:?}) has {} present label(s)",
                task.name,
                task.kind,
                summary.present_count()
            );
        }
        Self {
            global,
            per_cluster,
        }
    }

    /// Number of tasks.
    pub fn task_count(&self) -> usize {
        self.global.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Item;

    fn dataset() -> Dataset<()> {
        let items = vec![
            Item::new("a", (), vec![Some(1.0), Some(2.0)]),
            Item::new("b", (), vec![Some(0.0), None]),
            Item::new("c", (), vec![None, Some(4.0)]),
            Item::new("d", (), vec![Some(1.0), None]),
        ];
        Dataset::new(
            vec![TaskSpec::categorical("cls"), TaskSpec::continuous("reg")],
            items,
        )
        .unwrap()
    }

    #[test]
    fn global_summaries_ignore_missing_labels() {
        let data = dataset();
        let clustering = Clustering::from_labels(&[0, 0, 1, 1]);
        let stats = TaskStatistics::build(&data, &clustering);
        assert_eq!(stats.task_count(), 2);

        match &stats.global[0] {
            TaskSummary::Categorical {
                count,
                class_counts,
            } => {
                assert_eq!(*count, 3);
                assert_eq!(class_counts.get(&1), Some(&2));
                assert_eq!(class_counts.get(&0), Some(&1));
            }
            other => panic!("unexpected summary {other:?}"),
        }
        match &stats.global[1] {
            TaskSummary::Continuous {
                count,
                mean,
                std_dev,
            } => {
                assert_eq!(*count, 2);
                assert!((mean - 3.0).abs() < 1e-12);
                assert!((std_dev - 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected summary {other:?}"),
        }
        let freqs = stats.global[0].frequencies().unwrap();
        assert!((freqs[&1] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn clusters_without_labels_are_undefined() {
        let data = dataset();
        let clustering = Clustering::from_labels(&[0, 1, 2, 1]);
        let stats = TaskStatistics::build(&data, &clustering);
        // cluster {b, d} has no continuous labels; cluster {c} no categorical ones
        assert_eq!(stats.per_cluster[1][1], TaskSummary::Undefined);
        assert_eq!(stats.per_cluster[2][0], TaskSummary::Undefined);
        assert!(!stats.per_cluster[1][1].is_defined());
        assert_eq!(stats.per_cluster[1][0].present_count(), 2);
        assert!(stats.per_cluster[2][1].frequencies().is_none());
    }
}
