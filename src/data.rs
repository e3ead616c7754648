use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::constants::stats::INTEGRAL_EPSILON;
use crate::errors::SplitError;
use crate::types::{ClassValue, ItemId, TaskName};

pub use crate::types::ItemIndex;

/// How a task's labels are summarized and compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Integral class labels; summarized as class frequencies.
    Categorical,
    /// Real-valued labels; summarized as mean and standard deviation.
    Continuous,
}

impl TaskKind {
    /// Infer the kind from present label values: all-integral labels are
    /// categorical, anything else is continuous. A task with no present
    /// labels is treated as continuous.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Option<f64>>) -> Self {
        let mut any = false;
        for value in values.into_iter().flatten() {
            any = true;
            if !is_integral(*value) {
                return TaskKind::Continuous;
            }
        }
        if any {
            TaskKind::Categorical
        } else {
            TaskKind::Continuous
        }
    }
}

/// A learning task whose labels should stay balanced across splits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task name used in reports.
    pub name: TaskName,
    /// Label interpretation.
    pub kind: TaskKind,
}

impl TaskSpec {
    /// Categorical task named `name`.
    pub fn categorical(name: impl Into<TaskName>) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Categorical,
        }
    }

    /// Continuous task named `name`.
    pub fn continuous(name: impl Into<TaskName>) -> Self {
        Self {
            name: name.into(),
            kind: TaskKind::Continuous,
        }
    }
}

/// One labeled item. `features` is opaque to the engine and only consumed by
/// the distance metric; `labels[t]` is `None` when task `t` is missing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item<F> {
    /// Stable item identifier.
    pub id: ItemId,
    /// Feature representation handed to the distance metric.
    pub features: F,
    /// Per-task labels; `None` marks a missing label.
    pub labels: Vec<Option<f64>>,
}

impl<F> Item<F> {
    /// Build an item from its parts.
    pub fn new(id: impl Into<ItemId>, features: F, labels: Vec<Option<f64>>) -> Self {
        Self {
            id: id.into(),
            features,
            labels,
        }
    }
}

/// Validated, read-only input of a split run.
#[derive(Clone, Debug)]
pub struct Dataset<F> {
    tasks: Vec<TaskSpec>,
    items: Vec<Item<F>>,
}

impl<F> Dataset<F> {
    /// Validate and wrap `items` labeled for `tasks`.
    ///
    /// Fails on an empty item set, duplicate ids, label vectors whose length
    /// differs from the task count, non-finite labels, and non-integral
    /// labels on categorical tasks.
    pub fn new(tasks: Vec<TaskSpec>, items: Vec<Item<F>>) -> Result<Self, SplitError> {
        if items.is_empty() {
            return Err(SplitError::InvalidInput("item set is empty".to_string()));
        }
        let mut ids = HashSet::with_capacity(items.len());
        for item in &items {
            if !ids.insert(item.id.as_str()) {
                return Err(SplitError::InvalidInput(format!(
                    "duplicate item id '{}'",
                    item.id
                )));
            }
            if item.labels.len() != tasks.len() {
                return Err(SplitError::InvalidInput(format!(
                    "item '{}' has {} label slot(s) but {} task(s) are defined",
                    item.id,
                    item.labels.len(),
                    tasks.len()
                )));
            }
            for (task, label) in tasks.iter().zip(&item.labels) {
                let Some(value) = label else {
                    continue;
                };
                if !value.is_finite() {
                    return Err(SplitError::InvalidInput(format!(
                        "item '{}' has non-finite label for task '{}'",
                        item.id, task.name
                    )));
                }
                if task.kind == TaskKind::Categorical && !is_integral(*value) {
                    return Err(SplitError::InvalidInput(format!(
                        "item '{}' has non-integral label {} for categorical task '{}'",
                        item.id, value, task.name
                    )));
                }
            }
        }
        Ok(Self { tasks, items })
    }

    /// Build a dataset whose task kinds are inferred from the labels
    /// (see [`TaskKind::infer`]).
    pub fn with_inferred_tasks(
        task_names: Vec<TaskName>,
        items: Vec<Item<F>>,
    ) -> Result<Self, SplitError> {
        if let Some(item) = items.iter().find(|item| item.labels.len() != task_names.len()) {
            return Err(SplitError::InvalidInput(format!(
                "item '{}' has {} label slot(s) but {} task(s) are defined",
                item.id,
                item.labels.len(),
                task_names.len()
            )));
        }
        let tasks = task_names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| TaskSpec {
                name,
                kind: TaskKind::infer(items.iter().map(|item| &item.labels[idx])),
            })
            .collect();
        Self::new(tasks, items)
    }

    /// Task definitions, in label-slot order.
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    /// Items, in input order.
    pub fn items(&self) -> &[Item<F>] {
        &self.items
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false for a constructed dataset.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item at dense index `idx`.
    pub fn item(&self, idx: ItemIndex) -> &Item<F> {
        &self.items[idx]
    }
}

/// Class value of an integral label.
pub(crate) fn class_of(value: f64) -> ClassValue {
    value.round() as ClassValue
}

fn is_integral(value: f64) -> bool {
    value.is_finite() && (value - value.round()).abs() <= INTEGRAL_EPSILON
}
