use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::DEFAULT_SEED;
use crate::constants::clustering::{DEFAULT_CHUNK_ROWS, DEFAULT_DISTANCE_THRESHOLD};
use crate::constants::objective::{DEFAULT_SIZE_WEIGHT, DEFAULT_TASK_WEIGHT};
use crate::constants::optimizer::{DEFAULT_RELATIVE_GAP, DEFAULT_TIME_LIMIT_SECS};
use crate::constants::splits::DEFAULT_TOLERANCE;
use crate::errors::SplitError;
use crate::splits::{SplitSpec, default_splits, validate_splits};

/// Policy used to turn pairwise distances into clusters.
///
/// Only [`Linkage::Single`] guarantees that two items closer than the
/// threshold always share a cluster; the other policies trade that
/// guarantee for more compact clusters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    /// Connected components of the `distance < threshold` graph.
    #[default]
    Single,
    /// Merge while the farthest pair across two clusters is below threshold.
    Complete,
    /// Merge while the size-weighted mean distance (UPGMA) is below threshold.
    Average,
    /// Sphere exclusion: each item joins the first earlier leader within
    /// threshold, otherwise becomes a leader itself.
    Leader,
}

/// Divergence used to compare categorical label distributions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoricalDivergence {
    /// Jensen-Shannon divergence (natural log, bounded by `ln 2`).
    #[default]
    JensenShannon,
    /// Pearson chi-square of the candidate against the global frequencies.
    ChiSquare,
    /// Total-variation distance (half the L1 distance).
    TotalVariation,
}

/// Similarity clusterer settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Items closer than this distance are co-located (strict `<`).
    pub distance_threshold: f64,
    /// Linkage policy.
    pub linkage: Linkage,
    /// Rows of the pairwise distance matrix evaluated per chunk.
    pub chunk_rows: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            linkage: Linkage::default(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }
}

/// Weights of the balance objective.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveConfig {
    /// Weight of the size-fraction term.
    pub size_weight: f64,
    /// Per-task weights in task order; empty means every task weighs
    /// [`DEFAULT_TASK_WEIGHT`].
    pub task_weights: Vec<f64>,
    /// Divergence used for categorical tasks.
    pub divergence: CategoricalDivergence,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            size_weight: DEFAULT_SIZE_WEIGHT,
            task_weights: Vec::new(),
            divergence: CategoricalDivergence::default(),
        }
    }
}

impl ObjectiveConfig {
    /// Weighting where matching item fractions counts as much as all
    /// `task_count` tasks together.
    pub fn size_as_all_tasks(task_count: usize) -> Self {
        Self {
            size_weight: DEFAULT_TASK_WEIGHT * task_count.max(1) as f64,
            ..Self::default()
        }
    }

    /// Task weights expanded to `task_count` entries.
    pub fn resolved_task_weights(&self, task_count: usize) -> Result<Vec<f64>, SplitError> {
        if self.task_weights.is_empty() {
            return Ok(vec![DEFAULT_TASK_WEIGHT; task_count]);
        }
        if self.task_weights.len() != task_count {
            return Err(SplitError::Configuration(format!(
                "{} task weight(s) configured for {} task(s)",
                self.task_weights.len(),
                task_count
            )));
        }
        Ok(self.task_weights.clone())
    }
}

/// Assignment solver settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Wall-clock budget for the solver. Zero forces the greedy fallback.
    ///
    /// A search cut off by the clock stops at a machine-dependent node, so
    /// its result can differ between runs. Set `node_limit` as well when a
    /// budgeted run must be reproducible.
    pub time_limit: Duration,
    /// Stop improving once the incumbent is within this relative gap of
    /// every unexplored branch. `0.0` searches for the proven optimum.
    pub relative_gap: f64,
    /// Optional cap on explored search nodes.
    ///
    /// Unlike `time_limit`, this budget expires at the same node on every
    /// run, which makes budgeted searches reproducible for a given `seed`.
    pub node_limit: Option<u64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(DEFAULT_TIME_LIMIT_SECS),
            relative_gap: DEFAULT_RELATIVE_GAP,
            node_limit: None,
        }
    }
}

/// Top-level split configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Requested splits in declaration order (ties are broken in this order).
    pub splits: Vec<SplitSpec>,
    /// Allowed absolute deviation between target and realized fractions.
    pub tolerance: f64,
    /// Clustering behavior.
    pub clustering: ClusteringConfig,
    /// Balance objective weights.
    pub objective: ObjectiveConfig,
    /// Solver budget.
    pub solver: SolverConfig,
    /// Seed for solver-internal tie-breaking.
    ///
    /// Equal seeds give equal assignments when the search completes or stops
    /// on `solver.node_limit`. A search stopped by `solver.time_limit` alone
    /// is not reproducible.
    pub seed: u64,
    /// Report the minimum distance of each item to the other splits.
    /// Costs a second pass of `O(n²)` distance evaluations.
    pub min_interset_distance: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            splits: default_splits(),
            tolerance: DEFAULT_TOLERANCE,
            clustering: ClusteringConfig::default(),
            objective: ObjectiveConfig::default(),
            solver: SolverConfig::default(),
            seed: DEFAULT_SEED,
            min_interset_distance: false,
        }
    }
}

impl SplitConfig {
    /// Validate every field that does not depend on the dataset.
    pub fn validate(&self) -> Result<(), SplitError> {
        validate_splits(&self.splits)?;
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(SplitError::Configuration(format!(
                "tolerance must be positive (got {})",
                self.tolerance
            )));
        }
        let threshold = self.clustering.distance_threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(SplitError::Configuration(format!(
                "distance threshold must be a non-negative finite number (got {threshold})"
            )));
        }
        if self.clustering.chunk_rows == 0 {
            return Err(SplitError::Configuration(
                "chunk_rows must be at least 1".to_string(),
            ));
        }
        let weights =
            std::iter::once(&self.objective.size_weight).chain(&self.objective.task_weights);
        if weights.into_iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SplitError::Configuration(
                "objective weights must be non-negative".to_string(),
            ));
        }
        let gap = self.solver.relative_gap;
        if !gap.is_finite() || !(0.0..1.0).contains(&gap) {
            return Err(SplitError::Configuration(format!(
                "relative gap must lie in [0, 1) (got {gap})"
            )));
        }
        Ok(())
    }
}
