use tracing::info;

use crate::assemble::{SplitReport, assemble_report, item_splits};
use crate::cluster::{Clustering, DistanceMetric, cluster_items};
use crate::config::SplitConfig;
use crate::data::Dataset;
use crate::errors::SplitError;
use crate::metrics::min_interset_distances;
use crate::objective::BalanceObjective;
use crate::optimizer::{
    AssignmentOptimizer, AssignmentProblem, AssignmentSolver, BranchAndBoundSolver, SolverBudget,
};
use crate::stats::TaskStatistics;
use crate::types::SplitIndex;

/// Runs the full pipeline: cluster, summarize, build the objective, assign,
/// and assemble the report.
///
/// A splitter holds only validated configuration and a solver backend; every
/// run owns its own model state, so one splitter can serve many datasets.
pub struct BalancedSplitter<S = BranchAndBoundSolver> {
    config: SplitConfig,
    solver: S,
}

impl BalancedSplitter {
    /// Create a splitter with the default branch-and-bound backend.
    pub fn new(config: SplitConfig) -> Result<Self, SplitError> {
        Self::with_solver(config, BranchAndBoundSolver)
    }
}

impl<S: AssignmentSolver> BalancedSplitter<S> {
    /// Create a splitter with a custom solver backend.
    pub fn with_solver(config: SplitConfig, solver: S) -> Result<Self, SplitError> {
        config.validate()?;
        Ok(Self { config, solver })
    }

    /// Validated configuration.
    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Cluster `dataset` with `metric` and assign the clusters to splits.
    pub fn split<F, M>(&self, dataset: &Dataset<F>, metric: &M) -> Result<SplitReport, SplitError>
    where
        F: Sync,
        M: DistanceMetric<F>,
    {
        let clustering = cluster_items(dataset, metric, &self.config.clustering)?;
        let (mut report, split_of_item) = self.assign(dataset, &clustering)?;
        if self.config.min_interset_distance {
            let names: Vec<_> = self.config.splits.iter().map(|s| s.name.clone()).collect();
            report.interset_distances =
                min_interset_distances(dataset, metric, &split_of_item, &names)?;
        }
        Ok(report)
    }

    /// Assign a precomputed clustering (see [`Clustering::from_groups`]) to
    /// splits without evaluating any distance.
    pub fn split_clustered<F>(
        &self,
        dataset: &Dataset<F>,
        clustering: &Clustering,
    ) -> Result<SplitReport, SplitError> {
        if clustering.item_count() != dataset.len() {
            return Err(SplitError::InvalidClusters(format!(
                "clustering covers {} item(s) but the dataset has {}",
                clustering.item_count(),
                dataset.len()
            )));
        }
        self.assign(dataset, clustering).map(|(report, _)| report)
    }

    fn assign<F>(
        &self,
        dataset: &Dataset<F>,
        clustering: &Clustering,
    ) -> Result<(SplitReport, Vec<SplitIndex>), SplitError> {
        let splits = &self.config.splits;
        if clustering.len() < splits.len() {
            return Err(SplitError::DegenerateClustering {
                clusters: clustering.len(),
                splits: splits.len(),
            });
        }

        let stats = TaskStatistics::build(dataset, clustering);
        let sizes = clustering.sizes();
        let objective = BalanceObjective::build(&stats, &sizes, splits, &self.config.objective)?;
        let problem = AssignmentProblem::new(sizes, splits, self.config.tolerance, objective);
        let budget = SolverBudget::from_config(&self.config.solver, self.config.seed);
        let result = AssignmentOptimizer::new(problem, budget, &self.solver).run();
        let split_of_item = item_splits(clustering, result.assignment.as_slice());

        let report = assemble_report(
            dataset,
            clustering,
            splits,
            self.config.tolerance,
            &split_of_item,
            result,
        );
        for summary in &report.splits {
            info!(
                "[balanced_splits:assemble] {}: {} item(s) in {} cluster(s), fraction {:.4} (target {:.4})",
                summary.name,
                summary.item_count,
                summary.cluster_count,
                summary.realized_fraction,
                summary.target_fraction
            );
        }
        Ok((report, split_of_item))
    }
}

/// Split `dataset` with the default backend.
pub fn split<F, M>(
    dataset: &Dataset<F>,
    metric: &M,
    config: SplitConfig,
) -> Result<SplitReport, SplitError>
where
    F: Sync,
    M: DistanceMetric<F>,
{
    BalancedSplitter::new(config)?.split(dataset, metric)
}
