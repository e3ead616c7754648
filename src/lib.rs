#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Report assembly from a finalized cluster assignment.
pub mod assemble;
/// Similarity clustering and the distance metric contract.
pub mod cluster;
/// Split configuration types.
pub mod config;
/// Centralized constants used across clustering, objective, and optimizer.
pub mod constants;
/// Items, tasks, and dataset validation.
pub mod data;
mod hash;
/// Size-window and balance helpers.
pub mod heuristics;
/// Inter-set distance diagnostics.
pub mod metrics;
/// Balance objective and categorical divergences.
pub mod objective;
/// Cluster-to-split assignment solvers.
pub mod optimizer;
/// Pipeline driver.
pub mod splitter;
/// Split specifications and fraction validation.
pub mod splits;
/// Per-task label summaries.
pub mod stats;
/// Shared type aliases.
pub mod types;

mod errors;

pub use assemble::{SplitReport, SplitSummary, TaskReport};
pub use cluster::{Cluster, Clustering, DistanceMetric, cluster_items};
pub use config::{
    CategoricalDivergence, ClusteringConfig, Linkage, ObjectiveConfig, SolverConfig, SplitConfig,
};
pub use data::{Dataset, Item, TaskKind, TaskSpec};
pub use errors::SplitError;
pub use metrics::{InterSetDistances, SplitDistanceSummary};
pub use optimizer::{
    Assignment, AssignmentProblem, AssignmentSolver, BranchAndBoundSolver, FallbackReason,
    SolveStatus, SolverBudget, SolverOutcome,
};
pub use splits::SplitSpec;
pub use splitter::{BalancedSplitter, split};
pub use stats::TaskSummary;
pub use types::{ClassValue, ClusterId, ItemId, SplitIndex, SplitName, TaskName};
