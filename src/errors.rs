use thiserror::Error;

use crate::types::ItemId;

/// Error type for input validation, similarity, and clustering failures.
///
/// Optimizer infeasibility is intentionally absent: it is reported through
/// [`crate::optimizer::SolveStatus::Fallback`].
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("distance between '{left}' and '{right}' could not be computed: {reason}")]
    Similarity {
        left: ItemId,
        right: ItemId,
        reason: String,
    },
    #[error(
        "clustering produced {clusters} cluster(s) for {splits} split(s); lower the distance threshold"
    )]
    DegenerateClustering { clusters: usize, splits: usize },
    #[error("invalid precomputed clusters: {0}")]
    InvalidClusters(String),
}
