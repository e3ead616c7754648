use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::constants::splits::{
    DEFAULT_SPLIT_FRACTIONS, DEFAULT_SPLIT_NAMES, FRACTION_SUM_EPSILON,
};
use crate::errors::SplitError;
use crate::types::SplitName;

/// A requested subset of the dataset and the fraction of items it should hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitSpec {
    /// Split name (unique within a configuration).
    pub name: SplitName,
    /// Target fraction of all items, in `(0, 1]`.
    pub fraction: f64,
}

impl SplitSpec {
    /// Create a split spec named `name` targeting `fraction` of the items.
    pub fn new(name: impl Into<SplitName>, fraction: f64) -> Self {
        Self {
            name: name.into(),
            fraction,
        }
    }
}

/// Default `train/validation/test` split of `0.8/0.1/0.1`.
pub fn default_splits() -> Vec<SplitSpec> {
    DEFAULT_SPLIT_NAMES
        .iter()
        .zip(DEFAULT_SPLIT_FRACTIONS)
        .map(|(name, fraction)| SplitSpec::new(*name, fraction))
        .collect()
}

/// Validate that split names are unique and fractions are positive and sum to `1.0`
/// (within epsilon).
pub fn validate_splits(splits: &[SplitSpec]) -> Result<(), SplitError> {
    if splits.is_empty() {
        return Err(SplitError::Configuration(
            "at least one split is required".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(splits.len());
    for split in splits {
        if split.name.trim().is_empty() {
            return Err(SplitError::Configuration(
                "split names must be non-empty".to_string(),
            ));
        }
        if !seen.insert(split.name.as_str()) {
            return Err(SplitError::Configuration(format!(
                "duplicate split name '{}'",
                split.name
            )));
        }
        if !split.fraction.is_finite() || split.fraction <= 0.0 {
            return Err(SplitError::Configuration(format!(
                "split '{}' has non-positive fraction {}",
                split.name, split.fraction
            )));
        }
    }
    let sum: f64 = splits.iter().map(|split| split.fraction).sum();
    if (sum - 1.0).abs() > FRACTION_SUM_EPSILON {
        return Err(SplitError::Configuration(format!(
            "split fractions must sum to 1.0 (got {sum})"
        )));
    }
    Ok(())
}
