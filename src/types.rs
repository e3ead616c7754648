/// Unique item identifier (stable across runs).
/// Example: `mol_00042`
pub type ItemId = String;
/// Human-readable split name.
/// Examples: `train`, `validation`, `test`
pub type SplitName = String;
/// Human-readable task name.
/// Examples: `solubility`, `is_active`
pub type TaskName = String;
/// Dense index of a cluster inside a [`crate::cluster::Clustering`].
pub type ClusterId = usize;
/// Dense index of a split in declaration order.
pub type SplitIndex = usize;
/// Dense index of an item inside a [`crate::data::Dataset`].
pub type ItemIndex = usize;
/// Encoded class value of a categorical label (integral label values).
/// Examples: `0`, `1`, `7`
pub type ClassValue = i64;
