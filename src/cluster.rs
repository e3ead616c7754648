//! Similarity clustering of items into indivisible units.
//!
//! Pairwise distances are evaluated in row chunks of the upper-triangular
//! distance matrix; rows inside a chunk run in parallel and chunk outputs are
//! merged in row-major order. The chunk size therefore bounds transient memory
//! only: the clustering (and the first reported distance failure) is the same
//! for every chunk size.

use rayon::prelude::*;
use std::fmt;
use std::ops::Range;
use tracing::{debug, info};

use crate::config::{ClusteringConfig, Linkage};
use crate::data::{Dataset, Item};
use crate::errors::SplitError;
use crate::types::{ClusterId, ItemIndex};

/// Distance between two feature representations.
///
/// Any `Fn(&F, &F) -> Result<f64, E>` with a displayable error implements it.
/// Returned distances must be non-negative; negative or NaN values are
/// reported as similarity errors.
pub trait DistanceMetric<F>: Sync {
    /// Distance between `a` and `b`, or a human-readable failure reason.
    fn distance(&self, a: &F, b: &F) -> Result<f64, String>;
}

impl<F, E, M> DistanceMetric<F> for M
where
    M: Fn(&F, &F) -> Result<f64, E> + Sync,
    E: fmt::Display,
{
    fn distance(&self, a: &F, b: &F) -> Result<f64, String> {
        self(a, b).map_err(|err| err.to_string())
    }
}

/// A maximal group of items that must be assigned to the same split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    /// Dense cluster id (ordered by smallest member index).
    pub id: ClusterId,
    /// Member item indices, ascending.
    pub members: Vec<ItemIndex>,
}

impl Cluster {
    /// Number of member items.
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Partition of a dataset's items into clusters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clustering {
    clusters: Vec<Cluster>,
    item_cluster: Vec<ClusterId>,
}

impl Clustering {
    /// Build a canonical clustering from one raw label per item.
    ///
    /// Cluster ids are renumbered by first occurrence, so two labelings that
    /// describe the same partition produce equal clusterings.
    pub fn from_labels(labels: &[usize]) -> Self {
        let mut remap: Vec<Option<ClusterId>> = Vec::new();
        let mut clusters: Vec<Cluster> = Vec::new();
        let mut item_cluster = Vec::with_capacity(labels.len());
        for (item, &raw) in labels.iter().enumerate() {
            if raw >= remap.len() {
                remap.resize(raw + 1, None);
            }
            let id = *remap[raw].get_or_insert_with(|| {
                clusters.push(Cluster {
                    id: clusters.len(),
                    members: Vec::new(),
                });
                clusters.len() - 1
            });
            clusters[id].members.push(item);
            item_cluster.push(id);
        }
        Self {
            clusters,
            item_cluster,
        }
    }

    /// Build a clustering from precomputed groups of item indices.
    ///
    /// Groups must be non-empty, disjoint, reference items `< n_items` and
    /// cover every item.
    pub fn from_groups(n_items: usize, groups: &[Vec<ItemIndex>]) -> Result<Self, SplitError> {
        let mut labels: Vec<Option<usize>> = vec![None; n_items];
        for (group_idx, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(SplitError::InvalidClusters(format!(
                    "group {group_idx} is empty"
                )));
            }
            for &item in group {
                let Some(slot) = labels.get_mut(item) else {
                    return Err(SplitError::InvalidClusters(format!(
                        "group {group_idx} references item {item} but only {n_items} item(s) exist"
                    )));
                };
                if let Some(previous) = slot.replace(group_idx) {
                    return Err(SplitError::InvalidClusters(format!(
                        "item {item} appears in groups {previous} and {group_idx}"
                    )));
                }
            }
        }
        let labels = labels
            .into_iter()
            .enumerate()
            .map(|(item, label)| {
                label.ok_or_else(|| {
                    SplitError::InvalidClusters(format!("item {item} is not in any group"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_labels(&labels))
    }

    /// Clusters ordered by id.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// True when no items were clustered.
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Number of clustered items.
    pub fn item_count(&self) -> usize {
        self.item_cluster.len()
    }

    /// Cluster containing item `item`.
    pub fn cluster_of(&self, item: ItemIndex) -> ClusterId {
        self.item_cluster[item]
    }

    /// Item count of every cluster, by id.
    pub fn sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(Cluster::size).collect()
    }
}

/// Cluster `dataset` with `metric` according to `config`.
pub fn cluster_items<F, M>(
    dataset: &Dataset<F>,
    metric: &M,
    config: &ClusteringConfig,
) -> Result<Clustering, SplitError>
where
    F: Sync,
    M: DistanceMetric<F>,
{
    let items = dataset.items();
    let threshold = config.distance_threshold;
    let chunk_rows = config.chunk_rows.max(1);
    let labels = match config.linkage {
        Linkage::Single => single_linkage(items, metric, threshold, chunk_rows)?,
        Linkage::Complete | Linkage::Average => {
            let matrix = CondensedMatrix::compute(items, metric, chunk_rows)?;
            agglomerate(matrix, config.linkage, threshold)
        }
        Linkage::Leader => leader_clusters(items, metric, threshold)?,
    };
    let clustering = Clustering::from_labels(&labels);
    info!(
        "[balanced_splits:cluster] {} item(s) grouped into {} cluster(s) (linkage {:?}, threshold {})",
        items.len(),
        clustering.len(),
        config.linkage,
        threshold
    );
    Ok(clustering)
}

pub(crate) fn checked_distance<F, M>(
    items: &[Item<F>],
    metric: &M,
    i: usize,
    j: usize,
) -> Result<f64, SplitError>
where
    M: DistanceMetric<F>,
{
    let (left, right) = (&items[i], &items[j]);
    let similarity_error = |reason: String| SplitError::Similarity {
        left: left.id.clone(),
        right: right.id.clone(),
        reason,
    };
    let value = metric
        .distance(&left.features, &right.features)
        .map_err(similarity_error)?;
    if value.is_nan() || value < 0.0 {
        return Err(similarity_error(format!(
            "distance must be a non-negative number (got {value})"
        )));
    }
    Ok(value)
}

/// Evaluate rows `rows` of the upper triangle and keep whatever `keep`
/// extracts from each `(i, j, distance)`. Output is in row-major order.
fn scan_rows<F, M, T>(
    items: &[Item<F>],
    metric: &M,
    rows: Range<usize>,
    keep: impl Fn(usize, f64) -> Option<T> + Sync,
) -> Result<Vec<(usize, Vec<T>)>, SplitError>
where
    F: Sync,
    M: DistanceMetric<F>,
    T: Send,
{
    let n = items.len();
    let per_row: Vec<Result<(usize, Vec<T>), SplitError>> = rows
        .into_par_iter()
        .map(|i| {
            let mut kept = Vec::new();
            for j in (i + 1)..n {
                let d = checked_distance(items, metric, i, j)?;
                if let Some(value) = keep(j, d) {
                    kept.push(value);
                }
            }
            Ok((i, kept))
        })
        .collect();
    per_row.into_iter().collect()
}

fn row_chunks(n: usize, chunk_rows: usize) -> impl Iterator<Item = Range<usize>> {
    (0..n)
        .step_by(chunk_rows)
        .map(move |start| start..(start + chunk_rows).min(n))
}

fn single_linkage<F, M>(
    items: &[Item<F>],
    metric: &M,
    threshold: f64,
    chunk_rows: usize,
) -> Result<Vec<usize>, SplitError>
where
    F: Sync,
    M: DistanceMetric<F>,
{
    let n = items.len();
    let mut forest = UnionFind::new(n);
    for rows in row_chunks(n, chunk_rows) {
        let start = rows.start;
        let edges = scan_rows(items, metric, rows, |j, d| (d < threshold).then_some(j))?;
        let mut merged = 0usize;
        for (i, neighbors) in edges {
            for j in neighbors {
                merged += usize::from(forest.union(i, j));
            }
        }
        debug!(
            "[balanced_splits:cluster] rows from {} merged {} component(s)",
            start, merged
        );
    }
    Ok((0..n).map(|i| forest.find(i)).collect())
}

fn leader_clusters<F, M>(
    items: &[Item<F>],
    metric: &M,
    threshold: f64,
) -> Result<Vec<usize>, SplitError>
where
    M: DistanceMetric<F>,
{
    let mut leaders: Vec<usize> = Vec::new();
    let mut labels = Vec::with_capacity(items.len());
    for i in 0..items.len() {
        let mut owner = None;
        for &leader in &leaders {
            if checked_distance(items, metric, leader, i)? < threshold {
                owner = Some(leader);
                break;
            }
        }
        let label = match owner {
            Some(leader) => leader,
            None => {
                leaders.push(i);
                i
            }
        };
        labels.push(label);
    }
    Ok(labels)
}

/// Upper-triangular distance matrix stored row-major without the diagonal.
struct CondensedMatrix {
    n: usize,
    values: Vec<f64>,
}

impl CondensedMatrix {
    fn compute<F, M>(items: &[Item<F>], metric: &M, chunk_rows: usize) -> Result<Self, SplitError>
    where
        F: Sync,
        M: DistanceMetric<F>,
    {
        let n = items.len();
        let mut values = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for rows in row_chunks(n, chunk_rows) {
            for (_, row) in scan_rows(items, metric, rows, |_, d| Some(d))? {
                values.extend(row);
            }
        }
        Ok(Self { n, values })
    }

    fn index(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        debug_assert!(i < j && j < self.n);
        i * self.n - i * (i + 1) / 2 + j - i - 1
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        self.values[self.index(i, j)]
    }

    fn set(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.index(i, j);
        self.values[idx] = value;
    }
}

/// Agglomerate with Lance-Williams updates while the closest pair of
/// clusters is strictly below `threshold`. Ties merge the lexicographically
/// smallest `(i, j)` pair.
fn agglomerate(mut matrix: CondensedMatrix, linkage: Linkage, threshold: f64) -> Vec<usize> {
    let n = matrix.n;
    let mut active = vec![true; n];
    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut nearest: Vec<(f64, usize)> = (0..n)
        .map(|i| nearest_above(&matrix, &active, i))
        .collect();

    loop {
        let mut best: Option<(f64, usize)> = None;
        for i in (0..n).filter(|&i| active[i]) {
            let d = nearest[i].0;
            if best.is_none_or(|(best_d, _)| d < best_d) {
                best = Some((d, i));
            }
        }
        let Some((d_ab, a)) = best else {
            break;
        };
        if d_ab >= threshold {
            break;
        }
        let b = nearest[a].1;
        let (size_a, size_b) = (members[a].len() as f64, members[b].len() as f64);

        for k in (0..n).filter(|&k| active[k] && k != a && k != b) {
            let (d_ak, d_bk) = (matrix.get(a, k), matrix.get(b, k));
            let merged = match linkage {
                Linkage::Complete => d_ak.max(d_bk),
                Linkage::Average => (size_a * d_ak + size_b * d_bk) / (size_a + size_b),
                Linkage::Single | Linkage::Leader => d_ak.min(d_bk),
            };
            matrix.set(a, k, merged);
        }
        active[b] = false;
        let absorbed = std::mem::take(&mut members[b]);
        members[a].extend(absorbed);

        nearest[a] = nearest_above(&matrix, &active, a);
        for k in (0..b).filter(|&k| active[k] && k != a) {
            let (cached_d, cached_j) = nearest[k];
            if cached_j == a || cached_j == b {
                nearest[k] = nearest_above(&matrix, &active, k);
            } else if k < a {
                let d_ka = matrix.get(k, a);
                if d_ka < cached_d || (d_ka == cached_d && a < cached_j) {
                    nearest[k] = (d_ka, a);
                }
            }
        }
    }

    let mut labels = vec![0usize; n];
    for (owner, group) in members.iter().enumerate() {
        for &item in group {
            labels[item] = owner;
        }
    }
    labels
}

/// Closest active cluster `j > i`; `(inf, i)` when none is left.
fn nearest_above(matrix: &CondensedMatrix, active: &[bool], i: usize) -> (f64, usize) {
    let mut best = (f64::INFINITY, i);
    for j in (i + 1)..matrix.n {
        if active[j] {
            let d = matrix.get(i, j);
            if d < best.0 {
                best = (d, j);
            }
        }
    }
    best
}

/// Disjoint-set forest whose roots are always the smallest member index.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
        true
    }
}
