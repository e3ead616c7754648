//! Cluster-to-split assignment.
//!
//! Model: binary `x[c][s]` with exactly one split per cluster, every split's
//! item count inside its tolerance window, minimizing
//! `Σ cost(c, s)·x[c][s] + Σ_r Σ_s w_r·|load_{r,s}/total_r − f_s|/f_s`
//! where row `r` counts items or one task's present labels (see
//! [`BalanceObjective`]).
//!
//! Backends implement [`AssignmentSolver`]. When a backend cannot produce a
//! valid assignment (time limit, infeasible windows, backend failure) the
//! optimizer falls back to a deterministic greedy fill and says so in
//! [`SolveStatus`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SolverConfig;
use crate::constants::optimizer::{CLOCK_CHECK_INTERVAL, OBJECTIVE_EPSILON};
use crate::heuristics::{SizeBounds, bounds_admit_total, size_bounds_for_total};
use crate::objective::BalanceObjective;
use crate::splits::SplitSpec;
use crate::types::{ClusterId, SplitIndex};

/// Everything a solver backend needs: cluster sizes, admissible split
/// windows, and the objective.
#[derive(Clone, Debug)]
pub struct AssignmentProblem {
    cluster_sizes: Vec<usize>,
    bounds: Vec<SizeBounds>,
    objective: BalanceObjective,
}

impl AssignmentProblem {
    /// Build the problem for `splits` with `tolerance` on realized fractions.
    pub fn new(
        cluster_sizes: Vec<usize>,
        splits: &[SplitSpec],
        tolerance: f64,
        objective: BalanceObjective,
    ) -> Self {
        let total = cluster_sizes.iter().sum();
        Self {
            bounds: size_bounds_for_total(total, splits, tolerance),
            cluster_sizes,
            objective,
        }
    }

    /// Item count per cluster.
    pub fn cluster_sizes(&self) -> &[usize] {
        &self.cluster_sizes
    }

    /// Admissible item-count window per split.
    pub fn bounds(&self) -> &[SizeBounds] {
        &self.bounds
    }

    /// Objective to minimize.
    pub fn objective(&self) -> &BalanceObjective {
        &self.objective
    }

    /// Number of clusters.
    pub fn n_clusters(&self) -> usize {
        self.cluster_sizes.len()
    }

    /// Number of splits.
    pub fn n_splits(&self) -> usize {
        self.bounds.len()
    }

    /// Total item count.
    pub fn total_items(&self) -> usize {
        self.cluster_sizes.iter().sum()
    }

    /// Item count per split under `split_of`.
    pub fn loads(&self, split_of: &[SplitIndex]) -> Vec<usize> {
        let mut loads = vec![0usize; self.n_splits()];
        for (&split, &size) in split_of.iter().zip(&self.cluster_sizes) {
            loads[split] += size;
        }
        loads
    }

    /// Check that `split_of` assigns every cluster to a known split and keeps
    /// every split inside its window.
    pub fn check(&self, split_of: &[SplitIndex]) -> Result<(), String> {
        if split_of.len() != self.n_clusters() {
            return Err(format!(
                "assignment covers {} of {} cluster(s)",
                split_of.len(),
                self.n_clusters()
            ));
        }
        if let Some(split) = split_of.iter().find(|split| **split >= self.n_splits()) {
            return Err(format!("assignment references unknown split {split}"));
        }
        for (split, (load, bounds)) in self.loads(split_of).iter().zip(&self.bounds).enumerate() {
            if !bounds.contains(*load) {
                return Err(format!(
                    "split {split} holds {load} item(s), outside [{}, {}]",
                    bounds.min, bounds.max
                ));
            }
        }
        Ok(())
    }
}

/// Budget and tie-breaking seed handed to a solver backend.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverBudget {
    /// Wall-clock limit; zero means "do not search".
    pub time_limit: Duration,
    /// Relative optimality gap at which branches stop being explored.
    pub relative_gap: f64,
    /// Optional cap on explored nodes.
    pub node_limit: Option<u64>,
    /// Seed for backend-internal tie-breaking.
    pub seed: u64,
}

impl SolverBudget {
    /// Budget from solver settings and the run seed.
    pub fn from_config(config: &SolverConfig, seed: u64) -> Self {
        Self {
            time_limit: config.time_limit,
            relative_gap: config.relative_gap,
            node_limit: config.node_limit,
            seed,
        }
    }
}

/// Raw result of a solver backend.
#[derive(Clone, Debug, PartialEq)]
pub enum SolverOutcome {
    /// A feasible assignment (one split per cluster).
    Solved {
        /// Split index per cluster.
        split_of: Vec<SplitIndex>,
        /// True when the search proved optimality.
        proven_optimal: bool,
    },
    /// Time budget expired before any feasible assignment was found.
    TimedOut,
    /// Node budget expired before any feasible assignment was found.
    NodeLimit,
    /// The constraints admit no assignment.
    Infeasible(String),
    /// Backend-specific failure.
    Failed(String),
}

/// A solver backend: given the problem and a budget, return an assignment
/// or a failure signal.
pub trait AssignmentSolver {
    /// Backend name used in logs.
    fn name(&self) -> &str;
    /// Solve `problem` within `budget`.
    fn solve(&self, problem: &AssignmentProblem, budget: &SolverBudget) -> SolverOutcome;
}

/// Why the optimizer fell back to the greedy assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FallbackReason {
    /// The time budget expired without a feasible assignment.
    TimeLimit,
    /// The node budget expired without a feasible assignment.
    NodeLimit,
    /// The tolerance windows cannot be met with these cluster sizes.
    Infeasible(String),
    /// The backend failed or returned an invalid assignment.
    Solver(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::TimeLimit => {
                write!(f, "time limit reached before a feasible assignment was found")
            }
            FallbackReason::NodeLimit => {
                write!(f, "node limit reached before a feasible assignment was found")
            }
            FallbackReason::Infeasible(detail) => write!(f, "infeasible: {detail}"),
            FallbackReason::Solver(detail) => write!(f, "solver failure: {detail}"),
        }
    }
}

/// How the final assignment was obtained.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// The solver produced an assignment satisfying every size window.
    Solved {
        /// True when optimality was proven (zero gap, exhaustive search).
        proven_optimal: bool,
    },
    /// The greedy fallback produced the assignment.
    Fallback {
        /// Why the solver result was not used.
        reason: FallbackReason,
    },
}

impl SolveStatus {
    /// True for [`SolveStatus::Fallback`].
    pub fn is_fallback(&self) -> bool {
        matches!(self, SolveStatus::Fallback { .. })
    }

    /// Human-readable fallback reason, if any.
    pub fn reason(&self) -> Option<String> {
        match self {
            SolveStatus::Solved { .. } => None,
            SolveStatus::Fallback { reason } => Some(reason.to_string()),
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStatus::Solved { .. } => write!(f, "solved"),
            SolveStatus::Fallback { .. } => write!(f, "fallback"),
        }
    }
}

/// Optimizer lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerState {
    /// Model built, not yet solved.
    Built,
    /// Backend running.
    Solving,
    /// Backend produced a valid assignment.
    Solved,
    /// Backend failed; the fallback assignment was used.
    Infeasible,
}

/// Finalized cluster-to-split mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    split_of: Vec<SplitIndex>,
}

impl Assignment {
    /// Split of cluster `cluster`.
    pub fn split_of(&self, cluster: ClusterId) -> SplitIndex {
        self.split_of[cluster]
    }

    /// Split index per cluster.
    pub fn as_slice(&self) -> &[SplitIndex] {
        &self.split_of
    }

    /// Number of assigned clusters.
    pub fn len(&self) -> usize {
        self.split_of.len()
    }

    /// True when no cluster is assigned.
    pub fn is_empty(&self) -> bool {
        self.split_of.is_empty()
    }
}

impl From<Vec<SplitIndex>> for Assignment {
    fn from(split_of: Vec<SplitIndex>) -> Self {
        Self { split_of }
    }
}

/// Output of [`AssignmentOptimizer::run`].
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationResult {
    /// The finalized assignment.
    pub assignment: Assignment,
    /// Solved or fallback, with reason.
    pub status: SolveStatus,
    /// Terminal optimizer state.
    pub state: OptimizerState,
    /// Objective value of the assignment.
    pub objective_value: f64,
}

/// Drives a backend over one problem and applies the fallback on failure.
pub struct AssignmentOptimizer<'a, S: AssignmentSolver + ?Sized> {
    problem: AssignmentProblem,
    budget: SolverBudget,
    solver: &'a S,
    state: OptimizerState,
}

impl<'a, S: AssignmentSolver + ?Sized> AssignmentOptimizer<'a, S> {
    /// Prepare an optimizer in state [`OptimizerState::Built`].
    pub fn new(problem: AssignmentProblem, budget: SolverBudget, solver: &'a S) -> Self {
        Self {
            problem,
            budget,
            solver,
            state: OptimizerState::Built,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OptimizerState {
        self.state
    }

    /// Solve once and finalize the assignment.
    pub fn run(mut self) -> OptimizationResult {
        self.state = OptimizerState::Solving;
        info!(
            "[balanced_splits:optimizer] solving {} cluster(s) over {} split(s) with '{}' (time limit {:?})",
            self.problem.n_clusters(),
            self.problem.n_splits(),
            self.solver.name(),
            self.budget.time_limit
        );
        let started = Instant::now();
        let outcome = self.solver.solve(&self.problem, &self.budget);
        debug!(
            "[balanced_splits:optimizer] backend returned after {:?}",
            started.elapsed()
        );

        let (split_of, status) = match outcome {
            SolverOutcome::Solved {
                split_of,
                proven_optimal,
            } => match self.problem.check(&split_of) {
                Ok(()) => (split_of, SolveStatus::Solved { proven_optimal }),
                Err(detail) => self.fallback(FallbackReason::Solver(detail)),
            },
            SolverOutcome::TimedOut => self.fallback(FallbackReason::TimeLimit),
            SolverOutcome::NodeLimit => self.fallback(FallbackReason::NodeLimit),
            SolverOutcome::Infeasible(detail) => self.fallback(FallbackReason::Infeasible(detail)),
            SolverOutcome::Failed(detail) => self.fallback(FallbackReason::Solver(detail)),
        };
        self.state = if status.is_fallback() {
            OptimizerState::Infeasible
        } else {
            OptimizerState::Solved
        };
        let objective_value = self.problem.objective().evaluate(&split_of);
        info!(
            "[balanced_splits:optimizer] finished as {} (objective {:.6})",
            status, objective_value
        );
        OptimizationResult {
            assignment: Assignment { split_of },
            status,
            state: self.state,
            objective_value,
        }
    }

    fn fallback(&self, reason: FallbackReason) -> (Vec<SplitIndex>, SolveStatus) {
        warn!(
            "[balanced_splits:optimizer] falling back to greedy assignment: {}",
            reason
        );
        let split_of = greedy_assignment(
            self.problem.cluster_sizes(),
            &self.problem.objective().fractions,
        );
        (split_of, SolveStatus::Fallback { reason })
    }
}

/// Deterministic size-only assignment: clusters by descending size (ties by
/// id), each to the split with the largest remaining deficit against its
/// target count (ties by split order).
pub fn greedy_assignment(cluster_sizes: &[usize], fractions: &[f64]) -> Vec<SplitIndex> {
    let total: usize = cluster_sizes.iter().sum();
    let targets: Vec<f64> = fractions.iter().map(|f| f * total as f64).collect();
    let mut loads = vec![0.0_f64; fractions.len()];
    let mut split_of = vec![0; cluster_sizes.len()];

    let mut order: Vec<ClusterId> = (0..cluster_sizes.len()).collect();
    order.sort_by(|a, b| cluster_sizes[*b].cmp(&cluster_sizes[*a]).then(a.cmp(b)));

    for cluster in order {
        let mut best = 0;
        for split in 1..targets.len() {
            if targets[split] - loads[split] > targets[best] - loads[best] {
                best = split;
            }
        }
        loads[best] += cluster_sizes[cluster] as f64;
        split_of[cluster] = best;
    }
    split_of
}

/// Depth-first branch and bound over clusters in descending size order.
///
/// Branches are ordered by marginal objective change (seeded random keys
/// break ties), pruned by the size windows and by a lower bound made of:
/// the cheapest remaining pair costs, the extra cost of filling every split
/// up to its minimum (fractional knapsack over the remaining clusters), and
/// the item and label-share overshoot no completion can undo.
/// Returns the incumbent when the budget expires.
#[derive(Clone, Copy, Debug, Default)]
pub struct BranchAndBoundSolver;

impl AssignmentSolver for BranchAndBoundSolver {
    fn name(&self) -> &str {
        "branch-and-bound"
    }

    fn solve(&self, problem: &AssignmentProblem, budget: &SolverBudget) -> SolverOutcome {
        if budget.time_limit.is_zero() {
            return SolverOutcome::TimedOut;
        }
        if problem.n_clusters() == 0 {
            return SolverOutcome::Infeasible("no clusters to assign".to_string());
        }
        if !bounds_admit_total(problem.bounds(), problem.total_items()) {
            return SolverOutcome::Infeasible(format!(
                "size windows {:?} admit no split of {} item(s)",
                problem.bounds(),
                problem.total_items()
            ));
        }
        Search::new(problem, budget).run()
    }
}

struct Search<'p> {
    problem: &'p AssignmentProblem,
    budget: &'p SolverBudget,
    order: Vec<ClusterId>,
    tie_keys: Vec<Vec<u64>>,
    suffix_min_cost: Vec<f64>,
    suffix_size: Vec<usize>,
    /// `extra[d][s]`: cost above the cheapest split for the cluster at depth `d`.
    extra: Vec<Vec<f64>>,
    /// Per split, depths ordered by extra cost per item.
    fill_order: Vec<Vec<usize>>,
    /// `loads[r][s]`: amount of share row `r` placed in split `s`; row 0 counts items.
    loads: Vec<Vec<usize>>,
}

impl<'p> Search<'p> {
    fn new(problem: &'p AssignmentProblem, budget: &'p SolverBudget) -> Self {
        let sizes = problem.cluster_sizes();
        let costs = &problem.objective().costs;
        let n = problem.n_clusters();

        let mut order: Vec<ClusterId> = (0..n).collect();
        order.sort_by(|a, b| sizes[*b].cmp(&sizes[*a]).then(a.cmp(b)));

        let mut rng = StdRng::seed_from_u64(budget.seed);
        let tie_keys = (0..n)
            .map(|_| (0..problem.n_splits()).map(|_| rng.random::<u64>()).collect())
            .collect();

        let mut suffix_min_cost = vec![0.0; n + 1];
        let mut suffix_size = vec![0usize; n + 1];
        for depth in (0..n).rev() {
            let cluster = order[depth];
            let cheapest = costs
                .row(cluster)
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min);
            suffix_min_cost[depth] = suffix_min_cost[depth + 1] + cheapest;
            suffix_size[depth] = suffix_size[depth + 1] + sizes[cluster];
        }

        let extra: Vec<Vec<f64>> = order
            .iter()
            .map(|cluster| {
                let row = costs.row(*cluster);
                let cheapest = row.iter().copied().fold(f64::INFINITY, f64::min);
                row.iter().map(|cost| cost - cheapest).collect()
            })
            .collect();
        let fill_order = (0..problem.n_splits())
            .map(|split| {
                let mut depths: Vec<usize> = (0..n).collect();
                let per_item = |d: usize| extra[d][split] / sizes[order[d]].max(1) as f64;
                depths.sort_by(|a, b| per_item(*a).total_cmp(&per_item(*b)).then(a.cmp(b)));
                depths
            })
            .collect();

        Self {
            problem,
            budget,
            order,
            tie_keys,
            suffix_min_cost,
            suffix_size,
            extra,
            fill_order,
            loads: vec![vec![0; problem.n_splits()]; problem.objective().rows.len()],
        }
    }

    /// Lower bound on the extra pair cost of bringing every split up to its
    /// minimum with the clusters from depth `from` on, after `size` items were
    /// added to `split`.
    fn fill_cost(&self, split: SplitIndex, size: usize, from: usize) -> f64 {
        let sizes = self.problem.cluster_sizes();
        let mut total = 0.0;
        for (s, window) in self.problem.bounds().iter().enumerate() {
            let load = self.loads[0][s] + if s == split { size } else { 0 };
            let mut need = window.min.saturating_sub(load);
            if need == 0 {
                continue;
            }
            for &d in self.fill_order[s].iter().filter(|d| **d >= from) {
                let available = sizes[self.order[d]];
                if available == 0 {
                    continue;
                }
                let taken = available.min(need);
                total += self.extra[d][s] * taken as f64 / available as f64;
                need -= taken;
                if need == 0 {
                    break;
                }
            }
        }
        total
    }

    /// Whether `size` more items in `split` at `depth` keeps every window
    /// reachable by the clusters after `depth`.
    fn fits(&self, split: SplitIndex, size: usize, depth: usize) -> bool {
        let bounds = self.problem.bounds();
        if self.loads[0][split] + size > bounds[split].max {
            return false;
        }
        let remaining = self.suffix_size[depth + 1];
        let mut deficit = 0usize;
        let mut capacity = 0usize;
        for (s, window) in bounds.iter().enumerate() {
            let load = self.loads[0][s] + if s == split { size } else { 0 };
            deficit += window.min.saturating_sub(load);
            capacity += window.max - load;
        }
        deficit <= remaining && capacity >= remaining
    }

    fn place(&mut self, depth: usize, split: SplitIndex) {
        let cluster = self.order[depth];
        for (loads, share) in self.loads.iter_mut().zip(&self.problem.objective().rows) {
            loads[split] += share.counts[cluster];
        }
    }

    fn unplace(&mut self, depth: usize, split: SplitIndex) {
        let cluster = self.order[depth];
        for (loads, share) in self.loads.iter_mut().zip(&self.problem.objective().rows) {
            loads[split] -= share.counts[cluster];
        }
    }

    /// Share-row overshoot once `cluster` joins `split`. Loads only grow
    /// along a branch, so this never exceeds the final share penalty.
    fn overshoot_with(&self, split: SplitIndex, cluster: ClusterId) -> f64 {
        let objective = self.problem.objective();
        let mut total = 0.0;
        for (row, share) in objective.rows.iter().enumerate() {
            for (s, load) in self.loads[row].iter().enumerate() {
                let load = load + if s == split { share.counts[cluster] } else { 0 };
                total += objective.row_overshoot(row, s, load);
            }
        }
        total
    }

    /// Split order for `cluster` at the current loads: cheapest marginal
    /// objective change first.
    fn branch_order(&self, depth: usize) -> Vec<SplitIndex> {
        let objective = self.problem.objective();
        let cluster = self.order[depth];
        let keys = &self.tie_keys[depth];
        let marginal: Vec<f64> = (0..self.problem.n_splits())
            .map(|s| {
                let shares: f64 = objective
                    .rows
                    .iter()
                    .enumerate()
                    .map(|(row, share)| {
                        let load = self.loads[row][s];
                        objective.row_penalty(row, s, load + share.counts[cluster])
                            - objective.row_penalty(row, s, load)
                    })
                    .sum();
                objective.costs.get(cluster, s) + shares
            })
            .collect();
        let mut splits: Vec<SplitIndex> = (0..self.problem.n_splits()).collect();
        splits.sort_by(|a, b| {
            marginal[*a]
                .total_cmp(&marginal[*b])
                .then(keys[*a].cmp(&keys[*b]))
                .then(a.cmp(b))
        });
        splits
    }

    fn leaf_value(&self, pair_cost: f64) -> f64 {
        pair_cost + self.problem.objective().share_penalty(&self.loads)
    }

    fn run(mut self) -> SolverOutcome {
        let started = Instant::now();
        let n = self.order.len();
        let problem = self.problem;
        let costs = &problem.objective().costs;
        let sizes = problem.cluster_sizes();
        let gap = self.budget.relative_gap;

        let mut branches: Vec<Vec<SplitIndex>> = vec![Vec::new(); n];
        let mut next = vec![0usize; n];
        let mut placed = vec![0 as SplitIndex; n];
        let mut pair_cost = vec![0.0_f64; n + 1];
        let mut incumbent: Option<(f64, Vec<SplitIndex>)> = None;
        let mut nodes: u64 = 0;
        let mut depth = 0usize;
        let mut budget_hit: Option<SolverOutcome> = None;
        let mut entering = true;

        loop {
            if depth == n {
                let value = self.leaf_value(pair_cost[n]);
                let improves = incumbent
                    .as_ref()
                    .is_none_or(|(best, _)| value < best - OBJECTIVE_EPSILON);
                if improves {
                    let mut split_of = vec![0; n];
                    for (d, cluster) in self.order.iter().enumerate() {
                        split_of[*cluster] = placed[d];
                    }
                    debug!(
                        "[balanced_splits:optimizer] incumbent {:.6} after {} node(s)",
                        value, nodes
                    );
                    incumbent = Some((value, split_of));
                }
                depth -= 1;
                self.unplace(depth, placed[depth]);
                entering = false;
                continue;
            }

            nodes += 1;
            if nodes % CLOCK_CHECK_INTERVAL == 0 && started.elapsed() >= self.budget.time_limit {
                budget_hit = Some(SolverOutcome::TimedOut);
                break;
            }
            if self.budget.node_limit.is_some_and(|limit| nodes > limit) {
                budget_hit = Some(SolverOutcome::NodeLimit);
                break;
            }

            if entering {
                branches[depth] = self.branch_order(depth);
                next[depth] = 0;
            }

            let cluster = self.order[depth];
            let size = sizes[cluster];
            let prune_at = incumbent
                .as_ref()
                .map(|(best, _)| best - gap * best.abs() - OBJECTIVE_EPSILON);
            let mut chosen = None;
            while next[depth] < branches[depth].len() {
                let split = branches[depth][next[depth]];
                next[depth] += 1;
                if !self.fits(split, size, depth) {
                    continue;
                }
                let cost = pair_cost[depth] + costs.get(cluster, split);
                let bound = cost
                    + self.suffix_min_cost[depth + 1]
                    + self.overshoot_with(split, cluster)
                    + self.fill_cost(split, size, depth + 1);
                if prune_at.is_some_and(|limit| bound >= limit) {
                    continue;
                }
                chosen = Some((split, cost));
                break;
            }

            match chosen {
                Some((split, cost)) => {
                    self.place(depth, split);
                    placed[depth] = split;
                    pair_cost[depth + 1] = cost;
                    depth += 1;
                    entering = true;
                }
                None if depth == 0 => break,
                None => {
                    depth -= 1;
                    self.unplace(depth, placed[depth]);
                    entering = false;
                }
            }
        }

        debug!(
            "[balanced_splits:optimizer] explored {} node(s) in {:?}",
            nodes,
            started.elapsed()
        );
        match (incumbent, budget_hit) {
            (Some((_, split_of)), budget_hit) => SolverOutcome::Solved {
                split_of,
                proven_optimal: budget_hit.is_none() && gap == 0.0,
            },
            (None, Some(outcome)) => outcome,
            (None, None) => SolverOutcome::Infeasible(
                "no assignment of the clusters satisfies every size window".to_string(),
            ),
        }
    }
}
