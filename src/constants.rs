/// Constants used by split specification and fraction validation.
pub mod splits {
    /// Allowed absolute deviation of the fraction sum from `1.0`.
    pub const FRACTION_SUM_EPSILON: f64 = 1e-6;
    /// Slack applied when converting fractional size bounds to item counts.
    pub const BOUND_ROUNDING_EPSILON: f64 = 1e-9;
    /// Default split names, in declaration order.
    pub const DEFAULT_SPLIT_NAMES: [&str; 3] = ["train", "validation", "test"];
    /// Default split fractions matching [`DEFAULT_SPLIT_NAMES`].
    pub const DEFAULT_SPLIT_FRACTIONS: [f64; 3] = [0.8, 0.1, 0.1];
    /// Default allowed deviation between target and realized fractions.
    pub const DEFAULT_TOLERANCE: f64 = 0.05;
}

/// Constants used by the similarity clusterer.
pub mod clustering {
    /// Default distance threshold below which items are co-located.
    pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.35;
    /// Default number of distance-matrix rows computed per chunk.
    ///
    /// This only bounds transient memory while distances are evaluated; it
    /// never changes the resulting clustering.
    pub const DEFAULT_CHUNK_ROWS: usize = 256;
}

/// Constants used by the balance objective.
pub mod objective {
    /// Default weight of the size-fraction term.
    pub const DEFAULT_SIZE_WEIGHT: f64 = 1.0;
    /// Default weight of each task when no explicit task weights are given.
    pub const DEFAULT_TASK_WEIGHT: f64 = 1.0;
    /// Variance below which a continuous task is treated as constant.
    pub const VARIANCE_EPSILON: f64 = 1e-12;
}

/// Constants used by the assignment optimizer.
pub mod optimizer {
    /// Default wall-clock budget for the solver, in seconds.
    pub const DEFAULT_TIME_LIMIT_SECS: u64 = 60;
    /// Default relative optimality gap at which the search stops improving.
    pub const DEFAULT_RELATIVE_GAP: f64 = 0.1;
    /// Number of explored nodes between wall-clock checks.
    pub const CLOCK_CHECK_INTERVAL: u64 = 1024;
    /// Absolute slack used when comparing objective values.
    pub const OBJECTIVE_EPSILON: f64 = 1e-12;
}

/// Constants used by task statistics.
pub mod stats {
    /// Maximum distance from an integer for a label to count as integral.
    pub const INTEGRAL_EPSILON: f64 = 1e-9;
}

/// Default pipeline seed.
pub const DEFAULT_SEED: u64 = 42;
