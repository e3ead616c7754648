use std::time::Duration;

use balanced_splits::config::{CategoricalDivergence, Linkage};
use balanced_splits::{SplitConfig, SplitSpec};

#[test]
fn config_survives_json_roundtrip() {
    let mut config = SplitConfig {
        splits: vec![SplitSpec::new("fit", 0.6), SplitSpec::new("holdout", 0.4)],
        tolerance: 0.02,
        seed: 1234,
        min_interset_distance: true,
        ..SplitConfig::default()
    };
    config.clustering.linkage = Linkage::Average;
    config.objective.task_weights = vec![2.0, 0.5];
    config.objective.divergence = CategoricalDivergence::ChiSquare;
    config.solver.time_limit = Duration::from_millis(1500);
    config.solver.node_limit = Some(10_000);

    let json = serde_json::to_string(&config).unwrap();
    let restored: SplitConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, config);
    restored.validate().unwrap();
}

#[test]
fn missing_fields_fall_back_to_defaults() {
    let restored: SplitConfig =
        serde_json::from_str(r#"{ "tolerance": 0.1, "clustering": { "linkage": "Leader" } }"#)
            .unwrap();
    let defaults = SplitConfig::default();
    assert_eq!(restored.tolerance, 0.1);
    assert_eq!(restored.clustering.linkage, Linkage::Leader);
    assert_eq!(
        restored.clustering.distance_threshold,
        defaults.clustering.distance_threshold
    );
    assert_eq!(restored.splits, defaults.splits);
    assert_eq!(restored.seed, defaults.seed);
}
