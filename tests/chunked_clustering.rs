use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use balanced_splits::config::{ClusteringConfig, Linkage};
use balanced_splits::{Dataset, Item, SplitError, TaskSpec, cluster_items};

fn scattered(n: usize, seed: u64) -> Dataset<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let items = (0..n)
        .map(|i| Item::new(format!("p{i}"), rng.random_range(0.0..25.0), vec![None]))
        .collect();
    Dataset::new(vec![TaskSpec::continuous("unused")], items).unwrap()
}

fn line_distance(a: &f64, b: &f64) -> Result<f64, String> {
    Ok((a - b).abs())
}

#[test]
fn chunk_size_never_changes_the_clustering() {
    let dataset = scattered(150, 21);
    for linkage in [
        Linkage::Single,
        Linkage::Complete,
        Linkage::Average,
        Linkage::Leader,
    ] {
        let reference = cluster_items(
            &dataset,
            &line_distance,
            &ClusteringConfig {
                distance_threshold: 0.2,
                linkage,
                chunk_rows: dataset.len(),
            },
        )
        .unwrap();
        for chunk_rows in [1, 7, 64, 1000] {
            let chunked = cluster_items(
                &dataset,
                &line_distance,
                &ClusteringConfig {
                    distance_threshold: 0.2,
                    linkage,
                    chunk_rows,
                },
            )
            .unwrap();
            assert_eq!(chunked, reference, "{linkage:?} with chunk_rows {chunk_rows}");
        }
    }
}

#[test]
fn threshold_extremes_need_no_special_handling() {
    let dataset = scattered(30, 2);
    let all = cluster_items(
        &dataset,
        &line_distance,
        &ClusteringConfig {
            distance_threshold: 1000.0,
            ..ClusteringConfig::default()
        },
    )
    .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all.clusters()[0].size(), 30);

    let none = cluster_items(
        &dataset,
        &line_distance,
        &ClusteringConfig {
            distance_threshold: 0.0,
            ..ClusteringConfig::default()
        },
    )
    .unwrap();
    assert_eq!(none.len(), 30);
}

#[test]
fn failing_pairs_are_reported_by_id_for_any_chunking() {
    let dataset = scattered(40, 5);
    let picky = |a: &f64, b: &f64| -> Result<f64, String> {
        let d = (a - b).abs();
        if d > 5.0 {
            Err(format!("pair too far apart ({d:.2})"))
        } else {
            Ok(d)
        }
    };
    let mut seen = Vec::new();
    for chunk_rows in [1, 3, 40] {
        let err = cluster_items(
            &dataset,
            &picky,
            &ClusteringConfig {
                chunk_rows,
                ..ClusteringConfig::default()
            },
        )
        .unwrap_err();
        match err {
            SplitError::Similarity { left, right, reason } => {
                assert!(reason.contains("too far"));
                seen.push((left, right));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
    assert!(seen.windows(2).all(|pair| pair[0] == pair[1]));
}
