//! Integration tests: generate synthetic exposures from known cells and
//! orientations, and verify the indexer recovers every lattice.


use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use lattice_indexer::indexer::driver::{try_seed_pair, ExposureState};
use lattice_indexer::indexer::network::NetworkSearch;
use lattice_indexer::indexer::validate::similar;
use lattice_indexer::indexer::vectors::compile_vectors;
use lattice_indexer::{
    index_exposure, index_exposures, Exposure, Indexer, IndexingConfig, IndexingStrategy,
    LatticeTable, Matrix3, OrientationMatrix, OrientationRefiner, Refinement, Spot, StopReason,
    TrialStatus, UnitCell,
};
use nalgebra::Rotation3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use test_data::*;

/// Rotations of the tetragonal point group 422.
fn tetragonal_rotations() -> Vec<Matrix3> {
    cubic_rotations()
        .into_iter()
        .filter(|m| m[(2, 2)].abs() == 1.0)
        .collect()
}

fn assert_cell_close(cell: &UnitCell, expected: [f64; 6]) {
    let found = cell.parameters();
    for (f, e) in found.iter().zip(expected.iter()) {
        assert!((f - e).abs() < 0.01, "cell {:?} differs from {:?}", found, expected);
    }
}

/// Recover a single lattice with cubic metric and tetragonal symmetry.
#[test]
fn test_recover_pseudo_cubic_lattice() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    // ── Step 1: Build the indexer ──
    let indexer = Indexer::new(config(PSEUDO_CUBIC_CELL)).expect("valid configuration");
    println!("Lattice table: {} vectors", indexer.table().len());

    // ── Step 2: Synthetic spots from a random orientation ──
    let mut rng = StdRng::seed_from_u64(7);
    let truth = random_rotation(&mut rng);
    let millers = miller_block(5..9, 3..7, 10..12, P43212);
    assert!(millers.len() >= 30);
    let spots = lattice_spots(&indexer.orientation(truth), &millers, 0);

    // ── Step 3: Index ──
    let report = index_exposure(
        &indexer,
        Exposure {
            name: "pseudo_cubic".into(),
            spots,
        },
    );
    println!(
        "Stop: {:?}, trials {}, {:.1} ms",
        report.stop_reason, report.trials, report.elapsed_ms
    );

    // ── Step 4: Verify ──
    assert_eq!(report.lattices.len(), 1);
    assert_eq!(report.stop_reason, StopReason::MaxLattices);
    let lattice = &report.lattices[0];
    assert_eq!(lattice.spots.len(), millers.len());
    assert!(report.remaining_spots.is_empty());

    let cell = lattice.unit_cell().expect("non-singular orientation");
    assert_cell_close(&cell, PSEUDO_CUBIC_CELL);

    // With a cubic metric any of the 24 cube rotations re-indexes the lattice.
    let error = misorientation_deg(lattice.orientation.rotation(), &truth, &cubic_rotations());
    println!("Misorientation: {:.2e}°", error);
    assert!(error < indexer.config().angle_tolerance_deg);
}

/// Two crystals on one exposure: both found, spots conserved and disjoint.
#[test]
fn test_two_lattices_partition_spots() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let indexer = Indexer::new(IndexingConfig {
        max_lattices: 2,
        ..config(TETRAGONAL_CELL)
    })
    .expect("valid configuration");

    let u_a = Rotation3::from_euler_angles(0.3, 0.2, 0.1).into_inner();
    let u_b = Rotation3::from_euler_angles(1.3, -0.7, 2.2).into_inner();
    let a = indexer.orientation(u_a);
    let b = indexer.orientation(u_b);
    assert!(!similar(&indexer, &a, &b));

    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let mut spots = lattice_spots(&a, &millers, 0);
    spots.extend(lattice_spots(&b, &millers, 1000));
    let total = spots.len();
    let input_ids: HashSet<usize> = spots.iter().map(|s| s.id).collect();

    let report = index_exposure(
        &indexer,
        Exposure {
            name: "two_crystals".into(),
            spots,
        },
    );
    println!(
        "Found {} lattices explaining {} spots; {} remain",
        report.lattices.len(),
        report.explained_spot_count(),
        report.remaining_spots.len()
    );

    assert_eq!(report.lattices.len(), 2);
    assert_eq!(report.stop_reason, StopReason::MaxLattices);

    // Every input spot ends up in exactly one place.
    assert_eq!(report.explained_spot_count() + report.remaining_spots.len(), total);
    let mut seen = HashSet::new();
    for spot in report
        .lattices
        .iter()
        .flat_map(|l| l.spots.iter())
        .chain(report.remaining_spots.iter())
    {
        assert!(seen.insert(spot.id), "spot {} assigned twice", spot.id);
    }
    assert_eq!(seen, input_ids);

    // Each lattice matches one of the two crystals, and they differ.
    let group = tetragonal_rotations();
    let mut crystals = Vec::new();
    for lattice in &report.lattices {
        assert_cell_close(&lattice.unit_cell().expect("non-singular orientation"), TETRAGONAL_CELL);
        let to_a = misorientation_deg(lattice.orientation.rotation(), &u_a, &group);
        let to_b = misorientation_deg(lattice.orientation.rotation(), &u_b, &group);
        println!("Lattice: {:.3}° from A, {:.3}° from B", to_a, to_b);
        if to_a < 0.5 {
            crystals.push('A');
        } else if to_b < 0.5 {
            crystals.push('B');
        } else {
            panic!("lattice matches neither crystal");
        }
    }
    crystals.sort();
    assert_eq!(crystals, vec!['A', 'B']);
}

/// A second seed pair describing an accepted orientation is a duplicate.
#[test]
fn test_second_seed_pair_is_duplicate() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let indexer = Indexer::new(config(TETRAGONAL_CELL)).expect("valid configuration");
    let truth = Rotation3::from_euler_angles(-0.4, 0.6, 1.1).into_inner();
    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let spots = lattice_spots(&indexer.orientation(truth), &millers, 0);

    let mut state = ExposureState::new(spots);
    state.vectors = compile_vectors(&mut state.spots, &indexer.config().vectors, indexer.table(), None)
        .expect("spot count within limits");
    let pool = state.vectors.clone();
    let n = pool.len();
    let mut search = NetworkSearch::new(&indexer, None);

    // ── Step 1: First pair that yields a lattice ──
    let mut first = None;
    'outer: for i in 0..n {
        for j in (i + 1)..n {
            if try_seed_pair(&indexer, &mut state, &mut search, i, j).is_success() {
                first = Some((i, j));
                break 'outer;
            }
        }
    }
    let first = first.expect("some seed pair indexes the lattice");
    assert_eq!(state.accepted.len(), 1);
    println!("Accepted from pair {:?}", first);

    // ── Step 2: Feed the same vectors through seeding again ──
    state.vectors = pool;
    let mut statuses = Vec::new();
    'again: for i in 0..n {
        for j in (i + 1)..n {
            if (i, j) == first {
                continue;
            }
            let status = try_seed_pair(&indexer, &mut state, &mut search, i, j);
            if status != TrialStatus::BranchFailure {
                statuses.push(status);
                if statuses.len() == 5 {
                    break 'again;
                }
            }
        }
    }
    assert!(!statuses.is_empty());
    for status in &statuses {
        assert_eq!(*status, TrialStatus::Duplicate);
    }
    assert_eq!(state.accepted.len(), 1);
}

/// The search stops promptly once the time limit has passed, even while the
/// observed vectors of a large spot set are still being compiled.
#[test]
fn test_time_limit_bounds_search() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let indexer = Indexer::new(IndexingConfig {
        time_limit_ms: Some(1),
        ..config(TETRAGONAL_CELL)
    })
    .expect("valid configuration");

    let mut rng = StdRng::seed_from_u64(99);
    for count in [1000, 2000, 4000] {
        let spots = stray_spots(&mut rng, count, 0, 0.05);

        let t0 = Instant::now();
        let report = index_exposure(
            &indexer,
            Exposure {
                name: format!("noise_{}", count),
                spots,
            },
        );
        let wall_ms = t0.elapsed().as_secs_f64() * 1000.0;
        println!("{} spots: stopped after {:.2} ms ({} trials)", count, wall_ms, report.trials);

        assert_eq!(report.stop_reason, StopReason::TimeLimit);
        assert!(report.lattices.is_empty());
        assert_eq!(report.remaining_spots.len(), count);
        assert!(wall_ms < 50.0, "{} spots took {:.1} ms", count, wall_ms);
    }
}

/// Too many consecutive refinement failures end the search.
#[test]
fn test_consecutive_failures_stop_search() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    struct RejectEverything;
    impl OrientationRefiner for RejectEverything {
        fn refine(&self, orientation: &OrientationMatrix, _spots: &[Spot]) -> Refinement {
            Refinement {
                orientation: *orientation,
                good: false,
                explained: Vec::new(),
            }
        }
    }

    let indexer = Indexer::new(config(TETRAGONAL_CELL))
        .expect("valid configuration")
        .with_refiner(Arc::new(RejectEverything));
    let truth = Rotation3::from_euler_angles(0.2, 0.5, -0.8).into_inner();
    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let report = index_exposure(
        &indexer,
        Exposure {
            name: "rejected".into(),
            spots: lattice_spots(&indexer.orientation(truth), &millers, 0),
        },
    );
    println!("Stopped after {} trials, {} rejected", report.trials, report.rejected.len());

    assert_eq!(report.stop_reason, StopReason::TooManyFailures);
    assert!(report.lattices.is_empty());
    assert_eq!(report.rejected.len(), indexer.config().max_consecutive_failures + 1);
    assert_eq!(report.remaining_spots.len(), millers.len());
}

/// When the network search cannot grow a seed, the bulk matcher still
/// indexes the exposure.
#[test]
fn test_bulk_takes_over_from_network() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let indexer = Indexer::new(IndexingConfig {
        strategy: IndexingStrategy::NetworkThenBulk,
        max_seeds_per_pair: 0,
        ..config(TETRAGONAL_CELL)
    })
    .expect("valid configuration");
    let truth = Rotation3::from_euler_angles(0.7, -0.3, 0.5).into_inner();
    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let report = index_exposure(
        &indexer,
        Exposure {
            name: "bulk_only".into(),
            spots: lattice_spots(&indexer.orientation(truth), &millers, 0),
        },
    );

    assert_eq!(report.lattices.len(), 1);
    assert_eq!(report.stop_reason, StopReason::MaxLattices);
    assert!(similar(&indexer, &report.lattices[0].orientation, &indexer.orientation(truth)));
}

/// A network search that runs out of its share of the time limit hands over
/// to the bulk matcher, which still has time to index the exposure.
#[test]
fn test_network_share_leaves_time_for_bulk() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    // The network share is gone before the first seed pair.
    let indexer = Indexer::new(IndexingConfig {
        strategy: IndexingStrategy::NetworkThenBulk,
        time_limit_ms: Some(10_000),
        network_time_fraction: 1e-6,
        ..config(TETRAGONAL_CELL)
    })
    .expect("valid configuration");
    let truth = Rotation3::from_euler_angles(0.7, -0.3, 0.5).into_inner();
    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let report = index_exposure(
        &indexer,
        Exposure {
            name: "handover".into(),
            spots: lattice_spots(&indexer.orientation(truth), &millers, 0),
        },
    );
    println!(
        "Stop: {:?} after {} trials in {:.0} ms",
        report.stop_reason, report.trials, report.elapsed_ms
    );

    assert_eq!(report.lattices.len(), 1);
    assert_eq!(report.stop_reason, StopReason::MaxLattices);
    assert!(report.elapsed_ms < 10_000.0);
    assert!(similar(&indexer, &report.lattices[0].orientation, &indexer.orientation(truth)));

    // With the whole limit given to the network, the same exposure is
    // abandoned at the time limit.
    let starved = Indexer::new(IndexingConfig {
        strategy: IndexingStrategy::NetworkThenBulk,
        time_limit_ms: Some(0),
        ..config(TETRAGONAL_CELL)
    })
    .expect("valid configuration");
    let report = index_exposure(
        &starved,
        Exposure {
            name: "starved".into(),
            spots: lattice_spots(&starved.orientation(truth), &millers, 0),
        },
    );
    assert_eq!(report.stop_reason, StopReason::TimeLimit);
    assert!(report.lattices.is_empty());
}

/// Position noise and stray spots do not prevent indexing.
#[test]
fn test_noisy_lattice_with_stray_spots() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let indexer = Indexer::new(config(TETRAGONAL_CELL)).expect("valid configuration");
    let mut rng = StdRng::seed_from_u64(2024);
    let truth = random_rotation(&mut rng);
    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let mut spots = noisy_lattice_spots(&indexer.orientation(truth), &millers, 0, 2.0e-5, &mut rng);
    spots.extend(stray_spots(&mut rng, 15, 500, 0.08));

    let report = index_exposure(
        &indexer,
        Exposure {
            name: "noisy".into(),
            spots,
        },
    );

    assert_eq!(report.lattices.len(), 1);
    let lattice = &report.lattices[0];
    assert!(lattice.spots.len() >= millers.len() - 2);
    let error = misorientation_deg(lattice.orientation.rotation(), &truth, &tetragonal_rotations());
    println!("Misorientation with noise: {:.3}°", error);
    assert!(error < 0.2);
}

/// The bulk matcher alone recovers a clean lattice.
#[test]
fn test_bulk_strategy() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let indexer = Indexer::new(IndexingConfig {
        strategy: IndexingStrategy::Bulk,
        ..config(TETRAGONAL_CELL)
    })
    .expect("valid configuration");
    let truth = Rotation3::from_euler_angles(0.7, -0.3, 0.5).into_inner();
    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let spots = lattice_spots(&indexer.orientation(truth), &millers, 0);

    let report = index_exposure(
        &indexer,
        Exposure {
            name: "bulk".into(),
            spots,
        },
    );
    assert_eq!(report.lattices.len(), 1);
    assert!(similar(&indexer, &report.lattices[0].orientation, &indexer.orientation(truth)));
}

/// Reports come back in input order whatever the worker count.
#[test]
fn test_dispatcher_preserves_order() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let indexer = Indexer::new(IndexingConfig {
        threads: 2,
        ..config(TETRAGONAL_CELL)
    })
    .expect("valid configuration");
    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let mut rng = StdRng::seed_from_u64(5);

    let mut exposures = Vec::new();
    for i in 0..5 {
        let spots = if i == 2 {
            stray_spots(&mut rng, 25, 0, 0.05)
        } else {
            lattice_spots(&indexer.orientation(random_rotation(&mut rng)), &millers, 0)
        };
        exposures.push(Exposure {
            name: format!("shot_{:04}", i),
            spots,
        });
    }

    let reports = index_exposures(&indexer, exposures);
    assert_eq!(reports.len(), 5);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.name, format!("shot_{:04}", i));
        let expected = if i == 2 { 0 } else { 1 };
        assert_eq!(report.lattices.len(), expected, "{}", report.name);
    }
}

/// A saved lattice table can be reloaded and reused.
#[test]
fn test_saved_table_reused() {
    let config = config(TETRAGONAL_CELL);
    let fresh = Indexer::new(config.clone()).expect("valid configuration");

    let path = std::env::temp_dir().join(format!("lattice_table_{}.rkyv", std::process::id()));
    let path = path.to_str().expect("utf-8 temp path").to_string();
    fresh.table().save_to_file(&path).expect("table saved");
    let table = LatticeTable::load_from_file(&path).expect("table loaded");
    let _ = std::fs::remove_file(&path);
    assert_eq!(table.len(), fresh.table().len());

    let cached = Indexer::with_table(config, table).expect("table matches configuration");
    let truth = Rotation3::from_euler_angles(0.1, 0.9, -1.2).into_inner();
    let millers = miller_block(5..9, 3..7, 4..6, P43212);
    let report = index_exposure(
        &cached,
        Exposure {
            name: "cached".into(),
            spots: lattice_spots(&cached.orientation(truth), &millers, 0),
        },
    );
    assert_eq!(report.lattices.len(), 1);
    assert!(similar(&cached, &report.lattices[0].orientation, &fresh.orientation(truth)));
}
