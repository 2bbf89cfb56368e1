//! End-to-end coverage of the matrix engine's public API.
//!
//! Run individual scenarios with:
//! cargo test scenario_1 -- --nocapture

use std::sync::Arc;
use std::thread;

use smatrix::{Engine, EngineError};
use tempfile::TempDir;

/// Install a `tracing` subscriber writing to the test harness's captured
/// output. Safe to call from every test: `try_init` is a no-op once a
/// global subscriber is already set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn open_db() -> (Engine, TempDir) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path().join("a.db")).unwrap();
    (engine, dir)
}

mod scenario_1_empty_open_sync {
    use super::*;

    #[test]
    fn reopen_succeeds_and_unknown_row_is_not_found() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.db");

        let engine = Engine::open(&path).unwrap();
        engine.sync().unwrap();
        engine.close().unwrap();

        let engine = Engine::open(&path).unwrap();
        let err = engine.get_row(0).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(0)));
    }
}

mod scenario_2_single_cell {
    use super::*;

    #[test]
    fn cell_round_trips_through_close_and_reopen() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.db");

        let engine = Engine::open(&path).unwrap();
        engine.incr(7, 42, 1).unwrap();
        engine.sync().unwrap();
        engine.close().unwrap();

        let engine = Engine::open(&path).unwrap();
        let row = engine.get_row(7).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row.value_of(42), Some(1));
    }
}

mod scenario_3_row_grow {
    use super::*;

    #[test]
    fn row_past_initial_capacity_resizes_and_survives_reopen() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.db");

        let engine = Engine::open(&path).unwrap();
        for y in 0..=64u32 {
            engine.incr(5, y, 1).unwrap();
        }
        engine.sync().unwrap();
        engine.close().unwrap();

        let engine = Engine::open(&path).unwrap();
        let row = engine.get_row(5).unwrap();
        assert_eq!(row.len(), 65, "row 5 must have exactly 65 entries");
        for y in 0..=64u32 {
            assert_eq!(row.value_of(y), Some(1), "missing column {y}");
        }
    }
}

mod scenario_4_gc_round_trip {
    use super::*;

    #[test]
    fn gc_then_further_writes_preserve_earlier_values() {
        let (engine, _dir) = open_db();

        engine.incr(1, 2, 1).unwrap();
        engine.incr(1, 3, 1).unwrap();
        engine.gc().unwrap();
        engine.incr(1, 4, 1).unwrap();
        engine.sync().unwrap();
        engine.close().unwrap();

        let row = {
            // reopen against the same file
            let dir = _dir;
            let engine = Engine::open(dir.path().join("a.db")).unwrap();
            engine.get_row(1).unwrap()
        };

        assert_eq!(row.value_of(2), Some(1));
        assert_eq!(row.value_of(3), Some(1));
        assert_eq!(row.value_of(4), Some(1));
        assert_eq!(row.len(), 3);
    }
}

mod scenario_5_concurrent_disjoint_rows {
    use super::*;

    #[test]
    fn disjoint_row_increments_do_not_interfere() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::open(dir.path().join("a.db")).unwrap());

        const THREADS: u32 = 8;
        const CALLS: u64 = 200;

        let handles: Vec<_> = (0..THREADS)
            .map(|tid| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..CALLS {
                        engine.incr(tid, 0, 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for tid in 0..THREADS {
            let row = engine.get_row(tid).unwrap();
            assert_eq!(row.value_of(0), Some(CALLS), "row {tid} has the wrong count");
        }
    }
}

mod scenario_6_concurrent_same_cell {
    use super::*;

    #[test]
    fn same_cell_increments_sum_exactly() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::open(dir.path().join("a.db")).unwrap());

        const THREADS: u64 = 8;
        const CALLS: u64 = 500;

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..CALLS {
                        engine.incr(9, 9, 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let row = engine.get_row(9).unwrap();
        assert_eq!(row.value_of(9), Some(THREADS * CALLS));
    }
}

mod boundary_ids {
    use super::*;

    #[test]
    fn zero_and_max_ids_are_valid() {
        let (engine, _dir) = open_db();

        engine.incr(0, 0, 1).unwrap();
        engine.incr(u32::MAX, u32::MAX, 1).unwrap();

        assert_eq!(engine.get_row(0).unwrap().value_of(0), Some(1));
        assert_eq!(engine.get_row(u32::MAX).unwrap().value_of(u32::MAX), Some(1));
    }

    #[test]
    fn incr_with_zero_delta_is_a_no_op_for_absent_cell() {
        let (engine, _dir) = open_db();

        engine.incr(1, 1, 0).unwrap();
        let err = engine.get_row(1).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(1)));
    }
}

mod sync_idempotence {
    use super::*;

    #[test]
    fn repeated_sync_with_no_intervening_writes_is_a_no_op() {
        let (engine, _dir) = open_db();
        engine.incr(3, 4, 5).unwrap();
        engine.sync().unwrap();
        engine.sync().unwrap();

        let row = engine.get_row(3).unwrap();
        assert_eq!(row.value_of(4), Some(5));
    }
}
