mod common;

use arrayforge::error::ArrayForgeError;
use arrayforge::optimizer::cache::{EvaluationCache, EvaluationRecord, EvaluationStatus};
use arrayforge::optimizer::evaluator::{
    EvaluatorSettings, Outcome, ViolationLog, VIOLATION_LOG_FILE,
};
use arrayforge::optimizer::Evaluator;
use arrayforge::results::favorite_path;
use arrayforge::worker::{self, WorkerResult, WorkerStatus};
use common::{FakeLauncher, FakeMode, BASE_PENALTY};
use regex::Regex;
use rstest::rstest;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    launcher: FakeLauncher,
    evaluator: Evaluator,
}

fn harness(mode: FakeMode, maximise: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let launcher = FakeLauncher::new(mode);
    let violations = Arc::new(ViolationLog::open(&dir.path().join(VIOLATION_LOG_FILE)).unwrap());
    let evaluator = Evaluator::new(
        EvaluatorSettings {
            root: "farm".to_string(),
            worker_dir: dir.path().to_path_buf(),
            base_penalty: BASE_PENALTY,
            objective: "annual_energy".to_string(),
            maximise,
        },
        Arc::new(common::scenario()),
        Arc::new(EvaluationCache::new()),
        violations,
        Box::new(launcher.clone()),
    )
    .unwrap();
    Harness {
        dir,
        launcher,
        evaluator,
    }
}

fn record(index: u64, params: Vec<f64>, cost: f64) -> EvaluationRecord {
    EvaluationRecord {
        index,
        params,
        cost,
        status: EvaluationStatus::Success,
        input_path: None,
        output_path: None,
        message: None,
    }
}

#[test]
fn test_cache_rejects_duplicate_index() {
    let cache = EvaluationCache::new();
    cache.record(record(0, vec![1.0], 2.0)).unwrap();
    match cache.record(record(0, vec![3.0], 4.0)) {
        Err(ArrayForgeError::LedgerConflict(i)) => assert_eq!(i, 0),
        other => panic!("expected LedgerConflict, got {:?}", other),
    }
}

#[test]
fn test_cache_lookup_distinguishes_missing_from_nan() {
    let cache = EvaluationCache::new();
    cache.record(record(0, vec![1.0, 2.0], f64::NAN)).unwrap();
    assert!(cache.lookup_cost(&[1.0, 2.0]).unwrap().is_nan());
    assert!(cache.lookup_cost(&[1.0, 2.5]).is_none());
}

#[test]
fn test_cache_equality_is_bitwise() {
    let cache = EvaluationCache::new();
    cache.record(record(0, vec![0.0, 1.0], 5.0)).unwrap();
    assert!(cache.lookup_cost(&[-0.0, 1.0]).is_none());
    assert_eq!(cache.lookup_cost(&[0.0, 1.0]), Some(5.0));
}

#[test]
fn test_cache_resumes_after_highest_index() {
    let cache = EvaluationCache::from_records(vec![
        record(0, vec![1.0], 1.0),
        record(4, vec![2.0], 1.0),
    ])
    .unwrap();
    assert_eq!(cache.max_index(), Some(4));
    assert_eq!(cache.next_index(), 5);
    assert!(EvaluationCache::from_records(vec![record(1, vec![1.0], 1.0), record(1, vec![2.0], 1.0)]).is_err());
}

#[test]
fn test_cache_hit_skips_dispatch() {
    let h = harness(FakeMode::Succeed, false);
    let params = common::feasible_params();

    let first = h.evaluator.evaluate(&params, None).unwrap();
    let second = h.evaluator.evaluate(&params, None).unwrap();

    assert_eq!(h.launcher.calls(), 1);
    assert_eq!(first.index, Some(0));
    assert!(second.is_cached());
    assert_eq!(second.index, None);
    assert_eq!(first.cost.to_bits(), second.cost.to_bits());
    assert_eq!(h.evaluator.cache().len(), 1);
    assert_eq!(h.evaluator.cache().peek_next(), 1);
}

#[test]
fn test_success_cleans_input_and_keeps_output() {
    let h = harness(FakeMode::Succeed, false);
    let params = common::feasible_params();
    let eval = h.evaluator.evaluate(&params, None).unwrap();

    assert_eq!(eval.outcome, Some(Outcome::Success(common::fake_energy(&params))));
    assert_eq!(h.launcher.inputs_seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(!worker::scenario_path(h.dir.path(), "farm", "0").exists());
    assert!(worker::result_path(h.dir.path(), "farm", "0").exists());

    let rec = h.evaluator.cache().get(0).unwrap();
    assert_eq!(rec.status, EvaluationStatus::Success);
    assert_eq!(rec.output_path, Some(worker::result_path(h.dir.path(), "farm", "0")));
}

#[test]
fn test_maximise_negates_objective() {
    let h = harness(FakeMode::Succeed, true);
    let params = common::feasible_params();
    let eval = h.evaluator.evaluate(&params, None).unwrap();
    assert_eq!(eval.cost, -common::fake_energy(&params));
}

#[rstest]
#[case(FakeMode::FailExit, EvaluationStatus::FailExecute)]
#[case(FakeMode::NoOutput, EvaluationStatus::FailReceive)]
#[case(FakeMode::MissingObjective, EvaluationStatus::FailReceive)]
fn test_failures_cost_base_penalty(#[case] mode: FakeMode, #[case] expected: EvaluationStatus) {
    let h = harness(mode, false);
    let eval = h.evaluator.evaluate(&common::feasible_params(), None).unwrap();

    assert_eq!(eval.cost, BASE_PENALTY);
    assert_eq!(eval.outcome.as_ref().map(Outcome::status), Some(expected));
    assert!(!worker::scenario_path(h.dir.path(), "farm", "0").exists());
    assert_eq!(h.evaluator.cache().get(0).unwrap().status, expected);
}

#[test]
fn test_exception_costs_nan() {
    let h = harness(FakeMode::Exception, false);
    let eval = h.evaluator.evaluate(&common::feasible_params(), None).unwrap();
    assert!(eval.cost.is_nan());
    assert!(matches!(eval.outcome, Some(Outcome::Exception(ref m)) if m == "solver diverged"));

    let again = h.evaluator.evaluate(&common::feasible_params(), None).unwrap();
    assert!(again.is_cached());
    assert!(again.cost.is_nan());
    assert_eq!(h.launcher.calls(), 1);
}

#[test]
fn test_rejection_is_logged_and_penalised() {
    let h = harness(FakeMode::Succeed, false);
    let mut params = common::feasible_params();
    params[3] = 10_000.0;

    let eval = h.evaluator.evaluate(&params, None).unwrap();
    assert_eq!(h.launcher.calls(), 0);
    assert_eq!(eval.index, Some(0));
    assert!(eval.cost > BASE_PENALTY);
    match &eval.outcome {
        Some(Outcome::Rejected { reason, penalty }) => {
            assert!(reason.contains("Expected number of nodes not found"));
            assert_eq!(*penalty, eval.cost);
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    let log = fs::read_to_string(h.dir.path().join(VIOLATION_LOG_FILE)).unwrap();
    let line = Regex::new(
        r"^0: Expected number of nodes not found\. Expected 10000 but found \d+; params: grid_orientation=[-\d.e]+, delta_row=60, delta_col=60, n_nodes=10000, t1=0\.5, t2=0\.5$",
    )
    .unwrap();
    assert!(line.is_match(log.trim_end()), "unexpected log line: {}", log);
}

#[test]
fn test_geometry_rejection_costs_base_penalty() {
    let h = harness(FakeMode::Succeed, false);
    let mut params = common::feasible_params();
    params[1] = 20.0;
    let eval = h.evaluator.evaluate(&params, None).unwrap();
    assert_eq!(eval.cost, BASE_PENALTY);
    assert_eq!(h.evaluator.cache().get(0).unwrap().status, EvaluationStatus::Rejected);
}

#[test]
fn test_favorite_bypasses_cache_and_always_writes_artifact() {
    let h = harness(FakeMode::Succeed, false);
    let params = common::feasible_params();
    h.evaluator.evaluate(&params, None).unwrap();
    h.evaluator.evaluate_favorite(&params, None).unwrap();

    assert_eq!(h.launcher.calls(), 2);
    assert_eq!(h.evaluator.cache().len(), 1);
    assert!(favorite_path(h.dir.path(), "farm").exists());

    let rejected = harness(FakeMode::Succeed, false);
    let mut bad = common::feasible_params();
    bad[3] = 10_000.0;
    let fav = rejected.evaluator.evaluate_favorite(&bad, None).unwrap();
    assert_eq!(fav.index, None);
    let artifact = WorkerResult::load(&favorite_path(rejected.dir.path(), "farm")).unwrap();
    assert_eq!(artifact.status, WorkerStatus::Exception);
    assert!(rejected.evaluator.cache().is_empty());
}
