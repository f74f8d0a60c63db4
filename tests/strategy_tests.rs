use arrayforge::error::ArrayForgeError;
use arrayforge::optimizer::cache::{EvaluationRecord, EvaluationStatus};
use arrayforge::optimizer::checkpoint::{self, STRATEGY_FILE};
use arrayforge::optimizer::cma::{default_popsize, CmaEs, CmaOptions, CmaState, StopReason};
use arrayforge::optimizer::noise::{median, prctile, NoiseHandler};
use rstest::rstest;
use std::fs;

fn sphere(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum()
}

fn strategy(seed: u64) -> CmaEs {
    CmaEs::new(
        &[3.0, -2.0],
        &[-10.0, -10.0],
        &[10.0, 10.0],
        CmaOptions {
            seed: Some(seed),
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn test_cma_minimises_sphere() {
    let mut es = strategy(11);
    for _ in 0..150 {
        if es.stop().is_some() {
            break;
        }
        let xs = es.ask();
        let costs: Vec<f64> = xs.iter().map(|x| sphere(x)).collect();
        es.tell(&xs, &costs).unwrap();
    }
    let (_, best) = es.best().unwrap();
    assert!(best < 1e-4, "best cost {}", best);
}

#[test]
fn test_cma_samples_inside_bounds() {
    let mut es = strategy(3);
    for x in es.ask() {
        assert!(x.iter().all(|v| (-10.0..=10.0).contains(v)));
    }
}

#[test]
fn test_cma_rejects_nan_and_short_generations() {
    let mut es = strategy(5);
    let xs = es.ask();
    let mut costs: Vec<f64> = xs.iter().map(|x| sphere(x)).collect();
    costs[0] = f64::NAN;
    assert!(es.tell(&xs, &costs).is_err());
    assert!(es.tell(&xs[..1], &costs[1..2]).is_err());
    assert_eq!(es.generation(), 0);
}

#[test]
fn test_cma_budget_stop() {
    let mut es = CmaEs::new(
        &[0.5],
        &[0.0],
        &[1.0],
        CmaOptions {
            popsize: Some(4),
            max_fevals: Some(8),
            seed: Some(1),
            ..Default::default()
        },
    )
    .unwrap();
    for _ in 0..2 {
        assert_eq!(es.stop(), None);
        let xs = es.ask();
        let costs: Vec<f64> = xs.iter().map(|x| sphere(x)).collect();
        es.tell(&xs, &costs).unwrap();
    }
    assert_eq!(es.stop(), Some(StopReason::MaxFevals));
    assert_eq!(es.evaluations(), 8);
}

#[rstest]
#[case(1, 4)]
#[case(3, 7)]
#[case(10, 10)]
fn test_default_popsize(#[case] n: usize, #[case] expected: usize) {
    assert_eq!(default_popsize(n), expected);
}

#[test]
fn test_state_round_trip_resumes_sampling() {
    let mut es = strategy(21);
    let xs = es.ask();
    let costs: Vec<f64> = xs.iter().map(|x| sphere(x)).collect();
    es.tell(&xs, &costs).unwrap();

    let json = serde_json::to_string(&es.to_state()).unwrap();
    let state: CmaState = serde_json::from_str(&json).unwrap();
    let mut resumed = CmaEs::from_state(state).unwrap();

    assert_eq!(resumed.generation(), es.generation());
    assert_eq!(resumed.mean(), es.mean());
    assert_eq!(resumed.ask(), es.ask());
}

#[test]
fn test_percentiles() {
    assert_eq!(prctile(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.5);
    assert_eq!(prctile(&[4.0, 1.0], 0.0), 1.0);
    assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
    assert_eq!(median(&[3.0, 1.0, 2.0, 10.0]), 2.5);
    assert!(median(&[]).is_nan());
}

#[test]
fn test_noise_handler_cycle() {
    let mut es = strategy(8);
    let mut noise = NoiseHandler::new(2, 1, 4, Some(2));
    let mut rng = fastrand::Rng::with_seed(4);

    let xs = es.ask();
    let costs: Vec<f64> = xs.iter().map(|x| sphere(x) + rng.f64()).collect();
    es.tell(&xs, &costs).unwrap();

    noise.prepare(&xs, &costs);
    assert!(!noise.is_done());
    let mut rounds = 0;
    while let Some(batch) = noise.ask(&mut es) {
        assert_eq!(batch.len(), noise.n_evals());
        let values: Vec<f64> = batch.iter().map(|x| sphere(x) + rng.f64()).collect();
        noise.tell(&values);
        rounds += 1;
    }

    assert!(rounds > 0);
    assert!(noise.is_done());
    let factor = noise.sigma_fac().unwrap();
    assert!(factor >= 1.0);
    assert!((1..=4).contains(&noise.n_evals()));
    assert_eq!(noise.evaluations_just_done, rounds);
}

fn record(index: u64, cost: f64) -> EvaluationRecord {
    EvaluationRecord {
        index,
        params: vec![index as f64, 0.1 + index as f64],
        cost,
        status: if cost.is_nan() {
            EvaluationStatus::Exception
        } else {
            EvaluationStatus::Success
        },
        input_path: None,
        output_path: None,
        message: None,
    }
}

#[test]
fn test_checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let es = strategy(9);
    let noise = NoiseHandler::new(2, 1, 3, Some(1));
    let records = vec![record(0, 1.5), record(1, f64::NAN)];

    assert!(!checkpoint::exists(dir.path()));
    checkpoint::save(dir.path(), &es, &records, Some(&noise)).unwrap();
    assert!(checkpoint::exists(dir.path()));

    let saved = checkpoint::load(dir.path()).unwrap();
    assert_eq!(saved.strategy.mean(), es.mean());
    assert_eq!(saved.records.len(), 2);
    assert_eq!(saved.records[0], records[0]);
    assert!(saved.records[1].cost.is_nan());
    assert_eq!(saved.noise, Some(noise));
}

#[test]
fn test_checkpoint_version_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    checkpoint::save(dir.path(), &strategy(1), &[], None).unwrap();

    let path = dir.path().join(STRATEGY_FILE);
    let mut doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    doc["version"] = serde_json::json!(99);
    fs::write(&path, doc.to_string()).unwrap();

    match checkpoint::load(dir.path()) {
        Err(ArrayForgeError::Checkpoint(m)) => assert!(m.contains("version")),
        other => panic!("expected Checkpoint error, got {:?}", other.map(|c| c.records.len())),
    }
}
