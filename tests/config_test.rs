mod common;

use arrayforge::config::{
    config_status, optimiser_status, worker_dir_status, OptimiserConfig, RunOptions, RunOverrides,
    REQUIRED_KEYS,
};
use arrayforge::error::ArrayForgeError;
use arrayforge::optimizer::checkpoint;
use arrayforge::optimizer::cma::{CmaEs, CmaOptions};
use arrayforge::results::favorite_path;
use common::TestContext;
use rstest::rstest;
use std::fs;

#[test]
fn test_empty_config_lists_every_required_key() {
    let cfg = OptimiserConfig::default();
    assert_eq!(cfg.missing_keys(), REQUIRED_KEYS.to_vec());
    assert_eq!(config_status(&cfg).1, 0);
    assert_eq!(worker_dir_status(&cfg).1, 0);
    assert_eq!(optimiser_status(&cfg), (None, 0));

    match RunOptions::try_from(&cfg) {
        Err(ArrayForgeError::Configuration(m)) => assert!(m.contains("objective")),
        other => panic!("expected configuration error, got {:?}", other.map(|o| o.n_threads)),
    }
}

#[test]
fn test_load_applies_defaults() {
    let ctx = TestContext::new();
    let path = ctx.path("config.json");
    fs::write(
        &path,
        r#"{
            "root_project_path": "farm.scenario.json",
            "worker_dir": "work",
            "base_penalty": 1e6,
            "n_threads": 4,
            "objective": "annual_energy",
            "parameters": {
                "grid_orientation": { "range": { "type": "fixed", "min": -90, "max": 90 } },
                "n_nodes": { "fixed": 10 }
            }
        }"#,
    )
    .unwrap();

    let cfg = OptimiserConfig::load_from_file(&path).unwrap();
    assert!(cfg.missing_keys().is_empty());
    assert_eq!(cfg.tolfun, 1e-11);
    assert_eq!(cfg.pause_file, "pause");
    assert_eq!(cfg.scenario_modules, vec!["layout".to_string()]);
    assert_eq!(cfg.root_name(), "farm");
    assert_eq!(cfg.parameters.as_ref().unwrap()["n_nodes"].fixed, Some(10.0));
}

#[test]
fn test_malformed_config_is_configuration_error() {
    let ctx = TestContext::new();
    let path = ctx.path("broken.json");
    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        OptimiserConfig::load_from_file(&path),
        Err(ArrayForgeError::Configuration(_))
    ));
    assert!(matches!(
        OptimiserConfig::load_from_file(ctx.path("missing.json")),
        Err(ArrayForgeError::Configuration(_))
    ));
}

#[rstest]
#[case::no_threads(|c: &mut OptimiserConfig| c.n_threads = Some(0))]
#[case::empty_command(|c: &mut OptimiserConfig| c.worker_command = Some(Vec::new()))]
#[case::infinite_penalty(|c: &mut OptimiserConfig| c.base_penalty = Some(f64::INFINITY))]
fn test_invalid_settings_rejected(#[case] edit: fn(&mut OptimiserConfig)) {
    let ctx = TestContext::new();
    let mut cfg = ctx.config();
    edit(&mut cfg);
    assert!(matches!(
        RunOptions::try_from(&cfg),
        Err(ArrayForgeError::Configuration(_))
    ));
}

#[test]
fn test_run_options_derived_fields() {
    let ctx = TestContext::new();
    let options = ctx.options();
    assert_eq!(options.root_name, "farm");
    assert_eq!(options.pause_path, ctx.worker_dir.join("pause"));
    assert_eq!(options.min_evals, 1);
    assert_eq!(options.worker_command, vec!["unused".to_string()]);
}

#[test]
fn test_dump_clears_clean_flag() {
    let ctx = TestContext::new();
    let mut cfg = ctx.config();
    cfg.clean_existing_dir = true;
    let path = ctx.path("dumped.json");
    cfg.dump(&path).unwrap();

    let reloaded = OptimiserConfig::load_from_file(&path).unwrap();
    assert!(!reloaded.clean_existing_dir);
    assert_eq!(reloaded.parameters, cfg.parameters);
    assert_eq!(reloaded.seed, Some(7));
}

#[test]
fn test_overrides() {
    let ctx = TestContext::new();
    let mut cfg = ctx.config();
    RunOverrides {
        n_threads: Some(6),
        seed: Some(42),
        clean_existing_dir: true,
        ..Default::default()
    }
    .apply(&mut cfg);

    assert_eq!(cfg.n_threads, Some(6));
    assert_eq!(cfg.seed, Some(42));
    assert_eq!(cfg.popsize, Some(4));
    assert!(cfg.clean_existing_dir);
}

#[test]
fn test_worker_dir_states() {
    let ctx = TestContext::new();
    let mut cfg = ctx.config();
    assert_eq!(config_status(&cfg).1, 1);
    assert_eq!(worker_dir_status(&cfg).1, 1);

    fs::create_dir_all(&ctx.worker_dir).unwrap();
    assert_eq!(worker_dir_status(&cfg).0, "Worker directory is empty");

    fs::write(ctx.worker_dir.join("junk"), "x").unwrap();
    assert_eq!(worker_dir_status(&cfg).1, 0);
    cfg.clean_existing_dir = true;
    assert_eq!(worker_dir_status(&cfg).1, 2);
}

#[test]
fn test_optimiser_states() {
    let ctx = TestContext::new();
    let cfg = ctx.config();
    fs::create_dir_all(&ctx.worker_dir).unwrap();
    assert_eq!(optimiser_status(&cfg).1, 0);

    let es = CmaEs::new(&[0.5], &[0.0], &[1.0], CmaOptions::default()).unwrap();
    checkpoint::save(&ctx.worker_dir, &es, &[], None).unwrap();
    assert_eq!(optimiser_status(&cfg).1, 2);

    fs::write(favorite_path(&ctx.worker_dir, "farm"), "{}").unwrap();
    let (message, code) = optimiser_status(&cfg);
    assert_eq!(code, 1);
    assert_eq!(message.as_deref(), Some("Optimisation complete"));
}
