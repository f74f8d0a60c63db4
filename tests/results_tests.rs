mod common;

use arrayforge::optimizer::cache::{EvaluationRecord, EvaluationStatus};
use arrayforge::optimizer::checkpoint;
use arrayforge::optimizer::Driver;
use arrayforge::results::{ResultPostProcessor, ResultRow, ResultsTable};
use common::{FakeLauncher, FakeMode, TestContext};

fn finished_run(mode: FakeMode) -> TestContext {
    let ctx = TestContext::new();
    let launcher = FakeLauncher::new(mode);
    Driver::with_launcher(ctx.options(), common::scenario(), Box::new(launcher), false)
        .unwrap()
        .run(None)
        .unwrap();
    ctx
}

#[test]
fn test_collect_matches_ledger() {
    let ctx = finished_run(FakeMode::Succeed);
    let processor = ResultPostProcessor::new(&ctx.worker_dir, "farm");
    let table = processor.collect().unwrap();
    let records = checkpoint::load_records(&ctx.worker_dir).unwrap();

    assert_eq!(table.len(), records.len());
    assert_eq!(table.aux_names, vec!["n_devices".to_string()]);
    assert_eq!(table.param_names.len(), 6);
    assert_eq!(table.param_names[0], "grid_orientation");

    let mut seen = false;
    for row in table.rows.iter().filter(|r| r.status == EvaluationStatus::Success) {
        if let Some(n) = row.values[0] {
            assert_eq!(n, 5.0);
            seen = true;
        }
    }
    assert!(seen, "expected at least one auxiliary value");

    let summary = processor.summary().unwrap();
    let counted: usize = summary.counts.iter().map(|(_, n)| n).sum();
    assert_eq!(counted, summary.total);
    assert!(summary.best.is_some());
}

#[test]
fn test_favorite_available_after_run() {
    let ctx = finished_run(FakeMode::Succeed);
    let processor = ResultPostProcessor::new(&ctx.worker_dir, "farm");
    let favorite = processor.favorite().unwrap().expect("favorite result");
    assert!(favorite.value("annual_energy").is_some());
}

#[test]
fn test_favorite_missing_before_run() {
    let ctx = TestContext::new();
    std::fs::create_dir_all(&ctx.worker_dir).unwrap();
    let processor = ResultPostProcessor::new(&ctx.worker_dir, "farm");
    assert!(processor.favorite().unwrap().is_none());
    assert!(processor.collect().is_err());
}

#[test]
fn test_exception_rows_have_no_best() {
    let ctx = finished_run(FakeMode::Exception);
    let summary = ResultPostProcessor::new(&ctx.worker_dir, "farm")
        .summary()
        .unwrap();
    assert_eq!(summary.best, None);
    assert_eq!(summary.count(EvaluationStatus::Success), 0);
    assert!(summary.count(EvaluationStatus::Exception) > 0);
}

fn row(index: u64, status: EvaluationStatus, cost: f64) -> ResultRow {
    ResultRow {
        index,
        status,
        cost,
        params: vec![1.0, 2.5],
        values: vec![if cost.is_nan() { None } else { Some(7.0) }],
        message: None,
    }
}

#[test]
fn test_csv_output() {
    let table = ResultsTable {
        param_names: vec!["grid_orientation".to_string(), "delta_row".to_string()],
        aux_names: vec!["n_devices".to_string()],
        rows: vec![
            row(0, EvaluationStatus::Success, -12.5),
            row(1, EvaluationStatus::Exception, f64::NAN),
            ResultRow {
                message: Some("insufficient nodes".to_string()),
                ..row(2, EvaluationStatus::Rejected, 3e6)
            },
        ],
    };
    assert_eq!(table.best().map(|r| r.index), Some(0));

    let mut buf = Vec::new();
    table.write_csv(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "index,status,cost,grid_orientation,delta_row,n_devices,message");
    assert_eq!(lines[1], "0,Success,-12.5,1,2.5,7,");
    assert_eq!(lines[2], "1,Exception,,1,2.5,,");
    assert_eq!(lines[3], "2,Rejected,3000000,1,2.5,7,insufficient nodes");
}

#[test]
fn test_csv_file_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.csv");
    let record = EvaluationRecord {
        index: 0,
        params: vec![0.0],
        cost: 1.0,
        status: EvaluationStatus::Success,
        input_path: None,
        output_path: None,
        message: None,
    };
    let table = ResultsTable {
        param_names: vec!["grid_orientation".to_string()],
        aux_names: Vec::new(),
        rows: vec![ResultRow {
            index: record.index,
            status: record.status,
            cost: record.cost,
            params: record.params.clone(),
            values: Vec::new(),
            message: None,
        }],
    };
    table.write_csv_file(&path).unwrap();

    let mut reader = csv::Reader::from_path(&path).unwrap();
    assert_eq!(reader.records().count(), 1);
}
