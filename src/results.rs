use crate::error::AfResult;
use crate::geometry::LayoutParameters;
use crate::optimizer::cache::{EvaluationRecord, EvaluationStatus};
use crate::optimizer::checkpoint;
use crate::worker::{self, ResultsControl, WorkerResult, FAVORITE_TAG};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;
use tracing::{debug, warn};

pub fn favorite_path(dir: &Path, root: &str) -> PathBuf {
    worker::result_path(dir, root, FAVORITE_TAG)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub index: u64,
    pub status: EvaluationStatus,
    pub cost: f64,
    pub params: Vec<f64>,
    /// One entry per auxiliary name, in table order.
    pub values: Vec<Option<f64>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub counts: Vec<(EvaluationStatus, usize)>,
    pub total: usize,
    pub best: Option<(u64, f64)>,
}

impl StatusSummary {
    pub fn count(&self, status: EvaluationStatus) -> usize {
        self.counts
            .iter()
            .find(|(s, _)| *s == status)
            .map_or(0, |(_, n)| *n)
    }
}

/// Consolidated view of a worker directory: one row per ledger record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultsTable {
    pub param_names: Vec<String>,
    pub aux_names: Vec<String>,
    pub rows: Vec<ResultRow>,
}

fn number_field(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

impl ResultsTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Lowest finite cost among successful rows.
    pub fn best(&self) -> Option<&ResultRow> {
        self.rows
            .iter()
            .filter(|r| r.status == EvaluationStatus::Success && r.cost.is_finite())
            .min_by(|a, b| a.cost.total_cmp(&b.cost))
    }

    pub fn summary(&self) -> StatusSummary {
        let counts = EvaluationStatus::iter()
            .map(|s| (s, self.rows.iter().filter(|r| r.status == s).count()))
            .collect();
        StatusSummary {
            counts,
            total: self.rows.len(),
            best: self.best().map(|r| (r.index, r.cost)),
        }
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> AfResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = vec!["index".to_string(), "status".to_string(), "cost".to_string()];
        header.extend(self.param_names.iter().cloned());
        header.extend(self.aux_names.iter().cloned());
        header.push("message".to_string());
        wtr.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![row.index.to_string(), row.status.to_string(), number_field(row.cost)];
            record.extend(
                (0..self.param_names.len())
                    .map(|i| row.params.get(i).map(|v| number_field(*v)).unwrap_or_default()),
            );
            record.extend(
                row.values
                    .iter()
                    .map(|v| v.map(number_field).unwrap_or_default()),
            );
            record.push(row.message.clone().unwrap_or_default());
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv_file<P: AsRef<Path>>(&self, path: P) -> AfResult<()> {
        self.write_csv(File::create(path)?)
    }
}

/// Reads the ledger and result artifacts left in a worker directory.
#[derive(Debug, Clone)]
pub struct ResultPostProcessor {
    worker_dir: PathBuf,
    root: String,
}

impl ResultPostProcessor {
    pub fn new<P: Into<PathBuf>>(worker_dir: P, root: impl Into<String>) -> Self {
        Self {
            worker_dir: worker_dir.into(),
            root: root.into(),
        }
    }

    fn aux_values(&self, record: &EvaluationRecord, names: &[String]) -> Vec<Option<f64>> {
        let result = record
            .output_path
            .as_deref()
            .filter(|p| p.exists())
            .and_then(|p| match WorkerResult::load(p) {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!("Skipping unreadable result {}: {}", p.display(), e);
                    None
                }
            });
        names
            .iter()
            .map(|name| result.as_ref().and_then(|r| r.value(name)))
            .collect()
    }

    pub fn collect(&self) -> AfResult<ResultsTable> {
        let mut records = checkpoint::load_records(&self.worker_dir)?;
        records.sort_by_key(|r| r.index);

        let aux_names = match ResultsControl::load(&self.worker_dir) {
            Ok(control) => control.results_params,
            Err(e) => {
                debug!("No results control in {}: {}", self.worker_dir.display(), e);
                Vec::new()
            }
        };
        let width = records.iter().map(|r| r.params.len()).max().unwrap_or(0);
        let param_names = LayoutParameters::NAMES
            .iter()
            .take(width)
            .map(|n| n.to_string())
            .collect();

        let rows = records
            .iter()
            .map(|record| ResultRow {
                index: record.index,
                status: record.status,
                cost: record.cost,
                params: record.params.clone(),
                values: self.aux_values(record, &aux_names),
                message: record.message.clone(),
            })
            .collect();

        Ok(ResultsTable {
            param_names,
            aux_names,
            rows,
        })
    }

    /// The favorite artifact, if the run has finished.
    pub fn favorite(&self) -> AfResult<Option<WorkerResult>> {
        let path = favorite_path(&self.worker_dir, &self.root);
        if !path.exists() {
            return Ok(None);
        }
        WorkerResult::load(&path).map(Some)
    }

    pub fn summary(&self) -> AfResult<StatusSummary> {
        Ok(self.collect()?.summary())
    }
}
