use crate::error::{AfResult, ArrayForgeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use strum_macros::{Display, EnumIter, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum EvaluationStatus {
    Success,
    Exception,
    Rejected,
    FailSend,
    FailExecute,
    FailReceive,
}

/// JSON has no NaN, so costs travel as `null` when not a number.
pub(crate) mod nullable_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            s.serialize_none()
        } else {
            s.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub index: u64,
    pub params: Vec<f64>,
    #[serde(with = "nullable_f64")]
    pub cost: f64,
    pub status: EvaluationStatus,
    #[serde(default)]
    pub input_path: Option<PathBuf>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Exact match on every bit, so `0.0` and `-0.0` are different vectors.
pub fn same_params(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[derive(Debug, Default)]
struct Ledger {
    next: u64,
    records: Vec<EvaluationRecord>,
    positions: HashMap<u64, usize>,
}

/// Evaluation counter and append-only record ledger behind one mutex.
#[derive(Debug, Default)]
pub struct EvaluationCache {
    inner: Mutex<Ledger>,
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds from persisted records; counting resumes after the highest
    /// recorded index.
    pub fn from_records(records: Vec<EvaluationRecord>) -> AfResult<Self> {
        let mut ledger = Ledger::default();
        for record in records {
            if ledger.positions.contains_key(&record.index) {
                return Err(ArrayForgeError::LedgerConflict(record.index));
            }
            ledger.next = ledger.next.max(record.index + 1);
            ledger.positions.insert(record.index, ledger.records.len());
            ledger.records.push(record);
        }
        Ok(Self {
            inner: Mutex::new(ledger),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn next_index(&self) -> u64 {
        let mut ledger = self.lock();
        let index = ledger.next;
        ledger.next += 1;
        index
    }

    pub fn record(&self, record: EvaluationRecord) -> AfResult<()> {
        let mut ledger = self.lock();
        if ledger.positions.contains_key(&record.index) {
            return Err(ArrayForgeError::LedgerConflict(record.index));
        }
        let position = ledger.records.len();
        ledger.positions.insert(record.index, position);
        ledger.records.push(record);
        Ok(())
    }

    /// Cost of a previously recorded identical parameter vector. `None` means
    /// nothing matched; a recorded cost may itself be NaN.
    pub fn lookup_cost(&self, params: &[f64]) -> Option<f64> {
        self.lock()
            .records
            .iter()
            .find(|r| same_params(&r.params, params))
            .map(|r| r.cost)
    }

    pub fn get(&self, index: u64) -> Option<EvaluationRecord> {
        let ledger = self.lock();
        ledger
            .positions
            .get(&index)
            .map(|&p| ledger.records[p].clone())
    }

    /// Records ordered by evaluation index.
    pub fn snapshot(&self) -> Vec<EvaluationRecord> {
        let mut records = self.lock().records.clone();
        records.sort_by_key(|r| r.index);
        records
    }

    pub fn max_index(&self) -> Option<u64> {
        self.lock().records.iter().map(|r| r.index).max()
    }

    pub fn peek_next(&self) -> u64 {
        self.lock().next
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
