use super::cache::EvaluationRecord;
use super::cma::{CmaEs, CmaState};
use super::noise::NoiseHandler;
use crate::error::{AfResult, ArrayForgeError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 1;
pub const STRATEGY_FILE: &str = "saved-strategy.json";
pub const LEDGER_FILE: &str = "saved-ledger.json";
pub const NOISE_FILE: &str = "saved-noise.json";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    state: T,
}

fn write_atomic<T: Serialize>(dir: &Path, name: &str, state: T) -> AfResult<()> {
    let envelope = Envelope {
        version: SCHEMA_VERSION,
        state,
    };
    let tmp = dir.join(format!("{}.tmp", name));
    fs::write(&tmp, serde_json::to_vec(&envelope)?)?;
    fs::rename(&tmp, dir.join(name))?;
    Ok(())
}

fn read<T: DeserializeOwned>(dir: &Path, name: &str) -> AfResult<T> {
    let path = dir.join(name);
    let content = fs::read(&path)
        .map_err(|e| ArrayForgeError::Checkpoint(format!("{}: {}", path.display(), e)))?;
    let envelope: Envelope<T> = serde_json::from_slice(&content)
        .map_err(|e| ArrayForgeError::Checkpoint(format!("{}: {}", path.display(), e)))?;
    if envelope.version != SCHEMA_VERSION {
        return Err(ArrayForgeError::Checkpoint(format!(
            "{} has schema version {}, expected {}",
            path.display(),
            envelope.version,
            SCHEMA_VERSION
        )));
    }
    Ok(envelope.state)
}

/// Everything needed to resume a run at a generation boundary.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub strategy: CmaEs,
    pub records: Vec<EvaluationRecord>,
    pub noise: Option<NoiseHandler>,
}

pub fn exists(dir: &Path) -> bool {
    [STRATEGY_FILE, LEDGER_FILE, NOISE_FILE]
        .iter()
        .all(|f| dir.join(f).exists())
}

pub fn save(
    dir: &Path,
    strategy: &CmaEs,
    records: &[EvaluationRecord],
    noise: Option<&NoiseHandler>,
) -> AfResult<()> {
    write_atomic(dir, STRATEGY_FILE, strategy.to_state())?;
    write_atomic(dir, LEDGER_FILE, records)?;
    write_atomic(dir, NOISE_FILE, noise)?;
    Ok(())
}

/// Ledger records only, for reporting.
pub fn load_records(dir: &Path) -> AfResult<Vec<EvaluationRecord>> {
    read(dir, LEDGER_FILE)
}

pub fn load(dir: &Path) -> AfResult<Checkpoint> {
    let state: CmaState = read(dir, STRATEGY_FILE)?;
    Ok(Checkpoint {
        strategy: CmaEs::from_state(state)?,
        records: read(dir, LEDGER_FILE)?,
        noise: read(dir, NOISE_FILE)?,
    })
}
