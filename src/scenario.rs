use crate::error::{AfResult, ArrayForgeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Read access to named engineering values.
pub trait DataStore {
    fn get_value(&self, name: &str) -> Option<&Value>;

    fn has_value(&self, name: &str) -> bool {
        self.get_value(name).is_some()
    }

    fn get_number(&self, name: &str) -> AfResult<f64> {
        self.get_value(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                ArrayForgeError::Configuration(format!(
                    "Variable '{}' is not available as a number",
                    name
                ))
            })
    }
}

/// Regular depth raster. Row `r`, column `c` sits at
/// `(origin.0 + c * dx, origin.1 + r * dy)`. Depths are negative below the
/// surface; `None` marks cells without data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bathymetry {
    pub origin: (f64, f64),
    pub dx: f64,
    pub dy: f64,
    pub depths: Vec<Vec<Option<f64>>>,
}

impl Bathymetry {
    /// Builds a raster of constant depth covering the given extent.
    pub fn flat(min: (f64, f64), max: (f64, f64), spacing: f64, depth: f64) -> Self {
        let ncols = ((max.0 - min.0) / spacing).ceil() as usize + 1;
        let nrows = ((max.1 - min.1) / spacing).ceil() as usize + 1;
        Self {
            origin: min,
            dx: spacing,
            dy: spacing,
            depths: vec![vec![Some(depth); ncols]; nrows],
        }
    }

    pub fn depth_at(&self, x: f64, y: f64) -> Option<f64> {
        let c = ((x - self.origin.0) / self.dx).round();
        let r = ((y - self.origin.1) / self.dy).round();
        if c < 0.0 || r < 0.0 {
            return None;
        }
        self.depths
            .get(r as usize)
            .and_then(|row| row.get(c as usize))
            .copied()
            .flatten()
    }
}

fn default_min_depth() -> f64 {
    f64::NEG_INFINITY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteModel {
    pub lease: Vec<(f64, f64)>,
    #[serde(default)]
    pub nogo: Vec<Vec<(f64, f64)>>,
    #[serde(default)]
    pub bathymetry: Option<Bathymetry>,
    #[serde(default = "default_min_depth")]
    pub min_depth: f64,
    #[serde(default)]
    pub max_depth: f64,
    pub min_separation: (f64, f64),
    #[serde(default)]
    pub lease_padding: Option<f64>,
}

impl SiteModel {
    pub fn rectangle(width: f64, height: f64, min_separation: (f64, f64)) -> Self {
        Self {
            lease: vec![(0.0, 0.0), (width, 0.0), (width, height), (0.0, height)],
            nogo: Vec::new(),
            bathymetry: None,
            min_depth: default_min_depth(),
            max_depth: 0.0,
            min_separation,
            lease_padding: None,
        }
    }
}

/// The scenario artifact shipped to workers: a site plus named variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub site: SiteModel,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub layout: Option<Vec<(f64, f64)>>,
}

impl Scenario {
    pub fn new(site: SiteModel) -> Self {
        Self {
            site,
            variables: BTreeMap::new(),
            layout: None,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> AfResult<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> AfResult<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Serializes into the worker input artifact, mapping every failure to
    /// `Serialization` so callers can attribute it.
    pub fn dump_for_worker(&self, path: &Path) -> AfResult<()> {
        let body = serde_json::to_vec(self)
            .map_err(|e| ArrayForgeError::Serialization(e.to_string()))?;
        fs::write(path, body).map_err(|e| {
            ArrayForgeError::Serialization(format!("{}: {}", path.display(), e))
        })
    }

    pub fn set_value(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }
}

impl DataStore for Scenario {
    fn get_value(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}
