use super::scaler::NormScaler;
use crate::config::{InterpSpec, ParameterSpec, RangeSpec};
use crate::error::{AfResult, ArrayForgeError};
use crate::geometry::LayoutParameters;
use crate::scenario::DataStore;
use std::collections::BTreeMap;
use std::f64::consts::FRAC_PI_2;

/// Quantisation applied to a descaled value.
#[derive(Debug, Clone, PartialEq)]
pub enum Snap {
    /// Nearest of a fixed set of values, halves rounding up.
    Nearest(Vec<f64>),
    /// Nearest point of `min + k * delta` inside `[min, max]`.
    Lattice { min: f64, max: f64, delta: f64 },
    Floor,
}

impl Snap {
    pub fn nearest(mut values: Vec<f64>) -> AfResult<Self> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return Err(ArrayForgeError::Configuration(
                "Interpolation values must be a non-empty list of numbers".to_string(),
            ));
        }
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        Ok(Self::Nearest(values))
    }

    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Self::Floor => value.floor(),
            Self::Nearest(values) => {
                let idx = values.partition_point(|v| *v < value);
                if idx == 0 {
                    return values[0];
                }
                if idx == values.len() {
                    return values[values.len() - 1];
                }
                let (lo, hi) = (values[idx - 1], values[idx]);
                if value - lo < hi - value {
                    lo
                } else {
                    hi
                }
            }
            Self::Lattice { min, max, delta } => {
                let k_max = ((max - min) / delta + 1e-9).floor().max(0.0);
                let k = ((value - min) / delta + 0.5).floor().clamp(0.0, k_max);
                min + k * delta
            }
        }
    }
}

/// Compass bearing in degrees to the positioner's angle in radians.
pub fn bearing_to_radians(degrees: f64) -> f64 {
    FRAC_PI_2 - degrees.to_radians()
}

#[derive(Debug, Clone)]
pub struct SearchParameter {
    pub name: String,
    pub position: usize,
    pub scaler: NormScaler,
    pub snap: Option<Snap>,
}

/// Partition of the layout parameters into fixed values and searched
/// ranges. Searched values live in configuration units until `resolve`.
#[derive(Debug, Clone)]
pub struct ParamControl {
    pub fixed: BTreeMap<usize, f64>,
    pub searched: Vec<SearchParameter>,
    pub n_params: usize,
}

fn to_physical(name: &str, value: f64) -> f64 {
    if name == "grid_orientation" {
        bearing_to_radians(value)
    } else {
        value
    }
}

fn resolve_range(name: &str, range: &RangeSpec, store: &dyn DataStore) -> AfResult<(f64, f64)> {
    let (lo, hi) = match range {
        RangeSpec::Fixed { min, max } => (*min, *max),
        RangeSpec::Multiplier {
            variable,
            min_multiplier,
            max_multiplier,
        } => {
            let base = store.get_number(variable)?;
            (base * min_multiplier, base * max_multiplier)
        }
    };
    if !(lo.is_finite() && hi.is_finite()) || hi < lo {
        return Err(ArrayForgeError::Configuration(format!(
            "Parameter '{}' has invalid range [{}, {}]",
            name, lo, hi
        )));
    }
    Ok((lo, hi))
}

fn snap_for(name: &str, spec: &ParameterSpec, lo: f64, hi: f64) -> AfResult<Option<Snap>> {
    match &spec.interp {
        Some(InterpSpec::Fixed { values }) => Ok(Some(Snap::nearest(values.clone())?)),
        Some(InterpSpec::Range { delta }) => {
            if !(*delta > 0.0) {
                return Err(ArrayForgeError::Configuration(format!(
                    "Parameter '{}' requires a positive interpolation delta",
                    name
                )));
            }
            Ok(Some(Snap::Lattice {
                min: lo,
                max: hi,
                delta: *delta,
            }))
        }
        None if spec.integer => Ok(Some(Snap::Floor)),
        None => Ok(None),
    }
}

impl ParamControl {
    pub fn build(
        parameters: &BTreeMap<String, ParameterSpec>,
        store: &dyn DataStore,
    ) -> AfResult<Self> {
        for name in parameters.keys() {
            if !LayoutParameters::NAMES.contains(&name.as_str()) {
                return Err(ArrayForgeError::Configuration(format!(
                    "Unknown parameter '{}'",
                    name
                )));
            }
        }

        let n_params = if parameters.contains_key("dev_per_string") {
            7
        } else {
            6
        };

        let mut fixed = BTreeMap::new();
        let mut searched = Vec::new();

        for (position, name) in LayoutParameters::NAMES.iter().take(n_params).enumerate() {
            let spec = parameters.get(*name).ok_or_else(|| {
                ArrayForgeError::Configuration(format!("Parameter '{}' is not configured", name))
            })?;

            match (&spec.fixed, &spec.range) {
                (Some(value), None) => {
                    fixed.insert(position, to_physical(name, *value));
                }
                (None, Some(range)) => {
                    let (lo, hi) = resolve_range(name, range, store)?;
                    let scaler = NormScaler::new(lo, hi, spec.x0).map_err(|e| {
                        ArrayForgeError::Configuration(format!("Parameter '{}': {}", name, e))
                    })?;
                    searched.push(SearchParameter {
                        name: name.to_string(),
                        position,
                        scaler,
                        snap: snap_for(name, spec, lo, hi)?,
                    });
                }
                _ => {
                    return Err(ArrayForgeError::Configuration(format!(
                        "Parameter '{}' must define exactly one of 'fixed' or 'range'",
                        name
                    )))
                }
            }
        }

        if searched.is_empty() {
            return Err(ArrayForgeError::Configuration(
                "At least one parameter must be searched".to_string(),
            ));
        }

        Ok(Self {
            fixed,
            searched,
            n_params,
        })
    }

    pub fn dimension(&self) -> usize {
        self.searched.len()
    }

    pub fn x0(&self) -> Vec<f64> {
        self.searched.iter().map(|p| p.scaler.x0()).collect()
    }

    pub fn bounds(&self) -> (Vec<f64>, Vec<f64>) {
        self.searched
            .iter()
            .map(|p| p.scaler.scaled_bounds())
            .unzip()
    }

    /// Descales, snaps and reinserts fixed values, giving the full physical
    /// parameter vector.
    pub fn resolve(&self, normalised: &[f64]) -> Vec<f64> {
        let mut values = vec![0.0; self.n_params];
        for (position, value) in &self.fixed {
            values[*position] = *value;
        }
        for (param, x) in self.searched.iter().zip(normalised) {
            let mut v = param.scaler.inverse(*x);
            if let Some(snap) = &param.snap {
                v = snap.apply(v);
            }
            values[param.position] = to_physical(&param.name, v);
        }
        values
    }
}
