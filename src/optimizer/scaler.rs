use crate::error::{AfResult, ArrayForgeError};

/// Standard deviations of the search distribution spanned by the widest
/// side of a physical range.
pub const RANGE_N_SIGMAS: f64 = 3.0;
pub const SIGMA: f64 = 1.0;

/// Maps a physical range onto the normalised search coordinate. The larger
/// distance from `x0` to either bound covers `RANGE_N_SIGMAS` standard
/// deviations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormScaler {
    pub range_min: f64,
    pub range_max: f64,
    x0: f64,
    scale_factor: f64,
}

impl NormScaler {
    pub fn new(range_min: f64, range_max: f64, x0: Option<f64>) -> AfResult<Self> {
        if !(range_min.is_finite() && range_max.is_finite()) || range_max < range_min {
            return Err(ArrayForgeError::Configuration(format!(
                "Invalid parameter range [{}, {}]",
                range_min, range_max
            )));
        }

        let x0 = x0.unwrap_or((range_min + range_max) / 2.0);
        if x0 < range_min || x0 > range_max {
            return Err(ArrayForgeError::Configuration(
                "x0 must lie between range_min and range_max".to_string(),
            ));
        }

        let half_width = (range_max - x0).max(x0 - range_min);
        let scale_factor = if half_width > 0.0 {
            SIGMA * RANGE_N_SIGMAS / half_width
        } else {
            1.0
        };

        Ok(Self {
            range_min,
            range_max,
            x0,
            scale_factor,
        })
    }

    /// Normalised starting point.
    pub fn x0(&self) -> f64 {
        self.scaled(self.x0)
    }

    pub fn scaled(&self, value: f64) -> f64 {
        value * self.scale_factor
    }

    pub fn inverse(&self, value: f64) -> f64 {
        value / self.scale_factor
    }

    pub fn scaled_bounds(&self) -> (f64, f64) {
        (self.scaled(self.range_min), self.scaled(self.range_max))
    }
}
