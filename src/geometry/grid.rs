use crate::error::{AfResult, ArrayForgeError};
use geo::{Coord, Rect};
use std::f64::consts::{FRAC_PI_2, PI};

/// Grids beyond this many nodes are treated as a degenerate request.
pub const MAX_GRID_NODES: usize = 4_000_000;

/// A skewed lattice. Row steps follow `beta`, column steps follow `psi`,
/// and the whole lattice is rotated by `orientation - pi/2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub orientation: f64,
    pub delta_row: f64,
    pub delta_col: f64,
    pub beta: f64,
    pub psi: f64,
}

impl GridSpec {
    pub fn validate(&self) -> AfResult<()> {
        if !(self.delta_row > 0.0) {
            return Err(ArrayForgeError::GeometryConstraint(
                "Argument 'delta_row' must be greater than zero".to_string(),
            ));
        }
        if !(self.delta_col > 0.0) {
            return Err(ArrayForgeError::GeometryConstraint(
                "Argument 'delta_col' must be greater than zero".to_string(),
            ));
        }
        if !(self.beta > 0.0 && self.beta < PI) {
            return Err(ArrayForgeError::GeometryConstraint(
                "Argument 'beta' must lie in the range (0, pi)".to_string(),
            ));
        }
        if !(self.psi > -FRAC_PI_2 && self.psi < FRAC_PI_2) {
            return Err(ArrayForgeError::GeometryConstraint(
                "Argument 'psi' must lie in the range (-pi/2, pi/2)".to_string(),
            ));
        }
        if !self.orientation.is_finite() {
            return Err(ArrayForgeError::GeometryConstraint(
                "Argument 'array_orientation' must be finite".to_string(),
            ));
        }
        if self.skew().abs() < 1e-9 {
            return Err(ArrayForgeError::GeometryConstraint(
                "Grid angles 'beta' and 'psi' produce collinear axes".to_string(),
            ));
        }
        Ok(())
    }

    /// Offset between neighbouring rows.
    pub fn row_step(&self) -> Coord<f64> {
        Coord {
            x: self.delta_row * self.beta.cos(),
            y: self.delta_row * self.beta.sin(),
        }
    }

    /// Offset between neighbouring columns.
    pub fn col_step(&self) -> Coord<f64> {
        Coord {
            x: self.delta_col * self.psi.cos(),
            y: self.delta_col * self.psi.sin(),
        }
    }

    fn skew(&self) -> f64 {
        (self.beta - self.psi).sin()
    }
}

fn outside_ellipse(v: Coord<f64>, min_separation: (f64, f64)) -> bool {
    let (a, b) = min_separation;
    (v.x / a).powi(2) + (v.y / b).powi(2) >= 1.0
}

/// Checks both lattice steps, and their sum and difference, against the
/// minimum separation ellipse.
pub fn spacing_is_valid(min_separation: (f64, f64), spec: &GridSpec) -> bool {
    let p1 = spec.row_step();
    let p2 = spec.col_step();
    let p3 = p2 - p1;
    let p4 = p1 + p2;

    [p1, p2, p3, p4]
        .iter()
        .all(|v| outside_ellipse(*v, min_separation))
}

fn odd(n: usize) -> usize {
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

/// Column and row counts that cover the bounding circle of `bounds`
/// for any orientation.
pub fn grid_size(spec: &GridSpec, bounds: &Rect<f64>) -> (usize, usize) {
    let diag = bounds.width().hypot(bounds.height()).max(f64::EPSILON);
    let skew = spec.skew().abs();
    let n_cols = (diag / (spec.delta_col * skew)).ceil() as usize + 1;
    let n_rows = (diag / (spec.delta_row * skew)).ceil() as usize + 1;
    (odd(n_cols), odd(n_rows))
}

/// Generates the rotated lattice centred on the bounding box.
pub fn generate(
    spec: &GridSpec,
    bounds: &Rect<f64>,
    add_rows: usize,
    add_cols: usize,
) -> AfResult<Vec<Coord<f64>>> {
    let (n_cols, n_rows) = grid_size(spec, bounds);
    let n_cols = n_cols + add_cols;
    let n_rows = n_rows + add_rows;

    if n_cols.saturating_mul(n_rows) > MAX_GRID_NODES {
        return Err(ArrayForgeError::GeometryConstraint(format!(
            "Grid of {} x {} nodes exceeds the maximum of {}",
            n_cols, n_rows, MAX_GRID_NODES
        )));
    }

    let col = spec.col_step();
    let row = spec.row_step();
    let centre = bounds.center();
    let (sin_r, cos_r) = (spec.orientation - FRAC_PI_2).sin_cos();
    let col_mid = (n_cols as f64 - 1.0) / 2.0;
    let row_mid = (n_rows as f64 - 1.0) / 2.0;

    let mut nodes = Vec::with_capacity(n_cols * n_rows);
    for j in 0..n_rows {
        let fj = j as f64 - row_mid;
        for i in 0..n_cols {
            let fi = i as f64 - col_mid;
            let x = col.x * fi + row.x * fj;
            let y = col.y * fi + row.y * fj;
            nodes.push(Coord {
                x: centre.x + x * cos_r - y * sin_r,
                y: centre.y + x * sin_r + y * cos_r,
            });
        }
    }

    Ok(nodes)
}
