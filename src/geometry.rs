pub mod grid;
pub mod hull;
pub mod selector;

use crate::error::{AfResult, ArrayForgeError};
use crate::scenario::{Bathymetry, SiteModel};
use geo::{BoundingRect, Coord, EuclideanDistance, Intersects, LineString, Point, Polygon, Rect};
use grid::GridSpec;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use tracing::debug;

pub use selector::{AllNodes, CompassAnchor, CompassPoint, NodeSelector, ParametricAnchor};

/// Row/column offsets tried when generating the grid. Each shifts the
/// lattice by half a step along one or both axes.
pub const GRID_PERTURBATIONS: [(usize, usize); 4] = [(0, 0), (0, 1), (1, 0), (1, 1)];

/// Physical layout parameters, in the order they travel through the
/// optimiser and the worker protocol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutParameters {
    pub array_orientation: f64,
    pub delta_row: f64,
    pub delta_col: f64,
    pub n_nodes: usize,
    pub t1: f64,
    pub t2: f64,
    pub dev_per_string: Option<u32>,
}

impl LayoutParameters {
    pub const NAMES: [&'static str; 7] = [
        "grid_orientation",
        "delta_row",
        "delta_col",
        "n_nodes",
        "t1",
        "t2",
        "dev_per_string",
    ];

    /// Builds from a resolved parameter vector. The seventh entry is
    /// optional.
    pub fn from_slice(values: &[f64]) -> AfResult<Self> {
        if values.len() < 6 || values.len() > 7 {
            return Err(ArrayForgeError::Configuration(format!(
                "Expected 6 or 7 layout parameters, got {}",
                values.len()
            )));
        }
        if !values[3].is_finite() || values[3] < 0.0 {
            return Err(ArrayForgeError::GeometryConstraint(format!(
                "Number of nodes must be a non-negative number, got {}",
                values[3]
            )));
        }
        let dev_per_string = match values.get(6) {
            Some(&v) if !v.is_finite() || v < 1.0 || v > u32::MAX as f64 => {
                return Err(ArrayForgeError::GeometryConstraint(format!(
                    "Devices per string must be a positive number, got {}",
                    v
                )));
            }
            Some(&v) => Some(v as u32),
            None => None,
        };
        Ok(Self {
            array_orientation: values[0],
            delta_row: values[1],
            delta_col: values[2],
            n_nodes: values[3] as usize,
            t1: values[4],
            t2: values[5],
            dev_per_string,
        })
    }

    pub fn to_vec(&self) -> Vec<f64> {
        let mut values = vec![
            self.array_orientation,
            self.delta_row,
            self.delta_col,
            self.n_nodes as f64,
            self.t1,
            self.t2,
        ];
        if let Some(d) = self.dev_per_string {
            values.push(d as f64);
        }
        values
    }

    /// Square lattice: rows at 90 degrees, columns at 0 degrees before
    /// rotation by the array orientation.
    pub fn grid(&self) -> GridSpec {
        GridSpec {
            orientation: self.array_orientation,
            delta_row: self.delta_row,
            delta_col: self.delta_col,
            beta: FRAC_PI_2,
            psi: 0.0,
        }
    }
}

/// Cells of the bathymetry raster whose depth is missing or outside the
/// allowed band.
#[derive(Debug, Clone)]
pub struct DepthExclusion {
    raster: Bathymetry,
    min_depth: f64,
    max_depth: f64,
}

impl DepthExclusion {
    pub fn new(raster: Bathymetry, min_depth: f64, max_depth: f64) -> Self {
        Self {
            raster,
            min_depth,
            max_depth,
        }
    }

    pub fn excludes(&self, c: Coord<f64>) -> bool {
        match self.raster.depth_at(c.x, c.y) {
            Some(d) => d < self.min_depth || d > self.max_depth,
            None => true,
        }
    }
}

/// Site geometry prepared once per run.
#[derive(Debug, Clone)]
pub struct PreparedSite {
    pub lease: Polygon<f64>,
    pub bounds: Rect<f64>,
    pub padding: f64,
    pub nogo: Vec<Polygon<f64>>,
    pub depth: Option<DepthExclusion>,
    pub min_separation: (f64, f64),
}

fn ring_to_polygon(ring: &[(f64, f64)]) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = ring.iter().map(|&(x, y)| Coord { x, y }).collect();
    Polygon::new(LineString::from(coords), vec![])
}

impl PreparedSite {
    pub fn new(site: &SiteModel) -> AfResult<Self> {
        if site.lease.len() < 3 {
            return Err(ArrayForgeError::Configuration(
                "Lease polygon requires at least three vertices".to_string(),
            ));
        }
        let (minx, miny) = site.min_separation;
        if minx <= 0.0 || miny <= 0.0 {
            return Err(ArrayForgeError::Configuration(
                "Minimum separation must be positive on both axes".to_string(),
            ));
        }

        let lease = ring_to_polygon(&site.lease);
        let bounds = lease.bounding_rect().ok_or_else(|| {
            ArrayForgeError::Configuration("Lease polygon has no extent".to_string())
        })?;

        let padding = site.lease_padding.unwrap_or(0.0).max(minx.max(miny) / 2.0);
        let depth = site
            .bathymetry
            .clone()
            .map(|raster| DepthExclusion::new(raster, site.min_depth, site.max_depth));

        Ok(Self {
            lease,
            bounds,
            padding,
            nogo: site.nogo.iter().map(|r| ring_to_polygon(r)).collect(),
            depth,
            min_separation: site.min_separation,
        })
    }

    pub fn is_feasible(&self, c: Coord<f64>) -> bool {
        let point = Point::from(c);
        if !self.lease.intersects(&point) {
            return false;
        }
        if self.padding > 0.0 && point.euclidean_distance(self.lease.exterior()) < self.padding {
            return false;
        }
        if self.nogo.iter().any(|p| p.intersects(&point)) {
            return false;
        }
        match &self.depth {
            Some(depth) => !depth.excludes(c),
            None => true,
        }
    }

    pub fn filter(&self, nodes: Vec<Coord<f64>>) -> Vec<Coord<f64>> {
        nodes.into_iter().filter(|c| self.is_feasible(*c)).collect()
    }
}

/// Grid generation, filtering and selection, shared by every selector.
pub fn position_nodes(
    site: &PreparedSite,
    spec: &GridSpec,
    n_nodes: usize,
    selector: &dyn NodeSelector,
) -> AfResult<Vec<Coord<f64>>> {
    // 1. Validate
    spec.validate()?;
    if !grid::spacing_is_valid(site.min_separation, spec) {
        return Err(ArrayForgeError::GeometryConstraint(format!(
            "Grid spacing (delta_row={}, delta_col={}) violates the minimum separation {:?}",
            spec.delta_row, spec.delta_col, site.min_separation
        )));
    }

    // 2. Generate + filter each perturbation, keep the largest
    let candidates = GRID_PERTURBATIONS
        .par_iter()
        .map(|&(add_rows, add_cols)| {
            grid::generate(spec, &site.bounds, add_rows, add_cols).map(|n| site.filter(n))
        })
        .collect::<AfResult<Vec<_>>>()?;

    let mut best: Vec<Coord<f64>> = Vec::new();
    for nodes in candidates {
        if nodes.len() > best.len() {
            best = nodes;
        }
    }
    debug!("Grid produced {} feasible nodes", best.len());

    // 3. Select
    if best.len() < n_nodes {
        return Err(ArrayForgeError::InsufficientNodes {
            expected: n_nodes,
            found: best.len(),
        });
    }

    let selected = selector.select(best, spec, n_nodes)?;
    if selected.len() < n_nodes {
        return Err(ArrayForgeError::InsufficientNodes {
            expected: n_nodes,
            found: selected.len(),
        });
    }

    Ok(selected)
}

/// Turns layout parameters into device coordinates for one site.
#[derive(Debug, Clone)]
pub struct Positioner {
    site: PreparedSite,
}

impl Positioner {
    pub fn new(site: &SiteModel) -> AfResult<Self> {
        Ok(Self {
            site: PreparedSite::new(site)?,
        })
    }

    pub fn is_grid_valid(&self, delta_row: f64, delta_col: f64, beta: f64, psi: f64) -> bool {
        let spec = GridSpec {
            orientation: FRAC_PI_2,
            delta_row,
            delta_col,
            beta,
            psi,
        };
        grid::spacing_is_valid(self.site.min_separation, &spec)
    }

    /// Places devices using the parametric anchor selector.
    pub fn place(&self, params: &LayoutParameters) -> AfResult<Vec<Coord<f64>>> {
        let selector = ParametricAnchor::new(params.t1, params.t2);
        self.place_with(params, &selector)
    }

    pub fn place_with(
        &self,
        params: &LayoutParameters,
        selector: &dyn NodeSelector,
    ) -> AfResult<Vec<Coord<f64>>> {
        position_nodes(&self.site, &params.grid(), params.n_nodes, selector)
    }
}
