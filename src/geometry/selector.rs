use super::grid::GridSpec;
use super::hull;
use crate::error::{AfResult, ArrayForgeError};
use geo::{
    Centroid, Closest, ClosestPoint, Contains, Coord, InteriorPoint, Intersects, MinimumRotatedRect,
    Polygon,
};
use std::f64::consts::FRAC_1_SQRT_2;
use strum_macros::{Display, EnumIter, EnumString};

/// Picks the final device nodes from the feasible grid nodes.
pub trait NodeSelector: Send + Sync {
    fn select(
        &self,
        nodes: Vec<Coord<f64>>,
        spec: &GridSpec,
        n_nodes: usize,
    ) -> AfResult<Vec<Coord<f64>>>;
}

/// The `n` nodes closest to `anchor`, nearest first. Ties keep grid order.
pub fn nearest_nodes(nodes: &[Coord<f64>], anchor: Coord<f64>, n: usize) -> Vec<Coord<f64>> {
    let mut order: Vec<(f64, usize)> = nodes
        .iter()
        .enumerate()
        .map(|(i, c)| ((c.x - anchor.x).powi(2) + (c.y - anchor.y).powi(2), i))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));
    order.into_iter().take(n).map(|(_, i)| nodes[i]).collect()
}

fn alpha_for(spec: &GridSpec) -> f64 {
    1.0 / spec.delta_row.max(spec.delta_col)
}

/// Every feasible node.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllNodes;

impl NodeSelector for AllNodes {
    fn select(&self, nodes: Vec<Coord<f64>>, _: &GridSpec, _: usize) -> AfResult<Vec<Coord<f64>>> {
        Ok(nodes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumIter, Display)]
#[strum(ascii_case_insensitive)]
pub enum CompassPoint {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
    C,
}

impl CompassPoint {
    pub fn direction(&self) -> Option<Coord<f64>> {
        let d = FRAC_1_SQRT_2;
        let (x, y) = match self {
            Self::N => (0.0, 1.0),
            Self::NE => (d, d),
            Self::E => (1.0, 0.0),
            Self::SE => (d, -d),
            Self::S => (0.0, -1.0),
            Self::SW => (-d, -d),
            Self::W => (-1.0, 0.0),
            Self::NW => (-d, d),
            Self::C => return None,
        };
        Some(Coord { x, y })
    }
}

/// Anchors the selection on the hull boundary in a compass direction seen
/// from the hull centroid, or on the centre itself. The centre is the
/// centroid when it lies inside the hull, otherwise an interior point.
#[derive(Debug, Clone, Copy)]
pub struct CompassAnchor {
    pub point: CompassPoint,
}

fn ray_exit(hull: &Polygon<f64>, origin: Coord<f64>, dir: Coord<f64>) -> Option<Coord<f64>> {
    let mut best: Option<f64> = None;
    for line in hull.exterior().lines() {
        let e = line.end - line.start;
        let denom = dir.x * e.y - dir.y * e.x;
        if denom.abs() < 1e-12 {
            continue;
        }
        let w = line.start - origin;
        let t = (w.x * e.y - w.y * e.x) / denom;
        let u = (w.x * dir.y - w.y * dir.x) / denom;
        if t >= 0.0 && (-1e-12..=1.0 + 1e-12).contains(&u) {
            best = Some(best.map_or(t, |b: f64| b.max(t)));
        }
    }
    best.map(|t| origin + dir * t)
}

impl CompassAnchor {
    pub fn new(point: CompassPoint) -> Self {
        Self { point }
    }

    pub fn anchor(&self, hull: &Polygon<f64>) -> AfResult<Coord<f64>> {
        let centre = hull
            .centroid()
            .ok_or_else(|| ArrayForgeError::GeometryConstraint("Hull has no centroid".to_string()))?;

        let Some(dir) = self.point.direction() else {
            if hull.contains(&centre) {
                return Ok(centre.0);
            }
            // Centroid outside a concave hull
            if let Some(p) = hull.interior_point().filter(|p| hull.intersects(p)) {
                return Ok(p.0);
            }
            return match hull.closest_point(&centre) {
                Closest::Intersection(p) | Closest::SinglePoint(p) => Ok(p.0),
                Closest::Indeterminate => Ok(centre.0),
            };
        };

        if let Some(exit) = ray_exit(hull, centre.0, dir) {
            return Ok(exit);
        }

        // Centroid outside a concave hull: take the most extreme vertex
        hull.exterior()
            .coords()
            .copied()
            .max_by(|a, b| {
                let pa = (a.x - centre.x()) * dir.x + (a.y - centre.y()) * dir.y;
                let pb = (b.x - centre.x()) * dir.x + (b.y - centre.y()) * dir.y;
                pa.total_cmp(&pb)
            })
            .ok_or_else(|| ArrayForgeError::GeometryConstraint("Hull is empty".to_string()))
    }
}

impl NodeSelector for CompassAnchor {
    fn select(
        &self,
        nodes: Vec<Coord<f64>>,
        spec: &GridSpec,
        n_nodes: usize,
    ) -> AfResult<Vec<Coord<f64>>> {
        if nodes.len() < 4 {
            return Ok(nodes.into_iter().take(n_nodes).collect());
        }
        let hull = hull::concave_hull(&nodes, alpha_for(spec));
        let anchor = self.anchor(&hull)?;
        Ok(nearest_nodes(&nodes, anchor, n_nodes))
    }
}

/// Anchors the selection at `p0 + t1 (p1 - p0) + t2 (p2 - p0)` where `p0` is
/// the lowest corner of the hull's minimum rotated rectangle and `p1`, `p2`
/// are its neighbours in counter-clockwise order.
#[derive(Debug, Clone, Copy)]
pub struct ParametricAnchor {
    pub t1: f64,
    pub t2: f64,
}

fn check_unit(name: &str, value: f64) -> AfResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ArrayForgeError::GeometryConstraint(format!(
            "Argument '{}' with value {} lies outside of valid domain [0, 1]",
            name, value
        )));
    }
    Ok(())
}

/// Corners of the minimum rotated rectangle, counter-clockwise, starting from
/// the lowest (then leftmost) corner.
pub fn anchor_corners(hull: &Polygon<f64>) -> AfResult<[Coord<f64>; 4]> {
    let rect = hull.minimum_rotated_rect().ok_or_else(|| {
        ArrayForgeError::GeometryConstraint("Minimum rotated rectangle is undefined".to_string())
    })?;

    let mut corners: Vec<Coord<f64>> = rect.exterior().coords().copied().collect();
    if corners.len() > 1 && corners.first() == corners.last() {
        corners.pop();
    }
    if corners.len() != 4 {
        return Err(ArrayForgeError::GeometryConstraint(format!(
            "Expected 4 rectangle corners, found {}",
            corners.len()
        )));
    }

    let signed: f64 = (0..4)
        .map(|i| {
            let (a, b) = (corners[i], corners[(i + 1) % 4]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    if signed < 0.0 {
        corners.reverse();
    }

    let scale = corners
        .iter()
        .fold(1.0f64, |acc, c| acc.max(c.x.abs()).max(c.y.abs()));
    let tol = 1e-9 * scale;
    let start = (0..4)
        .min_by(|&i, &j| {
            let (a, b) = (corners[i], corners[j]);
            if (a.y - b.y).abs() <= tol {
                a.x.total_cmp(&b.x)
            } else {
                a.y.total_cmp(&b.y)
            }
        })
        .unwrap_or(0);

    Ok([
        corners[start],
        corners[(start + 1) % 4],
        corners[(start + 2) % 4],
        corners[(start + 3) % 4],
    ])
}

impl ParametricAnchor {
    pub fn new(t1: f64, t2: f64) -> Self {
        Self { t1, t2 }
    }

    pub fn anchor(&self, hull: &Polygon<f64>) -> AfResult<Coord<f64>> {
        check_unit("t1", self.t1)?;
        check_unit("t2", self.t2)?;
        let [p0, p1, _, p2] = anchor_corners(hull)?;
        Ok(p0 + (p1 - p0) * self.t1 + (p2 - p0) * self.t2)
    }
}

impl NodeSelector for ParametricAnchor {
    fn select(
        &self,
        nodes: Vec<Coord<f64>>,
        spec: &GridSpec,
        n_nodes: usize,
    ) -> AfResult<Vec<Coord<f64>>> {
        check_unit("t1", self.t1)?;
        check_unit("t2", self.t2)?;

        if nodes.len() < 4 {
            return Ok(nodes.into_iter().take(n_nodes).collect());
        }

        let hull = hull::concave_hull(&nodes, alpha_for(spec));
        let anchor = self.anchor(&hull)?;
        Ok(nearest_nodes(&nodes, anchor, n_nodes))
    }
}
