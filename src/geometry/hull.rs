use geo::{Area, ConvexHull, Coord, Intersects, LineString, MultiPoint, Point, Polygon};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    v: [usize; 3],
    centre: Coord<f64>,
    radius_sq: f64,
}

fn circumcircle(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> Option<(Coord<f64>, f64)> {
    let d = 2.0 * (a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y));
    if d.abs() < f64::EPSILON {
        return None;
    }
    let a2 = a.x * a.x + a.y * a.y;
    let b2 = b.x * b.x + b.y * b.y;
    let c2 = c.x * c.x + c.y * c.y;
    let ux = (a2 * (b.y - c.y) + b2 * (c.y - a.y) + c2 * (a.y - b.y)) / d;
    let uy = (a2 * (c.x - b.x) + b2 * (a.x - c.x) + c2 * (b.x - a.x)) / d;
    let centre = Coord { x: ux, y: uy };
    let r = (a.x - ux).powi(2) + (a.y - uy).powi(2);
    Some((centre, r))
}

fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Bowyer-Watson Delaunay triangulation. Returns vertex index triples into
/// `points`.
pub fn delaunay(points: &[Coord<f64>]) -> Vec<[usize; 3]> {
    if points.len() < 3 {
        return Vec::new();
    }

    // Work relative to the centroid to keep the in-circle test well scaled
    let n = points.len();
    let mean = points.iter().fold(Coord { x: 0.0, y: 0.0 }, |acc, p| acc + *p) / n as f64;
    let mut pts: Vec<Coord<f64>> = points.iter().map(|p| *p - mean).collect();

    let extent = pts
        .iter()
        .fold(0.0f64, |acc, p| acc.max(p.x.abs()).max(p.y.abs()))
        .max(1.0);
    let big = extent * 64.0;
    pts.push(Coord { x: -big, y: -big });
    pts.push(Coord { x: big, y: -big });
    pts.push(Coord { x: 0.0, y: big });

    let mut triangles: Vec<Triangle> = Vec::new();
    if let Some((centre, radius_sq)) = circumcircle(pts[n], pts[n + 1], pts[n + 2]) {
        triangles.push(Triangle {
            v: [n, n + 1, n + 2],
            centre,
            radius_sq,
        });
    }

    for (i, p) in pts.iter().enumerate().take(n) {
        let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
        let mut keep = Vec::with_capacity(triangles.len());

        for t in triangles.drain(..) {
            let d = (p.x - t.centre.x).powi(2) + (p.y - t.centre.y).powi(2);
            if d < t.radius_sq * (1.0 - 1e-12) {
                for (a, b) in [(t.v[0], t.v[1]), (t.v[1], t.v[2]), (t.v[2], t.v[0])] {
                    *edges.entry(edge_key(a, b)).or_insert(0) += 1;
                }
            } else {
                keep.push(t);
            }
        }
        triangles = keep;

        for ((a, b), count) in edges {
            if count != 1 {
                continue;
            }
            if let Some((centre, radius_sq)) = circumcircle(pts[a], pts[b], *p) {
                triangles.push(Triangle {
                    v: [a, b, i],
                    centre,
                    radius_sq,
                });
            }
        }
    }

    triangles
        .into_iter()
        .filter(|t| t.v.iter().all(|&v| v < n))
        .map(|t| t.v)
        .collect()
}

fn triangle_area(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)).abs() / 2.0
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Walks boundary edges into closed rings of vertex indices.
fn trace_rings(edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
    for &(a, b) in edges {
        adjacency.entry(a).or_default().push(b);
        adjacency.entry(b).or_default().push(a);
    }

    let mut used: HashMap<(usize, usize), bool> =
        edges.iter().map(|&(a, b)| (edge_key(a, b), false)).collect();
    let mut rings = Vec::new();

    for &(start, next) in edges {
        if used.get(&edge_key(start, next)).copied().unwrap_or(true) {
            continue;
        }
        used.insert(edge_key(start, next), true);
        let mut ring = vec![start, next];
        let mut prev = start;
        let mut current = next;

        while current != start {
            let free = |n: usize| !used.get(&edge_key(current, n)).copied().unwrap_or(true);
            let step = adjacency.get(&current).and_then(|ns| {
                ns.iter()
                    .copied()
                    .find(|&n| n != prev && free(n))
                    .or_else(|| ns.iter().copied().find(|&n| free(n)))
            });
            match step {
                Some(n) => {
                    used.insert(edge_key(current, n), true);
                    prev = current;
                    current = n;
                    ring.push(n);
                }
                None => break,
            }
        }

        if current == start && ring.len() >= 4 {
            rings.push(ring);
        }
    }

    rings
}

/// Concave hull of `points`: Delaunay triangles whose circumradius is below
/// `1 / alpha`, merged into the outer boundary of their union. Returns
/// `None` when no usable ring survives.
pub fn alpha_shape(points: &[Coord<f64>], alpha: f64) -> Option<Polygon<f64>> {
    if points.len() < 4 || !(alpha > 0.0) {
        return None;
    }
    let max_radius = 1.0 / alpha;

    let mut edge_counts: HashMap<(usize, usize), usize> = HashMap::new();
    for [a, b, c] in delaunay(points) {
        let (pa, pb, pc) = (points[a], points[b], points[c]);
        let area = triangle_area(pa, pb, pc);
        let longest = distance(pa, pb).max(distance(pb, pc)).max(distance(pc, pa));
        if area <= 1e-9 * longest * longest {
            continue;
        }
        let radius = distance(pa, pb) * distance(pb, pc) * distance(pc, pa) / (4.0 * area);
        if radius < max_radius {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                *edge_counts.entry(edge_key(u, v)).or_insert(0) += 1;
            }
        }
    }

    let mut boundary: Vec<(usize, usize)> = edge_counts
        .into_iter()
        .filter(|(_, count)| *count == 1)
        .map(|(edge, _)| edge)
        .collect();
    boundary.sort_unstable();

    trace_rings(&boundary)
        .into_iter()
        .map(|ring| {
            let coords: Vec<Coord<f64>> = ring.iter().map(|&i| points[i]).collect();
            Polygon::new(LineString::from(coords), vec![])
        })
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
}

/// Alpha shape unioned with the raw nodes. When the shape fails to cover
/// every node the convex hull of all nodes is used instead.
pub fn concave_hull(points: &[Coord<f64>], alpha: f64) -> Polygon<f64> {
    let convex = || MultiPoint::from(points.to_vec()).convex_hull();

    match alpha_shape(points, alpha) {
        Some(shape) if points.iter().all(|p| shape.intersects(&Point::from(*p))) => shape,
        _ => convex(),
    }
}
