mod common;

use arrayforge::error::ArrayForgeError;
use arrayforge::geometry::grid::GridSpec;
use arrayforge::geometry::hull::{concave_hull, delaunay};
use arrayforge::geometry::{
    AllNodes, CompassAnchor, CompassPoint, LayoutParameters, Positioner,
};
use arrayforge::scenario::{Bathymetry, SiteModel};
use arrayforge::tools::{ConstraintTool, SpacingCheck};
use geo::{Area, Contains, Coord, LineString, Point, Polygon};
use rstest::rstest;
use std::f64::consts::{FRAC_PI_2, PI};
use std::str::FromStr;

fn layout(delta: f64, n_nodes: usize, t1: f64, t2: f64) -> LayoutParameters {
    LayoutParameters {
        array_orientation: FRAC_PI_2,
        delta_row: delta,
        delta_col: delta,
        n_nodes,
        t1,
        t2,
        dev_per_string: None,
    }
}

fn positioner(site: &SiteModel) -> Positioner {
    Positioner::new(site).unwrap()
}

#[rstest]
#[case((5.0, 5.0), 3.0, 3.0, false)]
#[case((5.0, 5.0), 10.0, 10.0, true)]
#[case((5.0, 5.0), 5.0, 5.0, true)]
#[case((5.0, 5.0), 4.9, 10.0, false)]
#[case((50.0, 10.0), 20.0, 60.0, true)]
#[case((50.0, 10.0), 60.0, 20.0, false)]
#[case((10.0, 50.0), 60.0, 20.0, true)]
fn test_grid_spacing_against_ellipse(
    #[case] separation: (f64, f64),
    #[case] dr: f64,
    #[case] dc: f64,
    #[case] expected: bool,
) {
    let site = SiteModel::rectangle(100.0, 100.0, separation);
    assert_eq!(positioner(&site).is_grid_valid(dr, dc, FRAC_PI_2, 0.0), expected);
}

#[test]
fn test_rows_follow_beta_and_columns_follow_psi() {
    let spec = GridSpec {
        orientation: FRAC_PI_2,
        delta_row: 20.0,
        delta_col: 60.0,
        beta: FRAC_PI_2,
        psi: 0.0,
    };
    let row = spec.row_step();
    let col = spec.col_step();
    assert!(row.x.abs() < 1e-12 && (row.y - 20.0).abs() < 1e-12);
    assert!((col.x - 60.0).abs() < 1e-12 && col.y.abs() < 1e-12);
}

#[rstest]
#[case(0.0, 0.0, "beta")]
#[case(PI, 0.0, "beta")]
#[case(FRAC_PI_2, FRAC_PI_2, "psi")]
fn test_grid_angle_domains(#[case] beta: f64, #[case] psi: f64, #[case] needle: &str) {
    let spec = GridSpec {
        orientation: FRAC_PI_2,
        delta_row: 10.0,
        delta_col: 10.0,
        beta,
        psi,
    };
    let err = spec.validate().unwrap_err();
    assert!(err.to_string().contains(needle), "unexpected message: {}", err);
}

#[test]
fn test_all_nodes_respect_padded_lease() {
    let site = common::site();
    let nodes = positioner(&site)
        .place_with(&layout(60.0, 1, 0.5, 0.5), &AllNodes)
        .unwrap();

    assert!(nodes.len() > 10);
    for c in &nodes {
        assert!((25.0..=875.0).contains(&c.x), "x out of padded lease: {:?}", c);
        assert!((25.0..=175.0).contains(&c.y), "y out of padded lease: {:?}", c);
    }
}

#[test]
fn test_place_returns_requested_count() {
    let site = common::site();
    let nodes = positioner(&site).place(&layout(60.0, 5, 0.5, 0.5)).unwrap();
    assert_eq!(nodes.len(), 5);

    let mut check = SpacingCheck::new();
    check.configure(&nodes);
    assert!(check.execute(&site).is_ok());
}

#[test]
fn test_parametric_anchor_corners() {
    let site = common::site();
    let p = positioner(&site);
    let all = p.place_with(&layout(60.0, 1, 0.0, 0.0), &AllNodes).unwrap();
    let min_x = all.iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
    let max_x = all.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = all.iter().map(|c| c.y).fold(f64::INFINITY, f64::min);

    let bottom_left = p.place(&layout(60.0, 1, 0.0, 0.0)).unwrap();
    assert!((bottom_left[0].x - min_x).abs() < 1e-6);
    assert!((bottom_left[0].y - min_y).abs() < 1e-6);

    let bottom_right = p.place(&layout(60.0, 1, 1.0, 0.0)).unwrap();
    assert!((bottom_right[0].x - max_x).abs() < 1e-6);
    assert!((bottom_right[0].y - min_y).abs() < 1e-6);
}

#[test]
fn test_parametric_anchor_domain() {
    let site = common::site();
    let err = positioner(&site).place(&layout(60.0, 5, 1.5, 0.5)).unwrap_err();
    assert!(matches!(err, ArrayForgeError::GeometryConstraint(_)));
    assert!(err.to_string().contains("outside of valid domain"));
}

#[test]
fn test_insufficient_nodes() {
    let site = common::site();
    match positioner(&site).place(&layout(60.0, 10_000, 0.5, 0.5)) {
        Err(ArrayForgeError::InsufficientNodes { expected, found }) => {
            assert_eq!(expected, 10_000);
            assert!(found > 0 && found < expected);
        }
        other => panic!("expected InsufficientNodes, got {:?}", other),
    }
}

#[test]
fn test_spacing_below_separation_is_rejected() {
    let site = common::site();
    let err = positioner(&site).place(&layout(30.0, 5, 0.5, 0.5)).unwrap_err();
    assert!(matches!(err, ArrayForgeError::GeometryConstraint(_)));
    assert!(err.is_recoverable());
}

#[test]
fn test_nogo_zone_excludes_nodes() {
    let mut site = common::site();
    site.nogo = vec![vec![(0.0, 0.0), (450.0, 0.0), (450.0, 200.0), (0.0, 200.0)]];
    let nodes = positioner(&site)
        .place_with(&layout(60.0, 1, 0.5, 0.5), &AllNodes)
        .unwrap();
    assert!(!nodes.is_empty());
    assert!(nodes.iter().all(|c| c.x > 450.0));
}

#[test]
fn test_depth_band_filters_nodes() {
    let mut site = common::site();
    site.bathymetry = Some(Bathymetry::flat((0.0, 0.0), (900.0, 200.0), 10.0, -10.0));
    site.min_depth = -20.0;
    site.max_depth = 0.0;
    let within = positioner(&site)
        .place_with(&layout(60.0, 1, 0.5, 0.5), &AllNodes)
        .unwrap();
    let unconstrained = positioner(&common::site())
        .place_with(&layout(60.0, 1, 0.5, 0.5), &AllNodes)
        .unwrap();
    assert_eq!(within.len(), unconstrained.len());

    site.max_depth = -15.0;
    match positioner(&site).place(&layout(60.0, 5, 0.5, 0.5)) {
        Err(ArrayForgeError::InsufficientNodes { found, .. }) => assert_eq!(found, 0),
        other => panic!("expected InsufficientNodes, got {:?}", other),
    }
}

#[test]
fn test_compass_anchor_east() {
    let site = common::site();
    let p = positioner(&site);
    let all = p.place_with(&layout(60.0, 1, 0.5, 0.5), &AllNodes).unwrap();
    let max_x = all.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);

    let point = CompassPoint::from_str("e").unwrap();
    let nodes = p
        .place_with(&layout(60.0, 3, 0.5, 0.5), &CompassAnchor::new(point))
        .unwrap();
    assert_eq!(nodes.len(), 3);
    assert!(nodes.iter().all(|c| c.x >= max_x - 60.0 - 1e-6));
}

#[test]
fn test_compass_point_parsing() {
    assert_eq!(CompassPoint::from_str("NE").unwrap(), CompassPoint::NE);
    assert_eq!(CompassPoint::from_str("sw").unwrap(), CompassPoint::SW);
    assert!(CompassPoint::from_str("up").is_err());
}

#[test]
fn test_delaunay_quad() {
    let points = vec![
        Coord { x: 0.0, y: 0.0 },
        Coord { x: 10.0, y: 0.0 },
        Coord { x: 0.0, y: 10.0 },
        Coord { x: 11.0, y: 11.0 },
    ];
    let triangles = delaunay(&points);
    assert_eq!(triangles.len(), 2);
    assert!(triangles.iter().flatten().all(|&i| i < points.len()));
}

#[test]
fn test_concave_hull_covers_grid() {
    let points: Vec<Coord<f64>> = (0..5)
        .flat_map(|i| (0..5).map(move |j| Coord { x: i as f64 * 10.0, y: j as f64 * 10.0 }))
        .collect();
    let hull = concave_hull(&points, 0.1);
    assert!((hull.unsigned_area() - 1600.0).abs() < 1e-6);
}

#[test]
fn test_spacing_check_counts_pairs() {
    let mut check = SpacingCheck::new();
    check.configure(&[
        Coord { x: 0.0, y: 0.0 },
        Coord { x: 10.0, y: 0.0 },
        Coord { x: 100.0, y: 0.0 },
        Coord { x: 100.0, y: 50.0 },
    ]);
    assert_eq!(check.count_violations((50.0, 50.0)), 1);
    match check.execute(&common::site()) {
        Err(ArrayForgeError::SpacingViolation { count }) => assert_eq!(count, 1),
        other => panic!("expected SpacingViolation, got {:?}", other),
    }
}

#[test]
fn test_layout_parameters_from_slice() {
    let params = LayoutParameters::from_slice(&[0.1, 60.0, 70.0, 5.0, 0.2, 0.3, 4.0]).unwrap();
    assert_eq!(params.n_nodes, 5);
    assert_eq!(params.dev_per_string, Some(4));
    assert_eq!(params.to_vec().len(), 7);
    assert!(LayoutParameters::from_slice(&[1.0, 2.0]).is_err());
}

#[rstest]
#[case(0.0)]
#[case(-2.0)]
#[case(f64::NAN)]
#[case(f64::INFINITY)]
#[case(1e12)]
fn test_invalid_devices_per_string(#[case] value: f64) {
    let err = LayoutParameters::from_slice(&[0.1, 60.0, 70.0, 5.0, 0.2, 0.3, value]).unwrap_err();
    assert!(matches!(err, ArrayForgeError::GeometryConstraint(_)));
}

#[test]
fn test_centre_anchor_inside_concave_hull() {
    // U shape whose centroid falls in the notch
    let hull = Polygon::new(
        LineString::from(vec![
            (0.0, 0.0),
            (300.0, 0.0),
            (300.0, 300.0),
            (200.0, 300.0),
            (200.0, 50.0),
            (100.0, 50.0),
            (100.0, 300.0),
            (0.0, 300.0),
            (0.0, 0.0),
        ]),
        vec![],
    );
    let anchor = CompassAnchor::new(CompassPoint::C).anchor(&hull).unwrap();
    assert!(hull.contains(&Point::from(anchor)), "anchor {:?} outside hull", anchor);
}

#[test]
fn test_centre_anchor_uses_centroid_when_inside() {
    let hull = Polygon::new(
        LineString::from(vec![(0.0, 0.0), (100.0, 0.0), (100.0, 40.0), (0.0, 40.0), (0.0, 0.0)]),
        vec![],
    );
    let anchor = CompassAnchor::new(CompassPoint::C).anchor(&hull).unwrap();
    assert!((anchor.x - 50.0).abs() < 1e-9 && (anchor.y - 20.0).abs() < 1e-9);
}
