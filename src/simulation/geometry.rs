//! Geometry helpers for mobility and neighbour estimation.
//!
//! Contains helper functions for:
//! - Euclidean distance (plain and squared, to avoid sqrt in hot paths)
//! - Linear interpolation along a segment for per-tick movement
//! - Dead-reckoning of a neighbour from its last beacon
//! - Mapping coordinates onto a square grid of cells

use serde::{Deserialize, Serialize};

/// Simple 2D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Squared Euclidean distance in meters².
///
/// Comparing squared distances lets range checks skip the square root:
/// `d1² < d2²` is equivalent to `d1 < d2` for non-negative distances.
pub fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Euclidean distance in meters.
pub fn euclidean_distance(a: &Point, b: &Point) -> f64 {
    distance2(a, b).sqrt()
}

/// Point at fraction `t` of the segment `p0 → p1`.
///
/// `t = 0` yields `p0`, `t = 1` yields `p1`. The caller guarantees `0 < t < 1`
/// for intermediate positions; snapping at `t >= 1` is handled by mobility.
pub fn interpolate(p0: &Point, p1: &Point, t: f64) -> Point {
    Point {
        x: (1.0 - t) * p0.x + t * p1.x,
        y: (1.0 - t) * p0.y + t * p1.y,
    }
}

/// Unit vector pointing from `from` to `to`, or `None` for a degenerate segment.
pub fn unit_vector(from: &Point, to: &Point) -> Option<Point> {
    let length = euclidean_distance(from, to);
    if length == 0.0 {
        return None;
    }
    Some(Point {
        x: (to.x - from.x) / length,
        y: (to.y - from.y) / length,
    })
}

/// Estimate where a neighbour is now, given its last beacon.
///
/// # Formula
///
/// ```text
/// p_now = p_beacon + û · (elapsed_ticks × tick_duration × speed)
/// û     = unit vector from p_beacon towards the declared next target
/// ```
///
/// The extrapolation does not stop at the target: a neighbour is assumed to
/// keep flying along the same heading. If the beacon position equals the
/// next target the last known position is returned unchanged.
///
/// # Parameters
///
/// * `position` - Position reported in the beacon
/// * `next_target` - Target the neighbour declared it was flying to
/// * `speed` - Speed reported in the beacon (m/s)
/// * `elapsed_ticks` - Ticks since the beacon was created
/// * `tick_duration` - Seconds per tick
pub fn dead_reckoning(position: &Point, next_target: &Point, speed: f64, elapsed_ticks: u64, tick_duration: f64) -> Point {
    match unit_vector(position, next_target) {
        Some(direction) => {
            let travelled = elapsed_ticks as f64 * tick_duration * speed;
            Point {
                x: position.x + direction.x * travelled,
                y: position.y + direction.y * travelled,
            }
        }
        None => *position,
    }
}

/// Integer coordinates of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoords {
    pub x: u32,
    pub y: u32,
}

/// Map a position to its cell on a square grid of side `cell_size`.
///
/// Returns the linear cell number (row-major over `ceil(width / cell_size)`
/// columns) together with the cell coordinates. Negative positions are
/// clamped into the first row/column.
pub fn coord_to_cell(cell_size: f64, area_width: f64, position: &Point) -> (u32, CellCoords) {
    let x = (position.x.max(0.0) / cell_size) as u32;
    let y = (position.y.max(0.0) / cell_size) as u32;
    let cells_per_row = (area_width / cell_size).ceil() as u32;
    (x + cells_per_row * y, CellCoords { x, y })
}

/// Cell numbers and centers of every cell covering a `width × height` area.
pub fn all_cell_centers(area_width: f64, area_height: f64, cell_size: f64) -> Vec<(u32, Point)> {
    let mut cells = Vec::new();
    let mut x = 0.0;
    while x < area_width {
        let mut y = 0.0;
        while y < area_height {
            let corner = Point::new(x, y);
            let (cell, _) = coord_to_cell(cell_size, area_width, &corner);
            cells.push((cell, Point::new(x + cell_size / 2.0, y + cell_size / 2.0)));
            y += cell_size;
        }
        x += cell_size;
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point {
        Point { x, y }
    }

    #[test]
    fn distance_matches_pythagoras() {
        assert_eq!(euclidean_distance(&p(0.0, 0.0), &p(3.0, 4.0)), 5.0);
        assert_eq!(distance2(&p(1.0, 1.0), &p(4.0, 5.0)), 25.0);
        assert_eq!(euclidean_distance(&p(7.0, 7.0), &p(7.0, 7.0)), 0.0);
    }

    #[test]
    fn interpolate_moves_along_segment() {
        let mid = interpolate(&p(0.0, 0.0), &p(10.0, 20.0), 0.5);
        assert_eq!(mid, p(5.0, 10.0));
        let quarter = interpolate(&p(10.0, 0.0), &p(0.0, 0.0), 0.25);
        assert_eq!(quarter, p(7.5, 0.0));
    }

    #[test]
    fn unit_vector_rejects_degenerate_segment() {
        assert!(unit_vector(&p(1.0, 1.0), &p(1.0, 1.0)).is_none());
        let u = unit_vector(&p(0.0, 0.0), &p(0.0, 5.0)).unwrap();
        assert_eq!(u, p(0.0, 1.0));
    }

    #[test]
    fn dead_reckoning_extrapolates_towards_target() {
        // 10 ticks * 0.5 s * 2 m/s = 10 m along +x
        let estimate = dead_reckoning(&p(100.0, 50.0), &p(200.0, 50.0), 2.0, 10, 0.5);
        assert!((estimate.x - 110.0).abs() < 1e-9);
        assert!((estimate.y - 50.0).abs() < 1e-9);

        // Hovering at the target stays in place
        let still = dead_reckoning(&p(3.0, 4.0), &p(3.0, 4.0), 8.0, 100, 0.15);
        assert_eq!(still, p(3.0, 4.0));
    }

    #[test]
    fn cells_are_row_major() {
        let (cell, coords) = coord_to_cell(100.0, 1000.0, &p(250.0, 120.0));
        assert_eq!(coords, CellCoords { x: 2, y: 1 });
        assert_eq!(cell, 12);

        let centers = all_cell_centers(200.0, 200.0, 100.0);
        assert_eq!(centers.len(), 4);
        assert!(centers.iter().any(|(c, center)| *c == 3 && *center == p(150.0, 150.0)));
    }
}
