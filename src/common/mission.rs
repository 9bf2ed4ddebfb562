//! Mission path providers.
//!
//! A mission is an ordered, cyclic list of waypoints per drone. Paths come
//! from one of three sources:
//! - A JSON tour file (`{"drones": [{"index": "0", "tour": ["(x, y)", ...]}]}`)
//! - Circles around the depot, each drone starting at a different phase
//! - Random-waypoint tours that leave from and return to the depot within the
//!   drone's energy budget

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::scene::{ConfigLoadError, MissionConfig, SimulationConfig};
use crate::simulation::geometry::{Point, euclidean_distance};
use crate::simulation::types::DroneId;

/// Safety factor on leg lengths: a random leg of nominal length `d` may cost
/// up to `d * 1.44` meters of flight.
const LEG_ENERGY_FACTOR: f64 = 1.44;

/// Circle paths stay this many meters inside the depot range.
const CIRCLE_RANGE_MARGIN: f64 = 10.0;

#[derive(Deserialize)]
struct TourFile {
    drones: Vec<TourEntry>,
}

#[derive(Deserialize)]
struct TourEntry {
    index: String,
    tour: Vec<String>,
}

/// Source of mission paths, resolved once at simulation setup.
pub enum PathProvider {
    Loaded(HashMap<DroneId, Vec<Point>>),
    Circle { center: Point, radius: f64, n_drones: usize },
    Random {
        steps: Vec<u32>,
        edge_area: f64,
        depot: Point,
        autonomy: f64,
    },
}

impl PathProvider {
    /// Build the provider selected by the configuration.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigLoadError> {
        match &config.mission {
            MissionConfig::Json { path } => Ok(PathProvider::Loaded(load_tours(path)?)),
            MissionConfig::Circle => Ok(PathProvider::Circle {
                center: config.depot_coordinates,
                radius: (config.depot_communication_range - CIRCLE_RANGE_MARGIN).max(1.0),
                n_drones: config.n_drones,
            }),
            MissionConfig::Random { steps } => Ok(PathProvider::Random {
                steps: steps.clone(),
                edge_area: config.env_width.min(config.env_height),
                depot: config.depot_coordinates,
                autonomy: config.drone_max_energy,
            }),
        }
    }

    /// Path of one drone. Loaded tours may lack an entry, in which case the
    /// drone hovers at the first waypoint of drone 0 (or the origin).
    pub fn path(&self, drone_id: DroneId, rng: &mut ChaCha8Rng) -> Vec<Point> {
        match self {
            PathProvider::Loaded(tours) => match tours.get(&drone_id) {
                Some(tour) => tour.clone(),
                None => {
                    log::warn!("No tour for drone {} in tour file, hovering in place", drone_id);
                    let hover = tours.get(&0).and_then(|t| t.first().copied()).unwrap_or_default();
                    vec![hover]
                }
            },
            PathProvider::Circle { center, radius, n_drones } => circle_path(*center, *radius, drone_id, *n_drones),
            PathProvider::Random {
                steps,
                edge_area,
                depot,
                autonomy,
            } => random_tour(*autonomy, *edge_area, *depot, steps, rng),
        }
    }
}

/// Parse a waypoint written as `"(x, y)"`.
fn parse_waypoint(text: &str) -> Option<Point> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut parts = inner.split(',');
    let x = parts.next()?.trim().parse::<f64>().ok()?;
    let y = parts.next()?.trim().parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Point::new(x, y))
}

/// Load drone tours from a JSON tour file.
pub fn load_tours(path: &Path) -> Result<HashMap<DroneId, Vec<Point>>, ConfigLoadError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigLoadError::FileReadError(format!("{}: {}", path.display(), e)))?;
    parse_tours(&content)
}

pub fn parse_tours(content: &str) -> Result<HashMap<DroneId, Vec<Point>>, ConfigLoadError> {
    let file: TourFile = serde_json::from_str(content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;

    let mut tours = HashMap::new();
    for entry in file.drones {
        let index: DroneId = entry
            .index
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::ParseError(format!("Invalid drone index {:?}", entry.index)))?;
        let tour = entry
            .tour
            .iter()
            .map(|w| parse_waypoint(w).ok_or_else(|| ConfigLoadError::ParseError(format!("Invalid waypoint {:?} for drone {}", w, index))))
            .collect::<Result<Vec<_>, _>>()?;
        if tour.is_empty() {
            return Err(ConfigLoadError::ValidationError(format!("Drone {} has an empty tour", index)));
        }
        tours.insert(index, tour);
    }
    Ok(tours)
}

/// Discretised circle of `radius` around `center`, rotated so that drone
/// `drone_id` starts `drone_id / n_drones` of the way around.
pub fn circle_path(center: Point, radius: f64, drone_id: DroneId, n_drones: usize) -> Vec<Point> {
    let r = radius.floor() as i64;
    let mut upper = Vec::new();
    for x in -r..r {
        let y = ((r * r - x * x) as f64).sqrt();
        upper.push((x as f64, y));
    }
    let lower: Vec<(f64, f64)> = upper.iter().rev().map(|&(x, y)| (x, -y)).collect();

    let trajectory: Vec<Point> = upper
        .into_iter()
        .chain(lower)
        .map(|(x, y)| Point::new(x + center.x, y + center.y))
        .collect();

    if trajectory.is_empty() {
        return vec![center];
    }

    let shift = (trajectory.len() / n_drones.max(1)) * drone_id % trajectory.len();
    trajectory[shift..].iter().chain(trajectory[..shift].iter()).copied().collect()
}

/// Next leg of a random tour and the autonomy left after flying it.
///
/// Heads back to the depot once the remaining autonomy could no longer cover
/// the shortest leg plus the way home.
fn next_random_target(depot: Point, current: Point, residual: f64, edge_area: f64, steps: &[u32], rng: &mut ChaCha8Rng) -> (Point, f64) {
    let to_depot = euclidean_distance(&depot, &current);
    let min_step = steps.iter().copied().min().unwrap_or(0) as f64;
    if residual < min_step * LEG_ENERGY_FACTOR + to_depot {
        return (depot, (residual - to_depot).max(0.0));
    }

    let feasible: Vec<u32> = steps
        .iter()
        .copied()
        .filter(|&d| d as f64 * LEG_ENERGY_FACTOR * 2.0 + to_depot <= residual)
        .collect();
    if feasible.is_empty() {
        return (depot, (residual - to_depot).max(0.0));
    }

    let d = feasible[rng.gen_range(0..feasible.len())] as f64;
    let x_lo = (current.x - d).max(0.0);
    let x_hi = (current.x + d).min(edge_area);
    let y_lo = (current.y - d).max(0.0);
    let y_hi = (current.y + d).min(edge_area);
    let next = Point::new(
        if x_hi > x_lo { rng.gen_range(x_lo..x_hi).floor() } else { x_lo },
        if y_hi > y_lo { rng.gen_range(y_lo..y_hi).floor() } else { y_lo },
    );
    (next, residual - euclidean_distance(&current, &next))
}

/// Random-waypoint tour starting at the depot and closing back on it.
pub fn random_tour(autonomy: f64, edge_area: f64, depot: Point, steps: &[u32], rng: &mut ChaCha8Rng) -> Vec<Point> {
    let min_step = steps.iter().copied().min().unwrap_or(0) as f64;
    let mut tour = Vec::new();
    let mut current = depot;
    let mut residual = autonomy;

    while residual >= min_step * LEG_ENERGY_FACTOR + euclidean_distance(&current, &depot) {
        let (next, left) = next_random_target(depot, current, residual, edge_area, steps, rng);
        residual = left;
        if next == depot {
            break;
        }
        tour.push(current);
        current = next;
    }

    if current != depot {
        tour.push(current);
    }
    tour.push(depot);
    tour
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn parses_tour_file() {
        let tours = parse_tours(
            r#"{"drones": [
                {"index": "0", "tour": ["(750, 0)", "(800.5, 120)"]},
                {"index": "1", "tour": ["(10, 20)"]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(tours[&0], vec![Point::new(750.0, 0.0), Point::new(800.5, 120.0)]);
        assert_eq!(tours[&1], vec![Point::new(10.0, 20.0)]);
    }

    #[test]
    fn rejects_malformed_waypoints() {
        let err = parse_tours(r#"{"drones": [{"index": "0", "tour": ["750, 0"]}]}"#).unwrap_err();
        assert!(matches!(err, ConfigLoadError::ParseError(_)));
        assert!(parse_waypoint("(1, 2, 3)").is_none());
    }

    #[test]
    fn circle_paths_stay_on_radius_and_are_phase_shifted() {
        let center = Point::new(500.0, 500.0);
        let a = circle_path(center, 50.0, 0, 2);
        let b = circle_path(center, 50.0, 1, 2);
        assert_eq!(a.len(), b.len());
        assert_ne!(a[0], b[0]);
        for p in &a {
            assert!((euclidean_distance(p, &center) - 50.0).abs() < 1e-6);
        }
    }

    #[test]
    fn random_tour_closes_at_depot_within_area() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let depot = Point::new(750.0, 0.0);
        let tour = random_tour(20_000.0, 1500.0, depot, &[250, 500], &mut rng);
        assert_eq!(tour.first(), Some(&depot));
        assert_eq!(tour.last(), Some(&depot));
        for p in &tour {
            assert!(p.x >= 0.0 && p.x <= 1500.0 && p.y >= 0.0 && p.y <= 1500.0);
        }
    }

    #[test]
    fn tiny_autonomy_yields_depot_only_tour() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let depot = Point::new(0.0, 0.0);
        let tour = random_tour(10.0, 1000.0, depot, &[250], &mut rng);
        assert_eq!(tour, vec![depot]);
    }
}
