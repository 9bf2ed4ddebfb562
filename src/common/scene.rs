//! Simulation configuration loading, parsing, and validation.
//!
//! Contains the flat parameter set a run is constructed from, the closed
//! enumerations selecting channel/routing/MAC variants, and functions for
//! loading a configuration from TOML or JSON and validating it.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::simulation::geometry::Point;

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ConfigLoadError::ParseError(msg) => write!(f, "Failed to parse configuration: {}", msg),
            ConfigLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigLoadError {}

/// Channel success model applied to every in-range transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelErrorKind {
    /// Every in-range transmission succeeds.
    NoError,
    /// Bernoulli trial with `drone-communication-success`.
    Uniform,
    /// Three distance tiers scaling the receiver's own success rate.
    OnDevice,
    /// Distance rings with probabilities taken from a normal CDF.
    Gaussian,
}

/// Relay selection policy run by every drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingAlgorithm {
    /// Never relays; packets reach the depot only by physical transport.
    None,
    /// Neighbour whose last reported position is closest to the depot.
    Geo,
    /// Like `Geo`, on dead-reckoned positions.
    MoveGeo,
    Random,
    /// Neighbour closest to the carrier itself.
    Closest,
    /// Epsilon-greedy Q-learning over (cell, waypoint, action).
    Learning,
}

/// Depot-side allocation policy for the single upload slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MacAlgorithm {
    RoundRobin,
    Random,
    Bandit,
}

/// Where the drones' mission paths come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MissionConfig {
    /// Random-waypoint tours starting and ending at the depot, bounded by
    /// drone energy. `steps` are the candidate leg lengths in meters.
    Random {
        #[serde(default = "default_random_steps")]
        steps: Vec<u32>,
    },
    /// Circles around the depot, phase-shifted per drone.
    Circle,
    /// Tours loaded from a JSON file.
    Json { path: PathBuf },
}

fn default_random_steps() -> Vec<u32> {
    vec![250, 500, 700, 900, 1100, 1400]
}

impl Default for MissionConfig {
    fn default() -> Self {
        MissionConfig::Random {
            steps: default_random_steps(),
        }
    }
}

/// Flat parameter set of one simulation run. Immutable once the simulator
/// has been constructed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulationConfig {
    /// Number of ticks to simulate.
    pub sim_duration: u64,
    /// Seconds per tick.
    pub tick_duration: f64,
    /// Master seed; every RNG stream is derived from it.
    pub seed: u64,
    pub n_drones: usize,
    pub env_width: f64,
    pub env_height: f64,

    /// Ticks an event stays relevant after generation.
    pub event_duration: u64,
    /// A generation attempt happens every `event_generation_delay` ticks.
    pub event_generation_delay: u64,
    /// Probability the chosen drone actually feels the event.
    pub event_generation_prob: f64,

    pub drone_communication_range: f64,
    pub drone_sensing_range: f64,
    /// Nominal speed (m/s).
    pub drone_speed: f64,
    pub drone_max_buffer_size: usize,
    /// Flight budget in meters.
    pub drone_max_energy: f64,
    /// Ticks between relay attempts.
    pub drone_retransmission_delta: u64,
    /// Success probability of the uniform channel model.
    pub drone_communication_success: f64,
    /// Draw per-drone speed and on-device success rate.
    pub heterogeneous_drones: bool,

    pub depot_communication_range: f64,
    pub depot_coordinates: Point,

    /// Hop bound for data packets. Deadline expiry stays authoritative.
    pub packets_max_ttl: usize,

    pub routing_algorithm: RoutingAlgorithm,
    pub channel_error: ChannelErrorKind,
    /// Scale applied to Gaussian bucket probabilities.
    pub gaussian_scale: f64,
    /// Ticks between beacons.
    pub hello_delay: u64,
    /// Medium latency in ticks.
    pub lil_delta: u64,
    /// Beacons older than this many ticks are ignored.
    pub old_hello_packet: u64,
    /// Divert to the depot when the tightest deadline is about to pass.
    pub routing_if_expiring: bool,
    pub learning_epsilon: f64,
    pub learning_alpha: f64,

    /// Depot scheduler; `None` disables the MAC pass.
    pub mac_protocol: Option<MacAlgorithm>,
    pub mac_bandit_epsilon: f64,

    pub enable_probabilities: bool,
    /// Cell side relative to the drone communication range.
    pub cell_prob_size_ratio: f64,

    /// Snapshot period in ticks.
    pub render_every: u64,

    pub mission: MissionConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sim_duration: 15_000,
            tick_duration: 0.150,
            seed: 5,
            n_drones: 20,
            env_width: 1500.0,
            env_height: 1500.0,
            event_duration: 8000,
            event_generation_delay: 300,
            event_generation_prob: 0.8,
            drone_communication_range: 200.0,
            drone_sensing_range: 0.0,
            drone_speed: 8.0,
            drone_max_buffer_size: 100,
            drone_max_energy: 12_000_000.0,
            drone_retransmission_delta: 10,
            drone_communication_success: 1.0,
            heterogeneous_drones: true,
            depot_communication_range: 200.0,
            depot_coordinates: Point::new(750.0, 0.0),
            packets_max_ttl: 200,
            routing_algorithm: RoutingAlgorithm::Geo,
            channel_error: ChannelErrorKind::OnDevice,
            gaussian_scale: 0.9,
            hello_delay: 5,
            lil_delta: 1,
            old_hello_packet: 50,
            routing_if_expiring: false,
            learning_epsilon: 0.1,
            learning_alpha: 0.5,
            mac_protocol: None,
            mac_bandit_epsilon: 0.05,
            enable_probabilities: false,
            cell_prob_size_ratio: 1.875,
            render_every: 5,
            mission: MissionConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Load a configuration file. `.json` files are parsed as JSON, anything
    /// else as TOML. The parsed configuration is validated before returning.
    pub fn load(config_path: &Path) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(config_path).map_err(|e| ConfigLoadError::FileReadError(format!("{}: {}", config_path.display(), e)))?;

        let is_json = config_path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json { Self::from_json_str(&content)? } else { Self::from_toml_str(&content)? };

        log::info!("Loaded configuration file: {:?}", config_path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        validate_config(&config).map_err(ConfigLoadError::ValidationError)?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigLoadError> {
        let config: Self = serde_json::from_str(content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        validate_config(&config).map_err(ConfigLoadError::ValidationError)?;
        Ok(config)
    }

    /// Side of a probability-map cell in meters.
    pub fn cell_size(&self) -> f64 {
        (self.drone_communication_range * self.cell_prob_size_ratio).floor().max(1.0)
    }
}

/// Validate a configuration to reject inputs the engine cannot run.
///
/// Checks for:
/// - Empty fleets and zero-length runs
/// - Non-positive tick duration, speed, ranges, and area dimensions
/// - Probabilities outside `[0, 1]`
/// - Zero periods (beacons, retransmissions, event generation, rendering, medium latency)
/// - Depot outside the area
/// - Random missions without leg lengths
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with the first problem found otherwise.
pub fn validate_config(config: &SimulationConfig) -> Result<(), String> {
    if config.n_drones == 0 {
        return Err("Simulation must contain at least one drone".to_string());
    }
    if config.sim_duration == 0 {
        return Err("sim-duration must be positive".to_string());
    }
    if !(config.tick_duration > 0.0) {
        return Err(format!("Invalid tick-duration {}, must be positive", config.tick_duration));
    }
    if !(config.drone_speed > 0.0) {
        return Err(format!("Invalid drone-speed {}, must be positive", config.drone_speed));
    }
    if !(config.env_width > 0.0) || !(config.env_height > 0.0) {
        return Err(format!("Invalid area {}x{}, both sides must be positive", config.env_width, config.env_height));
    }
    if !(config.drone_communication_range > 0.0) {
        return Err(format!(
            "Invalid drone-communication-range {}, must be positive",
            config.drone_communication_range
        ));
    }
    if !(config.depot_communication_range > 0.0) {
        return Err(format!(
            "Invalid depot-communication-range {}, must be positive",
            config.depot_communication_range
        ));
    }
    if config.drone_max_buffer_size == 0 {
        return Err("drone-max-buffer-size must be at least 1".to_string());
    }

    for (name, value) in [
        ("event-generation-prob", config.event_generation_prob),
        ("drone-communication-success", config.drone_communication_success),
        ("gaussian-scale", config.gaussian_scale),
        ("learning-epsilon", config.learning_epsilon),
        ("learning-alpha", config.learning_alpha),
        ("mac-bandit-epsilon", config.mac_bandit_epsilon),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(format!("Invalid {} {}, must be within [0, 1]", name, value));
        }
    }

    for (name, value) in [
        ("hello-delay", config.hello_delay),
        ("drone-retransmission-delta", config.drone_retransmission_delta),
        ("event-generation-delay", config.event_generation_delay),
        ("render-every", config.render_every),
        ("lil-delta", config.lil_delta),
    ] {
        if value == 0 {
            return Err(format!("Invalid {}, must be positive", name));
        }
    }

    if !(config.cell_prob_size_ratio > 0.0) {
        return Err("cell-prob-size-ratio must be positive".to_string());
    }

    let depot = config.depot_coordinates;
    if depot.x < 0.0 || depot.y < 0.0 || depot.x > config.env_width || depot.y > config.env_height {
        return Err(format!(
            "Depot ({}, {}) lies outside the {}x{} area",
            depot.x, depot.y, config.env_width, config.env_height
        ));
    }

    if let MissionConfig::Random { steps } = &config.mission {
        if steps.is_empty() || steps.contains(&0) {
            return Err("Random missions need a non-empty list of positive steps".to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&SimulationConfig::default()).is_ok());
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let config = SimulationConfig::from_toml_str(
            r#"
            n-drones = 5
            routing-algorithm = "move-geo"
            channel-error = "gaussian"
            mac-protocol = "round-robin"
            depot-coordinates = { x = 100.0, y = 0.0 }

            [mission]
            kind = "circle"
            "#,
        )
        .unwrap();
        assert_eq!(config.n_drones, 5);
        assert_eq!(config.routing_algorithm, RoutingAlgorithm::MoveGeo);
        assert_eq!(config.channel_error, ChannelErrorKind::Gaussian);
        assert_eq!(config.mac_protocol, Some(MacAlgorithm::RoundRobin));
        assert_eq!(config.depot_coordinates, Point::new(100.0, 0.0));
        assert_eq!(config.mission, MissionConfig::Circle);
        // untouched fields keep their defaults
        assert_eq!(config.hello_delay, 5);
    }

    #[test]
    fn json_is_accepted() {
        let config = SimulationConfig::from_json_str(r#"{ "seed": 11, "channel-error": "no-error" }"#).unwrap();
        assert_eq!(config.seed, 11);
        assert_eq!(config.channel_error, ChannelErrorKind::NoError);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = SimulationConfig::default();
        config.lil_delta = 0;
        assert!(validate_config(&config).unwrap_err().contains("lil-delta"));

        let mut config = SimulationConfig::default();
        config.event_generation_prob = 1.5;
        assert!(validate_config(&config).is_err());

        let mut config = SimulationConfig::default();
        config.depot_coordinates = Point::new(-1.0, 0.0);
        assert!(validate_config(&config).is_err());

        let mut config = SimulationConfig::default();
        config.mission = MissionConfig::Random { steps: vec![] };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = SimulationConfig::from_toml_str("n-drones = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::ParseError(_)));
        let err = SimulationConfig::from_toml_str("n-drones = 0").unwrap_err();
        assert!(matches!(err, ConfigLoadError::ValidationError(_)));
    }
}
