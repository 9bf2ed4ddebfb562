//! Simulation clock and tick loop.
//!
//! Tick order:
//! 1) The medium delivers due messages.
//! 2) Every `event-generation-delay` ticks a random drone may feel an event.
//! 3) Per drone in id order: scrub expired packets, run the routing pass, move.
//! 4) Optional probability-map bookkeeping.
//! 5) Optional depot MAC round.
//! 6) Delivery and expiry feedback goes to every drone that carried the packet.
//!
//! Every stochastic concern draws from its own ChaCha stream derived from the
//! master seed, so changing one subsystem never shifts the others.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;

use super::drone::{Depot, Drone, DroneSetup, FeelOutcome};
use super::geometry::{Point, all_cell_centers, coord_to_cell};
use super::mac::{DepotMac, MacFeedback};
use super::metrics::{Metrics, MetricsReport};
use super::network::{MediumDispatcher, PeerView};
use super::routing::{RoutingEngine, RoutingPass};
use super::signal_calculations::ChannelModel;
use super::types::{DeliveryFeedback, DroneId, Event, EventId, PacketId, SimulationError, Tick};
use crate::common::mission::PathProvider;
use crate::common::scene::{SimulationConfig, validate_config};

const NETWORK_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const ROUTING_SALT: u64 = 0xbf58_476d_1ce4_e5b9;
const ENVIRONMENT_SALT: u64 = 0x94d0_49bb_1331_11eb;
const EVENTS_SALT: u64 = 0x2545_f491_4f6c_dd1d;
const MAC_SALT: u64 = 0xd6e8_feb8_6659_fd93;
const PATHS_SALT: u64 = 0xa076_1d64_78bd_642f;

/// Progress is logged every this many ticks.
const PROGRESS_LOG_INTERVAL: Tick = 10_000;

/// Independently seeded random streams, one per concern.
pub struct RngStreams {
    pub network: ChaCha8Rng,
    pub routing: ChaCha8Rng,
    pub environment: ChaCha8Rng,
    pub events: ChaCha8Rng,
    pub mac: ChaCha8Rng,
    pub paths: ChaCha8Rng,
}

impl RngStreams {
    pub fn new(seed: u64) -> Self {
        Self {
            network: ChaCha8Rng::seed_from_u64(seed ^ NETWORK_SALT),
            routing: ChaCha8Rng::seed_from_u64(seed ^ ROUTING_SALT),
            environment: ChaCha8Rng::seed_from_u64(seed ^ ENVIRONMENT_SALT),
            events: ChaCha8Rng::seed_from_u64(seed ^ EVENTS_SALT),
            mac: ChaCha8Rng::seed_from_u64(seed ^ MAC_SALT),
            paths: ChaCha8Rng::seed_from_u64(seed ^ PATHS_SALT),
        }
    }
}

/// Per-drone speed and on-device channel success rate.
///
/// Drone 0 is the reference drone (nominal speed, perfect radio) and drone 1
/// is a deliberately slow one. The rest are drawn from `rng`.
pub fn drone_capabilities(config: &SimulationConfig, rng: &mut ChaCha8Rng) -> Vec<(f64, f64)> {
    let speed = config.drone_speed;
    if !config.heterogeneous_drones {
        return vec![(speed, 1.0); config.n_drones];
    }

    let mut capabilities: Vec<(f64, f64)> = (0..config.n_drones)
        .map(|_| {
            let drawn_speed = rng.gen_range(speed - speed / 2.0..speed + speed / 4.0);
            let success_rate = rng.gen_range(50..100) as f64 / 100.0;
            (drawn_speed, success_rate)
        })
        .collect();

    if let Some(first) = capabilities.get_mut(0) {
        *first = (speed, 1.0);
    }
    if let Some(second) = capabilities.get_mut(1) {
        second.0 = speed / 1.3;
    }
    capabilities
}

/// Occupancy statistics of one grid cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CellStats {
    /// Ticks with at least one drone inside the cell.
    pub visits: u64,
    pub observed_ticks: u64,
    pub probability: f64,
}

/// Per-cell probability that at least one drone is present.
#[derive(Debug, Clone)]
pub struct CellProbabilityMap {
    cell_size: f64,
    area_width: f64,
    cells: BTreeMap<u32, CellStats>,
}

impl CellProbabilityMap {
    pub fn new(config: &SimulationConfig) -> Self {
        let cell_size = config.cell_size();
        let cells = all_cell_centers(config.env_width, config.env_height, cell_size)
            .into_iter()
            .map(|(cell, _)| (cell, CellStats::default()))
            .collect();
        Self {
            cell_size,
            area_width: config.env_width,
            cells,
        }
    }

    pub fn update(&mut self, drones: &[Drone], current_tick: Tick, metrics: &mut Metrics) {
        let occupied: Vec<u32> = drones
            .iter()
            .map(|drone| coord_to_cell(self.cell_size, self.area_width, &drone.position).0)
            .collect();

        for (cell, stats) in self.cells.iter_mut() {
            if occupied.contains(cell) {
                stats.visits += 1;
                metrics.record_cell_visit(*cell);
            }
            stats.observed_ticks = current_tick + 1;
            stats.probability = stats.visits as f64 / stats.observed_ticks.max(1) as f64;
        }
    }

    pub fn cell(&self, cell: u32) -> Option<&CellStats> {
        self.cells.get(&cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Read-only view of one drone for renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneSnapshot {
    pub id: DroneId,
    pub position: Point,
    pub next_target: Point,
    pub buffer_length: usize,
    pub move_routing: bool,
    pub come_back_to_mission: bool,
    pub residual_energy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub tick: Tick,
    pub drones: Vec<DroneSnapshot>,
    pub depot: Point,
    pub depot_packets: usize,
    pub in_flight: usize,
}

/// Consumer of periodic snapshots. Never mutates the simulation.
pub trait SnapshotObserver {
    fn on_snapshot(&mut self, snapshot: &Snapshot);
}

impl<F: FnMut(&Snapshot)> SnapshotObserver for F {
    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        self(snapshot)
    }
}

pub struct Simulator {
    config: SimulationConfig,
    drones: Vec<Drone>,
    depot: Depot,
    medium: MediumDispatcher,
    mac: Option<DepotMac>,
    last_mac_feedback: Option<MacFeedback>,
    probability_map: Option<CellProbabilityMap>,
    metrics: Metrics,
    rngs: RngStreams,
    current_tick: Tick,
    next_event_id: EventId,
    next_packet_id: PacketId,
    pending_feedback: Vec<DeliveryFeedback>,
}

impl Simulator {
    /// Build the fleet, the depot and every subsystem from `config`.
    ///
    /// The configuration is validated first, so a hand-built one is held to
    /// the same rules as a loaded file.
    pub fn new(config: SimulationConfig, paths: &PathProvider) -> Result<Self, SimulationError> {
        validate_config(&config).map_err(SimulationError::InvalidConfig)?;

        let mut rngs = RngStreams::new(config.seed);
        let capabilities = drone_capabilities(&config, &mut rngs.environment);

        let mut drones = Vec::with_capacity(config.n_drones);
        for (id, &(speed, success_rate)) in capabilities.iter().enumerate() {
            let path = paths.path(id, &mut rngs.paths);
            drones.push(Drone::new(DroneSetup {
                id,
                path,
                speed,
                communication_range: config.drone_communication_range,
                sensing_range: config.drone_sensing_range,
                max_buffer_size: config.drone_max_buffer_size,
                max_energy: config.drone_max_energy,
                depot_position: config.depot_coordinates,
                channel: ChannelModel::new(config.channel_error, config.drone_communication_range, success_rate, &config),
                router: RoutingEngine::new(&config, id),
            })?);
        }

        log::info!(
            "Simulation ready: {} drones, {} ticks of {} s, routing {:?}, channel {:?}, MAC {:?}",
            config.n_drones,
            config.sim_duration,
            config.tick_duration,
            config.routing_algorithm,
            config.channel_error,
            config.mac_protocol
        );

        Ok(Self {
            depot: Depot::new(config.depot_coordinates, config.depot_communication_range),
            medium: MediumDispatcher::new(),
            mac: config.mac_protocol.map(|algorithm| DepotMac::new(algorithm, &config)),
            last_mac_feedback: None,
            probability_map: config.enable_probabilities.then(|| CellProbabilityMap::new(&config)),
            metrics: Metrics::new(config.n_drones),
            rngs,
            current_tick: 0,
            next_event_id: 0,
            next_packet_id: 0,
            pending_feedback: Vec::new(),
            drones,
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn drones(&self) -> &[Drone] {
        &self.drones
    }

    pub fn depot(&self) -> &Depot {
        &self.depot
    }

    pub fn medium(&self) -> &MediumDispatcher {
        &self.medium
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn probability_map(&self) -> Option<&CellProbabilityMap> {
        self.probability_map.as_ref()
    }

    /// Outcome of the most recent depot MAC round that allocated a drone.
    pub fn last_mac_feedback(&self) -> Option<MacFeedback> {
        self.last_mac_feedback
    }

    /// Make drone `drone_id` feel an event lasting `duration` ticks at its
    /// current position.
    pub fn inject_event(&mut self, drone_id: DroneId, duration: Tick) -> Result<EventId, SimulationError> {
        let tick = self.current_tick;
        let drone = self.drones.get_mut(drone_id).ok_or(SimulationError::UnknownDrone(drone_id))?;

        let event = Event::new(self.next_event_id, drone.position, tick, duration);
        self.next_event_id += 1;
        let packet = event.as_packet(self.next_packet_id, drone_id);
        self.next_packet_id += 1;

        match drone.feel_event(packet) {
            FeelOutcome::Buffered { evicted } => {
                if evicted.is_some() {
                    self.metrics.record_overflow();
                }
                self.metrics.record_event(event, true);
                log::debug!("Drone {} felt event {} at tick {}", drone_id, event.id, tick);
            }
            FeelOutcome::NotListened => {
                self.metrics.record_event(event, false);
                log::debug!("Drone {} missed event {} while diverting", drone_id, event.id);
            }
        }
        Ok(event.id)
    }

    fn generate_events(&mut self) -> Result<(), SimulationError> {
        if self.current_tick % self.config.event_generation_delay != 0 {
            return Ok(());
        }
        let drone_id = self.rngs.events.gen_range(0..self.drones.len());
        if self.rngs.events.gen_bool(self.config.event_generation_prob) {
            self.inject_event(drone_id, self.config.event_duration)?;
        }
        Ok(())
    }

    fn dispatch_feedback(&mut self) {
        for feedback in self.pending_feedback.drain(..) {
            let mut notified: Vec<DroneId> = Vec::with_capacity(feedback.hops.len());
            for &hop in &feedback.hops {
                if notified.contains(&hop) {
                    continue;
                }
                notified.push(hop);
                if let Some(drone) = self.drones.get_mut(hop) {
                    drone.router.feedback(&feedback);
                }
            }
        }
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) -> Result<(), SimulationError> {
        let tick = self.current_tick;

        self.medium
            .run_medium(tick, &mut self.drones, &self.config, &mut self.rngs.network, &mut self.metrics)?;

        self.generate_events()?;

        for index in 0..self.drones.len() {
            let peers: Vec<PeerView> = self.drones.iter().map(PeerView::of).collect();
            let drone = &mut self.drones[index];

            let expired = drone.update_packets(tick, &mut self.metrics);
            self.pending_feedback.extend(expired);

            drone.routing(&mut RoutingPass {
                tick,
                config: &self.config,
                peers: &peers,
                medium: &mut self.medium,
                depot: &mut self.depot,
                metrics: &mut self.metrics,
                rng: &mut self.rngs.routing,
                feedback: &mut self.pending_feedback,
            });

            drone.move_drone(self.config.tick_duration)?;
            drone.check_no_duplicates()?;
        }

        if let Some(map) = self.probability_map.as_mut() {
            map.update(&self.drones, tick, &mut self.metrics);
        }

        if let Some(mac) = self.mac.as_mut() {
            let feedback = mac.run(tick, &mut self.drones, &mut self.depot, &mut self.rngs.mac, &mut self.metrics, &mut self.pending_feedback);
            if feedback.is_some() {
                self.last_mac_feedback = feedback;
            }
        }

        self.dispatch_feedback();
        self.current_tick += 1;
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.current_tick,
            drones: self
                .drones
                .iter()
                .map(|drone| DroneSnapshot {
                    id: drone.id,
                    position: drone.position,
                    next_target: drone.next_target(),
                    buffer_length: drone.buffer_length(),
                    move_routing: drone.move_routing,
                    come_back_to_mission: drone.come_back_to_mission,
                    residual_energy: drone.residual_energy,
                })
                .collect(),
            depot: self.depot.position,
            depot_packets: self.depot.all_packets().len(),
            in_flight: self.medium.len(),
        }
    }

    /// Run the remaining ticks.
    pub fn run(&mut self) -> Result<(), SimulationError> {
        self.run_until(self.config.sim_duration, None)
    }

    /// Run the remaining ticks, handing a snapshot to `observer` every
    /// `render-every` ticks.
    pub fn run_with_observer(&mut self, observer: &mut dyn SnapshotObserver) -> Result<(), SimulationError> {
        self.run_until(self.config.sim_duration, Some(observer))
    }

    fn run_until(&mut self, end_tick: Tick, mut observer: Option<&mut dyn SnapshotObserver>) -> Result<(), SimulationError> {
        while self.current_tick < end_tick {
            self.step()?;

            if self.current_tick % PROGRESS_LOG_INTERVAL == 0 {
                log::info!("Tick {}/{}", self.current_tick, end_tick);
            }
            if let Some(observer) = observer.as_deref_mut() {
                if self.current_tick % self.config.render_every == 0 {
                    observer.on_snapshot(&self.snapshot());
                }
            }
        }
        log::info!(
            "Simulation finished at tick {}: {} packets delivered, {} expired",
            self.current_tick,
            self.metrics.packets_delivered(),
            self.metrics.packets_expired
        );
        Ok(())
    }

    /// Final metrics of the run so far.
    pub fn report(&self) -> MetricsReport {
        self.metrics.report(&self.drones, self.config.event_duration, self.current_tick)
    }
}
