//! Drone and depot entities.
//!
//! A drone owns its mission path, its packet buffer, its movement flags, and
//! its routing engine. The depot is a fixed sink with an unbounded buffer.
//!
//! Buffer rules:
//! - At most one packet per event (deduplicated on reception)
//! - Bounded by `drone-max-buffer-size`; overflow evicts the oldest packet
//! - Expired packets are scrubbed once per tick before routing runs

use std::collections::VecDeque;

use super::geometry::{Point, euclidean_distance, interpolate};
use super::metrics::Metrics;
use super::routing::RoutingEngine;
use super::signal_calculations::ChannelModel;
use super::types::{DataPacket, DeliveryFeedback, DeliveryOutcome, DroneId, EventId, SimulationError, Tick};

/// Seconds of slack used by the early-return heuristic.
const EXPIRY_TOLERANCE_SECONDS: f64 = 5.0;

/// Result of a drone sensing an event.
#[derive(Debug, PartialEq)]
pub enum FeelOutcome {
    /// Packet buffered; `evicted` is the oldest packet dropped to make room.
    Buffered { evicted: Option<DataPacket> },
    /// The drone was diverting and missed the event.
    NotListened,
}

/// Result of a drone taking over a relayed packet.
#[derive(Debug, PartialEq)]
pub enum AcceptOutcome {
    Accepted { evicted: Option<DataPacket> },
    /// The buffer already holds a packet for the same event.
    Duplicate,
}

pub struct Drone {
    pub id: DroneId,
    pub position: Point,
    path: Vec<Point>,
    /// Index into `path` of the waypoint currently flown to.
    next_waypoint: usize,
    pub speed: f64,
    pub communication_range: f64,
    pub sensing_range: f64,
    pub channel: ChannelModel,
    buffer: VecDeque<DataPacket>,
    max_buffer_size: usize,
    depot_position: Point,

    /// Diverting to the depot.
    pub move_routing: bool,
    /// Returning to the point where the mission was interrupted.
    pub come_back_to_mission: bool,
    last_move_routing: bool,
    last_mission_coords: Option<Point>,

    /// Remaining flight budget in meters.
    pub residual_energy: f64,
    /// Smallest deadline among buffered packets, `None` when the buffer is empty.
    pub tightest_deadline: Option<Tick>,
    pub distance_from_depot: f64,
    /// Packets lost (expired or evicted) since the depot last polled this drone.
    pub dropped_since_last_upload: u32,

    pub time_on_mission: u64,
    pub time_on_active_routing: u64,

    pub router: RoutingEngine,
}

/// Parameters a drone is built from.
pub struct DroneSetup {
    pub id: DroneId,
    pub path: Vec<Point>,
    pub speed: f64,
    pub communication_range: f64,
    pub sensing_range: f64,
    pub max_buffer_size: usize,
    pub max_energy: f64,
    pub depot_position: Point,
    pub channel: ChannelModel,
    pub router: RoutingEngine,
}

impl Drone {
    /// Create a drone standing on the first waypoint of its path.
    pub fn new(setup: DroneSetup) -> Result<Self, SimulationError> {
        let position = *setup.path.first().ok_or(SimulationError::EmptyPath(setup.id))?;
        let next_waypoint = 1 % setup.path.len();
        Ok(Self {
            id: setup.id,
            position,
            next_waypoint,
            path: setup.path,
            speed: setup.speed,
            communication_range: setup.communication_range,
            sensing_range: setup.sensing_range,
            channel: setup.channel,
            buffer: VecDeque::new(),
            max_buffer_size: setup.max_buffer_size,
            depot_position: setup.depot_position,
            move_routing: false,
            come_back_to_mission: false,
            last_move_routing: false,
            last_mission_coords: None,
            residual_energy: setup.max_energy,
            tightest_deadline: None,
            distance_from_depot: euclidean_distance(&position, &setup.depot_position),
            dropped_since_last_upload: 0,
            time_on_mission: 0,
            time_on_active_routing: 0,
            router: setup.router,
        })
    }

    pub fn buffer_length(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.max_buffer_size
    }

    pub fn packets(&self) -> impl Iterator<Item = &DataPacket> {
        self.buffer.iter()
    }

    pub fn path(&self) -> &[Point] {
        &self.path
    }

    pub fn has_event(&self, event: EventId) -> bool {
        self.buffer.iter().any(|p| p.event.id == event)
    }

    pub fn update_distance_from_depot(&mut self) {
        self.distance_from_depot = euclidean_distance(&self.position, &self.depot_position);
    }

    /// Append a packet, evicting the oldest one when the buffer is full.
    fn store(&mut self, packet: DataPacket) -> Option<DataPacket> {
        let evicted = if self.is_full() { self.buffer.pop_front() } else { None };
        if let Some(old) = &evicted {
            self.dropped_since_last_upload += 1;
            log::warn!("Drone {} buffer full, dropping packet for event {}", self.id, old.event.id);
        }
        self.buffer.push_back(packet);
        evicted
    }

    /// Sense an event. Diverting drones miss it.
    pub fn feel_event(&mut self, packet: DataPacket) -> FeelOutcome {
        if self.move_routing || self.come_back_to_mission {
            return FeelOutcome::NotListened;
        }
        FeelOutcome::Buffered {
            evicted: self.store(packet),
        }
    }

    /// Take over a packet relayed by a neighbour, recording this drone as a hop.
    pub fn accept_packet(&mut self, mut packet: DataPacket) -> AcceptOutcome {
        if self.has_event(packet.event.id) {
            return AcceptOutcome::Duplicate;
        }
        packet.add_hop(self.id);
        AcceptOutcome::Accepted {
            evicted: self.store(packet),
        }
    }

    /// Remove the packet carrying `event`, if any.
    pub fn remove_packet(&mut self, event: EventId) -> Option<DataPacket> {
        let index = self.buffer.iter().position(|p| p.event.id == event)?;
        self.buffer.remove(index)
    }

    pub fn drain_buffer(&mut self) -> Vec<DataPacket> {
        self.buffer.drain(..).collect()
    }

    /// Remove and return the most recently buffered packet.
    pub fn pop_most_recent(&mut self) -> Option<DataPacket> {
        self.buffer.pop_back()
    }

    /// Drop expired packets and recompute the tightest deadline.
    ///
    /// Every dropped packet is counted as a loss in `metrics` and returned as
    /// expiry feedback for the drones that carried it.
    pub fn update_packets(&mut self, current_tick: Tick, metrics: &mut Metrics) -> Vec<DeliveryFeedback> {
        let mut expired = Vec::new();
        self.buffer.retain(|packet| {
            if packet.is_expired(current_tick) {
                expired.push(DeliveryFeedback::new(packet, DeliveryOutcome::Expired, current_tick));
                false
            } else {
                true
            }
        });

        for feedback in &expired {
            log::debug!("Drone {} dropped expired packet for event {}", self.id, feedback.event);
            metrics.record_expiry(self.id);
        }
        self.dropped_since_last_upload += expired.len() as u32;

        self.tightest_deadline = self.buffer.iter().map(|p| p.deadline()).min();
        if self.buffer.is_empty() {
            self.move_routing = false;
        }
        expired
    }

    /// Whether the tightest deadline is about to pass given the flight time
    /// back to the depot.
    ///
    /// # Formula
    ///
    /// ```text
    /// time_to_depot = distance_from_depot / speed
    /// time_to_dead  = (tightest_deadline - current_tick) × tick_duration
    /// expiring      = time_to_dead - 5 < time_to_depot <= time_to_dead
    /// ```
    pub fn packet_is_expiring(&self, current_tick: Tick, tick_duration: f64) -> bool {
        let Some(deadline) = self.tightest_deadline else {
            return false;
        };
        let time_to_depot = self.distance_from_depot / self.speed;
        let time_to_dead = (deadline as f64 - current_tick as f64) * tick_duration;
        time_to_dead - EXPIRY_TOLERANCE_SECONDS < time_to_depot && time_to_depot <= time_to_dead
    }

    /// Point the drone is currently flying to.
    pub fn next_target(&self) -> Point {
        if self.move_routing {
            self.depot_position
        } else if self.come_back_to_mission {
            self.last_mission_coords.unwrap_or(self.position)
        } else {
            self.path[self.next_waypoint]
        }
    }

    /// Advance the drone by one tick of flight.
    ///
    /// Diverting drones fly to the depot, remembering where the mission was
    /// left. Once the diversion ends they fly back to that point and then
    /// resume their waypoints.
    pub fn move_drone(&mut self, tick_duration: f64) -> Result<(), SimulationError> {
        if self.move_routing || self.come_back_to_mission {
            self.time_on_active_routing += 1;
        }

        if self.move_routing {
            if !self.last_move_routing {
                self.last_mission_coords = Some(self.position);
            }
            self.move_to_depot(tick_duration)?;
        } else {
            if self.last_move_routing {
                self.come_back_to_mission = true;
            }
            self.move_to_mission(tick_duration)?;
            self.time_on_mission += 1;
        }

        self.last_move_routing = self.move_routing;
        Ok(())
    }

    fn move_to_depot(&mut self, tick_duration: f64) -> Result<(), SimulationError> {
        let target = self.depot_position;
        if euclidean_distance(&self.position, &target) == 0.0 {
            self.move_routing = false;
            return Ok(());
        }
        self.step_towards(target, tick_duration)?;
        Ok(())
    }

    fn move_to_mission(&mut self, tick_duration: f64) -> Result<(), SimulationError> {
        let target = self.next_target();
        if self.step_towards(target, tick_duration)? {
            if self.come_back_to_mission {
                self.come_back_to_mission = false;
            } else {
                self.next_waypoint = (self.next_waypoint + 1) % self.path.len();
            }
        }
        Ok(())
    }

    /// Move up to `speed × tick_duration` meters towards `target`.
    ///
    /// Returns `true` when the target was reached this tick.
    fn step_towards(&mut self, target: Point, tick_duration: f64) -> Result<bool, SimulationError> {
        let remaining = euclidean_distance(&self.position, &target);
        if remaining == 0.0 {
            return Ok(true);
        }

        let step = self.speed * tick_duration;
        if step == 0.0 {
            return Err(SimulationError::DegenerateMove { drone: self.id, remaining });
        }

        let t = step / remaining;
        if t < 0.0 || t.is_nan() {
            return Err(SimulationError::NegativeInterpolation { drone: self.id, ratio: t });
        }

        if t >= 1.0 {
            self.position = target;
            self.consume_energy(remaining);
            Ok(true)
        } else {
            self.position = interpolate(&self.position, &target, t);
            self.consume_energy(step);
            Ok(false)
        }
    }

    fn consume_energy(&mut self, meters: f64) {
        self.residual_energy = (self.residual_energy - meters).max(0.0);
    }

    /// Check the one-packet-per-event buffer invariant.
    pub fn check_no_duplicates(&self) -> Result<(), SimulationError> {
        for (i, packet) in self.buffer.iter().enumerate() {
            if self.buffer.iter().skip(i + 1).any(|other| other.event.id == packet.event.id) {
                return Err(SimulationError::DuplicateEvent {
                    drone: self.id,
                    event: packet.event.id,
                });
            }
        }
        Ok(())
    }
}

/// Fixed data sink. Keeps every packet it receives, duplicates included.
pub struct Depot {
    pub position: Point,
    pub communication_range: f64,
    buffer: Vec<DataPacket>,
}

impl Depot {
    pub fn new(position: Point, communication_range: f64) -> Self {
        Self {
            position,
            communication_range,
            buffer: Vec::new(),
        }
    }

    pub fn all_packets(&self) -> &[DataPacket] {
        &self.buffer
    }

    /// Store one packet uploaded by `carrier`, stamping its delivery tick.
    pub fn add_packet(&mut self, carrier: DroneId, mut packet: DataPacket, current_tick: Tick, metrics: &mut Metrics) -> DeliveryFeedback {
        packet.time_delivery = Some(current_tick);
        metrics.record_delivery(carrier, &packet, current_tick);
        let feedback = DeliveryFeedback::new(&packet, DeliveryOutcome::Delivered, current_tick);
        self.buffer.push(packet);
        feedback
    }

    /// Store a whole offloaded buffer.
    pub fn transfer_notified_packets(
        &mut self,
        carrier: DroneId,
        packets: Vec<DataPacket>,
        current_tick: Tick,
        metrics: &mut Metrics,
    ) -> Vec<DeliveryFeedback> {
        packets
            .into_iter()
            .map(|packet| self.add_packet(carrier, packet, current_tick, metrics))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scene::{ChannelErrorKind, SimulationConfig};
    use crate::simulation::routing::RoutingEngine;
    use crate::simulation::types::Event;

    fn test_drone(id: DroneId, path: Vec<Point>, speed: f64, max_buffer: usize) -> Drone {
        let config = SimulationConfig::default();
        Drone::new(DroneSetup {
            id,
            path,
            speed,
            communication_range: 200.0,
            sensing_range: 0.0,
            max_buffer_size: max_buffer,
            max_energy: 1_000.0,
            depot_position: Point::new(0.0, 0.0),
            channel: ChannelModel::new(ChannelErrorKind::NoError, 200.0, 1.0, &config),
            router: RoutingEngine::new(&config, id),
        })
        .unwrap()
    }

    fn packet(event: EventId, deadline: Tick) -> DataPacket {
        Event::with_deadline(event, Point::new(0.0, 0.0), 0, deadline).as_packet(event, 0)
    }

    #[test]
    fn empty_path_is_rejected() {
        let config = SimulationConfig::default();
        let result = Drone::new(DroneSetup {
            id: 4,
            path: vec![],
            speed: 1.0,
            communication_range: 1.0,
            sensing_range: 0.0,
            max_buffer_size: 1,
            max_energy: 1.0,
            depot_position: Point::new(0.0, 0.0),
            channel: ChannelModel::new(ChannelErrorKind::NoError, 1.0, 1.0, &config),
            router: RoutingEngine::new(&config, 4),
        });
        assert!(matches!(result, Err(SimulationError::EmptyPath(4))));
    }

    #[test]
    fn accept_deduplicates_by_event() {
        let mut drone = test_drone(1, vec![Point::new(10.0, 0.0)], 1.0, 10);
        assert!(matches!(drone.accept_packet(packet(7, 100)), AcceptOutcome::Accepted { evicted: None }));
        assert_eq!(drone.accept_packet(packet(7, 100)), AcceptOutcome::Duplicate);
        assert_eq!(drone.buffer_length(), 1);
        assert_eq!(drone.packets().next().unwrap().hops, vec![0, 1]);
        assert!(drone.check_no_duplicates().is_ok());
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut drone = test_drone(0, vec![Point::new(10.0, 0.0)], 1.0, 2);
        drone.feel_event(packet(1, 100));
        drone.feel_event(packet(2, 100));
        let outcome = drone.feel_event(packet(3, 100));
        match outcome {
            FeelOutcome::Buffered { evicted: Some(old) } => assert_eq!(old.event.id, 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(drone.dropped_since_last_upload, 1);
        assert_eq!(drone.pop_most_recent().unwrap().event.id, 3);
    }

    #[test]
    fn diverting_drone_misses_events() {
        let mut drone = test_drone(0, vec![Point::new(10.0, 0.0)], 1.0, 2);
        drone.move_routing = true;
        assert_eq!(drone.feel_event(packet(1, 100)), FeelOutcome::NotListened);
        assert_eq!(drone.buffer_length(), 0);
    }

    #[test]
    fn scrub_drops_expired_and_clears_diversion() {
        let mut metrics = Metrics::new(1);
        let mut drone = test_drone(0, vec![Point::new(10.0, 0.0)], 1.0, 10);
        drone.feel_event(packet(1, 5));
        drone.feel_event(packet(2, 8));
        drone.move_routing = true;

        let expired = drone.update_packets(6, &mut metrics);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].event, 1);
        assert_eq!(drone.tightest_deadline, Some(8));
        assert!(drone.move_routing);

        drone.update_packets(9, &mut metrics);
        assert_eq!(drone.buffer_length(), 0);
        assert_eq!(drone.tightest_deadline, None);
        assert!(!drone.move_routing);
        assert_eq!(drone.dropped_since_last_upload, 2);
    }

    #[test]
    fn moves_along_waypoints_and_wraps() {
        let mut drone = test_drone(0, vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)], 4.0, 10);
        drone.move_drone(1.0).unwrap();
        assert!((drone.position.x - 4.0).abs() < 1e-9);
        assert_eq!(drone.position.y, 0.0);
        drone.move_drone(1.0).unwrap();
        drone.move_drone(1.0).unwrap();
        assert_eq!(drone.position, Point::new(10.0, 0.0));
        // wrapped back to the first waypoint
        assert_eq!(drone.next_target(), Point::new(0.0, 0.0));
        assert_eq!(drone.time_on_mission, 3);
    }

    #[test]
    fn diversion_returns_to_interrupted_point() {
        let close = |p: Point, x: f64, y: f64| (p.x - x).abs() < 1e-9 && (p.y - y).abs() < 1e-9;
        let mut drone = test_drone(0, vec![Point::new(0.0, 32.0), Point::new(0.0, 100.0)], 16.0, 10);
        drone.move_routing = true;
        drone.move_drone(1.0).unwrap();
        assert!(close(drone.position, 0.0, 16.0));
        drone.move_drone(1.0).unwrap();
        assert_eq!(drone.position, Point::new(0.0, 0.0));
        assert_eq!(drone.next_target(), Point::new(0.0, 0.0));

        drone.move_routing = false;
        drone.move_drone(1.0).unwrap();
        assert!(drone.come_back_to_mission);
        assert!(close(drone.position, 0.0, 16.0));
        assert_eq!(drone.next_target(), Point::new(0.0, 32.0));

        drone.move_drone(1.0).unwrap();
        assert!(!drone.come_back_to_mission);
        assert_eq!(drone.position, Point::new(0.0, 32.0));
        assert_eq!(drone.next_target(), Point::new(0.0, 100.0));
        assert_eq!(drone.time_on_active_routing, 3);
    }

    #[test]
    fn zero_speed_with_distance_left_is_fatal() {
        let mut drone = test_drone(2, vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0)], 0.0, 10);
        assert!(matches!(drone.move_drone(1.0), Err(SimulationError::DegenerateMove { drone: 2, .. })));
    }

    #[test]
    fn expiring_window_uses_flight_time() {
        let mut drone = test_drone(0, vec![Point::new(100.0, 0.0)], 10.0, 10);
        drone.update_distance_from_depot();
        // 10 s to the depot
        drone.tightest_deadline = Some(12);
        assert!(drone.packet_is_expiring(0, 1.0));
        drone.tightest_deadline = Some(20);
        assert!(!drone.packet_is_expiring(0, 1.0));
    }

    #[test]
    fn depot_stamps_delivery() {
        let mut metrics = Metrics::new(1);
        let mut depot = Depot::new(Point::new(0.0, 0.0), 200.0);
        let feedback = depot.transfer_notified_packets(0, vec![packet(1, 100), packet(1, 100)], 42, &mut metrics);
        assert_eq!(feedback.len(), 2);
        assert_eq!(depot.all_packets().len(), 2);
        assert!(depot.all_packets().iter().all(|p| p.time_delivery == Some(42)));
        assert_eq!(feedback[0].delay, 42);
    }
}
