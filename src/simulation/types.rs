//! Type definitions for the simulation.
//!
//! Contains the data structures exchanged across the simulation:
//! - Identifiers and the discrete clock unit
//! - Sensed events and the packets derived from them
//! - Control packets (beacons and acknowledgements)
//! - Fatal simulation errors

use serde::Serialize;

use super::geometry::Point;

/// One discrete simulation step.
pub type Tick = u64;

/// Drone identifier. Drones are numbered `0..n_drones` and the id doubles as
/// the index into the simulator's drone list.
pub type DroneId = usize;

pub type EventId = u64;

pub type PacketId = u64;

/// A sensed phenomenon.
///
/// `deadline >= generation_tick` always holds; the event expires strictly
/// after its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Event {
    pub id: EventId,
    pub position: Point,
    pub generation_tick: Tick,
    pub deadline: Tick,
}

impl Event {
    /// Create an event lasting `duration` ticks from `generation_tick`.
    pub fn new(id: EventId, position: Point, generation_tick: Tick, duration: Tick) -> Self {
        Self::with_deadline(id, position, generation_tick, generation_tick.saturating_add(duration))
    }

    /// Create an event with an explicit deadline. A deadline in the past is
    /// clamped to the generation tick.
    pub fn with_deadline(id: EventId, position: Point, generation_tick: Tick, deadline: Tick) -> Self {
        Self {
            id,
            position,
            generation_tick,
            deadline: deadline.max(generation_tick),
        }
    }

    pub fn is_expired(&self, current_tick: Tick) -> bool {
        current_tick > self.deadline
    }

    /// Build the data packet carrying this event, first hop being the drone
    /// that sensed it. The packet shares the event's deadline.
    pub fn as_packet(&self, packet_id: PacketId, sensing_drone: DroneId) -> DataPacket {
        DataPacket {
            id: packet_id,
            event: *self,
            hops: vec![sensing_drone],
            time_delivery: None,
        }
    }
}

/// Packet carrying a sensed event towards the depot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPacket {
    pub id: PacketId,
    pub event: Event,
    /// Drones that carried this copy, in order. The first entry sensed the event.
    pub hops: Vec<DroneId>,
    /// Tick at which the depot received this copy.
    pub time_delivery: Option<Tick>,
}

impl DataPacket {
    pub fn deadline(&self) -> Tick {
        self.event.deadline
    }

    pub fn is_expired(&self, current_tick: Tick) -> bool {
        self.event.is_expired(current_tick)
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    pub fn add_hop(&mut self, drone: DroneId) {
        self.hops.push(drone);
    }
}

/// Beacon advertising a drone's kinematic state for neighbour discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloPacket {
    pub source: DroneId,
    pub position: Point,
    pub speed: f64,
    pub next_target: Point,
    pub creation_tick: Tick,
    /// Whether the sender is currently diverting to the depot.
    pub move_routing: bool,
}

/// Acknowledgement that `destination`'s data packet was taken over by `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct AckPacket {
    pub source: DroneId,
    pub destination: DroneId,
    pub acked_packet: PacketId,
    pub acked_event: EventId,
    pub creation_tick: Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Data(DataPacket),
    Hello(HelloPacket),
    Ack(AckPacket),
}

impl Packet {
    /// Data packets are counted separately from control traffic (beacons and ACKs).
    pub fn is_data(&self) -> bool {
        matches!(self, Packet::Data(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Data(_) => "data",
            Packet::Hello(_) => "hello",
            Packet::Ack(_) => "ack",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Expired,
}

/// Final fate of one packet copy, reported to every drone that carried it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFeedback {
    pub event: EventId,
    pub packet: PacketId,
    pub hops: Vec<DroneId>,
    pub outcome: DeliveryOutcome,
    /// Ticks between event generation and delivery (or expiry).
    pub delay: Tick,
}

impl DeliveryFeedback {
    pub fn new(packet: &DataPacket, outcome: DeliveryOutcome, current_tick: Tick) -> Self {
        Self {
            event: packet.event.id,
            packet: packet.id,
            hops: packet.hops.clone(),
            outcome,
            delay: current_tick.saturating_sub(packet.event.generation_tick),
        }
    }
}

/// Fatal errors. Any of these aborts the run: they indicate either a
/// degenerate configuration or a broken invariant.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// A drone had distance left to travel but a zero movement budget.
    DegenerateMove { drone: DroneId, remaining: f64 },
    /// Interpolation fraction came out negative.
    NegativeInterpolation { drone: DroneId, ratio: f64 },
    /// Two packets for the same event ended up in one buffer.
    DuplicateEvent { drone: DroneId, event: EventId },
    /// A message referenced a drone that does not exist.
    UnknownDrone(DroneId),
    /// A drone was given an empty mission path.
    EmptyPath(DroneId),
    /// The configuration failed validation.
    InvalidConfig(String),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::DegenerateMove { drone, remaining } => {
                write!(f, "Drone {} cannot move: {:.3} m remaining but zero step length", drone, remaining)
            }
            SimulationError::NegativeInterpolation { drone, ratio } => {
                write!(f, "Drone {} computed negative interpolation ratio {}", drone, ratio)
            }
            SimulationError::DuplicateEvent { drone, event } => {
                write!(f, "Drone {} buffer holds event {} twice", drone, event)
            }
            SimulationError::UnknownDrone(drone) => write!(f, "Unknown drone id {}", drone),
            SimulationError::EmptyPath(drone) => write!(f, "Drone {} has an empty mission path", drone),
            SimulationError::InvalidConfig(reason) => write!(f, "Invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for SimulationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_expires_strictly_after_deadline() {
        let event = Event::new(1, Point::new(0.0, 0.0), 100, 10);
        assert_eq!(event.deadline, 110);
        assert!(!event.is_expired(110));
        assert!(event.is_expired(111));
    }

    #[test]
    fn explicit_deadline_never_precedes_generation() {
        let event = Event::with_deadline(2, Point::new(1.0, 1.0), 50, 20);
        assert_eq!(event.deadline, 50);
    }

    #[test]
    fn packet_shares_event_deadline_and_records_sensor() {
        let event = Event::new(3, Point::new(5.0, 5.0), 7, 3);
        let packet = event.as_packet(42, 4);
        assert_eq!(packet.deadline(), 10);
        assert_eq!(packet.hops, vec![4]);
        assert!(packet.time_delivery.is_none());
        assert!(Packet::Data(packet).is_data());
    }

    #[test]
    fn error_messages_name_the_drone() {
        let err = SimulationError::DegenerateMove { drone: 3, remaining: 12.5 };
        assert!(err.to_string().contains("Drone 3"));
    }
}
