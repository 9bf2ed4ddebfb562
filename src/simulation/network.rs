//! Shared wireless medium.
//!
//! Every drone-to-drone message goes through the [`MediumDispatcher`]:
//! 1) `send_packet_to_medium` queues the packet with a fixed latency of
//!    `lil-delta` ticks and counts it as data or control traffic.
//! 2) `run_medium` at the start of each tick takes the due entries and
//!    delivers each one independently if the endpoints differ, are within
//!    `min(range_src, range_dst)` on *current* positions, and the receiver's
//!    channel model lets the packet through.
//! 3) Entries that fail are dropped for good. Retrying is up to the routing
//!    engine, on its own schedule.

use rand_chacha::ChaCha8Rng;

use super::drone::Drone;
use super::geometry::{Point, distance2, euclidean_distance};
use super::metrics::Metrics;
use super::types::{DroneId, Packet, SimulationError, Tick};
use crate::common::scene::SimulationConfig;

/// A message in flight.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub packet: Packet,
    pub source: DroneId,
    pub destination: DroneId,
    pub delivery_tick: Tick,
}

/// Read-only view of another drone, taken right before a routing pass.
#[derive(Debug, Clone, Copy)]
pub struct PeerView {
    pub id: DroneId,
    pub position: Point,
    pub communication_range: f64,
}

impl PeerView {
    pub fn of(drone: &Drone) -> Self {
        Self {
            id: drone.id,
            position: drone.position,
            communication_range: drone.communication_range,
        }
    }
}

/// Find every peer within `min(own range, peer range)` of `position`.
///
/// Returns `(peer id, distance)` pairs, excluding `own_id`.
pub fn find_drones_in_range(own_id: DroneId, position: &Point, range: f64, peers: &[PeerView]) -> Vec<(DroneId, f64)> {
    let mut in_range = Vec::new();
    for peer in peers {
        if peer.id == own_id {
            continue;
        }
        let reach = range.min(peer.communication_range);
        let d2 = distance2(position, &peer.position);
        if d2 <= reach * reach {
            in_range.push((peer.id, d2.sqrt()));
        }
    }
    in_range
}

#[derive(Debug, Default)]
pub struct MediumDispatcher {
    queue: Vec<QueuedMessage>,
}

impl MediumDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages still in flight.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> &[QueuedMessage] {
        &self.queue
    }

    /// Queue `packet` for delivery at `current_tick + lil_delta`.
    pub fn send_packet_to_medium(&mut self, packet: Packet, source: DroneId, destination: DroneId, current_tick: Tick, lil_delta: Tick, metrics: &mut Metrics) {
        metrics.record_sent(packet.is_data());
        log::trace!("Queued {} packet {} -> {} for tick {}", packet.kind(), source, destination, current_tick + lil_delta);
        self.queue.push(QueuedMessage {
            packet,
            source,
            destination,
            delivery_tick: current_tick + lil_delta,
        });
    }

    /// Deliver or drop every message due at `current_tick`.
    ///
    /// Messages produced while handling a reception (acknowledgements) are
    /// queued behind the ones still in flight and are never due in the same
    /// tick since `lil_delta > 0`.
    pub fn run_medium(
        &mut self,
        current_tick: Tick,
        drones: &mut [Drone],
        config: &SimulationConfig,
        rng: &mut ChaCha8Rng,
        metrics: &mut Metrics,
    ) -> Result<(), SimulationError> {
        let (due, not_due): (Vec<QueuedMessage>, Vec<QueuedMessage>) =
            std::mem::take(&mut self.queue).into_iter().partition(|m| m.delivery_tick <= current_tick);
        self.queue = not_due;

        for message in due {
            if message.source == message.destination {
                continue;
            }
            let source = drones.get(message.source).ok_or(SimulationError::UnknownDrone(message.source))?;
            let (source_position, source_range) = (source.position, source.communication_range);
            let destination = drones
                .get_mut(message.destination)
                .ok_or(SimulationError::UnknownDrone(message.destination))?;

            let distance = euclidean_distance(&source_position, &destination.position);
            if distance > source_range.min(destination.communication_range) {
                metrics.out_of_range_drops += 1;
                log::trace!("Dropped {} packet {} -> {}: out of range ({:.1} m)", message.packet.kind(), message.source, message.destination, distance);
                continue;
            }
            if !destination.channel.channel_success(distance, rng) {
                metrics.channel_drops += 1;
                log::trace!("Dropped {} packet {} -> {}: channel failure", message.packet.kind(), message.source, message.destination);
                continue;
            }

            destination.receive(message.packet, message.source, current_tick, config, self, metrics);
        }
        Ok(())
    }
}
