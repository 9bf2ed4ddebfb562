//! Per-drone routing engine.
//!
//! Every drone runs the same engine once per tick, after its buffer has been
//! scrubbed:
//! 1) Beaconing: every `hello-delay` ticks a `HelloPacket` goes to every
//!    drone in range whose link passes a channel roll.
//! 2) Send attempt, skipped if the drone received data this tick or holds
//!    nothing. Near the depot the whole buffer is offloaded. Otherwise, every
//!    `drone-retransmission-delta` ticks, each buffered packet is handed to
//!    the relay strategy together with the non-stale beacons.
//! 3) Reception is driven by the medium: beacons refresh the neighbour
//!    table, data packets are taken over and acknowledged, ACKs release the
//!    sender's copy.
//!
//! Relay strategies are pluggable through [`RelaySelection`] and chosen once
//! per drone from the configured [`RoutingAlgorithm`].

pub mod closest;
pub mod geo;
pub mod learning;
pub mod random;

use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use super::drone::{AcceptOutcome, Depot, Drone};
use super::geometry::Point;
use super::metrics::Metrics;
use super::network::{MediumDispatcher, PeerView, find_drones_in_range};
use super::types::{AckPacket, DataPacket, DeliveryFeedback, DroneId, HelloPacket, Packet, Tick};
use crate::common::scene::{RoutingAlgorithm, SimulationConfig};

/// Offload happens within this fraction of `drone range + depot range`.
const NEAR_DEPOT_FACTOR: f64 = 0.98;

/// What a strategy wants done with one buffered packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDecision {
    /// Unicast the packet to this neighbour.
    Relay(DroneId),
    /// Keep carrying the packet.
    Hold,
    /// Stop the mission and fly the buffer to the depot.
    MoveToDepot,
}

/// State of the deciding drone, passed to strategies.
#[derive(Debug, Clone, Copy)]
pub struct RelayContext<'a> {
    pub tick: Tick,
    pub config: &'a SimulationConfig,
    pub position: Point,
    pub next_target: Point,
    pub depot: Point,
}

/// Relay selection policy.
pub trait RelaySelection {
    /// Choose what to do with `packet` given the fresh beacons in `candidates`.
    fn relay_selection(&mut self, ctx: &RelayContext<'_>, candidates: &[HelloPacket], packet: &DataPacket, rng: &mut ChaCha8Rng) -> RelayDecision;

    /// Learn from the final fate of a packet this drone carried.
    fn feedback(&mut self, _feedback: &DeliveryFeedback) {}
}

/// Never relays. Packets reach the depot only when their carrier flies by.
pub struct NoRouting;

impl RelaySelection for NoRouting {
    fn relay_selection(&mut self, _ctx: &RelayContext<'_>, _candidates: &[HelloPacket], _packet: &DataPacket, _rng: &mut ChaCha8Rng) -> RelayDecision {
        RelayDecision::Hold
    }
}

/// Build the strategy selected by `algorithm` for drone `drone_id`.
pub fn build_strategy(algorithm: RoutingAlgorithm, config: &SimulationConfig, drone_id: DroneId) -> Box<dyn RelaySelection> {
    match algorithm {
        RoutingAlgorithm::None => Box::new(NoRouting),
        RoutingAlgorithm::Geo => Box::new(geo::GeoRouting::new(false)),
        RoutingAlgorithm::MoveGeo => Box::new(geo::GeoRouting::new(true)),
        RoutingAlgorithm::Random => Box::new(random::RandomRouting),
        RoutingAlgorithm::Closest => Box::new(closest::ClosestRouting),
        RoutingAlgorithm::Learning => Box::new(learning::LearningRouting::new(config, drone_id)),
    }
}

/// Routing state owned by one drone.
pub struct RoutingEngine {
    /// Latest beacon per neighbour.
    neighbor_table: BTreeMap<DroneId, HelloPacket>,
    /// Relay attempts, one per buffered packet per pass, since the buffer was last emptied.
    pub current_n_transmission: u32,
    /// Set when data was received this tick; suppresses this tick's send attempt.
    pub no_transmission: bool,
    strategy: Box<dyn RelaySelection>,
}

impl RoutingEngine {
    /// Engine running the configured routing algorithm.
    pub fn new(config: &SimulationConfig, drone_id: DroneId) -> Self {
        Self::with_strategy(build_strategy(config.routing_algorithm, config, drone_id))
    }

    pub fn with_strategy(strategy: Box<dyn RelaySelection>) -> Self {
        Self {
            neighbor_table: BTreeMap::new(),
            current_n_transmission: 0,
            no_transmission: false,
            strategy,
        }
    }

    pub fn neighbor(&self, id: DroneId) -> Option<&HelloPacket> {
        self.neighbor_table.get(&id)
    }

    /// Beacons created no earlier than `old_hello_packet` ticks ago, by sender id.
    pub fn fresh_neighbors(&self, current_tick: Tick, old_hello_packet: Tick) -> Vec<HelloPacket> {
        let oldest = current_tick.saturating_sub(old_hello_packet);
        self.neighbor_table.values().filter(|h| h.creation_tick >= oldest).cloned().collect()
    }

    pub fn feedback(&mut self, feedback: &DeliveryFeedback) {
        self.strategy.feedback(feedback);
    }

    pub fn routing_close(&mut self) {
        self.no_transmission = false;
    }
}

/// Shared state a routing pass works against.
pub struct RoutingPass<'a> {
    pub tick: Tick,
    pub config: &'a SimulationConfig,
    /// Every drone as it stands right before this pass.
    pub peers: &'a [PeerView],
    pub medium: &'a mut MediumDispatcher,
    pub depot: &'a mut Depot,
    pub metrics: &'a mut Metrics,
    pub rng: &'a mut ChaCha8Rng,
    /// Fates of packets settled during the pass, for learning strategies.
    pub feedback: &'a mut Vec<DeliveryFeedback>,
}

impl Drone {
    /// Run this drone's routing pass for the current tick.
    pub fn routing(&mut self, pass: &mut RoutingPass<'_>) {
        self.update_distance_from_depot();
        self.drone_identification(pass);

        if pass.config.routing_if_expiring && self.buffer_length() > 0 && self.packet_is_expiring(pass.tick, pass.config.tick_duration) {
            if !self.move_routing {
                log::debug!("Drone {} diverting to depot: tightest deadline about to pass", self.id);
            }
            self.move_routing = true;
        }

        self.send_packets(pass);
        self.router.routing_close();
    }

    fn hello_packet(&self, current_tick: Tick) -> HelloPacket {
        HelloPacket {
            source: self.id,
            position: self.position,
            speed: self.speed,
            next_target: self.next_target(),
            creation_tick: current_tick,
            move_routing: self.move_routing && !self.come_back_to_mission,
        }
    }

    /// Broadcast a beacon to every reachable drone.
    fn drone_identification(&mut self, pass: &mut RoutingPass<'_>) {
        if pass.tick % pass.config.hello_delay != 0 {
            return;
        }

        let hello = self.hello_packet(pass.tick);
        for (peer, distance) in find_drones_in_range(self.id, &self.position, self.communication_range, pass.peers) {
            if self.channel.channel_success(distance, pass.rng) {
                pass.medium
                    .send_packet_to_medium(Packet::Hello(hello.clone()), self.id, peer, pass.tick, pass.config.lil_delta, pass.metrics);
            }
        }
    }

    fn send_packets(&mut self, pass: &mut RoutingPass<'_>) {
        if self.router.no_transmission || self.buffer_length() == 0 {
            return;
        }

        // with a depot MAC the upload slot is the only way into the depot
        let near_depot = (self.communication_range + pass.depot.communication_range) * NEAR_DEPOT_FACTOR;
        if pass.config.mac_protocol.is_none() && self.distance_from_depot <= near_depot {
            let packets = self.drain_buffer();
            log::debug!("Drone {} offloading {} packets to depot at tick {}", self.id, packets.len(), pass.tick);
            let settled = pass.depot.transfer_notified_packets(self.id, packets, pass.tick, pass.metrics);
            pass.feedback.extend(settled);
            self.tightest_deadline = None;
            self.move_routing = false;
            self.router.current_n_transmission = 0;
            return;
        }

        if pass.tick % pass.config.drone_retransmission_delta != 0 {
            return;
        }

        let candidates = self.router.fresh_neighbors(pass.tick, pass.config.old_hello_packet);
        let ctx = RelayContext {
            tick: pass.tick,
            config: pass.config,
            position: self.position,
            next_target: self.next_target(),
            depot: pass.depot.position,
        };

        let packets: Vec<DataPacket> = self.packets().cloned().collect();
        for packet in packets {
            pass.metrics.record_possible_relays(candidates.len());
            match self.router.strategy.relay_selection(&ctx, &candidates, &packet, pass.rng) {
                RelayDecision::Relay(relay) => {
                    log::trace!("Drone {} relaying event {} to drone {}", self.id, packet.event.id, relay);
                    pass.medium
                        .send_packet_to_medium(Packet::Data(packet), self.id, relay, pass.tick, pass.config.lil_delta, pass.metrics);
                }
                RelayDecision::MoveToDepot => {
                    if !self.move_routing {
                        log::debug!("Drone {} moving to depot with event {}", self.id, packet.event.id);
                    }
                    self.move_routing = true;
                }
                RelayDecision::Hold => {}
            }
            self.router.current_n_transmission += 1;
        }
    }

    /// Handle a packet delivered by the medium from `source`.
    pub fn receive(&mut self, packet: Packet, source: DroneId, current_tick: Tick, config: &SimulationConfig, medium: &mut MediumDispatcher, metrics: &mut Metrics) {
        match packet {
            Packet::Hello(hello) => {
                self.router.neighbor_table.insert(hello.source, hello);
            }
            Packet::Data(data) => {
                self.router.no_transmission = true;
                if data.hop_count() >= config.packets_max_ttl {
                    metrics.ttl_refusals += 1;
                    log::debug!("Drone {} refused event {}: {} hops", self.id, data.event.id, data.hop_count());
                    return;
                }

                let ack = AckPacket {
                    source: self.id,
                    destination: source,
                    acked_packet: data.id,
                    acked_event: data.event.id,
                    creation_tick: current_tick,
                };
                if let AcceptOutcome::Accepted { evicted: Some(_) } = self.accept_packet(data) {
                    metrics.record_overflow();
                }
                medium.send_packet_to_medium(Packet::Ack(ack), self.id, source, current_tick, config.lil_delta, metrics);
            }
            Packet::Ack(ack) => {
                if self.remove_packet(ack.acked_event).is_some() {
                    log::trace!("Drone {} released event {} to drone {}", self.id, ack.acked_event, ack.source);
                }
                if self.buffer_length() == 0 {
                    self.router.current_n_transmission = 0;
                    self.move_routing = false;
                }
            }
        }
    }
}
