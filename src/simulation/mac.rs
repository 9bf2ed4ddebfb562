//! Depot medium access control.
//!
//! Models a single TDMA upload slot at the depot. Each tick:
//! 1) The drones within `min(drone range, depot range)` of the depot form
//!    the neighbour set.
//! 2) The allocator picks at most one of them.
//! 3) The chosen drone uploads its most recently buffered packet. Its
//!    "dropped since last upload" counter is reported back to the allocator
//!    and reset.
//!
//! Allocators: round-robin over drone ids, uniform random, and an
//! epsilon-greedy bandit that learns which drones are worth polling.

use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::drone::{Depot, Drone};
use super::geometry::euclidean_distance;
use super::metrics::Metrics;
use super::types::{DeliveryFeedback, DroneId, Tick};
use crate::common::scene::{MacAlgorithm, SimulationConfig};

/// Outcome of polling one drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacFeedback {
    pub drone: DroneId,
    pub had_packet_to_send: bool,
    pub drops_since_last_upload: u32,
}

/// Allocation policy for the depot upload slot.
pub trait ResourceAllocator {
    /// Pick the drone allowed to upload this tick among `neighbours` (sorted by id).
    fn allocate_resource_to_drone(&mut self, neighbours: &[DroneId], current_tick: Tick, rng: &mut ChaCha8Rng) -> Option<DroneId>;

    fn feedback(&mut self, _feedback: &MacFeedback) {}
}

/// Cycles through drone ids in increasing order, skipping drones out of range.
#[derive(Debug, Default)]
pub struct RoundRobinMac {
    last_choice: Option<DroneId>,
}

impl ResourceAllocator for RoundRobinMac {
    fn allocate_resource_to_drone(&mut self, neighbours: &[DroneId], _current_tick: Tick, _rng: &mut ChaCha8Rng) -> Option<DroneId> {
        let next = match self.last_choice {
            Some(last) => neighbours.iter().copied().find(|&id| id > last).or_else(|| neighbours.first().copied()),
            None => neighbours.first().copied(),
        }?;
        self.last_choice = Some(next);
        Some(next)
    }
}

#[derive(Debug, Default)]
pub struct RandomMac;

impl ResourceAllocator for RandomMac {
    fn allocate_resource_to_drone(&mut self, neighbours: &[DroneId], _current_tick: Tick, rng: &mut ChaCha8Rng) -> Option<DroneId> {
        neighbours.choose(rng).copied()
    }
}

/// Reward of a poll that found nothing to upload.
const BANDIT_EMPTY_REWARD: f64 = -5.0;
/// Reward of a poll that uploaded with no losses.
const BANDIT_CLEAN_REWARD: f64 = 5.0;
/// Reward of a poll that uploaded after losses; those drones need polling most.
const BANDIT_LOSSY_REWARD: f64 = 500.0;
/// Regret bonus added each tick to every arm that was not chosen.
const BANDIT_REGRET_STEP: f64 = 0.2;

/// Epsilon-greedy k-armed bandit, one arm per drone.
///
/// Greedy choices maximise `mean reward + regret`, where the regret of an
/// arm grows every tick it is not chosen and resets when it is.
#[derive(Debug)]
pub struct BanditMac {
    epsilon: f64,
    pulls: Vec<u32>,
    mean_reward: Vec<f64>,
    regret: Vec<f64>,
    overall_mean: f64,
    steps: u64,
}

impl BanditMac {
    pub fn new(n_drones: usize, epsilon: f64) -> Self {
        Self {
            epsilon,
            pulls: vec![0; n_drones],
            mean_reward: vec![0.0; n_drones],
            regret: vec![0.0; n_drones],
            overall_mean: 0.0,
            steps: 0,
        }
    }

    pub fn mean_reward(&self, drone: DroneId) -> f64 {
        self.mean_reward.get(drone).copied().unwrap_or(0.0)
    }

    pub fn overall_mean(&self) -> f64 {
        self.overall_mean
    }

    fn add_regret(&mut self, chosen: DroneId) {
        for (arm, regret) in self.regret.iter_mut().enumerate() {
            if arm == chosen {
                *regret = 0.0;
            } else {
                *regret += BANDIT_REGRET_STEP;
            }
        }
    }
}

impl ResourceAllocator for BanditMac {
    fn allocate_resource_to_drone(&mut self, neighbours: &[DroneId], _current_tick: Tick, rng: &mut ChaCha8Rng) -> Option<DroneId> {
        if neighbours.is_empty() {
            return None;
        }
        self.steps += 1;

        let chosen = if rng.gen_bool(self.epsilon) {
            *neighbours.choose(rng)?
        } else {
            let score = |arm: DroneId| self.mean_reward.get(arm).copied().unwrap_or(0.0) + self.regret.get(arm).copied().unwrap_or(0.0);
            let mut best = neighbours[0];
            for &arm in &neighbours[1..] {
                if score(arm) > score(best) {
                    best = arm;
                }
            }
            best
        };

        self.add_regret(chosen);
        Some(chosen)
    }

    fn feedback(&mut self, feedback: &MacFeedback) {
        let reward = if feedback.drops_since_last_upload > 0 {
            BANDIT_LOSSY_REWARD
        } else if feedback.had_packet_to_send {
            BANDIT_CLEAN_REWARD
        } else {
            BANDIT_EMPTY_REWARD
        };

        let Some(pulls) = self.pulls.get_mut(feedback.drone) else {
            return;
        };
        *pulls += 1;
        let mean = &mut self.mean_reward[feedback.drone];
        *mean += (reward - *mean) / *pulls as f64;
        if self.steps > 0 {
            self.overall_mean += (reward - self.overall_mean) / self.steps as f64;
        }
    }
}

/// Depot-side scheduler wrapping the configured allocator.
pub struct DepotMac {
    allocator: Box<dyn ResourceAllocator>,
}

impl DepotMac {
    pub fn new(algorithm: MacAlgorithm, config: &SimulationConfig) -> Self {
        let allocator: Box<dyn ResourceAllocator> = match algorithm {
            MacAlgorithm::RoundRobin => Box::new(RoundRobinMac::default()),
            MacAlgorithm::Random => Box::new(RandomMac),
            MacAlgorithm::Bandit => Box::new(BanditMac::new(config.n_drones, config.mac_bandit_epsilon)),
        };
        Self::with_allocator(allocator)
    }

    pub fn with_allocator(allocator: Box<dyn ResourceAllocator>) -> Self {
        Self { allocator }
    }

    /// Drones that can talk to the depot, in id order.
    pub fn neighbor_drones(drones: &[Drone], depot: &Depot) -> Vec<DroneId> {
        drones
            .iter()
            .filter(|drone| euclidean_distance(&drone.position, &depot.position) <= drone.communication_range.min(depot.communication_range))
            .map(|drone| drone.id)
            .collect()
    }

    /// Run one allocation round.
    ///
    /// Returns the poll outcome, or `None` when no drone was allocated.
    /// Uploaded packets are reported in `settled`.
    pub fn run(
        &mut self,
        current_tick: Tick,
        drones: &mut [Drone],
        depot: &mut Depot,
        rng: &mut ChaCha8Rng,
        metrics: &mut Metrics,
        settled: &mut Vec<DeliveryFeedback>,
    ) -> Option<MacFeedback> {
        let neighbours = Self::neighbor_drones(drones, depot);
        let Some(chosen) = self.allocator.allocate_resource_to_drone(&neighbours, current_tick, rng) else {
            metrics.mac_idle_slots += 1;
            return None;
        };
        let drone = drones.get_mut(chosen)?;

        let feedback = match drone.pop_most_recent() {
            Some(packet) => {
                log::trace!("Depot polled drone {}: uploading event {}", chosen, packet.event.id);
                settled.push(depot.add_packet(chosen, packet, current_tick, metrics));
                metrics.mac_uploads += 1;
                MacFeedback {
                    drone: chosen,
                    had_packet_to_send: true,
                    drops_since_last_upload: std::mem::take(&mut drone.dropped_since_last_upload),
                }
            }
            None => {
                metrics.mac_empty_queries += 1;
                MacFeedback {
                    drone: chosen,
                    had_packet_to_send: false,
                    drops_since_last_upload: std::mem::take(&mut drone.dropped_since_last_upload),
                }
            }
        };

        self.allocator.feedback(&feedback);
        Some(feedback)
    }
}
