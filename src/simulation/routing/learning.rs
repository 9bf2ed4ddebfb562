//! Reinforcement-learning relay selection.
//!
//! Epsilon-greedy over a value table keyed by the carrier's state (its grid
//! cell and the cell of the waypoint it is flying to) and the action taken.
//! The last action per event is remembered; when the event's packet is later
//! delivered or expires, that action receives the reward:
//!
//! ```text
//! delivered: r = 100 / (1 + delay_ticks)
//! expired:   r = -1
//! Q(s, a)   ← Q(s, a) + α (r − Q(s, a))
//! ```

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

use super::{RelayContext, RelayDecision, RelaySelection};
use crate::common::scene::SimulationConfig;
use crate::simulation::geometry::coord_to_cell;
use crate::simulation::types::{DataPacket, DeliveryFeedback, DeliveryOutcome, DroneId, EventId, HelloPacket};

const DELIVERY_REWARD_SCALE: f64 = 100.0;
const EXPIRY_PENALTY: f64 = -1.0;

/// Salt separating learning streams from the other routing randomness.
const LEARNING_SEED_SALT: u64 = 0x6c65_6172_6e69_6e67;

/// (own cell, cell of the next target)
type State = (u32, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Action {
    Keep,
    MoveToDepot,
    Relay(DroneId),
}

impl From<Action> for RelayDecision {
    fn from(action: Action) -> Self {
        match action {
            Action::Keep => RelayDecision::Hold,
            Action::MoveToDepot => RelayDecision::MoveToDepot,
            Action::Relay(id) => RelayDecision::Relay(id),
        }
    }
}

pub struct LearningRouting {
    q_table: HashMap<(State, Action), f64>,
    taken_actions: HashMap<EventId, (State, Action)>,
    epsilon: f64,
    alpha: f64,
    rng: ChaCha8Rng,
}

impl LearningRouting {
    /// Each drone learns on its own stream derived from the master seed.
    pub fn new(config: &SimulationConfig, drone_id: DroneId) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed ^ LEARNING_SEED_SALT);
        rng.set_stream(drone_id as u64);
        Self {
            q_table: HashMap::new(),
            taken_actions: HashMap::new(),
            epsilon: config.learning_epsilon,
            alpha: config.learning_alpha,
            rng,
        }
    }

    fn value(&self, state: State, action: Action) -> f64 {
        self.q_table.get(&(state, action)).copied().unwrap_or(0.0)
    }

    /// Number of (state, action) pairs with a learned value.
    pub fn learned_entries(&self) -> usize {
        self.q_table.len()
    }
}

impl RelaySelection for LearningRouting {
    fn relay_selection(&mut self, ctx: &RelayContext<'_>, candidates: &[HelloPacket], packet: &DataPacket, _rng: &mut ChaCha8Rng) -> RelayDecision {
        let cell_size = ctx.config.cell_size();
        let (own_cell, _) = coord_to_cell(cell_size, ctx.config.env_width, &ctx.position);
        let (target_cell, _) = coord_to_cell(cell_size, ctx.config.env_width, &ctx.next_target);
        let state = (own_cell, target_cell);

        let mut actions = vec![Action::Keep, Action::MoveToDepot];
        actions.extend(candidates.iter().map(|hello| Action::Relay(hello.source)));

        let action = if self.rng.gen_bool(self.epsilon) {
            *actions.choose(&mut self.rng).unwrap_or(&Action::Keep)
        } else {
            let mut best = Action::Keep;
            let mut best_value = self.value(state, best);
            for &candidate in &actions[1..] {
                let value = self.value(state, candidate);
                if value > best_value {
                    best = candidate;
                    best_value = value;
                }
            }
            best
        };

        self.taken_actions.insert(packet.event.id, (state, action));
        action.into()
    }

    fn feedback(&mut self, feedback: &DeliveryFeedback) {
        let Some((state, action)) = self.taken_actions.remove(&feedback.event) else {
            return;
        };
        let reward = match feedback.outcome {
            DeliveryOutcome::Delivered => DELIVERY_REWARD_SCALE / (1.0 + feedback.delay as f64),
            DeliveryOutcome::Expired => EXPIRY_PENALTY,
        };
        let entry = self.q_table.entry((state, action)).or_insert(0.0);
        *entry += self.alpha * (reward - *entry);
    }
}
