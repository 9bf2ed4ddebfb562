//! Closest-neighbour relay selection.

use rand_chacha::ChaCha8Rng;

use super::{RelayContext, RelayDecision, RelaySelection};
use crate::simulation::geometry::distance2;
use crate::simulation::types::{DataPacket, HelloPacket};

/// Greedy single hop: relay to whichever neighbour last reported the
/// position nearest to the carrier.
pub struct ClosestRouting;

impl RelaySelection for ClosestRouting {
    fn relay_selection(&mut self, ctx: &RelayContext<'_>, candidates: &[HelloPacket], _packet: &DataPacket, _rng: &mut ChaCha8Rng) -> RelayDecision {
        candidates
            .iter()
            .min_by(|a, b| distance2(&a.position, &ctx.position).total_cmp(&distance2(&b.position, &ctx.position)))
            .map_or(RelayDecision::Hold, |hello| RelayDecision::Relay(hello.source))
    }
}
