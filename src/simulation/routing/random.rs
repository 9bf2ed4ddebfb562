//! Uniformly random relay selection.

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::{RelayContext, RelayDecision, RelaySelection};
use crate::simulation::types::{DataPacket, HelloPacket};

pub struct RandomRouting;

impl RelaySelection for RandomRouting {
    fn relay_selection(&mut self, _ctx: &RelayContext<'_>, candidates: &[HelloPacket], _packet: &DataPacket, rng: &mut ChaCha8Rng) -> RelayDecision {
        candidates.choose(rng).map_or(RelayDecision::Hold, |hello| RelayDecision::Relay(hello.source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scene::SimulationConfig;
    use crate::simulation::geometry::Point;
    use crate::simulation::types::Event;
    use rand::SeedableRng;

    #[test]
    fn chooses_among_candidates_only() {
        let config = SimulationConfig::default();
        let ctx = RelayContext {
            tick: 0,
            config: &config,
            position: Point::new(0.0, 0.0),
            next_target: Point::new(0.0, 0.0),
            depot: Point::new(0.0, 0.0),
        };
        let candidates: Vec<HelloPacket> = [3, 5]
            .into_iter()
            .map(|source| HelloPacket {
                source,
                position: Point::new(1.0, 1.0),
                speed: 1.0,
                next_target: Point::new(1.0, 1.0),
                creation_tick: 0,
                move_routing: false,
            })
            .collect();
        let packet = Event::new(1, Point::new(0.0, 0.0), 0, 10).as_packet(1, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let mut seen = Vec::new();
        for _ in 0..50 {
            match RandomRouting.relay_selection(&ctx, &candidates, &packet, &mut rng) {
                RelayDecision::Relay(id) => seen.push(id),
                other => panic!("unexpected decision {:?}", other),
            }
        }
        assert!(seen.iter().all(|id| *id == 3 || *id == 5));
        assert!(seen.contains(&3) && seen.contains(&5));
        assert_eq!(RandomRouting.relay_selection(&ctx, &[], &packet, &mut rng), RelayDecision::Hold);
    }
}
