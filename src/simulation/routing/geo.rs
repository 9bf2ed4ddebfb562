//! Geographic relay selection.

use rand_chacha::ChaCha8Rng;

use super::{RelayContext, RelayDecision, RelaySelection};
use crate::simulation::geometry::{Point, dead_reckoning, euclidean_distance};
use crate::simulation::types::{DataPacket, HelloPacket};

/// Hands the packet to the neighbour closest to the depot, provided it is
/// strictly closer than the carrier itself.
///
/// With `dead_reckoning` enabled, neighbour positions are extrapolated from
/// their beacons instead of taken as last reported. Neighbours that announced
/// a depot diversion are extrapolated towards the depot.
pub struct GeoRouting {
    dead_reckoning: bool,
}

impl GeoRouting {
    pub fn new(dead_reckoning: bool) -> Self {
        Self { dead_reckoning }
    }

    fn estimated_position(&self, ctx: &RelayContext<'_>, hello: &HelloPacket) -> Point {
        if self.dead_reckoning {
            let elapsed = ctx.tick.saturating_sub(hello.creation_tick);
            let heading = if hello.move_routing { ctx.depot } else { hello.next_target };
            dead_reckoning(&hello.position, &heading, hello.speed, elapsed, ctx.config.tick_duration)
        } else {
            hello.position
        }
    }
}

impl RelaySelection for GeoRouting {
    fn relay_selection(&mut self, ctx: &RelayContext<'_>, candidates: &[HelloPacket], _packet: &DataPacket, _rng: &mut ChaCha8Rng) -> RelayDecision {
        let own_distance = euclidean_distance(&ctx.position, &ctx.depot);

        let mut best: Option<(f64, &HelloPacket)> = None;
        for hello in candidates {
            let distance = euclidean_distance(&self.estimated_position(ctx, hello), &ctx.depot);
            if distance < own_distance && best.is_none_or(|(best_distance, _)| distance < best_distance) {
                best = Some((distance, hello));
            }
        }

        match best {
            Some((_, hello)) => RelayDecision::Relay(hello.source),
            None => RelayDecision::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scene::SimulationConfig;
    use rand::SeedableRng;

    fn hello(source: usize, x: f64, next_x: f64, creation_tick: u64) -> HelloPacket {
        HelloPacket {
            source,
            position: Point::new(x, 0.0),
            speed: 10.0,
            next_target: Point::new(next_x, 0.0),
            creation_tick,
            move_routing: false,
        }
    }

    fn decide(strategy: &mut GeoRouting, tick: u64, candidates: &[HelloPacket]) -> RelayDecision {
        let mut config = SimulationConfig::default();
        config.tick_duration = 1.0;
        let ctx = RelayContext {
            tick,
            config: &config,
            position: Point::new(100.0, 0.0),
            next_target: Point::new(200.0, 0.0),
            depot: Point::new(0.0, 0.0),
        };
        let packet = crate::simulation::types::Event::new(1, Point::new(0.0, 0.0), 0, 10).as_packet(1, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        strategy.relay_selection(&ctx, candidates, &packet, &mut rng)
    }

    #[test]
    fn picks_neighbour_closest_to_depot() {
        let mut geo = GeoRouting::new(false);
        let candidates = [hello(1, 80.0, 80.0, 0), hello(2, 40.0, 40.0, 0), hello(3, 150.0, 150.0, 0)];
        assert_eq!(decide(&mut geo, 0, &candidates), RelayDecision::Relay(2));
    }

    #[test]
    fn holds_when_nobody_is_closer() {
        let mut geo = GeoRouting::new(false);
        assert_eq!(decide(&mut geo, 0, &[hello(1, 120.0, 120.0, 0)]), RelayDecision::Hold);
        assert_eq!(decide(&mut geo, 0, &[]), RelayDecision::Hold);
    }

    #[test]
    fn dead_reckoning_uses_estimated_positions() {
        // drone 1 reported 90 m but flies away at 10 m/s; 5 ticks later it is at 140 m
        let candidates = [hello(1, 90.0, 500.0, 0), hello(2, 95.0, 95.0, 5)];
        assert_eq!(decide(&mut GeoRouting::new(false), 5, &candidates), RelayDecision::Relay(1));
        assert_eq!(decide(&mut GeoRouting::new(true), 5, &candidates), RelayDecision::Relay(2));
    }

    #[test]
    fn diverting_neighbour_is_extrapolated_towards_depot() {
        // announced target lies away from the depot, but drone 1 is diverting
        let mut diverting = hello(1, 110.0, 500.0, 0);
        diverting.move_routing = true;
        let candidates = [diverting, hello(2, 95.0, 95.0, 5)];
        assert_eq!(decide(&mut GeoRouting::new(true), 5, &candidates), RelayDecision::Relay(1));
        assert_eq!(decide(&mut GeoRouting::new(false), 5, &candidates), RelayDecision::Relay(2));
    }
}
