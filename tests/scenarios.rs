use std::collections::HashMap;

use fanet_dtn_simulator::common::mission::PathProvider;
use fanet_dtn_simulator::common::scene::{ChannelErrorKind, MacAlgorithm, RoutingAlgorithm, SimulationConfig};
use fanet_dtn_simulator::simulation::{Point, Simulator};

fn hovering(positions: &[(f64, f64)]) -> PathProvider {
    PathProvider::Loaded(
        positions
            .iter()
            .enumerate()
            .map(|(id, &position)| (id, vec![Point::from(position)]))
            .collect::<HashMap<_, _>>(),
    )
}

fn small_area_config(n_drones: usize) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    config.n_drones = n_drones;
    config.tick_duration = 1.0;
    config.heterogeneous_drones = false;
    config.channel_error = ChannelErrorKind::NoError;
    config.event_generation_prob = 0.0;
    config.depot_coordinates = Point::new(0.0, 0.0);
    config.depot_communication_range = 100.0;
    config.drone_communication_range = 100.0;
    config.hello_delay = 1;
    config.drone_retransmission_delta = 1;
    config.sim_duration = 20;
    config
}

#[test]
fn geographic_relay_reaches_depot() {
    let mut config = small_area_config(2);
    config.routing_algorithm = RoutingAlgorithm::Geo;
    // drone 0 is out of offload reach, drone 1 sits right at its edge
    let mut sim = Simulator::new(config, &hovering(&[(260.0, 0.0), (190.0, 0.0)])).unwrap();
    sim.inject_event(0, 10).unwrap();

    sim.run().unwrap();

    assert_eq!(sim.depot().all_packets().len(), 1);
    assert_eq!(sim.depot().all_packets()[0].hops, vec![0, 1]);
    let report = sim.report();
    assert_eq!(report.packets_delivered, 1);
    assert_eq!(report.events_delivered, 1);
    assert_eq!(report.packets_expired, 0);
    assert!(sim.drones().iter().all(|drone| drone.buffer_length() == 0));
}

#[test]
fn without_relays_the_packet_expires() {
    let mut config = small_area_config(2);
    config.routing_algorithm = RoutingAlgorithm::None;
    let mut sim = Simulator::new(config, &hovering(&[(260.0, 0.0), (190.0, 0.0)])).unwrap();
    sim.inject_event(0, 10).unwrap();

    sim.run().unwrap();

    assert!(sim.depot().all_packets().is_empty());
    assert_eq!(sim.report().packets_expired, 1);
}

#[test]
fn round_robin_mac_polls_every_drone_in_turn() {
    let mut config = small_area_config(3);
    config.routing_algorithm = RoutingAlgorithm::None;
    config.mac_protocol = Some(MacAlgorithm::RoundRobin);
    config.event_duration = 100;
    let mut sim = Simulator::new(config, &hovering(&[(0.0, 50.0), (50.0, 0.0), (30.0, 30.0)])).unwrap();
    for drone in 0..3 {
        sim.inject_event(drone, 100).unwrap();
        sim.inject_event(drone, 100).unwrap();
    }

    let mut polled = Vec::new();
    for tick in 0..6 {
        sim.step().unwrap();
        let feedback = sim.last_mac_feedback().unwrap();
        assert!(feedback.had_packet_to_send);
        polled.push(feedback.drone);
        assert_eq!(sim.depot().all_packets().len(), tick + 1);
    }

    assert_eq!(polled, vec![0, 1, 2, 0, 1, 2]);
    assert!(sim.drones().iter().all(|drone| drone.buffer_length() == 0));
    assert_eq!(sim.report().mac_uploads, 6);
}

#[test]
fn buffers_stay_consistent_over_a_random_mission() {
    let mut config = SimulationConfig::default();
    config.n_drones = 8;
    config.sim_duration = 3_000;
    config.event_generation_delay = 20;
    config.drone_max_buffer_size = 5;
    config.routing_algorithm = RoutingAlgorithm::MoveGeo;
    config.routing_if_expiring = true;
    config.event_duration = 600;
    let paths = PathProvider::from_config(&config).unwrap();
    let mut sim = Simulator::new(config, &paths).unwrap();

    let mut energy: Vec<f64> = sim.drones().iter().map(|drone| drone.residual_energy).collect();
    while sim.current_tick() < 3_000 {
        // duplicate events in a buffer abort the step
        sim.step().unwrap();
        let last_tick = sim.current_tick() - 1;
        for drone in sim.drones() {
            assert!(drone.buffer_length() <= 5);
            assert!(drone.packets().all(|packet| !packet.is_expired(last_tick)));
            assert!(drone.residual_energy <= energy[drone.id]);
            energy[drone.id] = drone.residual_energy;
        }
    }

    let report = sim.report();
    assert!(report.events_generated > 0);
    assert!(report.events_delivered <= report.events_generated);
    assert!(report.score <= 600.0);
}

#[test]
fn same_seed_gives_identical_reports() {
    let run = |seed: u64| {
        let mut config = SimulationConfig::default();
        config.seed = seed;
        config.n_drones = 6;
        config.sim_duration = 2_000;
        config.event_generation_delay = 25;
        config.channel_error = ChannelErrorKind::Gaussian;
        config.routing_algorithm = RoutingAlgorithm::Learning;
        config.mac_protocol = Some(MacAlgorithm::Bandit);
        let paths = PathProvider::from_config(&config).unwrap();
        let mut sim = Simulator::new(config, &paths).unwrap();
        sim.run().unwrap();
        serde_json::to_string(&sim.report()).unwrap()
    };

    assert_eq!(run(17), run(17));
}
