//! Run metrics.
//!
//! The engine only ever adds to these counters. At the end of a run they are
//! folded into a [`MetricsReport`], which the binary writes out as JSON.

use serde::Serialize;
use std::collections::HashMap;

use super::drone::Drone;
use super::types::{DataPacket, DroneId, Event, EventId, Tick};

/// One packet copy reaching the depot.
#[derive(Debug, Clone)]
struct DeliveryRecord {
    event: EventId,
    generation_tick: Tick,
    delivery_tick: Tick,
    hops: usize,
}

/// Counters and samples accumulated during a run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Events felt by a drone (buffered or missed).
    events: Vec<Event>,
    pub events_not_listened: u64,
    pub data_packets_sent: u64,
    pub control_packets_sent: u64,
    pub packets_expired: u64,
    pub packets_overflow_dropped: u64,
    pub ttl_refusals: u64,
    pub channel_drops: u64,
    pub out_of_range_drops: u64,
    /// Number of candidate relays each time a relay was selected.
    possible_relays: Vec<usize>,
    deliveries: Vec<DeliveryRecord>,
    delivered_per_drone: Vec<u64>,
    expired_per_drone: Vec<u64>,
    pub mac_uploads: u64,
    pub mac_empty_queries: u64,
    pub mac_idle_slots: u64,
    /// Per cell: ticks with at least one drone inside.
    cell_visits: HashMap<u32, u64>,
}

impl Metrics {
    pub fn new(n_drones: usize) -> Self {
        Self {
            delivered_per_drone: vec![0; n_drones],
            expired_per_drone: vec![0; n_drones],
            ..Default::default()
        }
    }

    pub fn record_event(&mut self, event: Event, listened: bool) {
        if !listened {
            self.events_not_listened += 1;
        }
        self.events.push(event);
    }

    pub fn record_sent(&mut self, is_data: bool) {
        if is_data {
            self.data_packets_sent += 1;
        } else {
            self.control_packets_sent += 1;
        }
    }

    pub fn record_possible_relays(&mut self, candidates: usize) {
        self.possible_relays.push(candidates);
    }

    pub fn record_delivery(&mut self, carrier: DroneId, packet: &DataPacket, delivery_tick: Tick) {
        if let Some(count) = self.delivered_per_drone.get_mut(carrier) {
            *count += 1;
        }
        self.deliveries.push(DeliveryRecord {
            event: packet.event.id,
            generation_tick: packet.event.generation_tick,
            delivery_tick,
            hops: packet.hop_count().saturating_sub(1),
        });
    }

    pub fn record_expiry(&mut self, drone: DroneId) {
        self.packets_expired += 1;
        if let Some(count) = self.expired_per_drone.get_mut(drone) {
            *count += 1;
        }
    }

    pub fn record_overflow(&mut self) {
        self.packets_overflow_dropped += 1;
    }

    pub fn record_cell_visit(&mut self, cell: u32) {
        *self.cell_visits.entry(cell).or_insert(0) += 1;
    }

    pub fn packets_delivered(&self) -> usize {
        self.deliveries.len()
    }

    /// Earliest delivery tick of every delivered event.
    fn first_deliveries(&self) -> HashMap<EventId, &DeliveryRecord> {
        let mut first: HashMap<EventId, &DeliveryRecord> = HashMap::new();
        for record in &self.deliveries {
            first
                .entry(record.event)
                .and_modify(|current| {
                    if record.delivery_tick < current.delivery_tick {
                        *current = record;
                    }
                })
                .or_insert(record);
        }
        first
    }

    pub fn events_delivered(&self) -> usize {
        self.first_deliveries().len()
    }

    /// Fold the counters into the final report.
    ///
    /// The score is the mean event delay in ticks, where an event that never
    /// reached the depot counts as `event_duration`. Lower is better.
    pub fn report(&self, drones: &[Drone], event_duration: Tick, sim_duration: Tick) -> MetricsReport {
        let first = self.first_deliveries();

        let mean_packet_delay = mean(self.deliveries.iter().map(|r| (r.delivery_tick - r.generation_tick) as f64));
        let mean_event_delay = mean(first.values().map(|r| (r.delivery_tick - r.generation_tick) as f64));
        let mean_relays = mean(first.values().map(|r| r.hops as f64));
        let mean_possible_relays = mean(self.possible_relays.iter().map(|&n| n as f64));

        let score = mean(self.events.iter().map(|event| match first.get(&event.id) {
            Some(record) => (record.delivery_tick - record.generation_tick) as f64,
            None => event_duration as f64,
        }));

        MetricsReport {
            sim_duration,
            events_generated: self.events.len() as u64,
            events_not_listened: self.events_not_listened,
            data_packets_sent: self.data_packets_sent,
            control_packets_sent: self.control_packets_sent,
            packets_delivered: self.deliveries.len() as u64,
            events_delivered: first.len() as u64,
            packets_expired: self.packets_expired,
            packets_overflow_dropped: self.packets_overflow_dropped,
            ttl_refusals: self.ttl_refusals,
            channel_drops: self.channel_drops,
            out_of_range_drops: self.out_of_range_drops,
            mean_packet_delay,
            mean_event_delay,
            mean_relays,
            mean_possible_relays,
            time_on_mission: drones.iter().map(|d| d.time_on_mission).sum(),
            time_on_active_routing: drones.iter().map(|d| d.time_on_active_routing).sum(),
            delivered_per_drone: self.delivered_per_drone.clone(),
            expired_per_drone: self.expired_per_drone.clone(),
            residual_energy: drones.iter().map(|d| d.residual_energy).collect(),
            mac_uploads: self.mac_uploads,
            mac_empty_queries: self.mac_empty_queries,
            mac_idle_slots: self.mac_idle_slots,
            visited_cells: self.cell_visits.len() as u64,
            score,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Final metrics of one run, serialised as a single JSON object.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub sim_duration: Tick,
    pub events_generated: u64,
    pub events_not_listened: u64,
    pub data_packets_sent: u64,
    pub control_packets_sent: u64,
    pub packets_delivered: u64,
    pub events_delivered: u64,
    pub packets_expired: u64,
    pub packets_overflow_dropped: u64,
    pub ttl_refusals: u64,
    pub channel_drops: u64,
    pub out_of_range_drops: u64,
    /// Ticks, over every delivered copy.
    pub mean_packet_delay: f64,
    /// Ticks, over the first delivered copy of each event.
    pub mean_event_delay: f64,
    pub mean_relays: f64,
    pub mean_possible_relays: f64,
    pub time_on_mission: u64,
    pub time_on_active_routing: u64,
    pub delivered_per_drone: Vec<u64>,
    pub expired_per_drone: Vec<u64>,
    pub residual_energy: Vec<f64>,
    pub mac_uploads: u64,
    pub mac_empty_queries: u64,
    pub mac_idle_slots: u64,
    pub visited_cells: u64,
    pub score: f64,
}
