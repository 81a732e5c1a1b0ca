//! Pathfinder table types (§3, §4.10): forwarding/neighbor tables and the
//! sliding-window link metrics they're scored from. Shaped after
//! `rns_transport::transport::path_table::{PathEntry, PathTable}`, scaled
//! up with the composite metric §4.10 requires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use meshline_proto::hash::AddressHash;

const HISTORY_WINDOW: usize = 100;
const RECOMPUTE_SAMPLE_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct PathMetric {
    pub latency_ms: f64,
    pub reliability: f64,
    pub bandwidth_bps: f64,
    pub energy_cost: f64,
    pub hops: u8,
}

impl PathMetric {
    pub fn score(&self) -> f64 {
        let normalized_latency = (self.latency_ms / 1000.0).min(10.0);
        let normalized_bw = 1_000_000.0 / self.bandwidth_bps.max(1.0);
        0.25 * normalized_latency
            + 0.25 * (1.0 - self.reliability) * 100.0
            + 0.20 * normalized_bw
            + 0.15 * self.energy_cost
            + 0.15 * (self.hops as f64) * 10.0
    }
}

#[derive(Debug, Clone)]
pub struct PathEntry {
    pub destination: AddressHash,
    pub next_hop: AddressHash,
    pub transport_tag: String,
    pub hops: u8,
    pub metric: PathMetric,
    pub expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub identity_hash: AddressHash,
    pub transport_tag: String,
    pub last_seen: Instant,
    pub direct_link: bool,
    pub hops: u8,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    success: bool,
    rtt_ms: f64,
    at: Instant,
}

/// Sliding window of up to 100 (timestamp, success, rtt) samples per
/// `transport_tag + "_" + dest_hex` key (§3, §4.10).
#[derive(Debug, Clone, Default)]
pub struct LinkMetrics {
    samples: Vec<Sample>,
}

impl LinkMetrics {
    pub fn record(&mut self, success: bool, rtt_ms: f64) {
        self.samples.push(Sample { success, rtt_ms, at: Instant::now() });
        if self.samples.len() > HISTORY_WINDOW {
            self.samples.remove(0);
        }
    }

    pub fn reliability(&self) -> f64 {
        self.reliability_over(self.samples.len())
    }

    /// Reliability/latency recomputed over only the most recent `n`
    /// samples (§4.10's 10 s recompute task uses the most recent 10).
    pub fn reliability_over(&self, n: usize) -> f64 {
        let window = self.recent(n);
        if window.is_empty() {
            return 0.0;
        }
        let successes = window.iter().filter(|s| s.success).count();
        successes as f64 / window.len() as f64
    }

    pub fn mean_latency_ms(&self) -> f64 {
        self.mean_latency_over(self.samples.len())
    }

    pub fn mean_latency_over(&self, n: usize) -> f64 {
        let window = self.recent(n);
        let successful: Vec<f64> = window.iter().filter(|s| s.success).map(|s| s.rtt_ms).collect();
        if successful.is_empty() {
            return 0.0;
        }
        successful.iter().sum::<f64>() / successful.len() as f64
    }

    fn recent(&self, n: usize) -> &[Sample] {
        let n = n.min(self.samples.len());
        &self.samples[self.samples.len() - n..]
    }
}

pub struct PathTables {
    pub forwarding_table: HashMap<AddressHash, PathEntry>,
    pub neighbor_table: HashMap<AddressHash, NeighborEntry>,
    pub link_metrics: HashMap<String, LinkMetrics>,
}

impl PathTables {
    pub fn new() -> Self {
        Self {
            forwarding_table: HashMap::new(),
            neighbor_table: HashMap::new(),
            link_metrics: HashMap::new(),
        }
    }

    pub fn link_key(transport_tag: &str, destination: &AddressHash) -> String {
        format!("{transport_tag}_{}", destination.to_hex())
    }

    pub fn purge_expired(&mut self, now: Instant) {
        self.forwarding_table.retain(|_, entry| entry.expires_at > now);
    }

    pub fn recompute_reliability(&self) -> HashMap<String, f64> {
        self.link_metrics
            .iter()
            .map(|(key, metrics)| (key.clone(), metrics.reliability_over(RECOMPUTE_SAMPLE_WINDOW)))
            .collect()
    }
}

impl Default for PathTables {
    fn default() -> Self {
        Self::new()
    }
}

pub const PATH_EXPIRY: Duration = Duration::from_secs(300);
