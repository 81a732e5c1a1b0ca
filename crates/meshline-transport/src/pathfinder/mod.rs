//! Pathfinder (§4.10): neighbor/forwarding tables, transport selection,
//! and path-quality scoring. Three periodic tasks (announce 30 s, cleanup
//! 60 s, metric recompute 10 s, per §5) run as `tokio::spawn`ed loops
//! selecting over a shared `CancellationToken`, the same shape
//! `transport::jobs::manage_transport` uses.

pub mod score;
pub mod tables;

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshline_proto::hash::AddressHash;
use meshline_proto::Packet;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub use score::{select_transport, Strategy, TransportSelection, Urgency};
pub use tables::{LinkMetrics, NeighborEntry, PathEntry, PathMetric, PathTables, PATH_EXPIRY};

use crate::transport_trait::TransportMetadata;

const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const METRIC_RECOMPUTE_INTERVAL: Duration = Duration::from_secs(10);
const MAX_ANNOUNCE_HOPS: u8 = 2;

#[derive(Debug, Clone)]
pub struct PathConstraints {
    pub min_bandwidth_bps: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub max_hops: Option<u8>,
}

impl Default for PathConstraints {
    fn default() -> Self {
        Self { min_bandwidth_bps: None, max_latency_ms: None, max_hops: None }
    }
}

/// A path advertised by a neighbor in its announcement, one hop removed
/// from the candidate metric it produces when extended through them.
#[derive(Debug, Clone)]
pub struct AnnouncedPath {
    pub destination: AddressHash,
    pub hops: u8,
    pub latency_ms: f64,
    pub reliability: f64,
    pub bandwidth_bps: f64,
    pub energy_cost: f64,
}

pub struct PathfinderConfig {
    pub announce_interval: Duration,
    pub cleanup_interval: Duration,
    pub metric_recompute_interval: Duration,
    pub path_expiry: Duration,
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        Self {
            announce_interval: ANNOUNCE_INTERVAL,
            cleanup_interval: CLEANUP_INTERVAL,
            metric_recompute_interval: METRIC_RECOMPUTE_INTERVAL,
            path_expiry: PATH_EXPIRY,
        }
    }
}

pub struct Pathfinder {
    config: PathfinderConfig,
    tables: Mutex<PathTables>,
    cancel: CancellationToken,
}

impl Pathfinder {
    pub fn new(config: PathfinderConfig) -> Arc<Self> {
        Arc::new(Self { config, tables: Mutex::new(PathTables::new()), cancel: CancellationToken::new() })
    }

    pub async fn find_path(
        &self,
        destination: &AddressHash,
        constraints: &PathConstraints,
    ) -> Vec<PathEntry> {
        let now = Instant::now();
        let tables = self.tables.lock().await;
        let mut paths: Vec<PathEntry> = tables
            .forwarding_table
            .values()
            .filter(|entry| entry.destination == *destination)
            .filter(|entry| entry.expires_at > now)
            .filter(|entry| {
                constraints
                    .min_bandwidth_bps
                    .map_or(true, |min| entry.metric.bandwidth_bps >= min)
            })
            .filter(|entry| {
                constraints.max_latency_ms.map_or(true, |max| entry.metric.latency_ms <= max)
            })
            .filter(|entry| constraints.max_hops.map_or(true, |max| entry.hops <= max))
            .cloned()
            .collect();
        paths.sort_by(|a, b| a.metric.score().partial_cmp(&b.metric.score()).unwrap());
        paths
    }

    pub async fn select_transport(
        &self,
        destination: &AddressHash,
        available: &[String],
        urgency: Urgency,
    ) -> TransportSelection {
        let tables = self.tables.lock().await;
        let best = tables
            .forwarding_table
            .values()
            .filter(|e| e.destination == *destination && e.expires_at > Instant::now())
            .min_by(|a, b| a.metric.score().partial_cmp(&b.metric.score()).unwrap());
        select_transport(best, available, urgency)
    }

    pub async fn update_metrics(
        &self,
        destination: &AddressHash,
        transport_tag: &str,
        success: bool,
        rtt_ms: f64,
    ) {
        let mut tables = self.tables.lock().await;
        let key = PathTables::link_key(transport_tag, destination);
        tables.link_metrics.entry(key.clone()).or_default().record(success, rtt_ms);

        let reliability = tables.link_metrics[&key].reliability();
        let mean_latency = tables.link_metrics[&key].mean_latency_ms();

        if let Some(entry) = tables.forwarding_table.get_mut(destination) {
            if entry.transport_tag == transport_tag {
                entry.metric.reliability = reliability;
                if mean_latency > 0.0 {
                    entry.metric.latency_ms = mean_latency;
                }
            }
        }
    }

    /// Marks `from` as a direct neighbor, then installs or improves
    /// forwarding entries for each path it announced, extended through
    /// this neighbor (§4.10). The per-hop latency added is the real
    /// measured link latency to `from`: `metadata.link_latency_ms` from
    /// this announcement's reception if available, else the mean
    /// latency already on file in `link_metrics` for this neighbor/
    /// transport pair, else `0.0` if neither is known yet.
    pub async fn handle_announcement(
        &self,
        from: AddressHash,
        transport_tag: &str,
        metadata: &TransportMetadata,
        announced_paths: &[AnnouncedPath],
    ) {
        let now = Instant::now();
        let mut tables = self.tables.lock().await;

        tables.neighbor_table.insert(
            from,
            NeighborEntry {
                identity_hash: from,
                transport_tag: transport_tag.to_string(),
                last_seen: now,
                direct_link: true,
                hops: 0,
            },
        );

        let link_key = PathTables::link_key(transport_tag, &from);
        let link_latency_ms = metadata
            .link_latency_ms
            .map(|ms| ms as f64)
            .or_else(|| {
                tables.link_metrics.get(&link_key).map(LinkMetrics::mean_latency_ms).filter(|ms| *ms > 0.0)
            })
            .unwrap_or(0.0);

        for announced in announced_paths {
            let candidate_metric = PathMetric {
                latency_ms: announced.latency_ms + link_latency_ms,
                reliability: announced.reliability * 0.95,
                bandwidth_bps: announced.bandwidth_bps,
                energy_cost: announced.energy_cost,
                hops: announced.hops + 1,
            };
            let candidate_score = candidate_metric.score();

            let install = match tables.forwarding_table.get(&announced.destination) {
                None => true,
                Some(existing) => {
                    existing.expires_at <= now || candidate_score < existing.metric.score()
                }
            };

            if install {
                tables.forwarding_table.insert(
                    announced.destination,
                    PathEntry {
                        destination: announced.destination,
                        next_hop: from,
                        transport_tag: transport_tag.to_string(),
                        hops: announced.hops + 1,
                        metric: candidate_metric,
                        expires_at: now + self.config.path_expiry,
                    },
                );
            }
        }
    }

    /// True iff the packet may still be relayed, a path to its
    /// destination exists, and a better path on a *different* transport
    /// than it arrived on is known (§4.10).
    pub async fn should_relay(&self, packet: &Packet, received_on: &str) -> bool {
        if !packet.can_relay() {
            return false;
        }
        let tables = self.tables.lock().await;
        tables
            .forwarding_table
            .get(&packet.destination_hash)
            .is_some_and(|entry| entry.expires_at > Instant::now() && entry.transport_tag != received_on)
    }

    /// Our best paths of at most `MAX_ANNOUNCE_HOPS`, to advertise in our
    /// own announcement.
    pub async fn create_announcement(&self) -> Vec<AnnouncedPath> {
        let tables = self.tables.lock().await;
        let now = Instant::now();
        tables
            .forwarding_table
            .values()
            .filter(|e| e.hops <= MAX_ANNOUNCE_HOPS && e.expires_at > now)
            .map(|e| AnnouncedPath {
                destination: e.destination,
                hops: e.hops,
                latency_ms: e.metric.latency_ms,
                reliability: e.metric.reliability,
                bandwidth_bps: e.metric.bandwidth_bps,
                energy_cost: e.metric.energy_cost,
            })
            .collect()
    }

    /// Spawns the three periodic tasks; all exit once `stop()` cancels
    /// the shared token.
    pub fn start(self: &Arc<Self>) {
        let announce = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = announce.cancel.cancelled() => break,
                    _ = tokio::time::sleep(announce.config.announce_interval) => {
                        let _ = announce.create_announcement().await;
                    }
                }
            }
        });

        let cleanup = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cleanup.cancel.cancelled() => break,
                    _ = tokio::time::sleep(cleanup.config.cleanup_interval) => {
                        cleanup.tables.lock().await.purge_expired(Instant::now());
                    }
                }
            }
        });

        let recompute = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = recompute.cancel.cancelled() => break,
                    _ = tokio::time::sleep(recompute.config.metric_recompute_interval) => {
                        let _ = recompute.tables.lock().await.recompute_reliability();
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> AddressHash {
        AddressHash::from_key_material(b"destination")
    }

    #[tokio::test]
    async fn find_path_excludes_expired_entries() {
        let pathfinder = Pathfinder::new(PathfinderConfig::default());
        {
            let mut tables = pathfinder.tables.lock().await;
            tables.forwarding_table.insert(
                dest(),
                PathEntry {
                    destination: dest(),
                    next_hop: dest(),
                    transport_tag: "longrange".into(),
                    hops: 1,
                    metric: PathMetric {
                        latency_ms: 100.0,
                        reliability: 0.9,
                        bandwidth_bps: 1000.0,
                        energy_cost: 1.0,
                        hops: 1,
                    },
                    expires_at: Instant::now() - Duration::from_secs(1),
                },
            );
        }
        let paths = pathfinder.find_path(&dest(), &PathConstraints::default()).await;
        assert!(paths.is_empty());
    }

    fn metadata_with_latency(link_latency_ms: Option<u32>) -> TransportMetadata {
        TransportMetadata {
            transport: "longrange".to_string(),
            rssi: None,
            snr: None,
            hops: 0,
            link_latency_ms,
        }
    }

    #[tokio::test]
    async fn handle_announcement_installs_path_extended_through_neighbor() {
        let pathfinder = Pathfinder::new(PathfinderConfig::default());
        let neighbor = AddressHash::from_key_material(b"neighbor");
        pathfinder
            .handle_announcement(
                neighbor,
                "longrange",
                &metadata_with_latency(Some(10)),
                &[AnnouncedPath {
                    destination: dest(),
                    hops: 0,
                    latency_ms: 50.0,
                    reliability: 1.0,
                    bandwidth_bps: 1000.0,
                    energy_cost: 1.0,
                }],
            )
            .await;

        let paths = pathfinder.find_path(&dest(), &PathConstraints::default()).await;
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].hops, 1);
        assert_eq!(paths[0].next_hop, neighbor);
        assert!((paths[0].metric.reliability - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn handle_announcement_does_not_overwrite_a_strictly_better_existing_path() {
        let pathfinder = Pathfinder::new(PathfinderConfig::default());
        let good_neighbor = AddressHash::from_key_material(b"good");
        let bad_neighbor = AddressHash::from_key_material(b"bad");

        pathfinder
            .handle_announcement(
                good_neighbor,
                "longrange",
                &metadata_with_latency(Some(5)),
                &[AnnouncedPath {
                    destination: dest(),
                    hops: 0,
                    latency_ms: 10.0,
                    reliability: 1.0,
                    bandwidth_bps: 5000.0,
                    energy_cost: 0.1,
                }],
            )
            .await;
        pathfinder
            .handle_announcement(
                bad_neighbor,
                "longrange",
                &metadata_with_latency(Some(5)),
                &[AnnouncedPath {
                    destination: dest(),
                    hops: 5,
                    latency_ms: 900.0,
                    reliability: 0.2,
                    bandwidth_bps: 100.0,
                    energy_cost: 5.0,
                }],
            )
            .await;

        let paths = pathfinder.find_path(&dest(), &PathConstraints::default()).await;
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].next_hop, good_neighbor);
    }
}
