//! Transport-selection strategy decision table (§4.10).

use crate::pathfinder::tables::PathEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Flood,
    Unicast { primary: String },
    UnicastWithFallback { primary: String, fallbacks: Vec<String> },
    MultiTransport { transports: Vec<String>, estimated_success_rate: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportSelection {
    pub strategy: Strategy,
}

/// Picks a strategy per the decision table in §4.10. `best` is the
/// lowest-scoring known path to the destination, if any; `available`
/// lists every transport currently usable.
pub fn select_transport(
    best: Option<&PathEntry>,
    available: &[String],
    urgency: Urgency,
) -> TransportSelection {
    let Some(best) = best else {
        return TransportSelection { strategy: Strategy::Flood };
    };

    let reliability = best.metric.reliability;

    if urgency == Urgency::Critical || reliability < 0.4 {
        let success_rate = 1.0 - (1.0 - reliability).powi(2);
        return TransportSelection {
            strategy: Strategy::MultiTransport {
                transports: available.to_vec(),
                estimated_success_rate: success_rate,
            },
        };
    }

    if reliability > 0.9 && best.hops <= 2 {
        return TransportSelection {
            strategy: Strategy::Unicast { primary: best.transport_tag.clone() },
        };
    }

    if reliability > 0.6 {
        let fallbacks =
            available.iter().filter(|t| **t != best.transport_tag).cloned().collect();
        return TransportSelection {
            strategy: Strategy::UnicastWithFallback {
                primary: best.transport_tag.clone(),
                fallbacks,
            },
        };
    }

    TransportSelection { strategy: Strategy::Unicast { primary: best.transport_tag.clone() } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pathfinder::tables::PathMetric;
    use meshline_proto::hash::AddressHash;
    use std::time::{Duration, Instant};

    fn path_with_reliability(reliability: f64, hops: u8) -> PathEntry {
        PathEntry {
            destination: AddressHash::from_key_material(b"dest"),
            next_hop: AddressHash::from_key_material(b"next"),
            transport_tag: "longrange".into(),
            hops,
            metric: PathMetric {
                latency_ms: 100.0,
                reliability,
                bandwidth_bps: 1000.0,
                energy_cost: 1.0,
                hops,
            },
            expires_at: Instant::now() + Duration::from_secs(60),
        }
    }

    #[test]
    fn no_known_path_floods() {
        let selection = select_transport(None, &["longrange".into()], Urgency::Normal);
        assert_eq!(selection.strategy, Strategy::Flood);
    }

    #[test]
    fn high_reliability_short_path_is_plain_unicast() {
        let path = path_with_reliability(0.95, 1);
        let selection = select_transport(Some(&path), &["longrange".into()], Urgency::Normal);
        assert_eq!(selection.strategy, Strategy::Unicast { primary: "longrange".into() });
    }

    #[test]
    fn moderate_reliability_adds_fallbacks() {
        let path = path_with_reliability(0.7, 3);
        let available = vec!["longrange".to_string(), "shortrange".to_string()];
        let selection = select_transport(Some(&path), &available, Urgency::Normal);
        match selection.strategy {
            Strategy::UnicastWithFallback { primary, fallbacks } => {
                assert_eq!(primary, "longrange");
                assert_eq!(fallbacks, vec!["shortrange".to_string()]);
            }
            other => panic!("expected UnicastWithFallback, got {other:?}"),
        }
    }

    #[test]
    fn critical_urgency_forces_multi_transport() {
        let path = path_with_reliability(0.95, 1);
        let selection = select_transport(Some(&path), &["longrange".into()], Urgency::Critical);
        assert!(matches!(selection.strategy, Strategy::MultiTransport { .. }));
    }

    #[test]
    fn low_reliability_forces_multi_transport_with_derived_success_rate() {
        let path = path_with_reliability(0.3, 2);
        let selection = select_transport(Some(&path), &["longrange".into()], Urgency::Normal);
        match selection.strategy {
            Strategy::MultiTransport { estimated_success_rate, .. } => {
                assert!((estimated_success_rate - (1.0 - 0.7f64.powi(2))).abs() < 1e-9);
            }
            other => panic!("expected MultiTransport, got {other:?}"),
        }
    }
}
