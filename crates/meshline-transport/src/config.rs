//! Aggregate configuration (§4.13): the regulatory radio profile,
//! duty-cycle bands, dedup/path/rekey windows, and per-transport toggles,
//! all with `Default`s carrying the spec's literal constants so a caller
//! never has to supply a file. Loading mirrors
//! `rns_transport::config::Config::from_ini`: blank lines and `#`/`;`
//! comments are skipped, `[section]` headers switch context, and `key =
//! value` pairs are parsed within a section.

use std::time::Duration;

use crate::duty_cycle::DutyCycleConfig;
use crate::radio::RadioConfig;

#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub radio: RadioConfig,
    pub duty_cycle: DutyCycleConfig,
    pub dedup_window: Duration,
    pub path_expiry: Duration,
    pub rekey_interval: Duration,
    pub fragment_mtu: usize,
    pub long_range_enabled: bool,
    pub fmp_enabled: bool,
    pub short_range_enabled: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            radio: RadioConfig::default(),
            duty_cycle: DutyCycleConfig::default(),
            dedup_window: Duration::from_secs(60),
            path_expiry: Duration::from_secs(300),
            rekey_interval: Duration::from_secs(3600),
            fragment_mtu: 200,
            long_range_enabled: true,
            fmp_enabled: true,
            short_range_enabled: true,
        }
    }
}

impl MeshConfig {
    /// Parses a `[section]` / `key = value` text document. Unknown keys
    /// and sections are ignored rather than rejected, so a partial
    /// override file only needs to name what it changes.
    pub fn from_ini(ini: &str) -> Self {
        let mut config = Self::default();
        let mut section = String::new();

        for raw_line in ini.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_ascii_lowercase();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else { continue };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match (section.as_str(), key.as_str()) {
                ("radio", "frequency_hz") => {
                    if let Ok(v) = value.parse() {
                        config.radio.frequency_hz = v;
                    }
                }
                ("radio", "spreading_factor") => {
                    if let Ok(v) = value.parse() {
                        config.radio.spreading_factor = v;
                    }
                }
                ("radio", "bandwidth_hz") => {
                    if let Ok(v) = value.parse() {
                        config.radio.bandwidth_hz = v;
                    }
                }
                ("radio", "tx_power_dbm") => {
                    if let Ok(v) = value.parse() {
                        config.radio.tx_power_dbm = v;
                    }
                }
                ("transport", "dedup_window_secs") => {
                    if let Ok(v) = value.parse() {
                        config.dedup_window = Duration::from_secs(v);
                    }
                }
                ("transport", "path_expiry_secs") => {
                    if let Ok(v) = value.parse() {
                        config.path_expiry = Duration::from_secs(v);
                    }
                }
                ("transport", "rekey_interval_secs") => {
                    if let Ok(v) = value.parse() {
                        config.rekey_interval = Duration::from_secs(v);
                    }
                }
                ("transport", "fragment_mtu") => {
                    if let Ok(v) = value.parse() {
                        config.fragment_mtu = v;
                    }
                }
                ("transports", "long_range") => {
                    config.long_range_enabled = value.eq_ignore_ascii_case("true");
                }
                ("transports", "fmp") => {
                    config.fmp_enabled = value.eq_ignore_ascii_case("true");
                }
                ("transports", "short_range") => {
                    config.short_range_enabled = value.eq_ignore_ascii_case("true");
                }
                _ => {}
            }
        }

        config
    }
}
