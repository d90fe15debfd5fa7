//! Bootstrap TOML settings: unit identity, broker endpoints, sensor roster,
//! and timing knobs. Loaded once at startup; the persisted config store
//! (`store.rs`) owns everything a remote command may change.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use crate::snapshot::SensorKind;

// ---------------------------------------------------------------------------
// Settings structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub unit_id: String,
    pub store_path: String,
    pub sample_every_s: u64,
    /// Both brokers continuously unreachable this long is treated as
    /// unrecoverable and restarts the process.
    pub offline_restart_sec: u64,
    pub relay_gpio_pin: u8,
    pub relay_active_low: bool,
    pub primary: BrokerEndpoint,
    pub backup: BrokerEndpoint,
    pub sensors: Vec<SensorEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrokerEndpoint {
    /// Empty host means "use the provisioned broker_host from the config
    /// store" (primary) — the backup should always name its host.
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct SensorEntry {
    pub id: u8,
    pub bus_address: u8,
    pub kind: SensorKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unit_id: "node-1".to_string(),
            store_path: "enviro-node.bin".to_string(),
            sample_every_s: 5,
            offline_restart_sec: 300,
            relay_gpio_pin: 17,
            relay_active_low: true,
            primary: BrokerEndpoint {
                host: String::new(),
                port: 1883,
            },
            backup: BrokerEndpoint {
                host: "127.0.0.1".to_string(),
                port: 1884,
            },
            sensors: vec![
                SensorEntry {
                    id: 1,
                    bus_address: 10,
                    kind: SensorKind::AmbientIn,
                },
                SensorEntry {
                    id: 2,
                    bus_address: 11,
                    kind: SensorKind::AmbientOut,
                },
                SensorEntry {
                    id: 3,
                    bus_address: 20,
                    kind: SensorKind::PowerMeter,
                },
                SensorEntry {
                    id: 4,
                    bus_address: 0, // not on the serial bus
                    kind: SensorKind::Relay,
                },
            ],
        }
    }
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Serial bus addresses are a single byte with 0 reserved for "not on the
/// bus" (the relay pseudo-sensor) and 248..=255 reserved by the protocol.
const BUS_ADDRESS_MAX: u8 = 247;

impl Settings {
    /// Validate all entries. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.unit_id.trim().is_empty() {
            errors.push("unit_id is empty".to_string());
        } else if self.unit_id.contains('/') {
            errors.push(format!(
                "unit_id '{}' must not contain '/' (it is a topic segment)",
                self.unit_id
            ));
        }

        if self.sample_every_s == 0 {
            errors.push("sample_every_s must be at least 1".to_string());
        }
        if self.offline_restart_sec < 60 {
            errors.push(format!(
                "offline_restart_sec {} below minimum 60",
                self.offline_restart_sec
            ));
        }

        if self.primary.port == 0 {
            errors.push("primary.port must be non-zero".to_string());
        }
        if self.backup.port == 0 {
            errors.push("backup.port must be non-zero".to_string());
        }
        if self.backup.host.trim().is_empty() {
            errors.push("backup.host is empty".to_string());
        }

        self.validate_sensors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "settings validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        if self.sensors.is_empty() {
            errors.push("no sensors configured".to_string());
        }

        let mut seen_ids: HashSet<u8> = HashSet::new();
        let mut seen_addrs: HashSet<u8> = HashSet::new();

        for (i, s) in self.sensors.iter().enumerate() {
            if !seen_ids.insert(s.id) {
                errors.push(format!("sensors[{i}]: duplicate sensor id {}", s.id));
            }
            if s.kind == SensorKind::Relay {
                continue; // relay pseudo-sensor has no bus address
            }
            if s.bus_address == 0 || s.bus_address > BUS_ADDRESS_MAX {
                errors.push(format!(
                    "sensors[{i}]: bus_address {} out of range 1..={BUS_ADDRESS_MAX}",
                    s.bus_address
                ));
            } else if !seen_addrs.insert(s.bus_address) {
                errors.push(format!(
                    "sensors[{i}]: bus_address {} is already in use",
                    s.bus_address
                ));
            }
        }
    }

    /// `(id, bus_address, kind)` triples for snapshot construction.
    pub fn roster(&self) -> Vec<(u8, u8, SensorKind)> {
        self.sensors
            .iter()
            .map(|s| (s.id, s.bus_address, s.kind))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML settings file. A missing file is not an
/// error — the node must still boot headless, so defaults apply.
pub fn load(path: &str) -> Result<Settings> {
    if !Path::new(path).exists() {
        warn!(path, "settings file not found — using built-in defaults");
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }

    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read settings: {path}"))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("failed to parse settings: {path}"))?;
    settings
        .validate()
        .with_context(|| format!("invalid settings: {path}"))?;
    Ok(settings)
}

// ===========================================================================
// Tests
// ===========================================================================
