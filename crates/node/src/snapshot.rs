//! In-memory sensor snapshot: one fixed entry per configured sensor,
//! overwritten in place by the sampling task and read by the telemetry
//! encoder. Single writer, many readers — guarded by a `tokio::sync::RwLock`
//! so composite readings are never observed half-updated.

use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedSnapshot = Arc<RwLock<Snapshot>>;

// ---------------------------------------------------------------------------
// Sensor kinds and readings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    AmbientIn,
    AmbientOut,
    Airflow,
    PowerMeter,
    Relay,
}

impl SensorKind {
    /// Wire name used in telemetry records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AmbientIn => "ambient_in",
            Self::AmbientOut => "ambient_out",
            Self::Airflow => "airflow",
            Self::PowerMeter => "power_meter",
            Self::Relay => "relay",
        }
    }
}

/// Kind-specific value set, written as a whole on every sampling cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Ambient { temp_c: f64, humidity_pct: f64 },
    Airflow { speed_ms: f64 },
    Power {
        volt: f64,
        amp: f64,
        power_w: f64,
        freq_hz: f64,
        power_factor: f64,
        energy_kwh: f64,
    },
    Relay { on: bool },
}

impl Reading {
    /// All-zero reading of the right shape for a kind, used before the
    /// first sample arrives.
    pub fn zero(kind: SensorKind) -> Self {
        match kind {
            SensorKind::AmbientIn | SensorKind::AmbientOut => Self::Ambient {
                temp_c: 0.0,
                humidity_pct: 0.0,
            },
            SensorKind::Airflow => Self::Airflow { speed_ms: 0.0 },
            SensorKind::PowerMeter => Self::Power {
                volt: 0.0,
                amp: 0.0,
                power_w: 0.0,
                freq_hz: 0.0,
                power_factor: 0.0,
                energy_kwh: 0.0,
            },
            SensorKind::Relay => Self::Relay { on: false },
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SensorEntry {
    pub id: u8,
    pub bus_address: u8,
    pub kind: SensorKind,
    pub reading: Reading,
    /// False when the most recent bus read returned the error sentinel.
    pub active: bool,
}

/// Fixed-cardinality snapshot: allocated once at startup, entries are never
/// added or removed afterwards.
#[derive(Debug, Default)]
pub struct Snapshot {
    sensors: Vec<SensorEntry>,
}

impl Snapshot {
    pub fn new(roster: &[(u8, u8, SensorKind)]) -> Self {
        let sensors = roster
            .iter()
            .map(|&(id, bus_address, kind)| SensorEntry {
                id,
                bus_address,
                kind,
                reading: Reading::zero(kind),
                active: false,
            })
            .collect();
        Self { sensors }
    }

    pub fn sensors(&self) -> &[SensorEntry] {
        &self.sensors
    }

    /// Overwrite a sensor's reading in place and mark it live.
    pub fn record(&mut self, id: u8, reading: Reading) {
        if let Some(s) = self.sensors.iter_mut().find(|s| s.id == id) {
            s.reading = reading;
            s.active = true;
        }
    }

    /// Mark a sensor stale after a failed bus read; the last good reading
    /// stays in place.
    pub fn mark_stale(&mut self, id: u8) {
        if let Some(s) = self.sensors.iter_mut().find(|s| s.id == id) {
            s.active = false;
        }
    }

    pub fn shared(self) -> SharedSnapshot {
        Arc::new(RwLock::new(self))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Vec<(u8, u8, SensorKind)> {
        vec![
            (1, 10, SensorKind::AmbientIn),
            (2, 11, SensorKind::PowerMeter),
        ]
    }

    #[test]
    fn new_snapshot_starts_inactive_with_zero_readings() {
        let snap = Snapshot::new(&roster());
        assert_eq!(snap.sensors().len(), 2);
        assert!(snap.sensors().iter().all(|s| !s.active));
        assert_eq!(
            snap.sensors()[0].reading,
            Reading::Ambient {
                temp_c: 0.0,
                humidity_pct: 0.0
            }
        );
    }

    #[test]
    fn record_overwrites_in_place_and_activates() {
        let mut snap = Snapshot::new(&roster());
        snap.record(
            1,
            Reading::Ambient {
                temp_c: 24.5,
                humidity_pct: 61.0,
            },
        );

        let s = &snap.sensors()[0];
        assert!(s.active);
        assert_eq!(
            s.reading,
            Reading::Ambient {
                temp_c: 24.5,
                humidity_pct: 61.0
            }
        );
        // Cardinality is fixed.
        assert_eq!(snap.sensors().len(), 2);
    }

    #[test]
    fn mark_stale_keeps_last_reading() {
        let mut snap = Snapshot::new(&roster());
        snap.record(
            1,
            Reading::Ambient {
                temp_c: 20.0,
                humidity_pct: 50.0,
            },
        );
        snap.mark_stale(1);

        let s = &snap.sensors()[0];
        assert!(!s.active);
        assert_eq!(
            s.reading,
            Reading::Ambient {
                temp_c: 20.0,
                humidity_pct: 50.0
            }
        );
    }

    #[test]
    fn record_unknown_id_is_a_no_op() {
        let mut snap = Snapshot::new(&roster());
        snap.record(99, Reading::Airflow { speed_ms: 1.0 });
        assert_eq!(snap.sensors().len(), 2);
        assert!(snap.sensors().iter().all(|s| !s.active));
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(SensorKind::AmbientIn.name(), "ambient_in");
        assert_eq!(SensorKind::PowerMeter.name(), "power_meter");
        assert_eq!(SensorKind::Airflow.name(), "airflow");
    }

    #[test]
    fn kind_deserializes_from_snake_case() {
        let k: SensorKind = serde_json::from_str("\"ambient_out\"").unwrap();
        assert_eq!(k, SensorKind::AmbientOut);
    }
}
