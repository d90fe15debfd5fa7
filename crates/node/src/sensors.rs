//! Sampling collaborator: reads every rostered sensor over the serial bus
//! and overwrites the shared snapshot. A read returns `None` for the bus
//! error sentinel, which marks the sensor stale without discarding its last
//! good value. The simulated bus (default `sim` feature) models plausible
//! drift so the node runs end-to-end with no hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::snapshot::{Reading, SensorKind, SharedSnapshot, Snapshot};

// ---------------------------------------------------------------------------
// Bus contract
// ---------------------------------------------------------------------------

/// One addressed read per sensor per cycle. `None` is the error sentinel.
pub trait SensorBus: Send {
    fn read(&mut self, bus_address: u8, kind: SensorKind) -> Option<Reading>;

    /// Zero the power meter's cumulative-energy register.
    fn reset_energy(&mut self);
}

// ---------------------------------------------------------------------------
// Cross-task handles
// ---------------------------------------------------------------------------

/// Relay output state mirrored into the snapshot by the sampling task, so
/// the snapshot keeps a single writer.
#[derive(Clone, Default)]
pub struct RelayMirror(Arc<AtomicBool>);

impl RelayMirror {
    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::Relaxed);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Deferred energy-reset request from the command handler; consumed by the
/// sampling task before its next bus cycle.
#[derive(Clone, Default)]
pub struct EnergyResetFlag(Arc<AtomicBool>);

impl EnergyResetFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// One full cycle over the roster. Relay entries mirror the output state
/// instead of touching the bus.
pub fn sample_once(
    bus: &mut dyn SensorBus,
    roster: &[(u8, u8, SensorKind)],
    snapshot: &mut Snapshot,
    relay_on: bool,
) {
    for &(id, bus_address, kind) in roster {
        if kind == SensorKind::Relay {
            snapshot.record(id, Reading::Relay { on: relay_on });
            continue;
        }
        match bus.read(bus_address, kind) {
            Some(reading) => snapshot.record(id, reading),
            None => {
                debug!(id, bus_address, "sensor read failed — marking stale");
                snapshot.mark_stale(id);
            }
        }
    }
}

/// Background sampling loop. Intended to be `tokio::spawn`-ed from main;
/// runs for the lifetime of the process.
pub async fn run(
    mut bus: Box<dyn SensorBus>,
    roster: Vec<(u8, u8, SensorKind)>,
    snapshot: SharedSnapshot,
    relay: RelayMirror,
    energy_reset: EnergyResetFlag,
    sample_every: Duration,
) {
    info!(
        sensors = roster.len(),
        every_sec = sample_every.as_secs(),
        "sampling loop started"
    );
    let mut ticker = tokio::time::interval(sample_every);
    loop {
        ticker.tick().await;

        if energy_reset.take() {
            bus.reset_energy();
            info!("power meter cumulative energy zeroed");
        }

        let relay_on = relay.get();
        let mut snap = snapshot.write().await;
        sample_once(bus.as_mut(), &roster, &mut snap, relay_on);
    }
}

// ---------------------------------------------------------------------------
// Simulated bus (development — no hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "sim")]
pub mod sim {
    use super::*;
    use std::collections::HashMap;

    /// Random-walk simulator: per-address value state, slow drift, a small
    /// error-sentinel rate to exercise the stale path.
    pub struct SimBus {
        walk: HashMap<u8, f64>,
        energy_kwh: f64,
        error_rate: f64,
    }

    impl SimBus {
        pub fn new() -> Self {
            Self {
                walk: HashMap::new(),
                energy_kwh: 0.0,
                error_rate: 0.02,
            }
        }

        /// Error-free variant for tests.
        pub fn reliable() -> Self {
            Self {
                error_rate: 0.0,
                ..Self::new()
            }
        }

        fn step(&mut self, bus_address: u8) -> f64 {
            let v = self.walk.entry(bus_address).or_insert_with(|| fastrand::f64());
            *v = (*v + (fastrand::f64() - 0.5) * 0.1).clamp(0.0, 1.0);
            *v
        }
    }

    impl Default for SimBus {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SensorBus for SimBus {
        fn read(&mut self, bus_address: u8, kind: SensorKind) -> Option<Reading> {
            if fastrand::f64() < self.error_rate {
                return None; // simulated bus timeout
            }
            let w = self.step(bus_address);
            Some(match kind {
                SensorKind::AmbientIn | SensorKind::AmbientOut => Reading::Ambient {
                    temp_c: 18.0 + w * 14.0,
                    humidity_pct: 40.0 + w * 35.0,
                },
                SensorKind::Airflow => Reading::Airflow { speed_ms: w * 6.0 },
                SensorKind::PowerMeter => {
                    let power_w = 150.0 + w * 400.0;
                    // Integrate assuming one read per second of wall time;
                    // precision is irrelevant for a simulator.
                    self.energy_kwh += power_w / 3_600_000.0;
                    Reading::Power {
                        volt: 228.0 + w * 6.0,
                        amp: power_w / 230.0,
                        power_w,
                        freq_hz: 49.9 + w * 0.2,
                        power_factor: 0.85 + w * 0.1,
                        energy_kwh: self.energy_kwh,
                    }
                }
                SensorKind::Relay => Reading::Relay { on: false },
            })
        }

        fn reset_energy(&mut self) {
            self.energy_kwh = 0.0;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
