//! Spreadsheet and database export collaborators. The core hands each one an
//! already-encoded query string and only looks at the success flag — no
//! retries, no acknowledgement tracking (the webhook/database side owns its
//! own delivery semantics).

use tracing::{info, warn};

use crate::snapshot::{Reading, Snapshot};

// ---------------------------------------------------------------------------
// Collaborator contract
// ---------------------------------------------------------------------------

pub trait Exporter: Send {
    fn export(&mut self, query: &str) -> bool;
}

/// Stand-in exporter: logs what would have been sent. Production deployments
/// swap in the HTTP webhook / database client here.
pub struct LogExporter {
    target: &'static str,
}

impl LogExporter {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Exporter for LogExporter {
    fn export(&mut self, query: &str) -> bool {
        info!(target = self.target, %query, "export");
        true
    }
}

// ---------------------------------------------------------------------------
// Query encoding
// ---------------------------------------------------------------------------

/// Flatten the snapshot into `key=value` pairs, roster order, one decimal
/// place — the same precision contract as the telemetry records.
pub fn export_query(unit_id: &str, snapshot: &Snapshot) -> String {
    let mut out = format!("unit={unit_id}");

    for s in snapshot.sensors() {
        let key = format!("{}{}", s.kind.name(), s.id);
        match s.reading {
            Reading::Ambient { temp_c, humidity_pct } => {
                out.push_str(&format!("&{key}_temp={temp_c:.1}&{key}_humid={humidity_pct:.1}"));
            }
            Reading::Airflow { speed_ms } => {
                out.push_str(&format!("&{key}_speed={speed_ms:.1}"));
            }
            Reading::Power {
                volt,
                amp,
                power_w,
                freq_hz,
                power_factor,
                energy_kwh,
            } => {
                out.push_str(&format!(
                    "&{key}_volt={volt:.1}&{key}_amp={amp:.1}&{key}_power={power_w:.1}&{key}_freq={freq_hz:.1}&{key}_pf={power_factor:.1}&{key}_energy={energy_kwh:.1}"
                ));
            }
            Reading::Relay { on } => {
                out.push_str(&format!("&{key}_state={}", on as u8));
            }
        }
        out.push_str(&format!("&{key}_active={}", s.active as u8));
    }

    out
}

/// Fire one export and surface failure as a log line only — a lost export is
/// not fatal (the next interval sends fresh data anyway).
pub fn run_export(exporter: &mut dyn Exporter, channel: &str, query: &str) {
    if !exporter.export(query) {
        warn!(channel, "export failed — will retry on next interval");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SensorKind;

    /// Captures queries instead of sending them.
    struct CaptureExporter {
        sent: Vec<String>,
        ok: bool,
    }

    impl Exporter for CaptureExporter {
        fn export(&mut self, query: &str) -> bool {
            self.sent.push(query.to_string());
            self.ok
        }
    }

    fn snapshot() -> Snapshot {
        let mut snap = Snapshot::new(&[
            (1, 10, SensorKind::AmbientIn),
            (2, 0, SensorKind::Relay),
        ]);
        snap.record(
            1,
            Reading::Ambient {
                temp_c: 21.04,
                humidity_pct: 55.0,
            },
        );
        snap.record(2, Reading::Relay { on: true });
        snap
    }

    #[test]
    fn export_query_golden() {
        let got = export_query("u1", &snapshot());
        assert_eq!(
            got,
            "unit=u1&ambient_in1_temp=21.0&ambient_in1_humid=55.0&ambient_in1_active=1&relay2_state=1&relay2_active=1"
        );
    }

    #[test]
    fn stale_sensor_exports_with_active_zero() {
        let mut snap = snapshot();
        snap.mark_stale(1);
        let got = export_query("u1", &snap);
        assert!(got.contains("ambient_in1_active=0"));
        // Last good value still present.
        assert!(got.contains("ambient_in1_temp=21.0"));
    }

    #[test]
    fn run_export_passes_query_through() {
        let mut exporter = CaptureExporter {
            sent: vec![],
            ok: true,
        };
        run_export(&mut exporter, "spreadsheet", "unit=u1&x=1.0");
        assert_eq!(exporter.sent, vec!["unit=u1&x=1.0"]);
    }

    #[test]
    fn run_export_swallows_failure() {
        let mut exporter = CaptureExporter {
            sent: vec![],
            ok: false,
        };
        // Must not panic or retry.
        run_export(&mut exporter, "database", "unit=u1");
        assert_eq!(exporter.sent.len(), 1);
    }
}
