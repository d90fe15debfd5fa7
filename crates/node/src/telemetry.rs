//! Telemetry encoder: pure functions turning the current snapshot and config
//! into compact JSON records. Key order is fixed and floats always carry one
//! decimal place — downstream consumers parse by key, not by sniffing, and
//! the golden tests below pin the exact output.

use crate::snapshot::{Reading, SensorEntry};
use crate::store::Config;

/// Network identity filled in by the connectivity collaborator.
#[derive(Debug, Clone, Default)]
pub struct NetInfo {
    pub ssid: String,
    pub rssi_dbm: i32,
    pub ip: String,
}

/// One flat record per sensor, published on the telemetry channel.
pub fn sensor_record(unit_id: &str, config: &Config, sensor: &SensorEntry) -> String {
    let mut out = format!(
        "{{\"unit\":\"{}\",\"prefix\":\"{}\",\"cmd\":\"mqtt\",\"sensor\":\"{}\",\"id\":{},\"address\":{}",
        unit_id,
        config.topic_prefix,
        sensor.kind.name(),
        sensor.id,
        sensor.bus_address
    );

    match sensor.reading {
        Reading::Ambient { temp_c, humidity_pct } => {
            out.push_str(&format!(",\"temp\":{temp_c:.1},\"humid\":{humidity_pct:.1}"));
        }
        Reading::Airflow { speed_ms } => {
            out.push_str(&format!(",\"speed\":{speed_ms:.1}"));
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
                ",\"volt\":{volt:.1},\"amp\":{amp:.1},\"power\":{power_w:.1},\"freq\":{freq_hz:.1},\"pf\":{power_factor:.1},\"energy\":{energy_kwh:.1}"
            ));
        }
        Reading::Relay { on } => {
            out.push_str(&format!(",\"state\":{on}"));
        }
    }

    out.push_str(&format!(",\"active\":{}}}", sensor.active));
    out
}

/// The `config:?` reply: firmware identity, connectivity, and the three
/// schedule intervals.
pub fn config_record(unit_id: &str, version: &str, config: &Config, net: &NetInfo) -> String {
    format!(
        "{{\"unit\":\"{}\",\"cmd\":\"config\",\"version\":\"{}\",\"broker\":\"{}\",\"ssid\":\"{}\",\"rssi\":{},\"ip\":\"{}\",\"mqtt_time\":{},\"spreadsheet_time\":{},\"mysql_time\":{}}}",
        unit_id,
        version,
        config.broker_host,
        net.ssid,
        net.rssi_dbm,
        net.ip,
        config.mqtt_interval_sec,
        config.spreadsheet_interval_min,
        config.mysql_interval_sec
    )
}

// ===========================================================================
// Tests
// ===========================================================================
