//! Inbound command protocol: a single-level `<command>:<value>` grammar,
//! a fixed dispatch table, and handlers that validate first, then mutate the
//! config store and the matching schedule interval inside the same call.
//! The caller publishes the resulting response on the channel the command
//! arrived on — never on the other broker.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broker::ResponseChannel;
use crate::relay::Relay;
use crate::scheduler::{Channel, Schedules};
use crate::sensors::{EnergyResetFlag, RelayMirror};
use crate::store::{Config, ConfigStore, MQTT_INTERVAL_MAX_SEC, SPREADSHEET_INTERVAL_MAX_MIN};

/// `mysql_time` shares the telemetry command bound; the wider persisted
/// range is only reachable through provisioning.
const MYSQL_COMMAND_MAX_SEC: u8 = 120;

// ---------------------------------------------------------------------------
// Acks and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Success,
    Error,
}

impl Ack {
    pub fn payload(self, unit_id: &str) -> String {
        match self {
            Self::Success => format!("{unit_id}=> success"),
            Self::Error => format!("{unit_id}=> error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Publish the ack on the origin channel.
    Ack(Ack),
    /// Publish the current config record (the record is the ack).
    ConfigReport,
    /// Publish a success ack, then restart the process — the one command
    /// that acknowledges before acting, since it cannot respond afterwards.
    AckThenRestart,
    /// No response at all (`auto` pass-through).
    Silent,
}

impl Outcome {
    /// The payload to publish on the origin channel, if any.
    /// `config_report` is only rendered when actually needed.
    pub fn response(self, unit_id: &str, config_report: impl FnOnce() -> String) -> Option<String> {
        match self {
            Self::Ack(ack) => Some(ack.payload(unit_id)),
            Self::ConfigReport => Some(config_report()),
            Self::AckThenRestart => Some(Ack::Success.payload(unit_id)),
            Self::Silent => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Split `<command>:<value>` at the first `:`. The value may itself contain
/// further colons; the grammar is single-level. A payload with no delimiter
/// (or non-UTF-8 bytes) is an explicit no-match.
pub fn parse(payload: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(payload).ok()?;
    text.split_once(':')
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Everything a command handler may touch. Config and schedule mutations
/// happen inside one `dispatch` call, so no tick ever observes a
/// half-updated pair.
pub struct CommandContext<'a> {
    pub store: &'a mut ConfigStore,
    pub schedules: &'a mut Schedules,
    pub relay: &'a mut Relay,
    pub relay_mirror: &'a RelayMirror,
    pub energy_reset: &'a EnergyResetFlag,
}

pub fn dispatch(payload: &[u8], ctx: &mut CommandContext) -> Outcome {
    let Some((command, value)) = parse(payload) else {
        warn!("command payload without delimiter — rejecting");
        return Outcome::Ack(Ack::Error);
    };

    match command {
        "solid" => handle_solid(value, ctx),
        "auto" => {
            debug!(value, "auto: reserved pass-through");
            Outcome::Silent
        }
        "spreadsheet_time" => handle_spreadsheet_time(value, ctx),
        "mqtt_time" => handle_mqtt_time(value, ctx),
        "mysql_time" => handle_mysql_time(value, ctx),
        "reset" => handle_reset(value),
        "energy_reset" => handle_energy_reset(value, ctx),
        "config" => handle_config_query(value),
        other => {
            warn!(command = other, "unknown command");
            Outcome::Ack(Ack::Error)
        }
    }
}

/// One inbound payload end to end: dispatch it, then publish the response,
/// if any, back on the channel the command arrived on. The other broker is
/// never written to — it gets no handle into this call.
pub async fn handle_inbound<C, F>(
    payload: &[u8],
    ctx: &mut CommandContext<'_>,
    unit_id: &str,
    config_report: F,
    origin: &mut C,
) -> Outcome
where
    C: ResponseChannel,
    F: FnOnce(&Config) -> String,
{
    let outcome = dispatch(payload, ctx);
    if let Some(response) = outcome.response(unit_id, || config_report(ctx.store.config())) {
        if !origin.respond(&response).await {
            warn!("response publish failed");
        }
    }
    outcome
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_solid(value: &str, ctx: &mut CommandContext) -> Outcome {
    let on = match value {
        "0" => false,
        "1" => true,
        other => {
            warn!(value = other, "solid: expected 0 or 1");
            return Outcome::Ack(Ack::Error);
        }
    };

    ctx.relay.set(on);
    ctx.relay_mirror.set(on);
    // Persisting cannot fail validation for a bool; degraded-store skips
    // the write internally.
    let _ = ctx.store.set_solid_state(on);
    info!(on, "solid state set");
    Outcome::Ack(Ack::Success)
}

fn handle_spreadsheet_time(value: &str, ctx: &mut CommandContext) -> Outcome {
    let Ok(minutes) = value.parse::<u8>() else {
        warn!(value, "spreadsheet_time: not an integer in 0..={SPREADSHEET_INTERVAL_MAX_MIN}");
        return Outcome::Ack(Ack::Error);
    };
    match ctx.store.set_spreadsheet_interval_min(minutes) {
        Ok(()) => {
            ctx.schedules.set_interval(
                Channel::Spreadsheet,
                Duration::from_secs(minutes as u64 * 60),
            );
            info!(minutes, "spreadsheet interval set");
            Outcome::Ack(Ack::Success)
        }
        Err(e) => {
            warn!("spreadsheet_time rejected: {e}");
            Outcome::Ack(Ack::Error)
        }
    }
}

fn handle_mqtt_time(value: &str, ctx: &mut CommandContext) -> Outcome {
    let Ok(seconds) = value.parse::<u8>() else {
        warn!(value, "mqtt_time: not an integer in 0..={MQTT_INTERVAL_MAX_SEC}");
        return Outcome::Ack(Ack::Error);
    };
    match ctx.store.set_mqtt_interval_sec(seconds) {
        Ok(()) => {
            ctx.schedules
                .set_interval(Channel::Telemetry, Duration::from_secs(seconds as u64));
            info!(seconds, "telemetry interval set");
            Outcome::Ack(Ack::Success)
        }
        Err(e) => {
            warn!("mqtt_time rejected: {e}");
            Outcome::Ack(Ack::Error)
        }
    }
}

fn handle_mysql_time(value: &str, ctx: &mut CommandContext) -> Outcome {
    let Ok(seconds) = value.parse::<u8>() else {
        warn!(value, "mysql_time: not an integer in 0..={MYSQL_COMMAND_MAX_SEC}");
        return Outcome::Ack(Ack::Error);
    };
    if seconds > MYSQL_COMMAND_MAX_SEC {
        warn!(seconds, "mysql_time: out of range 0..={MYSQL_COMMAND_MAX_SEC}");
        return Outcome::Ack(Ack::Error);
    }
    match ctx.store.set_mysql_interval_sec(seconds as u16) {
        Ok(()) => {
            ctx.schedules
                .set_interval(Channel::Database, Duration::from_secs(seconds as u64));
            info!(seconds, "database interval set");
            Outcome::Ack(Ack::Success)
        }
        Err(e) => {
            warn!("mysql_time rejected: {e}");
            Outcome::Ack(Ack::Error)
        }
    }
}

fn handle_reset(value: &str) -> Outcome {
    if value == "1" {
        info!("reset requested — acknowledging before restart");
        Outcome::AckThenRestart
    } else {
        warn!(value, "reset: expected 1");
        Outcome::Ack(Ack::Error)
    }
}

fn handle_energy_reset(value: &str, ctx: &mut CommandContext) -> Outcome {
    if value == "1" {
        ctx.energy_reset.request();
        Outcome::Ack(Ack::Success)
    } else {
        warn!(value, "energy_reset: expected 1");
        Outcome::Ack(Ack::Error)
    }
}

fn handle_config_query(value: &str) -> Outcome {
    if value == "?" {
        Outcome::ConfigReport
    } else {
        warn!(value, "config: expected ?");
        Outcome::Ack(Ack::Error)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
