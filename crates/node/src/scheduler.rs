//! Multi-interval publish scheduler: three independent `(last_fired,
//! interval)` timers for telemetry, spreadsheet export, and database export.
//! An interval of zero disables a channel. The tick logic is pure over a
//! caller-supplied `Instant` so it can be driven step by step in tests.

use std::time::Duration;
use tokio::time::Instant;

use crate::store::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Telemetry,
    Spreadsheet,
    Database,
}

// ---------------------------------------------------------------------------
// Per-channel state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ScheduleState {
    last_fired: Instant,
    interval: Duration,
}

impl ScheduleState {
    fn new(now: Instant, interval: Duration) -> Self {
        Self {
            last_fired: now,
            interval,
        }
    }

    fn due(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() {
            return false; // channel disabled
        }
        if now.duration_since(self.last_fired) >= self.interval {
            self.last_fired = now;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

/// All three channel timers. Intervals mirror the Config fields; command
/// handlers update both in the same invocation.
#[derive(Debug)]
pub struct Schedules {
    telemetry: ScheduleState,
    spreadsheet: ScheduleState,
    database: ScheduleState,
}

impl Schedules {
    pub fn from_config(config: &Config, now: Instant) -> Self {
        Self {
            telemetry: ScheduleState::new(
                now,
                Duration::from_secs(config.mqtt_interval_sec as u64),
            ),
            spreadsheet: ScheduleState::new(
                now,
                Duration::from_secs(config.spreadsheet_interval_min as u64 * 60),
            ),
            database: ScheduleState::new(
                now,
                Duration::from_secs(config.mysql_interval_sec as u64),
            ),
        }
    }

    /// Channels whose interval has elapsed; each returned channel has its
    /// `last_fired` advanced to `now`.
    pub fn due(&mut self, now: Instant) -> Vec<Channel> {
        let mut fired = Vec::new();
        if self.telemetry.due(now) {
            fired.push(Channel::Telemetry);
        }
        if self.spreadsheet.due(now) {
            fired.push(Channel::Spreadsheet);
        }
        if self.database.due(now) {
            fired.push(Channel::Database);
        }
        fired
    }

    pub fn set_interval(&mut self, channel: Channel, interval: Duration) {
        self.state_mut(channel).interval = interval;
    }

    pub fn interval(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Telemetry => self.telemetry.interval,
            Channel::Spreadsheet => self.spreadsheet.interval,
            Channel::Database => self.database.interval,
        }
    }

    fn state_mut(&mut self, channel: Channel) -> &mut ScheduleState {
        match channel {
            Channel::Telemetry => &mut self.telemetry,
            Channel::Spreadsheet => &mut self.spreadsheet,
            Channel::Database => &mut self.database,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
