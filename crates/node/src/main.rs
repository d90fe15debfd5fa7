mod broker;
mod command;
mod export;
mod relay;
mod scheduler;
mod sensors;
mod settings;
mod snapshot;
mod store;
mod telemetry;

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use std::{env, sync::Arc};
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use broker::{control_topic, telemetry_topic, BrokerChannel, BrokerId};
use command::{CommandContext, Outcome};
use export::{export_query, run_export, LogExporter};
use relay::Relay;
use scheduler::{Channel, Schedules};
use sensors::{EnergyResetFlag, RelayMirror};
use snapshot::Snapshot;
use store::ConfigStore;
use telemetry::NetInfo;

const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main loop cadence. Every tick polls both brokers, checks the scheduler,
/// and runs the offline watchdog.
const TICK_INTERVAL_MS: u64 = 250;

/// Event-loop turns granted to flush the final ack before a restart.
const RESTART_FLUSH_POLLS: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = FIRMWARE_VERSION, "enviro-node starting");

    // ── Settings + persisted config ─────────────────────────────────
    let settings_path = env::var("SETTINGS_PATH").unwrap_or_else(|_| "node.toml".to_string());
    let settings = settings::load(&settings_path)?;

    let mut store = ConfigStore::open(Path::new(&settings.store_path));
    info!(
        unit = %settings.unit_id,
        prefix = %store.config().topic_prefix,
        degraded = store.is_degraded(),
        "config loaded"
    );

    // ── Relay (restore last-known-good state) ───────────────────────
    let mut relay = Relay::new(settings.relay_gpio_pin, settings.relay_active_low)?;
    relay.set(store.config().solid_state);
    let relay_mirror = RelayMirror::default();
    relay_mirror.set(store.config().solid_state);

    let energy_reset = EnergyResetFlag::default();

    // ── Snapshot + sampling task ────────────────────────────────────
    let roster = settings.roster();
    let snapshot = Snapshot::new(&roster).shared();

    #[cfg(feature = "sim")]
    tokio::spawn(sensors::run(
        Box::new(sensors::sim::SimBus::new()),
        roster,
        Arc::clone(&snapshot),
        relay_mirror.clone(),
        energy_reset.clone(),
        Duration::from_secs(settings.sample_every_s),
    ));
    #[cfg(not(feature = "sim"))]
    warn!("no sensor bus compiled in — snapshot entries stay inactive");

    // ── Brokers ─────────────────────────────────────────────────────
    let config = store.config();
    let primary_host = if settings.primary.host.is_empty() {
        config.broker_host.clone()
    } else {
        settings.primary.host.clone()
    };
    let credentials = (!config.user.is_empty()).then(|| (config.user.clone(), config.pass.clone()));
    let inbound = control_topic(&config.topic_prefix, &settings.unit_id);
    let outbound = telemetry_topic(&config.topic_prefix, &settings.unit_id);

    let mut primary = BrokerChannel::new(
        BrokerId::Primary,
        &primary_host,
        settings.primary.port,
        &format!("enviro-node-{}-primary", settings.unit_id),
        credentials.clone(),
        &inbound,
        &outbound,
    );
    let mut backup = BrokerChannel::new(
        BrokerId::Backup,
        &settings.backup.host,
        settings.backup.port,
        &format!("enviro-node-{}-backup", settings.unit_id),
        credentials,
        &inbound,
        &outbound,
    );

    // ── Schedules, exporters, network identity ──────────────────────
    let mut schedules = Schedules::from_config(store.config(), Instant::now());
    let mut spreadsheet = LogExporter::new("spreadsheet");
    let mut database = LogExporter::new("database");

    let net = NetInfo {
        ssid: env::var("NET_SSID").unwrap_or_default(),
        rssi_dbm: env::var("NET_RSSI")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        ip: env::var("NET_IP").unwrap_or_default(),
    };

    // ── Main tick loop ──────────────────────────────────────────────
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    let offline_window = Duration::from_secs(settings.offline_restart_sec);
    let mut offline_since: Option<Instant> = None;

    loop {
        ticker.tick().await;
        let mut restart_requested = false;

        // One connect/poll/dispatch pass per broker; a command's response
        // always goes back on the channel it arrived on.
        for channel in [&mut primary, &mut backup] {
            channel.ensure_connected().await;
            let Some(payload) = channel.poll().await else {
                continue;
            };

            let outcome = command::handle_inbound(
                &payload,
                &mut CommandContext {
                    store: &mut store,
                    schedules: &mut schedules,
                    relay: &mut relay,
                    relay_mirror: &relay_mirror,
                    energy_reset: &energy_reset,
                },
                &settings.unit_id,
                |config| {
                    telemetry::config_record(&settings.unit_id, FIRMWARE_VERSION, config, &net)
                },
                channel,
            )
            .await;
            restart_requested |= outcome == Outcome::AckThenRestart;
        }

        if restart_requested {
            for _ in 0..RESTART_FLUSH_POLLS {
                let _ = primary.poll().await;
                let _ = backup.poll().await;
            }
            info!("reset acknowledged — restarting");
            std::process::exit(0);
        }

        // ── Scheduler ───────────────────────────────────────────────
        let now = Instant::now();
        for channel in schedules.due(now) {
            match channel {
                Channel::Telemetry => {
                    let snap = snapshot.read().await;
                    let mut published = 0u32;
                    for sensor in snap.sensors() {
                        let record =
                            telemetry::sensor_record(&settings.unit_id, store.config(), sensor);
                        if primary.publish(&record).await {
                            published += 1;
                        }
                        if backup.publish(&record).await {
                            published += 1;
                        }
                    }
                    if published == 0 {
                        warn!("no broker connected — telemetry dropped this interval");
                    }
                }
                Channel::Spreadsheet => {
                    let query = export_query(&settings.unit_id, &*snapshot.read().await);
                    run_export(&mut spreadsheet, "spreadsheet", &query);
                }
                Channel::Database => {
                    let query = export_query(&settings.unit_id, &*snapshot.read().await);
                    run_export(&mut database, "database", &query);
                }
            }
        }

        // ── Offline watchdog ────────────────────────────────────────
        if primary.is_connected() || backup.is_connected() {
            offline_since = None;
        } else {
            let since = *offline_since.get_or_insert(now);
            if now.duration_since(since) >= offline_window {
                error!(
                    window_sec = offline_window.as_secs(),
                    "both brokers unreachable beyond the tolerance window — restarting"
                );
                std::process::exit(1);
            }
        }
    }
}
