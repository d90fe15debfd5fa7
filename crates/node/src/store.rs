//! Durable configuration store: a fixed-offset byte region (EEPROM-style
//! schema) backed by a file. Fields read back as all-bits-set are "erased"
//! and healed to their defaults at load time; every successful setter
//! persists just that field's bytes, synchronously.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Region layout (stable schema — offsets are part of the on-disk format)
// ---------------------------------------------------------------------------

const OFF_SOLID: usize = 0x00; // 1 byte, 0/1
const OFF_SPREADSHEET_MIN: usize = 0x01; // 1 byte
const OFF_MQTT_SEC: usize = 0x02; // 1 byte
const OFF_MYSQL_SEC: usize = 0x03; // 2 bytes, little-endian
const OFF_BROKER_HOST: usize = 0x05;
const LEN_BROKER_HOST: usize = 64;
const OFF_USER: usize = 0x45;
const LEN_USER: usize = 32;
const OFF_PASS: usize = 0x65;
const LEN_PASS: usize = 32;
const OFF_TOPIC_PREFIX: usize = 0x85;
const LEN_TOPIC_PREFIX: usize = 32;

/// Total size of the persisted region.
pub const REGION_LEN: usize = OFF_TOPIC_PREFIX + LEN_TOPIC_PREFIX;

/// What an unwritten byte reads back as.
pub const ERASED: u8 = 0xFF;

// ---------------------------------------------------------------------------
// Field limits and defaults
// ---------------------------------------------------------------------------

pub const SPREADSHEET_INTERVAL_MAX_MIN: u8 = 100;
pub const MQTT_INTERVAL_MAX_SEC: u8 = 120;
/// 0xFFFF reads back as the erase sentinel and can never round-trip.
pub const MYSQL_INTERVAL_MAX_SEC: u16 = u16::MAX - 1;

const DEFAULT_SOLID: bool = false;
const DEFAULT_SPREADSHEET_MIN: u8 = 5;
const DEFAULT_MQTT_SEC: u8 = 10;
const DEFAULT_MYSQL_SEC: u16 = 30;
const DEFAULT_BROKER_HOST: &str = "127.0.0.1";
const DEFAULT_USER: &str = "";
const DEFAULT_PASS: &str = "";
const DEFAULT_TOPIC_PREFIX: &str = "tenergy";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: value {value} out of range 0..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
    #[error("{field}: longer than {max} bytes")]
    TooLong { field: &'static str, max: usize },
    #[error("{field}: must be printable ASCII")]
    NotAscii { field: &'static str },
}

// ---------------------------------------------------------------------------
// In-memory config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub solid_state: bool,
    pub spreadsheet_interval_min: u8,
    pub mqtt_interval_sec: u8,
    pub mysql_interval_sec: u16,
    pub broker_host: String,
    pub user: String,
    pub pass: String,
    pub topic_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            solid_state: DEFAULT_SOLID,
            spreadsheet_interval_min: DEFAULT_SPREADSHEET_MIN,
            mqtt_interval_sec: DEFAULT_MQTT_SEC,
            mysql_interval_sec: DEFAULT_MYSQL_SEC,
            broker_host: DEFAULT_BROKER_HOST.to_string(),
            user: DEFAULT_USER.to_string(),
            pass: DEFAULT_PASS.to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage backend
// ---------------------------------------------------------------------------

/// Byte-addressable durable backend. A file in production, an in-memory
/// buffer in tests. Writes must be durable when `write_at` returns.
pub trait Storage: Send {
    fn read_region(&mut self, buf: &mut [u8; REGION_LEN]) -> std::io::Result<()>;
    fn write_at(&mut self, offset: usize, data: &[u8]) -> std::io::Result<()>;
}

pub struct FileStorage {
    file: File,
}

impl FileStorage {
    /// Open (or create) the backing file. A fresh file is filled with the
    /// erase sentinel so first boot looks like a factory-reset device.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let len = file.metadata()?.len() as usize;
        if len < REGION_LEN {
            file.seek(SeekFrom::End(0))?;
            file.write_all(&vec![ERASED; REGION_LEN - len])?;
            file.sync_data()?;
        }

        Ok(Self { file })
    }
}

impl Storage for FileStorage {
    fn read_region(&mut self, buf: &mut [u8; REGION_LEN]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(data)?;
        self.file.sync_data()
    }
}

// ---------------------------------------------------------------------------
// Config store
// ---------------------------------------------------------------------------

pub struct ConfigStore {
    config: Config,
    // None = degraded mode: backend unavailable, values live in memory only
    // and setter persists are skipped until the next boot.
    storage: Option<Box<dyn Storage>>,
}

impl ConfigStore {
    /// Open the store at `path`. Never fails: a backend error logs a warning
    /// and enters degraded in-memory mode with defaults.
    pub fn open(path: &Path) -> Self {
        match FileStorage::open(path) {
            Ok(storage) => Self::load(Box::new(storage)),
            Err(e) => {
                warn!(path = %path.display(), "config store unavailable ({e}); running on in-memory defaults");
                Self::degraded()
            }
        }
    }

    /// In-memory defaults, nothing persisted.
    pub fn degraded() -> Self {
        Self {
            config: Config::default(),
            storage: None,
        }
    }

    /// Read every field, substituting and re-persisting the default for any
    /// field that reads back erased. A second load performs no writes.
    pub fn load(mut storage: Box<dyn Storage>) -> Self {
        let mut region = [ERASED; REGION_LEN];
        if let Err(e) = storage.read_region(&mut region) {
            warn!("config region unreadable ({e}); running on in-memory defaults");
            return Self::degraded();
        }

        let mut store = Self {
            config: Config::default(),
            storage: Some(storage),
        };
        let mut healed = 0usize;

        match read_u8(&region, OFF_SOLID) {
            Some(v) => store.config.solid_state = v != 0,
            None => {
                store.persist(OFF_SOLID, &[DEFAULT_SOLID as u8]);
                healed += 1;
            }
        }
        match read_u8(&region, OFF_SPREADSHEET_MIN) {
            Some(v) if v <= SPREADSHEET_INTERVAL_MAX_MIN => {
                store.config.spreadsheet_interval_min = v
            }
            _ => {
                store.persist(OFF_SPREADSHEET_MIN, &[DEFAULT_SPREADSHEET_MIN]);
                healed += 1;
            }
        }
        match read_u8(&region, OFF_MQTT_SEC) {
            Some(v) if v <= MQTT_INTERVAL_MAX_SEC => store.config.mqtt_interval_sec = v,
            _ => {
                store.persist(OFF_MQTT_SEC, &[DEFAULT_MQTT_SEC]);
                healed += 1;
            }
        }
        match read_u16(&region, OFF_MYSQL_SEC) {
            Some(v) => store.config.mysql_interval_sec = v,
            None => {
                store.persist(OFF_MYSQL_SEC, &DEFAULT_MYSQL_SEC.to_le_bytes());
                healed += 1;
            }
        }
        match read_str(&region, OFF_BROKER_HOST, LEN_BROKER_HOST) {
            Some(s) => store.config.broker_host = s,
            None => {
                store.persist(OFF_BROKER_HOST, &str_bytes(DEFAULT_BROKER_HOST));
                healed += 1;
            }
        }
        match read_str(&region, OFF_USER, LEN_USER) {
            Some(s) => store.config.user = s,
            None => {
                store.persist(OFF_USER, &str_bytes(DEFAULT_USER));
                healed += 1;
            }
        }
        match read_str(&region, OFF_PASS, LEN_PASS) {
            Some(s) => store.config.pass = s,
            None => {
                store.persist(OFF_PASS, &str_bytes(DEFAULT_PASS));
                healed += 1;
            }
        }
        match read_str(&region, OFF_TOPIC_PREFIX, LEN_TOPIC_PREFIX) {
            Some(s) => store.config.topic_prefix = s,
            None => {
                store.persist(OFF_TOPIC_PREFIX, &str_bytes(DEFAULT_TOPIC_PREFIX));
                healed += 1;
            }
        }

        if healed > 0 {
            info!(healed, "config store: erased fields restored to defaults");
        }
        store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_degraded(&self) -> bool {
        self.storage.is_none()
    }

    // ── Setters (validate, mutate, persist just that field) ─────────

    pub fn set_solid_state(&mut self, on: bool) -> Result<(), ValidationError> {
        self.config.solid_state = on;
        self.persist(OFF_SOLID, &[on as u8]);
        Ok(())
    }

    pub fn set_spreadsheet_interval_min(&mut self, minutes: u8) -> Result<(), ValidationError> {
        if minutes > SPREADSHEET_INTERVAL_MAX_MIN {
            return Err(ValidationError::OutOfRange {
                field: "spreadsheet_interval_min",
                value: minutes as u32,
                max: SPREADSHEET_INTERVAL_MAX_MIN as u32,
            });
        }
        self.config.spreadsheet_interval_min = minutes;
        self.persist(OFF_SPREADSHEET_MIN, &[minutes]);
        Ok(())
    }

    pub fn set_mqtt_interval_sec(&mut self, seconds: u8) -> Result<(), ValidationError> {
        if seconds > MQTT_INTERVAL_MAX_SEC {
            return Err(ValidationError::OutOfRange {
                field: "mqtt_interval_sec",
                value: seconds as u32,
                max: MQTT_INTERVAL_MAX_SEC as u32,
            });
        }
        self.config.mqtt_interval_sec = seconds;
        self.persist(OFF_MQTT_SEC, &[seconds]);
        Ok(())
    }

    pub fn set_mysql_interval_sec(&mut self, seconds: u16) -> Result<(), ValidationError> {
        if seconds > MYSQL_INTERVAL_MAX_SEC {
            return Err(ValidationError::OutOfRange {
                field: "mysql_interval_sec",
                value: seconds as u32,
                max: MYSQL_INTERVAL_MAX_SEC as u32,
            });
        }
        self.config.mysql_interval_sec = seconds;
        self.persist(OFF_MYSQL_SEC, &seconds.to_le_bytes());
        Ok(())
    }

    pub fn set_broker_host(&mut self, host: &str) -> Result<(), ValidationError> {
        validate_str("broker_host", host, LEN_BROKER_HOST)?;
        self.config.broker_host = host.to_string();
        self.persist(OFF_BROKER_HOST, &str_bytes(host));
        Ok(())
    }

    pub fn set_user(&mut self, user: &str) -> Result<(), ValidationError> {
        validate_str("user", user, LEN_USER)?;
        self.config.user = user.to_string();
        self.persist(OFF_USER, &str_bytes(user));
        Ok(())
    }

    pub fn set_pass(&mut self, pass: &str) -> Result<(), ValidationError> {
        validate_str("pass", pass, LEN_PASS)?;
        self.config.pass = pass.to_string();
        self.persist(OFF_PASS, &str_bytes(pass));
        Ok(())
    }

    pub fn set_topic_prefix(&mut self, prefix: &str) -> Result<(), ValidationError> {
        validate_str("topic_prefix", prefix, LEN_TOPIC_PREFIX)?;
        self.config.topic_prefix = prefix.to_string();
        self.persist(OFF_TOPIC_PREFIX, &str_bytes(prefix));
        Ok(())
    }

    fn persist(&mut self, offset: usize, bytes: &[u8]) {
        match &mut self.storage {
            Some(storage) => {
                if let Err(e) = storage.write_at(offset, bytes) {
                    warn!(offset, "config store write failed: {e}");
                }
            }
            None => debug!(offset, "config store offline — write skipped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Field codecs
// ---------------------------------------------------------------------------

fn read_u8(region: &[u8; REGION_LEN], offset: usize) -> Option<u8> {
    let v = region[offset];
    (v != ERASED).then_some(v)
}

fn read_u16(region: &[u8; REGION_LEN], offset: usize) -> Option<u16> {
    let v = u16::from_le_bytes([region[offset], region[offset + 1]]);
    (v != u16::MAX).then_some(v)
}

/// NUL-terminated string inside a fixed region; a leading erase sentinel
/// means the field was never written. Non-ASCII bytes are dropped rather
/// than trusted.
fn read_str(region: &[u8; REGION_LEN], offset: usize, len: usize) -> Option<String> {
    let bytes = &region[offset..offset + len];
    if bytes[0] == ERASED {
        return None;
    }
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
    let raw = &bytes[..end];
    let s: String = raw
        .iter()
        .filter(|b| b.is_ascii() && !b.is_ascii_control())
        .map(|&b| b as char)
        .collect();
    if s.len() != raw.len() {
        warn!(
            offset,
            dropped = raw.len() - s.len(),
            "string field contained non-printable bytes — dropped"
        );
    }
    Some(s)
}

/// Value bytes plus the terminating NUL — the unit of a partial write.
fn str_bytes(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

fn validate_str(field: &'static str, s: &str, region_len: usize) -> Result<(), ValidationError> {
    // One byte is reserved for the NUL terminator.
    if s.len() >= region_len {
        return Err(ValidationError::TooLong {
            field,
            max: region_len - 1,
        });
    }
    if !s.bytes().all(|b| b.is_ascii() && !b.is_ascii_control()) {
        return Err(ValidationError::NotAscii { field });
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    // -- In-memory backend with a write counter ----------------------------

    #[derive(Clone)]
    struct MemStorage {
        image: Arc<Mutex<[u8; REGION_LEN]>>,
        writes: Arc<AtomicUsize>,
    }

    impl MemStorage {
        fn erased() -> Self {
            Self {
                image: Arc::new(Mutex::new([ERASED; REGION_LEN])),
                writes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl Storage for MemStorage {
        fn read_region(&mut self, buf: &mut [u8; REGION_LEN]) -> std::io::Result<()> {
            buf.copy_from_slice(&*self.image.lock().unwrap());
            Ok(())
        }

        fn write_at(&mut self, offset: usize, data: &[u8]) -> std::io::Result<()> {
            self.image.lock().unwrap()[offset..offset + data.len()].copy_from_slice(data);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // -- Load: defaults + self-heal ----------------------------------------

    #[test]
    fn load_after_full_erase_yields_defaults() {
        let mem = MemStorage::erased();
        let store = ConfigStore::load(Box::new(mem));
        assert_eq!(*store.config(), Config::default());
    }

    #[test]
    fn load_after_full_erase_repersists_defaults() {
        let mem = MemStorage::erased();
        let _ = ConfigStore::load(Box::new(mem.clone()));
        // Every field healed exactly once.
        assert_eq!(mem.write_count(), 8);
    }

    #[test]
    fn second_load_performs_no_writes() {
        let mem = MemStorage::erased();
        let _ = ConfigStore::load(Box::new(mem.clone()));
        let after_first = mem.write_count();

        let store = ConfigStore::load(Box::new(mem.clone()));
        assert_eq!(mem.write_count(), after_first, "second load must be write-free");
        assert_eq!(*store.config(), Config::default());
    }

    #[test]
    fn load_ignores_out_of_range_persisted_interval() {
        let mem = MemStorage::erased();
        // 0xFE is not erased but exceeds the 120s mqtt bound.
        mem.image.lock().unwrap()[OFF_MQTT_SEC] = 0xFE;
        let store = ConfigStore::load(Box::new(mem));
        assert_eq!(store.config().mqtt_interval_sec, DEFAULT_MQTT_SEC);
    }

    // -- Round-trip --------------------------------------------------------

    #[test]
    fn set_then_load_round_trips_numeric_fields() {
        let mem = MemStorage::erased();
        let mut store = ConfigStore::load(Box::new(mem.clone()));

        store.set_solid_state(true).unwrap();
        store.set_spreadsheet_interval_min(42).unwrap();
        store.set_mqtt_interval_sec(77).unwrap();
        store.set_mysql_interval_sec(1234).unwrap();

        let reloaded = ConfigStore::load(Box::new(mem));
        assert!(reloaded.config().solid_state);
        assert_eq!(reloaded.config().spreadsheet_interval_min, 42);
        assert_eq!(reloaded.config().mqtt_interval_sec, 77);
        assert_eq!(reloaded.config().mysql_interval_sec, 1234);
    }

    #[test]
    fn set_then_load_round_trips_strings() {
        let mem = MemStorage::erased();
        let mut store = ConfigStore::load(Box::new(mem.clone()));

        store.set_broker_host("broker.example.com").unwrap();
        store.set_user("node7").unwrap();
        store.set_pass("hunter2").unwrap();
        store.set_topic_prefix("farm/north").unwrap();

        let reloaded = ConfigStore::load(Box::new(mem));
        assert_eq!(reloaded.config().broker_host, "broker.example.com");
        assert_eq!(reloaded.config().user, "node7");
        assert_eq!(reloaded.config().pass, "hunter2");
        assert_eq!(reloaded.config().topic_prefix, "farm/north");
    }

    #[test]
    fn shorter_string_overwrite_round_trips() {
        let mem = MemStorage::erased();
        let mut store = ConfigStore::load(Box::new(mem.clone()));
        store.set_broker_host("a-long-broker-hostname.example.com").unwrap();
        store.set_broker_host("short").unwrap();

        // Old tail bytes past the NUL must not leak back in.
        let reloaded = ConfigStore::load(Box::new(mem));
        assert_eq!(reloaded.config().broker_host, "short");
    }

    #[test]
    fn corrupt_string_bytes_dropped_on_load() {
        let mem = MemStorage::erased();
        {
            let mut img = mem.image.lock().unwrap();
            let field = [b'n', 0xC3, b'o', 0x07, b'd', b'e', 0x00];
            img[OFF_USER..OFF_USER + field.len()].copy_from_slice(&field);
        }

        let store = ConfigStore::load(Box::new(mem));
        assert_eq!(store.config().user, "node");
    }

    // -- Validation --------------------------------------------------------

    #[test]
    fn spreadsheet_interval_over_100_rejected() {
        let mem = MemStorage::erased();
        let mut store = ConfigStore::load(Box::new(mem.clone()));
        let before = mem.write_count();

        let err = store.set_spreadsheet_interval_min(101).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { value: 101, .. }));
        assert_eq!(store.config().spreadsheet_interval_min, DEFAULT_SPREADSHEET_MIN);
        assert_eq!(mem.write_count(), before, "failed set must not write");
    }

    #[test]
    fn mqtt_interval_boundary_accepted() {
        let mut store = ConfigStore::load(Box::new(MemStorage::erased()));
        store.set_mqtt_interval_sec(MQTT_INTERVAL_MAX_SEC).unwrap();
        assert_eq!(store.config().mqtt_interval_sec, 120);
    }

    #[test]
    fn mqtt_interval_over_120_rejected() {
        let mut store = ConfigStore::load(Box::new(MemStorage::erased()));
        assert!(store.set_mqtt_interval_sec(121).is_err());
        assert_eq!(store.config().mqtt_interval_sec, DEFAULT_MQTT_SEC);
    }

    #[test]
    fn mysql_interval_max_storable_value_round_trips() {
        let mem = MemStorage::erased();
        let mut store = ConfigStore::load(Box::new(mem.clone()));
        store.set_mysql_interval_sec(MYSQL_INTERVAL_MAX_SEC).unwrap();

        let reloaded = ConfigStore::load(Box::new(mem));
        assert_eq!(reloaded.config().mysql_interval_sec, 65_534);
    }

    #[test]
    fn mysql_interval_sentinel_value_rejected() {
        let mem = MemStorage::erased();
        let mut store = ConfigStore::load(Box::new(mem.clone()));
        let before = mem.write_count();

        // 0xFFFF would read back as "erased" and heal to the default.
        let err = store.set_mysql_interval_sec(u16::MAX).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { value: 65_535, .. }));
        assert_eq!(store.config().mysql_interval_sec, DEFAULT_MYSQL_SEC);
        assert_eq!(mem.write_count(), before, "failed set must not write");
    }

    #[test]
    fn overlong_broker_host_rejected() {
        let mut store = ConfigStore::load(Box::new(MemStorage::erased()));
        let long = "h".repeat(LEN_BROKER_HOST);
        let err = store.set_broker_host(&long).unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { .. }));
        assert_eq!(store.config().broker_host, DEFAULT_BROKER_HOST);
    }

    #[test]
    fn non_ascii_topic_prefix_rejected() {
        let mut store = ConfigStore::load(Box::new(MemStorage::erased()));
        assert!(matches!(
            store.set_topic_prefix("férme").unwrap_err(),
            ValidationError::NotAscii { .. }
        ));
    }

    // -- Degraded mode -----------------------------------------------------

    #[test]
    fn degraded_store_serves_defaults_and_accepts_sets() {
        let mut store = ConfigStore::degraded();
        assert!(store.is_degraded());
        assert_eq!(*store.config(), Config::default());

        // Set succeeds in memory; persistence is silently skipped.
        store.set_mqtt_interval_sec(60).unwrap();
        assert_eq!(store.config().mqtt_interval_sec, 60);
    }

    #[test]
    fn degraded_store_still_validates() {
        let mut store = ConfigStore::degraded();
        assert!(store.set_spreadsheet_interval_min(200).is_err());
    }

    // -- File backend ------------------------------------------------------

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");

        {
            let mut store = ConfigStore::open(&path);
            assert!(!store.is_degraded());
            store.set_mqtt_interval_sec(15).unwrap();
            store.set_topic_prefix("greenhouse").unwrap();
        }

        let reopened = ConfigStore::open(&path);
        assert_eq!(reopened.config().mqtt_interval_sec, 15);
        assert_eq!(reopened.config().topic_prefix, "greenhouse");
    }

    #[test]
    fn fresh_file_reads_as_factory_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(&dir.path().join("new.bin"));
        assert_eq!(*store.config(), Config::default());
    }

    #[test]
    fn unopenable_path_enters_degraded_mode() {
        let store = ConfigStore::open(Path::new("/nonexistent-dir/config.bin"));
        assert!(store.is_degraded());
        assert_eq!(*store.config(), Config::default());
    }
}
