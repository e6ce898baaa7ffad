//! Durable per-key phase records
//!
//! Records live in memory and reach disk only on `flush`. The file format is
//! one `key="phase timestamp"` line per record, safe to edit by hand:
//!
//! ```text
//! web-1="bootstrapped 2026-10-19T09:12:44Z"
//! web-1:dev="synced 2026-10-19T09:20:03Z"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::phase::{Phase, PhaseKey, PhaseRecord};

/// Phase store errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl StoreError {
    fn io(path: &Path, err: &std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Repository of last completed phase per `host` / `host:env`
///
/// Last write wins per key; setting the phase a key already holds changes
/// nothing, timestamp included.
pub trait PhaseStateStore: Send + Sync {
    fn get(&self, key: &PhaseKey) -> Option<PhaseRecord>;

    /// Record `phase` for `key` and return the stored record
    fn set(&mut self, key: &PhaseKey, phase: Phase) -> PhaseRecord;

    /// Forget `key`; returns whether it existed
    fn reset(&mut self, key: &PhaseKey) -> bool;

    /// All records, ordered by key
    fn records(&self) -> Vec<(PhaseKey, PhaseRecord)>;

    /// Make pending writes durable
    ///
    /// # Errors
    /// Returns `StoreError` if the backing storage cannot be written
    fn flush(&mut self) -> Result<(), StoreError>;
}

fn set_in(
    map: &mut BTreeMap<PhaseKey, PhaseRecord>,
    key: &PhaseKey,
    phase: Phase,
) -> (PhaseRecord, bool) {
    if let Some(existing) = map.get(key)
        && existing.phase == phase
    {
        return (*existing, false);
    }
    let record = PhaseRecord {
        phase,
        timestamp: Utc::now(),
    };
    map.insert(key.clone(), record);
    (record, true)
}

/// In-memory store; `flush` is a no-op
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: BTreeMap<PhaseKey, PhaseRecord>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PhaseStateStore for MemoryStateStore {
    fn get(&self, key: &PhaseKey) -> Option<PhaseRecord> {
        self.records.get(key).copied()
    }

    fn set(&mut self, key: &PhaseKey, phase: Phase) -> PhaseRecord {
        set_in(&mut self.records, key, phase).0
    }

    fn reset(&mut self, key: &PhaseKey) -> bool {
        self.records.remove(key).is_some()
    }

    fn records(&self) -> Vec<(PhaseKey, PhaseRecord)> {
        self.records.iter().map(|(k, r)| (k.clone(), *r)).collect()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// File-backed store, one file per context
///
/// `flush` re-reads the file, overlays only the keys written through this
/// instance, and replaces the file atomically, so writers on other keys are
/// never clobbered and readers never see a half-written file.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    cache: BTreeMap<PhaseKey, PhaseRecord>,
    /// Pending writes; `None` means reset
    dirty: BTreeMap<PhaseKey, Option<PhaseRecord>>,
}

impl FileStateStore {
    /// Open (or start) the store at `path`
    ///
    /// # Errors
    /// Returns `StoreError` if the file exists but cannot be read
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let cache = read_records(&path)?;
        debug!(path = %path.display(), records = cache.len(), "opened phase store");
        Ok(Self {
            path,
            cache,
            dirty: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PhaseStateStore for FileStateStore {
    fn get(&self, key: &PhaseKey) -> Option<PhaseRecord> {
        self.cache.get(key).copied()
    }

    fn set(&mut self, key: &PhaseKey, phase: Phase) -> PhaseRecord {
        let (record, changed) = set_in(&mut self.cache, key, phase);
        if changed {
            self.dirty.insert(key.clone(), Some(record));
        }
        record
    }

    fn reset(&mut self, key: &PhaseKey) -> bool {
        let existed = self.cache.remove(key).is_some();
        self.dirty.insert(key.clone(), None);
        existed
    }

    fn records(&self) -> Vec<(PhaseKey, PhaseRecord)> {
        self.cache.iter().map(|(k, r)| (k.clone(), *r)).collect()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if self.dirty.is_empty() {
            return Ok(());
        }

        let mut merged = read_records(&self.path)?;
        for (key, pending) in &self.dirty {
            match pending {
                Some(record) => {
                    merged.insert(key.clone(), *record);
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, &e))?;
        }

        let tmp = self
            .path
            .with_extension(format!("tmp.{}", std::process::id()));
        fs::write(&tmp, render_records(&merged)).map_err(|e| StoreError::io(&tmp, &e))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, &e))?;

        debug!(path = %self.path.display(), written = self.dirty.len(), "flushed phase store");
        self.dirty.clear();
        self.cache = merged;
        Ok(())
    }
}

fn read_records(path: &Path) -> Result<BTreeMap<PhaseKey, PhaseRecord>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_records(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(StoreError::io(path, &e)),
    }
}

fn parse_records(content: &str) -> BTreeMap<PhaseKey, PhaseRecord> {
    let mut records = BTreeMap::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok((key, record)) => {
                records.insert(key, record);
            }
            Err(reason) => warn!(line = n + 1, reason = %reason, "skipping phase record"),
        }
    }
    records
}

fn parse_line(line: &str) -> Result<(PhaseKey, PhaseRecord), String> {
    let (key, value) = line.split_once('=').ok_or("missing '='")?;
    let key: PhaseKey = key.parse()?;
    let value = value.trim().trim_matches('"');

    let mut parts = value.split_whitespace();
    let phase: Phase = parts.next().ok_or("missing phase")?.parse()?;
    // Hand-written records may omit the timestamp
    let timestamp = match parts.next() {
        Some(ts) => DateTime::parse_from_rfc3339(ts)
            .map_err(|e| format!("bad timestamp {ts}: {e}"))?
            .with_timezone(&Utc),
        None => DateTime::<Utc>::UNIX_EPOCH,
    };
    Ok((key, PhaseRecord { phase, timestamp }))
}

fn render_records(records: &BTreeMap<PhaseKey, PhaseRecord>) -> String {
    let mut out = String::from("# provision phase records: key=\"phase timestamp\"\n");
    for (key, record) in records {
        out.push_str(&format!(
            "{key}=\"{} {}\"\n",
            record.phase,
            record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_same_phase_is_noop() {
        let mut store = MemoryStateStore::new();
        let key = PhaseKey::host("web-1");

        let first = store.set(&key, Phase::Bootstrapped);
        let second = store.set(&key, Phase::Bootstrapped);
        assert_eq!(first, second);

        store.set(&key, Phase::Created);
        assert_eq!(store.get(&key).unwrap().phase, Phase::Created);
        assert!(store.reset(&key));
        assert!(!store.reset(&key));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn test_parse_tolerates_hand_edits() {
        let records = parse_records(
            "# comment\n\
             web-1=\"bootstrapped 2026-10-19T09:12:44Z\"\n\
             \n\
             web-1:dev=synced\n\
             garbage line\n\
             web-2=\"exploded 2026-10-19T09:12:44Z\"\n",
        );

        assert_eq!(records.len(), 2);
        assert_eq!(
            records[&PhaseKey::host("web-1")].phase,
            Phase::Bootstrapped
        );
        let dev = records[&PhaseKey::env("web-1", "dev")];
        assert_eq!(dev.phase, Phase::Synced);
        assert_eq!(dev.timestamp, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_file_store_roundtrip_and_flush_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("default.env");

        let mut a = FileStateStore::open(&path).unwrap();
        a.set(&PhaseKey::host("web-1"), Phase::Bootstrapped);
        a.flush().unwrap();

        // A second writer on a different key, opened before `a` writes again
        let mut b = FileStateStore::open(&path).unwrap();
        a.set(&PhaseKey::env("web-1", "dev"), Phase::SourceChecked);
        a.flush().unwrap();
        b.set(&PhaseKey::host("web-2"), Phase::Created);
        b.flush().unwrap();

        let reopened = FileStateStore::open(&path).unwrap();
        let keys: Vec<String> = reopened
            .records()
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["web-1", "web-1:dev", "web-2"]);
    }

    #[test]
    fn test_ipv6_host_survives_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.env");
        let host = PhaseKey::host("2001:db8::7");
        let dev = PhaseKey::env("2001:db8::7", "dev");

        let mut store = FileStateStore::open(&path).unwrap();
        store.set(&host, Phase::Bootstrapped);
        store.set(&dev, Phase::SourceChecked);
        store.flush().unwrap();

        assert_eq!(store.get(&host).unwrap().phase, Phase::Bootstrapped);
        assert_eq!(store.get(&dev).unwrap().phase, Phase::SourceChecked);

        let reopened = FileStateStore::open(&path).unwrap();
        assert_eq!(reopened.get(&host).unwrap().phase, Phase::Bootstrapped);
        assert_eq!(reopened.records().len(), 2);
    }

    #[test]
    fn test_unflushed_writes_stay_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.env");

        let mut store = FileStateStore::open(&path).unwrap();
        store.set(&PhaseKey::host("web-1"), Phase::Created);
        assert!(store.get(&PhaseKey::host("web-1")).is_some());
        assert!(!path.exists());

        store.reset(&PhaseKey::host("web-1"));
        store.flush().unwrap();
        assert!(FileStateStore::open(&path).unwrap().records().is_empty());
    }
}
