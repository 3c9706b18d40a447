//! SQLite store: learned classifications, per-bin fill state and the
//! append-only detection log.
//!
//! Every write is committed before the call returns (`synchronous = FULL`).
//! Multi-statement operations run inside a single immediate transaction so a
//! failure part-way through leaves no partial state behind.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;

use crate::core::bins::{BinCatalog, BinColor, normalize_name};
use crate::core::config::BinsConfig;
use crate::core::errors::{Result, SbinError};

/// Durable owner of the three engine tables.
///
/// Lifecycle: [`Store::new`] → [`Store::initialize`] → data operations →
/// [`Store::shutdown`]. Data operations on a closed store fail with a
/// storage error instead of panicking.
pub struct Store {
    path: PathBuf,
    catalog: BinCatalog,
    bins: BinsConfig,
    conn: Option<Connection>,
}

impl Store {
    /// Prepare a store for `path`. Nothing is opened until [`Store::initialize`].
    pub fn new(path: &Path, bins: &BinsConfig) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            catalog: bins.catalog()?,
            bins: bins.clone(),
            conn: None,
        })
    }

    /// [`Store::new`] followed by [`Store::initialize`].
    pub fn open(path: &Path, bins: &BinsConfig) -> Result<Self> {
        let mut store = Self::new(path, bins)?;
        store.initialize()?;
        Ok(store)
    }

    /// Open (or create) the database, apply schema and seed bin rows.
    ///
    /// Safe to call repeatedly: the schema uses `IF NOT EXISTS` and seeding
    /// never touches the fill state of an existing row.
    pub fn initialize(&mut self) -> Result<()> {
        if self.conn.is_none() {
            if let Some(parent) = self.path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|source| SbinError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let conn = Connection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            apply_pragmas(&conn)?;
            self.conn = Some(conn);
        }

        let now = now_rfc3339();
        let seeds: Vec<(String, f64)> = self
            .catalog
            .colors()
            .iter()
            .map(|color| (color.to_string(), self.bins.capacity_for(color.as_str())))
            .collect();
        let conn = self.conn_mut()?;
        apply_schema(conn)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut seed = tx.prepare_cached(
                "INSERT INTO bin_state (bin_color, fill_level, item_count, last_emptied, capacity_liters)
                 VALUES (?1, 0, 0, ?2, ?3)
                 ON CONFLICT(bin_color) DO UPDATE SET capacity_liters = excluded.capacity_liters",
            )?;
            for (color, capacity) in &seeds {
                seed.execute(params![color, now, capacity])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Close the database handle. The store can be re-opened with
    /// [`Store::initialize`].
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take()
            && let Err((_conn, err)) = conn.close()
        {
            return Err(SbinError::storage("close", err.to_string()));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The bins this store was configured with.
    pub fn catalog(&self) -> &BinCatalog {
        &self.catalog
    }

    // ──────────────────── waste_classification ────────────────────

    /// Learned bin for an item, matched on the normalized name.
    ///
    /// A learned mapping that points at a bin no longer configured is
    /// reported as absent so the caller can re-learn it.
    pub fn lookup_bin(&self, item_name: &str) -> Result<Option<BinColor>> {
        let name = normalize_name(item_name);
        if name.is_empty() {
            return Ok(None);
        }
        let stored: Option<String> = self
            .conn()?
            .prepare_cached("SELECT bin_color FROM waste_classification WHERE item_name = ?1")?
            .query_row(params![name], |row| row.get(0))
            .optional()?;
        Ok(stored.and_then(|color| {
            if self.catalog.contains(&color) {
                Some(BinColor::from_trusted(color))
            } else {
                eprintln!(
                    "[SBIN-STORE] ignoring learned mapping {name:?} -> {color:?}: bin no longer configured"
                );
                None
            }
        }))
    }

    /// Insert a mapping with `usage_count = 1`, or overwrite the bin and bump
    /// the count of an existing one.
    pub fn upsert_classification(
        &self,
        item_name: &str,
        bin_color: &str,
    ) -> Result<ClassificationEntry> {
        let bin = self.catalog.parse(bin_color)?;
        let name = require_item_name(item_name)?;
        let conn = self.conn()?;
        conn.prepare_cached(
            "INSERT INTO waste_classification (item_name, bin_color, created_at, usage_count)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(item_name) DO UPDATE SET
                 bin_color = excluded.bin_color,
                 usage_count = usage_count + 1",
        )?
        .execute(params![name, bin.as_str(), now_rfc3339()])?;
        self.classification(&name)?
            .ok_or_else(|| SbinError::storage("upsert_classification", "row vanished after upsert"))
    }

    /// Bump `usage_count` of an existing mapping. Returns `false` (and writes
    /// nothing) when the item is unknown.
    pub fn increment_usage(&self, item_name: &str) -> Result<bool> {
        let name = normalize_name(item_name);
        let updated = self
            .conn()?
            .prepare_cached(
                "UPDATE waste_classification SET usage_count = usage_count + 1 WHERE item_name = ?1",
            )?
            .execute(params![name])?;
        Ok(updated > 0)
    }

    /// Learn `bin_color` for an item unless a mapping already exists, in
    /// which case only its usage is counted. Returns the bin now on record
    /// and whether it was already there.
    ///
    /// Check and write share one transaction, so a mapping taught by
    /// another caller in the meantime is never overwritten.
    pub fn adopt_classification(
        &mut self,
        item_name: &str,
        bin_color: &str,
    ) -> Result<(BinColor, bool)> {
        let proposed = self.catalog.parse(bin_color)?;
        let name = require_item_name(item_name)?;
        let catalog = self.catalog.clone();
        let tx = self
            .conn_mut()?
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let learned = learn_mapping(&tx, &catalog, &name, proposed, false)?;
        tx.commit()?;
        Ok(learned)
    }

    /// Full mapping row for one item.
    pub fn classification(&self, item_name: &str) -> Result<Option<ClassificationEntry>> {
        let name = normalize_name(item_name);
        let entry = self
            .conn()?
            .prepare_cached(
                "SELECT item_name, bin_color, created_at, usage_count
                 FROM waste_classification WHERE item_name = ?1",
            )?
            .query_row(params![name], |row| {
                Ok(ClassificationEntry {
                    item_name: row.get(0)?,
                    bin_color: BinColor::from_trusted(row.get::<_, String>(1)?),
                    created_at: row.get(2)?,
                    usage_count: row.get(3)?,
                })
            })
            .optional()?;
        Ok(entry)
    }

    /// `(item, bin, usage_count)` for every learned item, most used first.
    pub fn get_usage_stats(&self) -> Result<Vec<UsageStat>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT item_name, bin_color, usage_count FROM waste_classification
             ORDER BY usage_count DESC, item_name ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UsageStat {
                    item_name: row.get(0)?,
                    bin_color: BinColor::from_trusted(row.get::<_, String>(1)?),
                    usage_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ──────────────────── detection_log + bin_state ────────────────────

    /// Append a detection and account for it in the bin's fill state.
    ///
    /// The log insert and the bin update share one transaction: both are
    /// visible afterwards or neither is.
    pub fn record_detection(
        &mut self,
        bin_color: &str,
        item_name: &str,
        confidence: f64,
    ) -> Result<DetectionRecord> {
        let bin = self.catalog.parse(bin_color)?;
        let name = require_item_name(item_name)?;
        validate_confidence(&name, confidence)?;
        let increment = self.bins.fill_increment;
        let timestamp = now_rfc3339();

        let tx = self
            .conn_mut()?
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_detection(&tx, &bin, &name, &timestamp, confidence, increment)?;
        tx.commit()?;

        Ok(DetectionRecord {
            bin_color: bin,
            item_name: name,
            timestamp,
            confidence,
        })
    }

    /// Learn the mapping for a classified item and record its detection in
    /// one transaction.
    ///
    /// With `overwrite` unset an existing mapping wins over `bin_color` and
    /// only its usage is counted; with it set (an operator answer) the
    /// mapping is replaced. A failure anywhere leaves the mapping, the
    /// detection log and the bin untouched.
    pub fn record_classified(
        &mut self,
        item_name: &str,
        bin_color: &str,
        overwrite: bool,
        confidence: f64,
    ) -> Result<ClassifiedDetection> {
        let proposed = self.catalog.parse(bin_color)?;
        let name = require_item_name(item_name)?;
        validate_confidence(&name, confidence)?;
        let catalog = self.catalog.clone();
        let increment = self.bins.fill_increment;
        let timestamp = now_rfc3339();

        let tx = self
            .conn_mut()?
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (bin, was_learned) = learn_mapping(&tx, &catalog, &name, proposed, overwrite)?;
        insert_detection(&tx, &bin, &name, &timestamp, confidence, increment)?;
        tx.commit()?;

        Ok(ClassifiedDetection {
            detection: DetectionRecord {
                bin_color: bin,
                item_name: name,
                timestamp,
                confidence,
            },
            was_learned,
        })
    }

    /// Fill state of every configured bin, sorted by bin identifier.
    pub fn get_bin_states(&self) -> Result<Vec<BinState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT bin_color, fill_level, item_count, last_emptied, capacity_liters
             FROM bin_state ORDER BY bin_color ASC",
        )?;
        let rows = stmt
            .query_map([], map_bin_state)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter(|state| self.catalog.contains(state.bin_color.as_str()))
            .collect())
    }

    /// Fill state of one bin.
    pub fn bin_state(&self, bin_color: &str) -> Result<Option<BinState>> {
        let color = normalize_name(bin_color);
        let state = self
            .conn()?
            .prepare_cached(
                "SELECT bin_color, fill_level, item_count, last_emptied, capacity_liters
                 FROM bin_state WHERE bin_color = ?1",
            )?
            .query_row(params![color], map_bin_state)
            .optional()?;
        Ok(state)
    }

    /// Reset a bin to empty and stamp `last_emptied`.
    pub fn empty_bin(&self, bin_color: &str) -> Result<BinState> {
        let color = normalize_name(bin_color);
        if !self.catalog.contains(&color) {
            return Err(SbinError::BinNotFound {
                color: bin_color.to_string(),
            });
        }
        let updated = self
            .conn()?
            .prepare_cached(
                "UPDATE bin_state SET fill_level = 0, item_count = 0, last_emptied = ?2
                 WHERE bin_color = ?1",
            )?
            .execute(params![color, now_rfc3339()])?;
        if updated == 0 {
            return Err(SbinError::BinNotFound { color });
        }
        self.bin_state(&color)?
            .ok_or(SbinError::BinNotFound { color })
    }

    /// Most recent detections first, at most `limit` rows.
    pub fn get_history(&self, limit: u32) -> Result<Vec<DetectionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT bin_color, item_name, timestamp, confidence FROM detection_log
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(DetectionRecord {
                    bin_color: BinColor::from_trusted(row.get::<_, String>(0)?),
                    item_name: row.get(1)?,
                    timestamp: row.get(2)?,
                    confidence: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of rows in the detection log.
    pub fn detection_count(&self) -> Result<i64> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM detection_log", [], |row| row.get(0))?;
        Ok(count)
    }

    // ──────────────────── internals ────────────────────

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| SbinError::storage("store closed", self.path.display().to_string()))
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        let path = self.path.display().to_string();
        self.conn
            .as_mut()
            .ok_or_else(|| SbinError::storage("store closed", path))
    }
}

// ──────────────────── row types ────────────────────

/// Row of `waste_classification`: a learned item → bin association.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationEntry {
    pub item_name: String,
    pub bin_color: BinColor,
    pub created_at: String,
    pub usage_count: i64,
}

/// Row of `bin_state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinState {
    pub bin_color: BinColor,
    pub fill_level: f64,
    pub item_count: i64,
    pub last_emptied: String,
    pub capacity_liters: f64,
}

/// Row of `detection_log`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub bin_color: BinColor,
    pub item_name: String,
    pub timestamp: String,
    pub confidence: f64,
}

/// Detection recorded by [`Store::record_classified`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedDetection {
    pub detection: DetectionRecord,
    /// The bin came from a mapping already on record.
    pub was_learned: bool,
}

/// Learning statistics for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStat {
    pub item_name: String,
    pub bin_color: BinColor,
    pub usage_count: i64,
}

fn map_bin_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<BinState> {
    Ok(BinState {
        bin_color: BinColor::from_trusted(row.get::<_, String>(0)?),
        fill_level: row.get(1)?,
        item_count: row.get(2)?,
        last_emptied: row.get(3)?,
        capacity_liters: row.get(4)?,
    })
}

// ──────────────────── transaction steps ────────────────────

/// Keep a configured mapping already on record (counting its use) or store
/// `proposed`. Mappings to bins no longer configured are replaced.
fn learn_mapping(
    conn: &Connection,
    catalog: &BinCatalog,
    name: &str,
    proposed: BinColor,
    overwrite: bool,
) -> Result<(BinColor, bool)> {
    let stored: Option<String> = conn
        .prepare_cached("SELECT bin_color FROM waste_classification WHERE item_name = ?1")?
        .query_row(params![name], |row| row.get(0))
        .optional()?;
    let existing = stored.filter(|color| catalog.contains(color));

    if let Some(color) = existing
        && !overwrite
    {
        conn.prepare_cached(
            "UPDATE waste_classification SET usage_count = usage_count + 1 WHERE item_name = ?1",
        )?
        .execute(params![name])?;
        return Ok((BinColor::from_trusted(color), true));
    }

    conn.prepare_cached(
        "INSERT INTO waste_classification (item_name, bin_color, created_at, usage_count)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT(item_name) DO UPDATE SET
             bin_color = excluded.bin_color,
             usage_count = usage_count + 1",
    )?
    .execute(params![name, proposed.as_str(), now_rfc3339()])?;
    Ok((proposed, false))
}

/// Append to the detection log and bump the bin. Fails with `BinNotFound`
/// when the bin row is missing; the caller's transaction then rolls back.
fn insert_detection(
    conn: &Connection,
    bin: &BinColor,
    name: &str,
    timestamp: &str,
    confidence: f64,
    increment: f64,
) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO detection_log (bin_color, item_name, timestamp, confidence)
         VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(params![bin.as_str(), name, timestamp, confidence])?;
    let updated = conn
        .prepare_cached(
            "UPDATE bin_state SET item_count = item_count + 1, fill_level = fill_level + ?2
             WHERE bin_color = ?1",
        )?
        .execute(params![bin.as_str(), increment])?;
    if updated == 0 {
        return Err(SbinError::BinNotFound {
            color: bin.to_string(),
        });
    }
    Ok(())
}

// ──────────────────── validation helpers ────────────────────

/// Normalize an item name, rejecting blank input.
pub(crate) fn require_item_name(raw: &str) -> Result<String> {
    let name = normalize_name(raw);
    if name.is_empty() {
        return Err(SbinError::InvalidDetection {
            item: raw.to_string(),
            details: "item name is empty".to_string(),
        });
    }
    Ok(name)
}

pub(crate) fn validate_confidence(item: &str, confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(SbinError::InvalidDetection {
            item: item.to_string(),
            details: format!("confidence must be in [0,1], got {confidence}"),
        });
    }
    Ok(())
}

/// Current UTC time as RFC 3339 with millisecond precision.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA busy_timeout = 5000;
         PRAGMA temp_store = MEMORY;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[SBIN-STORE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS waste_classification (
            item_name TEXT PRIMARY KEY,
            bin_color TEXT NOT NULL,
            created_at TEXT NOT NULL,
            usage_count INTEGER NOT NULL DEFAULT 1 CHECK (usage_count >= 1)
        );

        CREATE TABLE IF NOT EXISTS bin_state (
            bin_color TEXT PRIMARY KEY,
            fill_level REAL NOT NULL DEFAULT 0 CHECK (fill_level >= 0),
            item_count INTEGER NOT NULL DEFAULT 0 CHECK (item_count >= 0),
            last_emptied TEXT NOT NULL,
            capacity_liters REAL NOT NULL CHECK (capacity_liters > 0)
        );

        CREATE TABLE IF NOT EXISTS detection_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bin_color TEXT NOT NULL,
            item_name TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0 AND confidence <= 1)
        );

        CREATE INDEX IF NOT EXISTS idx_detection_timestamp ON detection_log(timestamp);
        CREATE INDEX IF NOT EXISTS idx_classification_usage
            ON waste_classification(usage_count);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
