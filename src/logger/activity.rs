//! Activity logger: a dedicated thread owns the [`JsonlWriter`].
//!
//! Engine components send [`ActivityEvent`]s through a bounded crossbeam
//! channel. `try_send()` keeps classification and actuation from ever
//! blocking on logging back-pressure; overflow is counted and reported as a
//! warning line once the thread catches up.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, SbinError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 256;

/// Attempt to climb back to the primary log path every this many events.
const RECOVER_EVERY: u64 = 64;

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    EngineStarted {
        version: String,
        config_hash: String,
        link_mode: String,
    },
    EngineStopped {
        reason: String,
        uptime_secs: u64,
    },
    ItemSorted {
        item: String,
        bin: String,
        confidence: f64,
        source: String,
        fill_level: f64,
        item_count: i64,
        actuation: String,
    },
    ItemUnresolved {
        item: String,
        confidence: f64,
    },
    ItemTaught {
        item: String,
        bin: String,
    },
    BinEmptied {
        bin: String,
    },
    LinkConnected {
        port: String,
        baud_rate: u32,
    },
    LinkSimulated {
        port: String,
        reason: String,
    },
    SendDegraded {
        bin: String,
        reason: String,
    },
    SortTimedOut {
        item: String,
        bin: String,
        after_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable handle for sending activity events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle whose events go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Non-blocking send; a full channel drops the event and counts it.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is expected for disabled handles and during shutdown.
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only until queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Spawn the logger thread.
pub fn spawn_logger(
    jsonl_config: JsonlConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    spawn_logger_with_capacity(jsonl_config, CHANNEL_CAPACITY)
}

pub fn spawn_logger_with_capacity(
    jsonl_config: JsonlConfig,
    channel_capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("smartbin-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl_config, &dropped))
        .map_err(|e| SbinError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);
    let mut seen: u64 = 0;

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} activity events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        seen += 1;
        if seen % RECOVER_EVERY == 0 {
            jsonl.try_recover();
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::EngineStarted {
            version,
            config_hash,
            link_mode,
        } => {
            let mut e = LogEntry::new(EventType::EngineStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} link={link_mode}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::EngineStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::EngineStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ItemSorted {
            item,
            bin,
            confidence,
            source,
            fill_level,
            item_count,
            actuation,
        } => {
            let mut e = LogEntry::new(EventType::ItemSorted, Severity::Info);
            e.item = Some(item.clone());
            e.bin = Some(bin.clone());
            e.confidence = Some(*confidence);
            e.source = Some(source.clone());
            e.fill_level = Some(*fill_level);
            e.item_count = Some(*item_count);
            e.actuation = Some(actuation.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::ItemUnresolved { item, confidence } => {
            let mut e = LogEntry::new(EventType::ItemUnresolved, Severity::Info);
            e.item = Some(item.clone());
            e.confidence = Some(*confidence);
            e.ok = Some(false);
            e
        }
        ActivityEvent::ItemTaught { item, bin } => {
            let mut e = LogEntry::new(EventType::ItemTaught, Severity::Info);
            e.item = Some(item.clone());
            e.bin = Some(bin.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::BinEmptied { bin } => {
            let mut e = LogEntry::new(EventType::BinEmptied, Severity::Info);
            e.bin = Some(bin.clone());
            e.fill_level = Some(0.0);
            e.item_count = Some(0);
            e.ok = Some(true);
            e
        }
        ActivityEvent::LinkConnected { port, baud_rate } => {
            let mut e = LogEntry::new(EventType::LinkConnected, Severity::Info);
            e.port = Some(port.clone());
            e.details = Some(format!("baud_rate={baud_rate}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::LinkSimulated { port, reason } => {
            let mut e = LogEntry::new(EventType::LinkSimulated, Severity::Warning);
            e.port = Some(port.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::SendDegraded { bin, reason } => {
            let mut e = LogEntry::new(EventType::SendDegraded, Severity::Warning);
            e.bin = Some(bin.clone());
            e.details = Some(reason.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::SortTimedOut {
            item,
            bin,
            after_ms,
        } => {
            let mut e = LogEntry::new(EventType::SortTimedOut, Severity::Warning);
            e.item = Some(item.clone());
            e.bin = Some(bin.clone());
            e.duration_ms = Some(*after_ms);
            e.ok = Some(false);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::EngineStop, Severity::Info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jsonl(dir: &std::path::Path) -> JsonlConfig {
        JsonlConfig {
            path: dir.join("activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    fn lines(dir: &std::path::Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(dir.join("activity.jsonl"))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(jsonl(dir.path())).unwrap();
        handle.send(ActivityEvent::EngineStarted {
            version: "0.3.0".to_string(),
            config_hash: "abc".to_string(),
            link_mode: "simulated".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let entries = lines(dir.path());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["event"], "engine_start");
    }

    #[test]
    fn sorted_event_carries_detection_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(jsonl(dir.path())).unwrap();
        handle.send(ActivityEvent::ItemSorted {
            item: "plastic_bottle".to_string(),
            bin: "yellow".to_string(),
            confidence: 0.92,
            source: "static_default".to_string(),
            fill_level: 0.5,
            item_count: 1,
            actuation: "simulated".to_string(),
        });
        handle.send(ActivityEvent::ItemUnresolved {
            item: "mystery_object".to_string(),
            confidence: 0.4,
        });
        handle.shutdown();
        join.join().unwrap();

        let entries = lines(dir.path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["event"], "item_sorted");
        assert_eq!(entries[0]["bin"], "yellow");
        assert_eq!(entries[0]["item_count"], 1);
        assert_eq!(entries[1]["event"], "item_unresolved");
        assert!(entries[1].get("bin").is_none());
    }

    #[test]
    fn handles_cloneable_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(jsonl(dir.path())).unwrap();
        let h2 = handle.clone();
        std::thread::spawn(move || {
            h2.send(ActivityEvent::BinEmptied {
                bin: "green".to_string(),
            });
        })
        .join()
        .unwrap();
        handle.send(ActivityEvent::Error {
            code: "SBIN-2101".to_string(),
            message: "disk full".to_string(),
        });
        handle.shutdown();
        join.join().unwrap();

        let entries = lines(dir.path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["error_code"], "SBIN-2101");
    }

    #[test]
    fn disabled_handle_swallows_events() {
        let handle = ActivityLoggerHandle::disabled();
        handle.send(ActivityEvent::BinEmptied {
            bin: "brown".to_string(),
        });
        handle.shutdown();
        assert_eq!(handle.dropped_events(), 0);
    }
}
