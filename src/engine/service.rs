//! Sorting engine: owns the store, resolver, tracker, actuator dispatcher and
//! activity logger, and exposes the operations collaborators call.
//!
//! Classification takes the store lock twice: once to look the item up and
//! once to learn and record it in a single transaction. An operator prompt,
//! if any, runs in between without the lock, and the physical sort runs
//! after the detection is committed. A sort that fails or times out never rolls the detection back.

#![allow(missing_docs)]

use std::fmt;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::actuator::dispatch::{ActuationStatus, SortDispatcher};
use crate::actuator::link::{ActuatorLink, LinkState};
use crate::actuator::serial::PortOpener;
use crate::bins::tracker::{BinStatus, BinTracker};
use crate::classify::prompt::BinPrompter;
use crate::classify::resolver::{Resolution, ResolutionSource, ResolveMode, Resolver};
use crate::core::bins::{BinCatalog, BinColor};
use crate::core::config::Config;
use crate::core::errors::{Result, SbinError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
use crate::logger::jsonl::JsonlConfig;
use crate::store::sqlite::{require_item_name, validate_confidence};
use crate::store::{ClassificationEntry, DetectionRecord, Store, UsageStat};

/// Result of classifying one detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClassifyOutcome {
    Sorted {
        item_name: String,
        bin: BinColor,
        source: ResolutionSource,
        detection: DetectionRecord,
        bin_status: BinStatus,
        actuation: ActuationStatus,
    },
    Unresolved {
        item_name: String,
        confidence: f64,
    },
}

impl ClassifyOutcome {
    pub fn bin(&self) -> Option<&BinColor> {
        match self {
            Self::Sorted { bin, .. } => Some(bin),
            Self::Unresolved { .. } => None,
        }
    }
}

pub struct SortingEngine {
    config: Config,
    store: Mutex<Store>,
    resolver: Resolver,
    tracker: BinTracker,
    dispatcher: Option<SortDispatcher>,
    events: ActivityLoggerHandle,
    logger_join: Option<JoinHandle<()>>,
    start_time: Instant,
    stopped: bool,
}

impl fmt::Debug for SortingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortingEngine")
            .field("database", &self.config.paths.database)
            .field("link", &self.link_state())
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl SortingEngine {
    /// Full engine with the configured serial actuator.
    pub fn start(config: Config) -> Result<Self> {
        Self::start_with_opener(config, crate::actuator::serial::serial_opener())
    }

    /// Full engine with a custom actuator transport.
    pub fn start_with_opener(config: Config, opener: PortOpener) -> Result<Self> {
        let mut engine = Self::build(config)?;
        let link = ActuatorLink::with_opener(
            engine.config.actuator.clone(),
            engine.events.clone(),
            opener,
        );
        engine.dispatcher = Some(SortDispatcher::spawn(link, &engine.config.engine)?);
        engine.announce();
        Ok(engine)
    }

    /// Engine without an actuator, for inspection and maintenance commands.
    /// Classifications still record detections; sorts report as simulated.
    pub fn open(config: Config) -> Result<Self> {
        let engine = Self::build(config)?;
        engine.announce();
        Ok(engine)
    }

    fn build(mut config: Config) -> Result<Self> {
        config.normalize();
        config.validate()?;
        let resolver = Resolver::new(&config)?;
        let tracker = BinTracker::new(&config.bins);
        let store = Store::open(&config.paths.database, &config.bins)?;
        let (events, logger_join) =
            spawn_logger(JsonlConfig::for_path(&config.paths.activity_log))?;

        Ok(Self {
            config,
            store: Mutex::new(store),
            resolver,
            tracker,
            dispatcher: None,
            events,
            logger_join: Some(logger_join),
            start_time: Instant::now(),
            stopped: false,
        })
    }

    fn announce(&self) {
        self.events.send(ActivityEvent::EngineStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
            link_mode: self.link_state().to_string(),
        });
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &BinCatalog {
        self.resolver.catalog()
    }

    /// Actuator mode; `Uninitialized` when no actuator is attached.
    pub fn link_state(&self) -> LinkState {
        self.dispatcher
            .as_ref()
            .map_or(LinkState::Uninitialized, SortDispatcher::link_state)
    }

    /// Retry opening the actuator.
    pub fn reconnect_actuator(&self) -> Result<LinkState> {
        let dispatcher = self.dispatcher.as_ref().ok_or_else(|| SbinError::Runtime {
            details: "no actuator attached to this engine".to_string(),
        })?;
        self.logged(dispatcher.reinitialize())
    }

    /// Resolve a detection, record it, and sort the item.
    pub fn classify<P: BinPrompter + ?Sized>(
        &self,
        item_name: &str,
        confidence: f64,
        mode: ResolveMode,
        prompter: &mut P,
    ) -> Result<ClassifyOutcome> {
        let name = require_item_name(item_name)?;
        validate_confidence(&name, confidence)?;

        let found = {
            let store = self.store.lock();
            self.logged(self.resolver.lookup(&store, &name))?
        };

        let (item_name, bin, source) = match self.resolver.decide(name, found, mode, prompter) {
            Resolution::Resolved {
                item_name,
                bin,
                source,
            } => (item_name, bin, source),
            Resolution::Unresolved { item_name } => {
                self.events.send(ActivityEvent::ItemUnresolved {
                    item: item_name.clone(),
                    confidence,
                });
                return Ok(ClassifyOutcome::Unresolved {
                    item_name,
                    confidence,
                });
            }
        };

        let (source, detection, state) = {
            let mut store = self.store.lock();
            let (source, detection) = self.logged(self.resolver.record(
                &mut store,
                &item_name,
                &bin,
                source,
                confidence,
            ))?;
            let color = detection.bin_color.as_str();
            let state = self.logged(store.bin_state(color))?.ok_or_else(|| {
                SbinError::BinNotFound {
                    color: color.to_string(),
                }
            })?;
            (source, detection, state)
        };
        // A mapping taught while this item was being resolved wins.
        let bin = detection.bin_color.clone();

        let actuation = self.actuate(&item_name, &bin);
        let bin_status = self.tracker.status(&state);
        self.events.send(ActivityEvent::ItemSorted {
            item: item_name.clone(),
            bin: bin.to_string(),
            confidence,
            source: source.label().to_string(),
            fill_level: bin_status.fill_level,
            item_count: bin_status.item_count,
            actuation: actuation.label().to_string(),
        });

        Ok(ClassifyOutcome::Sorted {
            item_name,
            bin,
            source,
            detection,
            bin_status,
            actuation,
        })
    }

    fn actuate(&self, item_name: &str, bin: &BinColor) -> ActuationStatus {
        let Some(dispatcher) = self.dispatcher.as_ref() else {
            return ActuationStatus::Simulated {
                note: Some("no actuator attached".to_string()),
            };
        };
        let status = dispatcher.dispatch(bin);
        match &status {
            ActuationStatus::TimedOut { after_ms } => {
                eprintln!("[SBIN-LINK] sort of {item_name:?} into {bin} timed out after {after_ms} ms");
                self.events.send(ActivityEvent::SortTimedOut {
                    item: item_name.to_string(),
                    bin: bin.to_string(),
                    after_ms: *after_ms,
                });
            }
            ActuationStatus::Rejected { reason } => {
                eprintln!("[SBIN-LINK] sort of {item_name:?} into {bin} rejected: {reason}");
            }
            _ => {}
        }
        status
    }

    /// Record an operator-taught mapping without a detection.
    pub fn teach(&self, item_name: &str, bin_color: &str) -> Result<ClassificationEntry> {
        let entry = {
            let store = self.store.lock();
            self.logged(store.upsert_classification(item_name, bin_color))?
        };
        self.events.send(ActivityEvent::ItemTaught {
            item: entry.item_name.clone(),
            bin: entry.bin_color.to_string(),
        });
        Ok(entry)
    }

    pub fn bin_status(&self) -> Result<Vec<BinStatus>> {
        let store = self.store.lock();
        self.logged(self.tracker.statuses(&store))
    }

    pub fn bins_needing_emptying(&self) -> Result<Vec<BinStatus>> {
        let store = self.store.lock();
        self.logged(self.tracker.bins_needing_emptying(&store))
    }

    /// Most recent detections first; `None` uses the configured default.
    pub fn history(&self, limit: Option<u32>) -> Result<Vec<DetectionRecord>> {
        let limit = limit.unwrap_or(self.config.engine.history_default_limit);
        let store = self.store.lock();
        self.logged(store.get_history(limit))
    }

    pub fn empty_bin(&self, color: &str) -> Result<BinStatus> {
        let status = {
            let store = self.store.lock();
            self.logged(self.tracker.empty(&store, color))?
        };
        self.events.send(ActivityEvent::BinEmptied {
            bin: status.color.to_string(),
        });
        Ok(status)
    }

    pub fn usage_stats(&self) -> Result<Vec<UsageStat>> {
        let store = self.store.lock();
        self.logged(store.get_usage_stats())
    }

    pub fn detection_count(&self) -> Result<i64> {
        let store = self.store.lock();
        self.logged(store.detection_count())
    }

    /// Stop the actuator, close the store, flush the activity log.
    /// Idempotent.
    pub fn shutdown(&mut self, reason: &str) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }
        if let Err(e) = self.store.lock().shutdown() {
            eprintln!("[SBIN-STORE] close failed: {e}");
        }

        self.events.send(ActivityEvent::EngineStopped {
            reason: reason.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        });
        self.events.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }

    /// Pass a result through, logging failures to the activity log.
    fn logged<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.events.send(ActivityEvent::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            });
        }
        result
    }
}

impl Drop for SortingEngine {
    fn drop(&mut self) {
        self.shutdown("dropped");
    }
}
