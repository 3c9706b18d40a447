//! Persistent store: the only owner of classification, bin-state and
//! detection-log tables.

pub mod sqlite;

pub use sqlite::{
    BinState, ClassificationEntry, ClassifiedDetection, DetectionRecord, Store, UsageStat,
};
