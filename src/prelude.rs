//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use smart_bin::prelude::*;
//! ```

// Core
pub use crate::core::bins::{BinCatalog, BinColor};
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SbinError};

// Store
pub use crate::store::{BinState, ClassificationEntry, DetectionRecord, Store, UsageStat};

// Classification
pub use crate::classify::prompt::{BinPrompter, NoOperator, TerminalPrompter};
pub use crate::classify::resolver::{Resolution, ResolutionSource, ResolveMode, Resolver};

// Bins
pub use crate::bins::tracker::{BinStatus, BinTracker};

// Actuator
pub use crate::actuator::dispatch::{ActuationStatus, SortDispatcher};
pub use crate::actuator::link::{ActuatorLink, LinkState};

// Engine
pub use crate::engine::service::{ClassifyOutcome, SortingEngine};
