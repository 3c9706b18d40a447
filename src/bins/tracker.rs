//! Bin state tracker: derived fill views over store rows.
//!
//! Holds no state of its own; every view is computed from a [`BinState`]
//! freshly read from the store.

#![allow(missing_docs)]

use serde::Serialize;

use crate::core::bins::BinColor;
use crate::core::config::BinsConfig;
use crate::core::errors::Result;
use crate::store::{BinState, Store};

/// Cells in the textual fill gauge.
pub const GAUGE_WIDTH: usize = 20;

/// Collaborator-facing view of one bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinStatus {
    pub color: BinColor,
    pub fill_level: f64,
    pub fill_percent: f64,
    pub item_count: i64,
    pub capacity: f64,
    pub last_emptied: String,
    pub needs_emptying: bool,
}

/// `fill_level / capacity` as a percentage clamped to `[0, 100]`.
///
/// A non-positive capacity reads as empty rather than dividing by zero.
pub fn fill_percent(fill_level: f64, capacity_liters: f64) -> f64 {
    if capacity_liters <= 0.0 || !capacity_liters.is_finite() || fill_level.is_nan() {
        return 0.0;
    }
    (fill_level / capacity_liters * 100.0).clamp(0.0, 100.0)
}

/// Decision layer over bin rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinTracker {
    needs_emptying_pct: f64,
}

impl BinTracker {
    pub fn new(bins: &BinsConfig) -> Self {
        Self {
            needs_emptying_pct: bins.needs_emptying_pct,
        }
    }

    pub fn needs_emptying(&self, state: &BinState) -> bool {
        fill_percent(state.fill_level, state.capacity_liters) > self.needs_emptying_pct
    }

    pub fn status(&self, state: &BinState) -> BinStatus {
        BinStatus {
            color: state.bin_color.clone(),
            fill_level: state.fill_level,
            fill_percent: fill_percent(state.fill_level, state.capacity_liters),
            item_count: state.item_count,
            capacity: state.capacity_liters,
            last_emptied: state.last_emptied.clone(),
            needs_emptying: self.needs_emptying(state),
        }
    }

    /// Status of every configured bin, sorted by bin identifier.
    pub fn statuses(&self, store: &Store) -> Result<Vec<BinStatus>> {
        Ok(store
            .get_bin_states()?
            .iter()
            .map(|state| self.status(state))
            .collect())
    }

    /// Bins currently over the emptying threshold.
    pub fn bins_needing_emptying(&self, store: &Store) -> Result<Vec<BinStatus>> {
        Ok(self
            .statuses(store)?
            .into_iter()
            .filter(|status| status.needs_emptying)
            .collect())
    }

    /// Empty a bin and return its fresh status.
    pub fn empty(&self, store: &Store, color: &str) -> Result<BinStatus> {
        let state = store.empty_bin(color)?;
        Ok(self.status(&state))
    }
}

/// Fixed-width bar such as `█████░░░░░░░░░░░░░░░`.
pub fn gauge(percent: f64, width: usize) -> String {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).floor() as usize;
    let filled = filled.min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}
