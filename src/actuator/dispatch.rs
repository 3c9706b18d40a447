//! Sort dispatcher: one thread owns the [`ActuatorLink`] and performs sorts
//! strictly one at a time.
//!
//! Callers enqueue on a bounded crossbeam channel and wait for completion
//! with a deadline. Giving up on the wait does not cancel the sort; the
//! mechanism finishes whatever it started.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use serde::Serialize;

use crate::actuator::link::{ActuatorLink, Delivery, LinkState};
use crate::core::bins::BinColor;
use crate::core::config::EngineConfig;
use crate::core::errors::{Result, SbinError};

/// Outcome of asking the actuator to sort one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActuationStatus {
    /// Command written and the sort duration elapsed.
    Delivered,
    /// No hardware; nothing moved.
    Simulated {
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    /// Hardware was connected but the write failed.
    Degraded { reason: String },
    /// Sort did not complete within the caller's deadline.
    TimedOut { after_ms: u64 },
    /// Never queued: the queue stayed full or the dispatcher is gone.
    Rejected { reason: String },
}

impl ActuationStatus {
    /// Short label for logs and human output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Simulated { .. } => "simulated",
            Self::Degraded { .. } => "degraded",
            Self::TimedOut { .. } => "timed_out",
            Self::Rejected { .. } => "rejected",
        }
    }

    /// Whether the physical sort is known to have happened.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl fmt::Display for ActuationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered | Self::Simulated { note: None } => f.write_str(self.label()),
            Self::Simulated { note: Some(note) } => write!(f, "simulated ({note})"),
            Self::Degraded { reason } => write!(f, "degraded ({reason})"),
            Self::TimedOut { after_ms } => write!(f, "timed out after {after_ms} ms"),
            Self::Rejected { reason } => write!(f, "rejected ({reason})"),
        }
    }
}

impl From<Delivery> for ActuationStatus {
    fn from(value: Delivery) -> Self {
        match value {
            Delivery::Hardware => Self::Delivered,
            Delivery::Simulated { note } => Self::Simulated { note },
            Delivery::Degraded { reason } => Self::Degraded { reason },
        }
    }
}

enum DispatchMsg {
    Sort {
        bin: BinColor,
        reply: Sender<Delivery>,
    },
    Reinitialize {
        reply: Sender<LinkState>,
    },
}

/// Handle to the dispatcher thread.
pub struct SortDispatcher {
    tx: Option<Sender<DispatchMsg>>,
    join: Option<JoinHandle<()>>,
    state: Arc<Mutex<LinkState>>,
    enqueue_timeout: Duration,
    sort_timeout: Duration,
}

impl fmt::Debug for SortDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortDispatcher")
            .field("link", &*self.state.lock())
            .field("running", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

impl SortDispatcher {
    /// Initialize the link and move it onto the dispatcher thread.
    pub fn spawn(mut link: ActuatorLink, engine: &EngineConfig) -> Result<Self> {
        let initial = link.initialize();
        let state = Arc::new(Mutex::new(initial));
        let (tx, rx) = bounded::<DispatchMsg>(engine.queue_capacity.max(1));

        let thread_state = Arc::clone(&state);
        let join = thread::Builder::new()
            .name("smartbin-sorter".to_string())
            .spawn(move || dispatcher_main(&rx, link, &thread_state))
            .map_err(|e| SbinError::Runtime {
                details: format!("failed to spawn sort dispatcher: {e}"),
            })?;

        Ok(Self {
            tx: Some(tx),
            join: Some(join),
            state,
            enqueue_timeout: Duration::from_millis(engine.enqueue_timeout_ms),
            sort_timeout: Duration::from_millis(engine.sort_timeout_ms),
        })
    }

    pub fn link_state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Sort one item and wait for the mechanism, bounded by the sort timeout.
    pub fn dispatch(&self, bin: &BinColor) -> ActuationStatus {
        let Some(tx) = self.tx.as_ref() else {
            return ActuationStatus::Rejected {
                reason: "dispatcher stopped".to_string(),
            };
        };
        let (reply_tx, reply_rx) = bounded(1);
        let msg = DispatchMsg::Sort {
            bin: bin.clone(),
            reply: reply_tx,
        };
        match tx.send_timeout(msg, self.enqueue_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return ActuationStatus::Rejected {
                    reason: format!("sort queue full for {} ms", self.enqueue_timeout.as_millis()),
                };
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return ActuationStatus::Rejected {
                    reason: "dispatcher stopped".to_string(),
                };
            }
        }

        match reply_rx.recv_timeout(self.sort_timeout) {
            Ok(delivery) => delivery.into(),
            Err(RecvTimeoutError::Timeout) => ActuationStatus::TimedOut {
                after_ms: u64::try_from(self.sort_timeout.as_millis()).unwrap_or(u64::MAX),
            },
            Err(RecvTimeoutError::Disconnected) => ActuationStatus::Rejected {
                reason: "dispatcher stopped before completing the sort".to_string(),
            },
        }
    }

    /// Retry opening the actuator. Queued sorts ahead of it finish first.
    pub fn reinitialize(&self) -> Result<LinkState> {
        let tx = self.tx.as_ref().ok_or(SbinError::ChannelClosed {
            component: "sort dispatcher",
        })?;
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(DispatchMsg::Reinitialize { reply: reply_tx })
            .map_err(|_| SbinError::ChannelClosed {
                component: "sort dispatcher",
            })?;
        reply_rx.recv().map_err(|_| SbinError::ChannelClosed {
            component: "sort dispatcher",
        })
    }

    /// Stop accepting sorts, let queued ones finish, close the link.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            eprintln!("[SBIN-LINK] sort dispatcher panicked during shutdown");
        }
    }
}

impl Drop for SortDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatcher_main(rx: &Receiver<DispatchMsg>, mut link: ActuatorLink, state: &Mutex<LinkState>) {
    for msg in rx {
        match msg {
            DispatchMsg::Sort { bin, reply } => {
                let report = link.send(&bin);
                if report.delivery == Delivery::Hardware {
                    thread::sleep(link.sort_duration());
                }
                // The caller may have stopped waiting; the sort still happened.
                let _ = reply.send(report.delivery);
            }
            DispatchMsg::Reinitialize { reply } => {
                let next = link.initialize();
                *state.lock() = next;
                let _ = reply.send(next);
            }
        }
    }
    link.shutdown();
    *state.lock() = LinkState::Closed;
}
