//! Actuator link: serial-or-simulated state machine.
//!
//! ```text
//! Uninitialized ──initialize──▶ Connected | Simulated ──shutdown──▶ Closed
//! ```
//!
//! The mode is chosen once per `initialize()`. A failed write degrades only
//! that call to simulated behaviour; the link stays `Connected` and nothing
//! reconnects on its own.

#![allow(missing_docs)]

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::actuator::serial::{CommandWriter, PortOpener, serial_opener};
use crate::core::bins::BinColor;
use crate::core::config::ActuatorConfig;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Uninitialized,
    Connected,
    Simulated,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connected => "connected",
            Self::Simulated => "simulated",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// How a single command was carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Written to the device; the mechanism is now moving.
    Hardware,
    /// No device involved. `note` says why when the link was not ready.
    Simulated { note: Option<String> },
    /// The device was connected but the write failed.
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub bin: BinColor,
    pub delivery: Delivery,
}

pub struct ActuatorLink {
    config: ActuatorConfig,
    state: LinkState,
    writer: Option<Box<dyn CommandWriter>>,
    opener: PortOpener,
    events: ActivityLoggerHandle,
}

impl fmt::Debug for ActuatorLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActuatorLink")
            .field("port", &self.config.port)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ActuatorLink {
    pub fn new(config: ActuatorConfig, events: ActivityLoggerHandle) -> Self {
        Self::with_opener(config, events, serial_opener())
    }

    /// Link with a custom transport opener.
    pub fn with_opener(
        config: ActuatorConfig,
        events: ActivityLoggerHandle,
        opener: PortOpener,
    ) -> Self {
        Self {
            config,
            state: LinkState::Uninitialized,
            writer: None,
            opener,
            events,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn port(&self) -> &str {
        &self.config.port
    }

    /// Mechanical travel time to wait after a hardware delivery.
    pub fn sort_duration(&self) -> Duration {
        Duration::from_millis(self.config.sort_duration_ms)
    }

    /// Open the actuator or fall back to simulation. Never fails.
    ///
    /// A no-op when already connected; from `Simulated` or `Closed` it
    /// retries the open.
    pub fn initialize(&mut self) -> LinkState {
        if self.state == LinkState::Connected {
            return self.state;
        }
        if !self.config.enabled {
            return self.simulate("actuator disabled in configuration".to_string());
        }

        match (self.opener)(&self.config) {
            Ok(writer) => {
                if self.config.settle_ms > 0 {
                    thread::sleep(Duration::from_millis(self.config.settle_ms));
                }
                self.writer = Some(writer);
                self.state = LinkState::Connected;
                self.events.send(ActivityEvent::LinkConnected {
                    port: self.config.port.clone(),
                    baud_rate: self.config.baud_rate,
                });
                self.state
            }
            Err(e) => {
                eprintln!(
                    "[SBIN-LINK] actuator unavailable on {}, running in simulation: {e}",
                    self.config.port
                );
                self.simulate(e.to_string())
            }
        }
    }

    fn simulate(&mut self, reason: String) -> LinkState {
        self.writer = None;
        self.state = LinkState::Simulated;
        self.events.send(ActivityEvent::LinkSimulated {
            port: self.config.port.clone(),
            reason,
        });
        self.state
    }

    /// Command a sort into `bin`. Never fails; failures degrade to simulation.
    pub fn send(&mut self, bin: &BinColor) -> SendReport {
        let delivery = match self.state {
            LinkState::Connected => self.write(bin),
            LinkState::Simulated => Delivery::Simulated { note: None },
            LinkState::Uninitialized => Delivery::Simulated {
                note: Some("link not initialized".to_string()),
            },
            LinkState::Closed => Delivery::Simulated {
                note: Some("link closed".to_string()),
            },
        };
        SendReport {
            bin: bin.clone(),
            delivery,
        }
    }

    fn write(&mut self, bin: &BinColor) -> Delivery {
        let payload = format!("{bin}\n");
        let result = match self.writer.as_mut() {
            Some(writer) => writer.write_command(payload.as_bytes()),
            None => {
                return Delivery::Degraded {
                    reason: "connected link has no writer".to_string(),
                };
            }
        };
        match result {
            Ok(()) => Delivery::Hardware,
            Err(e) => {
                eprintln!("[SBIN-LINK] write to {} failed, simulating: {e}", self.config.port);
                let reason = e.to_string();
                self.events.send(ActivityEvent::SendDegraded {
                    bin: bin.to_string(),
                    reason: reason.clone(),
                });
                Delivery::Degraded { reason }
            }
        }
    }

    /// Release the port. Idempotent.
    pub fn shutdown(&mut self) {
        self.writer = None;
        self.state = LinkState::Closed;
    }
}

impl Drop for ActuatorLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
