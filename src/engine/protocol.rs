//! JSON-lines request/response protocol for collaborators such as the
//! dashboard.
//!
//! One request object per line in, one response object per line out:
//!
//! ```text
//! {"op":"classify","item_name":"plastic_bottle","confidence":0.92,"auto_mode":true}
//! {"success":true,"item_name":"plastic_bottle","bin_color":"yellow",...}
//! ```
//!
//! The protocol never prompts a human. `auto_mode: false` behaves like
//! auto mode with nobody at the terminal: unknown items come back unresolved.

#![allow(missing_docs)]

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use crate::actuator::dispatch::ActuationStatus;
use crate::bins::tracker::BinStatus;
use crate::classify::prompt::NoOperator;
use crate::classify::resolver::{ResolutionSource, ResolveMode};
use crate::core::bins::BinColor;
use crate::core::errors::{Result, SbinError};
use crate::engine::service::{ClassifyOutcome, SortingEngine};
use crate::store::{DetectionRecord, UsageStat};
use crate::store::sqlite::now_rfc3339;

/// How often the serve loop re-checks the stop flag while idle.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Error code for items no source could place.
pub const UNRESOLVED_CODE: &str = "SBIN-UNRESOLVED";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Classify {
        item_name: String,
        #[serde(default = "full_confidence")]
        confidence: f64,
        #[serde(default)]
        auto_mode: bool,
    },
    BinStatus,
    History {
        #[serde(default)]
        limit: Option<u32>,
    },
    EmptyBin {
        color: String,
    },
    UsageStats,
}

fn full_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Classified {
        item_name: String,
        bin_color: BinColor,
        source: ResolutionSource,
        confidence: f64,
        bin: BinStatus,
        actuation: ActuationStatus,
        timestamp: String,
    },
    Bins {
        bins: Vec<BinStatus>,
        timestamp: String,
    },
    History {
        history: Vec<DetectionRecord>,
        count: usize,
    },
    Emptied {
        bin_color: BinColor,
        bin: BinStatus,
        timestamp: String,
    },
    Stats {
        stats: Vec<UsageStat>,
        count: usize,
    },
    Failure {
        error: String,
        code: String,
    },
}

impl Response {
    fn ok(body: ResponseBody) -> Self {
        Self {
            success: true,
            body,
        }
    }

    fn failure(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            body: ResponseBody::Failure {
                error: error.into(),
                code: code.into(),
            },
        }
    }

    fn from_error(err: &SbinError) -> Self {
        Self::failure(err.to_string(), err.code())
    }
}

/// Execute one request against the engine.
pub fn handle(engine: &SortingEngine, request: Request) -> Response {
    match request {
        Request::Classify {
            item_name,
            confidence,
            auto_mode,
        } => {
            // No operator is reachable over the protocol in either mode.
            let mode = ResolveMode::from_auto_flag(auto_mode);
            match engine.classify(&item_name, confidence, mode, &mut NoOperator) {
                Ok(ClassifyOutcome::Sorted {
                    item_name,
                    bin,
                    source,
                    detection,
                    bin_status,
                    actuation,
                }) => Response::ok(ResponseBody::Classified {
                    item_name,
                    bin_color: bin,
                    source,
                    confidence: detection.confidence,
                    bin: bin_status,
                    actuation,
                    timestamp: detection.timestamp,
                }),
                Ok(ClassifyOutcome::Unresolved { item_name, .. }) => {
                    Response::failure(format!("unknown item: {item_name}"), UNRESOLVED_CODE)
                }
                Err(e) => Response::from_error(&e),
            }
        }
        Request::BinStatus => match engine.bin_status() {
            Ok(bins) => Response::ok(ResponseBody::Bins {
                bins,
                timestamp: now_rfc3339(),
            }),
            Err(e) => Response::from_error(&e),
        },
        Request::History { limit } => match engine.history(limit) {
            Ok(history) => Response::ok(ResponseBody::History {
                count: history.len(),
                history,
            }),
            Err(e) => Response::from_error(&e),
        },
        Request::EmptyBin { color } => match engine.empty_bin(&color) {
            Ok(bin) => Response::ok(ResponseBody::Emptied {
                bin_color: bin.color.clone(),
                timestamp: bin.last_emptied.clone(),
                bin,
            }),
            Err(e) => Response::from_error(&e),
        },
        Request::UsageStats => match engine.usage_stats() {
            Ok(stats) => Response::ok(ResponseBody::Stats {
                count: stats.len(),
                stats,
            }),
            Err(e) => Response::from_error(&e),
        },
    }
}

/// Parse and execute one protocol line.
pub fn handle_line(engine: &SortingEngine, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(engine, request),
        Err(e) => Response::from_error(&SbinError::from(e)),
    }
}

/// Serve requests until the input closes or `stop` is raised.
///
/// Lines arrive over a channel so a blocked reader never delays shutdown.
/// Raising `reconnect` retries the actuator open between requests.
/// Returns the number of requests answered.
pub fn serve<W: Write>(
    engine: &SortingEngine,
    lines: &Receiver<String>,
    output: &mut W,
    stop: &AtomicBool,
    reconnect: &AtomicBool,
) -> Result<u64> {
    let mut answered = 0;
    while !stop.load(Ordering::Relaxed) {
        if reconnect.swap(false, Ordering::Relaxed) {
            match engine.reconnect_actuator() {
                Ok(state) => eprintln!("[SBIN-SERVE] actuator link now {state}"),
                Err(e) => eprintln!("[SBIN-SERVE] actuator reconnect failed: {e}"),
            }
        }
        let line = match lines.recv_timeout(IDLE_POLL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let response = handle_line(engine, trimmed);
        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        output
            .write_all(payload.as_bytes())
            .and_then(|()| output.flush())
            .map_err(|e| SbinError::io("<protocol output>", e))?;
        answered += 1;
    }
    Ok(answered)
}
