//! Serial transport for the sorting actuator.
//!
//! The wire protocol is one line per sort: the bin color followed by `\n`,
//! at the configured baud rate. Reading replies is not part of the protocol.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, bounded};
use parking_lot::Mutex;

use crate::core::config::ActuatorConfig;
use crate::core::errors::{Result, SbinError};

/// Byte sink for actuator commands.
pub trait CommandWriter: Send {
    /// Write one complete command line.
    fn write_command(&mut self, payload: &[u8]) -> Result<()>;
}

/// Opens a [`CommandWriter`] for an actuator configuration.
pub type PortOpener = Box<dyn Fn(&ActuatorConfig) -> Result<Box<dyn CommandWriter>> + Send>;

/// Default opener: the real serial port, bounded by `open_timeout_ms`.
pub fn serial_opener() -> PortOpener {
    Box::new(open_with_timeout)
}

/// Open the configured port on a helper thread and give up after
/// `open_timeout_ms`. An abandoned open finishes in the background and its
/// handle is dropped.
pub fn open_with_timeout(config: &ActuatorConfig) -> Result<Box<dyn CommandWriter>> {
    let (tx, rx) = bounded(1);
    let owned = config.clone();
    thread::Builder::new()
        .name("smartbin-serial-open".to_string())
        .spawn(move || {
            let _ = tx.send(open_port(&owned));
        })
        .map_err(|e| SbinError::Runtime {
            details: format!("failed to spawn serial open thread: {e}"),
        })?;

    match rx.recv_timeout(Duration::from_millis(config.open_timeout_ms)) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(SbinError::Timeout {
            operation: "serial open",
            after_ms: config.open_timeout_ms,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(SbinError::ChannelClosed {
            component: "serial open",
        }),
    }
}

#[cfg(unix)]
fn open_port(config: &ActuatorConfig) -> Result<Box<dyn CommandWriter>> {
    Ok(Box::new(unix::SerialPort::open(config)?))
}

#[cfg(not(unix))]
fn open_port(config: &ActuatorConfig) -> Result<Box<dyn CommandWriter>> {
    Err(SbinError::HardwareUnavailable {
        port: config.port.clone(),
        details: "serial actuators are only supported on unix".to_string(),
    })
}

#[cfg(unix)]
pub use unix::{SerialPort, baud_rate};

#[cfg(unix)]
mod unix {
    use std::fs::{File, OpenOptions};
    use std::io::{ErrorKind, Write};
    use std::os::fd::AsFd;
    use std::os::unix::fs::OpenOptionsExt as _;
    use std::time::{Duration, Instant};

    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
    use nix::sys::termios::{
        BaudRate, ControlFlags, SetArg, cfmakeraw, cfsetspeed, tcgetattr, tcsetattr,
    };

    use super::CommandWriter;
    use crate::core::config::ActuatorConfig;
    use crate::core::errors::{Result, SbinError};

    /// Map a configured baud rate onto a termios speed.
    pub fn baud_rate(rate: u32) -> Result<BaudRate> {
        Ok(match rate {
            1200 => BaudRate::B1200,
            2400 => BaudRate::B2400,
            4800 => BaudRate::B4800,
            9600 => BaudRate::B9600,
            19200 => BaudRate::B19200,
            38400 => BaudRate::B38400,
            57600 => BaudRate::B57600,
            115_200 => BaudRate::B115200,
            other => {
                return Err(SbinError::InvalidConfig {
                    details: format!("unsupported baud rate {other}"),
                });
            }
        })
    }

    /// Raw-mode tty opened non-blocking so writes can be deadline-bounded.
    pub struct SerialPort {
        file: File,
        port: String,
        write_timeout: Duration,
    }

    impl SerialPort {
        pub fn open(config: &ActuatorConfig) -> Result<Self> {
            let unavailable = |details: String| SbinError::HardwareUnavailable {
                port: config.port.clone(),
                details,
            };
            let speed = baud_rate(config.baud_rate)?;

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(&config.port)
                .map_err(|e| unavailable(e.to_string()))?;

            let mut termios =
                tcgetattr(file.as_fd()).map_err(|e| unavailable(format!("tcgetattr: {e}")))?;
            cfmakeraw(&mut termios);
            termios.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
            cfsetspeed(&mut termios, speed).map_err(|e| unavailable(format!("cfsetspeed: {e}")))?;
            tcsetattr(file.as_fd(), SetArg::TCSANOW, &termios)
                .map_err(|e| unavailable(format!("tcsetattr: {e}")))?;

            Ok(Self {
                file,
                port: config.port.clone(),
                write_timeout: Duration::from_millis(config.write_timeout_ms),
            })
        }

        fn wait_writable(&self, remaining: Duration) -> Result<bool> {
            let ms = u16::try_from(remaining.as_millis()).unwrap_or(u16::MAX);
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLOUT)];
            let ready = poll(&mut fds, PollTimeout::from(ms)).map_err(|e| {
                SbinError::HardwareUnavailable {
                    port: self.port.clone(),
                    details: format!("poll: {e}"),
                }
            })?;
            Ok(ready > 0)
        }
    }

    impl CommandWriter for SerialPort {
        fn write_command(&mut self, payload: &[u8]) -> Result<()> {
            let deadline = Instant::now() + self.write_timeout;
            let mut written = 0;
            while written < payload.len() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() || !self.wait_writable(remaining)? {
                    return Err(SbinError::Timeout {
                        operation: "serial write",
                        after_ms: u64::try_from(self.write_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    });
                }
                match self.file.write(&payload[written..]) {
                    Ok(0) => {
                        return Err(SbinError::HardwareUnavailable {
                            port: self.port.clone(),
                            details: "device accepted zero bytes".to_string(),
                        });
                    }
                    Ok(n) => written += n,
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                    Err(e) => return Err(SbinError::io(&self.port, e)),
                }
            }
            self.file
                .flush()
                .map_err(|e| SbinError::io(&self.port, e))
        }
    }
}

/// Writer that keeps every command in memory. Used for dry runs and by
/// tests that need to see what would have gone over the wire.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    sent: Arc<Mutex<Vec<String>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far, without their trailing newline.
    pub fn lines(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Opener that hands out clones sharing this writer's buffer.
    pub fn opener(&self) -> PortOpener {
        let shared = self.clone();
        Box::new(move |_: &ActuatorConfig| Ok(Box::new(shared.clone()) as Box<dyn CommandWriter>))
    }
}

impl CommandWriter for MemoryWriter {
    fn write_command(&mut self, payload: &[u8]) -> Result<()> {
        let line = String::from_utf8_lossy(payload);
        self.sent
            .lock()
            .push(line.trim_end_matches('\n').to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: &str) -> ActuatorConfig {
        ActuatorConfig {
            port: port.to_string(),
            open_timeout_ms: 500,
            settle_ms: 0,
            ..ActuatorConfig::default()
        }
    }

    #[test]
    fn missing_port_is_hardware_unavailable() {
        let err = match open_with_timeout(&config("/nonexistent/smartbin-tty")) {
            Ok(_) => panic!("opening a missing device must fail"),
            Err(e) => e,
        };
        assert_eq!(err.code(), "SBIN-3001");
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[test]
    fn regular_file_is_not_a_tty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-tty");
        std::fs::write(&path, b"").unwrap();
        let err = match open_with_timeout(&config(path.to_str().unwrap())) {
            Ok(_) => panic!("a regular file has no termios"),
            Err(e) => e,
        };
        assert_eq!(err.code(), "SBIN-3001");
        assert!(err.to_string().contains("tcgetattr"));
    }

    #[cfg(unix)]
    #[test]
    fn supported_baud_rates_map() {
        for rate in crate::core::config::SUPPORTED_BAUD_RATES {
            assert!(baud_rate(rate).is_ok(), "{rate}");
        }
        assert!(baud_rate(12345).is_err());
    }

    #[test]
    fn memory_writer_records_lines() {
        let writer = MemoryWriter::new();
        let opener = writer.opener();
        let mut port = opener(&config("mem")).unwrap();
        port.write_command(b"yellow\n").unwrap();
        port.write_command(b"green\n").unwrap();
        assert_eq!(writer.lines(), vec!["yellow", "green"]);
    }
}
