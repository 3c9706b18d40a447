//! Sorting actuator: serial transport, link state machine, sort dispatcher.

pub mod dispatch;
pub mod link;
pub mod serial;
