//! Sorting engine service, collaborator protocol, process signals.

pub mod protocol;
pub mod service;
#[cfg(feature = "daemon")]
pub mod signals;
