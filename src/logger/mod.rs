//! Activity logging: JSONL append-only log written by a dedicated thread.

pub mod activity;
pub mod jsonl;
