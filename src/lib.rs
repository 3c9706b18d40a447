#![forbid(unsafe_code)]

//! smart_bin: waste-sorting engine for a camera-fed smart bin.
//!
//! A detection comes in as an item name plus confidence. The engine:
//! 1. **Resolves a bin**: learned mappings first, then the configured
//!    default table, then (interactively) a human operator
//! 2. **Records it**: detection log and bin fill state in one SQLite
//!    transaction, learning the mapping for next time
//! 3. **Sorts it**: one line to the sorting actuator over serial, or a
//!    logged simulation when no hardware answers
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use smart_bin::prelude::*;
//!
//! let engine = SortingEngine::start(Config::load(None)?)?;
//! let outcome = engine.classify("plastic_bottle", 0.92, ResolveMode::Auto, &mut NoOperator)?;
//! # Ok::<(), SbinError>(())
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use smart_bin::core::config::Config;
//! use smart_bin::store::Store;
//! ```

pub mod prelude;

pub mod actuator;
pub mod bins;
pub mod classify;
pub mod core;
pub mod engine;
pub mod logger;
pub mod store;
