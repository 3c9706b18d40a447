//! Bin state tracking: fill percentages, emptying decisions, gauges.

pub mod tracker;
