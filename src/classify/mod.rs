//! Classification: resolve item names to bins and learn new mappings.

pub mod prompt;
pub mod resolver;
