//! Bin identifiers and the configured set of valid bins.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SbinError};

/// A bin identifier that has been checked against a [`BinCatalog`].
///
/// Only the catalog (and the store, for rows it wrote itself) can build one,
/// so holding a `BinColor` means the value was valid when it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinColor(String);

impl BinColor {
    pub(crate) fn from_trusted(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The normalized identifier, e.g. `"yellow"`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BinColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BinColor {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Trim and lowercase an item name or bin identifier.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// The finite, ordered set of bins the installation has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinCatalog {
    colors: Vec<BinColor>,
}

impl BinCatalog {
    /// Build a catalog from configured identifiers, keeping configured order.
    pub fn new<S: AsRef<str>>(raw: &[S]) -> Result<Self> {
        if raw.is_empty() {
            return Err(SbinError::InvalidConfig {
                details: "bins.colors must name at least one bin".to_string(),
            });
        }
        let mut colors: Vec<BinColor> = Vec::with_capacity(raw.len());
        for entry in raw {
            let name = normalize_name(entry.as_ref());
            if name.is_empty() {
                return Err(SbinError::InvalidConfig {
                    details: "bins.colors entries must be non-empty".to_string(),
                });
            }
            if colors.iter().any(|c| c.0 == name) {
                return Err(SbinError::InvalidConfig {
                    details: format!("bins.colors lists {name:?} more than once"),
                });
            }
            colors.push(BinColor(name));
        }
        Ok(Self { colors })
    }

    /// Validate a raw identifier, returning the canonical [`BinColor`].
    pub fn parse(&self, raw: &str) -> Result<BinColor> {
        let name = normalize_name(raw);
        self.colors
            .iter()
            .find(|c| c.0 == name)
            .cloned()
            .ok_or_else(|| SbinError::InvalidBin {
                color: raw.to_string(),
                valid: self.valid_list(),
            })
    }

    pub fn contains(&self, raw: &str) -> bool {
        let name = normalize_name(raw);
        self.colors.iter().any(|c| c.0 == name)
    }

    /// Configured bins in configuration order (the order operators see in menus).
    pub fn colors(&self) -> &[BinColor] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Comma-separated list for error messages.
    pub fn valid_list(&self) -> String {
        self.colors
            .iter()
            .map(BinColor::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_normalizes_and_keeps_order() {
        let catalog = BinCatalog::new(&[" Yellow", "GREEN ", "brown"]).unwrap();
        let names: Vec<&str> = catalog.colors().iter().map(BinColor::as_str).collect();
        assert_eq!(names, vec!["yellow", "green", "brown"]);
    }

    #[test]
    fn catalog_rejects_duplicates_after_normalization() {
        let err = BinCatalog::new(&["yellow", " YELLOW"]).unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn catalog_rejects_empty_sets_and_blank_entries() {
        assert!(BinCatalog::new::<&str>(&[]).is_err());
        assert!(BinCatalog::new(&["yellow", "   "]).is_err());
    }

    #[test]
    fn parse_accepts_case_insensitive_input() {
        let catalog = BinCatalog::new(&["yellow", "green"]).unwrap();
        assert_eq!(catalog.parse(" Green ").unwrap().as_str(), "green");
        assert!(catalog.contains("YELLOW"));
    }

    #[test]
    fn parse_rejects_unknown_bin_with_valid_list() {
        let catalog = BinCatalog::new(&["yellow", "green"]).unwrap();
        let err = catalog.parse("purple").unwrap_err();
        assert_eq!(err.code(), "SBIN-2001");
        assert!(err.to_string().contains("yellow, green"), "{err}");
    }

    #[test]
    fn normalize_name_trims_and_lowercases() {
        assert_eq!(normalize_name("  Plastic_Bottle \n"), "plastic_bottle");
    }
}
