//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::bins::{BinCatalog, normalize_name};
use crate::core::errors::{Result, SbinError};

/// Baud rates the serial transport knows how to program.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [
    1_200, 2_400, 4_800, 9_600, 19_200, 38_400, 57_600, 115_200,
];

/// Full engine configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub bins: BinsConfig,
    pub mapping: MappingConfig,
    pub actuator: ActuatorConfig,
    pub engine: EngineConfig,
    pub paths: PathsConfig,
}

/// Physical bins: identifiers, capacity and fill accounting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BinsConfig {
    /// Valid bin identifiers, in the order operators see them.
    pub colors: Vec<String>,
    /// Capacity applied to every bin without an override.
    pub capacity_liters: f64,
    /// Per-bin capacity overrides keyed by bin identifier.
    pub capacity_overrides: BTreeMap<String, f64>,
    /// Volume added to a bin for each detection.
    pub fill_increment: f64,
    /// A bin above this fill percentage needs emptying.
    pub needs_emptying_pct: f64,
}

/// Cold-start item → bin associations, consulted only for items the store
/// has never learned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MappingConfig {
    pub defaults: BTreeMap<String, String>,
}

/// Serial sorting actuator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActuatorConfig {
    /// When false the link goes straight to simulation.
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    pub open_timeout_ms: u64,
    /// Pause after opening the port; most boards reset on open.
    pub settle_ms: u64,
    pub write_timeout_ms: u64,
    /// Mechanical travel time waited after each delivered command.
    pub sort_duration_ms: u64,
}

/// Sort dispatch queue and caller-facing limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub queue_capacity: usize,
    pub enqueue_timeout_ms: u64,
    pub sort_timeout_ms: u64,
    pub history_default_limit: u32,
}

/// Filesystem paths used by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub database: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for BinsConfig {
    fn default() -> Self {
        Self {
            colors: vec![
                "yellow".to_string(),
                "green".to_string(),
                "brown".to_string(),
            ],
            capacity_liters: 50.0,
            capacity_overrides: BTreeMap::new(),
            fill_increment: 0.5,
            needs_emptying_pct: 80.0,
        }
    }
}

impl BinsConfig {
    /// Effective capacity for one bin, applying overrides.
    #[must_use]
    pub fn capacity_for(&self, color: &str) -> f64 {
        self.capacity_overrides
            .get(color)
            .copied()
            .unwrap_or(self.capacity_liters)
    }

    /// Build the validated catalog of bins.
    pub fn catalog(&self) -> Result<BinCatalog> {
        BinCatalog::new(&self.colors)
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        let pairs = [
            ("plastic", "yellow"),
            ("plastic_bottle", "yellow"),
            ("bottle", "yellow"),
            ("cardboard", "yellow"),
            ("paper", "yellow"),
            ("metal", "yellow"),
            ("glass", "yellow"),
            ("can", "yellow"),
            ("banana_peel", "green"),
            ("food", "green"),
            ("organic", "green"),
            ("tissue", "brown"),
            ("trash", "brown"),
        ];
        Self {
            defaults: pairs
                .into_iter()
                .map(|(item, bin)| (item.to_string(), bin.to_string()))
                .collect(),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9_600,
            open_timeout_ms: 2_000,
            settle_ms: 2_000,
            write_timeout_ms: 1_000,
            sort_duration_ms: 10_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            enqueue_timeout_ms: 5_000,
            sort_timeout_ms: 30_000,
            history_default_limit: 50,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[SBIN-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir
            .join(".config")
            .join("smartbin")
            .join("config.toml");
        let data = home_dir.join(".local").join("share").join("smartbin");
        Self {
            config_file: cfg,
            database: data.join("waste_items.sqlite3"),
            activity_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SbinError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(SbinError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // actuator
        if let Some(raw) = lookup("SMARTBIN_ACTUATOR_ENABLED") {
            self.actuator.enabled = parse_env("SMARTBIN_ACTUATOR_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("SMARTBIN_ACTUATOR_PORT") {
            self.actuator.port = raw;
        }
        if let Some(raw) = lookup("SMARTBIN_ACTUATOR_BAUD_RATE") {
            self.actuator.baud_rate = parse_env("SMARTBIN_ACTUATOR_BAUD_RATE", &raw)?;
        }
        if let Some(raw) = lookup("SMARTBIN_ACTUATOR_SORT_DURATION_MS") {
            self.actuator.sort_duration_ms =
                parse_env("SMARTBIN_ACTUATOR_SORT_DURATION_MS", &raw)?;
        }
        if let Some(raw) = lookup("SMARTBIN_ACTUATOR_OPEN_TIMEOUT_MS") {
            self.actuator.open_timeout_ms = parse_env("SMARTBIN_ACTUATOR_OPEN_TIMEOUT_MS", &raw)?;
        }

        // bins
        if let Some(raw) = lookup("SMARTBIN_BINS_CAPACITY_LITERS") {
            self.bins.capacity_liters = parse_env("SMARTBIN_BINS_CAPACITY_LITERS", &raw)?;
        }
        if let Some(raw) = lookup("SMARTBIN_BINS_FILL_INCREMENT") {
            self.bins.fill_increment = parse_env("SMARTBIN_BINS_FILL_INCREMENT", &raw)?;
        }

        // engine
        if let Some(raw) = lookup("SMARTBIN_ENGINE_SORT_TIMEOUT_MS") {
            self.engine.sort_timeout_ms = parse_env("SMARTBIN_ENGINE_SORT_TIMEOUT_MS", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("SMARTBIN_DATABASE") {
            self.paths.database = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SMARTBIN_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// Normalize identifiers so lookups are case- and whitespace-insensitive.
    /// Idempotent; [`Config::load`] applies it, and so does the engine for
    /// configs built in code.
    pub fn normalize(&mut self) {
        for color in &mut self.bins.colors {
            *color = normalize_name(color);
        }
        self.bins.capacity_overrides = std::mem::take(&mut self.bins.capacity_overrides)
            .into_iter()
            .map(|(color, capacity)| (normalize_name(&color), capacity))
            .collect();
        self.mapping.defaults = std::mem::take(&mut self.mapping.defaults)
            .into_iter()
            .map(|(item, bin)| (normalize_name(&item), normalize_name(&bin)))
            .collect();
    }

    pub fn validate(&self) -> Result<()> {
        let catalog = self.bins.catalog()?;

        if !(self.bins.capacity_liters.is_finite() && self.bins.capacity_liters > 0.0) {
            return Err(SbinError::InvalidConfig {
                details: format!(
                    "bins.capacity_liters must be > 0, got {}",
                    self.bins.capacity_liters
                ),
            });
        }
        for (color, capacity) in &self.bins.capacity_overrides {
            if !catalog.contains(color) {
                return Err(SbinError::InvalidConfig {
                    details: format!(
                        "bins.capacity_overrides names unknown bin {color:?} (valid: {})",
                        catalog.valid_list()
                    ),
                });
            }
            if !(capacity.is_finite() && *capacity > 0.0) {
                return Err(SbinError::InvalidConfig {
                    details: format!("bins.capacity_overrides.{color} must be > 0, got {capacity}"),
                });
            }
        }
        if !(self.bins.fill_increment.is_finite() && self.bins.fill_increment > 0.0) {
            return Err(SbinError::InvalidConfig {
                details: format!(
                    "bins.fill_increment must be > 0, got {}",
                    self.bins.fill_increment
                ),
            });
        }
        if !(self.bins.needs_emptying_pct > 0.0 && self.bins.needs_emptying_pct <= 100.0) {
            return Err(SbinError::InvalidConfig {
                details: format!(
                    "bins.needs_emptying_pct must be in (0, 100], got {}",
                    self.bins.needs_emptying_pct
                ),
            });
        }

        for (item, bin) in &self.mapping.defaults {
            if item.is_empty() {
                return Err(SbinError::InvalidConfig {
                    details: "mapping.defaults contains an empty item name".to_string(),
                });
            }
            if !catalog.contains(bin) {
                return Err(SbinError::InvalidConfig {
                    details: format!(
                        "mapping.defaults.{item} targets unknown bin {bin:?} (valid: {})",
                        catalog.valid_list()
                    ),
                });
            }
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.actuator.baud_rate) {
            return Err(SbinError::InvalidConfig {
                details: format!(
                    "actuator.baud_rate {} unsupported (supported: {SUPPORTED_BAUD_RATES:?})",
                    self.actuator.baud_rate
                ),
            });
        }
        if self.actuator.enabled && self.actuator.port.trim().is_empty() {
            return Err(SbinError::InvalidConfig {
                details: "actuator.port must be set when actuator.enabled=true".to_string(),
            });
        }
        for (name, val) in [
            ("actuator.open_timeout_ms", self.actuator.open_timeout_ms),
            ("actuator.write_timeout_ms", self.actuator.write_timeout_ms),
            ("engine.enqueue_timeout_ms", self.engine.enqueue_timeout_ms),
            ("engine.sort_timeout_ms", self.engine.sort_timeout_ms),
        ] {
            if val == 0 {
                return Err(SbinError::InvalidConfig {
                    details: format!("{name} must be > 0"),
                });
            }
        }
        if self.engine.queue_capacity == 0 {
            return Err(SbinError::InvalidConfig {
                details: "engine.queue_capacity must be >= 1".to_string(),
            });
        }
        if self.engine.history_default_limit == 0 {
            return Err(SbinError::InvalidConfig {
                details: "engine.history_default_limit must be >= 1".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| SbinError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, SbinError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_mapping_matches_shipped_table() {
        let cfg = Config::default();
        assert_eq!(cfg.mapping.defaults["plastic_bottle"], "yellow");
        assert_eq!(cfg.mapping.defaults["banana_peel"], "green");
        assert_eq!(cfg.mapping.defaults["tissue"], "brown");
        assert_eq!(cfg.mapping.defaults.len(), 13);
    }

    #[test]
    fn mapping_to_unknown_bin_rejected() {
        let mut cfg = Config::default();
        cfg.mapping
            .defaults
            .insert("battery".to_string(), "red".to_string());
        let err = cfg.validate().expect_err("expected unknown bin");
        match err {
            SbinError::InvalidConfig { details } => {
                assert!(details.contains("battery"), "{details}");
                assert!(details.contains("red"), "{details}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_bins_rejected() {
        let mut cfg = Config::default();
        cfg.bins.colors.push("yellow".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut cfg = Config::default();
        cfg.bins.capacity_liters = 0.0;
        let err = cfg.validate().expect_err("expected capacity error");
        assert!(err.to_string().contains("capacity_liters"));
    }

    #[test]
    fn capacity_override_applies_per_bin() {
        let mut cfg = Config::default();
        cfg.bins
            .capacity_overrides
            .insert("green".to_string(), 20.0);
        assert!(cfg.validate().is_ok());
        assert!((cfg.bins.capacity_for("green") - 20.0).abs() < f64::EPSILON);
        assert!((cfg.bins.capacity_for("yellow") - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn capacity_override_for_unknown_bin_rejected() {
        let mut cfg = Config::default();
        cfg.bins
            .capacity_overrides
            .insert("purple".to_string(), 20.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unsupported_baud_rate_rejected() {
        let mut cfg = Config::default();
        cfg.actuator.baud_rate = 12_345;
        let err = cfg.validate().expect_err("expected baud error");
        assert!(err.to_string().contains("baud_rate"));
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut cfg = Config::default();
        cfg.engine.queue_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn needs_emptying_threshold_bounds() {
        let mut cfg = Config::default();
        cfg.bins.needs_emptying_pct = 0.0;
        assert!(cfg.validate().is_err());
        cfg.bins.needs_emptying_pct = 100.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn normalize_lowercases_mapping_and_colors() {
        let mut cfg = Config::default();
        cfg.bins.colors = vec![" Yellow".to_string(), "GREEN".to_string()];
        cfg.mapping.defaults.clear();
        cfg.mapping
            .defaults
            .insert(" Soda_Can ".to_string(), "YELLOW".to_string());
        cfg.normalize();
        assert_eq!(cfg.bins.colors, vec!["yellow", "green"]);
        assert_eq!(cfg.mapping.defaults["soda_can"], "yellow");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("SMARTBIN_ACTUATOR_ENABLED", "false"),
            ("SMARTBIN_ACTUATOR_PORT", "/dev/ttyUSB3"),
            ("SMARTBIN_ACTUATOR_SORT_DURATION_MS", "250"),
            ("SMARTBIN_BINS_CAPACITY_LITERS", "12.5"),
            ("SMARTBIN_DATABASE", "/tmp/smartbin/test.sqlite3"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");
        assert!(!cfg.actuator.enabled);
        assert_eq!(cfg.actuator.port, "/dev/ttyUSB3");
        assert_eq!(cfg.actuator.sort_duration_ms, 250);
        assert!((cfg.bins.capacity_liters - 12.5).abs() < f64::EPSILON);
        assert_eq!(
            cfg.paths.database,
            PathBuf::from("/tmp/smartbin/test.sqlite3")
        );
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("SMARTBIN_ACTUATOR_BAUD_RATE", "fast")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid number should fail");
        match err {
            SbinError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("SMARTBIN_ACTUATOR_BAUD_RATE"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn toml_sections_parse_with_defaults_for_missing_keys() {
        let raw = r#"
            [bins]
            colors = ["blue", "black"]

            [mapping.defaults]
            newspaper = "blue"

            [actuator]
            enabled = false
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.bins.colors, vec!["blue", "black"]);
        assert!((cfg.bins.fill_increment - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.mapping.defaults.len(), 1);
        assert!(!cfg.actuator.enabled);
        assert_eq!(cfg.actuator.baud_rate, 9_600);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/smartbin/config.toml")));
        assert!(matches!(result, Err(SbinError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\nqueue_capacity = 2\n").unwrap();
        let cfg = Config::load(Some(&path)).expect("load");
        assert_eq!(cfg.engine.queue_capacity, 2);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash");
        assert_eq!(before, cfg.stable_hash().expect("hash"));
        let mut modified = Config::default();
        modified.actuator.sort_duration_ms += 1;
        assert_ne!(before, modified.stable_hash().expect("hash"));
    }
}
