//! Classification resolver: item name → bin.
//!
//! Resolution walks a fixed chain of tagged sources, learned mappings first
//! and the static default table second, then optionally asks an operator.
//! Anything freshly resolved is written back to the store so the learned
//! mapping wins on every later lookup.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classify::prompt::BinPrompter;
use crate::core::bins::{BinCatalog, BinColor, normalize_name};
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::store::{DetectionRecord, Store};
use crate::store::sqlite::require_item_name;

/// Whether a human may be asked when nothing else resolves an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    /// Never ask; unknown items stay unresolved.
    Auto,
    /// Ask the operator for items neither the store nor the defaults know.
    Interactive,
}

impl ResolveMode {
    /// Map the collaborator-facing `auto_mode` flag.
    pub const fn from_auto_flag(auto_mode: bool) -> Self {
        if auto_mode {
            Self::Auto
        } else {
            Self::Interactive
        }
    }
}

/// Non-interactive sources, in the order they are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupSource {
    Learned,
    StaticDefault,
}

/// The lookup chain. Learned mappings always shadow the defaults.
pub const LOOKUP_CHAIN: [LookupSource; 2] = [LookupSource::Learned, LookupSource::StaticDefault];

/// Where a resolved bin came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Learned,
    StaticDefault,
    Operator,
}

impl ResolutionSource {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Learned => "learned",
            Self::StaticDefault => "static_default",
            Self::Operator => "operator",
        }
    }
}

impl From<LookupSource> for ResolutionSource {
    fn from(value: LookupSource) -> Self {
        match value {
            LookupSource::Learned => Self::Learned,
            LookupSource::StaticDefault => Self::StaticDefault,
        }
    }
}

/// Outcome of resolving one item. `Unresolved` is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        item_name: String,
        bin: BinColor,
        source: ResolutionSource,
    },
    Unresolved {
        item_name: String,
    },
}

impl Resolution {
    pub fn bin(&self) -> Option<&BinColor> {
        match self {
            Self::Resolved { bin, .. } => Some(bin),
            Self::Unresolved { .. } => None,
        }
    }

    pub fn item_name(&self) -> &str {
        match self {
            Self::Resolved { item_name, .. } | Self::Unresolved { item_name } => item_name,
        }
    }
}

/// Decides bins for item names against a store and the static defaults.
#[derive(Debug, Clone)]
pub struct Resolver {
    catalog: BinCatalog,
    defaults: BTreeMap<String, BinColor>,
}

impl Resolver {
    pub fn new(config: &Config) -> Result<Self> {
        let catalog = config.bins.catalog()?;
        let mut defaults = BTreeMap::new();
        for (item, bin) in &config.mapping.defaults {
            defaults.insert(normalize_name(item), catalog.parse(bin)?);
        }
        Ok(Self { catalog, defaults })
    }

    pub fn catalog(&self) -> &BinCatalog {
        &self.catalog
    }

    /// Static default for an already-normalized name.
    pub fn static_bin(&self, item_name: &str) -> Option<&BinColor> {
        self.defaults.get(item_name)
    }

    /// Walk [`LOOKUP_CHAIN`] without writing anything.
    pub fn lookup(&self, store: &Store, item_name: &str) -> Result<Option<(BinColor, LookupSource)>> {
        let name = normalize_name(item_name);
        for source in LOOKUP_CHAIN {
            let hit = match source {
                LookupSource::Learned => store.lookup_bin(&name)?,
                LookupSource::StaticDefault => self.static_bin(&name).cloned(),
            };
            if let Some(bin) = hit {
                return Ok(Some((bin, source)));
            }
        }
        Ok(None)
    }

    /// Persist the consequence of a resolution and return the bin and
    /// source that actually stand.
    ///
    /// A mapping already on record wins over a static default (only its
    /// usage is counted), even one taught after [`Resolver::lookup`] ran.
    /// An operator answer replaces whatever is on record.
    pub fn learn(
        &self,
        store: &mut Store,
        item_name: &str,
        bin: &BinColor,
        source: ResolutionSource,
    ) -> Result<(BinColor, ResolutionSource)> {
        if source == ResolutionSource::Operator {
            let entry = store.upsert_classification(item_name, bin.as_str())?;
            return Ok((entry.bin_color, source));
        }
        let (bin, was_learned) = store.adopt_classification(item_name, bin.as_str())?;
        Ok((bin, settled_source(source, was_learned)))
    }

    /// [`Resolver::learn`] plus the detection, committed together: if the
    /// detection cannot be recorded nothing is learned either.
    pub fn record(
        &self,
        store: &mut Store,
        item_name: &str,
        bin: &BinColor,
        source: ResolutionSource,
        confidence: f64,
    ) -> Result<(ResolutionSource, DetectionRecord)> {
        let classified = store.record_classified(
            item_name,
            bin.as_str(),
            source == ResolutionSource::Operator,
            confidence,
        )?;
        Ok((
            settled_source(source, classified.was_learned),
            classified.detection,
        ))
    }

    /// Resolve and learn in one step against a single-owner store.
    pub fn resolve<P: BinPrompter + ?Sized>(
        &self,
        store: &mut Store,
        item_name: &str,
        mode: ResolveMode,
        prompter: &mut P,
    ) -> Result<Resolution> {
        let name = require_item_name(item_name)?;
        let found = self.lookup(store, &name)?;
        match self.decide(name, found, mode, prompter) {
            Resolution::Resolved {
                item_name,
                bin,
                source,
            } => {
                let (bin, source) = self.learn(store, &item_name, &bin, source)?;
                Ok(Resolution::Resolved {
                    item_name,
                    bin,
                    source,
                })
            }
            unresolved @ Resolution::Unresolved { .. } => Ok(unresolved),
        }
    }

    /// Turn a lookup result into a resolution, asking the operator if the
    /// mode allows it. Writes nothing.
    pub fn decide<P: BinPrompter + ?Sized>(
        &self,
        item_name: String,
        found: Option<(BinColor, LookupSource)>,
        mode: ResolveMode,
        prompter: &mut P,
    ) -> Resolution {
        if let Some((bin, source)) = found {
            return Resolution::Resolved {
                item_name,
                bin,
                source: source.into(),
            };
        }
        if mode == ResolveMode::Interactive
            && let Some(choice) = prompter.choose_bin(&item_name, self.catalog.colors())
            && let Ok(bin) = self.catalog.parse(choice.as_str())
        {
            return Resolution::Resolved {
                item_name,
                bin,
                source: ResolutionSource::Operator,
            };
        }
        Resolution::Unresolved { item_name }
    }
}

fn settled_source(source: ResolutionSource, was_learned: bool) -> ResolutionSource {
    if was_learned {
        ResolutionSource::Learned
    } else {
        source
    }
}
