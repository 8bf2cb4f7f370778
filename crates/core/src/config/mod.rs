//! Layered configuration for annotation sessions.
//!
//! Sources, highest priority first:
//! 1. Environment variables prefixed `DWARF_ANNOTATE_` (`__` separates
//!    sections, e.g. `DWARF_ANNOTATE_QUEUE__SEED=7`)
//! 2. An optional TOML file
//! 3. Built-in defaults

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{compositor::GridLayout, AnnotateError, Result};

const ENV_PREFIX: &str = "DWARF_ANNOTATE_";

/// The six views shown for each object, in grid order.
pub const DEFAULT_VIEWS: [&str; 6] = [
    "native",
    "binned_2x2",
    "binned_smoothed",
    "r_band_binned_2x2",
    "legacy_context",
    "legacy_enhanced",
];

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

impl AppConfig {
    /// Loads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=GridLayout::MAX_CELL_SIZE).contains(&self.display.cell_size) {
            return Err(AnnotateError::InvalidConfig(format!(
                "display.cell_size must be between 1 and {}",
                GridLayout::MAX_CELL_SIZE
            )));
        }
        if self.display.spacing > GridLayout::MAX_SPACING {
            return Err(AnnotateError::InvalidConfig(format!(
                "display.spacing must be at most {}",
                GridLayout::MAX_SPACING
            )));
        }
        let cells = GridLayout::slots();
        if self.display.views.len() > cells {
            return Err(AnnotateError::InvalidConfig(format!(
                "{} views configured but the grid only has {cells} cells",
                self.display.views.len()
            )));
        }
        let mut seen = HashSet::new();
        for view in &self.display.views {
            if !seen.insert(view.as_str()) {
                return Err(AnnotateError::InvalidConfig(format!(
                    "view `{view}` is listed more than once"
                )));
            }
        }
        if self.store.lock_timeout_ms == 0 {
            return Err(AnnotateError::InvalidConfig(
                "store.lock_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Where the label store lives and how long a commit may wait for its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub lock_timeout_ms: u64,
    pub lock_retry_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("classification_results.csv"),
            lock_timeout_ms: 10_000,
            lock_retry_ms: 50,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms.max(1))
    }
}

/// Which primary outcomes go on to the auxiliary-tag question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxiliaryPolicy {
    /// Never asked; the `auxiliary_tag` column is left out of the store.
    Disabled,
    DwarfOnly,
    #[default]
    MaybeAndDwarf,
}

impl AuxiliaryPolicy {
    pub fn stores_column(self) -> bool {
        self != Self::Disabled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    pub with_morphology: bool,
    pub auxiliary: AuxiliaryPolicy,
    /// Re-check under the store lock that a row is still incomplete before
    /// overwriting it.
    pub reject_stale_commits: bool,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            with_morphology: true,
            auxiliary: AuxiliaryPolicy::default(),
            reject_stale_commits: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            shuffle: true,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub cell_size: u32,
    pub spacing: u32,
    pub show_object_id: bool,
    pub views: Vec<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            cell_size: 256,
            spacing: 10,
            show_object_id: false,
            views: DEFAULT_VIEWS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl DisplayConfig {
    pub fn layout(&self) -> GridLayout {
        GridLayout::new(self.cell_size, self.spacing)
    }
}

/// Inputs the compositor reads from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// JSON cutout dataset.
    pub dataset: Option<PathBuf>,
    /// View name to an HDF5 file with `images` and `known_id` datasets.
    /// Takes precedence over `dataset` when non-empty.
    pub cutouts: BTreeMap<String, PathBuf>,
    /// View whose `known_id` defines the catalogue order.
    pub catalogue_view: String,
    /// View name to a directory holding one reference image per object.
    pub references: BTreeMap<String, PathBuf>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            dataset: None,
            cutouts: BTreeMap::new(),
            catalogue_view: "native".to_string(),
            references: BTreeMap::new(),
        }
    }
}
