//! Read-only access to per-object cutout arrays, addressed by view name.

use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::{config::SourcesConfig, AnnotateError, Result};

#[cfg(feature = "hdf5")]
mod h5;

/// Source of cutout arrays for the compositor.
///
/// Multi-band views yield `(bands, height, width)` arrays, single-band views
/// `(height, width)`. Implementations own nothing the core depends on beyond
/// answering lookups.
pub trait CutoutSource: Send + Sync {
    /// Number of catalogued objects.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Catalogue id of the object at `index`.
    fn object_id(&self, index: usize) -> Option<&str>;

    fn has_view(&self, view: &str) -> bool;

    fn cutout(&self, view: &str, index: usize) -> Result<ArrayD<f32>>;

    /// Every catalogue id, in order.
    fn catalogue_ids(&self) -> Vec<String> {
        (0..self.len())
            .filter_map(|index| self.object_id(index).map(str::to_string))
            .collect()
    }
}

/// Cutouts held in memory as one stacked array per view, with the object
/// index on the leading axis.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    known_ids: Vec<String>,
    views: HashMap<String, ArrayD<f32>>,
}

impl InMemoryDataset {
    pub fn new(known_ids: Vec<String>) -> Self {
        Self {
            known_ids,
            views: HashMap::new(),
        }
    }

    /// Registers a stacked view. The leading axis must match the catalogue
    /// and each cutout must be 2-D or 3-D.
    pub fn insert_view(&mut self, name: impl Into<String>, stacked: ArrayD<f32>) -> Result<()> {
        let name = name.into();
        let shape = stacked.shape();
        if !(3..=4).contains(&shape.len()) {
            return Err(AnnotateError::Dataset(format!(
                "view `{name}` has shape {shape:?}; expected (objects, height, width) \
                 or (objects, bands, height, width)"
            )));
        }
        if shape[0] != self.known_ids.len() {
            return Err(AnnotateError::Dataset(format!(
                "view `{name}` holds {} cutouts but the catalogue has {} objects",
                shape[0],
                self.known_ids.len()
            )));
        }
        self.views.insert(name, stacked);
        Ok(())
    }

    pub fn with_view(mut self, name: impl Into<String>, stacked: ArrayD<f32>) -> Result<Self> {
        self.insert_view(name, stacked)?;
        Ok(self)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let parsed: DatasetFile = serde_json::from_reader(BufReader::new(file))?;
        parsed.into_dataset()
    }
}

impl CutoutSource for InMemoryDataset {
    fn len(&self) -> usize {
        self.known_ids.len()
    }

    fn object_id(&self, index: usize) -> Option<&str> {
        self.known_ids.get(index).map(String::as_str)
    }

    fn has_view(&self, view: &str) -> bool {
        self.views.contains_key(view)
    }

    fn cutout(&self, view: &str, index: usize) -> Result<ArrayD<f32>> {
        let stacked = self
            .views
            .get(view)
            .ok_or_else(|| AnnotateError::Dataset(format!("no view named `{view}`")))?;
        let len = stacked.len_of(Axis(0));
        if index >= len {
            return Err(AnnotateError::IndexOutOfRange { index, len });
        }
        Ok(stacked.index_axis(Axis(0), index).to_owned())
    }
}

/// Loads the configured cutouts. HDF5 files listed under `sources.cutouts`
/// win over a JSON `sources.dataset`.
pub fn load_configured(sources: &SourcesConfig) -> Result<InMemoryDataset> {
    if !sources.cutouts.is_empty() {
        return load_cutouts(sources);
    }
    let path = sources.dataset.as_deref().ok_or_else(|| {
        AnnotateError::InvalidConfig(
            "either sources.cutouts or sources.dataset must name cutout data".into(),
        )
    })?;
    tracing::info!(path = %path.display(), "loading json dataset");
    InMemoryDataset::from_json_file(path)
}

#[cfg(feature = "hdf5")]
fn load_cutouts(sources: &SourcesConfig) -> Result<InMemoryDataset> {
    h5::load(&sources.cutouts, &sources.catalogue_view)
}

#[cfg(not(feature = "hdf5"))]
fn load_cutouts(_sources: &SourcesConfig) -> Result<InMemoryDataset> {
    Err(AnnotateError::InvalidConfig(
        "sources.cutouts needs a build with the `hdf5` feature".into(),
    ))
}

/// On-disk JSON layout. NaN pixels are written as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub known_id: Vec<String>,
    #[serde(default)]
    pub views: HashMap<String, StackedView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedView {
    pub shape: Vec<usize>,
    pub data: Vec<Option<f32>>,
}

impl DatasetFile {
    pub fn into_dataset(self) -> Result<InMemoryDataset> {
        let mut dataset = InMemoryDataset::new(self.known_id);
        for (name, view) in self.views {
            let data: Vec<f32> = view
                .data
                .into_iter()
                .map(|value| value.unwrap_or(f32::NAN))
                .collect();
            let stacked = ArrayD::from_shape_vec(IxDyn(&view.shape), data).map_err(|err| {
                AnnotateError::Dataset(format!("view `{name}` does not match its shape: {err}"))
            })?;
            dataset.insert_view(name, stacked)?;
        }
        Ok(dataset)
    }
}
