use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::Result;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Object id encoded in a reference file name: the part of the file stem
/// before the first underscore. Returns `None` for non-image files.
///
/// `J0412+2231_legacy.jpg` and `J0412+2231.jpg` both map to `J0412+2231`.
pub fn reference_id(file_name: &str) -> Option<&str> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    if !IMAGE_EXTENSIONS
        .iter()
        .any(|ext| ext.eq_ignore_ascii_case(extension))
    {
        return None;
    }
    let id = stem.split('_').next().unwrap_or(stem);
    (!id.is_empty()).then_some(id)
}

/// One-time id → file index over a directory of per-object images.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    directory: PathBuf,
    entries: HashMap<String, PathBuf>,
}

impl ReferenceIndex {
    /// Scans `directory` once. Files are visited in name order and the first
    /// file claiming an id keeps it.
    pub fn build(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name());
            }
        }
        names.sort();

        let mut index = Self {
            directory,
            entries: HashMap::new(),
        };
        for name in names {
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = reference_id(name) {
                let path = index.directory.join(name);
                index.register(id, path);
            }
        }
        tracing::debug!(
            directory = %index.directory.display(),
            entries = index.entries.len(),
            "built reference index"
        );
        Ok(index)
    }

    pub fn register(&mut self, id: &str, path: PathBuf) {
        if let Some(existing) = self.entries.get(id) {
            tracing::warn!(
                id,
                kept = %existing.display(),
                ignored = %path.display(),
                "duplicate reference image"
            );
            return;
        }
        self.entries.insert(id.to_string(), path);
    }

    pub fn lookup(&self, id: &str) -> Option<&Path> {
        self.entries.get(id).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
