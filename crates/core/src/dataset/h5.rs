//! Per-view HDF5 cutout files, each holding an `images` stack and the
//! matching `known_id` list.

use std::{collections::BTreeMap, path::Path, path::PathBuf};

use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};

use super::InMemoryDataset;
use crate::{AnnotateError, Result};

const IMAGES: &str = "images";
const KNOWN_ID: &str = "known_id";

/// Loads every configured view. The catalogue order comes from the
/// `known_id` dataset of `catalogue_view`; any other file that carries its
/// own `known_id` must agree with it.
pub fn load(files: &BTreeMap<String, PathBuf>, catalogue_view: &str) -> Result<InMemoryDataset> {
    let catalogue_path = files.get(catalogue_view).ok_or_else(|| {
        AnnotateError::InvalidConfig(format!(
            "sources.cutouts has no entry for the catalogue view `{catalogue_view}`"
        ))
    })?;
    let catalogue_file = open(catalogue_path)?;
    let known_ids = read_ids(&catalogue_file)
        .map_err(|err| in_file(catalogue_path, err))?
        .ok_or_else(|| {
            AnnotateError::Dataset(format!(
                "{} has no `{KNOWN_ID}` dataset",
                catalogue_path.display()
            ))
        })?;

    let mut dataset = InMemoryDataset::new(known_ids.clone());
    for (view, path) in files {
        let file = open(path)?;
        if let Some(ids) = read_ids(&file).map_err(|err| in_file(path, err))? {
            if ids != known_ids {
                return Err(AnnotateError::Dataset(format!(
                    "{}: `{KNOWN_ID}` differs from the `{catalogue_view}` catalogue",
                    path.display()
                )));
            }
        }
        let images = file
            .dataset(IMAGES)
            .and_then(|images| images.read_dyn::<f32>())
            .map_err(|err| in_file(path, err.into()))?;
        tracing::debug!(
            view = %view,
            path = %path.display(),
            shape = ?images.shape(),
            "loaded view"
        );
        dataset
            .insert_view(view.as_str(), images)
            .map_err(|err| in_file(path, err))?;
    }
    tracing::info!(objects = known_ids.len(), views = files.len(), "hdf5 cutouts loaded");
    Ok(dataset)
}

fn open(path: &Path) -> Result<hdf5::File> {
    hdf5::File::open(path).map_err(|err| in_file(path, err.into()))
}

fn in_file(path: &Path, err: AnnotateError) -> AnnotateError {
    AnnotateError::Dataset(format!("{}: {err}", path.display()))
}

/// Reads `known_id` whichever string layout it was written with. Returns
/// `None` when the file has no such dataset.
fn read_ids(file: &hdf5::File) -> Result<Option<Vec<String>>> {
    if !file.link_exists(KNOWN_ID) {
        return Ok(None);
    }
    let ids = file.dataset(KNOWN_ID)?;
    let raw: Vec<String> = if let Ok(values) = ids.read_raw::<VarLenUnicode>() {
        values.iter().map(|id| id.as_str().to_string()).collect()
    } else if let Ok(values) = ids.read_raw::<VarLenAscii>() {
        values.iter().map(|id| id.as_str().to_string()).collect()
    } else {
        ids.read_raw::<FixedAscii<256>>()?
            .iter()
            .map(|id| id.as_str().to_string())
            .collect()
    };
    Ok(Some(
        raw.into_iter()
            .map(|id| id.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::CutoutSource;

    fn write_view(dir: &TempDir, name: &str, shape: &[usize], ids: Option<&[&str]>) -> PathBuf {
        let path = dir.path().join(format!("{name}.h5"));
        let file = hdf5::File::create(&path).unwrap();
        let images = ArrayD::from_shape_fn(IxDyn(shape), |idx| idx[0] as f32);
        file.new_dataset_builder()
            .with_data(&images)
            .create(IMAGES)
            .unwrap();
        if let Some(ids) = ids {
            let ids: Vec<VarLenUnicode> = ids.iter().map(|id| id.parse().unwrap()).collect();
            file.new_dataset_builder()
                .with_data(ids.as_slice())
                .create(KNOWN_ID)
                .unwrap();
        }
        path
    }

    #[test]
    fn loads_views_in_catalogue_order() {
        let dir = TempDir::new().unwrap();
        let mut files = BTreeMap::new();
        files.insert(
            "native".to_string(),
            write_view(&dir, "native", &[2, 3, 4, 4], Some(&["J01", "J02"])),
        );
        files.insert(
            "r_band_binned_2x2".to_string(),
            write_view(&dir, "r_band", &[2, 4, 4], None),
        );

        let dataset = load(&files, "native").unwrap();
        assert_eq!(dataset.catalogue_ids(), vec!["J01", "J02"]);
        assert_eq!(dataset.cutout("native", 1).unwrap().shape(), &[3, 4, 4]);
        let second = dataset.cutout("r_band_binned_2x2", 1).unwrap();
        assert!(second.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn fixed_length_ids_are_trimmed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("native.h5");
        let file = hdf5::File::create(&path).unwrap();
        file.new_dataset_builder()
            .with_data(&ArrayD::<f32>::zeros(IxDyn(&[2, 4, 4])))
            .create(IMAGES)
            .unwrap();
        let ids = [
            FixedAscii::<8>::from_ascii(b"J01").unwrap(),
            FixedAscii::<8>::from_ascii(b"J02 ").unwrap(),
        ];
        file.new_dataset_builder()
            .with_data(ids.as_slice())
            .create(KNOWN_ID)
            .unwrap();
        drop(file);

        let files = BTreeMap::from([("native".to_string(), path)]);
        let dataset = load(&files, "native").unwrap();
        assert_eq!(dataset.catalogue_ids(), vec!["J01", "J02"]);
    }

    #[test]
    fn disagreeing_ids_and_missing_catalogue_are_refused() {
        let dir = TempDir::new().unwrap();
        let mut files = BTreeMap::new();
        files.insert(
            "native".to_string(),
            write_view(&dir, "native", &[2, 3, 4, 4], Some(&["J01", "J02"])),
        );
        files.insert(
            "binned_2x2".to_string(),
            write_view(&dir, "binned", &[2, 3, 2, 2], Some(&["J01", "J09"])),
        );

        let err = load(&files, "native").unwrap_err();
        assert!(format!("{err}").contains("binned.h5"));
        assert!(matches!(
            load(&files, "binned_smoothed"),
            Err(AnnotateError::InvalidConfig(_))
        ));
    }
}
