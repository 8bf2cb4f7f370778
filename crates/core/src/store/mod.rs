//! Durable, crash-safe label store.
//!
//! One comma-delimited row per catalogue object, in catalogue order. Every
//! mutation runs under an exclusive sidecar lock as a full
//! read → verify → rewrite-to-temp → rename cycle, so readers only ever see
//! a complete old file or a complete new one.

mod lock;

use std::{
    ffi::OsString,
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    config::{AuxiliaryPolicy, LabelingConfig, StoreConfig},
    record::ObjectRecord,
    AnnotateError, Result,
};

pub use lock::StoreLock;

const HEADER: [&str; 5] = [
    "object_id",
    "primary_label",
    "morphology",
    "auxiliary_tag",
    "comment",
];
const HEADER_WITHOUT_AUXILIARY: [&str; 4] = ["object_id", "primary_label", "morphology", "comment"];

/// Handle on one backing store file plus its lock and temp siblings.
#[derive(Debug, Clone)]
pub struct LabelStore {
    path: PathBuf,
    lock_path: PathBuf,
    temp_path: PathBuf,
    with_morphology: bool,
    with_auxiliary: bool,
    lock_timeout: Duration,
    lock_retry: Duration,
}

impl LabelStore {
    pub fn new(store: &StoreConfig, labeling: &LabelingConfig) -> Self {
        Self::with_options(
            &store.path,
            labeling.with_morphology,
            labeling.auxiliary,
            store.lock_timeout(),
            store.lock_retry(),
        )
    }

    pub fn with_options(
        path: impl AsRef<Path>,
        with_morphology: bool,
        auxiliary: AuxiliaryPolicy,
        lock_timeout: Duration,
        lock_retry: Duration,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            lock_path: sibling(&path, ".lock"),
            temp_path: sibling(&path, ".tmp"),
            path,
            with_morphology,
            with_auxiliary: auxiliary.stores_column(),
            lock_timeout,
            lock_retry,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Creates the store with one blank row per id. Returns `false` without
    /// touching anything if the store already exists.
    pub fn initialize<S: AsRef<str>>(&self, catalogue_ids: &[S]) -> Result<bool> {
        let _lock = self.lock()?;
        if self.exists() {
            tracing::debug!(store = %self.path.display(), "label store already present");
            return Ok(false);
        }

        let rows: Vec<ObjectRecord> = catalogue_ids
            .iter()
            .map(|id| ObjectRecord::blank(id.as_ref()))
            .collect();
        let staged = self.stage_replacement(&rows)?;
        self.publish(&staged)?;
        tracing::info!(
            store = %self.path.display(),
            rows = rows.len(),
            "created label store"
        );
        Ok(true)
    }

    /// Reads every row in catalogue order.
    pub fn read_all(&self) -> Result<Vec<ObjectRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;
        let mut records = reader.records();

        let header = match records.next() {
            Some(header) => header?,
            None => return Err(self.malformed("missing header row")),
        };
        let expected = self.header();
        if header.iter().map(str::trim).ne(expected.iter().copied()) {
            return Err(self.malformed(format!(
                "header `{}` does not match expected `{}`",
                header.iter().collect::<Vec<_>>().join(","),
                expected.join(",")
            )));
        }

        let mut rows = Vec::new();
        for (index, record) in records.enumerate() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("").to_string();
            let object_id = field(0);
            if object_id.trim().is_empty() {
                return Err(self.malformed(format!("row {index} has no object id")));
            }
            let row = if self.with_auxiliary {
                ObjectRecord {
                    object_id,
                    primary_label: field(1),
                    morphology: field(2),
                    auxiliary_tag: field(3),
                    comment: field(4),
                }
            } else {
                ObjectRecord {
                    object_id,
                    primary_label: field(1),
                    morphology: field(2),
                    auxiliary_tag: String::new(),
                    comment: field(3),
                }
            };
            rows.push(row);
        }
        Ok(rows)
    }

    /// Row at `index`, read fresh from disk.
    pub fn row(&self, index: usize) -> Result<ObjectRecord> {
        let mut rows = self.read_all()?;
        let len = rows.len();
        if index >= len {
            return Err(AnnotateError::IndexOutOfRange { index, len });
        }
        Ok(rows.swap_remove(index))
    }

    /// Checks that the store holds exactly one row per catalogue id, in
    /// catalogue order.
    pub fn verify_catalogue<S: AsRef<str>>(&self, catalogue_ids: &[S]) -> Result<()> {
        let rows = self.read_all()?;
        if rows.len() != catalogue_ids.len() {
            return Err(self.malformed(format!(
                "holds {} rows but the catalogue has {} objects",
                rows.len(),
                catalogue_ids.len()
            )));
        }
        for (index, (row, expected)) in rows.iter().zip(catalogue_ids).enumerate() {
            if row.object_id != expected.as_ref() {
                return Err(AnnotateError::Consistency {
                    index,
                    expected: expected.as_ref().to_string(),
                    found: row.object_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Positions of every row that does not yet satisfy the completion
    /// invariant, in catalogue order.
    pub fn scan(&self) -> Result<Vec<usize>> {
        Ok(self
            .read_all()?
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.is_complete(self.with_morphology))
            .map(|(index, _)| index)
            .collect())
    }

    /// Number of complete rows. Progress display only.
    pub fn count_complete(&self) -> Result<usize> {
        Ok(self
            .read_all()?
            .iter()
            .filter(|row| row.is_complete(self.with_morphology))
            .count())
    }

    /// Atomically overwrites the row at `index`.
    ///
    /// Fails with [`AnnotateError::Consistency`] if the stored id at `index`
    /// is not `record.object_id`, and with [`AnnotateError::LockTimeout`] if
    /// another writer holds the store too long. The store is untouched on
    /// any failure.
    pub fn commit(&self, index: usize, record: &ObjectRecord) -> Result<()> {
        self.commit_checked(index, record, false)
    }

    /// Like [`commit`](Self::commit), but also fails with
    /// [`AnnotateError::StaleCommit`] if the row was completed since the
    /// caller last looked.
    pub fn commit_if_incomplete(&self, index: usize, record: &ObjectRecord) -> Result<()> {
        self.commit_checked(index, record, true)
    }

    fn commit_checked(
        &self,
        index: usize,
        record: &ObjectRecord,
        reject_complete: bool,
    ) -> Result<()> {
        let _lock = self.lock()?;
        let mut rows = self.read_all()?;
        let len = rows.len();
        let Some(existing) = rows.get_mut(index) else {
            return Err(AnnotateError::IndexOutOfRange { index, len });
        };

        if existing.object_id != record.object_id {
            return Err(AnnotateError::Consistency {
                index,
                expected: record.object_id.clone(),
                found: existing.object_id.clone(),
            });
        }
        if reject_complete && existing.is_complete(self.with_morphology) {
            return Err(AnnotateError::StaleCommit {
                index,
                object_id: record.object_id.clone(),
            });
        }

        *existing = record.clone();
        if !self.with_auxiliary {
            existing.auxiliary_tag.clear();
        }
        let staged = self.stage_replacement(&rows)?;
        self.publish(&staged)?;
        tracing::info!(
            index,
            object_id = %record.object_id,
            label = %record.primary_label,
            morphology = %record.morphology,
            "committed label"
        );
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.lock_path, self.lock_timeout, self.lock_retry)
    }

    /// Writes the complete replacement file next to the store and syncs it.
    /// Nothing a reader can see changes until [`publish`](Self::publish).
    fn stage_replacement(&self, rows: &[ObjectRecord]) -> Result<PathBuf> {
        let file = File::create(&self.temp_path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(self.header())?;
        for row in rows {
            writer.write_record(self.fields(row))?;
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        Ok(self.temp_path.clone())
    }

    fn publish(&self, staged: &Path) -> Result<()> {
        std::fs::rename(staged, &self.path)?;
        Ok(())
    }

    fn header(&self) -> &'static [&'static str] {
        if self.with_auxiliary {
            &HEADER
        } else {
            &HEADER_WITHOUT_AUXILIARY
        }
    }

    fn fields<'a>(&self, row: &'a ObjectRecord) -> Vec<&'a str> {
        let mut fields = vec![
            row.object_id.as_str(),
            row.primary_label.as_str(),
            row.morphology.as_str(),
        ];
        if self.with_auxiliary {
            fields.push(row.auxiliary_tag.as_str());
        }
        fields.push(row.comment.as_str());
        fields
    }

    fn malformed(&self, reason: impl Into<String>) -> AnnotateError {
        AnnotateError::MalformedStore {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("labels"));
    name.push(suffix);
    path.with_file_name(name)
}
