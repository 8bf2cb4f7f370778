use std::{path::PathBuf, time::Duration};

/// Result alias that carries the custom [`AnnotateError`] type.
pub type Result<T> = std::result::Result<T, AnnotateError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    /// Wrapper around standard IO errors. Store and initialization failures
    /// end up here and are fatal.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("label store codec error: {0}")]
    Csv(#[from] csv::Error),
    #[error("label store `{}` is malformed: {reason}", .path.display())]
    MalformedStore { path: PathBuf, reason: String },
    /// The row at `index` belongs to a different object than the caller
    /// expected. The catalogue and the store have drifted apart.
    #[error(
        "id mismatch at row {index}: expected `{expected}`, found `{found}`; \
         the dataset and the label store are out of alignment"
    )]
    Consistency {
        index: usize,
        expected: String,
        found: String,
    },
    /// Another writer held the store lock for longer than the configured wait.
    #[error("timed out after {waited:?} waiting for store lock `{}`", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
    /// The row was completed by another session after this session's queue
    /// was built.
    #[error("object `{object_id}` at row {index} was already classified by another session")]
    StaleCommit { index: usize, object_id: String },
    #[error("index {index} is outside the catalogue of {len} objects")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("all objects have been classified; no further answers are accepted")]
    SessionComplete,
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl AnnotateError {
    /// Whether the failed operation can be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Whether the failure is confined to one commit attempt. The store is
    /// untouched and the session can carry on with another object.
    pub fn is_commit_scoped(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::Consistency { .. } | Self::StaleCommit { .. }
        )
    }
}

#[cfg(feature = "hdf5")]
impl From<hdf5::Error> for AnnotateError {
    fn from(value: hdf5::Error) -> Self {
        Self::Dataset(value.to_string())
    }
}

impl From<serde_json::Error> for AnnotateError {
    fn from(value: serde_json::Error) -> Self {
        Self::Dataset(value.to_string())
    }
}
