//! Core library for the dwarf-galaxy cutout annotator.
//!
//! A reviewer walks the not-yet-labelled objects of a catalogue, looks at a
//! composite of several renderings of each cutout and answers a short
//! question flow. Each module owns one piece of that loop: the shared CSV
//! label store and its lock, the work queue, the answer state machine, the
//! image compositor and the session that ties them together.

pub mod compositor;
pub mod config;
pub mod dataset;
pub mod error;
pub mod labeling;
pub mod queue;
pub mod record;
pub mod session;
pub mod store;

pub use compositor::{
    CellReport, CellStatus, CompositeFrame, GridLayout, ImageCompositor, ReferenceIndex,
};
pub use config::{
    AppConfig, AuxiliaryPolicy, DisplayConfig, LabelingConfig, SourcesConfig, StoreConfig,
};
pub use dataset::{load_configured, CutoutSource, InMemoryDataset};
pub use error::{AnnotateError, Result};
pub use labeling::{AnswerEvent, InteractionState, LabelingStateMachine, Stage, Step};
pub use queue::WorkQueue;
pub use record::{AuxiliaryTag, LabelDecision, Morphology, ObjectRecord, PrimaryLabel};
pub use session::{Outcome, Progress, Session};
pub use store::{LabelStore, StoreLock};
