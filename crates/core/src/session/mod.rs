//! One reviewer's pass over the incomplete part of the catalogue.

use std::sync::Arc;

use crate::{
    compositor::{CompositeFrame, ImageCompositor},
    config::AppConfig,
    dataset::CutoutSource,
    labeling::{AnswerEvent, InteractionState, LabelingStateMachine, Step},
    queue::WorkQueue,
    record::ObjectRecord,
    store::LabelStore,
    AnnotateError, Result,
};

/// What a handled answer event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The pending answers changed.
    Updated,
    /// The event does not apply in the current stage.
    Ignored,
    /// The decision was written and the queue moved on.
    Committed { index: usize, object_id: String },
    /// Another session completed the object first; the pending answers were
    /// discarded and the queue moved on.
    Skipped { index: usize, object_id: String },
}

/// Plain progress values for a presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub complete: usize,
    pub total: usize,
    /// Position within this session's queue.
    pub position: usize,
    pub remaining: usize,
    pub current: Option<String>,
}

impl Progress {
    pub fn title(&self, show_object_id: bool) -> String {
        let Some(current) = &self.current else {
            return "All images classified!".to_string();
        };
        let n = (self.complete + 1).min(self.total);
        if show_object_id {
            format!("Classifying {current} ({n}/{})", self.total)
        } else {
            format!("Classifying object {n}/{}", self.total)
        }
    }
}

pub struct Session {
    store: LabelStore,
    queue: WorkQueue,
    machine: LabelingStateMachine,
    compositor: ImageCompositor,
    catalogue: Vec<String>,
    state: InteractionState,
    reject_stale_commits: bool,
}

impl Session {
    /// Initializes the store if needed, checks it still matches the dataset
    /// catalogue row for row, then queues every incomplete object. Reference
    /// directories named in the config are indexed once.
    pub fn open(config: &AppConfig, dataset: Arc<dyn CutoutSource>) -> Result<Self> {
        let compositor =
            ImageCompositor::from_config(&config.display, &config.sources, dataset.clone())?;
        Self::with_compositor(config, dataset, compositor)
    }

    pub fn with_compositor(
        config: &AppConfig,
        dataset: Arc<dyn CutoutSource>,
        compositor: ImageCompositor,
    ) -> Result<Self> {
        let catalogue = dataset.catalogue_ids();
        let store = LabelStore::new(&config.store, &config.labeling);
        store.initialize(&catalogue)?;

        store.verify_catalogue(&catalogue)?;

        let incomplete = store.scan()?;
        let queue = WorkQueue::build(&incomplete, config.queue.shuffle, config.queue.seed);
        let complete = catalogue.len() - incomplete.len();
        tracing::info!(
            total = catalogue.len(),
            complete,
            queued = queue.len(),
            "session opened"
        );

        Ok(Self {
            store,
            queue,
            machine: LabelingStateMachine::new(&config.labeling),
            compositor,
            catalogue,
            state: InteractionState::default(),
            reject_stale_commits: config.labeling.reject_stale_commits,
        })
    }

    pub fn store(&self) -> &LabelStore {
        &self.store
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    /// Catalogue index of the object under review.
    pub fn current(&self) -> Option<usize> {
        self.queue.current()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current()
            .and_then(|index| self.catalogue.get(index))
            .map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.queue.is_exhausted()
    }

    pub fn render_current(&self) -> Result<CompositeFrame> {
        let index = self.current().ok_or(AnnotateError::SessionComplete)?;
        self.compositor.render(index)
    }

    pub fn render(&self, index: usize) -> Result<CompositeFrame> {
        self.compositor.render(index)
    }

    /// Reads the completed count from the store, so commits made by other
    /// sessions show up too.
    pub fn progress(&self) -> Result<Progress> {
        Ok(Progress {
            complete: self.store.count_complete()?,
            total: self.catalogue.len(),
            position: self.queue.position(),
            remaining: self.queue.remaining(),
            current: self.current_id().map(str::to_string),
        })
    }

    /// Moves past the current object without writing anything.
    pub fn skip(&mut self) -> Result<usize> {
        let index = self.current().ok_or(AnnotateError::SessionComplete)?;
        tracing::info!(index, "skipped without a decision");
        self.finish_current();
        Ok(index)
    }

    /// Feeds one answer event to the current object.
    ///
    /// Fails with [`AnnotateError::SessionComplete`] once the queue is
    /// exhausted. A failed commit leaves the pending answers in place so the
    /// caller can retry.
    pub fn handle(&mut self, event: AnswerEvent) -> Result<Outcome> {
        let index = self.current().ok_or(AnnotateError::SessionComplete)?;
        match self.machine.step(&self.state, event) {
            Step::Updated(state) => {
                self.state = state;
                Ok(Outcome::Updated)
            }
            Step::Ignored => Ok(Outcome::Ignored),
            Step::Complete(decision) => {
                let object_id = self
                    .catalogue
                    .get(index)
                    .cloned()
                    .ok_or(AnnotateError::IndexOutOfRange {
                        index,
                        len: self.catalogue.len(),
                    })?;
                let record = ObjectRecord::from_decision(object_id.clone(), &decision);
                let committed = if self.reject_stale_commits {
                    self.store.commit_if_incomplete(index, &record)
                } else {
                    self.store.commit(index, &record)
                };

                match committed {
                    Ok(()) => {
                        self.finish_current();
                        Ok(Outcome::Committed { index, object_id })
                    }
                    Err(AnnotateError::StaleCommit { .. }) => {
                        tracing::warn!(
                            index,
                            object_id = object_id.as_str(),
                            "object already labelled elsewhere, skipping"
                        );
                        self.finish_current();
                        Ok(Outcome::Skipped { index, object_id })
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    fn finish_current(&mut self) {
        self.queue.advance();
        self.state = InteractionState::default();
        if self.queue.is_exhausted() {
            tracing::info!(total = self.catalogue.len(), "queue exhausted");
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        dataset::InMemoryDataset,
        record::{AuxiliaryTag, Morphology, PrimaryLabel},
    };

    fn config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.store.path = dir.join("labels.csv");
        config.queue.shuffle = false;
        config.display.cell_size = 60;
        config.display.views = vec!["r_band_binned_2x2".into()];
        config
    }

    fn dataset(ids: &[&str]) -> Arc<dyn CutoutSource> {
        let stacked = ArrayD::from_shape_fn(IxDyn(&[ids.len(), 8, 8]), |idx| {
            (idx[1] * 8 + idx[2]) as f32
        });
        let dataset = InMemoryDataset::new(ids.iter().map(|id| id.to_string()).collect())
            .with_view("r_band_binned_2x2", stacked)
            .unwrap();
        Arc::new(dataset)
    }

    #[test]
    fn walks_queue_and_refuses_events_afterwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::open(&config(dir.path()), dataset(&["a", "b"])).unwrap();
        assert_eq!(session.progress().unwrap().title(true), "Classifying a (1/2)");

        assert_eq!(
            session.handle(AnswerEvent::Primary(PrimaryLabel::NotDwarf)).unwrap(),
            Outcome::Updated
        );
        assert_eq!(
            session.handle(AnswerEvent::Confirm).unwrap(),
            Outcome::Committed {
                index: 0,
                object_id: "a".into()
            }
        );
        assert_eq!(session.state(), &InteractionState::default());
        assert_eq!(session.progress().unwrap().title(false), "Classifying object 2/2");

        for event in [
            AnswerEvent::Primary(PrimaryLabel::Dwarf),
            AnswerEvent::Morphology(Morphology::DE),
            AnswerEvent::Auxiliary(AuxiliaryTag::GlobularClusters),
        ] {
            session.handle(event).unwrap();
        }
        session.handle(AnswerEvent::Confirm).unwrap();

        assert!(session.is_complete());
        assert_eq!(session.progress().unwrap().title(true), "All images classified!");
        assert!(matches!(
            session.handle(AnswerEvent::Confirm),
            Err(AnnotateError::SessionComplete)
        ));
        assert!(matches!(
            session.render_current(),
            Err(AnnotateError::SessionComplete)
        ));

        let row = session.store().row(1).unwrap();
        assert_eq!(row.primary_label, "1");
        assert_eq!(row.morphology, "dE");
        assert_eq!(row.auxiliary_tag, "gc");
    }

    #[test]
    fn reopening_only_queues_what_is_left() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        {
            let mut session = Session::open(&config, dataset(&["a", "b", "c"])).unwrap();
            session.handle(AnswerEvent::Primary(PrimaryLabel::NotDwarf)).unwrap();
            session.handle(AnswerEvent::Confirm).unwrap();
        }

        let session = Session::open(&config, dataset(&["a", "b", "c"])).unwrap();
        assert_eq!(session.current(), Some(1));
        let progress = session.progress().unwrap();
        assert_eq!(progress.complete, 1);
        assert_eq!(progress.remaining, 2);
    }

    #[test]
    fn store_out_of_step_with_catalogue_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        drop(Session::open(&config, dataset(&["a", "b"])).unwrap());

        assert!(matches!(
            Session::open(&config, dataset(&["a", "b", "c"])),
            Err(AnnotateError::MalformedStore { .. })
        ));
        assert!(matches!(
            Session::open(&config, dataset(&["a", "z"])),
            Err(AnnotateError::Consistency { index: 1, .. })
        ));
    }

    #[test]
    fn progress_reflects_commits_from_other_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut first = Session::open(&config, dataset(&["a", "b", "c"])).unwrap();
        let second = Session::open(&config, dataset(&["a", "b", "c"])).unwrap();

        first.handle(AnswerEvent::Primary(PrimaryLabel::NotDwarf)).unwrap();
        first.handle(AnswerEvent::Confirm).unwrap();

        let progress = second.progress().unwrap();
        assert_eq!(progress.complete, 1);
        assert_eq!(progress.position, 0);
        assert_eq!(progress.title(false), "Classifying object 2/3");
    }

    #[test]
    fn skip_moves_on_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::open(&config(dir.path()), dataset(&["a", "b"])).unwrap();
        session.handle(AnswerEvent::Primary(PrimaryLabel::NotDwarf)).unwrap();

        assert_eq!(session.skip().unwrap(), 0);
        assert_eq!(session.current(), Some(1));
        assert_eq!(session.state(), &InteractionState::default());
        assert_eq!(session.store().scan().unwrap(), vec![0, 1]);

        session.skip().unwrap();
        assert!(matches!(session.skip(), Err(AnnotateError::SessionComplete)));
    }

    #[test]
    fn stale_commit_skips_object() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut first = Session::open(&config, dataset(&["a", "b"])).unwrap();
        let mut second = Session::open(&config, dataset(&["a", "b"])).unwrap();

        first.handle(AnswerEvent::Primary(PrimaryLabel::NotDwarf)).unwrap();
        first.handle(AnswerEvent::Confirm).unwrap();

        second.handle(AnswerEvent::Primary(PrimaryLabel::MaybeDwarf)).unwrap();
        second.handle(AnswerEvent::Morphology(Morphology::DI)).unwrap();
        second.handle(AnswerEvent::Auxiliary(AuxiliaryTag::None)).unwrap();
        assert_eq!(
            second.handle(AnswerEvent::Confirm).unwrap(),
            Outcome::Skipped {
                index: 0,
                object_id: "a".into()
            }
        );
        assert_eq!(second.current(), Some(1));
        assert_eq!(second.store().row(0).unwrap().primary_label, "0");
    }

    #[test]
    fn renders_current_object() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open(&config(dir.path()), dataset(&["a"])).unwrap();
        let frame = session.render_current().unwrap();
        assert_eq!(frame.object_id, "a");
        let layout = session.compositor.layout();
        assert_eq!(frame.image.dimensions(), (layout.width(), layout.height()));
    }
}
