//! Per-object question flow.
//!
//! [`InteractionState`] is a plain value; every answer event produces a new
//! one through [`LabelingStateMachine::step`], so a presentation layer can
//! re-render from the latest state without the core touching any widget.

use crate::{
    config::{AuxiliaryPolicy, LabelingConfig},
    record::{AuxiliaryTag, LabelDecision, Morphology, PrimaryLabel},
};

/// The question currently being asked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Primary,
    Morphology,
    Auxiliary,
}

impl Stage {
    pub fn question(self) -> &'static str {
        match self {
            Self::Primary => "Is this a dwarf?",
            Self::Morphology => "What is the morphology?",
            Self::Auxiliary => "Any special features?",
        }
    }
}

/// Discrete input from the reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    Primary(PrimaryLabel),
    Morphology(Morphology),
    Auxiliary(AuxiliaryTag),
    Comment(String),
    Confirm,
    Reset,
}

/// Pending answers for the object on screen. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionState {
    pub stage: Stage,
    pub primary: Option<PrimaryLabel>,
    pub morphology: Option<Morphology>,
    pub auxiliary: AuxiliaryTag,
    pub comment: String,
}

/// Result of feeding one event to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Updated(InteractionState),
    /// The event does not apply in the current stage.
    Ignored,
    /// Confirmed with every required answer present.
    Complete(LabelDecision),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelingStateMachine {
    with_morphology: bool,
    auxiliary: AuxiliaryPolicy,
}

impl LabelingStateMachine {
    pub fn new(config: &LabelingConfig) -> Self {
        Self::with_options(config.with_morphology, config.auxiliary)
    }

    pub fn with_options(with_morphology: bool, auxiliary: AuxiliaryPolicy) -> Self {
        Self {
            with_morphology,
            auxiliary,
        }
    }

    /// Whether `primary` goes on to the auxiliary-tag question.
    pub fn asks_auxiliary(&self, primary: PrimaryLabel) -> bool {
        if !self.with_morphology {
            return false;
        }
        match (self.auxiliary, primary) {
            (_, PrimaryLabel::NotDwarf) | (AuxiliaryPolicy::Disabled, _) => false,
            (AuxiliaryPolicy::DwarfOnly, label) => label == PrimaryLabel::Dwarf,
            (AuxiliaryPolicy::MaybeAndDwarf, _) => true,
        }
    }

    pub fn step(&self, state: &InteractionState, event: AnswerEvent) -> Step {
        match event {
            AnswerEvent::Comment(comment) => Step::Updated(InteractionState {
                comment,
                ..state.clone()
            }),
            AnswerEvent::Reset => {
                if state.primary.is_none() {
                    return Step::Ignored;
                }
                Step::Updated(InteractionState {
                    comment: state.comment.clone(),
                    ..InteractionState::default()
                })
            }
            AnswerEvent::Primary(label) if state.stage == Stage::Primary => {
                let stage = if self.with_morphology && label.requires_morphology() {
                    Stage::Morphology
                } else {
                    Stage::Primary
                };
                Step::Updated(InteractionState {
                    stage,
                    primary: Some(label),
                    morphology: None,
                    auxiliary: AuxiliaryTag::default(),
                    comment: state.comment.clone(),
                })
            }
            AnswerEvent::Morphology(morphology) if state.stage == Stage::Morphology => {
                let Some(primary) = state.primary else {
                    return Step::Ignored;
                };
                let stage = if self.asks_auxiliary(primary) {
                    Stage::Auxiliary
                } else {
                    Stage::Morphology
                };
                Step::Updated(InteractionState {
                    stage,
                    morphology: Some(morphology),
                    auxiliary: AuxiliaryTag::default(),
                    ..state.clone()
                })
            }
            AnswerEvent::Auxiliary(auxiliary) if state.stage == Stage::Auxiliary => {
                Step::Updated(InteractionState {
                    auxiliary,
                    ..state.clone()
                })
            }
            AnswerEvent::Confirm => match self.decision(state) {
                Some(decision) => Step::Complete(decision),
                None => Step::Ignored,
            },
            _ => Step::Ignored,
        }
    }

    /// Whether a confirm in `state` would commit.
    pub fn is_complete(&self, state: &InteractionState) -> bool {
        let Some(primary) = state.primary else {
            return false;
        };
        if !self.with_morphology || !primary.requires_morphology() {
            return true;
        }
        if state.morphology.is_none() {
            return false;
        }
        !self.asks_auxiliary(primary) || state.stage == Stage::Auxiliary
    }

    /// The answer set a confirm in `state` would commit, if complete.
    pub fn decision(&self, state: &InteractionState) -> Option<LabelDecision> {
        if !self.is_complete(state) {
            return None;
        }
        let primary = state.primary?;
        let morphology = if self.with_morphology && primary.requires_morphology() {
            state.morphology
        } else {
            None
        };
        let auxiliary = if self.asks_auxiliary(primary) {
            state.auxiliary
        } else {
            AuxiliaryTag::default()
        };
        Some(LabelDecision {
            primary,
            morphology,
            auxiliary,
            comment: state.comment.trim().to_string(),
        })
    }
}
