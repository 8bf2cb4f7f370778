//! Label vocabulary and the persisted per-object record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// First-stage ternary decision. The numeric encoding is exact because
/// downstream training treats it as a soft target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimaryLabel {
    NotDwarf,
    MaybeDwarf,
    Dwarf,
}

impl PrimaryLabel {
    pub const ALL: [PrimaryLabel; 3] = [Self::NotDwarf, Self::MaybeDwarf, Self::Dwarf];

    pub fn value(self) -> f32 {
        match self {
            Self::NotDwarf => 0.0,
            Self::MaybeDwarf => 0.5,
            Self::Dwarf => 1.0,
        }
    }

    /// Text written to the store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotDwarf => "0",
            Self::MaybeDwarf => "0.5",
            Self::Dwarf => "1",
        }
    }

    /// Parses stored label text numerically, so `0` and `0.0` agree.
    pub fn parse(text: &str) -> Option<Self> {
        let value: f64 = text.trim().parse().ok()?;
        if value == 0.0 {
            Some(Self::NotDwarf)
        } else if value == 0.5 {
            Some(Self::MaybeDwarf)
        } else if value == 1.0 {
            Some(Self::Dwarf)
        } else {
            None
        }
    }

    /// Whether this outcome requires a morphology answer.
    pub fn requires_morphology(self) -> bool {
        self != Self::NotDwarf
    }
}

impl fmt::Display for PrimaryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Morphology {
    /// Dwarf elliptical.
    DE,
    /// Nucleated dwarf elliptical.
    DEN,
    /// Dwarf irregular.
    DI,
    /// Nucleated dwarf irregular.
    DIN,
}

impl Morphology {
    pub const ALL: [Morphology; 4] = [Self::DE, Self::DEN, Self::DI, Self::DIN];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DE => "dE",
            Self::DEN => "dEN",
            Self::DI => "dI",
            Self::DIN => "dIN",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|option| option.as_str().eq_ignore_ascii_case(text.trim()))
    }
}

impl fmt::Display for Morphology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional third-stage tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuxiliaryTag {
    /// No special feature.
    #[default]
    None,
    GlobularClusters,
    Interacting,
}

impl AuxiliaryTag {
    pub const ALL: [AuxiliaryTag; 3] = [Self::None, Self::GlobularClusters, Self::Interacting];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::GlobularClusters => "gc",
            Self::Interacting => "interacting",
        }
    }

    /// Accepts the canonical spelling and the older `No`/`GC`/`Interacting`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "none" | "no" | "" => Some(Self::None),
            "gc" => Some(Self::GlobularClusters),
            "interacting" => Some(Self::Interacting),
            _ => None,
        }
    }
}

impl fmt::Display for AuxiliaryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored row: the label state of a single catalogued object.
///
/// Fields hold the raw stored text so that rows written by hand or by older
/// tools can still be scanned; typed accessors parse on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object_id: String,
    pub primary_label: String,
    pub morphology: String,
    pub auxiliary_tag: String,
    pub comment: String,
}

impl ObjectRecord {
    /// Fresh row with every label field unset.
    pub fn blank(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            primary_label: String::new(),
            morphology: String::new(),
            auxiliary_tag: AuxiliaryTag::default().as_str().to_string(),
            comment: String::new(),
        }
    }

    pub fn from_decision(object_id: impl Into<String>, decision: &LabelDecision) -> Self {
        Self {
            object_id: object_id.into(),
            primary_label: decision.primary.as_str().to_string(),
            morphology: decision
                .morphology
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            auxiliary_tag: decision.auxiliary.as_str().to_string(),
            comment: decision.comment.clone(),
        }
    }

    pub fn primary(&self) -> Option<PrimaryLabel> {
        PrimaryLabel::parse(&self.primary_label)
    }

    pub fn morphology(&self) -> Option<Morphology> {
        Morphology::parse(&self.morphology)
    }

    /// Completion invariant. A blank or unparseable label is always
    /// incomplete; with morphology collection enabled, `0` needs a blank
    /// morphology and `0.5`/`1` need a non-blank one.
    pub fn is_complete(&self, with_morphology: bool) -> bool {
        let Some(primary) = self.primary() else {
            return false;
        };
        if !with_morphology {
            return true;
        }
        let has_morphology = !self.morphology.trim().is_empty();
        primary.requires_morphology() == has_morphology
    }
}

/// A finished answer set, ready to be written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDecision {
    pub primary: PrimaryLabel,
    pub morphology: Option<Morphology>,
    pub auxiliary: AuxiliaryTag,
    pub comment: String,
}
