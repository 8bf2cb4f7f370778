use dwarf_annotator_core::{AnswerEvent, AuxiliaryTag, Morphology, PrimaryLabel, Stage};

/// One line typed by the reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Answer(AnswerEvent),
    /// Leave the current object unlabelled and move on.
    Skip,
    Quit,
    Unknown(String),
}

/// Primary answers in the order they are offered.
const PRIMARY_CHOICES: [PrimaryLabel; 3] = [
    PrimaryLabel::Dwarf,
    PrimaryLabel::MaybeDwarf,
    PrimaryLabel::NotDwarf,
];

pub fn parse(line: &str, stage: Stage) -> Command {
    let trimmed = line.trim();
    if let Some(comment) = trimmed
        .strip_prefix("c ")
        .or_else(|| (trimmed == "c").then_some(""))
    {
        return Command::Answer(AnswerEvent::Comment(comment.trim().to_string()));
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "" | "enter" => return Command::Answer(AnswerEvent::Confirm),
        "esc" => return Command::Answer(AnswerEvent::Reset),
        "q" | "quit" => return Command::Quit,
        "s" | "skip" => return Command::Skip,
        _ => {}
    }

    let Some(choice) = trimmed
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
    else {
        return Command::Unknown(trimmed.to_string());
    };
    let event = match stage {
        Stage::Primary => PRIMARY_CHOICES.get(choice).copied().map(AnswerEvent::Primary),
        Stage::Morphology => Morphology::ALL.get(choice).copied().map(AnswerEvent::Morphology),
        Stage::Auxiliary => AuxiliaryTag::ALL.get(choice).copied().map(AnswerEvent::Auxiliary),
    };
    event
        .map(Command::Answer)
        .unwrap_or_else(|| Command::Unknown(trimmed.to_string()))
}

/// Menu text for `stage`, numbered the way [`parse`] reads it.
pub fn choices(stage: Stage) -> String {
    let names: Vec<String> = match stage {
        Stage::Primary => vec!["is a dwarf".into(), "maybe".into(), "not a dwarf".into()],
        Stage::Morphology => Morphology::ALL.iter().map(|m| m.to_string()).collect(),
        Stage::Auxiliary => vec!["no".into(), "GC".into(), "interacting".into()],
    };
    names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("[{}] {name}", i + 1))
        .collect::<Vec<_>>()
        .join("  ")
}
