//! Stages a captured file moves through.

use std::fmt;
use std::str::FromStr;

/// Processing stage of a captured file.
///
/// Expected progression is `Saving → Waiting → Uploading → Encrypting → Done`.
/// `Failed` can be entered from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Saving,
    Waiting,
    Uploading,
    Encrypting,
    Done,
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Saving,
        Stage::Waiting,
        Stage::Uploading,
        Stage::Encrypting,
        Stage::Done,
        Stage::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Immediate successor in the expected order. Terminal stages have none.
    pub fn successor(self) -> Option<Stage> {
        match self {
            Stage::Saving => Some(Stage::Waiting),
            Stage::Waiting => Some(Stage::Uploading),
            Stage::Uploading => Some(Stage::Encrypting),
            Stage::Encrypting => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    /// Lower-case form stored in sidecar records.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Saving => "saving",
            Stage::Waiting => "waiting",
            Stage::Uploading => "uploading",
            Stage::Encrypting => "encrypting",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    /// Label shown in the live display.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Saving => "Saving",
            Stage::Waiting => "Waiting for worker",
            Stage::Uploading => "Uploading",
            Stage::Encrypting => "Encrypting",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        }
    }
}

/// Whether moving from `from` to `to` follows the expected order.
///
/// Legal moves: anything to `Failed`, a step to the immediate successor, or a
/// repeated report of the same stage. Skipped stages (upload or protect
/// disabled) are not modelled here.
pub fn can_transition(from: Stage, to: Stage) -> bool {
    to == Stage::Failed || from == to || from.successor() == Some(to)
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage: {:?}", self.0)
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}
