use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Step of message handling at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decode,
    Persist,
    Publish,
    Notify,
    Acknowledge,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Stage::Decode => write!(f, "decode"),
            Stage::Persist => write!(f, "persist"),
            Stage::Publish => write!(f, "publish"),
            Stage::Notify => write!(f, "notify"),
            Stage::Acknowledge => write!(f, "acknowledge"),
        }
    }
}

/// How a single received message was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Every effect succeeded and the message was deleted.
    Completed,
    /// The body can never be processed; deleted without retry.
    Poisoned { reason: String },
    /// Left on the queue so it is redelivered after its visibility timeout.
    Released { stage: Stage, reason: String },
}

impl MessageOutcome {
    pub fn released(stage: Stage, reason: impl Display) -> Self {
        MessageOutcome::Released {
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn poisoned(reason: impl Display) -> Self {
        MessageOutcome::Poisoned {
            reason: reason.to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, MessageOutcome::Completed)
    }
}
