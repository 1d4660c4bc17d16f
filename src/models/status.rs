use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplaintStatus {
    Received,
    Processing,
    Closed,
}

impl ComplaintStatus {
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "Received" => Some(ComplaintStatus::Received),
            "Processing" => Some(ComplaintStatus::Processing),
            "Closed" => Some(ComplaintStatus::Closed),
            _ => None,
        }
    }
}

impl Display for ComplaintStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ComplaintStatus::Received => write!(f, "Received"),
            ComplaintStatus::Processing => write!(f, "Processing"),
            ComplaintStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Result of trying to claim a notification in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    Acquired,
    AlreadySent,
    InProgress,
}
