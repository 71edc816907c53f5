//! Step and workflow status enums plus their legal-transition tables
//! (spec §3 state diagrams, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pending,
    Running,
    Retrying,
    Success,
    Failed,
    Timeout,
    Cancelled,
    Skipped,
}

impl StepStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Skipped | Self::Timeout | Self::Cancelled)
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// Legal transitions per spec §3's step diagram.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use StepStatus::{Cancelled, Failed, Pending, Retrying, Running, Skipped, Success, Timeout};
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Timeout)
                | (Running, Cancelled)
                | (Running, Skipped)
                | (Failed, Retrying)
                | (Retrying, Running)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Partial,
    Timeout,
    Cancelled,
}

impl WorkflowStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Partial | Self::Timeout | Self::Cancelled
        )
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use WorkflowStatus::{Cancelled, Completed, Failed, Partial, Paused, Queued, Running, Timeout};
        matches!(
            (self, next),
            (Queued, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Partial)
                | (Running, Timeout)
                | (Running, Cancelled)
                | (Running, Paused)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

/// A single recorded transition, kept for post-mortem inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord<S> {
    pub from: S,
    pub to: S,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}
