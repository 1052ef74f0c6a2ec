//! Per-document ingestion state machine.
//!
//! `Received → Normalized → Chunked → DedupChecked → Embedded → Indexed →
//! Complete`, with `DedupChecked → Complete` for already-indexed or empty
//! documents and `Failed` reachable from every non-terminal stage.

use crate::error::TransitionError;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestStage {
    Received,
    Normalized,
    Chunked,
    DedupChecked,
    Embedded,
    Indexed,
    Complete,
}

impl IngestStage {
    fn successor(self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::Normalized),
            Self::Normalized => Some(Self::Chunked),
            Self::Chunked => Some(Self::DedupChecked),
            Self::DedupChecked => Some(Self::Embedded),
            Self::Embedded => Some(Self::Indexed),
            Self::Indexed => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        self.successor() == Some(target) || (self == Self::DedupChecked && target == Self::Complete)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Complete
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    Active(IngestStage),
    Failed { stage: IngestStage, reason: String },
}

#[derive(Debug)]
pub struct IngestTracker {
    document_id: String,
    state: IngestState,
    history: Vec<IngestStage>,
}

impl IngestTracker {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            state: IngestState::Active(IngestStage::Received),
            history: vec![IngestStage::Received],
        }
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    pub fn history(&self) -> &[IngestStage] {
        &self.history
    }

    pub fn into_history(self) -> Vec<IngestStage> {
        self.history
    }

    pub fn advance(&mut self, target: IngestStage) -> Result<(), TransitionError> {
        let current = match &self.state {
            IngestState::Active(stage) => *stage,
            IngestState::Failed { stage, .. } => {
                return Err(TransitionError::AlreadyFailed { stage: *stage });
            }
        };

        if !current.can_transition_to(target) {
            return Err(TransitionError::Invalid {
                from: current,
                to: target,
            });
        }

        debug!(document_id = %self.document_id, from = ?current, to = ?target, "ingest transition");
        self.state = IngestState::Active(target);
        self.history.push(target);
        Ok(())
    }

    /// Moves to `Failed`. `stage` names the stage that was being attempted.
    pub fn fail(
        &mut self,
        stage: IngestStage,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        match &self.state {
            IngestState::Active(current) if current.is_terminal() => {
                Err(TransitionError::AlreadyComplete)
            }
            IngestState::Active(_) => {
                self.state = IngestState::Failed {
                    stage,
                    reason: reason.into(),
                };
                Ok(())
            }
            IngestState::Failed { stage, .. } => {
                Err(TransitionError::AlreadyFailed { stage: *stage })
            }
        }
    }
}
