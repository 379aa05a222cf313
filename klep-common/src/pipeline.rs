// klep-common/src/pipeline.rs
use serde::{Deserialize, Serialize};

use crate::error::KlepError;

/// Phase of one resolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionState {
    Idle,
    BuildingGraph,
    Searching,
    Succeeded,
    Failed,
}

impl ResolutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResolutionState::Succeeded | ResolutionState::Failed)
    }
}

/// Progress reported by the driver to whoever renders it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolutionEvent {
    StateChanged {
        from: ResolutionState,
        to: ResolutionState,
    },
    NodeFetched {
        name: String,
        reference: String,
    },
    GraphBuilt {
        nodes: usize,
        names: usize,
    },
    SearchFinished {
        cost: u32,
        expansions: usize,
    },
    SnapshotWritten {
        entries: usize,
    },
    RunFailed {
        error: String,
    },
    LogWarn {
        message: String,
    },
}

impl ResolutionEvent {
    pub fn run_failed(error: &KlepError) -> Self {
        ResolutionEvent::RunFailed {
            error: error.to_string(),
        }
    }
}
