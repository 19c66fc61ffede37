use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::ConversationState;
use crate::graph::NodeName;
use crate::tools::PendingBuy;

/// A node frozen at its suspend point. Carries the partial result computed
/// before suspension so resume re-enters the answer sub-step instead of
/// re-running the node from its beginning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub suspension_id: String,
    pub node: NodeName,
    pub prompt: String,
    pub pending: PendingBuy,
}

impl Suspension {
    pub fn new(node: NodeName, prompt: impl Into<String>, pending: PendingBuy) -> Self {
        Self {
            suspension_id: Uuid::new_v4().to_string(),
            node,
            prompt: prompt.into(),
            pending,
        }
    }
}

/// Latest snapshot for one thread. One checkpoint per thread id,
/// latest-write-wins, no history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: ConversationState,
    pub paused: Option<Suspension>,
}

impl Checkpoint {
    pub fn running(state: ConversationState) -> Self {
        Self { state, paused: None }
    }

    pub fn paused(state: ConversationState, suspension: Suspension) -> Self {
        Self { state, paused: Some(suspension) }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }
}
