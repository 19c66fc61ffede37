use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tradebot_core::checkpoint::Checkpoint;

/// Latest-write-wins snapshot storage keyed by thread id. No history is
/// kept; `put` replaces whatever was there.
pub trait CheckpointStore: Send + Sync {
    fn put(&self, thread_id: &str, checkpoint: Checkpoint);
    fn get(&self, thread_id: &str) -> Option<Checkpoint>;
    fn discard(&self, thread_id: &str);
}

/// Process-lifetime store. State does not survive a restart.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<Mutex<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.checkpoints.lock() {
            Ok(checkpoints) => checkpoints.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn put(&self, thread_id: &str, checkpoint: Checkpoint) {
        match self.checkpoints.lock() {
            Ok(mut checkpoints) => {
                checkpoints.insert(thread_id.to_string(), checkpoint);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(thread_id.to_string(), checkpoint);
            }
        }
    }

    fn get(&self, thread_id: &str) -> Option<Checkpoint> {
        match self.checkpoints.lock() {
            Ok(checkpoints) => checkpoints.get(thread_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(thread_id).cloned(),
        }
    }

    fn discard(&self, thread_id: &str) {
        match self.checkpoints.lock() {
            Ok(mut checkpoints) => {
                checkpoints.remove(thread_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(thread_id);
            }
        }
    }
}
