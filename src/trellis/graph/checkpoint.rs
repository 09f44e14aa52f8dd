// SPDX-License-Identifier: MIT

//! Run-boundary checkpoints keyed by thread id

use super::channel::State;
use crate::adk::error::TrellisError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Resumable state store. Consulted only when a run starts and when it completes.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<State>, TrellisError>;

    async fn put(&self, thread_id: &str, state: &State) -> Result<(), TrellisError>;
}

#[derive(Default)]
pub struct InMemoryCheckpointer {
    threads: RwLock<HashMap<String, State>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<State>, TrellisError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn put(&self, thread_id: &str, state: &State) -> Result<(), TrellisError> {
        self.threads
            .write()
            .await
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }
}
