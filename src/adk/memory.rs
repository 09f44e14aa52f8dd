// SPDX-License-Identifier: MIT

//! Long-term memory store
//!
//! Memories are plain text values filed under a namespace (usually a user id)
//! and a key. [`InMemoryStore`] ranks search hits by keyword overlap between
//! the query and the stored text.

use crate::adk::error::TrellisError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryHit {
    pub key: String,
    pub value: String,
    pub score: f64,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), TrellisError>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, TrellisError>;

    /// Best matches first, at most `limit`
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, TrellisError>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, BTreeMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Fraction of query keywords present in the text
fn overlap_score(query: &HashSet<String>, text: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let words = keywords(text);
    let hits = query.iter().filter(|w| words.contains(*w)).count();
    hits as f64 / query.len() as f64
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), TrellisError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| TrellisError::other("memory store lock poisoned"))?;
        entries
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, TrellisError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| TrellisError::other("memory store lock poisoned"))?;
        Ok(entries.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn search(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, TrellisError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| TrellisError::other("memory store lock poisoned"))?;
        let Some(ns) = entries.get(namespace) else {
            return Ok(Vec::new());
        };

        let query = keywords(query);
        let mut hits: Vec<MemoryHit> = ns
            .iter()
            .map(|(key, value)| MemoryHit {
                key: key.clone(),
                value: value.clone(),
                score: overlap_score(&query, value),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        // stable sort keeps key order among equal scores
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}
