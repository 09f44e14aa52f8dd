// SPDX-License-Identifier: MIT

//! Nodes and the run-scoped context they receive

use super::channel::{State, Update};
use super::events::{EventSink, RunEvent};
use crate::adk::error::TrellisError;
use crate::adk::memory::MemoryStore;
use crate::adk::model::Model;
use crate::adk::tool::ToolContext;
use crate::trellis::config::{ExecutionConfig, DEFAULT_MAX_CONCURRENCY};
use crate::trellis::registry::ToolRegistry;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A unit of work: reads a snapshot, returns a partial update
#[async_trait]
pub trait Node: Send + Sync {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError>;

    /// Channels this node may write, when known statically
    fn writes(&self) -> Option<&[String]> {
        None
    }
}

/// Dependencies injected into every node of a run
#[derive(Clone)]
pub struct RunContext {
    run_id: String,
    cancel: CancellationToken,
    model: Option<Arc<dyn Model>>,
    tools: ToolRegistry,
    memory: Option<Arc<dyn MemoryStore>>,
    events: Option<Arc<dyn EventSink>>,
    thread_id: Option<String>,
    user_id: Option<String>,
    depth: usize,
    /// Caller's cap on concurrent work, overriding the graph's
    concurrency_cap: Option<usize>,
    concurrency: usize,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            model: None,
            tools: ToolRegistry::new(),
            memory: None,
            events: None,
            thread_id: None,
            user_id: None,
            depth: 0,
            concurrency_cap: None,
            concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Cap outstanding branches and tool calls for this run, whatever the
    /// graph's execution config says
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        let max = max.max(1);
        self.concurrency_cap = Some(max);
        self.concurrency = max;
        self
    }

    /// Context as seen by the nodes of a graph compiled with `config`
    pub(crate) fn for_graph(&self, config: &ExecutionConfig) -> Self {
        Self {
            concurrency: self.concurrency_cap.unwrap_or_else(|| config.concurrency()),
            ..self.clone()
        }
    }

    /// Context for a nested run: fresh run id, same collaborators and token,
    /// no thread so the inner run never checkpoints
    pub fn child(&self) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            thread_id: None,
            depth: self.depth + 1,
            ..self.clone()
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Most branches or tool calls this run keeps in flight at once
    pub fn max_concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn memory(&self) -> Option<&Arc<dyn MemoryStore>> {
        self.memory.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Nodes call this before starting another external call
    pub fn check_cancelled(&self) -> Result<(), TrellisError> {
        if self.cancel.is_cancelled() {
            Err(TrellisError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn model(&self) -> Result<Arc<dyn Model>, TrellisError> {
        self.model
            .clone()
            .ok_or_else(|| TrellisError::config("no model configured for this run"))
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
            user_id: self.user_id.clone(),
            memory: self.memory.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(sink) = &self.events {
            sink.emit(&event);
        }
    }
}

type SyncFn = dyn Fn(&State) -> Result<Update, TrellisError> + Send + Sync;

/// Node from a synchronous closure over the snapshot
pub struct FnNode {
    f: Box<SyncFn>,
    writes: Option<Vec<String>>,
}

impl FnNode {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&State) -> Result<Update, TrellisError> + Send + Sync + 'static,
    {
        Self {
            f: Box::new(f),
            writes: None,
        }
    }

    pub fn with_writes<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = Some(channels.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl Node for FnNode {
    async fn invoke(&self, state: &State, _ctx: &RunContext) -> Result<Update, TrellisError> {
        (self.f)(state)
    }

    fn writes(&self) -> Option<&[String]> {
        self.writes.as_deref()
    }
}

type AsyncFn =
    dyn Fn(State, RunContext) -> BoxFuture<'static, Result<Update, TrellisError>> + Send + Sync;

/// Node from an async closure. The closure receives owned copies so the
/// future can outlive the borrow of the snapshot.
pub struct AsyncFnNode {
    f: Box<AsyncFn>,
    writes: Option<Vec<String>>,
}

impl AsyncFnNode {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(State, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Update, TrellisError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |state, ctx| Box::pin(f(state, ctx))),
            writes: None,
        }
    }

    pub fn with_writes<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes = Some(channels.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl Node for AsyncFnNode {
    async fn invoke(&self, state: &State, ctx: &RunContext) -> Result<Update, TrellisError> {
        (self.f)(state.clone(), ctx.clone()).await
    }

    fn writes(&self) -> Option<&[String]> {
        self.writes.as_deref()
    }
}
