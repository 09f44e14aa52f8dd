// SPDX-License-Identifier: MIT

//! Graph executor
//!
//! A run moves `Ready -> Running -> {Completed, Failed, Cancelled}`. Each step
//! resolves the cursor, invokes the node (or every branch of a fan-out),
//! merges the update all-or-nothing, then asks the outgoing edge where to go
//! against the post-merge snapshot.

use super::channel::{ChannelRegistry, State, UnknownChannel, Update};
use super::checkpoint::Checkpointer;
use super::edge::{resolve_label, Edge, END, START};
use super::events::RunEvent;
use super::node::{Node, RunContext};
use crate::adk::error::{RunFault, TimeoutScope, TrellisError};
use crate::trellis::config::ExecutionConfig;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Immutable, validated graph. Run it as many times as needed.
pub struct CompiledGraph {
    pub(crate) name: String,
    pub(crate) entry: String,
    pub(crate) nodes: BTreeMap<String, Arc<dyn Node>>,
    pub(crate) edges: BTreeMap<String, Edge>,
    pub(crate) channels: ChannelRegistry,
    pub(crate) config: ExecutionConfig,
    pub(crate) checkpointer: Option<Arc<dyn Checkpointer>>,
    pub(crate) warnings: Vec<String>,
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("channels", &self.channels)
            .field("config", &self.config)
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed,
    Failed(RunFault),
    Cancelled,
}

/// Result object handed back to callers of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// Final snapshot; on failure, the last consistent one
    pub state: State,
    pub steps: usize,
    /// Node invocations, counting every fan-out branch
    pub invocations: usize,
    /// Node names in invocation order
    pub trace: Vec<String>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    pub fn fault(&self) -> Option<&RunFault> {
        match &self.status {
            RunStatus::Failed(fault) => Some(fault),
            _ => None,
        }
    }

    /// Final snapshot, or the failure as an error
    pub fn into_result(self) -> Result<State, TrellisError> {
        match self.status {
            RunStatus::Completed => Ok(self.state),
            RunStatus::Failed(fault) => Err(TrellisError::Run(fault)),
            RunStatus::Cancelled => Err(TrellisError::Cancelled),
        }
    }
}

impl CompiledGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Structural warnings found at compile time
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    /// Run with a fresh default context
    pub async fn run(&self, input: Update) -> RunOutcome {
        self.invoke(input, &RunContext::new()).await
    }

    /// Run to a terminal status
    pub async fn invoke(&self, input: Update, ctx: &RunContext) -> RunOutcome {
        let ctx = ctx.for_graph(&self.config);
        Executor::new(self, &ctx).run(input).await
    }
}

enum Cursor {
    Node(String),
    FanOut { branches: Vec<String>, join: String },
    End,
}

/// Why a step produced no new snapshot
enum Halt {
    Fault(RunFault),
    Cancelled,
}

struct Executor<'g> {
    graph: &'g CompiledGraph,
    ctx: &'g RunContext,
    deadline: Option<Instant>,
    steps: usize,
    invocations: usize,
    trace: Vec<String>,
}

impl<'g> Executor<'g> {
    fn new(graph: &'g CompiledGraph, ctx: &'g RunContext) -> Self {
        Self {
            graph,
            ctx,
            deadline: graph.config.run_timeout().map(|d| Instant::now() + d),
            steps: 0,
            invocations: 0,
            trace: Vec::new(),
        }
    }

    async fn run(mut self, input: Update) -> RunOutcome {
        log::info!(
            "Run {} started on graph '{}' (depth {})",
            self.ctx.run_id(),
            self.graph.name,
            self.ctx.depth()
        );
        self.ctx.emit(RunEvent::RunStarted {
            run_id: self.ctx.run_id().to_string(),
            graph: self.graph.name.clone(),
        });

        let base = self.starting_state().await;
        let mut state = match self.graph.channels.merge(&base, &input) {
            Ok(s) => s,
            Err(UnknownChannel(channel)) => {
                let fault = RunFault::InvalidUpdate {
                    node: START.to_string(),
                    channel,
                };
                return self.finish(base, RunStatus::Failed(fault)).await;
            }
        };

        let mut cursor = Cursor::Node(self.graph.entry.clone());
        loop {
            if self.ctx.is_cancelled() {
                return self.finish(state, RunStatus::Cancelled).await;
            }
            let limit = self.graph.config.recursion_limit;
            if self.steps >= limit {
                let fault = RunFault::RecursionLimitExceeded { limit };
                return self.finish(state, RunStatus::Failed(fault)).await;
            }
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                let fault = RunFault::Timeout {
                    scope: TimeoutScope::Run,
                    node: None,
                };
                return self.finish(state, RunStatus::Failed(fault)).await;
            }

            cursor = match cursor {
                Cursor::Node(name) => {
                    state = match self.step_node(&name, &state).await {
                        Ok(next) => next,
                        Err(halt) => return self.halt(state, halt).await,
                    };
                    self.steps += 1;
                    match self.next_cursor(&name, &state).await {
                        Ok(next) => next,
                        Err(halt) => return self.halt(state, halt).await,
                    }
                }
                Cursor::FanOut { branches, join } => {
                    state = match self.step_fan_out(&branches, &state).await {
                        Ok(next) => next,
                        Err(halt) => return self.halt(state, halt).await,
                    };
                    self.steps += 1;
                    for branch in &branches {
                        self.edge_taken(branch, &join, None);
                    }
                    if join == END {
                        Cursor::End
                    } else {
                        Cursor::Node(join)
                    }
                }
                Cursor::End => Cursor::End,
            };

            if matches!(cursor, Cursor::End) {
                return self.finish(state, RunStatus::Completed).await;
            }
        }
    }

    /// Channel defaults, overlaid with the thread's checkpoint when there is one
    async fn starting_state(&self) -> State {
        let mut state = self.graph.channels.initial_state();
        let (Some(store), Some(thread)) = (&self.graph.checkpointer, self.ctx.thread_id()) else {
            return state;
        };

        match store.get(thread).await {
            Ok(Some(saved)) => {
                log::debug!("Resuming thread '{}' from checkpoint", thread);
                for (channel, value) in saved.iter() {
                    if self.graph.channels.contains(channel) {
                        state.insert(channel.clone(), value.clone());
                    }
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Checkpoint read for thread '{}' failed: {}", thread, e),
        }
        state
    }

    /// Earliest of the step and run deadlines, with the scope that owns it
    fn budget(&self) -> Option<(Instant, TimeoutScope)> {
        let step = self
            .graph
            .config
            .step_timeout()
            .map(|d| Instant::now() + d);
        match (step, self.deadline) {
            (Some(s), Some(r)) if r <= s => Some((r, TimeoutScope::Run)),
            (Some(s), _) => Some((s, TimeoutScope::Step)),
            (None, Some(r)) => Some((r, TimeoutScope::Run)),
            (None, None) => None,
        }
    }

    /// Await `fut` within the current budget
    async fn bounded<T>(
        &self,
        node: &str,
        fut: impl Future<Output = Result<T, TrellisError>>,
    ) -> Result<Result<T, TrellisError>, RunFault> {
        match self.budget() {
            None => Ok(fut.await),
            Some((deadline, scope)) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| RunFault::Timeout {
                    scope,
                    node: Some(node.to_string()),
                }),
        }
    }

    async fn invoke(&self, name: &str, state: &State) -> Result<Update, Halt> {
        let Some(node) = self.graph.nodes.get(name) else {
            return Err(Halt::Fault(RunFault::NodeInvocation {
                node: name.to_string(),
                message: "node is not part of this graph".to_string(),
            }));
        };

        match self.bounded(name, node.invoke(state, self.ctx)).await {
            Err(fault) => Err(Halt::Fault(fault)),
            Ok(Ok(update)) => Ok(update),
            Ok(Err(e)) if e.is_cancelled() && self.ctx.is_cancelled() => Err(Halt::Cancelled),
            Ok(Err(e)) => {
                log::warn!("Node '{}' failed: {}", name, e);
                Err(Halt::Fault(RunFault::NodeInvocation {
                    node: name.to_string(),
                    message: e.to_string(),
                }))
            }
        }
    }

    fn started(&mut self, name: &str) {
        self.invocations += 1;
        self.trace.push(name.to_string());
        log::debug!("Step {}: invoking '{}'", self.steps + 1, name);
        self.ctx.emit(RunEvent::NodeStarted {
            run_id: self.ctx.run_id().to_string(),
            node: name.to_string(),
            step: self.steps + 1,
        });
    }

    fn finished(&self, name: &str, update: &Update) {
        self.ctx.emit(RunEvent::NodeFinished {
            run_id: self.ctx.run_id().to_string(),
            node: name.to_string(),
            step: self.steps + 1,
            channels: update.channels().cloned().collect(),
        });
    }

    fn edge_taken(&self, from: &str, to: &str, label: Option<&str>) {
        self.ctx.emit(RunEvent::EdgeTaken {
            run_id: self.ctx.run_id().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            label: label.map(|l| l.to_string()),
        });
    }

    fn merge(&self, node: &str, state: &State, update: &Update) -> Result<State, Halt> {
        self.graph
            .channels
            .merge(state, update)
            .map_err(|UnknownChannel(channel)| {
                Halt::Fault(RunFault::InvalidUpdate {
                    node: node.to_string(),
                    channel,
                })
            })
    }

    async fn step_node(&mut self, name: &str, state: &State) -> Result<State, Halt> {
        self.started(name);
        let update = self.invoke(name, state).await?;
        let next = self.merge(name, state, &update)?;
        self.finished(name, &update);
        Ok(next)
    }

    /// Every branch sees the same snapshot; updates merge in declaration order
    async fn step_fan_out(&mut self, branches: &[String], state: &State) -> Result<State, Halt> {
        for branch in branches {
            self.started(branch);
        }

        let results: Vec<Result<Update, Halt>> = {
            let this = &*self;
            // built up front so the stream owns plain futures and stays Send
            let pending: Vec<_> = branches.iter().map(|b| this.invoke(b, state)).collect();
            stream::iter(pending)
                .buffered(this.ctx.max_concurrency())
                .collect()
                .await
        };

        let mut updates = Vec::with_capacity(results.len());
        for result in results {
            updates.push(result?);
        }

        let mut next = state.clone();
        for (branch, update) in branches.iter().zip(&updates) {
            next = self.merge(branch, &next, update)?;
        }
        for (branch, update) in branches.iter().zip(&updates) {
            self.finished(branch, update);
        }
        Ok(next)
    }

    async fn next_cursor(&self, from: &str, state: &State) -> Result<Cursor, Halt> {
        let Some(edge) = self.graph.edges.get(from) else {
            return Ok(Cursor::End);
        };

        let (to, label) = match edge {
            Edge::Static(to) => (to.clone(), None),
            Edge::Conditional { router, routes } => {
                let label = match self.bounded(from, router.route(state, self.ctx)).await {
                    Err(fault) => return Err(Halt::Fault(fault)),
                    Ok(Ok(label)) => label,
                    Ok(Err(e)) if e.is_cancelled() && self.ctx.is_cancelled() => {
                        return Err(Halt::Cancelled)
                    }
                    Ok(Err(e)) => {
                        return Err(Halt::Fault(RunFault::Router {
                            node: from.to_string(),
                            message: e.to_string(),
                        }))
                    }
                };
                match resolve_label(routes, &label) {
                    Some(to) => (to.to_string(), Some(label)),
                    None => {
                        return Err(Halt::Fault(RunFault::Routing {
                            node: from.to_string(),
                            label,
                        }))
                    }
                }
            }
            Edge::FanOut { branches, join } => {
                for branch in branches {
                    self.edge_taken(from, branch, None);
                }
                return Ok(Cursor::FanOut {
                    branches: branches.clone(),
                    join: join.clone(),
                });
            }
        };

        self.edge_taken(from, &to, label.as_deref());
        Ok(if to == END { Cursor::End } else { Cursor::Node(to) })
    }

    async fn halt(self, state: State, halt: Halt) -> RunOutcome {
        let status = match halt {
            Halt::Fault(fault) => RunStatus::Failed(fault),
            Halt::Cancelled => RunStatus::Cancelled,
        };
        self.finish(state, status).await
    }

    async fn finish(self, state: State, status: RunStatus) -> RunOutcome {
        let run_id = self.ctx.run_id().to_string();
        match &status {
            RunStatus::Completed => {
                log::info!("Run {} completed after {} steps", run_id, self.steps);
                self.ctx.emit(RunEvent::RunCompleted {
                    run_id: run_id.clone(),
                    steps: self.steps,
                });
                if let (Some(store), Some(thread)) = (&self.graph.checkpointer, self.ctx.thread_id()) {
                    if let Err(e) = store.put(thread, &state).await {
                        log::warn!("Checkpoint write for thread '{}' failed: {}", thread, e);
                    }
                }
            }
            RunStatus::Failed(fault) => {
                log::error!("Run {} failed after {} steps: {}", run_id, self.steps, fault);
                self.ctx.emit(RunEvent::RunFailed {
                    run_id: run_id.clone(),
                    fault: fault.clone(),
                });
            }
            RunStatus::Cancelled => {
                log::warn!("Run {} cancelled after {} steps", run_id, self.steps);
                self.ctx.emit(RunEvent::RunCancelled {
                    run_id: run_id.clone(),
                    steps: self.steps,
                });
            }
        }

        RunOutcome {
            run_id,
            status,
            state,
            steps: self.steps,
            invocations: self.invocations,
            trace: self.trace,
        }
    }
}
