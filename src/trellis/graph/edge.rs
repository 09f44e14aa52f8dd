// SPDX-License-Identifier: MIT

//! Edge table entries and routers

use super::channel::State;
use super::node::RunContext;
use crate::adk::error::{CompileError, TrellisError};
use crate::trellis::condition::{self, Expression};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Reserved terminal marker
pub const END: &str = "__end__";

/// Reserved pseudo-node naming the run input
pub const START: &str = "__start__";

/// Wildcard label: used when a router's label is not otherwise mapped
pub const DEFAULT_ROUTE: &str = "*";

/// Decides the next label from the post-merge snapshot
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(&self, state: &State, ctx: &RunContext) -> Result<String, TrellisError>;
}

/// Router from a synchronous closure
pub struct FnRouter<F>(F);

impl<F> FnRouter<F>
where
    F: Fn(&State) -> String + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Router for FnRouter<F>
where
    F: Fn(&State) -> String + Send + Sync,
{
    async fn route(&self, state: &State, _ctx: &RunContext) -> Result<String, TrellisError> {
        Ok((self.0)(state))
    }
}

type AsyncRouteFn =
    dyn Fn(State, RunContext) -> BoxFuture<'static, Result<String, TrellisError>> + Send + Sync;

/// Router that may itself await (e.g. ask a model)
pub struct AsyncFnRouter {
    f: Box<AsyncRouteFn>,
}

impl AsyncFnRouter {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(State, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, TrellisError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |state, ctx| Box::pin(f(state, ctx))),
        }
    }
}

#[async_trait]
impl Router for AsyncFnRouter {
    async fn route(&self, state: &State, ctx: &RunContext) -> Result<String, TrellisError> {
        (self.f)(state.clone(), ctx.clone()).await
    }
}

/// First matching condition wins. With no match the router answers
/// `otherwise`, or [`DEFAULT_ROUTE`] when none is set.
#[derive(Debug, Clone, Default)]
pub struct ConditionRouter {
    branches: Vec<(Expression, String)>,
    otherwise: Option<String>,
}

impl ConditionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, condition: &str, label: impl Into<String>) -> Result<Self, CompileError> {
        let expr = condition::parse(condition)?;
        self.branches.push((expr, label.into()));
        Ok(self)
    }

    pub fn otherwise(mut self, label: impl Into<String>) -> Self {
        self.otherwise = Some(label.into());
        self
    }

    /// Every label this router can produce
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.branches.iter().map(|(_, l)| l.clone()).collect();
        labels.extend(self.otherwise.clone());
        labels
    }

    pub fn select(&self, state: &State) -> String {
        self.branches
            .iter()
            .find(|(expr, _)| condition::evaluate(expr, state))
            .map(|(_, label)| label.clone())
            .or_else(|| self.otherwise.clone())
            .unwrap_or_else(|| DEFAULT_ROUTE.to_string())
    }
}

#[async_trait]
impl Router for ConditionRouter {
    async fn route(&self, state: &State, _ctx: &RunContext) -> Result<String, TrellisError> {
        Ok(self.select(state))
    }
}

/// Outgoing edge of one node
#[derive(Clone)]
pub enum Edge {
    /// Unconditional next hop (a node name or [`END`])
    Static(String),
    /// Label lookup after asking a router
    Conditional {
        router: Arc<dyn Router>,
        routes: BTreeMap<String, String>,
    },
    /// Run `branches` concurrently, merge in declaration order, continue at `join`
    FanOut { branches: Vec<String>, join: String },
}

impl Edge {
    /// Every node name (or END) this edge may lead to
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Static(to) => vec![to.as_str()],
            Edge::Conditional { routes, .. } => routes.values().map(|s| s.as_str()).collect(),
            Edge::FanOut { branches, join } => branches
                .iter()
                .map(|s| s.as_str())
                .chain(std::iter::once(join.as_str()))
                .collect(),
        }
    }
}

/// Map a router label to its target, falling back to the wildcard
pub fn resolve_label<'a>(routes: &'a BTreeMap<String, String>, label: &str) -> Option<&'a str> {
    routes
        .get(label)
        .or_else(|| routes.get(DEFAULT_ROUTE))
        .map(|s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_label_uses_wildcard_only_when_unmapped() {
        let with_default = routes(&[("search", "searcher"), (DEFAULT_ROUTE, "fallback")]);
        assert_eq!(resolve_label(&with_default, "search"), Some("searcher"));
        assert_eq!(resolve_label(&with_default, "other"), Some("fallback"));

        let strict = routes(&[("search", "searcher")]);
        assert_eq!(resolve_label(&strict, "other"), None);
    }

    #[tokio::test]
    async fn test_condition_router_order_and_otherwise() {
        let router = ConditionRouter::new()
            .when("score > 0.8", "accept")
            .unwrap()
            .when("score > 0.5", "review")
            .unwrap()
            .otherwise("reject");

        let ctx = RunContext::new();
        let high: State = vec![("score", json!(0.9))].into_iter().collect();
        let mid: State = vec![("score", json!(0.6))].into_iter().collect();

        assert_eq!(router.route(&high, &ctx).await.unwrap(), "accept");
        assert_eq!(router.route(&mid, &ctx).await.unwrap(), "review");
        assert_eq!(router.route(&State::new(), &ctx).await.unwrap(), "reject");
        assert_eq!(router.labels(), vec!["accept", "review", "reject"]);
    }

    #[test]
    fn test_condition_router_without_otherwise_yields_wildcard() {
        let router = ConditionRouter::new().when("done", END).unwrap();
        assert_eq!(router.select(&State::new()), DEFAULT_ROUTE);
    }

    #[test]
    fn test_bad_condition_is_compile_error() {
        assert!(ConditionRouter::new().when("a ==", "x").is_err());
    }

    #[tokio::test]
    async fn test_async_router() {
        let router = AsyncFnRouter::new(|state: State, _ctx| async move {
            Ok(state.get_str("next").unwrap_or(END).to_string())
        });
        let state: State = vec![("next", json!("agent"))].into_iter().collect();
        assert_eq!(
            router.route(&state, &RunContext::new()).await.unwrap(),
            "agent"
        );
    }

    #[test]
    fn test_fan_out_targets_include_join() {
        let edge = Edge::FanOut {
            branches: vec!["a".to_string(), "b".to_string()],
            join: "j".to_string(),
        };
        assert_eq!(edge.targets(), vec!["a", "b", "j"]);
    }
}
