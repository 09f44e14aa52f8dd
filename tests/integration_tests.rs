//! Integration tests for graph construction and execution
//!
//! These tests drive whole graphs through the public API with mock models
//! and tools; nothing here touches the network.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trellis_rs::adk::error::{CompileError, RunFault, TimeoutScope, TrellisError};
use trellis_rs::adk::model::{Content, GenerationConfig, Model, Part};
use trellis_rs::adk::tool::Tool;
use trellis_rs::trellis::config::ExecutionConfig;
use trellis_rs::trellis::definition::{DefinitionBuilder, DefinitionLoader};
use trellis_rs::trellis::graph::{
    AsyncFnNode, Channel, ChannelSink, CollectingSink, CompiledGraph, FnNode, FnRouter,
    InMemoryCheckpointer, Reducer, RunContext, RunEvent, RunOutcome, RunStatus, State, StateGraph,
    SubgraphNode, Update, END,
};
use trellis_rs::trellis::messages::{self, MESSAGES};
use trellis_rs::trellis::registry::ToolRegistry;
use trellis_rs::trellis::toolloop::{ToolLoop, NEXT};
use trellis_rs::trellis::tools::calculator_tools;
use trellis_rs::trellis::workflows::supervisor;

// ============================================================================
// Mock Components
// ============================================================================

/// Mock model that returns predefined responses
struct MockModel {
    responses: Vec<Content>,
    response_index: AtomicUsize,
}

impl MockModel {
    fn new(responses: Vec<Content>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            response_index: AtomicUsize::new(0),
        })
    }

    fn text_response(text: &str) -> Content {
        Content::model(text)
    }

    fn tool_call_response(tool_name: &str, args: Value) -> Content {
        Content::new(
            "model",
            vec![Part::FunctionCall {
                name: tool_name.to_string(),
                args,
                thought_signature: None,
            }],
        )
    }

    fn calls(&self) -> usize {
        self.response_index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_content(
        &self,
        _history: &[Content],
        _config: Option<&GenerationConfig>,
        _tools: Option<&[Arc<dyn Tool>]>,
    ) -> Result<Content, TrellisError> {
        let idx = self.response_index.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .responses
            .get(idx)
            .cloned()
            .unwrap_or_else(|| MockModel::text_response("Max responses reached")))
    }
}

/// Static schema for MockTool
static MOCK_TOOL_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "input": {"type": "string"}
        }
    })
});

/// Mock tool that returns a predefined response
struct MockTool {
    name: String,
    description: String,
    response: Value,
}

impl MockTool {
    fn new(name: &str, response: Value) -> Self {
        Self {
            name: name.to_string(),
            description: format!("Mock tool: {}", name),
            response,
        }
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &Value {
        &MOCK_TOOL_SCHEMA
    }

    async fn execute(&self, _input: Value) -> Result<Value, TrellisError> {
        Ok(self.response.clone())
    }
}

fn counter_node(channel: &'static str) -> FnNode {
    FnNode::new(move |_| Ok(Update::new().set(channel, json!(1))))
}

/// `start -> A -> router`, router loops back to A until `hits` has 3 entries
fn bounded_loop(router_label: Option<&'static str>) -> CompiledGraph {
    let mut graph = StateGraph::new("bounded");
    graph
        .add_channel(Channel::append("hits"))
        .add_node("A", counter_node("hits"))
        .add_conditional_edges(
            "A",
            FnRouter::new(move |state: &State| match router_label {
                Some(label) => label.to_string(),
                None if state.get_array("hits").len() < 3 => "loop".to_string(),
                None => "done".to_string(),
            }),
            [("loop", "A"), ("done", END)],
        )
        .set_entry_point("A");
    graph.compile().unwrap()
}

// ============================================================================
// Core Scenarios
// ============================================================================

#[tokio::test]
async fn test_linear_graph() {
    let mut graph = StateGraph::new("linear");
    graph
        .add_channel(Channel::replace("x", json!(0)))
        .add_node("A", FnNode::new(|_| Ok(Update::new().set("x", json!(1)))))
        .add_node(
            "B",
            FnNode::new(|state| {
                let x = state.get_f64("x").unwrap_or_default();
                Ok(Update::new().set("x", json!(x + 1.0)))
            }),
        )
        .add_edge("A", "B")
        .add_edge("B", END)
        .set_entry_point("A");
    let graph = graph.compile().unwrap();

    let outcome = graph.run(Update::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.state.get_f64("x"), Some(2.0));
    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.trace, vec!["A", "B"]);
}

#[tokio::test]
async fn test_bounded_loop() {
    let outcome = bounded_loop(None).run(Update::new()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.get_array("hits").len(), 3);
    assert_eq!(outcome.invocations, 3);
}

#[tokio::test]
async fn test_unknown_route_label_is_a_routing_fault() {
    let outcome = bounded_loop(Some("unknown")).run(Update::new()).await;

    assert_eq!(
        outcome.fault(),
        Some(&RunFault::Routing {
            node: "A".to_string(),
            label: "unknown".to_string(),
        })
    );
    assert_eq!(outcome.steps, 1);
    // the step's update was merged before routing failed
    assert_eq!(outcome.state.get_array("hits").len(), 1);
}

#[tokio::test]
async fn test_subgraph_composition() {
    let mut inner = StateGraph::new("worker");
    inner
        .add_channel(Channel::replace("draft", Value::Null))
        .add_channel(Channel::replace("result", Value::Null))
        .add_node(
            "draft",
            FnNode::new(|_| Ok(Update::new().set("draft", json!("rough")))),
        )
        .add_node(
            "polish",
            FnNode::new(|state| {
                let draft = state.get_str("draft").unwrap_or_default();
                Ok(Update::new().set("result", json!(format!("{} but polished", draft))))
            }),
        )
        .add_edge("draft", "polish")
        .add_edge("polish", END)
        .set_entry_point("draft");
    let inner = Arc::new(inner.compile().unwrap());

    let mut outer = StateGraph::new("outer");
    outer
        .add_channel(Channel::replace("decision", Value::Null))
        .add_channel(Channel::replace("result", Value::Null))
        .add_node(
            "supervisor",
            FnNode::new(|state| {
                let decision = if state.get_str("result").is_some() { "done" } else { "work" };
                Ok(Update::new().set("decision", json!(decision)))
            }),
        )
        .add_subgraph("W", inner)
        .add_conditional_edges(
            "supervisor",
            FnRouter::new(|state: &State| state.get_str("decision").unwrap_or("done").to_string()),
            [("work", "W"), ("done", END)],
        )
        .add_edge("W", "supervisor")
        .set_entry_point("supervisor");
    let outer = outer.compile().unwrap();

    let outcome = outer.run(Update::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.trace, vec!["supervisor", "W", "supervisor"]);
    assert_eq!(outcome.state.get_str("result"), Some("rough but polished"));
    // the inner scratch channel stays inside the subgraph
    assert!(!outcome.state.contains("draft"));
}

fn sum_reducer() -> Reducer {
    Reducer::custom(|current, update| {
        json!(current.as_i64().unwrap_or(0) + update.as_i64().unwrap_or(0))
    })
}

/// `seed -> W -> END`, where `seed` writes `seed_value` to `channel`
fn seeded_outer(outer_channel: Channel, seed_value: Value, inner: SubgraphNode) -> StateGraph {
    let channel = outer_channel.name().to_string();
    let mut outer = StateGraph::new("outer");
    outer
        .add_channel(outer_channel)
        .add_node(
            "seed",
            FnNode::new(move |_| Ok(Update::new().set(channel.clone(), seed_value.clone()))),
        )
        .add_subgraph_node("W", inner)
        .add_edge("seed", "W")
        .add_edge("W", END)
        .set_entry_point("seed");
    outer
}

#[tokio::test]
async fn test_subgraph_accumulator_is_not_counted_twice() {
    let mut adder = StateGraph::new("adder");
    adder
        .add_channel(Channel::with_reducer("total", sum_reducer(), json!(0)))
        .add_node("add", FnNode::new(|_| Ok(Update::new().set("total", json!(5)))))
        .add_edge("add", END)
        .set_entry_point("add");
    let adder = Arc::new(adder.compile().unwrap());
    let outer_total = || Channel::with_reducer("total", sum_reducer(), json!(0));

    let undeclared = seeded_outer(outer_total(), json!(10), SubgraphNode::new(adder.clone()));
    assert!(matches!(
        undeclared.compile(),
        Err(CompileError::IncompatibleSharedChannel { ref channel, .. }) if channel == "total"
    ));

    let declared = seeded_outer(
        outer_total(),
        json!(10),
        SubgraphNode::new(adder).with_replace_on_return(["total"]),
    );
    let outcome = declared.compile().unwrap().run(Update::new()).await;
    assert!(outcome.is_completed());
    assert_eq!(outcome.state.get("total"), Some(&json!(15)));
}

#[tokio::test]
async fn test_subgraph_history_is_not_duplicated() {
    let rewrite = |reducer_channel: Channel| {
        let mut inner = StateGraph::new("inner");
        inner
            .add_channel(reducer_channel)
            .add_node(
                "write",
                FnNode::new(|state| {
                    let mut log = state.get_array("log").to_vec();
                    log.push(json!("b"));
                    Ok(Update::new().set("log", Value::Array(log)))
                }),
            )
            .add_edge("write", END)
            .set_entry_point("write");
        Arc::new(inner.compile().unwrap())
    };
    let replace_inner = rewrite(Channel::replace("log", json!([])));

    let undeclared = seeded_outer(
        Channel::append("log"),
        json!("a"),
        SubgraphNode::new(replace_inner.clone()),
    );
    assert!(matches!(
        undeclared.compile(),
        Err(CompileError::IncompatibleSharedChannel { ref channel, .. }) if channel == "log"
    ));

    let declared = seeded_outer(
        Channel::append("log"),
        json!("a"),
        SubgraphNode::new(replace_inner).with_replace_on_return(["log"]),
    );
    let outcome = declared.compile().unwrap().run(Update::new()).await;
    assert_eq!(outcome.state.get("log"), Some(&json!(["a", "b"])));

    // matching append channels hand back only what the inner run added
    let append_inner = {
        let mut inner = StateGraph::new("inner");
        inner
            .add_channel(Channel::append("log"))
            .add_node("write", FnNode::new(|_| Ok(Update::new().set("log", json!("b")))))
            .add_edge("write", END)
            .set_entry_point("write");
        Arc::new(inner.compile().unwrap())
    };
    let matching = seeded_outer(Channel::append("log"), json!("a"), SubgraphNode::new(append_inner));
    let outcome = matching.compile().unwrap().run(Update::new()).await;
    assert_eq!(outcome.state.get("log"), Some(&json!(["a", "b"])));
}

// ============================================================================
// Termination and Bounds
// ============================================================================

#[tokio::test]
async fn test_unbounded_cycle_hits_recursion_limit() {
    let mut graph = StateGraph::new("spin");
    graph
        .add_channel(Channel::append("hits"))
        .add_node("A", counter_node("hits"))
        .add_edge("A", "A")
        .set_entry_point("A")
        .with_config(ExecutionConfig::default().with_recursion_limit(5));
    let graph = graph.compile().unwrap();
    assert_eq!(graph.warnings().len(), 1);

    let outcome = graph.run(Update::new()).await;

    assert_eq!(
        outcome.fault(),
        Some(&RunFault::RecursionLimitExceeded { limit: 5 })
    );
    assert_eq!(outcome.state.get_array("hits").len(), 5);
}

#[tokio::test]
async fn test_step_timeout() {
    let mut graph = StateGraph::new("slow");
    graph
        .add_node(
            "slow",
            AsyncFnNode::new(|_, _| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Update::new())
            }),
        )
        .add_edge("slow", END)
        .set_entry_point("slow")
        .with_config(ExecutionConfig::default().with_step_timeout(Duration::from_millis(50)));
    let graph = graph.compile().unwrap();

    let outcome = graph.run(Update::new()).await;

    assert_eq!(
        outcome.fault(),
        Some(&RunFault::Timeout {
            scope: TimeoutScope::Step,
            node: Some("slow".to_string()),
        })
    );
}

#[tokio::test]
async fn test_cancellation_before_first_step() {
    let graph = bounded_loop(None);
    let ctx = RunContext::new();
    ctx.cancellation().cancel();

    let outcome = graph.invoke(Update::new(), &ctx).await;

    assert!(outcome.is_cancelled());
    assert_eq!(outcome.steps, 0);
    assert!(matches!(outcome.into_result(), Err(TrellisError::Cancelled)));
}

#[tokio::test]
async fn test_cancellation_between_steps() {
    let ctx = RunContext::new();
    let token = ctx.cancellation().clone();

    let mut graph = StateGraph::new("cancel");
    graph
        .add_channel(Channel::append("hits"))
        .add_node(
            "A",
            FnNode::new(move |_| {
                token.cancel();
                Ok(Update::new().set("hits", json!(1)))
            }),
        )
        .add_edge("A", "A")
        .set_entry_point("A");
    let graph = graph.compile().unwrap();

    let outcome = graph.invoke(Update::new(), &ctx).await;

    assert!(outcome.is_cancelled());
    assert_eq!(outcome.steps, 1);
    assert_eq!(outcome.state.get_array("hits").len(), 1);
}

#[tokio::test]
async fn test_input_with_unregistered_channel_is_rejected() {
    let outcome = bounded_loop(None)
        .run(Update::new().set("bogus", json!(true)))
        .await;

    assert_eq!(
        outcome.fault(),
        Some(&RunFault::InvalidUpdate {
            node: "__start__".to_string(),
            channel: "bogus".to_string(),
        })
    );
    assert_eq!(outcome.steps, 0);
}

// ============================================================================
// Compilation
// ============================================================================

/// One lookup-then-answer exchange with a fresh scripted model
async fn scripted_lookup(graph: &CompiledGraph, tools: &ToolRegistry) -> RunOutcome {
    let ctx = RunContext::new()
        .with_model(MockModel::new(vec![
            MockModel::tool_call_response("lookup", json!({"input": "x"})),
            MockModel::text_response("Here it is"),
        ]))
        .with_tools(tools.clone());
    graph
        .invoke(Update::new().set(MESSAGES, json!("find x")), &ctx)
        .await
}

#[tokio::test]
async fn test_compile_is_deterministic() {
    let mut graph = StateGraph::new("twice");
    graph
        .add_channel(Channel::append("hits"))
        .add_node("A", counter_node("hits"))
        .add_node("orphan", counter_node("hits"))
        .add_edge("A", END)
        .add_edge("orphan", END)
        .set_entry_point("A");
    let first = graph.compile().unwrap();
    let second = graph.compile().unwrap();
    assert_eq!(first.warnings(), second.warnings());
    assert_eq!(first.warnings().len(), 1);

    // both artifacts behave alike, and a threadless re-run starts clean
    let mut agent = ToolLoop::new("agent").build();
    agent.with_checkpointer(Arc::new(InMemoryCheckpointer::new()));
    let first = agent.compile().unwrap();
    let second = agent.compile().unwrap();

    let registry = ToolRegistry::new();
    registry
        .register(Arc::new(MockTool::new("lookup", json!("found it"))))
        .await;
    let a = scripted_lookup(&first, &registry).await;
    let b = scripted_lookup(&second, &registry).await;
    let c = scripted_lookup(&first, &registry).await;

    assert!(a.is_completed());
    assert_eq!(a.trace, vec!["agent", "agent_tools", "agent"]);
    assert_eq!(messages::read(&a.state, MESSAGES).len(), 4);
    for other in [&b, &c] {
        assert_eq!(other.status, a.status);
        assert_eq!(other.trace, a.trace);
        assert_eq!(other.state, a.state);
    }
}

#[test]
fn test_compile_rejects_structural_defects() {
    let mut missing_entry = StateGraph::new("no-entry");
    missing_entry
        .add_node("A", FnNode::new(|_| Ok(Update::new())))
        .add_edge("A", END);
    assert_eq!(
        missing_entry.compile().err(),
        Some(CompileError::MissingEntryPoint)
    );

    let mut dangling = StateGraph::new("dangling");
    dangling
        .add_node("A", FnNode::new(|_| Ok(Update::new())))
        .add_edge("A", "nowhere")
        .set_entry_point("A");
    assert_eq!(
        dangling.compile().err(),
        Some(CompileError::UnknownNode {
            from: "A".to_string(),
            to: "nowhere".to_string(),
        })
    );
}

// ============================================================================
// Fan-out and Snapshot Isolation
// ============================================================================

#[tokio::test]
async fn test_fan_out_merges_in_declaration_order() {
    let branch = |label: &'static str, delay_ms: u64| {
        AsyncFnNode::new(move |_, _| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(Update::new().set("log", json!(label)))
        })
    };

    let mut graph = StateGraph::new("fan");
    graph
        .add_channel(Channel::append("log"))
        .add_node("start", counter_node("log"))
        .add_node("slow", branch("slow", 60))
        .add_node("fast", branch("fast", 0))
        .add_node("join", FnNode::new(|_| Ok(Update::new().set("log", json!("join")))))
        .add_fan_out("start", ["slow", "fast"], "join")
        .add_edge("join", END)
        .set_entry_point("start");
    let graph = graph.compile().unwrap();

    let outcome = graph.run(Update::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(
        outcome.state.get("log"),
        Some(&json!([1, "slow", "fast", "join"]))
    );
    assert_eq!(outcome.steps, 3);
    assert_eq!(outcome.invocations, 4);
}

#[tokio::test]
async fn test_fan_out_branches_share_the_pre_step_snapshot() {
    let mut graph = StateGraph::new("isolation");
    graph
        .add_channel(Channel::replace("x", json!(0)))
        .add_channel(Channel::replace("seen_by_reader", Value::Null))
        .add_node("start", FnNode::new(|_| Ok(Update::new())))
        .add_node("writer", FnNode::new(|_| Ok(Update::new().set("x", json!(1)))))
        .add_node(
            "reader",
            FnNode::new(|state| {
                let x = state.get("x").cloned().unwrap_or(Value::Null);
                Ok(Update::new().set("seen_by_reader", x))
            }),
        )
        .add_fan_out("start", ["writer", "reader"], END)
        .set_entry_point("start");
    let graph = graph.compile().unwrap();

    let outcome = graph.run(Update::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.state.get("x"), Some(&json!(1)));
    assert_eq!(outcome.state.get("seen_by_reader"), Some(&json!(0)));
}

// ============================================================================
// Checkpoints and Events
// ============================================================================

#[tokio::test]
async fn test_thread_resumes_from_checkpoint() {
    let mut graph = StateGraph::new("memory");
    graph
        .add_channel(Channel::append("hits"))
        .add_node("A", counter_node("hits"))
        .add_edge("A", END)
        .set_entry_point("A")
        .with_checkpointer(Arc::new(InMemoryCheckpointer::new()));
    let graph = graph.compile().unwrap();

    let t1 = RunContext::new().with_thread("t1");
    graph.invoke(Update::new(), &t1).await;
    let second = graph.invoke(Update::new(), &t1).await;
    assert_eq!(second.state.get_array("hits").len(), 2);

    let fresh = graph
        .invoke(Update::new(), &RunContext::new().with_thread("t2"))
        .await;
    assert_eq!(fresh.state.get_array("hits").len(), 1);
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let sink = Arc::new(CollectingSink::new());
    let ctx = RunContext::new().with_events(sink.clone());

    let outcome = bounded_loop(None).invoke(Update::new(), &ctx).await;
    assert!(outcome.is_completed());

    let events = sink.events();
    assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(RunEvent::RunCompleted { steps: 3, .. })
    ));
    let started = events
        .iter()
        .filter(|e| matches!(e, RunEvent::NodeStarted { .. }))
        .count();
    assert_eq!(started, 3);
    assert!(events.iter().all(|e| e.run_id() == outcome.run_id));
}

#[tokio::test]
async fn test_channel_sink_streams_events() {
    let (sink, mut rx) = ChannelSink::new();
    let ctx = RunContext::new().with_events(Arc::new(sink));

    let outcome = bounded_loop(Some("unknown")).invoke(Update::new(), &ctx).await;
    assert!(outcome.fault().is_some());

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    assert!(matches!(last, Some(RunEvent::RunFailed { .. })));
}

#[tokio::test]
async fn test_stalled_event_consumer_does_not_affect_run() {
    let (sink, mut rx) = ChannelSink::with_capacity(4);
    let ctx = RunContext::new().with_events(Arc::new(sink.clone()));

    // nobody reads while the loop runs
    let outcome = bounded_loop(None).invoke(Update::new(), &ctx).await;
    assert!(outcome.is_completed());
    assert_eq!(outcome.state.get_array("hits").len(), 3);

    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 4);
    assert!(sink.dropped() > 0);
}

// ============================================================================
// Tool-Invocation Loop
// ============================================================================

#[tokio::test]
async fn test_tool_loop_runs_calculator_then_answers() {
    let registry = ToolRegistry::new();
    registry.register_all(calculator_tools()).await;
    let model = MockModel::new(vec![
        MockModel::tool_call_response("multiply_numbers", json!({"a": 6, "b": 7})),
        MockModel::text_response("The answer is 42"),
    ]);

    let graph = ToolLoop::new("agent")
        .system_prompt("Use the calculator.")
        .compile()
        .unwrap();
    let ctx = RunContext::new()
        .with_model(model.clone())
        .with_tools(registry);

    let outcome = graph
        .invoke(Update::new().set(MESSAGES, json!("What is 6 times 7?")), &ctx)
        .await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.trace, vec!["agent", "agent_tools", "agent"]);
    assert_eq!(model.calls(), 2);

    let history = messages::read(&outcome.state, MESSAGES);
    assert_eq!(history.len(), 4);
    assert!(matches!(
        &history[2].parts[0],
        Part::FunctionResponse { name, .. } if name == "multiply_numbers"
    ));
    assert_eq!(history[3].text(), "The answer is 42");
}

#[tokio::test]
async fn test_tool_loop_reports_missing_tool_to_model() {
    let registry = ToolRegistry::new();
    registry
        .register(Arc::new(MockTool::new("lookup", json!({"found": true}))))
        .await;
    let model = MockModel::new(vec![
        MockModel::tool_call_response("nonexistent", json!({})),
        MockModel::text_response("I could not do that"),
    ]);

    let graph = ToolLoop::new("agent").compile().unwrap();
    let ctx = RunContext::new().with_model(model).with_tools(registry);

    let outcome = graph
        .invoke(Update::new().set(MESSAGES, json!("go")), &ctx)
        .await;

    assert!(outcome.is_completed());
    let history = messages::read(&outcome.state, MESSAGES);
    match &history[2].parts[0] {
        Part::FunctionResponse { response, .. } => assert!(response.get("error").is_some()),
        other => panic!("expected a function response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tool_loop_handoff_leaves_label_for_caller() {
    let model = MockModel::new(vec![MockModel::text_response("HANDOFF: billing")]);
    let graph = ToolLoop::new("triage")
        .handoffs(vec!["billing".to_string()])
        .compile()
        .unwrap();
    let ctx = RunContext::new().with_model(model);

    let outcome = graph
        .invoke(Update::new().set(MESSAGES, json!("refund please")), &ctx)
        .await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.state.get_str(NEXT), Some("billing"));
}

#[tokio::test]
async fn test_node_without_model_fails_the_run() {
    let graph = ToolLoop::new("agent").compile().unwrap();

    let outcome = graph
        .invoke(Update::new().set(MESSAGES, json!("hi")), &RunContext::new())
        .await;

    assert!(matches!(
        outcome.fault(),
        Some(RunFault::NodeInvocation { node, .. }) if node == "agent"
    ));
}

// ============================================================================
// Supervisor
// ============================================================================

fn echo_member(reply: &'static str) -> Arc<CompiledGraph> {
    let mut graph = StateGraph::new(reply);
    graph
        .add_channel(Channel::append(MESSAGES))
        .add_node(
            "echo",
            FnNode::new(move |_| {
                Ok(Update::new().set(MESSAGES, messages::append_one(&Content::model(reply))))
            }),
        )
        .add_edge("echo", END)
        .set_entry_point("echo");
    Arc::new(graph.compile().unwrap())
}

#[tokio::test]
async fn test_supervisor_delegates_then_finishes() {
    let model = MockModel::new(vec![
        MockModel::text_response("researcher"),
        MockModel::text_response("FINISH"),
    ]);
    let graph = supervisor::graph_with(vec![
        ("researcher".to_string(), echo_member("found it")),
        ("writer".to_string(), echo_member("wrote it")),
    ])
    .compile()
    .unwrap();
    let ctx = RunContext::new().with_model(model.clone());

    let outcome = graph
        .invoke(Update::new().set(MESSAGES, json!("look this up")), &ctx)
        .await;

    assert!(outcome.is_completed());
    assert_eq!(
        outcome.trace,
        vec![supervisor::NAME, "researcher", supervisor::NAME]
    );
    let history = messages::read(&outcome.state, MESSAGES);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text(), "found it");
    assert_eq!(model.calls(), 2);
}

// ============================================================================
// Graph Definitions
// ============================================================================

#[tokio::test]
async fn test_yaml_definition_routes_on_conditions() {
    let yaml = r#"
name: grader
channels:
  score: { default: 0 }
  verdict: {}
entry: score_it
nodes:
  score_it:
    kind: set
    values: { score: 0.2 }
  pass:
    kind: set
    values: { verdict: "pass" }
  fail:
    kind: set
    values: { verdict: "fail" }
edges:
  - from: score_it
    when:
      - condition: "score > 0.5"
        to: pass
    otherwise: fail
  - { from: pass, to: END }
  - { from: fail, to: END }
"#;
    let def = DefinitionLoader::parse_yaml(yaml).unwrap();
    let graph = DefinitionBuilder::offline(ToolRegistry::new())
        .build(&def, Path::new("."))
        .await
        .unwrap();

    let outcome = graph.run(Update::new()).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.trace, vec!["score_it", "fail"]);
    assert_eq!(outcome.state.get_str("verdict"), Some("fail"));
}

#[tokio::test]
async fn test_yaml_agent_uses_registered_tools() {
    let yaml = r#"
name: calculator
entry: math
nodes:
  math:
    kind: agent
    instructions: "Solve it with the calculator."
    tools: [add_numbers]
"#;
    let registry = ToolRegistry::new();
    registry.register_all(calculator_tools()).await;
    let def = DefinitionLoader::parse_yaml(yaml).unwrap();
    let graph = DefinitionBuilder::offline(registry.clone())
        .build(&def, Path::new("."))
        .await
        .unwrap();

    let model = MockModel::new(vec![
        MockModel::tool_call_response("add_numbers", json!({"a": 2, "b": 3})),
        MockModel::text_response("5"),
    ]);
    let ctx = RunContext::new().with_model(model).with_tools(registry);

    let outcome = graph
        .invoke(Update::new().set(MESSAGES, json!("2 + 3?")), &ctx)
        .await;

    assert!(outcome.is_completed());
    assert_eq!(messages::last_text(&outcome.state, MESSAGES), "5");
}

#[tokio::test]
async fn test_yaml_definition_with_unknown_target_fails_to_build() {
    let yaml = r#"
name: broken
entry: a
nodes:
  a: { kind: set, values: {} }
edges:
  - { from: a, to: ghost }
"#;
    let def = DefinitionLoader::parse_yaml(yaml).unwrap();
    let err = DefinitionBuilder::offline(ToolRegistry::new())
        .build(&def, Path::new("."))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TrellisError::Compile(CompileError::UnknownNode { .. })
    ));
}
