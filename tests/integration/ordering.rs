//! Planning integration tests: bootstrap, dependency analysis and ordering
//! driven through a scripted oracle.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use mmflow::core::dag::{DependencyGraph, GraphOrderer, OrderPath};
use mmflow::core::task::TaskKey;
use mmflow::error::Error;
use mmflow::workflow::Planner;
use serde_json::json;

use crate::fixtures::{test_config, workflow, RunScript, THREE_TASKS};

fn strs(keys: &[TaskKey]) -> Vec<&str> {
    keys.iter().map(TaskKey::as_str).collect()
}

fn known(keys: &[&str]) -> BTreeSet<TaskKey> {
    keys.iter().map(|k| TaskKey::new(*k)).collect()
}

/// Given a graph where ques3 needs ques1 and ques2, and ques2 needs ques1
/// When the run is planned
/// Then prerequisites come first and auxiliary tasks wrap the order
#[tokio::test]
async fn test_plan_follows_dependencies() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[r#"{"ques2": ["ques1"], "ques3": ["ques1", "ques2"]}"#])
        .into_oracle();

    let plan = workflow(oracle.clone(), test_config())
        .plan("problem")
        .await
        .unwrap();

    assert_eq!(plan.order.path, OrderPath::Topological);
    assert_eq!(strs(&plan.order.order), vec!["ques1", "ques2", "ques3"]);
    assert_eq!(
        strs(&plan.sequence),
        vec!["eda", "ques1", "ques2", "ques3", "sensitivity_analysis"]
    );
    assert!(!plan.dependencies.degraded);
    assert_eq!(oracle.calls(), 3);
}

/// Planning needs only an oracle, no code executor.
#[tokio::test]
async fn test_planner_runs_without_executor() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[r#"{"ques3": ["ques2"]}"#])
        .into_oracle();

    let plan = Planner::new(oracle.clone()).plan("problem").await.unwrap();

    assert_eq!(strs(&plan.order.order), vec!["ques2", "ques3", "ques1"]);
    assert_eq!(strs(&plan.order.appended), vec!["ques1"]);
    assert_eq!(oracle.calls(), 3);
}

/// Given a token cancelled before planning starts
/// When the run is planned
/// Then planning stops with Cancelled before any oracle call
#[tokio::test]
async fn test_plan_honours_cancellation() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&["{}"])
        .into_oracle();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = workflow(oracle.clone(), test_config())
        .with_cancellation(cancel)
        .execute("problem")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(oracle.calls(), 0);
}

/// Given a graph whose entries list no prerequisites
/// When the run is planned
/// Then the empty-graph fallback orders the tasks by key
#[tokio::test]
async fn test_plan_without_edges_uses_empty_graph_fallback() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[r#"{"ques3": [], "ques1": [], "ques2": []}"#])
        .into_oracle();

    let plan = workflow(oracle, test_config()).plan("problem").await.unwrap();

    assert!(!plan.dependencies.degraded);
    assert_eq!(plan.order.path, OrderPath::EmptyGraphFallback);
    assert_eq!(strs(&plan.order.order), vec!["ques1", "ques2", "ques3"]);
}

/// Given two malformed graph replies and a valid third one
/// When the run is planned
/// Then the third reply is used and nothing degrades
#[tokio::test]
async fn test_plan_recovers_on_third_graph_attempt() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[
            "The graph is as follows: ques2 after ques1",
            "{ques3: ques2",
            r#"```json
{"ques3": ["ques2"], "ques2": ["ques1"]}
```"#,
        ])
        .into_oracle();

    let plan = workflow(oracle, test_config()).plan("problem").await.unwrap();

    assert_eq!(plan.dependencies.attempts, 3);
    assert!(!plan.dependencies.degraded);
    assert_eq!(plan.order.path, OrderPath::Topological);
    assert_eq!(strs(&plan.order.order), vec!["ques1", "ques2", "ques3"]);
}

/// Given prose with no graph for every attempt
/// When the run is planned
/// Then planning still succeeds with the flagged lexicographic fallback
#[tokio::test]
async fn test_plan_prose_only_uses_flagged_fallback() {
    let prose = "Each task depends on understanding the data first.";
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[prose, prose, prose])
        .into_oracle();

    let plan = workflow(oracle.clone(), test_config())
        .plan("problem")
        .await
        .unwrap();

    assert!(plan.dependencies.degraded);
    assert!(plan.graph().is_empty());
    assert_eq!(plan.order.path, OrderPath::EmptyGraphFallback);
    assert!(plan.order.used_fallback());
    assert_eq!(strs(&plan.order.order), vec!["ques1", "ques2", "ques3"]);
    assert_eq!(oracle.calls(), 5);
}

/// Given a graph that only mentions ques1 and ques2
/// When ques3 is also a known task
/// Then ques3 is appended at the end
#[tokio::test]
async fn test_plan_appends_disconnected_task() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[r#"{"ques2": ["ques1"]}"#])
        .into_oracle();

    let plan = workflow(oracle, test_config()).plan("problem").await.unwrap();

    assert_eq!(plan.order.path, OrderPath::Topological);
    assert_eq!(strs(&plan.order.order), vec!["ques1", "ques2", "ques3"]);
    assert_eq!(strs(&plan.order.appended), vec!["ques3"]);
}

/// Given a cyclic graph
/// When the run is planned
/// Then the whole order falls back to key order
#[tokio::test]
async fn test_plan_cycle_falls_back() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[r#"{"ques1": ["ques3"], "ques3": ["ques1"], "ques2": []}"#])
        .into_oracle();

    let plan = workflow(oracle, test_config()).plan("problem").await.unwrap();

    assert_eq!(plan.order.path, OrderPath::InvalidGraphFallback);
    assert!(plan.order.invalid_reason.is_some());
    assert_eq!(strs(&plan.order.order), vec!["ques1", "ques2", "ques3"]);
}

/// Given a coordinator that first answers with prose, then with a payload
/// missing ques_count, then with a valid payload
/// When the run is planned
/// Then each retry carries a correction and the third payload is used
#[tokio::test]
async fn test_plan_coordinator_corrective_retry() {
    let oracle = RunScript::new("This looks like an optimization problem.")
        .reply(r#"{"ques1": "A"}"#)
        .reply(THREE_TASKS)
        .dependencies(&[r#"{}"#])
        .into_oracle();

    let plan = workflow(oracle.clone(), test_config())
        .plan("problem")
        .await
        .unwrap();

    assert_eq!(plan.task_set.len(), 3);
    assert_eq!(plan.order.path, OrderPath::EmptyGraphFallback);
    assert!(!plan.dependencies.degraded);

    let received = oracle.received();
    assert_eq!(received[1].len(), received[0].len() + 2);
    assert_eq!(received[2].len(), received[1].len() + 2);
}

/// Given a coordinator that never produces a usable payload
/// When the run is planned
/// Then planning fails with ExtractionFailed after four attempts
#[tokio::test]
async fn test_plan_extraction_failure_is_terminal() {
    let oracle = RunScript::new("not a modeling problem")
        .reply("still prose")
        .reply("{'title': 'x'}")
        .reply("[]")
        .into_oracle();

    let err = workflow(oracle.clone(), test_config())
        .plan("problem")
        .await
        .unwrap_err();

    match err {
        Error::ExtractionFailed { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(oracle.calls(), 4);
}

#[test]
fn test_orderer_ignores_unknown_keys() {
    let graph = DependencyGraph::from_payload(&json!({
        "ques2": ["ques1", "ques9"],
        "ques9": []
    }));
    let outcome = GraphOrderer::new().order(&graph, &known(&["ques1", "ques2"]));
    assert_eq!(strs(&outcome.order), vec!["ques1", "ques2"]);
}

#[test]
fn test_orderer_lexicographic_fallback_ignores_payload_content() {
    let graph = DependencyGraph::from_payload(&json!({"ques2": "ques1", "ques10": 7}));
    let outcome = GraphOrderer::new().order(&graph, &known(&["ques2", "ques10", "ques1"]));
    assert_eq!(outcome.path, OrderPath::InvalidGraphFallback);
    assert_eq!(strs(&outcome.order), vec!["ques1", "ques10", "ques2"]);
}

#[test]
fn test_orderer_topological_property_on_wide_graph() {
    let payload = json!({
        "ques5": ["ques3", "ques4"],
        "ques4": ["ques2"],
        "ques3": ["ques1", "ques2"],
        "ques6": ["ques1"]
    });
    let graph = DependencyGraph::from_payload(&payload);
    let keys = known(&["ques1", "ques2", "ques3", "ques4", "ques5", "ques6", "ques7"]);
    let outcome = GraphOrderer::new().order(&graph, &keys);

    assert_eq!(outcome.path, OrderPath::Topological);
    assert_eq!(outcome.order.len(), keys.len());
    let position = |k: &str| outcome.order.iter().position(|o| o.as_str() == k).unwrap();
    for (node, prerequisites) in payload.as_object().unwrap() {
        for prerequisite in prerequisites.as_array().unwrap() {
            assert!(position(prerequisite.as_str().unwrap()) < position(node));
        }
    }
    assert_eq!(outcome.order.last().unwrap().as_str(), "ques7");
}
