//! End-to-end workflow integration tests.
//!
//! Every run is driven by a scripted oracle, so each test spells out the
//! exact sequence of completions the run consumes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mmflow::core::dag::OrderPath;
use mmflow::core::task::{TaskKey, TaskStatus};
use mmflow::error::Error;
use mmflow::notify::NoticeKind;
use mmflow::oracle::ScriptedOracle;
use mmflow::orchestration::{RunState, Stage};
use mmflow::sandbox::ProcessExecutor;
use mmflow::workflow::{RunPhase, RunStatus, Workflow};

use crate::fixtures::{
    observed_workflow, test_config, workflow, CancellingOracle, RunScript, StubExecutor,
    THREE_TASKS,
};

const FULL_SEQUENCE: [&str; 5] = ["eda", "ques1", "ques2", "ques3", "sensitivity_analysis"];
const CHAIN: &str = r#"{"ques2": ["ques1"], "ques3": ["ques1", "ques2"]}"#;

fn keys(list: &[TaskKey]) -> Vec<&str> {
    list.iter().map(TaskKey::as_str).collect()
}

/// Given a three-task problem with a chained graph
/// When the workflow executes
/// Then every task completes in order and the closing sections are written
#[tokio::test]
async fn test_e2e_happy_path() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[CHAIN])
        .stages(&FULL_SEQUENCE)
        .closing()
        .into_oracle();
    let problem = "# Problem Background\nWater.\n\n# Problem Requirement\nPlan supply.";

    let report = workflow(oracle.clone(), test_config())
        .execute(problem)
        .await
        .unwrap();

    assert!(report.is_success(), "run failed: {:?}", report.error);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.phase, RunPhase::Complete);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(keys(&report.plan.sequence), FULL_SEQUENCE.to_vec());
    assert_eq!(report.results.len(), 5);
    assert!(report.results.values().all(|r| r.is_complete()));
    assert_eq!(oracle.remaining(), 0);

    let ques1 = &report.results[&TaskKey::new("ques1")];
    assert_eq!(ques1.model_solution.as_deref(), Some("final model ques1"));
    assert_eq!(ques1.code_response.as_deref(), Some("coded ques1"));
    assert_eq!(ques1.rendered.as_deref(), Some("section ques1"));

    assert_eq!(report.closing_sections.len(), 6);
    assert!(report.paper.starts_with("closing firstPage"));
    assert!(report.paper.ends_with("closing judge"));
    assert!(report.paper.contains("section ques3\n\nsection sensitivity_analysis"));

    assert_eq!(report.evaluation.background, "Water.");
    assert_eq!(report.evaluation.problem_requirement, "Plan supply.");

    let json = report.to_json().unwrap();
    assert!(json.contains("\"path\": \"topological\""));
}

/// Later tasks' modeling prompts carry the earlier tasks' outputs.
#[tokio::test]
async fn test_e2e_context_reaches_later_models() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[CHAIN])
        .stages(&FULL_SEQUENCE)
        .closing()
        .into_oracle();

    workflow(oracle.clone(), test_config())
        .execute("problem")
        .await
        .unwrap();

    let modeling_prompts: Vec<String> = oracle
        .received()
        .iter()
        .filter_map(|c| c.last())
        .map(|m| m.content.clone())
        .filter(|c| c.contains("Design a mathematical model"))
        .collect();
    assert_eq!(modeling_prompts.len(), 3);
    assert!(modeling_prompts[0].contains("Task eda Code Output:"));
    assert!(!modeling_prompts[0].contains("Task ques1 Model:"));
    assert!(modeling_prompts[1].contains("Task ques1 Model:\nfinal model ques1"));
    assert!(modeling_prompts[2].contains("Task ques2 Code Output:"));
}

/// Given an oracle that runs dry while modeling ques2
/// When the workflow executes
/// Then the report is failed at ques2 with ques1's results intact
#[tokio::test]
async fn test_e2e_stage_failure_reports_partial_results() {
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[CHAIN])
        .stages(&["eda", "ques1"])
        .into_oracle();

    let report = workflow(oracle, test_config())
        .execute("problem")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.phase, RunPhase::Executing);
    let error = report.error.clone().unwrap();
    assert!(error.contains("ques2"), "{}", error);
    assert!(error.contains("model"), "{}", error);
    match &report.state {
        RunState::Failed { task, stage, .. } => {
            assert_eq!(task.as_ref().map(TaskKey::as_str), Some("ques2"));
            assert_eq!(*stage, Some(Stage::Model));
        }
        other => panic!("unexpected state: {:?}", other),
    }

    assert!(report.results[&TaskKey::new("ques1")].is_complete());
    assert!(matches!(
        report.results[&TaskKey::new("ques2")].status,
        TaskStatus::Failed { .. }
    ));
    assert!(!report.results.contains_key(&TaskKey::new("ques3")));
    assert!(report.closing_sections.is_empty());
    assert_eq!(report.paper, "section eda\n\nsection ques1");
}

/// Given a slow oracle and a one-second run timeout
/// When the workflow executes
/// Then the run fails with a timeout and finished tasks are kept
#[tokio::test]
async fn test_e2e_timeout_keeps_finished_tasks() {
    let replies = RunScript::new(THREE_TASKS)
        .dependencies(&[CHAIN])
        .stages(&FULL_SEQUENCE)
        .into_replies();
    let oracle = Arc::new(ScriptedOracle::new(replies).with_delay(Duration::from_millis(300)));
    let mut config = test_config();
    config.run_timeout_secs = Some(1);

    let report = workflow(oracle, config).execute("problem").await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.error.as_deref().unwrap().contains("timed out"));
    assert!(report.results[&TaskKey::new("eda")].is_complete());
    let in_flight = &report.results[&TaskKey::new("ques1")];
    assert!(!in_flight.is_complete());
    assert!(!report.results.contains_key(&TaskKey::new("ques2")));
}

/// Given a run cancelled while the first closing section is being written
/// When the workflow executes
/// Then the run stops there and is reported failed with every task kept
#[tokio::test]
async fn test_e2e_cancel_during_closing_sections() {
    let scripted = RunScript::new(THREE_TASKS)
        .dependencies(&[CHAIN])
        .stages(&FULL_SEQUENCE)
        .closing()
        .into_oracle();
    let cancel = CancellationToken::new();
    // 3 planning calls, 2 per auxiliary task and 8 per primary task.
    let oracle = Arc::new(CancellingOracle {
        inner: scripted.clone(),
        at_call: 31,
        cancel: cancel.clone(),
    });

    let report = Workflow::new(test_config(), oracle, StubExecutor::new())
        .with_cancellation(cancel)
        .execute("problem")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.phase, RunPhase::Rendering);
    assert_eq!(report.error.as_deref(), Some("Run cancelled"));
    assert_eq!(scripted.calls(), 31);
    assert_eq!(report.results.len(), 5);
    assert!(report.results.values().all(|r| r.is_complete()));
    assert!(report.closing_sections.is_empty());
}

/// Given a problem the coordinator cannot turn into tasks
/// When the workflow executes
/// Then execution fails with ExtractionFailed and no report
#[tokio::test]
async fn test_e2e_extraction_failure() {
    let oracle = Arc::new(ScriptedOracle::new(["a poem", "another poem", "{}", "[1]"]));

    let err = workflow(oracle, test_config())
        .execute("write me a poem")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ExtractionFailed { attempts: 4, .. }));
}

/// Given two runs with different graphs
/// When they execute concurrently
/// Then each produces its own order and results
#[tokio::test]
async fn test_e2e_concurrent_runs_are_isolated() {
    let reversed = ["eda", "ques3", "ques1", "ques2", "sensitivity_analysis"];
    let first = RunScript::new(THREE_TASKS)
        .dependencies(&[CHAIN])
        .stages(&FULL_SEQUENCE)
        .closing()
        .into_oracle();
    let second = RunScript::new(THREE_TASKS)
        .dependencies(&[r#"{"ques1": ["ques3"], "ques2": ["ques3"]}"#])
        .stages(&reversed)
        .closing()
        .into_oracle();

    let workflows: Vec<Workflow> = vec![
        workflow(first.clone(), test_config()),
        workflow(second.clone(), test_config()),
    ];
    let reports = join_all(workflows.iter().map(|w| w.execute("problem"))).await;

    let reports: Vec<_> = reports.into_iter().map(|r| r.unwrap()).collect();
    assert_ne!(reports[0].run_id, reports[1].run_id);
    assert!(reports.iter().all(|r| r.is_success()));
    assert_eq!(keys(&reports[0].plan.sequence), FULL_SEQUENCE.to_vec());
    assert_eq!(keys(&reports[1].plan.sequence), reversed.to_vec());
    assert_eq!(first.remaining(), 0);
    assert_eq!(second.remaining(), 0);
}

/// Given prose for every graph attempt
/// When the workflow executes
/// Then the run still completes and the fallback is visible in the report
/// and the notices
#[tokio::test]
async fn test_e2e_fallback_is_flagged() {
    let prose = "ques2 probably depends on ques1.";
    let oracle = RunScript::new(THREE_TASKS)
        .dependencies(&[prose, prose, prose])
        .stages(&FULL_SEQUENCE)
        .into_oracle();
    let mut config = test_config();
    config.render_closing_sections = false;

    let (wf, mut rx) = observed_workflow(oracle, config);
    let report = wf.execute("problem").await.unwrap();
    drop(wf);

    assert!(report.is_success());
    assert!(report.plan.dependencies.degraded);
    assert_eq!(report.plan.order.path, OrderPath::EmptyGraphFallback);
    assert!(report.closing_sections.is_empty());

    let mut flagged = false;
    while let Some(event) = rx.recv().await {
        let notice = event.notice;
        if notice.kind == NoticeKind::Error && notice.content.contains("empty_graph_fallback") {
            flagged = true;
        }
    }
    assert!(flagged);
}

/// Given a real interpreter and a coder reply that writes a file
/// When the workflow executes
/// Then the file is reported as an artifact and offered to the writer
#[tokio::test]
async fn test_e2e_executes_code_and_collects_artifacts() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let executor = Arc::new(ProcessExecutor::with_interpreter(
        PathBuf::from("/bin/sh"),
        dir.path(),
        Duration::from_secs(10),
    ));
    let oracle = RunScript::new(r#"{"ques_count": 1, "ques1": "Count the rows"}"#)
        .dependencies(&["{}"])
        .reply("Exploring:\n```sh\necho rows=3 > summary.txt\necho done\n```")
        .reply("EDA finished.")
        .reply("section eda")
        .stages(&["ques1", "sensitivity_analysis"])
        .into_oracle();
    let mut config = test_config();
    config.render_closing_sections = false;

    let report = Workflow::new(config, oracle.clone(), executor)
        .execute("problem")
        .await
        .unwrap();

    assert!(report.is_success(), "run failed: {:?}", report.error);
    let eda = &report.results[&TaskKey::new("eda")];
    assert_eq!(eda.code_response.as_deref(), Some("EDA finished."));
    assert!(eda.code_transcript.as_deref().unwrap().contains("done"));
    assert_eq!(eda.artifacts, vec![dir.path().join("summary.txt")]);

    let writer_prompt = oracle.received()[5].last().unwrap().content.clone();
    assert!(writer_prompt.contains("summary.txt"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("summary.txt")).unwrap(),
        "rows=3\n"
    );
}
