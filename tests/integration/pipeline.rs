//! Stage pipeline integration tests with stub stages.

use std::sync::Arc;
use std::time::Duration;

use mmflow::core::task::{TaskKey, TaskStatus};
use mmflow::error::Error;
use mmflow::notify::{ChannelSink, NoticeKind, NullSink};
use mmflow::orchestration::{ContextKind, RunState, Stage, StageOrchestrator};
use mmflow::workflow::RunId;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{three_tasks, StubCoder, StubModeler, StubWriter};

fn sequence() -> Vec<TaskKey> {
    ["eda", "ques1", "ques2", "ques3", "sensitivity_analysis"]
        .iter()
        .map(|k| TaskKey::new(*k))
        .collect()
}

fn orchestrator(modeler: Arc<StubModeler>, coder: StubCoder) -> StageOrchestrator {
    StageOrchestrator::new(
        RunId::new(),
        modeler,
        Arc::new(coder),
        Arc::new(StubWriter),
        Arc::new(NullSink),
    )
}

/// Given five tasks and stages that all succeed
/// When the pipeline runs
/// Then every task completes and later tasks see earlier outputs
#[tokio::test]
async fn test_pipeline_completes_every_task() {
    let modeler = Arc::new(StubModeler::default());
    let mut orch = orchestrator(modeler.clone(), StubCoder::default());

    let results = orch
        .run("problem", &three_tasks(), &sequence())
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert!(results.values().all(|r| r.is_complete()));
    assert_eq!(orch.state(), &RunState::Completed);

    let ques1 = &results[&TaskKey::new("ques1")];
    assert_eq!(ques1.model_solution.as_deref(), Some("model for ques1"));
    assert_eq!(ques1.rendered.as_deref(), Some("## ques1\ncode for ques1"));
    assert_eq!(ques1.artifacts.len(), 1);

    let eda = &results[&TaskKey::new("eda")];
    assert!(eda.model_solution.is_none());
    assert!(eda.code_transcript.as_deref().unwrap().contains("[]"));

    let seen = modeler.seen.lock().unwrap();
    let (key, context) = &seen[2];
    assert_eq!(key, "ques2");
    assert!(context.contains("Task eda Code Output:"));
    assert!(context.contains("Task ques1 Model:\nmodel for ques1"));
    assert!(context.contains("Task ques1 Code Output:"));
    assert!(!context.contains("ques2 Model"));

    // eda contributes only code output; each primary task contributes both.
    let kinds: Vec<ContextKind> = orch.context().entries().iter().map(|e| e.kind).collect();
    assert_eq!(kinds.len(), 8);
    assert_eq!(kinds[0], ContextKind::CodeOutput);
    assert_eq!(kinds[1], ContextKind::Model);
}

/// Given a coder that fails on ques2
/// When the pipeline runs
/// Then the error names ques2 and the code stage, ques1 stays complete,
/// and nothing after ques2 is attempted
#[tokio::test]
async fn test_stage_failure_preserves_partial_results() {
    let mut orch = orchestrator(Arc::new(StubModeler::default()), StubCoder::failing_on("ques2"));

    let err = orch
        .run("problem", &three_tasks(), &sequence())
        .await
        .unwrap_err();

    match &err {
        Error::StageExecution { task, stage, .. } => {
            assert_eq!(task, "ques2");
            assert_eq!(stage, "code");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_recoverable());

    assert!(orch.result("eda").unwrap().is_complete());
    assert!(orch.result("ques1").unwrap().is_complete());
    let failed = orch.result("ques2").unwrap();
    assert!(matches!(failed.status, TaskStatus::Failed { .. }));
    assert!(failed.rendered.is_none());
    assert!(orch.result("ques3").is_none());

    assert_eq!(
        orch.state(),
        &RunState::Failed {
            task: Some(TaskKey::new("ques2")),
            stage: Some(Stage::Code),
            error: err.to_string(),
        }
    );
    assert!(orch
        .context()
        .as_str()
        .contains("Task ques2 Model:\nmodel for ques2"));
}

/// Given a run that failed in ques2's code stage
/// When the pipeline is resumed
/// Then ques2 is redone once and ques3's model sees ques1 and ques2
#[tokio::test]
async fn test_resume_after_stage_failure() {
    let modeler = Arc::new(StubModeler::default());
    let mut orch = orchestrator(modeler.clone(), StubCoder::failing_once_on("ques2"));
    let tasks = three_tasks();

    assert!(orch.run("problem", &tasks, &sequence()).await.is_err());
    let results = orch.resume("problem", &tasks, &sequence()).await.unwrap();

    assert_eq!(results.len(), 5);
    assert!(results.values().all(|r| r.is_complete()));
    assert_eq!(orch.state(), &RunState::Completed);
    assert_eq!(orch.results().len(), 5);

    let seen = modeler.seen.lock().unwrap();
    let models: Vec<&str> = seen.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        models,
        vec!["eda", "ques1", "ques2", "ques2", "ques3", "sensitivity_analysis"]
    );
    let (_, ques3_context) = &seen[4];
    assert!(ques3_context.contains("Task ques1 Model:\nmodel for ques1"));
    assert!(ques3_context.contains("Task ques2 Model:\nmodel for ques2"));
    assert!(ques3_context.contains("Task ques2 Code Output:\noutput of ques2"));
    assert_eq!(ques3_context.matches("Task ques2 Model:").count(), 1);
}

/// Given a coder that stalls on ques3
/// When the pipeline runs under a short timeout
/// Then the run fails with Timeout and earlier tasks keep their results
#[tokio::test]
async fn test_timeout_preserves_partial_results() {
    let mut orch = orchestrator(Arc::new(StubModeler::default()), StubCoder::stalling_on("ques3"));
    let cancel = CancellationToken::new();

    let err = orch
        .run_with_timeout(
            "problem",
            &three_tasks(),
            &sequence(),
            Some(Duration::from_millis(200)),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(_)));
    assert!(orch.result("ques2").unwrap().is_complete());
    let in_flight = orch.result("ques3").unwrap();
    assert!(!in_flight.is_complete());
    assert!(matches!(in_flight.status, TaskStatus::Failed { .. }));
    match orch.state() {
        RunState::Failed { task, stage, .. } => {
            assert_eq!(task.as_ref().map(TaskKey::as_str), Some("ques3"));
            assert_eq!(*stage, Some(Stage::Code));
        }
        other => panic!("unexpected state: {:?}", other),
    }
}

/// Given a stalled run
/// When its token is cancelled
/// Then the run stops with Cancelled
#[tokio::test]
async fn test_cancellation_stops_run() {
    let mut orch = orchestrator(Arc::new(StubModeler::default()), StubCoder::stalling_on("ques1"));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = orch
        .run_with_timeout("problem", &three_tasks(), &sequence(), None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(orch.result("eda").unwrap().is_complete());
    assert!(!orch.result("ques1").unwrap().is_complete());
}

/// Notices follow stage progress and include the failure.
#[tokio::test]
async fn test_notices_published_per_stage() {
    let (sink, mut rx) = ChannelSink::channel(64);
    let run_id = RunId::new();
    let mut orch = StageOrchestrator::new(
        run_id,
        Arc::new(StubModeler::default()),
        Arc::new(StubCoder::failing_on("ques1")),
        Arc::new(StubWriter),
        Arc::new(sink),
    );

    let _ = orch.run("problem", &three_tasks(), &sequence()).await;
    drop(orch);

    let mut notices = Vec::new();
    while let Some(event) = rx.recv().await {
        assert_eq!(event.run_id, run_id);
        notices.push(event.notice);
    }
    assert_eq!(notices[0].kind, NoticeKind::Info);
    assert_eq!(notices[0].content, "model started for eda");
    let last = notices.last().unwrap();
    assert_eq!(last.kind, NoticeKind::Error);
    assert!(last.content.contains("ques1"));
}
