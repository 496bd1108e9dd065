//! The per-task pipeline: model, then code, then write, for every task in
//! the execution order.
//!
//! Tasks and stages run strictly one after another. Each task's model
//! solution and code output are appended to a [`StageContext`] that later
//! tasks' modeling prompts receive in full. A failing stage stops the run;
//! results for finished work stay on the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agents::CodeReport;
use crate::core::task::{TaskKey, TaskResult, TaskSet};
use crate::error::{Error, Result};
use crate::notify::{Notice, NotificationSink};
use crate::workflow::RunId;
use crate::{mlog, mlog_debug, mlog_error};

/// One of the three per-task stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Model,
    Code,
    Write,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Model => write!(f, "model"),
            Stage::Code => write!(f, "code"),
            Stage::Write => write!(f, "write"),
        }
    }
}

/// What every stage is told about the task at hand.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub problem: &'a str,
    pub tasks: &'a TaskSet,
    pub key: &'a TaskKey,
}

impl StageInput<'_> {
    /// The task's description, empty when the key is unknown.
    pub fn description(&self) -> &str {
        self.tasks.description(self.key).unwrap_or_default()
    }

    /// Background for prose stages: the task set's background if the
    /// coordinator found one, otherwise the whole problem text.
    pub fn background(&self) -> &str {
        self.tasks.background().unwrap_or(self.problem)
    }
}

/// Stage 1: produce a solution narrative for a task.
///
/// `None` means the task needs no model of its own.
#[async_trait]
pub trait ModelStage: Send + Sync {
    async fn model(&self, input: &StageInput<'_>, context: &str) -> Result<Option<String>>;
}

/// Stage 2: turn the solution into executed code.
#[async_trait]
pub trait CodeStage: Send + Sync {
    async fn code(&self, input: &StageInput<'_>, model_solution: &str) -> Result<CodeReport>;
}

/// Stage 3: render the task's section.
#[async_trait]
pub trait WriteStage: Send + Sync {
    async fn write(&self, input: &StageInput<'_>, report: &CodeReport) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Model,
    CodeOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: TaskKey,
    pub kind: ContextKind,
    pub text: String,
}

/// Append-only record of earlier stage outputs within one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageContext {
    entries: Vec<ContextEntry>,
    rendered: String,
}

impl StageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, key: &TaskKey, kind: ContextKind, text: &str) {
        let label = match kind {
            ContextKind::Model => "Model",
            ContextKind::CodeOutput => "Code Output",
        };
        self.rendered
            .push_str(&format!("\n\nTask {} {}:\n{}", key, label, text));
        self.entries.push(ContextEntry {
            key: key.clone(),
            kind,
            text: text.to_string(),
        });
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// All entries concatenated in the order they were appended.
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry recorded for `key`, keeping the rest in order.
    pub fn discard(&mut self, key: &TaskKey) {
        let kept: Vec<ContextEntry> = self.entries.drain(..).filter(|e| &e.key != key).collect();
        self.rendered.clear();
        for entry in kept {
            self.append(&entry.key, entry.kind, &entry.text);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Where a run stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    #[default]
    Planned,
    Running {
        task: TaskKey,
        stage: Stage,
    },
    Completed,
    Failed {
        task: Option<TaskKey>,
        stage: Option<Stage>,
        error: String,
    },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed { .. })
    }
}

/// Drives the three stages across an execution sequence.
pub struct StageOrchestrator {
    run_id: RunId,
    modeler: Arc<dyn ModelStage>,
    coder: Arc<dyn CodeStage>,
    writer: Arc<dyn WriteStage>,
    notifier: Arc<dyn NotificationSink>,
    state: RunState,
    context: StageContext,
    results: Vec<TaskResult>,
}

impl StageOrchestrator {
    pub fn new(
        run_id: RunId,
        modeler: Arc<dyn ModelStage>,
        coder: Arc<dyn CodeStage>,
        writer: Arc<dyn WriteStage>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            run_id,
            modeler,
            coder,
            writer,
            notifier,
            state: RunState::Planned,
            context: StageContext::new(),
            results: Vec::new(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Results in execution order, including a failed or abandoned task.
    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    pub fn result(&self, key: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.key.as_str() == key)
    }

    pub fn results_by_key(&self) -> BTreeMap<TaskKey, TaskResult> {
        self.results
            .iter()
            .map(|r| (r.key.clone(), r.clone()))
            .collect()
    }

    fn notify(&self, notice: Notice) {
        self.notifier.publish(self.run_id, &notice);
    }

    /// Run every task in `sequence` through all three stages.
    ///
    /// # Errors
    ///
    /// Returns `StageExecution` naming the task and stage that failed. The
    /// orchestrator is left in [`RunState::Failed`] with earlier results
    /// intact.
    pub async fn run(
        &mut self,
        problem: &str,
        tasks: &TaskSet,
        sequence: &[TaskKey],
    ) -> Result<BTreeMap<TaskKey, TaskResult>> {
        if self.state != RunState::Planned {
            return Err(Error::Validation(format!(
                "run {} has already started",
                self.run_id.short()
            )));
        }
        mlog!(
            "[pipeline] run {} starting with {} tasks",
            self.run_id.short(),
            sequence.len()
        );
        self.drive(problem, tasks, sequence).await
    }

    /// Continue a failed run over the same `sequence`.
    ///
    /// The unfinished task's partial result and its context entries are
    /// dropped, completed tasks are skipped, and the remaining tasks see the
    /// context accumulated so far.
    ///
    /// # Errors
    ///
    /// `Validation` unless the orchestrator is in [`RunState::Failed`];
    /// otherwise the same errors as [`StageOrchestrator::run`].
    pub async fn resume(
        &mut self,
        problem: &str,
        tasks: &TaskSet,
        sequence: &[TaskKey],
    ) -> Result<BTreeMap<TaskKey, TaskResult>> {
        if !matches!(self.state, RunState::Failed { .. }) {
            return Err(Error::Validation(format!(
                "run {} has not failed, nothing to resume",
                self.run_id.short()
            )));
        }
        let unfinished: Vec<TaskKey> = self
            .results
            .iter()
            .filter(|r| !r.is_complete())
            .map(|r| r.key.clone())
            .collect();
        for key in &unfinished {
            self.context.discard(key);
        }
        self.results.retain(TaskResult::is_complete);

        mlog!(
            "[pipeline] run {} resuming with {} of {} tasks done",
            self.run_id.short(),
            self.results.len(),
            sequence.len()
        );
        self.notify(Notice::info(format!(
            "resuming after {} completed tasks",
            self.results.len()
        )));
        self.drive(problem, tasks, sequence).await
    }

    async fn drive(
        &mut self,
        problem: &str,
        tasks: &TaskSet,
        sequence: &[TaskKey],
    ) -> Result<BTreeMap<TaskKey, TaskResult>> {
        for key in sequence {
            if self.result(key.as_str()).is_some_and(TaskResult::is_complete) {
                mlog_debug!("[pipeline] {} already completed, skipping", key);
                continue;
            }
            self.run_task(problem, tasks, key).await?;
        }

        self.state = RunState::Completed;
        self.notify(Notice::success(format!(
            "all {} tasks completed",
            sequence.len()
        )));
        mlog!("[pipeline] run {} completed", self.run_id.short());
        Ok(self.results_by_key())
    }

    async fn run_task(&mut self, problem: &str, tasks: &TaskSet, key: &TaskKey) -> Result<()> {
        let input = StageInput {
            problem,
            tasks,
            key,
        };
        self.results.push(TaskResult::begin(key.clone()));

        self.enter(key, Stage::Model);
        let modeled = self.modeler.model(&input, self.context.as_str()).await;
        let solution = match modeled {
            Ok(solution) => solution.filter(|s| !s.trim().is_empty()),
            Err(e) => return Err(self.fail(key, Stage::Model, e)),
        };
        if let Some(solution) = &solution {
            self.context.append(key, ContextKind::Model, solution);
            self.notify(Notice::success(format!("model finished for {}", key)));
        }
        self.current_mut().model_solution = solution.clone();

        self.enter(key, Stage::Code);
        let coded = self
            .coder
            .code(&input, solution.as_deref().unwrap_or_default())
            .await;
        let report = match coded {
            Ok(report) => report,
            Err(e) => return Err(self.fail(key, Stage::Code, e)),
        };
        self.context
            .append(key, ContextKind::CodeOutput, &report.transcript);
        self.notify(Notice::success(format!("code finished for {}", key)));
        {
            let current = self.current_mut();
            current.code_response = Some(report.response.clone());
            current.code_transcript = Some(report.transcript.clone());
            current.artifacts = report.artifacts.clone();
        }

        self.enter(key, Stage::Write);
        let written = self.writer.write(&input, &report).await;
        let rendered = match written {
            Ok(rendered) => rendered,
            Err(e) => return Err(self.fail(key, Stage::Write, e)),
        };
        self.notify(Notice::success(format!("section written for {}", key)));

        let current = self.current_mut();
        current.rendered = Some(rendered);
        current.complete();
        Ok(())
    }

    fn enter(&mut self, key: &TaskKey, stage: Stage) {
        mlog_debug!("[pipeline] {} -> {}", key, stage);
        self.state = RunState::Running {
            task: key.clone(),
            stage,
        };
        self.notify(Notice::info(format!("{} started for {}", stage, key)));
    }

    // run_task pushes a result before the first stage, so one always exists.
    fn current_mut(&mut self) -> &mut TaskResult {
        let index = self.results.len().saturating_sub(1);
        &mut self.results[index]
    }

    fn fail(&mut self, key: &TaskKey, stage: Stage, error: Error) -> Error {
        let error = match error {
            e @ Error::StageExecution { .. } => e,
            other => Error::StageExecution {
                task: key.to_string(),
                stage: stage.to_string(),
                message: other.to_string(),
            },
        };
        let message = error.to_string();
        mlog_error!("[pipeline] {}", message);
        self.current_mut().fail(&message);
        self.state = RunState::Failed {
            task: Some(key.clone()),
            stage: Some(stage),
            error: message.clone(),
        };
        self.notify(Notice::error(message));
        error
    }

    /// [`StageOrchestrator::run`] bounded by an optional deadline and a
    /// cancellation token.
    ///
    /// When either fires, the in-flight stage call is dropped, its task is
    /// marked failed, and the run ends in [`RunState::Failed`] with
    /// `Timeout` or `Cancelled`. Finished results are kept.
    pub async fn run_with_timeout(
        &mut self,
        problem: &str,
        tasks: &TaskSet,
        sequence: &[TaskKey],
        limit: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<TaskKey, TaskResult>> {
        let outcome = {
            let run = self.run(problem, tasks, sequence);
            let bounded = async move {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, run)
                        .await
                        .unwrap_or(Err(Error::Timeout(limit))),
                    None => run.await,
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = bounded => result,
            }
        };

        if let Err(e @ (Error::Timeout(_) | Error::Cancelled)) = &outcome {
            self.abandon(e);
        }
        outcome
    }

    fn abandon(&mut self, error: &Error) {
        let message = error.to_string();
        let (task, stage) = match &self.state {
            RunState::Running { task, stage } => (Some(task.clone()), Some(*stage)),
            _ => (None, None),
        };
        if let Some(last) = self.results.last_mut() {
            if !last.is_complete() {
                last.fail(&message);
            }
        }
        mlog_error!(
            "[pipeline] run {} abandoned during {:?}/{:?}: {}",
            self.run_id.short(),
            task,
            stage,
            message
        );
        self.state = RunState::Failed {
            task,
            stage,
            error: message.clone(),
        };
        self.notify(Notice::error(message));
    }
}
