//! Run lifecycle: bootstrap, planning, stage execution and closing sections.
//!
//! A [`Workflow`] owns everything one run needs. Independent workflows share
//! no mutable state and can run concurrently.

mod state;
mod types;

pub use state::{PhaseHistoryEntry, PhaseTracker};
pub use types::{RunId, RunPhase, RunStatus};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::agents::writer::assemble_paper;
use crate::agents::{
    CoderAgent, CoordinatorAgent, DependencyAnalysis, DependencyAnalyzer, ModelerAgent,
    WriterAgent,
};
use crate::config::Config;
use crate::core::dag::{DependencyGraph, GraphOrderer, OrderOutcome};
use crate::core::task::{TaskKey, TaskResult, TaskSet};
use crate::error::{Error, Result};
use crate::notify::{LogSink, Notice, NotificationSink};
use crate::oracle::TextOracle;
use crate::orchestration::{RunState, StageOrchestrator};
use crate::sandbox::CodeExecutor;
use crate::{mlog, mlog_error};

const BACKGROUND_MARKER: &str = "# Problem Background";
const REQUIREMENT_MARKER: &str = "# Problem Requirement";

/// Problem text split for downstream evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationContext {
    pub background: String,
    pub problem_requirement: String,
}

impl EvaluationContext {
    /// Split on the background and requirement headings when both are
    /// present; otherwise the whole text is the background.
    pub fn from_problem(problem: &str) -> Self {
        if problem.contains(BACKGROUND_MARKER) {
            if let Some((background, requirement)) = problem.split_once(REQUIREMENT_MARKER) {
                return Self {
                    background: background.replace(BACKGROUND_MARKER, "").trim().to_string(),
                    problem_requirement: requirement.trim().to_string(),
                };
            }
        }
        Self {
            background: problem.to_string(),
            problem_requirement: String::new(),
        }
    }
}

/// Bootstrap and ordering results, before any stage runs.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub task_set: TaskSet,
    pub dependencies: DependencyAnalysis,
    pub order: OrderOutcome,
    /// Full execution sequence, auxiliary tasks included.
    pub sequence: Vec<TaskKey>,
}

impl Plan {
    pub fn graph(&self) -> &DependencyGraph {
        &self.dependencies.graph
    }
}

/// Everything a run produced, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub plan: Plan,
    pub state: RunState,
    pub results: BTreeMap<TaskKey, TaskResult>,
    pub closing_sections: Vec<(String, String)>,
    pub paper: String,
    pub evaluation: EvaluationContext,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `report.json` and, when there is one, `paper.md` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("report.json");
        std::fs::write(&path, self.to_json()?)?;
        if !self.paper.is_empty() {
            std::fs::write(dir.join("paper.md"), &self.paper)?;
        }
        Ok(path)
    }
}

/// Bootstrap and dependency ordering for one run. Needs no code executor.
pub struct Planner {
    run_id: RunId,
    oracle: Arc<dyn TextOracle>,
    notifier: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
}

impl Planner {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self {
            run_id: RunId::new(),
            oracle,
            notifier: Arc::new(LogSink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn notify(&self, notice: Notice) {
        self.notifier.publish(self.run_id, &notice);
    }

    /// Races `work` against the cancellation token.
    async fn cancellable<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = work => result,
        }
    }

    /// Extract the task set, analyze dependencies and order the tasks.
    ///
    /// # Errors
    ///
    /// Fails when the task set cannot be extracted or the run is cancelled.
    /// Dependency and ordering problems are absorbed by fallbacks recorded
    /// in the plan.
    pub async fn plan(&self, problem: &str) -> Result<Plan> {
        self.cancellable(self.build_plan(problem)).await
    }

    async fn build_plan(&self, problem: &str) -> Result<Plan> {
        self.notify(Notice::info("extracting tasks"));
        let boot = CoordinatorAgent::new(self.oracle.clone())
            .bootstrap(problem)
            .await?;
        self.notify(Notice::success(format!(
            "{} tasks extracted",
            boot.task_set.len()
        )));

        self.notify(Notice::info("analyzing dependencies"));
        let dependencies = DependencyAnalyzer::new(self.oracle.clone())
            .analyze_in(boot.conversation, problem, &boot.task_set)
            .await;

        let order = GraphOrderer::new().order(&dependencies.graph, &boot.task_set.primary_keys());
        if order.used_fallback() {
            self.notify(Notice::error(format!(
                "dependency graph unusable ({}), ordering tasks by key",
                order.path
            )));
        }
        let sequence = boot.task_set.plan(&order.order);
        mlog!(
            "[workflow] run {} plan: {}",
            self.run_id.short(),
            sequence
                .iter()
                .map(TaskKey::as_str)
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(Plan {
            task_set: boot.task_set,
            dependencies,
            order,
            sequence,
        })
    }
}

pub struct Workflow {
    planner: Planner,
    config: Config,
    executor: Arc<dyn CodeExecutor>,
}

impl Workflow {
    pub fn new(
        config: Config,
        oracle: Arc<dyn TextOracle>,
        executor: Arc<dyn CodeExecutor>,
    ) -> Self {
        Self {
            planner: Planner::new(oracle),
            config,
            executor,
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.planner = self.planner.with_run_id(run_id);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.planner = self.planner.with_notifier(notifier);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.planner = self.planner.with_cancellation(cancel);
        self
    }

    pub fn run_id(&self) -> RunId {
        self.planner.run_id
    }

    /// A token that cancels this run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.planner.cancel.clone()
    }

    /// See [`Planner::plan`].
    pub async fn plan(&self, problem: &str) -> Result<Plan> {
        self.planner.plan(problem).await
    }

    /// Run the whole workflow for `problem`.
    ///
    /// Stage failures, timeouts and cancellation end the run early but
    /// still produce a report carrying the partial results and the error.
    ///
    /// # Errors
    ///
    /// Returns an error only when planning fails or is cancelled.
    pub async fn execute(&self, problem: &str) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut tracker = PhaseTracker::new();
        tracker.start();
        mlog!(
            "[workflow] run {} started with oracle {}",
            self.planner.run_id.short(),
            self.planner.oracle.name()
        );

        let plan = match self.plan(problem).await {
            Ok(plan) => plan,
            Err(e) => {
                tracker.fail();
                mlog_error!(
                    "[workflow] run {} planning failed: {}",
                    self.planner.run_id.short(),
                    e
                );
                self.planner.notify(Notice::error(e.to_string()));
                return Err(e);
            }
        };
        tracker.transition(RunPhase::Planning)?;
        tracker.transition(RunPhase::Executing)?;

        let mut orchestrator = StageOrchestrator::new(
            self.planner.run_id,
            Arc::new(ModelerAgent::new(self.planner.oracle.clone())),
            Arc::new(
                CoderAgent::new(self.planner.oracle.clone(), self.executor.clone())
                    .with_limits(self.config.max_retries, self.config.max_chat_turns),
            ),
            Arc::new(WriterAgent::new(self.planner.oracle.clone())),
            self.planner.notifier.clone(),
        );
        let outcome = orchestrator
            .run_with_timeout(
                problem,
                &plan.task_set,
                &plan.sequence,
                self.config.run_timeout(),
                &self.planner.cancel,
            )
            .await;

        let mut error = None;
        let mut closing_sections = Vec::new();
        match outcome {
            Ok(_) => {
                if self.config.render_closing_sections {
                    tracker.transition(RunPhase::Rendering)?;
                    let background = plan.task_set.background().unwrap_or(problem);
                    let writer = WriterAgent::new(self.planner.oracle.clone());
                    let closing = writer.closing_sections(background, orchestrator.results());
                    match self.planner.cancellable(closing).await {
                        Ok(sections) => closing_sections = sections,
                        Err(e) => error = Some(e),
                    }
                }
                if error.is_none() {
                    tracker.transition(RunPhase::Complete)?;
                }
            }
            Err(e) => error = Some(e),
        }

        if let Some(e) = &error {
            tracker.fail();
            mlog_error!("[workflow] run {} failed: {}", self.planner.run_id.short(), e);
        } else {
            mlog!("[workflow] run {} completed", self.planner.run_id.short());
        }

        let paper = assemble_paper(&closing_sections, orchestrator.results());
        Ok(RunReport {
            run_id: self.planner.run_id,
            status: tracker.status(),
            phase: tracker.phase(),
            state: orchestrator.state().clone(),
            results: orchestrator.results_by_key(),
            closing_sections,
            paper,
            evaluation: EvaluationContext::from_problem(problem),
            error: error.as_ref().map(Error::to_string),
            plan,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
