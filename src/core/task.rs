//! Task keys, the task set extracted from a problem, and per-task results.
//!
//! A [`TaskSet`] is created once from the coordinator's structured payload
//! and is read-only afterwards. [`TaskResult`] values are created when a task
//! enters its first stage and filled in as later stages complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Key of the exploratory data analysis phase that opens every plan.
pub const EDA_KEY: &str = "eda";
/// Key of the sensitivity analysis phase that closes every plan.
pub const SENSITIVITY_KEY: &str = "sensitivity_analysis";
/// Payload field carrying the declared number of primary tasks.
pub const COUNT_FIELD: &str = "ques_count";
const PRIMARY_PREFIX: &str = "ques";

const EDA_DESCRIPTION: &str =
    "Exploratory data analysis: clean and visualise the provided data sets; no complex models.";
const SENSITIVITY_DESCRIPTION: &str =
    "Sensitivity analysis: evaluate how changes in model parameters affect the results.";

/// Identifier of a schedulable unit of work (`ques1`, `eda`, ...).
///
/// Ordering is plain lexicographic string ordering, so `ques10` sorts
/// before `ques2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key names a primary (problem-derived) task.
    pub fn is_primary(&self) -> bool {
        is_primary_key(&self.0)
    }

    pub fn is_auxiliary(&self) -> bool {
        self.0 == EDA_KEY || self.0 == SENSITIVITY_KEY
    }

    pub fn eda() -> Self {
        Self::new(EDA_KEY)
    }

    pub fn sensitivity() -> Self {
        Self::new(SENSITIVITY_KEY)
    }
}

fn is_primary_key(key: &str) -> bool {
    key.starts_with(PRIMARY_PREFIX) && key != COUNT_FIELD
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl std::borrow::Borrow<str> for TaskKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The decomposed problem: primary tasks plus title and background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSet {
    title: Option<String>,
    background: Option<String>,
    declared_count: usize,
    tasks: BTreeMap<TaskKey, String>,
}

impl TaskSet {
    /// Build a task set from the coordinator's JSON mapping.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` when the payload is not an object, lacks an
    /// integer `ques_count`, carries a non-string task description, or names
    /// no primary task at all.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let object = payload.as_object().ok_or_else(|| {
            Error::MalformedPayload("task set payload is not a JSON object".to_string())
        })?;

        let declared_count = parse_count(object)?;

        let mut tasks = BTreeMap::new();
        for (key, value) in object {
            if !is_primary_key(key) {
                continue;
            }
            let description = value.as_str().ok_or_else(|| {
                Error::MalformedPayload(format!("description of {} is not a string", key))
            })?;
            tasks.insert(TaskKey::new(key.as_str()), description.to_string());
        }

        if tasks.is_empty() {
            return Err(Error::MalformedPayload(
                "task set payload names no primary task".to_string(),
            ));
        }

        Ok(Self {
            title: string_field(object, "title"),
            background: string_field(object, "background"),
            declared_count,
            tasks,
        })
    }

    /// Build a task set directly from `(key, description)` pairs.
    pub fn from_tasks<I, K, D>(tasks: I) -> Self
    where
        I: IntoIterator<Item = (K, D)>,
        K: Into<String>,
        D: Into<String>,
    {
        let tasks: BTreeMap<TaskKey, String> = tasks
            .into_iter()
            .map(|(k, d)| (TaskKey::new(k), d.into()))
            .collect();
        Self {
            title: None,
            background: None,
            declared_count: tasks.len(),
            tasks,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn background(&self) -> Option<&str> {
        self.background.as_deref()
    }

    /// The `ques_count` the payload declared, which may disagree with
    /// [`TaskSet::len`].
    pub fn declared_count(&self) -> usize {
        self.declared_count
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Primary task keys, ascending.
    pub fn primary_keys(&self) -> BTreeSet<TaskKey> {
        self.tasks.keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    /// Description for a primary or auxiliary key.
    pub fn description(&self, key: &TaskKey) -> Option<&str> {
        match key.as_str() {
            EDA_KEY => Some(EDA_DESCRIPTION),
            SENSITIVITY_KEY => Some(SENSITIVITY_DESCRIPTION),
            other => self.tasks.get(other).map(String::as_str),
        }
    }

    /// Full run plan: EDA, then `order`, then sensitivity analysis.
    pub fn plan(&self, order: &[TaskKey]) -> Vec<TaskKey> {
        let mut plan = Vec::with_capacity(order.len() + 2);
        plan.push(TaskKey::eda());
        plan.extend(order.iter().cloned());
        plan.push(TaskKey::sensitivity());
        plan
    }

    /// Pretty JSON of the task descriptions, for embedding in prompts.
    pub fn descriptions_json(&self) -> String {
        let mut map = Map::new();
        if let Some(title) = &self.title {
            map.insert("title".to_string(), Value::String(title.clone()));
        }
        if let Some(background) = &self.background {
            map.insert("background".to_string(), Value::String(background.clone()));
        }
        map.insert(COUNT_FIELD.to_string(), Value::from(self.declared_count));
        for (key, description) in &self.tasks {
            map.insert(key.to_string(), Value::String(description.clone()));
        }
        serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_default()
    }
}

fn parse_count(object: &Map<String, Value>) -> Result<usize> {
    let raw = object.get(COUNT_FIELD).ok_or_else(|| {
        Error::MalformedPayload(format!("missing required field {}", COUNT_FIELD))
    })?;
    let count = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    count.map(|c| c as usize).ok_or_else(|| {
        Error::MalformedPayload(format!("{} is not a non-negative integer: {}", COUNT_FIELD, raw))
    })
}

fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Lifecycle of a single task within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Not yet reached in the execution order.
    #[default]
    Pending,
    /// At least one stage has started.
    Running,
    /// All three stages finished.
    Completed,
    /// A stage raised an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Outputs of the three stages for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub key: TaskKey,
    pub status: TaskStatus,
    /// Stage 1: solution narrative.
    pub model_solution: Option<String>,
    /// Stage 2: the coder's final response.
    pub code_response: Option<String>,
    /// Stage 2: execution transcript.
    pub code_transcript: Option<String>,
    /// Stage 2: files produced by code execution.
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    /// Stage 3: rendered section text.
    pub rendered: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// Create a result for a task that is entering its first stage.
    pub fn begin(key: TaskKey) -> Self {
        Self {
            key,
            status: TaskStatus::Running,
            model_solution: None,
            code_response: None,
            code_transcript: None,
            artifacts: Vec::new(),
            rendered: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
