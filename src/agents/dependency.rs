//! Dependency analysis: a prose rationale, then a machine-readable graph.

use std::sync::Arc;

use serde::Serialize;

use crate::conversation::Conversation;
use crate::core::dag::DependencyGraph;
use crate::core::task::{TaskKey, TaskSet};
use crate::extract::extract_payload;
use crate::oracle::TextOracle;
use crate::prompts;
use crate::{mlog, mlog_error, mlog_warn};

/// Graph-construction calls made before degrading to an empty graph.
pub const MAX_GRAPH_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct DependencyAnalysis {
    pub graph: DependencyGraph,
    pub rationale: String,
    /// Set when no usable graph was obtained and `graph` is empty by
    /// necessity rather than by the oracle's answer.
    pub degraded: bool,
    /// Graph-construction calls made.
    pub attempts: usize,
    #[serde(skip)]
    pub conversation: Conversation,
}

pub struct DependencyAnalyzer {
    oracle: Arc<dyn TextOracle>,
    max_attempts: usize,
}

impl DependencyAnalyzer {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self {
            oracle,
            max_attempts: MAX_GRAPH_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Analyze dependencies in a fresh conversation.
    pub async fn analyze(&self, problem: &str, tasks: &TaskSet) -> DependencyAnalysis {
        self.analyze_in(Conversation::new(), problem, tasks).await
    }

    /// Analyze dependencies, continuing `conversation`.
    ///
    /// Never fails: an unusable rationale or graph degrades to an empty
    /// graph with `degraded` set, which the orderer resolves by its
    /// fallback.
    pub async fn analyze_in(
        &self,
        conversation: Conversation,
        problem: &str,
        tasks: &TaskSet,
    ) -> DependencyAnalysis {
        let descriptions = tasks.descriptions_json();
        let count = tasks.declared_count();

        let conversation =
            conversation.with_user(prompts::dependency_analysis(problem, &descriptions, count));
        let rationale = match self.oracle.chat(&conversation).await {
            Ok(text) => text,
            Err(e) => {
                mlog_error!("[dependency] rationale request failed: {}", e);
                return DependencyAnalysis {
                    graph: DependencyGraph::empty(),
                    rationale: String::new(),
                    degraded: true,
                    attempts: 0,
                    conversation,
                };
            }
        };
        let conversation = conversation.with_assistant(rationale.as_str());

        let keys: Vec<TaskKey> = tasks.primary_keys().into_iter().collect();
        let conversation = conversation.with_user(prompts::dag_construction(
            problem,
            &descriptions,
            count,
            &rationale,
            &keys,
        ));

        // Retries resend the identical conversation.
        for attempt in 1..=self.max_attempts {
            let payload = match self.oracle.chat(&conversation).await {
                Ok(reply) => extract_payload(&reply).map(|payload| (reply, payload)),
                Err(e) => Err(e),
            };
            match payload {
                Ok((reply, payload)) => {
                    let graph = DependencyGraph::from_payload(&payload);
                    mlog!(
                        "[dependency] graph with {} edges on attempt {}",
                        graph.edge_count(),
                        attempt
                    );
                    return DependencyAnalysis {
                        graph,
                        rationale,
                        degraded: false,
                        attempts: attempt,
                        conversation: conversation.with_assistant(reply),
                    };
                }
                Err(e) => {
                    mlog_warn!(
                        "[dependency] graph attempt {}/{} failed: {}",
                        attempt,
                        self.max_attempts,
                        e
                    );
                }
            }
        }

        mlog_error!(
            "[dependency] no usable graph after {} attempts, continuing with an empty graph",
            self.max_attempts
        );
        DependencyAnalysis {
            graph: DependencyGraph::empty(),
            rationale,
            degraded: true,
            attempts: self.max_attempts,
            conversation,
        }
    }
}
