//! The modeling stage.
//!
//! Each primary task goes through two draft, critique and improve rounds:
//! one for the problem analysis and one for the model itself. Only the
//! modeling round sees the context accumulated from earlier tasks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::conversation::Conversation;
use crate::error::Result;
use crate::oracle::TextOracle;
use crate::orchestration::{ModelStage, StageInput};
use crate::prompts;
use crate::{mlog, mlog_debug};

pub struct ModelerAgent {
    oracle: Arc<dyn TextOracle>,
}

impl ModelerAgent {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        let conversation =
            Conversation::with_system_prompt(prompts::MODELER_SYSTEM).with_user(prompt);
        self.oracle.chat(&conversation).await
    }

    /// Analysis, critique, improved analysis.
    pub async fn analyze(&self, problem: &str) -> Result<String> {
        let draft = self.ask(prompts::problem_analysis(problem)).await?;
        let critique = self
            .ask(prompts::problem_analysis_critique(problem, &draft))
            .await?;
        self.ask(prompts::problem_analysis_improvement(
            problem, &draft, &critique,
        ))
        .await
    }

    /// Model, critique, improved model, with earlier results attached to
    /// the problem statement.
    pub async fn design(&self, problem: &str, analysis: &str, context: &str) -> Result<String> {
        let problem = prompts::with_previous_context(problem, context);
        let draft = self
            .ask(prompts::problem_modeling(&problem, analysis))
            .await?;
        let critique = self
            .ask(prompts::problem_modeling_critique(&problem, analysis, &draft))
            .await?;
        self.ask(prompts::problem_modeling_improvement(
            &problem, analysis, &draft, &critique,
        ))
        .await
    }
}

#[async_trait]
impl ModelStage for ModelerAgent {
    async fn model(&self, input: &StageInput<'_>, context: &str) -> Result<Option<String>> {
        if input.key.is_auxiliary() {
            mlog_debug!("[modeler] {} has no model of its own", input.key);
            return Ok(None);
        }
        let problem = input.description();
        let analysis = self.analyze(problem).await?;
        let solution = self.design(problem, &analysis, context).await?;
        mlog!(
            "[modeler] {} modeled ({} chars, {} chars of context)",
            input.key,
            solution.len(),
            context.len()
        );
        Ok(Some(solution))
    }
}
