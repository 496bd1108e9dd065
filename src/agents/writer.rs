//! The writing stage, plus the closing sections and paper assembly that
//! follow once every task has a section.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::CodeReport;
use crate::conversation::Conversation;
use crate::core::task::{TaskKey, TaskResult, EDA_KEY, SENSITIVITY_KEY};
use crate::error::Result;
use crate::oracle::TextOracle;
use crate::orchestration::{StageInput, WriteStage};
use crate::prompts::{self, CLOSING_SECTIONS};
use crate::{mlog, mlog_debug};

pub struct WriterAgent {
    oracle: Arc<dyn TextOracle>,
}

impl WriterAgent {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        let conversation =
            Conversation::with_system_prompt(prompts::WRITER_SYSTEM).with_user(prompt);
        self.oracle.chat(&conversation).await
    }

    /// Write the sections that summarize the whole paper.
    ///
    /// `results` supplies the solved tasks; only their rendered sections are
    /// passed on. Returned in [`CLOSING_SECTIONS`] order.
    pub async fn closing_sections(
        &self,
        background: &str,
        results: &[TaskResult],
    ) -> Result<Vec<(String, String)>> {
        let solutions = results
            .iter()
            .filter_map(|r| r.rendered.as_deref().map(|text| (r.key.as_str(), text)))
            .map(|(key, text)| format!("## {}\n{}", key, text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut sections = Vec::with_capacity(CLOSING_SECTIONS.len());
        for section in CLOSING_SECTIONS {
            mlog_debug!("[writer] closing section {}", section);
            let text = self
                .ask(prompts::closing_section(section, background, &solutions))
                .await?;
            sections.push((section.to_string(), text));
        }
        mlog!("[writer] {} closing sections written", sections.len());
        Ok(sections)
    }
}

#[async_trait]
impl WriteStage for WriterAgent {
    async fn write(&self, input: &StageInput<'_>, report: &CodeReport) -> Result<String> {
        let prompt = prompts::writer_section(
            input.key,
            input.background(),
            &report.response,
            &report.transcript,
            &report.artifact_names(),
        );
        self.ask(prompt).await
    }
}

/// Join closing and per-task sections into one Markdown document.
///
/// Front matter comes first, then exploratory analysis, the tasks in the
/// order they ran, sensitivity analysis, and finally the evaluation.
pub fn assemble_paper(closing: &[(String, String)], results: &[TaskResult]) -> String {
    let closing: BTreeMap<&str, &str> = closing
        .iter()
        .map(|(name, text)| (name.as_str(), text.as_str()))
        .collect();
    let section = |key: &TaskKey| {
        results
            .iter()
            .find(|r| &r.key == key)
            .and_then(|r| r.rendered.as_deref())
    };

    let mut parts: Vec<&str> = Vec::new();
    for name in ["firstPage", "RepeatQues", "analysisQues", "modelAssumption", "symbol"] {
        parts.extend(closing.get(name).copied());
    }
    parts.extend(section(&TaskKey::new(EDA_KEY)));
    for result in results.iter().filter(|r| r.key.is_primary()) {
        parts.extend(result.rendered.as_deref());
    }
    parts.extend(section(&TaskKey::new(SENSITIVITY_KEY)));
    parts.extend(closing.get("judge").copied());

    parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
