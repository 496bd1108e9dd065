//! Text oracles: anything that turns a conversation into a completion.
//!
//! [`CommandOracle`] drives a headless LLM CLI. [`ScriptedOracle`] replays
//! canned completions and is used for deterministic runs and tests.

mod command;
mod scripted;

pub use command::{CommandOracle, OracleResponse, ResultType};
pub use scripted::ScriptedOracle;

use crate::conversation::Conversation;
use crate::error::Result;
use async_trait::async_trait;

/// Produces a free-text completion for a conversation.
#[async_trait]
pub trait TextOracle: Send + Sync {
    async fn chat(&self, conversation: &Conversation) -> Result<String>;

    /// Short label used in log lines.
    fn name(&self) -> &str {
        "oracle"
    }
}
