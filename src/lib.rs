pub mod agents;
pub mod config;
pub mod conversation;
pub mod core;
pub mod error;
pub mod extract;
pub mod log;
pub mod notify;
pub mod oracle;
pub mod orchestration;
pub mod prompts;
pub mod sandbox;
pub mod workflow;

pub use error::{Error, Result};
pub use workflow::{Plan, Planner, RunId, RunReport, Workflow};
