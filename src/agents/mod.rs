//! Oracle-backed agents, one per role in a run.
//!
//! The coordinator and dependency analyzer run once per run during
//! bootstrap; the modeler, coder and writer implement the three pipeline
//! stages.

pub mod coder;
pub mod coordinator;
pub mod dependency;
pub mod modeler;
pub mod writer;

pub use coder::{CodeReport, CoderAgent};
pub use coordinator::{Bootstrap, CoordinatorAgent};
pub use dependency::{DependencyAnalysis, DependencyAnalyzer};
pub use modeler::ModelerAgent;
pub use writer::WriterAgent;
