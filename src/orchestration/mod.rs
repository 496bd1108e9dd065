//! Stage orchestration for a planned run.
//!
//! Given an execution sequence, drives each task through modeling, coding
//! and writing while threading earlier outputs forward as context.

mod pipeline;

pub use pipeline::{
    CodeStage, ContextEntry, ContextKind, ModelStage, RunState, Stage, StageContext, StageInput,
    StageOrchestrator, WriteStage,
};
