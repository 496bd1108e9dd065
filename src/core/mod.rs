//! Core domain models: task keys, task sets, and the dependency graph.

pub mod dag;
pub mod task;

pub use dag::{DependencyGraph, GraphOrderer, OrderOutcome, OrderPath};
pub use task::{TaskKey, TaskResult, TaskSet, TaskStatus};
