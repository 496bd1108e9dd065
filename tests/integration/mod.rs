//! Integration test suite for mmflow.
//!
//! These tests exercise planning and execution from problem text to run
//! report, using scripted oracle completions and stub stages.
//!
//! # Test Categories
//!
//! - `ordering`: Task extraction, dependency analysis and execution order
//! - `pipeline`: Stage sequencing, failure, timeout and cancellation
//! - `workflow`: Full runs, concurrency and code execution
//!
//! # CI Compatibility
//!
//! No test calls a live oracle. Code execution uses `/bin/sh`.


mod ordering;
mod pipeline;
mod workflow;
