// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Reconstruction of duration-bearing call trees from sampling profiler data.
//!
//! A sampling profiler only reports which frame was on top of the stack at
//! each tick. This crate fuses the profiler's partial node chains, its
//! delta-encoded sample batches, and the known macro-task boundaries of a
//! thread into nested [`Call`]s with a start, a duration and a self time.
//!
//! The pipeline for one thread is:
//!  1. [`StackTreeBuilder`] assembles the node graph from every fragment.
//!  2. [`Boundaries::collect`] extracts the task walls from trace events.
//!  3. [`SampleSet::collect`] turns the deltas into absolute, sorted samples.
//!  4. [`merge_samples`] coalesces the samples into calls.
//!
//! [`reconstruct_thread`] runs the whole pipeline, and
//! [`reconstruct_threads`] fans it out over a worker pool.

mod aggregate;
mod boundaries;
mod call;
mod config;
mod error;
mod frame;
mod fragment;
mod ids;
mod sample;
mod stack_tree;
mod thread;

pub use aggregate::*;
pub use boundaries::*;
pub use call::*;
pub use config::*;
pub use error::*;
pub use frame::*;
pub use fragment::*;
pub use ids::*;
pub use sample::*;
pub use stack_tree::*;
pub use thread::*;
