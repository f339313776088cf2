// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs the whole pipeline for each (process, thread) pair.

use crate::{
    flatten, functions_in_window, hot_functions, merge_samples, Boundaries, BoundaryEvent, Call,
    CallTreeError, FlameChart, FunctionAggregate, NodeId, ProfileFragment, ProfileHead,
    ReconstructionConfig, SampleSet, StackTree, ThreadKey, Timestamp, Window,
};
use hashbrown::HashMap;
use rayon::prelude::*;
use tracing::debug;

/// Everything the ingestion layer collected for one thread.
#[derive(Clone, Debug, Default)]
pub struct ThreadInput {
    pub key: ThreadKey,
    /// Profile fragments, in arrival order.
    pub fragments: Vec<ProfileFragment>,
    /// Non-profiler events, only used for boundaries.
    pub events: Vec<BoundaryEvent>,
}

impl ThreadInput {
    pub fn new(key: ThreadKey) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    /// The first head that declares this thread.
    pub fn head(&self) -> Option<&ProfileHead> {
        self.fragments.iter().find_map(|fragment| match fragment {
            ProfileFragment::Head(head) if head.pid == self.key.pid && head.tid == self.key.tid => {
                Some(head)
            }
            _ => None,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconstructionStats {
    pub nodes: usize,
    pub samples: usize,
    pub dropped_samples: usize,
    pub boundaries: usize,
    pub root_calls: usize,
}

/// The finished, immutable result for one thread.
#[derive(Clone, Debug)]
pub struct ThreadReconstruction {
    pub key: ThreadKey,
    pub start_time: Timestamp,
    pub tree: StackTree,
    pub boundaries: Boundaries,
    pub calls: Vec<Call>,
    pub stats: ReconstructionStats,
}

impl ThreadReconstruction {
    pub fn flame_chart(&self) -> FlameChart {
        flatten(&self.calls)
    }

    pub fn functions_in_window(
        &self,
        window: Window,
    ) -> HashMap<NodeId, FunctionAggregate<'_>> {
        functions_in_window(&self.calls, window)
    }

    pub fn hot_functions(
        &self,
        window: Window,
        min_self_percent: f64,
    ) -> Vec<FunctionAggregate<'_>> {
        hot_functions(&self.calls, window, min_self_percent)
    }

    /// The smallest window covering every root call, if there is any call.
    pub fn span(&self) -> Option<(Timestamp, Timestamp)> {
        let begin = self.calls.iter().map(|call| call.start).min()?;
        let end = self.calls.iter().map(Call::end).max()?;
        Some((begin, end))
    }
}

/// Reconstructs one thread. Returns `Ok(None)` when the thread has no head
/// fragment, since its samples can't be placed in time.
pub fn reconstruct_thread(
    input: &ThreadInput,
    config: &ReconstructionConfig,
) -> Result<Option<ThreadReconstruction>, CallTreeError> {
    config.validate()?;
    Ok(reconstruct_validated(input, config))
}

/// Reconstructs every thread on the rayon pool. Threads are independent, so
/// nothing is shared but the configuration. Threads without a head are left
/// out; the rest are returned ordered by key.
pub fn reconstruct_threads(
    inputs: &[ThreadInput],
    config: &ReconstructionConfig,
) -> Result<Vec<ThreadReconstruction>, CallTreeError> {
    config.validate()?;
    let mut reconstructions: Vec<ThreadReconstruction> = inputs
        .par_iter()
        .filter_map(|input| reconstruct_validated(input, config))
        .collect();
    reconstructions.sort_by_key(|reconstruction| reconstruction.key);
    Ok(reconstructions)
}

fn reconstruct_validated(
    input: &ThreadInput,
    config: &ReconstructionConfig,
) -> Option<ThreadReconstruction> {
    let key = input.key;
    let Some(head) = input.head() else {
        debug!(
            thread = %key,
            fragments = input.fragments.len(),
            "no profile head, skipping thread"
        );
        return None;
    };
    let start_time = head.start_time;

    let mut builder = StackTree::builder(key, config.filter);
    for fragment in &input.fragments {
        builder.add_fragment(fragment);
    }
    let tree = builder.build();

    let boundaries = Boundaries::collect(&input.events, &config.boundary_categories);
    let sample_set = SampleSet::collect(key, start_time, &tree, &input.fragments, &config.filter);

    let mut stats = ReconstructionStats {
        nodes: tree.len(),
        samples: sample_set.len(),
        dropped_samples: sample_set.dropped,
        boundaries: boundaries.len(),
        root_calls: 0,
    };
    let calls = merge_samples(
        &tree,
        sample_set.samples,
        &boundaries,
        config.sampling_interval,
    );
    stats.root_calls = calls.len();

    debug!(
        thread = %key,
        nodes = stats.nodes,
        samples = stats.samples,
        dropped_samples = stats.dropped_samples,
        boundaries = stats.boundaries,
        root_calls = stats.root_calls,
        "reconstructed thread"
    );

    Some(ThreadReconstruction {
        key,
        start_time,
        tree,
        boundaries,
        calls,
        stats,
    })
}
