// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::{
    FrameFilter, NodeId, ProcessId, ProfileFragment, StackTree, ThreadId, ThreadKey, Timestamp,
};
use tracing::{debug, trace};

/// One profiler tick, resolved to the topmost frame that passed the filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sample {
    pub node: NodeId,
    pub pid: ProcessId,
    pub tid: ThreadId,
    pub timestamp: Timestamp,
}

/// The samples of one thread, sorted by timestamp.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SampleSet {
    pub samples: Vec<Sample>,
    /// Ticks whose whole chain failed the filter or was unknown to the tree.
    pub dropped: usize,
}

impl SampleSet {
    /// Rebuilds absolute timestamps from the delta batches of `fragments`
    /// and resolves every tick against `tree`.
    ///
    /// Deltas accumulate across fragments in the order given, starting at
    /// `start_time`. If the clock leaves the `Timestamp` range, the samples
    /// from that point on are ignored. Samples with equal timestamps keep that order: fragment
    /// first, then position within the fragment.
    ///
    /// # Panics
    /// Panics if `tree` was built for a different thread than `key`.
    pub fn collect<'a, I>(
        key: ThreadKey,
        start_time: Timestamp,
        tree: &StackTree,
        fragments: I,
        filter: &FrameFilter,
    ) -> Self
    where
        I: IntoIterator<Item = &'a ProfileFragment>,
    {
        assert_eq!(
            tree.key(),
            key,
            "stack tree of thread {} used to collect samples of thread {}",
            tree.key(),
            key
        );

        let mut set = SampleSet::default();
        let mut ts = start_time;
        'chunks: for chunk in fragments.into_iter().filter_map(ProfileFragment::as_chunk) {
            let Some(pairs) = chunk.sample_pairs() else {
                debug!(
                    thread = %key,
                    samples = chunk.samples.len(),
                    time_deltas = chunk.time_deltas.len(),
                    "skipping samples of a chunk with mismatched arrays"
                );
                // Keep the clock of later chunks aligned.
                match chunk
                    .time_deltas
                    .iter()
                    .try_fold(ts, |ts, &delta| ts.checked_add(delta))
                {
                    Some(next) => ts = next,
                    None => {
                        clock_overflow(key, ts);
                        break 'chunks;
                    }
                }
                continue;
            };
            for (delta, node) in pairs {
                let Some(next) = ts.checked_add(delta) else {
                    clock_overflow(key, ts);
                    break 'chunks;
                };
                ts = next;
                match resolve(tree, node, filter) {
                    Some(node) => set.samples.push(Sample {
                        node,
                        pid: key.pid,
                        tid: key.tid,
                        timestamp: ts,
                    }),
                    None => {
                        trace!(node = node.0, ts, "no allowed frame for sample");
                        set.dropped += 1;
                    }
                }
            }
        }

        // Stable, so ties keep their arrival order.
        set.samples.sort_by_key(|sample| sample.timestamp);
        set
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// No later sample of the thread has a meaningful time once the clock
/// overflows, so collection stops there.
fn clock_overflow(key: ThreadKey, ts: Timestamp) {
    debug!(thread = %key, ts, "sample clock overflowed, ignoring the remaining samples");
}

/// The first node on the way from `node` to the root whose frame is allowed.
pub fn resolve(tree: &StackTree, node: NodeId, filter: &FrameFilter) -> Option<NodeId> {
    tree.ancestors(node)
        .find(|(_, stack_node)| filter.is_allowed(&stack_node.frame))
        .map(|(id, _)| id)
}
