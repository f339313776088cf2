// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coalescing of single-point samples into nested, duration-bearing calls.
//!
//! Profiles of deeply recursive code nest tens of thousands of calls, so
//! nothing in here recurses on the depth of a call tree: merging, cloning,
//! comparing and dropping all walk explicit stacks.

use crate::{Boundaries, NodeId, ProcessId, Sample, StackTree, ThreadId, Timestamp};

/// One reconstructed call instance.
///
/// Durations only have sample granularity: a call lasts from its first to its
/// last coalesced sample.
#[derive(Debug, Eq)]
pub struct Call {
    pub frame: NodeId,
    pub pid: ProcessId,
    pub tid: ThreadId,
    pub start: Timestamp,
    pub duration: Timestamp,
    /// `duration` minus the durations of `children`.
    pub self_duration: Timestamp,
    /// Callees, in time order.
    pub children: Vec<Call>,
}

impl Call {
    /// Turns a sample into a chain of zero-duration calls, root first, with
    /// the sampled frame as the innermost call. `None` if the sampled node is
    /// not in `tree`.
    pub fn expand(tree: &StackTree, sample: &Sample) -> Option<Call> {
        let mut chain: Option<Call> = None;
        for (id, _) in tree.ancestors(sample.node) {
            chain = Some(Call {
                frame: id,
                pid: sample.pid,
                tid: sample.tid,
                start: sample.timestamp,
                duration: 0,
                self_duration: 0,
                children: chain.into_iter().collect(),
            });
        }
        chain
    }

    pub fn end(&self) -> Timestamp {
        self.start.saturating_add(self.duration)
    }

    /// Number of levels in this call's subtree, counting itself.
    pub fn depth(&self) -> usize {
        self.walk().map(|(depth, _)| depth).max().map_or(1, |max| max + 1)
    }

    /// Pre-order traversal of this call and its descendants, with the depth
    /// of each relative to this call.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(0, self)],
        }
    }

    /// A copy of this call without its children.
    fn shallow_clone(&self) -> Call {
        Call {
            frame: self.frame,
            pid: self.pid,
            tid: self.tid,
            start: self.start,
            duration: self.duration,
            self_duration: self.self_duration,
            children: Vec::with_capacity(self.children.len()),
        }
    }

    fn same_node(&self, other: &Call) -> bool {
        self.frame == other.frame
            && self.pid == other.pid
            && self.tid == other.tid
            && self.start == other.start
            && self.duration == other.duration
            && self.self_duration == other.self_duration
            && self.children.len() == other.children.len()
    }
}

impl Clone for Call {
    fn clone(&self) -> Self {
        // `open` holds the copies of the current node's ancestors.
        let mut open: Vec<Call> = Vec::new();
        for (depth, call) in self.walk() {
            close_until(&mut open, depth.max(1));
            open.push(call.shallow_clone());
        }
        close_until(&mut open, 1);
        open.pop().unwrap_or_else(|| self.shallow_clone())
    }
}

/// Attaches the innermost open calls to their parents until `len` remain.
fn close_until(open: &mut Vec<Call>, len: usize) {
    while open.len() > len {
        let Some(child) = open.pop() else { break };
        if let Some(parent) = open.last_mut() {
            parent.children.push(child);
        }
    }
}

impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        // Pre-order plus per-node child counts pins down the whole shape.
        let mut left = self.walk();
        let mut right = other.walk();
        loop {
            match (left.next(), right.next()) {
                (Some((_, a)), Some((_, b))) if a.same_node(b) => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut call) = pending.pop() {
            pending.append(&mut call.children);
        }
    }
}

pub struct Walk<'a> {
    stack: Vec<(usize, &'a Call)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a Call);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, call) = self.stack.pop()?;
        self.stack
            .extend(call.children.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, call))
    }
}

/// Where the current group of calls must stop growing.
#[derive(Clone, Copy, Debug)]
enum Cursor {
    /// Nothing merged yet, the next call starts a group.
    Unset,
    At(Timestamp),
    /// No boundary left after the current group's start.
    Exhausted,
}

impl Cursor {
    fn after(boundaries: &Boundaries, ts: Timestamp) -> Self {
        boundaries.next_after(ts).map_or(Cursor::Exhausted, Cursor::At)
    }

    fn is_reached_by(self, ts: Timestamp) -> bool {
        match self {
            Cursor::Unset => true,
            Cursor::At(boundary) => ts >= boundary,
            Cursor::Exhausted => false,
        }
    }
}

/// Expands every sample and merges the chains into a call forest.
///
/// `samples` must be sorted by timestamp, as [`crate::SampleSet::collect`]
/// returns them.
pub fn merge_samples(
    tree: &StackTree,
    samples: Vec<Sample>,
    boundaries: &Boundaries,
    sampling_interval: Timestamp,
) -> Vec<Call> {
    let calls = samples
        .iter()
        .filter_map(|sample| Call::expand(tree, sample))
        .collect();
    merge_calls(calls, boundaries, sampling_interval)
}

/// Coalesces time-ordered sibling calls, then the children of every merged
/// call, level by level.
///
/// A call extends the previous one when both have the same frame, the gap
/// between them is below `sampling_interval`, and no boundary was reached
/// since the previous group started.
pub fn merge_calls(
    calls: Vec<Call>,
    boundaries: &Boundaries,
    sampling_interval: Timestamp,
) -> Vec<Call> {
    let mut stack = vec![Level::new(None, coalesce(calls, boundaries, sampling_interval))];
    while let Some(level) = stack.last_mut() {
        if let Some(mut call) = level.pending.next() {
            let children = coalesce(
                std::mem::take(&mut call.children),
                boundaries,
                sampling_interval,
            );
            call.self_duration =
                call.duration - children.iter().map(|c| c.duration).sum::<Timestamp>();
            if children.is_empty() {
                level.merged.push(call);
            } else {
                stack.push(Level::new(Some(call), children));
            }
            continue;
        }

        let Some(Level { parent, merged, .. }) = stack.pop() else {
            break;
        };
        match (parent, stack.last_mut()) {
            (Some(mut parent), Some(outer)) => {
                parent.children = merged;
                outer.merged.push(parent);
            }
            _ => return merged,
        }
    }
    Vec::new()
}

/// The children of `parent` still to be visited, and those already done.
struct Level {
    parent: Option<Call>,
    pending: std::vec::IntoIter<Call>,
    merged: Vec<Call>,
}

impl Level {
    fn new(parent: Option<Call>, calls: Vec<Call>) -> Self {
        Self {
            parent,
            merged: Vec::with_capacity(calls.len()),
            pending: calls.into_iter(),
        }
    }
}

/// Merges one list of siblings, without looking at their children beyond
/// concatenating them.
fn coalesce(
    calls: Vec<Call>,
    boundaries: &Boundaries,
    sampling_interval: Timestamp,
) -> Vec<Call> {
    let mut merged: Vec<Call> = Vec::with_capacity(calls.len());
    let mut cursor = Cursor::Unset;

    for mut call in calls {
        if cursor.is_reached_by(call.start) {
            cursor = Cursor::after(boundaries, call.start);
            merged.push(call);
            continue;
        }
        match merged.last_mut() {
            Some(previous)
                if previous.frame == call.frame
                    && call.start.saturating_sub(previous.end()) < sampling_interval =>
            {
                previous.duration = call.start.saturating_sub(previous.start);
                previous.children.append(&mut call.children);
            }
            _ => merged.push(call),
        }
    }
    merged
}

/// One row of a flame chart.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlameEntry {
    pub frame: NodeId,
    pub depth: usize,
    pub start: Timestamp,
    pub duration: Timestamp,
    pub self_duration: Timestamp,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlameChart {
    /// Pre-order, so a parent always precedes its children.
    pub entries: Vec<FlameEntry>,
    pub max_depth: usize,
}

/// Lays a call forest out as flame chart rows, roots at depth 0.
pub fn flatten(calls: &[Call]) -> FlameChart {
    let mut chart = FlameChart::default();
    for (depth, call) in calls.iter().flat_map(Call::walk) {
        chart.max_depth = chart.max_depth.max(depth);
        chart.entries.push(FlameEntry {
            frame: call.frame,
            depth,
            start: call.start,
            duration: call.duration,
            self_duration: call.self_duration,
        });
    }
    chart
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallFrame, FrameFilter, ProfileNode, ThreadKey};
    use proptest::prelude::*;

    const KEY: ThreadKey = ThreadKey::new(1, 2);
    const A: NodeId = NodeId(1);
    const B: NodeId = NodeId(2);
    const C: NodeId = NodeId(3);
    const D: NodeId = NodeId(4);

    /// A -> B -> C and A -> D.
    fn tree() -> StackTree {
        let mut builder = StackTree::builder(KEY, FrameFilter::default());
        let nodes = [
            (1, None, "a"),
            (2, Some(1), "b"),
            (3, Some(2), "c"),
            (4, Some(1), "d"),
        ];
        for (id, parent, name) in nodes {
            builder.add_node(&ProfileNode::new(id, parent, CallFrame::new(name, "app.js")));
        }
        builder.build()
    }

    fn sample(node: NodeId, timestamp: Timestamp) -> Sample {
        Sample {
            node,
            pid: KEY.pid,
            tid: KEY.tid,
            timestamp,
        }
    }

    fn samples(points: &[(NodeId, Timestamp)]) -> Vec<Sample> {
        points.iter().map(|&(node, ts)| sample(node, ts)).collect()
    }

    fn spans(calls: &[Call]) -> Vec<(NodeId, Timestamp, Timestamp)> {
        calls
            .iter()
            .map(|call| (call.frame, call.start, call.end()))
            .collect()
    }

    fn assert_self_time_conserved(calls: &[Call]) {
        for (_, call) in calls.iter().flat_map(Call::walk) {
            let children: Timestamp = call.children.iter().map(|c| c.duration).sum();
            assert_eq!(call.self_duration + children, call.duration, "{call:?}");
            assert!(call.self_duration >= 0, "{call:?}");
        }
    }

    #[test]
    fn expand_builds_root_first_chain() {
        let call = Call::expand(&tree(), &sample(C, 42)).unwrap();
        let frames: Vec<_> = call.walk().map(|(depth, c)| (depth, c.frame)).collect();
        assert_eq!(frames, vec![(0, A), (1, B), (2, C)]);
        assert!(call.walk().all(|(_, c)| c.start == 42 && c.duration == 0));
        assert_eq!(call.depth(), 3);
        assert_eq!(Call::expand(&tree(), &sample(NodeId(99), 0)), None);
    }

    #[test]
    fn sampling_gap_splits_calls() {
        let calls = merge_samples(
            &tree(),
            samples(&[(A, 0), (A, 150), (A, 400)]),
            &Boundaries::default(),
            200,
        );
        assert_eq!(spans(&calls), vec![(A, 0, 150), (A, 400, 400)]);
        assert_eq!(calls[0].self_duration, 150);
        assert_eq!(calls[1].self_duration, 0);
    }

    #[test]
    fn boundary_overrides_same_frame() {
        let boundaries: Boundaries = [120].into_iter().collect();
        let calls = merge_samples(&tree(), samples(&[(A, 0), (A, 150)]), &boundaries, 200);
        assert_eq!(spans(&calls), vec![(A, 0, 0), (A, 150, 150)]);
    }

    #[test]
    fn boundary_at_group_start_does_not_split() {
        let boundaries: Boundaries = [0, 500].into_iter().collect();
        let calls = merge_samples(
            &tree(),
            samples(&[(A, 0), (A, 100), (A, 250), (A, 400), (A, 499), (A, 500)]),
            &boundaries,
            200,
        );
        assert_eq!(spans(&calls), vec![(A, 0, 499), (A, 500, 500)]);
    }

    #[test]
    fn different_frames_never_merge() {
        let calls = merge_samples(
            &tree(),
            samples(&[(C, 0), (D, 10), (C, 20)]),
            &Boundaries::default(),
            200,
        );
        // The root frame is shared, its children are not.
        assert_eq!(spans(&calls), vec![(A, 0, 20)]);
        assert_eq!(
            spans(&calls[0].children),
            vec![(B, 0, 0), (D, 10, 10), (B, 20, 20)]
        );
        assert_eq!(calls[0].self_duration, 20);
        assert_self_time_conserved(&calls);
    }

    #[test]
    fn merges_every_depth() {
        let calls = merge_samples(
            &tree(),
            samples(&[(C, 0), (C, 100), (B, 200), (D, 300), (D, 350)]),
            &Boundaries::default(),
            200,
        );
        assert_eq!(spans(&calls), vec![(A, 0, 350)]);
        let a = &calls[0];
        assert_eq!(spans(&a.children), vec![(B, 0, 200), (D, 300, 350)]);
        assert_eq!(a.self_duration, 350 - 200 - 50);

        let b = &a.children[0];
        assert_eq!(spans(&b.children), vec![(C, 0, 100)]);
        assert_eq!(b.self_duration, 100);
        assert_eq!(b.children[0].self_duration, 100);
        assert_self_time_conserved(&calls);

        let chart = flatten(&calls);
        assert_eq!(chart.max_depth, 2);
        let rows: Vec<_> = chart.entries.iter().map(|e| (e.frame, e.depth)).collect();
        assert_eq!(rows, vec![(A, 0), (B, 1), (C, 2), (D, 1)]);
    }

    #[test]
    fn boundaries_apply_at_every_depth() {
        // A restarts at the wall, so B can't continue across it either.
        let boundaries: Boundaries = [150].into_iter().collect();
        let calls = merge_samples(
            &tree(),
            samples(&[(B, 0), (B, 100), (B, 200)]),
            &boundaries,
            200,
        );
        assert_eq!(spans(&calls), vec![(A, 0, 100), (A, 200, 200)]);
        assert_eq!(spans(&calls[0].children), vec![(B, 0, 100)]);
        assert_eq!(spans(&calls[1].children), vec![(B, 200, 200)]);
    }

    #[test]
    fn empty_input() {
        assert!(merge_samples(&tree(), vec![], &Boundaries::default(), 200).is_empty());
        assert_eq!(flatten(&[]), FlameChart::default());
    }

    /// A single recursive function, `depth` frames deep, sampled twice.
    fn deep_chain(depth: u64, second_sample: Timestamp) -> Vec<Call> {
        let mut builder = StackTree::builder(KEY, FrameFilter::default());
        builder.add_node(&ProfileNode::new(1, None, CallFrame::new("recurse", "app.js")));
        for id in 2..=depth {
            builder.add_node(&ProfileNode::new(
                id,
                Some(id - 1),
                CallFrame::new("recurse", "app.js"),
            ));
        }
        let tree = builder.build();
        let leaf = NodeId(depth);
        merge_samples(
            &tree,
            samples(&[(leaf, 0), (leaf, second_sample)]),
            &Boundaries::default(),
            200,
        )
    }

    #[test]
    fn deep_stacks_stay_off_the_call_stack() {
        const DEPTH: u64 = 50_000;
        let calls = deep_chain(DEPTH, 100);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].depth(), DEPTH as usize);
        let mut visited = 0;
        for (depth, call) in calls[0].walk() {
            assert_eq!(call.duration, 100);
            let expected_self = if depth + 1 == DEPTH as usize { 100 } else { 0 };
            assert_eq!(call.self_duration, expected_self);
            visited += 1;
        }
        assert_eq!(visited, DEPTH);

        let copy = calls.clone();
        assert!(copy == calls);
        assert!(deep_chain(DEPTH, 150) != calls);

        let chart = flatten(&calls);
        assert_eq!(chart.entries.len(), DEPTH as usize);
        assert_eq!(chart.max_depth, DEPTH as usize - 1);
    }

    #[test]
    fn extreme_timestamps_saturate() {
        let calls = merge_samples(
            &tree(),
            samples(&[(A, i64::MIN), (A, -2), (A, 100), (A, i64::MAX)]),
            &Boundaries::default(),
            i64::MAX,
        );
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].start, calls[0].duration), (i64::MIN, i64::MAX));
        assert_eq!(calls[0].self_duration, i64::MAX);
        assert_eq!((calls[1].start, calls[1].end()), (i64::MAX, i64::MAX));
    }

    #[test]
    fn clone_keeps_shape() {
        let calls = merge_samples(
            &tree(),
            samples(&[(C, 0), (C, 100), (B, 200), (D, 300), (D, 350)]),
            &Boundaries::default(),
            200,
        );
        let copy = calls.clone();
        assert_eq!(copy, calls);
        assert_eq!(spans(&copy[0].children), vec![(B, 0, 200), (D, 300, 350)]);
        assert_eq!(spans(&copy[0].children[0].children), vec![(C, 0, 100)]);
        assert_ne!(copy[0].children[0], copy[0].children[1]);
    }

    /// Samples of a single-frame profile: sorted times plus boundaries.
    fn single_frame_input() -> impl Strategy<Value = (Vec<Timestamp>, Vec<Timestamp>)> {
        (
            proptest::collection::vec(0i64..5_000, 0..64),
            proptest::collection::vec(0i64..5_000, 0..8),
        )
            .prop_map(|(mut times, boundaries)| {
                times.sort_unstable();
                (times, boundaries)
            })
    }

    /// Samples spread over the nodes of [`tree`].
    fn mixed_input() -> impl Strategy<Value = (Vec<(NodeId, Timestamp)>, Vec<Timestamp>)> {
        (
            proptest::collection::vec((1u64..=4, 0i64..5_000), 0..64),
            proptest::collection::vec(0i64..5_000, 0..8),
        )
            .prop_map(|(mut points, boundaries)| {
                points.sort_by_key(|&(_, ts)| ts);
                let points = points.into_iter().map(|(id, ts)| (NodeId(id), ts)).collect();
                (points, boundaries)
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: if cfg!(miri) { 4 } else { 128 },
            .. ProptestConfig::default()
        })]

        #[test]
        fn calls_never_span_boundaries((points, boundaries) in mixed_input()) {
            let boundaries: Boundaries = boundaries.into_iter().collect();
            let calls = merge_samples(&tree(), samples(&points), &boundaries, 200);
            for (_, call) in calls.iter().flat_map(Call::walk) {
                for &b in boundaries.as_slice() {
                    prop_assert!(call.start >= b || call.end() <= b, "{call:?} spans {b}");
                }
            }
        }

        #[test]
        fn self_time_is_conserved((points, boundaries) in mixed_input()) {
            let boundaries: Boundaries = boundaries.into_iter().collect();
            let calls = merge_samples(&tree(), samples(&points), &boundaries, 200);
            for (_, call) in calls.iter().flat_map(Call::walk) {
                let children: Timestamp = call.children.iter().map(|c| c.duration).sum();
                prop_assert_eq!(call.self_duration + children, call.duration);
                prop_assert!(call.self_duration >= 0);
            }
        }

        #[test]
        fn merging_is_deterministic((points, boundaries) in mixed_input()) {
            let boundaries: Boundaries = boundaries.into_iter().collect();
            let first = merge_samples(&tree(), samples(&points), &boundaries, 200);
            let second = merge_samples(&tree(), samples(&points), &boundaries, 200);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn wide_gaps_are_never_merged((times, boundaries) in single_frame_input()) {
            let points: Vec<_> = times.iter().map(|&ts| (A, ts)).collect();
            let boundaries: Boundaries = boundaries.into_iter().collect();
            let calls = merge_samples(&tree(), samples(&points), &boundaries, 200);

            let inside = |call: &Call| -> Vec<Timestamp> {
                times
                    .iter()
                    .copied()
                    .filter(|&ts| ts >= call.start && ts <= call.end())
                    .collect()
            };
            let covered: usize = calls.iter().map(|call| inside(call).len()).sum();
            prop_assert_eq!(covered, times.len());
            for call in &calls {
                for pair in inside(call).windows(2) {
                    prop_assert!(pair[1] - pair[0] < 200, "{call:?} merged across {pair:?}");
                }
            }
        }
    }
}
