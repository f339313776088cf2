// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-frame totals over a time window of a reconstructed call forest.

use crate::{Call, CallTreeError, NodeId, Timestamp};
use hashbrown::HashMap;

/// A half-open `[begin, end)` range of profiler time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Window {
    begin: Timestamp,
    end: Timestamp,
}

impl Window {
    pub fn new(begin: Timestamp, end: Timestamp) -> Result<Self, CallTreeError> {
        if end <= begin {
            return Err(CallTreeError::InvalidWindow { begin, end });
        }
        Ok(Self { begin, end })
    }

    pub fn begin(&self) -> Timestamp {
        self.begin
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn length(&self) -> Timestamp {
        self.end - self.begin
    }

    /// Whether the whole call lies inside the window.
    pub fn contains(&self, call: &Call) -> bool {
        call.start >= self.begin && call.start < self.end && call.end() <= self.end
    }

    #[allow(clippy::cast_precision_loss)]
    fn percent(&self, duration: Timestamp) -> f64 {
        100.0 * duration as f64 / self.length() as f64
    }
}

/// Everything one frame contributed to a window.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionAggregate<'a> {
    pub frame: NodeId,
    /// The contributing calls, in pre-order of the forest.
    pub calls: Vec<&'a Call>,
    pub duration_percent: f64,
    pub self_percent: f64,
}

impl<'a> FunctionAggregate<'a> {
    fn new(frame: NodeId) -> Self {
        Self {
            frame,
            calls: Vec::new(),
            duration_percent: 0.0,
            self_percent: 0.0,
        }
    }

    pub fn total_duration(&self) -> Timestamp {
        self.calls.iter().map(|call| call.duration).sum()
    }

    pub fn total_self_duration(&self) -> Timestamp {
        self.calls.iter().map(|call| call.self_duration).sum()
    }
}

/// Aggregates every call, at any depth, that lies fully inside `window`.
///
/// Children are visited even when their parent straddles the window edge.
/// Recursive frames are counted once per call, so their `duration_percent`
/// can exceed 100.
pub fn functions_in_window(
    calls: &[Call],
    window: Window,
) -> HashMap<NodeId, FunctionAggregate<'_>> {
    let mut functions: HashMap<NodeId, FunctionAggregate<'_>> = HashMap::new();
    for (_, call) in calls.iter().flat_map(Call::walk) {
        if !window.contains(call) {
            continue;
        }
        let aggregate = functions
            .entry(call.frame)
            .or_insert_with(|| FunctionAggregate::new(call.frame));
        aggregate.calls.push(call);
        aggregate.duration_percent += window.percent(call.duration);
        aggregate.self_percent += window.percent(call.self_duration);
    }
    functions
}

/// Frames with at least `min_self_percent` self time in `window`, hottest
/// first. Equal self times are ordered by node id.
pub fn hot_functions(
    calls: &[Call],
    window: Window,
    min_self_percent: f64,
) -> Vec<FunctionAggregate<'_>> {
    let mut hot: Vec<FunctionAggregate<'_>> = functions_in_window(calls, window)
        .into_values()
        .filter(|aggregate| aggregate.self_percent >= min_self_percent)
        .collect();
    hot.sort_by(|a, b| {
        b.self_percent
            .total_cmp(&a.self_percent)
            .then_with(|| a.frame.cmp(&b.frame))
    });
    hot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProcessId, ThreadId};

    fn call(frame: u64, start: Timestamp, duration: Timestamp, children: Vec<Call>) -> Call {
        let self_duration = duration - children.iter().map(|c| c.duration).sum::<Timestamp>();
        Call {
            frame: NodeId(frame),
            pid: ProcessId(1),
            tid: ThreadId(1),
            start,
            duration,
            self_duration,
            children,
        }
    }

    #[test]
    fn window_must_have_length() {
        assert!(matches!(
            Window::new(10, 10),
            Err(CallTreeError::InvalidWindow { begin: 10, end: 10 })
        ));
        assert!(Window::new(10, 5).is_err());
        let window = Window::new(0, 1000).unwrap();
        assert_eq!(window.length(), 1000);
        assert_eq!((window.begin(), window.end()), (0, 1000));
    }

    #[test]
    fn single_call_percentages() {
        let calls = vec![call(1, 0, 500, vec![call(2, 100, 300, vec![])])];
        let functions = functions_in_window(&calls, Window::new(0, 1000).unwrap());

        let a = &functions[&NodeId(1)];
        assert_eq!(a.duration_percent, 50.0);
        assert_eq!(a.self_percent, 20.0);
        assert_eq!(a.calls.len(), 1);
        assert_eq!(a.total_self_duration(), 200);

        let b = &functions[&NodeId(2)];
        assert_eq!(b.duration_percent, 30.0);
        assert_eq!(b.self_percent, 30.0);
    }

    #[test]
    fn accumulates_calls_of_the_same_frame() {
        let calls = vec![
            call(1, 0, 100, vec![call(3, 0, 50, vec![])]),
            call(2, 200, 100, vec![call(3, 250, 50, vec![])]),
        ];
        let functions = functions_in_window(&calls, Window::new(0, 1000).unwrap());
        let c = &functions[&NodeId(3)];
        assert_eq!(c.calls.len(), 2);
        assert_eq!(c.total_duration(), 100);
        assert_eq!(c.duration_percent, 10.0);
    }

    #[test]
    fn only_calls_fully_inside_count() {
        let calls = vec![
            // straddles the start, but its child is inside
            call(1, -100, 300, vec![call(2, 10, 50, vec![])]),
            // straddles the end
            call(3, 900, 200, vec![]),
            // zero-length calls at the edges
            call(4, 0, 0, vec![]),
            call(5, 1000, 0, vec![]),
        ];
        let functions = functions_in_window(&calls, Window::new(0, 1000).unwrap());
        let mut frames: Vec<_> = functions.keys().copied().collect();
        frames.sort();
        assert_eq!(frames, vec![NodeId(2), NodeId(4)]);
    }

    #[test]
    fn hot_functions_are_ranked_by_self_time() {
        let calls = vec![
            call(1, 0, 600, vec![call(2, 0, 100, vec![]), call(3, 200, 300, vec![])]),
            call(4, 700, 200, vec![]),
            call(5, 950, 5, vec![]),
        ];
        let hot = hot_functions(&calls, Window::new(0, 1000).unwrap(), 10.0);
        let ranking: Vec<_> = hot.iter().map(|f| (f.frame, f.self_percent)).collect();
        assert_eq!(
            ranking,
            vec![
                (NodeId(3), 30.0),
                (NodeId(1), 20.0),
                (NodeId(4), 20.0),
                (NodeId(2), 10.0),
            ]
        );
    }

    #[test]
    fn empty_forest() {
        let window = Window::new(0, 10).unwrap();
        assert!(functions_in_window(&[], window).is_empty());
        assert!(hot_functions(&[], window, 0.0).is_empty());
    }
}
