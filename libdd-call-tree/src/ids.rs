// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use std::fmt;

/// Profiler time, in the profiler's own units (microseconds for V8).
/// Durations use the same type so that all arithmetic stays exact.
pub type Timestamp = i64;

/// Identifies one node of the call graph reported by the profiler. Only
/// unique within a single profile.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct NodeId(pub u64);

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ProcessId(pub u64);

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ThreadId(pub u64);

/// The (process, thread) pair a reconstruction belongs to.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ThreadKey {
    pub pid: ProcessId,
    pub tid: ThreadId,
}

impl ThreadKey {
    pub const fn new(pid: u64, tid: u64) -> Self {
        Self {
            pid: ProcessId(pid),
            tid: ThreadId(tid),
        }
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid.0, self.tid.0)
    }
}
