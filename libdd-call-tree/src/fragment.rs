// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The per-thread inputs handed over by the ingestion layer.

use crate::{CallFrame, CallTreeError, NodeId, ProcessId, ThreadId, Timestamp};
use serde::Deserialize;

/// One `(node_id, parent_id?, frame)` triple of the profiler's call graph.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileNode {
    pub id: NodeId,
    pub call_frame: CallFrame,
    /// Absent for roots.
    #[serde(default)]
    pub parent: Option<NodeId>,
}

impl ProfileNode {
    pub fn new(id: u64, parent: Option<u64>, call_frame: CallFrame) -> Self {
        Self {
            id: NodeId(id),
            call_frame,
            parent: parent.map(NodeId),
        }
    }
}

/// Declares a profile: where its clock starts and which thread it samples.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProfileHead {
    pub start_time: Timestamp,
    pub pid: ProcessId,
    pub tid: ThreadId,
}

/// A batch of graph nodes plus a batch of delta-encoded samples.
///
/// `samples[i]` was taken `time_deltas[i]` units after the previous sample
/// (or after the profile start, for the very first one).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProfileChunk {
    pub nodes: Vec<ProfileNode>,
    pub samples: Vec<NodeId>,
    pub time_deltas: Vec<Timestamp>,
}

impl ProfileChunk {
    /// The parallel `(time_delta, node_id)` pairs, or `None` when the two
    /// arrays disagree in length and the chunk's samples can't be trusted.
    pub fn sample_pairs(&self) -> Option<impl Iterator<Item = (Timestamp, NodeId)> + '_> {
        if self.samples.len() != self.time_deltas.len() {
            return None;
        }
        Some(
            self.time_deltas
                .iter()
                .copied()
                .zip(self.samples.iter().copied()),
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProfileFragment {
    Head(ProfileHead),
    Chunk(ProfileChunk),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHead {
    start_time: Timestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChunk {
    cpu_profile: RawCpuProfile,
    #[serde(default)]
    time_deltas: Vec<Timestamp>,
}

#[derive(Deserialize)]
struct RawCpuProfile {
    #[serde(default)]
    nodes: Vec<ProfileNode>,
    #[serde(default)]
    samples: Vec<NodeId>,
}

impl ProfileFragment {
    pub const HEAD_EVENT: &'static str = "Profile";
    pub const CHUNK_EVENT: &'static str = "ProfileChunk";

    /// Decodes the `args.data` payload of a `Profile` or `ProfileChunk` trace
    /// event. Returns `Ok(None)` for any other event name.
    pub fn from_trace_event(
        name: &str,
        pid: ProcessId,
        tid: ThreadId,
        data: &serde_json::Value,
    ) -> Result<Option<Self>, CallTreeError> {
        match name {
            Self::HEAD_EVENT => {
                let raw = RawHead::deserialize(data).map_err(|source| {
                    CallTreeError::MalformedFragment {
                        kind: Self::HEAD_EVENT,
                        source,
                    }
                })?;
                Ok(Some(Self::Head(ProfileHead {
                    start_time: raw.start_time,
                    pid,
                    tid,
                })))
            }
            Self::CHUNK_EVENT => {
                let raw = RawChunk::deserialize(data).map_err(|source| {
                    CallTreeError::MalformedFragment {
                        kind: Self::CHUNK_EVENT,
                        source,
                    }
                })?;
                Ok(Some(Self::Chunk(ProfileChunk {
                    nodes: raw.cpu_profile.nodes,
                    samples: raw.cpu_profile.samples,
                    time_deltas: raw.time_deltas,
                })))
            }
            _ => Ok(None),
        }
    }

    pub fn as_chunk(&self) -> Option<&ProfileChunk> {
        match self {
            Self::Chunk(chunk) => Some(chunk),
            Self::Head(_) => None,
        }
    }
}

/// A non-profiler event of the thread, only used to find task boundaries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoundaryEvent {
    /// Trace categories, comma separated the way Chrome writes them.
    pub category: String,
    pub start: Timestamp,
    pub duration: Timestamp,
}

impl BoundaryEvent {
    pub fn new(category: impl Into<String>, start: Timestamp, duration: Timestamp) -> Self {
        Self {
            category: category.into(),
            start,
            duration,
        }
    }

    pub fn end(&self) -> Timestamp {
        self.start.saturating_add(self.duration)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.category.split(',').map(str::trim)
    }
}
