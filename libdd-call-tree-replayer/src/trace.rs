// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splits a Chrome trace file into per-thread inputs.

use libdd_call_tree::{BoundaryEvent, ProfileFragment, ThreadInput, ThreadKey};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Chrome writes either `{"traceEvents": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TraceFile {
    Array(Vec<TraceEvent>),
    Object {
        #[serde(rename = "traceEvents")]
        trace_events: Vec<TraceEvent>,
    },
}

impl TraceFile {
    pub fn into_events(self) -> Vec<TraceEvent> {
        match self {
            TraceFile::Array(events) => events,
            TraceFile::Object { trace_events } => trace_events,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TraceEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cat: String,
    #[serde(default)]
    pub pid: u64,
    #[serde(default)]
    pub tid: u64,
    #[serde(default)]
    pub ts: f64,
    #[serde(default)]
    pub dur: Option<f64>,
    /// Ties the chunks of a profile to its head.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub args: Value,
}

impl TraceEvent {
    fn key(&self) -> ThreadKey {
        ThreadKey::new(self.pid, self.tid)
    }

    fn profile_id(&self) -> Option<String> {
        self.id.as_ref().map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn is_profile(&self) -> bool {
        self.name == ProfileFragment::HEAD_EVENT || self.name == ProfileFragment::CHUNK_EVENT
    }
}

#[allow(clippy::cast_possible_truncation)]
fn micros(value: f64) -> i64 {
    value.round() as i64
}

/// Groups the events of `events` by thread.
///
/// Chunks are routed through their profile id to the thread of the matching
/// head, since Chrome emits them from a sampler thread. Events with a
/// duration become boundary candidates of their own thread. Fragments that
/// fail to decode are skipped with a warning.
pub fn demultiplex(events: Vec<TraceEvent>) -> Vec<ThreadInput> {
    let heads: HashMap<String, ThreadKey> = events
        .iter()
        .filter(|event| event.name == ProfileFragment::HEAD_EVENT)
        .filter_map(|event| Some((event.profile_id()?, event.key())))
        .collect();

    let mut threads: BTreeMap<ThreadKey, ThreadInput> = BTreeMap::new();
    for event in events {
        if event.is_profile() {
            let key = event
                .profile_id()
                .and_then(|id| heads.get(&id).copied())
                .unwrap_or_else(|| event.key());
            let data = event.args.get("data").unwrap_or(&Value::Null);
            match ProfileFragment::from_trace_event(&event.name, key.pid, key.tid, data) {
                Ok(Some(fragment)) => threads
                    .entry(key)
                    .or_insert_with(|| ThreadInput::new(key))
                    .fragments
                    .push(fragment),
                Ok(None) => {}
                Err(err) => warn!(thread = %key, "skipping event: {err}"),
            }
        } else if let Some(dur) = event.dur {
            let key = event.key();
            threads
                .entry(key)
                .or_insert_with(|| ThreadInput::new(key))
                .events
                .push(BoundaryEvent::new(event.cat, micros(event.ts), micros(dur)));
        }
    }

    debug!(threads = threads.len(), "demultiplexed trace");
    threads.into_values().collect()
}
