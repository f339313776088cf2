// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::{BoundaryEvent, Timestamp};

/// Sorted, de-duplicated timestamps at which macro-tasks start or end.
/// A reconstructed call never spans one of them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Boundaries(Vec<Timestamp>);

impl Boundaries {
    /// Collects the start and end of every event carrying one of
    /// `categories`. An event matches when any of its comma separated
    /// categories is listed.
    pub fn collect<'a, I, S>(events: I, categories: &[S]) -> Self
    where
        I: IntoIterator<Item = &'a BoundaryEvent>,
        S: AsRef<str>,
    {
        events
            .into_iter()
            .filter(|event| {
                event
                    .categories()
                    .any(|category| categories.iter().any(|c| c.as_ref() == category))
            })
            .flat_map(|event| [event.start, event.end()])
            .collect()
    }

    /// The smallest boundary strictly greater than `ts`.
    pub fn next_after(&self, ts: Timestamp) -> Option<Timestamp> {
        let index = self.0.partition_point(|&boundary| boundary <= ts);
        self.0.get(index).copied()
    }

    pub fn as_slice(&self) -> &[Timestamp] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Timestamp> for Boundaries {
    fn from_iter<T: IntoIterator<Item = Timestamp>>(iter: T) -> Self {
        let mut timestamps: Vec<Timestamp> = iter.into_iter().collect();
        timestamps.sort_unstable();
        timestamps.dedup();
        Self(timestamps)
    }
}
