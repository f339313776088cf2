// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::{CallTreeError, FrameFilter, Timestamp};
use serde::Deserialize;

/// Nominal sampling period of the V8 profiler, in microseconds. Two
/// same-frame samples further apart than this are never coalesced.
pub const SAMPLING_INTERVAL: Timestamp = 200;

/// Trace category whose events delimit macro-tasks.
pub const DEFAULT_BOUNDARY_CATEGORY: &str = "toplevel";

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub filter: FrameFilter,
    /// Maximum gap between two same-frame samples that still belong to one
    /// call. Must be positive.
    pub sampling_interval: Timestamp,
    /// Events in these categories become boundaries that calls never span.
    pub boundary_categories: Vec<String>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            filter: FrameFilter::default(),
            sampling_interval: SAMPLING_INTERVAL,
            boundary_categories: vec![DEFAULT_BOUNDARY_CATEGORY.to_string()],
        }
    }
}

impl ReconstructionConfig {
    pub fn with_filter(mut self, filter: FrameFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sampling_interval(mut self, sampling_interval: Timestamp) -> Self {
        self.sampling_interval = sampling_interval;
        self
    }

    pub fn with_boundary_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.boundary_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), CallTreeError> {
        if self.sampling_interval <= 0 {
            return Err(CallTreeError::invalid_config(format!(
                "sampling interval must be positive, got {}",
                self.sampling_interval
            )));
        }
        Ok(())
    }
}
