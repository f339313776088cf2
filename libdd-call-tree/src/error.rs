// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;

/// Errors surfaced by the reconstruction API.
///
/// Incomplete or out-of-order profiler data is not an error: it is skipped or
/// sorted. These variants cover input the caller can fix.
#[derive(Debug, thiserror::Error)]
pub enum CallTreeError {
    /// The configuration cannot drive a reconstruction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
    /// An aggregation window must have a positive length.
    #[error("invalid window: end ({end}) must be greater than begin ({begin})")]
    InvalidWindow { begin: i64, end: i64 },
    /// A profile fragment payload could not be decoded.
    #[error("malformed {kind} fragment: {source}")]
    MalformedFragment {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl CallTreeError {
    pub fn invalid_config(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}
