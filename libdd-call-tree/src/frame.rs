// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;

/// Code types that survive [`FrameFilter::filter_code_types`].
const ALLOWED_CODE_TYPES: &[&str] = &["JS"];

/// URL prefixes rejected by [`FrameFilter::filter_urls`]. These are browser
/// internals and extensions, never the page's own code.
const DENIED_URL_PREFIXES: &[&str] = &[
    "chrome-extension://",
    "moz-extension://",
    "extensions::",
    "chrome://",
    "devtools://",
];

/// Static description of one function in the profiled program.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub function_name: String,
    #[serde(default, deserialize_with = "deserialize_script_id")]
    pub script_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "unknown_position")]
    pub line_number: i64,
    #[serde(default = "unknown_position")]
    pub column_number: i64,
    /// Where the code came from, e.g. `JS` or `other`. Absent for profiles
    /// that predate the field.
    #[serde(default)]
    pub code_type: Option<String>,
}

fn unknown_position() -> i64 {
    -1
}

/// V8 has emitted the script id both as a string and as a number.
fn deserialize_script_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        _ => Err(D::Error::custom("expected string or number for scriptId")),
    }
}

impl CallFrame {
    pub fn new(function_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            url: url.into(),
            line_number: unknown_position(),
            column_number: unknown_position(),
            ..Default::default()
        }
    }

    pub fn with_code_type(mut self, code_type: impl Into<String>) -> Self {
        self.code_type = Some(code_type.into());
        self
    }
}

/// Decides which frames may appear in a reconstructed tree. Both criteria
/// are off by default, which accepts everything.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct FrameFilter {
    /// Only keep frames whose code type is user code.
    pub filter_code_types: bool,
    /// Drop frames coming from browser internals and extensions.
    pub filter_urls: bool,
}

impl FrameFilter {
    pub const ACCEPT_ALL: FrameFilter = FrameFilter {
        filter_code_types: false,
        filter_urls: false,
    };

    pub const fn new(filter_code_types: bool, filter_urls: bool) -> Self {
        Self {
            filter_code_types,
            filter_urls,
        }
    }

    pub fn is_allowed(&self, frame: &CallFrame) -> bool {
        if self.filter_code_types {
            let allowed = frame
                .code_type
                .as_deref()
                .is_some_and(|code_type| ALLOWED_CODE_TYPES.contains(&code_type));
            if !allowed {
                return false;
            }
        }
        if self.filter_urls
            && DENIED_URL_PREFIXES
                .iter()
                .any(|prefix| frame.url.starts_with(prefix))
        {
            return false;
        }
        true
    }
}
