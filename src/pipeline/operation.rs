//! Pipeline specification strings.
//!
//! A pipeline is written as `&`-separated operations, each `name:arg:arg...`:
//!
//! ```text
//! fetch&exponential:1:2:160&growRoot:500&cache:100
//! ```
//!
//! `=` and a percent-encoded colon (`%3A`) are accepted as argument
//! separators, so `cache=100` and `cache%3A100` are both `cache:100`.

use std::fmt;

use crate::error::PipelineError;

/// Name of the reserved operation that selects the backing source.
pub const SOURCE_OPERATION: &str = "src";

/// One step of a pipeline: a filter name and its raw arguments.
///
/// Arguments are kept as written; `exponential:1:2` and `exponential:1.0:2`
/// are different operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    pub name: String,
    pub args: Vec<String>,
}

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a single `name:arg:arg` token.
    pub fn parse(token: &str) -> Result<Self, PipelineError> {
        let normalized = token.replace("%3A", ":").replace("%3a", ":").replace('=', ":");
        let mut parts = normalized.split(':').map(decode_part);

        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(PipelineError::invalid_operation(
                token,
                "operation name is empty",
            ));
        }

        Ok(Self {
            name,
            args: parts.collect(),
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, ":{}", arg)?;
        }
        Ok(())
    }
}

fn decode_part(part: &str) -> String {
    urlencoding::decode(part)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| part.to_string())
}

/// Parse a full pipeline specification. Empty tokens are skipped.
pub fn parse_pipeline(spec: &str) -> Result<Vec<Operation>, PipelineError> {
    spec.split('&')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(Operation::parse)
        .collect()
}

/// Textual signature of a source followed by `operations`.
///
/// Used to namespace state that must not be shared between different
/// upstream chains.
pub fn signature(source: &str, operations: &[Operation]) -> String {
    let mut parts = Vec::with_capacity(operations.len() + 1);
    parts.push(format!("{}:{}", SOURCE_OPERATION, source));
    parts.extend(operations.iter().map(ToString::to_string));
    parts.join("&")
}
