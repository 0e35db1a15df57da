//! Error types for the cadenza ingestion engine.
//!
//! Errors are layered the same way the pipeline is: syntax problems found
//! while reading a line ([`ParseError`]), semantic problems found while
//! inserting a point into a batch ([`FamilyError`]), and misses on the
//! read path of the block ([`LookupError`]). [`ReadError`] wraps the first
//! two with the line number and the partially built batch.

use thiserror::Error;

use crate::group::MetricFamiliesTimeGroup;
use crate::labels::LabelSet;

/// The main error type for all cadenza operations.
#[derive(Error, Debug)]
pub enum CadenzaError {
    /// A payload line or selector was syntactically invalid.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A point could not be inserted into its batch.
    #[error("family error: {0}")]
    Family(#[from] FamilyError),

    /// A requested time series does not exist.
    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Reading a payload stopped at a failing line.
    #[error("read error: {0}")]
    Read(#[from] ReadError),
}

/// Syntax errors raised while parsing a single payload line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A `#` line did not carry a `TYPE` or `HELP` directive with a name.
    #[error("unexpected metadata: '{line}'")]
    UnexpectedMetadata {
        /// The offending line.
        line: String,
    },

    /// A sample line did not split into a name and exactly one label block.
    #[error("unexpected metric line: '{line}'")]
    UnexpectedMetricLine {
        /// The offending line.
        line: String,
    },

    /// The metric name is empty or contains characters outside `[a-zA-Z0-9_:]`.
    #[error("invalid metric name: '{name}'")]
    InvalidMetricName {
        /// The rejected name.
        name: String,
    },

    /// The sample value is missing, is followed by extra tokens, or is not a float.
    #[error("invalid value in metric line: '{value}'")]
    InvalidValue {
        /// The text found where the value was expected.
        value: String,
    },

    /// The label block does not follow `key="value"(,key="value")*}`.
    #[error("malformed label set near '{fragment}'")]
    MalformedLabelSet {
        /// The unparsed text at the point of failure (truncated).
        fragment: String,
    },

    /// A label key appears twice within one label set.
    #[error("label key '{key}' is repeated within a metric point")]
    DuplicateLabelKey {
        /// The repeated key.
        key: String,
    },

    /// The line is not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Semantic errors raised while inserting a point into a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FamilyError {
    /// A sample arrived for a metric name with no prior `TYPE`/`HELP` line.
    #[error("metric family '{name}' not found")]
    FamilyNotFound {
        /// The undeclared metric name.
        name: String,
    },

    /// The same (name, label set) identity appeared twice in one batch.
    #[error("label set {labels} of '{name}' is repeated within one batch")]
    DuplicateLabelSet {
        /// The metric name.
        name: String,
        /// The repeated label set.
        labels: LabelSet,
    },
}

/// Errors raised on the block's read path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// No series with this identity has been ingested.
    #[error("time series {name}{labels} not found")]
    TimeSeriesNotFound {
        /// The requested metric name.
        name: String,
        /// The requested label set.
        labels: LabelSet,
    },
}

/// The failure that stopped a read at a particular line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    /// The line itself was malformed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The line parsed but could not be applied to the batch.
    #[error(transparent)]
    Family(#[from] FamilyError),
}

/// A payload read that stopped at its first failing line.
///
/// The batch built from the lines before the failure is kept so the caller
/// can decide whether to discard it or ingest the families that were valid.
#[derive(Error, Debug)]
#[error("line {line}: {cause}")]
pub struct ReadError {
    /// 1-based number of the failing line.
    pub line: usize,
    /// What went wrong on that line.
    #[source]
    pub cause: LineError,
    partial: MetricFamiliesTimeGroup,
}

impl ReadError {
    /// Creates a read error for `line`, keeping the batch built so far.
    pub fn new(line: usize, cause: LineError, partial: MetricFamiliesTimeGroup) -> Self {
        Self {
            line,
            cause,
            partial,
        }
    }

    /// Returns true if the failing line was malformed.
    pub fn is_syntax(&self) -> bool {
        matches!(self.cause, LineError::Parse(_))
    }

    /// Returns true if the failing line parsed but violated a batch rule.
    pub fn is_semantic(&self) -> bool {
        matches!(self.cause, LineError::Family(_))
    }

    /// Returns the batch as it stood before the failing line.
    pub fn partial(&self) -> &MetricFamiliesTimeGroup {
        &self.partial
    }

    /// Consumes the error, returning the partially built batch.
    pub fn into_partial(self) -> MetricFamiliesTimeGroup {
        self.partial
    }
}

/// Type alias for `Result<T, CadenzaError>`.
pub type Result<T> = std::result::Result<T, CadenzaError>;
