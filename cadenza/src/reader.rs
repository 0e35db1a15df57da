//! Line-oriented payload reader.
//!
//! # Payload Format
//!
//! ```text
//! 978595200
//! # HELP http_requests_total The total number of HTTP requests.
//! # TYPE http_requests_total gauge
//! http_requests_total{method="post",code="200"} 1027
//! http_requests_total{method="post",code="422"} 1
//! ```
//!
//! The first non-blank line may be a base-10 unix timestamp for the whole
//! batch. If it is not, it is read as an ordinary line and the batch
//! timestamp stays zero.
//! Lines starting with `#` declare metadata; every other non-blank line is a
//! sample. A sample's family must be declared earlier in the same payload.
//!
//! Reading stops at the first failing line. The batch built up to that
//! point travels with the error (see [`ReadError::partial`]).
//!
//! # Example
//!
//! ```rust
//! use cadenza::reader::{LineReader, Reader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let payload = b"1700000000\n# TYPE up gauge\nup{job=\"api\"} 1\n";
//! let group = LineReader::new().read(payload)?;
//!
//! assert_eq!(group.timestamp(), 1_700_000_000);
//! assert_eq!(group.point_count(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{LineError, ParseError, ReadError};
use crate::group::MetricFamiliesTimeGroup;
use crate::labels::{LabelSet, parse_label_block};
use crate::metric::{MetricDefinition, MetricPoint, MetricType};

static METRIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("metric name regex is valid")
});

/// Turns a raw payload into a batch of metric families.
///
/// This is the seam for alternative wire formats.
pub trait Reader {
    /// Reads one payload into a new batch.
    ///
    /// # Errors
    ///
    /// Returns a [`ReadError`] for the first line that fails to parse or to
    /// apply to the batch. The error carries the partially built batch.
    fn read(&self, payload: &[u8]) -> Result<MetricFamiliesTimeGroup, ReadError>;
}

/// Reader for the line-oriented text format.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineReader;

impl LineReader {
    /// Creates a line reader.
    pub fn new() -> Self {
        Self
    }
}

impl Reader for LineReader {
    fn read(&self, payload: &[u8]) -> Result<MetricFamiliesTimeGroup, ReadError> {
        let mut group = MetricFamiliesTimeGroup::new();
        let mut awaiting_first = true;

        for (index, raw) in payload.split(|&b| b == b'\n').enumerate() {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

            let outcome = match std::str::from_utf8(raw) {
                Err(_) => Err(ParseError::InvalidUtf8.into()),
                Ok(line) if line.trim().is_empty() => Ok(()),
                Ok(line) => {
                    if std::mem::take(&mut awaiting_first)
                        && let Ok(timestamp) = line.trim().parse::<i64>()
                    {
                        group.set_timestamp(timestamp);
                        Ok(())
                    } else {
                        process_line(line, &mut group)
                    }
                }
            };

            if let Err(cause) = outcome {
                return Err(ReadError::new(index + 1, cause, group));
            }
        }

        tracing::trace!(
            timestamp = group.timestamp(),
            families = group.len(),
            points = group.point_count(),
            "read payload"
        );

        Ok(group)
    }
}

/// Applies one non-blank line to the batch.
fn process_line(line: &str, group: &mut MetricFamiliesTimeGroup) -> Result<(), LineError> {
    if line.starts_with('#') {
        let definition = parse_metadata(line)?;
        group.upsert_family(definition);
    } else {
        let point = parse_sample(line, group.timestamp())?;
        group.insert_point(point)?;
    }
    Ok(())
}

/// Parses `# TYPE <name> <text>` or `# HELP <name> <text>`.
///
/// # Errors
///
/// - [`ParseError::UnexpectedMetadata`] for any other directive, or when the
///   name is missing
/// - [`ParseError::InvalidMetricName`] if the name is malformed
pub fn parse_metadata(line: &str) -> Result<MetricDefinition, ParseError> {
    let unexpected = || ParseError::UnexpectedMetadata {
        line: line.to_string(),
    };

    let body = line.strip_prefix("# ").ok_or_else(unexpected)?;
    let mut parts = body.splitn(3, ' ');
    let directive = parts.next().unwrap_or_default();
    let name = parts
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(unexpected)?;
    let text = parts.next().unwrap_or_default();

    let definition = match directive {
        // Non-gauge types are not supported yet; the declared text is ignored.
        "TYPE" => MetricDefinition::new(name).with_type(MetricType::Gauge),
        "HELP" => MetricDefinition::new(name).with_help(text),
        _ => return Err(unexpected()),
    };

    validate_name(name)?;
    Ok(definition)
}

/// Parses `<name>{<label>="<value>",...} <value>` into a point.
///
/// # Errors
///
/// - [`ParseError::UnexpectedMetricLine`] if the line has no `{` or more than one
/// - [`ParseError::InvalidMetricName`] if the name is malformed
/// - [`ParseError::MalformedLabelSet`] / [`ParseError::DuplicateLabelKey`]
///   for a bad label block
/// - [`ParseError::InvalidValue`] if the value is missing or not a float
pub fn parse_sample(line: &str, timestamp: i64) -> Result<MetricPoint, ParseError> {
    let (name, rest) = split_name(line)?;
    let (labels, remainder) = parse_label_block(rest)?;
    let value = parse_value(remainder)?;
    Ok(MetricPoint::new(name, labels, value, timestamp))
}

/// Parses a series selector: `name{label="value",...}` or a bare `name`.
///
/// Used to address a series for lookups; no value may follow the labels.
///
/// # Errors
///
/// Returns a [`ParseError`] if the selector is not a valid name with an
/// optional label block, or if anything follows the block.
pub fn parse_selector(text: &str) -> Result<(String, LabelSet), ParseError> {
    let text = text.trim();
    if !text.contains('{') {
        validate_name(text)?;
        return Ok((text.to_string(), LabelSet::new()));
    }

    let (name, rest) = split_name(text)?;
    let (labels, remainder) = parse_label_block(rest)?;
    if !remainder.trim().is_empty() {
        return Err(ParseError::UnexpectedMetricLine {
            line: text.to_string(),
        });
    }
    Ok((name.to_string(), labels))
}

/// Splits a line at its only `{`, validating the name before it.
fn split_name(line: &str) -> Result<(&str, &str), ParseError> {
    let unexpected = || ParseError::UnexpectedMetricLine {
        line: line.to_string(),
    };

    let (name, rest) = line.split_once('{').ok_or_else(unexpected)?;
    if rest.contains('{') {
        return Err(unexpected());
    }
    validate_name(name)?;
    Ok((name, rest))
}

fn validate_name(name: &str) -> Result<(), ParseError> {
    if METRIC_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ParseError::InvalidMetricName {
            name: name.to_string(),
        })
    }
}

/// Parses the text after the label block, which must be exactly one float.
fn parse_value(remainder: &str) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidValue {
        value: remainder.trim().to_string(),
    };

    let mut tokens = remainder.split_whitespace();
    let token = tokens.next().ok_or_else(invalid)?;
    if tokens.next().is_some() {
        return Err(invalid());
    }
    token.parse::<f64>().map_err(|_| invalid())
}
