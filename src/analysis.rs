//! Header and size reports over a finished output log
//!
//! Runs after retrieval, over the fully loaded log: nothing here is streamed or
//! concurrent. Records are only read through `sizeEstimate` and
//! `payload.headers[].{name,value}`.

use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Placeholder for a header the message does not carry
pub const NO_HEADER: &str = "<no-header>";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Read every record of a JSON Lines log into memory
///
/// Blank lines are skipped.
pub fn load_records(path: &Path) -> Result<Vec<Value>> {
    let file = std::fs::File::open(path)?;
    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            tracing::error!(path = %path.display(), line = number + 1, error = %e, "malformed record");
            Error::Serialization(e)
        })?;
        records.push(record);
    }
    tracing::debug!(path = %path.display(), records = records.len(), "loaded output log");
    Ok(records)
}

/// First header of `message` named `name` (case-insensitive), or [`NO_HEADER`]
pub fn header_value(message: &Value, name: &str) -> String {
    message
        .pointer("/payload/headers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .and_then(|h| h.get("value").and_then(Value::as_str))
        .unwrap_or(NO_HEADER)
        .to_string()
}

fn size_estimate(message: &Value) -> u64 {
    message
        .get("sizeEstimate")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Messages whose subject contains a substring
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectMatch {
    /// Substring searched for, as given
    pub needle: String,
    /// Matching messages
    pub count: usize,
    /// Sum of their size estimates in bytes
    pub total_bytes: u64,
}

impl fmt::Display for SubjectMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Found {} messages with subject containing '{}' with a total size of {:.2} MB",
            self.count,
            self.needle,
            megabytes(self.total_bytes)
        )
    }
}

/// Count messages whose lower-cased subject contains `needle` (lower-cased)
///
/// An empty needle matches every message.
pub fn subject_match(messages: &[Value], needle: &str) -> SubjectMatch {
    let lowered = needle.to_lowercase();
    let (count, total_bytes) = messages
        .iter()
        .filter(|m| header_value(m, "subject").to_lowercase().contains(&lowered))
        .fold((0usize, 0u64), |(count, bytes), m| {
            (count + 1, bytes + size_estimate(m))
        });
    SubjectMatch {
        needle: needle.to_string(),
        count,
        total_bytes,
    }
}

/// Aggregate for one distinct header value
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderGroup {
    /// Lower-cased header value
    pub value: String,
    /// Messages carrying it
    pub count: u64,
    /// Sum of their size estimates in bytes
    pub total_bytes: u64,
}

/// Report files written by [`summarize_by_header`]
#[derive(Clone, Debug)]
pub struct HeaderReport {
    /// Every value, sorted
    pub all_values: PathBuf,
    /// Distinct values by descending count
    pub by_count: PathBuf,
    /// Distinct values by descending total size
    pub by_size: PathBuf,
    /// Distinct values in first-seen order
    pub groups: Vec<HeaderGroup>,
}

/// Group messages by the lower-cased value of header `name`, keeping first-seen order
pub fn group_by_header(messages: &[Value], name: &str) -> Vec<HeaderGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<HeaderGroup> = Vec::new();
    for message in messages {
        let value = header_value(message, name).to_lowercase();
        let size = size_estimate(message);
        match index.get(&value) {
            Some(&i) => {
                groups[i].count += 1;
                groups[i].total_bytes += size;
            }
            None => {
                index.insert(value.clone(), groups.len());
                groups.push(HeaderGroup {
                    value,
                    count: 1,
                    total_bytes: size,
                });
            }
        }
    }
    groups
}

/// Write the three report files for header `name` into `out_dir`
///
/// - `_analyzed_{name}.txt`: every lower-cased value, sorted
/// - `_analyzed_{name}_unique_by_count.txt`: `count: C, size: X.XX MB\tvalue`
/// - `_analyzed_{name}_unique_by_size.txt`: `size: X.XX MB, count: C\tvalue`
///
/// Both unique listings are descending; ties keep first-seen order.
pub fn summarize_by_header(messages: &[Value], name: &str, out_dir: &Path) -> Result<HeaderReport> {
    std::fs::create_dir_all(out_dir)?;

    let mut values: Vec<String> = messages
        .iter()
        .map(|m| header_value(m, name).to_lowercase())
        .collect();
    values.sort();

    let all_values = out_dir.join(format!("_analyzed_{}.txt", name));
    write_lines(&all_values, values.iter().map(String::as_str))?;

    let groups = group_by_header(messages, name);

    let mut by_count: Vec<&HeaderGroup> = groups.iter().collect();
    by_count.sort_by(|a, b| b.count.cmp(&a.count));
    let by_count_path = out_dir.join(format!("_analyzed_{}_unique_by_count.txt", name));
    write_lines(
        &by_count_path,
        by_count.iter().map(|g| {
            format!(
                "count: {}, size: {:.2} MB\t{}",
                g.count,
                megabytes(g.total_bytes),
                g.value
            )
        }),
    )?;

    let mut by_size: Vec<&HeaderGroup> = groups.iter().collect();
    by_size.sort_by(|a, b| b.total_bytes.cmp(&a.total_bytes));
    let by_size_path = out_dir.join(format!("_analyzed_{}_unique_by_size.txt", name));
    write_lines(
        &by_size_path,
        by_size.iter().map(|g| {
            format!(
                "size: {:.2} MB, count: {}\t{}",
                megabytes(g.total_bytes),
                g.count,
                g.value
            )
        }),
    )?;

    tracing::info!(
        header = name,
        distinct = groups.len(),
        dir = %out_dir.display(),
        "wrote header reports"
    );

    Ok(HeaderReport {
        all_values,
        by_count: by_count_path,
        by_size: by_size_path,
        groups,
    })
}

fn write_lines<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BufWriter::new(std::fs::File::create(path)?);
    for line in lines {
        writeln!(out, "{}", line.as_ref())?;
    }
    out.flush()?;
    Ok(())
}

/// Run the configured report set over the log at `log_path`
///
/// Prints one line per subject filter to `out`, then writes the header reports
/// next to the log.
pub fn analyze(config: &AnalysisConfig, log_path: &Path, out: &mut dyn Write) -> Result<Vec<HeaderReport>> {
    let messages = load_records(log_path)?;
    let report_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    for needle in &config.subject_filters {
        writeln!(out, "{}", subject_match(&messages, needle))?;
    }

    config
        .headers
        .iter()
        .map(|header| summarize_by_header(&messages, header, report_dir))
        .collect()
}
