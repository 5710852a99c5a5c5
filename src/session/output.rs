//! Bounded log of adapter output
//!
//! Records are immutable once appended. Limits are enforced by evicting the
//! oldest records; a single record larger than the byte cap is truncated.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::SystemTime;

/// Output category as reported by the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    Console,
    Stdout,
    Stderr,
    Telemetry,
    Other(String),
}

impl OutputCategory {
    /// DAP treats a missing category as console
    pub fn parse(category: Option<&str>) -> Self {
        match category {
            None | Some("console") | Some("important") => OutputCategory::Console,
            Some("stdout") => OutputCategory::Stdout,
            Some("stderr") => OutputCategory::Stderr,
            Some("telemetry") => OutputCategory::Telemetry,
            Some(other) => OutputCategory::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for OutputCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputCategory::Console => write!(f, "console"),
            OutputCategory::Stdout => write!(f, "stdout"),
            OutputCategory::Stderr => write!(f, "stderr"),
            OutputCategory::Telemetry => write!(f, "telemetry"),
            OutputCategory::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub category: OutputCategory,
    pub output: String,
    #[serde(skip)]
    pub received_at: SystemTime,
}

#[derive(Debug)]
pub struct OutputLog {
    records: VecDeque<OutputRecord>,
    total_bytes: usize,
    max_records: usize,
    max_bytes: usize,
}

impl OutputLog {
    pub fn new(max_records: usize, max_bytes: usize) -> Self {
        Self {
            records: VecDeque::new(),
            total_bytes: 0,
            max_records: max_records.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    pub fn push(&mut self, category: OutputCategory, output: &str) {
        let output = if output.len() > self.max_bytes {
            tracing::warn!(
                "Output message ({} bytes) exceeds max buffer size ({} bytes), truncating",
                output.len(),
                self.max_bytes
            );
            truncate_at_char_boundary(output, self.max_bytes).to_string()
        } else {
            output.to_string()
        };

        while !self.records.is_empty()
            && (self.total_bytes + output.len() > self.max_bytes
                || self.records.len() >= self.max_records)
        {
            if let Some(evicted) = self.records.pop_front() {
                self.total_bytes -= evicted.output.len();
            }
        }

        self.total_bytes += output.len();
        self.records.push_back(OutputRecord {
            category,
            output,
            received_at: SystemTime::now(),
        });
    }

    /// All records, or only the last `tail`
    pub fn records(&self, tail: Option<usize>) -> Vec<OutputRecord> {
        let skip = tail.map_or(0, |n| self.records.len().saturating_sub(n));
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Remove and return every record
    pub fn drain(&mut self) -> Vec<OutputRecord> {
        self.total_bytes = 0;
        self.records.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parsing() {
        assert_eq!(OutputCategory::parse(None), OutputCategory::Console);
        assert_eq!(OutputCategory::parse(Some("stdout")), OutputCategory::Stdout);
        assert_eq!(
            OutputCategory::parse(Some("exception")),
            OutputCategory::Other("exception".into())
        );
    }

    #[test]
    fn test_record_limit_evicts_oldest() {
        let mut log = OutputLog::new(2, 1024);
        log.push(OutputCategory::Stdout, "one\n");
        log.push(OutputCategory::Stdout, "two\n");
        log.push(OutputCategory::Stderr, "three\n");

        let outputs: Vec<_> = log.records(None).into_iter().map(|r| r.output).collect();
        assert_eq!(outputs, vec!["two\n", "three\n"]);
    }

    #[test]
    fn test_byte_limit_evicts_oldest() {
        let mut log = OutputLog::new(100, 10);
        log.push(OutputCategory::Stdout, "aaaa");
        log.push(OutputCategory::Stdout, "bbbb");
        log.push(OutputCategory::Stdout, "cccc");
        assert_eq!(log.len(), 2);
        assert_eq!(log.total_bytes(), 8);
        assert_eq!(log.records(Some(1))[0].output, "cccc");
    }

    #[test]
    fn test_oversized_record_truncated_on_char_boundary() {
        let mut log = OutputLog::new(10, 5);
        log.push(OutputCategory::Stdout, "abcd✓efg");
        let records = log.drain();
        assert_eq!(records[0].output, "abcd");
        assert!(log.is_empty());
        assert_eq!(log.total_bytes(), 0);
    }
}
