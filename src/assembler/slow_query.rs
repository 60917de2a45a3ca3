use super::scrub::Scrubber;
use super::Formatter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::Lines;

/// One slow-query log entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SlowQueryRecord {
    pub time: String,
    pub user: String,
    pub host: String,
    pub connection_id: i64,
    pub query_time: f64,
    pub lock_time: f64,
    pub rows_sent: i64,
    pub rows_examined: i64,
    pub database_name: String,
    pub timestamp: i64,
    pub query: String,
}

struct Patterns {
    time: Regex,
    user: Regex,
    host: Regex,
    connection_id: Regex,
    query_time: Regex,
    lock_time: Regex,
    rows_sent: Regex,
    rows_examined: Regex,
    timestamp: Regex,
}

impl Patterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            time: Regex::new(r"(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2})[./](\d{6})Z$")?,
            user: Regex::new(r"User@Host: ([A-Za-z0-9_.-]*)")?,
            host: Regex::new(
                r"(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)){3}",
            )?,
            connection_id: Regex::new(r"Id:\s*(\d+)")?,
            query_time: Regex::new(r"Query_time: (\d+(?:\.\d+)?)")?,
            lock_time: Regex::new(r"Lock_time: (\d+(?:\.\d+)?)")?,
            rows_sent: Regex::new(r"Rows_sent: (\d+)")?,
            rows_examined: Regex::new(r"Rows_examined: (\d+)")?,
            timestamp: Regex::new(r"(?i)timestamp\s*=\s*(\d+)")?,
        })
    }
}

fn capture<'t>(pattern: &Regex, line: &'t str) -> Option<&'t str> {
    pattern
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn capture_parsed<T: std::str::FromStr + Default>(pattern: &Regex, line: &str) -> T {
    capture(pattern, line)
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

/// Groups the multi-line entries of a MySQL slow-query log into JSON records.
///
/// Header lines (`# Time`, `# User@Host`, `# Query_time`, `use <db>`,
/// `SET timestamp`) fill the entry in progress; the first other non-blank line
/// is the query and closes it. An entry that never saw a `# Time` line is a
/// fragment from before the first record boundary and is dropped.
///
/// Blobs are assumed to start at a record boundary. An entry split across two
/// fetches loses its header half.
pub struct SlowQueryAssembler {
    patterns: Patterns,
    scrubber: Scrubber,
}

impl SlowQueryAssembler {
    pub fn new(scrubber: Scrubber) -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: Patterns::new()?,
            scrubber,
        })
    }

    pub fn records<'a>(&'a self, blob: &'a str) -> Records<'a> {
        Records {
            assembler: self,
            lines: blob.lines(),
            current: Entry::default(),
            database: None,
        }
    }
}

impl Formatter for SlowQueryAssembler {
    fn format<'a>(&'a self, blob: &'a str) -> Box<dyn Iterator<Item = String> + Send + 'a> {
        Box::new(self.records(blob).filter_map(|record| {
            serde_json::to_string(&record)
                .map(|json| json + "\n")
                .map_err(|e| tracing::warn!(error = %e, "Failed to serialize record"))
                .ok()
        }))
    }
}

#[derive(Default)]
struct Entry {
    time: Option<String>,
    record: SlowQueryRecord,
}

/// Lazy sequence of records assembled from one blob.
pub struct Records<'a> {
    assembler: &'a SlowQueryAssembler,
    lines: Lines<'a>,
    current: Entry,
    /// Last `use <db>` seen; applies to later entries until replaced.
    database: Option<String>,
}

impl Records<'_> {
    fn absorb_header(&mut self, line: &str) -> bool {
        let p = &self.assembler.patterns;
        let lower = line.to_ascii_lowercase();

        if line.starts_with("# Time") {
            // Anything but a full ISO timestamp leaves the entry undated.
            self.current.time = p.time.find(line).map(|m| m.as_str().to_string());
        } else if line.starts_with("# User@Host") {
            let record = &mut self.current.record;
            record.user = capture(&p.user, line).unwrap_or_default().to_string();
            record.host = p.host.find(line).map(|m| m.as_str().to_string()).unwrap_or_default();
            record.connection_id = capture_parsed(&p.connection_id, line);
        } else if line.starts_with("# Query_time") {
            let record = &mut self.current.record;
            record.query_time = capture_parsed(&p.query_time, line);
            record.lock_time = capture_parsed(&p.lock_time, line);
            record.rows_sent = capture_parsed(&p.rows_sent, line);
            record.rows_examined = capture_parsed(&p.rows_examined, line);
        } else if lower.starts_with("use ") {
            let name = line[4..].trim().trim_end_matches(';').replace('`', "");
            self.current.record.database_name = name.clone();
            self.database = Some(name);
        } else if lower.starts_with("set timestamp") {
            self.current.record.timestamp = capture_parsed(&p.timestamp, line);
        } else {
            return false;
        }
        true
    }

    fn close(&mut self, query: &str) -> Option<SlowQueryRecord> {
        let entry = std::mem::take(&mut self.current);
        let time = entry.time?;

        let mut record = entry.record;
        record.time = time;
        record.query = self.assembler.scrubber.apply(query);
        if record.database_name.is_empty() {
            if let Some(db) = &self.database {
                record.database_name = db.clone();
            }
        }
        Some(record)
    }
}

impl Iterator for Records<'_> {
    type Item = SlowQueryRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(raw) = self.lines.next() {
            let line = raw.trim();
            if line.is_empty() || self.absorb_header(line) {
                continue;
            }
            if let Some(record) = self.close(line) {
                return Some(record);
            }
        }
        None
    }
}
