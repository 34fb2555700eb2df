//! Structured logging for handlegate scenario runs.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL log record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines and keeps a running SHA-256 of them.
//! - [`validate_log_line`]: validates a single JSONL line against the schema.
//! - [`validate_log_file`]: validates an entire JSONL file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use handlegate_membrane::InvalidHandleUse;

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Step or run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const OUTCOMES: [&str; 3] = ["pass", "fail", "error"];
const CLASSIFICATIONS: [&str; 3] = ["valid", "use_after_close", "unknown"];
const OPERATIONS: [&str; 2] = ["dereference", "close"];

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    /// Zero-based step index within the scenario.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
    /// `valid`, `use_after_close` or `unknown`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    /// `dereference` or `close`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            scenario: None,
            step: None,
            op: None,
            handle: None,
            classification: None,
            operation: None,
            creation_generation: None,
            sequence: None,
            outcome: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_step(mut self, step: usize, op: impl Into<String>) -> Self {
        self.step = Some(step);
        self.op = Some(op.into());
        self
    }

    #[must_use]
    pub fn with_handle(mut self, handle: u64) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Copy the fields of an invalid-handle report.
    #[must_use]
    pub fn with_report(mut self, report: &InvalidHandleUse) -> Self {
        self.handle = Some(report.id.raw());
        self.classification = Some(report.classification.as_str().to_string());
        self.operation = Some(
            match report.operation {
                handlegate_membrane::Operation::Dereference => "dereference",
                handlegate_membrane::Operation::Close => "close",
            }
            .to_string(),
        );
        self.creation_generation = report.creation_generation;
        self.sequence = report.sequence;
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes structured JSONL log entries and hashes everything written.
pub struct LogEmitter<W: Write> {
    writer: W,
    hasher: Sha256,
    seq: u64,
    lines: usize,
    scenario: String,
    run_id: String,
}

impl LogEmitter<BufWriter<File>> {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, scenario: &str, run_id: &str) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), scenario, run_id))
    }
}

impl LogEmitter<Vec<u8>> {
    /// Create an emitter that writes to an in-memory buffer.
    #[must_use]
    pub fn to_buffer(scenario: &str, run_id: &str) -> Self {
        Self::new(Vec::new(), scenario, run_id)
    }

    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.writer
    }
}

impl<W: Write> LogEmitter<W> {
    pub fn new(writer: W, scenario: &str, run_id: &str) -> Self {
        Self {
            writer,
            hasher: Sha256::new(),
            seq: 0,
            lines: 0,
            scenario: scenario.to_string(),
            run_id: run_id.to_string(),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.scenario, self.run_id, self.seq)
    }

    /// Start an entry with a fresh trace id and the scenario name filled in.
    pub fn entry(&mut self, level: LogLevel, event: &str) -> LogEntry {
        let mut entry = LogEntry::new(self.next_trace_id(), level, event);
        entry.scenario = Some(self.scenario.clone());
        entry
    }

    /// Emit a bare entry.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> io::Result<LogEntry> {
        let entry = self.entry(level, event);
        self.emit_entry(entry.clone())?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.scenario.is_none() {
            entry.scenario = Some(self.scenario.clone());
        }
        let mut line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.hasher.update(line.as_bytes());
        self.lines += 1;
        Ok(())
    }

    #[must_use]
    pub fn lines_written(&self) -> usize {
        self.lines
    }

    /// Lowercase hex SHA-256 of every byte emitted so far.
    #[must_use]
    pub fn sha256_hex(&self) -> String {
        hex_lower(&self.hasher.clone().finalize())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

fn check_enum(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &str,
    allowed: &[&str],
    line_number: usize,
    errors: &mut Vec<LogValidationError>,
) {
    if let Some(value) = obj.get(field).and_then(|v| v.as_str())
        && !allowed.contains(&value)
    {
        errors.push(LogValidationError {
            line_number,
            field: field.to_string(),
            message: format!("invalid {field}: '{value}'"),
        });
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            errors.push(LogValidationError {
                line_number,
                field: "<json>".to_string(),
                message: format!("invalid JSON: {e}"),
            });
            return Err(errors);
        }
    };

    let Some(obj) = value.as_object() else {
        errors.push(LogValidationError {
            line_number,
            field: "<root>".to_string(),
            message: "expected JSON object".to_string(),
        });
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError {
                line_number,
                field: field.to_string(),
                message: "required field missing".to_string(),
            });
        }
    }

    check_enum(obj, "level", &LEVELS, line_number, &mut errors);
    check_enum(obj, "outcome", &OUTCOMES, line_number, &mut errors);
    check_enum(obj, "classification", &CLASSIFICATIONS, line_number, &mut errors);
    check_enum(obj, "operation", &OPERATIONS, line_number, &mut errors);

    // Invalid-handle events must say what was wrong and with which handle.
    if obj.get("event").and_then(|v| v.as_str()) == Some("invalid_handle") {
        for field in ["handle", "classification", "operation"] {
            if !obj.contains_key(field) {
                errors.push(LogValidationError {
                    line_number,
                    field: field.to_string(),
                    message: "invalid_handle events must include this field".to_string(),
                });
            }
        }
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.contains("::")
    {
        errors.push(LogValidationError {
            line_number,
            field: "trace_id".to_string(),
            message: format!(
                "trace_id should follow <scenario>::<run_id>::<seq> format, got: '{trace_id}'"
            ),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value).map_err(|e| {
        vec![LogValidationError {
            line_number,
            field: "<deserialization>".to_string(),
            message: format!("failed to deserialize: {e}"),
        }]
    })
}

/// Validate an entire JSONL file.
///
/// Returns the non-empty line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> io::Result<(usize, Vec<LogValidationError>)> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days(secs / 86_400);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("s::r::001", LogLevel::Info, "step.open");
        let json = entry.to_jsonl().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["level"], "info");
        assert_eq!(value["event"], "step.open");
        assert!(value.get("handle").is_none());
    }

    #[test]
    fn emitter_numbers_trace_ids_and_hashes_output() {
        let mut emitter = LogEmitter::to_buffer("demo", "run1");
        let first = emitter.emit(LogLevel::Info, "scenario.start").unwrap();
        let second = emitter.emit(LogLevel::Info, "scenario.end").unwrap();
        assert_eq!(first.trace_id, "demo::run1::001");
        assert_eq!(second.trace_id, "demo::run1::002");
        assert_eq!(emitter.lines_written(), 2);

        let expected = hex_lower(&Sha256::digest(emitter.contents()));
        assert_eq!(emitter.sha256_hex(), expected);
    }

    #[test]
    fn emitted_lines_pass_validation() {
        let mut emitter = LogEmitter::to_buffer("demo", "run1");
        let mut entry = emitter
            .entry(LogLevel::Warn, "invalid_handle")
            .with_step(3, "deref")
            .with_handle(7);
        entry.classification = Some("use_after_close".into());
        entry.operation = Some("dereference".into());
        emitter.emit_entry(entry).unwrap();

        let text = String::from_utf8(emitter.into_inner()).unwrap();
        for (i, line) in text.lines().enumerate() {
            validate_log_line(line, i + 1).unwrap();
        }
    }

    #[test]
    fn invalid_handle_event_requires_handle_fields() {
        let line = r#"{"timestamp":"t","trace_id":"a::b::1","level":"warn","event":"invalid_handle"}"#;
        let errors = validate_log_line(line, 1).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["handle", "classification", "operation"]);
    }

    #[test]
    fn rejects_unknown_enums_and_bad_trace_id() {
        let line = r#"{"timestamp":"t","trace_id":"flat","level":"loud","event":"x","classification":"stale"}"#;
        let errors = validate_log_line(line, 4).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "level"));
        assert!(errors.iter().any(|e| e.field == "classification"));
        assert!(errors.iter().any(|e| e.field == "trace_id"));
        assert!(errors.iter().all(|e| e.line_number == 4));
    }

    #[test]
    fn rejects_non_object_and_bad_json() {
        assert_eq!(validate_log_line("[1]", 1).unwrap_err()[0].field, "<root>");
        assert_eq!(validate_log_line("{", 1).unwrap_err()[0].field, "<json>");
    }

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
    }
}
