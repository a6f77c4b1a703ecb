//! Presentation surface for sweep rows.
//!
//! The engine hands every row to a [`RowSink`] the moment it is measured and
//! keeps nothing itself. [`ConsoleSink`] renders the handheld-style 32-column
//! rows, [`JsonSink`] emits one JSON line per row plus a [`SweepReport`], and
//! [`CollectingSink`] keeps everything in memory for tests and callers.

use crate::config::{BenchmarkConfig, Mode};
use crate::error::RowFailure;
use crate::format::Throughput;
use crate::timer::Ticks;
use chrono::{DateTime, Utc};
use console::Style;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Console line width of the reference display.
pub const LINE_WIDTH: usize = 32;
/// Columns left blank after a right-aligned status.
const RIGHT_MARGIN: usize = 2;
/// Indent before the block size label.
const LABEL_INDENT: &str = "  ";

/// Result of one sweep row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RowOutcome {
    Throughput(Throughput),
    Error(RowFailure),
    Pass,
    Fail(RowFailure),
}

impl RowOutcome {
    /// Short status shown on the row.
    pub fn status_text(&self) -> String {
        match self {
            Self::Throughput(rate) => rate.to_string(),
            Self::Error(_) => "Error".to_string(),
            Self::Pass => "Pass".to_string(),
            Self::Fail(_) => "Fail".to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Fail(_))
    }

    pub fn failure(&self) -> Option<&RowFailure> {
        match self {
            Self::Error(failure) | Self::Fail(failure) => Some(failure),
            Self::Throughput(_) | Self::Pass => None,
        }
    }
}

/// One measured block size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRow {
    pub block_size: usize,
    pub label: String,
    /// Iterations planned for this row.
    pub iterations: u32,
    /// Iterations that ran to completion.
    pub completed: u32,
    pub elapsed: Ticks,
    pub outcome: RowOutcome,
}

/// What a sink learns before the first row.
#[derive(Debug, Clone, Serialize)]
pub struct SweepHeader {
    pub mode: Mode,
    pub backend: String,
    pub config: BenchmarkConfig,
    pub started_at: DateTime<Utc>,
}

/// Counts reported once a sweep ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepSummary {
    pub rows: usize,
    pub errors: usize,
    pub failures: usize,
    pub cancelled: bool,
}

impl SweepSummary {
    pub fn record(&mut self, outcome: &RowOutcome) {
        self.rows += 1;
        match outcome {
            RowOutcome::Error(_) => self.errors += 1,
            RowOutcome::Fail(_) => self.failures += 1,
            RowOutcome::Throughput(_) | RowOutcome::Pass => {}
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.failures == 0 && !self.cancelled
    }
}

/// A full sweep, as written by `--format json`.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    #[serde(flatten)]
    pub header: SweepHeader,
    pub finished_at: DateTime<Utc>,
    pub rows: Vec<SweepRow>,
    pub summary: SweepSummary,
}

/// Receives sweep output in order.
pub trait RowSink {
    fn sweep_started(&mut self, header: &SweepHeader);

    fn row(&mut self, row: &SweepRow);

    fn sweep_finished(&mut self, summary: &SweepSummary);

    /// Pad file materialization progress, in bytes.
    fn pad_progress(&mut self, _path: &Path, _written: u64, _total: u64) {}

    /// A controller setting took a new value.
    fn setting(&mut self, _name: &str, _value: &str) {}

    /// A one-line operator warning, such as a failed open.
    fn notice(&mut self, _message: &str) {}
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Renders rows the way the handheld console did.
pub struct ConsoleSink<W: Write> {
    out: W,
    ok: Style,
    bad: Style,
    heading: Style,
    dim: Style,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, colored: bool) -> Self {
        Self {
            out,
            ok: Style::new().green().force_styling(colored),
            bad: Style::new().red().force_styling(colored),
            heading: Style::new().cyan().bold().force_styling(colored),
            dim: Style::new().dim().force_styling(colored),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, line: impl std::fmt::Display) {
        if let Err(e) = writeln!(self.out, "{line}") {
            warn!(error = %e, "Console write failed");
        }
    }
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout(), console::colors_enabled())
    }
}

/// Label and status with the status right-aligned on a 32-column line.
pub fn render_row(label: &str, status: &str) -> (String, String) {
    let prefix = format!("{LABEL_INDENT}{label}");
    let used = prefix.len() + status.len();
    let gap = (LINE_WIDTH - RIGHT_MARGIN).saturating_sub(used).max(1);
    (format!("{prefix}{}", " ".repeat(gap)), status.to_string())
}

impl<W: Write> RowSink for ConsoleSink<W> {
    fn sweep_started(&mut self, header: &SweepHeader) {
        let line = format!("{:>8}{}", "", self.heading.apply_to(header.mode.heading()));
        self.emit(line);
        let detail = format!(
            "{LABEL_INDENT}offset {} / {} / bus {}",
            header.config.byte_offset, header.config.access, header.config.bus_priority
        );
        let styled = self.dim.apply_to(detail).to_string();
        self.emit(styled);
    }

    fn row(&mut self, row: &SweepRow) {
        let (prefix, status) = render_row(&row.label, &row.outcome.status_text());
        let style = if row.outcome.is_failure() {
            &self.bad
        } else {
            &self.ok
        };
        let line = format!("{prefix}{}", style.apply_to(status));
        self.emit(line);
    }

    fn sweep_finished(&mut self, summary: &SweepSummary) {
        if summary.cancelled {
            let line = self.bad.apply_to("Cancelled").to_string();
            self.emit(line);
        }
        self.emit("");
    }

    fn pad_progress(&mut self, path: &Path, written: u64, total: u64) {
        let line = format!(
            "Creating {}: {:>2} / {} MiB",
            path.display(),
            written >> 20,
            total >> 20
        );
        self.emit(line);
    }

    fn setting(&mut self, name: &str, value: &str) {
        self.emit(format!("{LABEL_INDENT}{name}: {value}"));
    }

    fn notice(&mut self, message: &str) {
        let line = self.bad.apply_to(message).to_string();
        self.emit(line);
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonEvent<'a> {
    Row {
        mode: Mode,
        #[serde(flatten)]
        row: &'a SweepRow,
    },
    Sweep(&'a SweepReport),
    PadProgress {
        path: &'a Path,
        written: u64,
        total: u64,
    },
    Setting {
        name: &'a str,
        value: &'a str,
    },
    Notice {
        message: &'a str,
    },
}

/// One JSON object per line: each row as measured, then the sweep report.
pub struct JsonSink<W: Write> {
    out: W,
    current: Option<(SweepHeader, Vec<SweepRow>)>,
    reports: Vec<SweepReport>,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            current: None,
            reports: Vec::new(),
        }
    }

    /// Reports of every finished sweep so far.
    pub fn reports(&self) -> &[SweepReport] {
        &self.reports
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: &JsonEvent<'_>) {
        let written = serde_json::to_writer(&mut self.out, event)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(self.out));
        if let Err(e) = written {
            warn!(error = %e, "JSON write failed");
        }
    }
}

impl<W: Write> RowSink for JsonSink<W> {
    fn sweep_started(&mut self, header: &SweepHeader) {
        self.current = Some((header.clone(), Vec::new()));
    }

    fn row(&mut self, row: &SweepRow) {
        let Some((header, rows)) = self.current.as_mut() else {
            warn!("Row received outside a sweep");
            return;
        };
        let mode = header.mode;
        rows.push(row.clone());
        self.emit(&JsonEvent::Row { mode, row });
    }

    fn sweep_finished(&mut self, summary: &SweepSummary) {
        let Some((header, rows)) = self.current.take() else {
            return;
        };
        let report = SweepReport {
            header,
            finished_at: Utc::now(),
            rows,
            summary: *summary,
        };
        self.emit(&JsonEvent::Sweep(&report));
        self.reports.push(report);
    }

    fn pad_progress(&mut self, path: &Path, written: u64, total: u64) {
        self.emit(&JsonEvent::PadProgress {
            path,
            written,
            total,
        });
    }

    fn setting(&mut self, name: &str, value: &str) {
        self.emit(&JsonEvent::Setting { name, value });
    }

    fn notice(&mut self, message: &str) {
        self.emit(&JsonEvent::Notice { message });
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps every event; used by tests and library callers.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub headers: Vec<SweepHeader>,
    pub rows: Vec<SweepRow>,
    pub summaries: Vec<SweepSummary>,
    /// `(written, total)` pairs from pad file creation.
    pub progress: Vec<(u64, u64)>,
    pub settings: Vec<(String, String)>,
    pub notices: Vec<String>,
    sweep_starts: Vec<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of the most recent sweep.
    pub fn last_sweep(&self) -> &[SweepRow] {
        let start = self.sweep_starts.last().copied().unwrap_or(0);
        &self.rows[start..]
    }
}

impl RowSink for CollectingSink {
    fn sweep_started(&mut self, header: &SweepHeader) {
        self.headers.push(header.clone());
        self.sweep_starts.push(self.rows.len());
    }

    fn row(&mut self, row: &SweepRow) {
        self.rows.push(row.clone());
    }

    fn sweep_finished(&mut self, summary: &SweepSummary) {
        self.summaries.push(*summary);
    }

    fn pad_progress(&mut self, _path: &Path, written: u64, total: u64) {
        self.progress.push((written, total));
    }

    fn setting(&mut self, name: &str, value: &str) {
        self.settings.push((name.to_string(), value.to_string()));
    }

    fn notice(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoOp;
    use crate::format::block_size_label;

    fn row(block_size: usize, outcome: RowOutcome) -> SweepRow {
        SweepRow {
            block_size,
            label: block_size_label(block_size),
            iterations: 4,
            completed: 4,
            elapsed: Ticks(1000),
            outcome,
        }
    }

    fn header() -> SweepHeader {
        SweepHeader {
            mode: Mode::RandomRead,
            backend: "memory".to_string(),
            config: BenchmarkConfig::default(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_row_right_aligns_status() {
        let (prefix, status) = render_row("  2 MiB", "2.000 MB/s");
        assert_eq!(prefix.len() + status.len(), LINE_WIDTH - RIGHT_MARGIN);
        assert!(prefix.starts_with("    2 MiB"));
    }

    #[test]
    fn test_render_row_keeps_one_space_when_crowded() {
        // Exactly fills the usable width.
        let (prefix, status) = render_row("512 KiB", "12345678901.123 KB/s");
        assert_eq!(prefix, "  512 KiB ");
        assert_eq!(prefix.len() + status.len(), LINE_WIDTH - RIGHT_MARGIN);

        // Overflows it; the gap is still one space.
        let (prefix, status) = render_row("512 KiB", "1234567890123.123 KB/s");
        assert_eq!(prefix, "  512 KiB ");
        assert!(prefix.len() + status.len() > LINE_WIDTH - RIGHT_MARGIN);
    }

    #[test]
    fn test_status_text() {
        let failure = RowFailure::ShortIo {
            op: IoOp::Read,
            iteration: 1,
            requested: 512,
            transferred: 0,
        };
        assert_eq!(RowOutcome::Error(failure.clone()).status_text(), "Error");
        assert_eq!(RowOutcome::Fail(failure).status_text(), "Fail");
        assert_eq!(RowOutcome::Pass.status_text(), "Pass");
        assert_eq!(
            RowOutcome::Throughput(Throughput::from_kbps(512.0)).status_text(),
            "512.000 KB/s"
        );
    }

    #[test]
    fn test_console_sink_plain_output() {
        let mut sink = ConsoleSink::new(Vec::new(), false);
        sink.sweep_started(&header());
        sink.row(&row(2048, RowOutcome::Throughput(Throughput::from_kbps(2048.0))));
        sink.row(&row(
            1024,
            RowOutcome::Error(RowFailure::Io {
                op: IoOp::Read,
                iteration: 0,
                message: "gone".into(),
            }),
        ));
        sink.sweep_finished(&SweepSummary::default());

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "        Testing reads...");
        assert_eq!(lines[2], format!("    2 KiB{}2.000 MB/s", " ".repeat(11)));
        assert_eq!(lines[3].len(), LINE_WIDTH - RIGHT_MARGIN);
        assert!(lines[3].ends_with("Error"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn test_console_sink_colors_when_forced() {
        let mut sink = ConsoleSink::new(Vec::new(), true);
        sink.row(&row(512, RowOutcome::Pass));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.contains('\u{1b}'));
        assert!(text.contains("Pass"));
    }

    #[test]
    fn test_json_sink_emits_rows_and_report() {
        let mut sink = JsonSink::new(Vec::new());
        sink.sweep_started(&header());
        let measured = row(512, RowOutcome::Throughput(Throughput::from_kbps(100.0)));
        sink.row(&measured);
        let mut summary = SweepSummary::default();
        summary.record(&measured.outcome);
        sink.sweep_finished(&summary);

        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.reports()[0].rows, vec![measured]);

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let events: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "row");
        assert_eq!(events[0]["mode"], "random_read");
        assert_eq!(events[0]["outcome"]["status"], "throughput");
        assert_eq!(events[0]["outcome"]["detail"]["unit"], "KB/s");
        assert_eq!(events[1]["type"], "sweep");
        assert_eq!(events[1]["summary"]["rows"], 1);
        assert!(events[1]["started_at"].is_string());
    }

    #[test]
    fn test_json_sink_reports_pad_progress() {
        let mut sink = JsonSink::new(Vec::new());
        sink.pad_progress(Path::new("sdbench.pad"), 1 << 20, 8 << 20);
        sink.pad_progress(Path::new("sdbench.pad"), 8 << 20, 8 << 20);

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let events: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "pad_progress");
        assert_eq!(events[0]["path"], "sdbench.pad");
        assert_eq!(events[0]["written"], 1 << 20);
        assert_eq!(events[1]["written"], events[1]["total"]);
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = SweepSummary::default();
        summary.record(&RowOutcome::Pass);
        summary.record(&RowOutcome::Fail(RowFailure::IntegrityMismatch {
            iteration: 0,
            address: 0,
            first_difference: 0,
        }));
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.failures, 1);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_collecting_sink_last_sweep() {
        let mut sink = CollectingSink::new();
        sink.sweep_started(&header());
        sink.row(&row(1024, RowOutcome::Pass));
        sink.row(&row(512, RowOutcome::Pass));
        sink.sweep_finished(&SweepSummary {
            rows: 2,
            ..SweepSummary::default()
        });
        sink.sweep_started(&header());
        sink.row(&row(2048, RowOutcome::Pass));
        assert_eq!(sink.last_sweep().len(), 1);
        sink.sweep_finished(&SweepSummary {
            rows: 1,
            ..SweepSummary::default()
        });
        assert_eq!(sink.last_sweep().len(), 1);
        assert_eq!(sink.last_sweep()[0].block_size, 2048);
    }
}
