//! # Result Sinks
//!
//! One semicolon-delimited CSV row per successful run, appended to the
//! configured sink, plus an optional pretty-printed JSON summary of the
//! whole `RunReport`. The CSV header goes in only when the sink is new or
//! empty, so repeated runs accumulate rows under a single header.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::coordinator::RunReport;
use crate::error::Result;

/// Benchmark name written in the first CSV column.
pub const BENCHMARK_NAME: &str = "usm_add";

/// CSV header line (without the trailing newline).
pub const CSV_HEADER: &str =
    "benchmark;datasize;device;time_event_s;time_wall_s;host_threads;cpu_share;mode";

/// A single CSV result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub benchmark: &'static str,
    /// Element count
    pub datasize: usize,
    pub device: String,
    /// Device-measured kernel time in seconds
    pub time_event_s: f64,
    /// Launch-to-join wall time in seconds
    pub time_wall_s: f64,
    pub host_threads: usize,
    pub cpu_share: f64,
    pub mode: &'static str,
}

impl ResultRecord {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            benchmark: BENCHMARK_NAME,
            datasize: report.partition.elements(),
            device: report.device.clone(),
            time_event_s: report.result.device_secs(),
            time_wall_s: report.result.wall_secs(),
            host_threads: report.config.threads,
            cpu_share: report.config.cpu_share,
            mode: report.mode().label(),
        }
    }

    /// Format as one CSV line (without the trailing newline).
    pub fn to_csv_line(&self) -> String {
        format!(
            "{};{};{};{:.9};{:.9};{};{};{}",
            self.benchmark,
            self.datasize,
            self.device,
            self.time_event_s,
            self.time_wall_s,
            self.host_threads,
            self.cpu_share,
            self.mode
        )
    }
}

/// Append `record` to the CSV file at `path`, writing the header first if
/// the file does not exist yet or is empty.
pub fn append_csv(path: &Path, record: &ResultRecord) -> Result<()> {
    let needs_header = match fs::metadata(path) {
        Ok(meta) => meta.len() == 0,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => return Err(e.into()),
    };

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_header {
        writeln!(file, "{}", CSV_HEADER)?;
    }
    writeln!(file, "{}", record.to_csv_line())?;

    tracing::debug!("Appended result row to {}", path.display());
    Ok(())
}

/// Write the full run report as pretty JSON to `path`.
pub fn write_summary(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)?;
    tracing::debug!("Wrote run summary to {}", path.display());
    Ok(())
}

/// Persist every artifact of a successful run.
///
/// The summary is written before the CSV row, so a failing summary sink
/// leaves the row out and the CSV only ever holds completed runs.
pub fn write_outputs(report: &RunReport) -> Result<()> {
    if let Some(path) = &report.config.summary {
        write_summary(path, report)?;
    }
    append_csv(&report.config.output, &ResultRecord::from_report(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchmarkConfig;
    use crate::coordinator::ExecutionResult;
    use crate::partition::{ExecutionMode, Partition};

    fn sample_report(share: f64) -> RunReport {
        let config = BenchmarkConfig::new(1000).with_cpu_share(share).with_threads(4);
        let partition = Partition::compute(1000, share);
        RunReport {
            config,
            device: "cpu".to_string(),
            partition,
            result: ExecutionResult {
                device_ns: 1_500_000,
                wall_ns: 2_000_000,
                mode: ExecutionMode::select(&partition),
            },
            validated: true,
        }
    }

    #[test]
    fn test_record_from_report() {
        let record = ResultRecord::from_report(&sample_report(0.5));
        assert_eq!(record.benchmark, "usm_add");
        assert_eq!(record.datasize, 1000);
        assert_eq!(record.host_threads, 4);
        assert_eq!(record.mode, "co-processing");
        assert!((record.time_event_s - 0.0015).abs() < 1e-12);
        assert!((record.time_wall_s - 0.002).abs() < 1e-12);
        assert_eq!(
            record.to_csv_line(),
            "usm_add;1000;cpu;0.001500000;0.002000000;4;0.5;co-processing"
        );
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("add_gpu.csv");

        append_csv(&path, &ResultRecord::from_report(&sample_report(0.0))).unwrap();
        append_csv(&path, &ResultRecord::from_report(&sample_report(1.0))).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].ends_with(";accelerator-only"));
        assert!(lines[2].ends_with(";host-only"));
    }

    #[test]
    fn test_empty_file_gets_header() {
        let file = tempfile::NamedTempFile::new().unwrap();
        append_csv(file.path(), &ResultRecord::from_report(&sample_report(0.5))).unwrap();

        let contents = fs::read_to_string(file.path()).unwrap();
        assert!(contents.starts_with(CSV_HEADER));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_failed_summary_leaves_csv_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("add_gpu.csv");
        let mut report = sample_report(0.5);
        report.config = report
            .config
            .with_output(&csv)
            .with_summary(Some(dir.path().join("missing").join("summary.json")));

        assert!(write_outputs(&report).is_err());
        assert!(!csv.exists());
    }

    #[test]
    fn test_outputs_written_together() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("add_gpu.csv");
        let summary = dir.path().join("summary.json");
        let mut report = sample_report(0.0);
        report.config = report
            .config
            .with_output(&csv)
            .with_summary(Some(summary.clone()));

        write_outputs(&report).unwrap();
        assert_eq!(fs::read_to_string(&csv).unwrap().lines().count(), 2);
        assert!(summary.exists());
    }

    #[test]
    fn test_summary_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_summary(&path, &sample_report(0.5)).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["partition"]["boundary"], 499);
        assert_eq!(value["result"]["mode"]["mode"], "co-processing");
        assert_eq!(value["config"]["threads"], 4);
    }
}
