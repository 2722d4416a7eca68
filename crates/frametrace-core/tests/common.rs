use frametrace_core::{Bucket, Config, PatternRule, Pipeline, ReportWriter, RunSummary};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One parsed report row: the offset and the five bucket columns.
pub type Row = (u64, Vec<String>);

/// Builds the text of a test log file.
///
/// Lines are written as `<ts> <bucket> <payload>` so that [bucket_rule]
/// picks them up.
#[derive(Debug, Default)]
pub struct LogBuilder {
    text: String,
}

impl LogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, timestamp: u64, bucket: Bucket, payload: &str) -> Self {
        self.text.push_str(&format!("{timestamp} {bucket} {payload}\n"));
        self
    }

    #[allow(dead_code)]
    pub fn events(mut self, bucket: Bucket, timestamps: impl IntoIterator<Item = u64>) -> Self {
        for ts in timestamps {
            self = self.event(ts, bucket, &format!("{bucket}-{ts}"));
        }
        self
    }

    /// A line no rule matches.
    #[allow(dead_code)]
    pub fn noise(mut self, line: &str) -> Self {
        self.text.push_str(line);
        self.text.push('\n');
        self
    }

    pub fn write(self, dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, self.text).unwrap();
        path
    }
}

/// A rule that accepts `<ts> <bucket> <payload>` lines for one bucket.
pub fn bucket_rule(bucket: Bucket) -> PatternRule {
    let pattern = format!(r"^([0-9]+) {} (.*)$", regex::escape(bucket.name()));
    PatternRule::new(bucket.name(), &pattern, bucket)
        .unwrap()
        .with_payload(|caps| caps[2].to_string())
}

#[allow(dead_code)]
pub fn config_with_window(window_ms: u64, max_batch_size: usize) -> Config {
    Config::new(window_ms, max_batch_size)
}

/// Run a pipeline over `sources` and return the summary together with
/// the report text.
pub async fn run_pipeline(
    dir: &TempDir,
    config: Config,
    sources: Vec<(PathBuf, Vec<PatternRule>)>,
) -> (eyre::Result<RunSummary>, String) {
    let report = dir.path().join("frame-trace.log");
    let writer = ReportWriter::create(&report).await.unwrap();
    let mut pipeline = Pipeline::new(config, writer).unwrap();
    for (path, rules) in sources {
        pipeline.add_source(path, rules);
    }

    let result = pipeline.run().await;
    (result, read_report(&report))
}

pub fn read_report(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

/// Split a report into windows of rows.
#[allow(dead_code)]
pub fn parse_report(text: &str) -> Vec<(u64, Vec<Row>)> {
    let mut windows: Vec<(u64, Vec<Row>)> = vec![];
    for line in text.lines() {
        if let Some(start) = line.strip_suffix(':') {
            windows.push((start.parse().unwrap(), vec![]));
            continue;
        }

        let mut fields = line.split('\t');
        let offset = fields
            .next()
            .and_then(|offset| offset.strip_prefix('+'))
            .unwrap()
            .parse()
            .unwrap();
        let columns: Vec<String> = fields.map(str::to_string).collect();
        assert_eq!(columns.len(), Bucket::COUNT, "bad row: {line:?}");
        windows
            .last_mut()
            .expect("row before any window header")
            .1
            .push((offset, columns));
    }
    windows
}

/// Assert that window starts strictly increase, so no window was
/// written twice, and that every row lies inside its window.
#[allow(dead_code)]
pub fn assert_report_ordered(windows: &[(u64, Vec<Row>)], window_ms: u64) {
    for pair in windows.windows(2) {
        assert!(
            pair[0].0 < pair[1].0,
            "windows out of order or repeated: {} then {}",
            pair[0].0,
            pair[1].0
        );
    }
    for (start, rows) in windows {
        assert_eq!(start % window_ms, 0, "unaligned window start {start}");
        for pair in rows.windows(2) {
            assert!(pair[0].0 < pair[1].0, "rows out of order in window {start}");
        }
        for (offset, _) in rows {
            assert!(*offset < window_ms, "offset {offset} outside window {start}");
        }
    }
}

/// The number of non-empty cells in a report.
#[allow(dead_code)]
pub fn count_cells(windows: &[(u64, Vec<Row>)]) -> usize {
    windows
        .iter()
        .flat_map(|(_, rows)| rows)
        .map(|(_, columns)| columns.iter().filter(|c| !c.is_empty()).count())
        .sum()
}
