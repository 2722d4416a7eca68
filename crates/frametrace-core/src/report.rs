use crate::types::Batch;
use eyre::{Result, WrapErr};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::debug;

/// Appends flushed windows to the merged report.
///
/// Each window is written as a `<start>:` header followed by one line
/// per record:
///
/// ```text
/// 100:
/// +0	I->X
/// +4		pop Y
/// ```
///
/// The columns are consumer, buffer, consumer daemon, producer daemon
/// and producer. The file is opened and closed again for every batch so
/// the report grows visibly during a run.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    /// Create or truncate the report file.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        File::create(&path)
            .await
            .wrap_err_with(|| format!("Failed to create report file: {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render a batch in report layout. Record notes are not part of
    /// the report.
    pub fn render(batch: &Batch) -> String {
        let mut text = String::new();
        for (start, records) in batch {
            text.push_str(&format!("{start}:\n"));
            for (offset, record) in records {
                text.push_str(&format!("+{offset}\t{}\n", record.columns().join("\t")));
            }
        }
        text
    }

    /// Append a batch to the report.
    pub async fn write(&self, batch: &Batch) -> Result<()> {
        let text = Self::render(batch);
        for (start, records) in batch {
            for (offset, record) in records.iter().filter(|(_, r)| !r.note().is_empty()) {
                debug!(window = start, offset, note = record.note(), "Record lost payloads");
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .wrap_err_with(|| format!("Failed to open report file: {}", self.path.display()))?;
        file.write_all(text.as_bytes())
            .await
            .wrap_err_with(|| format!("Failed to write report file: {}", self.path.display()))?;
        file.flush().await?;

        debug!(windows = batch.len(), bytes = text.len(), "Wrote batch");
        Ok(())
    }
}
