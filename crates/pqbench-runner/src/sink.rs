use crate::sweep::Category;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const RECORD_SEPARATOR: &[u8] = b"\n";

/// Appends raw run output to `<run_dir>/<category>.jsonl`.
#[derive(Debug, Clone)]
pub struct ResultSink {
    run_dir: PathBuf,
}

impl ResultSink {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn path_for(&self, category: Category) -> PathBuf {
        self.run_dir.join(category.file_name())
    }

    /// Output is written as-is, followed by a single separator, so an empty
    /// capture still leaves a (blank) record behind.
    pub fn append(&self, category: Category, raw_output: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(category);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening result file {}", path.display()))?;
        file.write_all(raw_output)
            .and_then(|_| file.write_all(RECORD_SEPARATOR))
            .and_then(|_| file.sync_data())
            .with_context(|| format!("appending to result file {}", path.display()))?;
        Ok(path)
    }
}
