//! CSV sample sink.
#[cfg(feature = "storage_csv")]
use std::{fs::File, path::PathBuf};

use std::path::Path;

use super::sink::Sink;
use crate::error::{AppResult, IngestError};

/// Writes `index,value` rows, one per sample.
///
/// `index` is the sample's position in the run starting at 0, which makes gaps visible
/// when the file is inspected by hand.
#[cfg(feature = "storage_csv")]
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    next_index: u64,
}

#[cfg(feature = "storage_csv")]
impl CsvSink {
    /// Create `path` and write the header row.
    pub fn create(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(IngestError::SinkWrite)?;
        }
        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        writer.write_record(["index", "value"]).map_err(csv_error)?;
        tracing::info!(path = %path.display(), "CSV sample file opened");
        Ok(Self {
            path,
            writer,
            next_index: 0,
        })
    }

    /// Output file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(feature = "storage_csv")]
impl Sink for CsvSink {
    fn append(&mut self, chunk: &[u32]) -> AppResult<()> {
        for sample in chunk {
            self.writer
                .write_record(&[self.next_index.to_string(), sample.to_string()])
                .map_err(csv_error)?;
            self.next_index += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        self.writer.flush().map_err(IngestError::SinkWrite)?;
        tracing::debug!(path = %self.path.display(), rows = self.next_index, "CSV sink flushed");
        Ok(())
    }
}

#[cfg(feature = "storage_csv")]
fn csv_error(err: csv::Error) -> IngestError {
    IngestError::SinkWrite(std::io::Error::other(err))
}

/// Placeholder when CSV storage is compiled out.
#[cfg(not(feature = "storage_csv"))]
pub struct CsvSink;

#[cfg(not(feature = "storage_csv"))]
impl CsvSink {
    /// Always fails with `FeatureNotEnabled`.
    pub fn create(_path: impl AsRef<Path>) -> AppResult<Self> {
        Err(IngestError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Always empty.
    pub fn path(&self) -> &Path {
        Path::new("")
    }
}

#[cfg(not(feature = "storage_csv"))]
impl Sink for CsvSink {
    fn append(&mut self, _chunk: &[u32]) -> AppResult<()> {
        Err(IngestError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_header_and_indexed_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut sink = CsvSink::create(&path).unwrap();
        sink.append(&[10, 11]).unwrap();
        sink.append(&[12, 13]).unwrap();
        sink.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["index,value", "0,10", "1,11", "2,12", "3,13"]);
    }
}
