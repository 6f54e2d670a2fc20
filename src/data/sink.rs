//! Chunk sinks.
//!
//! A sink receives every full chunk exactly once, in drain order. The persisted format of
//! [`FileSink`] is a flat sequence of little-endian `u32` values with no header or framing,
//! so a file holding `N` chunks is exactly `N * chunk_capacity * 4` bytes long.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{AppResult, IngestError};

/// Destination for flushed chunks.
pub trait Sink {
    /// Persist one chunk. Called with a full chunk except for the optional partial flush
    /// at the end of a completed run.
    fn append(&mut self, chunk: &[u32]) -> AppResult<()>;

    /// Flush anything buffered. Called once when the run ends, on every exit path.
    fn finish(&mut self) -> AppResult<()> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn append(&mut self, chunk: &[u32]) -> AppResult<()> {
        (**self).append(chunk)
    }

    fn finish(&mut self) -> AppResult<()> {
        (**self).finish()
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn append(&mut self, chunk: &[u32]) -> AppResult<()> {
        (**self).append(chunk)
    }

    fn finish(&mut self) -> AppResult<()> {
        (**self).finish()
    }
}

/// Writes samples to a binary file as raw little-endian words.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    samples_written: u64,
}

impl FileSink {
    /// Create (or truncate) the file at `path`, creating parent directories as needed.
    pub fn create(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(IngestError::SinkWrite)?;
        }
        let file = File::create(&path).map_err(IngestError::SinkWrite)?;
        info!(path = %path.display(), "raw sample file opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            samples_written: 0,
        })
    }

    /// Output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples appended so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl Sink for FileSink {
    fn append(&mut self, chunk: &[u32]) -> AppResult<()> {
        for sample in chunk {
            self.writer
                .write_all(&sample.to_le_bytes())
                .map_err(IngestError::SinkWrite)?;
        }
        self.samples_written += chunk.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        self.writer.flush().map_err(IngestError::SinkWrite)?;
        debug!(
            path = %self.path.display(),
            samples = self.samples_written,
            "raw sample file flushed"
        );
        Ok(())
    }
}

/// Discards everything. Used when writing to a file is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl Sink for NullSink {
    fn append(&mut self, _chunk: &[u32]) -> AppResult<()> {
        Ok(())
    }
}

/// Keeps every appended chunk in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    chunks: Vec<Vec<u32>>,
    finished: bool,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks in the order they were appended.
    pub fn chunks(&self) -> &[Vec<u32>] {
        &self.chunks
    }

    /// All appended samples, concatenated.
    pub fn samples(&self) -> Vec<u32> {
        self.chunks.concat()
    }

    /// Whether `finish` has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Sink for MemorySink {
    fn append(&mut self, chunk: &[u32]) -> AppResult<()> {
        self.chunks.push(chunk.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> AppResult<()> {
        self.finished = true;
        Ok(())
    }
}

/// Decode a raw sample file written by [`FileSink`].
pub fn read_raw_samples(path: impl AsRef<Path>) -> AppResult<Vec<u32>> {
    let bytes = fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(IngestError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("raw sample file length {} is not a multiple of 4", bytes.len()),
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_sink_writes_little_endian_words() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("samples.bin");
        let mut sink = FileSink::create(&path).unwrap();
        sink.append(&[1, 2, 3, 4]).unwrap();
        sink.append(&[0xDEAD_BEEF, 6, 7, 8]).unwrap();
        sink.finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[16..20], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(sink.samples_written(), 8);
        assert_eq!(
            read_raw_samples(&path).unwrap(),
            vec![1, 2, 3, 4, 0xDEAD_BEEF, 6, 7, 8]
        );
    }

    #[test]
    fn create_in_missing_root_is_a_sink_error() {
        let err = FileSink::create("/proc/definitely/not/writable/samples.bin").unwrap_err();
        assert_eq!(err.kind(), "SinkWriteError");
    }

    #[test]
    fn memory_sink_through_trait_object() {
        let mut memory = MemorySink::new();
        {
            let mut sink: Box<dyn Sink + '_> = Box::new(&mut memory);
            sink.append(&[9, 10]).unwrap();
            sink.finish().unwrap();
        }
        assert_eq!(memory.chunks(), &[vec![9, 10]]);
        assert!(memory.is_finished());
    }

    #[test]
    fn truncated_raw_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(read_raw_samples(&path).is_err());
    }
}
