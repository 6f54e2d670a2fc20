//! Chunk persistence.
pub mod csv_sink;
pub mod sink;

pub use csv_sink::CsvSink;
pub use sink::{read_raw_samples, FileSink, MemorySink, NullSink, Sink};
