mod batch;

pub use batch::{BatchWriter, BatchWriterConfig, CommittedEvent, WriterSignal};
