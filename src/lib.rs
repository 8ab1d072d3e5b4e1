pub mod alerts;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod pubsub;
pub mod worker;
pub mod writer;

pub use alerts::{Alert, AlertManager, LogChannel, Severity};
pub use checkpoint::CheckpointManager;
pub use config::Settings;
pub use db::PostgresClient;
pub use error::{ErrorKind, IndexerError};
pub use pubsub::{AlertPublisher, EventSubscriber};
pub use worker::{Ingester, Monitor};
pub use writer::{BatchWriter, BatchWriterConfig, WriterSignal};
