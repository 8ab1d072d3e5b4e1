mod redpanda;

pub use redpanda::{AlertPublisher, EventSubscriber};
