mod ingester;
mod monitor;

pub use ingester::Ingester;
pub use monitor::Monitor;
