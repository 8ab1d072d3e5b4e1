mod manager;

pub use manager::{Alert, AlertChannel, AlertManager, LogChannel, Severity};
