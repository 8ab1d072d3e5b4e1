mod config;

pub use config::{
    AlertSettings, IndexerSettings, PostgresSettings, RedpandaSettings, Settings,
};
