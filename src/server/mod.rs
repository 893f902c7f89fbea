mod config;
mod daemon;

pub use config::{
  BackendType, LoggingSection, PostgresSection, ServerConfig, ServerSection, SqliteSection,
};
pub use daemon::Daemon;
