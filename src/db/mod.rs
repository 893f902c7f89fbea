pub mod backend;
mod postgres;
pub mod sanitize;
mod sqlite;

pub use backend::{DatabaseBackend, SqlDialect, StoredEntry, TableStats};
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
