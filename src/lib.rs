pub mod cache;
pub mod db;

// Admin API and daemon (only compiled with server feature)
#[cfg(feature = "server")]
pub mod admin;
#[cfg(feature = "server")]
pub mod server;
