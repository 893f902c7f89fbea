mod api;

pub use api::{router, AdminServer, AppState};
