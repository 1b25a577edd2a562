pub mod auth;
pub mod dashboard;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod profile;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::{AppState, AppStateInner};
