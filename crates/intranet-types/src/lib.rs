//! Wire types shared by the intranet API and server.

pub mod api;
pub mod models;
