//! Line-based JSON bridge to the consuming application.

pub mod handler;
pub mod protocol;
pub mod server;
