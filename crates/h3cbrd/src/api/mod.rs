//! Plugin protocol over HTTP.

pub mod error;
pub mod server;
