//! Periodic chunked push of an archive from a server to one of its
//! registered, long-lived client connections.

pub mod cli;
pub mod client;
pub mod error;
pub mod server;
pub mod streaming;

pub use error::{PushError, Result};
