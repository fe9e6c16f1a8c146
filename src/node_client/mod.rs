//! JSON-RPC client for the full node the host is attached to.

pub mod client;
pub mod error;
pub mod types;

pub use client::Client;
pub use error::Error;
