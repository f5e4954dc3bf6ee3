//! The remote protocol: a TCP server that exposes a local database, and a
//! client backend that presents the ordinary cursor contract over the
//! connection.

pub mod client;
pub(crate) mod message;
pub mod server;
