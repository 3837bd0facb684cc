//! Simple NDEF Exchange Protocol.
//!
//! Request/response exchange of NDEF messages between two NFC peers over
//! an LLCP data link connection: the wire codec, the fragmentation
//! engine shared by both roles, the GET/PUT client, and a server
//! accepting any number of concurrent connections with a pluggable
//! handler surface.

pub mod callback;
pub mod client;
pub mod error;
pub mod fragment;
pub mod server;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

/// Service name a default SNEP server binds and a client connects to.
pub const SERVICE_NAME: &str = "urn:nfc:sn:snep";

pub use crate::callback::{DefaultHandler, SnepHandler};
pub use crate::client::SnepClient;
pub use crate::error::SnepError;
pub use crate::server::{ServerConfig, SnepServer};
