//! TCP connection plumbing: the per-connection byte queue and its codec
//! driver. The accept loop and the dispatch pipeline live in
//! [`crate::service`]; this module only owns the socket-to-packet hop.

pub use connection::Connection;

mod connection;
