//! # downsync-tunnel
//!
//! RPC over a pair of pipes.
//!
//! A [`TunnelConnection`] turns a subprocess's stdout/stdin into one
//! bidirectional stream; [`RpcClient`] and [`serve_connection`] speak the
//! newline-delimited JSON protocol in [`protocol`] over it. [`relay`] is the
//! byte pump run by the tunnel peer inside the container.

mod client;
mod conn;
mod error;
pub mod protocol;
mod relay;
mod server;

pub use client::{DownloadStream, RpcClient, WatchStream};
pub use conn::{BoxedTunnel, TunnelAddr, TunnelConnection};
pub use error::RpcError;
pub use protocol::{DownloadRequest, WatchRequest, CHUNK_SIZE};
pub use relay::relay;
pub use server::{serve_connection, FileService, FrameSink};
