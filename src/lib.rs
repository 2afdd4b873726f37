//! fex - minimal text-command file exchange over TCP
//!
//! A line-oriented protocol: clients register a handle, then store and
//! fetch files over the same stream the commands travel on, with transfer
//! frames delimited by a sentinel line.

pub mod cli;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod translog;
