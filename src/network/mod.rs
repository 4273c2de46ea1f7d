//! Message passing between nodes and the node event loop.
//!
//! - [`transport`]: Transport trait and error types
//! - [`local_transport`]: In-memory transport
//! - [`rpc`]: Wire envelope, decoding and processor hook
//! - [`txpool`]: Pending transactions
//! - [`server`]: The event loop tying transports, pool and ledger together

pub mod local_transport;
pub mod rpc;
pub mod server;
pub mod transport;
pub mod txpool;
