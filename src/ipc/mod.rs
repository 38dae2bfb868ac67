//! TCP+msgpack IPC transport layer.
//!
//! Length-prefixed msgpack framing. Requests name a service and method
//! (`tools.Invoke`, `groups.Reset`, ...); the router forwards them to the hub.

pub mod codec;
pub mod handlers;
pub mod router;
pub mod server;

pub use server::IpcServer;
