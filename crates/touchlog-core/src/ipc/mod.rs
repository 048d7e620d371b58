//! Daemon IPC: a JSON request/response protocol over a Unix domain socket.
//!
//! ```text
//! ┌──────────┐        Unix socket         ┌──────────────┐
//! │   CLI    │───────────────────────────▶│  IPC Server  │
//! │          │  one JSON value per msg    │              │
//! └──────────┘                            └──────┬───────┘
//!                                                │
//!                         ┌──────────────────────┼───────────────┐
//!                         ▼                      ▼               ▼
//!                   ┌───────────┐        ┌──────────────┐  ┌───────────┐
//!                   │  search   │        │ incremental  │◀─│  watcher  │
//!                   │  (query)  │        │   indexer    │  │           │
//!                   └───────────┘        └──────────────┘  └───────────┘
//! ```
//!
//! Each connection carries any number of requests; every request gets
//! exactly one response, in order.

pub mod client;
pub mod codec;
pub mod server;
pub mod types;

pub use client::{IpcClient, IpcClientError, IpcConnection};
pub use codec::{CodecError, JsonStream, MAX_FRAME_BYTES};
pub use server::{Server, ServerError};
pub use types::*;
