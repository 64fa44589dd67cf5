//! udpft: reliable file transfer over UDP.
//!
//! Fetch, upload, delete, list and shutdown run as Init -> (Data) -> Done
//! handshakes of fixed-size frames, with receiver-driven selective repeat
//! for bulk data. See [`transfer`] for the engine and [`ops`] for the
//! per-operation state machines.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod ops;
pub mod server;
pub mod store;
pub mod transfer;
pub mod transport;

pub use client::{Client, Command};
pub use config::Config;
pub use error::{Result, TransferError};
pub use ops::Outcome;
pub use server::Server;
pub use store::Store;
