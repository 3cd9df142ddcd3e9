//! Shared channels between the bridge and a simulation
//!
//! This crate provides:
//! - The `SharedChannel` handshake abstraction and message helpers
//! - An in-process channel for simulations running as a task
//! - A POSIX shared-memory channel for simulations running as a process (Unix)

pub mod channel;
pub mod local;
#[cfg(unix)]
pub mod shm;

pub use channel::{
    ActivityCounter, DEFAULT_CAPACITY, SharedChannel, encode_message, ensure_fits, recv_message,
    send_message, send_payload,
};
pub use local::{LocalChannel, LocalEndpoint};
#[cfg(unix)]
pub use shm::{ShmChannel, Side};
