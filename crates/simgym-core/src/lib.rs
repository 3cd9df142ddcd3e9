//! # simgym-core
//!
//! Core types for the simgym environment bridge.
//!
//! This crate provides the pieces both sides of the channel agree on:
//! - Space descriptors (scalar, array, tuple, mapping)
//! - Data containers and their wire codec
//! - State records
//! - Wire messages
//! - Error taxonomy

pub mod container;
pub mod error;
pub mod space;
pub mod state;
pub mod wire;

pub use container::{ArrayData, DataContainer};
pub use error::{ErrorClass, GymError, Result};
pub use space::{DtypePolicy, ElementKind, SpaceDescriptor};
pub use state::{ExtraInfo, REASON_GAME_OVER, REASON_SIMULATION_END, StateRecord};
pub use wire::{DataRecord, GymMessage, SpaceRecord, deserialize, serialize};
