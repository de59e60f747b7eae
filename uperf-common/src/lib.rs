//! Common types and constants for the uperf cluster benchmark.
//!
//! This crate provides the definitions every member must agree on: the
//! operation-code table, the config bag used to synchronize settings, the
//! latency accumulators and per-run results, and the datagram format.

pub mod config;
pub mod constants;
pub mod message;
pub mod op;
pub mod stats;

pub use config::{Config, ConfigEntry, ConfigValue};
pub use message::{Arg, Invocation, Reply, UperfMessage};
pub use op::OperationCode;
pub use stats::{Results, StatAccumulator};
