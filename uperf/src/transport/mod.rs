//! Transports implementing [`crate::rpc::RpcDispatcher`].
//!
//! [`udp::UdpRpc`] carries the command protocol over UDP between processes.
//! [`local::LocalNetwork`] connects members living in one process.

pub mod local;
pub mod udp;

pub use local::{LocalNetwork, LocalRpc};
pub use udp::UdpRpc;
