//! uperf: distributed read/write load generator
//!
//! Every member of a cluster runs the same engine. Any member can start a
//! benchmark: the START_RUN command is sent to all members, each of which
//! spins up its invoker threads, issues READs and WRITEs against the other
//! members for a fixed time and returns its [`uperf_common::Results`]. The
//! initiating member merges them into a [`ClusterReport`].
//!
//! ## Layout
//!
//! - [`settings`]: typed tunables and their mapping onto the config bag
//! - [`command`] / [`dispatcher`]: the control protocol on the serving side
//! - [`invoker`] / [`coordinator`]: load generation for one timed run
//! - [`controller`] / [`console`]: operator-facing control loop
//! - [`rpc`] / [`transport`]: the dispatch seam and its UDP and in-process
//!   implementations

pub mod cluster;
pub mod command;
pub mod console;
pub mod controller;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod invoker;
pub mod membership;
pub mod node;
pub mod report;
pub mod rpc;
pub mod settings;
pub mod shutdown;
pub mod store;
pub mod transport;

pub use cluster::{ClusterConfig, NodeConfig};
pub use command::Command;
pub use console::ConsoleSource;
pub use controller::{
    ClusterController, CommandSource, ControlEvent, ControllerOptions, ControllerState,
};
pub use coordinator::RunCoordinator;
pub use dispatcher::CommandDispatcher;
pub use error::{Result, UperfError};
pub use membership::{Member, View, ViewHandle};
pub use node::UperfNode;
pub use report::{ClusterReport, MemberOutcome};
pub use rpc::{CallOptions, RequestHandler, ResponseMode, RpcDispatcher};
pub use settings::{BenchSettings, Parameter, Setting};
pub use shutdown::Shutdown;
pub use transport::{LocalNetwork, UdpRpc};
