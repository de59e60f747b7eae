//! Serves the command protocol on one member.

use std::sync::Arc;

use log::debug;
use uperf_common::{Arg, Invocation, Reply};

use crate::{
    command::Command,
    error::Result,
    membership::Member,
    node::UperfNode,
    rpc::RequestHandler,
};

/// Maps operation codes onto the local member's actions.
pub struct CommandDispatcher {
    node: Arc<UperfNode>,
}

impl CommandDispatcher {
    #[must_use]
    pub const fn new(node: Arc<UperfNode>) -> Self {
        Self { node }
    }

    /// Decodes and executes one invocation.
    pub fn invoke(&self, code: u16, args: Vec<Arg>) -> Result<Reply> {
        let command = Command::decode(Invocation { code, args })?;
        self.execute(command)
    }

    pub fn execute(&self, command: Command) -> Result<Reply> {
        match command {
            Command::StartRun => self.node.start_run().map(Reply::Results),
            Command::Read { key } => Ok(Reply::Payload(self.node.read(key).to_vec())),
            Command::Write { key, payload } => {
                self.node.write(key, &payload);
                Ok(Reply::Empty)
            }
            Command::GetConfig => Ok(Reply::Config(self.node.config())),
            Command::Set(setting) => {
                self.node.apply(setting);
                Ok(Reply::Empty)
            }
            Command::QuitAll => {
                self.node.quit();
                Ok(Reply::Empty)
            }
        }
    }
}

impl RequestHandler for CommandDispatcher {
    fn handle(&self, from: &Member, invocation: Invocation) -> Result<Reply> {
        debug!("{from} invoked code {}", invocation.code);
        self.invoke(invocation.code, invocation.args)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use uperf_common::{ConfigValue, OperationCode};

    use super::*;
    use crate::{
        error::UperfError,
        membership::View,
        settings::{BenchSettings, Setting},
        shutdown::Shutdown,
        transport::LocalNetwork,
    };

    fn dispatcher() -> (CommandDispatcher, Arc<UperfNode>) {
        let network = LocalNetwork::new();
        let me = Member::new("a", SocketAddr::from(([127, 0, 0, 1], 7800)));
        let rpc = network.join(me.clone());
        let node = UperfNode::new(
            rpc,
            crate::membership::ViewHandle::new(View::new(1, vec![me])),
            Shutdown::new(),
            BenchSettings::default(),
        );
        (CommandDispatcher::new(node.clone()), node)
    }

    #[test]
    fn test_set_and_get_config() {
        let (dispatcher, node) = dispatcher();
        let reply = dispatcher
            .invoke(OperationCode::SetNumThreads.into(), vec![Arg::Int(8)])
            .unwrap();
        assert_eq!(reply, Reply::Empty);
        assert_eq!(node.settings().num_threads, 8);

        let Reply::Config(config) = dispatcher.invoke(OperationCode::GetConfig.into(), vec![]).unwrap()
        else {
            panic!("expected a config reply");
        };
        assert_eq!(config.get("num_threads"), Some(ConfigValue::Int(8)));
    }

    #[test]
    fn test_read_returns_payload() {
        let (dispatcher, node) = dispatcher();
        let size = node.settings().msg_size as usize;
        let reply = dispatcher
            .execute(Command::Read { key: 0 })
            .unwrap();
        assert_eq!(reply, Reply::Payload(vec![0; size]));

        let reply = dispatcher
            .execute(Command::Write {
                key: 0,
                payload: vec![1, 2, 3],
            })
            .unwrap();
        assert_eq!(reply, Reply::Empty);
    }

    #[test]
    fn test_unknown_code_names_the_code() {
        let (dispatcher, _) = dispatcher();
        let err = dispatcher.invoke(42, vec![]).unwrap_err();
        assert!(matches!(err, UperfError::Protocol { code: Some(42), .. }));
    }

    #[test]
    fn test_bad_set_value_leaves_settings() {
        let (dispatcher, node) = dispatcher();
        let err = dispatcher
            .invoke(OperationCode::SetReadPercentage.into(), vec![Arg::Float(1.5)])
            .unwrap_err();
        assert!(matches!(err, UperfError::ConfigMismatch { .. }));
        assert_eq!(node.settings(), BenchSettings::default());

        dispatcher.execute(Command::Set(Setting::Sync(false))).unwrap();
        assert!(!node.settings().sync);
    }

    #[test]
    fn test_quit_all_requests_shutdown() {
        let (dispatcher, node) = dispatcher();
        dispatcher.invoke(OperationCode::QuitAll.into(), vec![]).unwrap();
        assert!(node.shutdown().is_requested());
        assert!(!node.shutdown().is_terminated());
    }
}
