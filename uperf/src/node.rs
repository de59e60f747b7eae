//! State of one cluster member.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use log::info;
use uperf_common::{constants::OPERATION_TIMEOUT, Config, Results};

use crate::{
    coordinator::RunCoordinator,
    error::Result,
    membership::{Member, ViewHandle},
    rpc::RpcDispatcher,
    settings::{BenchSettings, Setting},
    shutdown::Shutdown,
    store::PayloadStore,
};

/// Settings, payload and run coordinator of the local member, plus the
/// handles it shares with the rest of the process.
pub struct UperfNode {
    settings: RwLock<BenchSettings>,
    view: ViewHandle,
    shutdown: Shutdown,
    rpc: Arc<dyn RpcDispatcher>,
    store: Arc<PayloadStore>,
    coordinator: RunCoordinator,
}

impl UperfNode {
    /// Assembles a member. Terminating `shutdown` closes `rpc`.
    pub fn new(
        rpc: Arc<dyn RpcDispatcher>,
        view: ViewHandle,
        shutdown: Shutdown,
        settings: BenchSettings,
    ) -> Arc<Self> {
        Self::with_operation_timeout(rpc, view, shutdown, settings, OPERATION_TIMEOUT)
    }

    /// Like [`UperfNode::new`], with invokers giving up on a READ or WRITE
    /// after `operation_timeout`.
    pub fn with_operation_timeout(
        rpc: Arc<dyn RpcDispatcher>,
        view: ViewHandle,
        shutdown: Shutdown,
        settings: BenchSettings,
        operation_timeout: Duration,
    ) -> Arc<Self> {
        let store = Arc::new(PayloadStore::new(settings.msg_size as usize));
        let coordinator = RunCoordinator::new(
            rpc.clone(),
            store.clone(),
            shutdown.clone(),
            operation_timeout,
        );

        {
            let rpc = rpc.clone();
            shutdown.on_terminate(move || rpc.close());
        }

        Arc::new(Self {
            settings: RwLock::new(settings),
            view,
            shutdown,
            rpc,
            store,
            coordinator,
        })
    }

    #[must_use]
    pub fn local_member(&self) -> &Member {
        self.rpc.local_member()
    }

    #[must_use]
    pub fn rpc(&self) -> &Arc<dyn RpcDispatcher> {
        &self.rpc
    }

    #[must_use]
    pub const fn view(&self) -> &ViewHandle {
        &self.view
    }

    #[must_use]
    pub const fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    #[must_use]
    pub const fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    /// Snapshot of the current settings.
    #[must_use]
    pub fn settings(&self) -> BenchSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, setting: Setting) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(setting);
        info!("{setting}");
    }

    /// Applies a fetched config entry by entry; see
    /// [`BenchSettings::apply_config`].
    pub fn apply_config(&self, config: &Config) -> Result<()> {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.apply_config(config)
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.settings().to_config()
    }

    /// Runs the benchmark against the current view with the current
    /// settings.
    pub fn start_run(&self) -> Result<Results> {
        let settings = self.settings();
        let view = self.view.current();
        self.coordinator.run_once(&settings, view.members())
    }

    #[must_use]
    pub fn read(&self, key: i64) -> Arc<[u8]> {
        self.store.get(key)
    }

    pub fn write(&self, key: i64, payload: &[u8]) {
        self.store.put(key, payload);
    }

    pub fn quit(&self) {
        info!("-- received quit_all(): shutting down");
        self.shutdown.request();
    }
}
