//! In-process transport.
//!
//! Requests are handed directly to the target's handler on the calling
//! thread; fire-and-forget requests get a thread of their own. A silenced
//! member drops every request it receives, so synchronous callers wait for
//! their full timeout.

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{Arc, Condvar, Mutex, PoisonError, RwLock},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};
use uperf_common::{Invocation, Reply};

use crate::{
    error::{Result, UperfError},
    membership::Member,
    rpc::{timeout_error, CallOptions, MemberResponse, RequestHandler, RpcDispatcher, RspList},
};

#[derive(Default)]
struct NetworkInner {
    handlers: RwLock<HashMap<SocketAddr, Arc<dyn RequestHandler>>>,
    silenced: RwLock<HashSet<SocketAddr>>,
}

/// Registry of the members of one in-process cluster.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

impl LocalNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the dispatcher of `member`. Requests to it fail until
    /// [`LocalRpc::start`] installs a handler.
    #[must_use]
    pub fn join(&self, member: Member) -> Arc<LocalRpc> {
        Arc::new(LocalRpc {
            local: member,
            network: self.clone(),
            closed: Mutex::new(false),
            closed_cond: Condvar::new(),
        })
    }

    /// Makes `member` drop every request from now on.
    pub fn silence(&self, member: &Member) {
        self.inner
            .silenced
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member.addr());
    }

    /// Removes `member`'s handler; requests to it fail at once.
    pub fn leave(&self, member: &Member) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&member.addr());
    }

    fn is_silenced(&self, member: &Member) -> bool {
        self.inner
            .silenced
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&member.addr())
    }

    fn register(&self, member: &Member, handler: Arc<dyn RequestHandler>) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member.addr(), handler);
    }

    fn handler(&self, member: &Member) -> Option<Arc<dyn RequestHandler>> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&member.addr())
            .cloned()
    }
}

/// Dispatcher of one member of a [`LocalNetwork`].
pub struct LocalRpc {
    local: Member,
    network: LocalNetwork,
    closed: Mutex<bool>,
    closed_cond: Condvar,
}

impl LocalRpc {
    pub fn start(&self, handler: Arc<dyn RequestHandler>) {
        self.network.register(&self.local, handler);
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `timeout` elapses or the dispatcher is closed.
    fn wait_for_close(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        while !*closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            closed = self
                .closed_cond
                .wait_timeout(closed, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl RpcDispatcher for LocalRpc {
    fn local_member(&self) -> &Member {
        &self.local
    }

    fn call(
        &self,
        target: &Member,
        invocation: &Invocation,
        options: CallOptions,
    ) -> Result<Reply> {
        if self.is_closed() {
            return Err(UperfError::network_msg("dispatcher closed"));
        }

        if self.network.is_silenced(target) {
            if !options.is_sync() {
                return Ok(Reply::Empty);
            }
            if self.wait_for_close(options.timeout) {
                return Err(UperfError::network_msg("dispatcher closed"));
            }
            return Err(timeout_error(invocation, options.timeout));
        }

        let handler = self
            .network
            .handler(target)
            .ok_or_else(|| UperfError::network_msg(format!("{target} is unreachable")))?;

        if !options.is_sync() {
            let from = self.local.clone();
            let invocation = invocation.clone();
            thread::Builder::new()
                .name("local-async".to_string())
                .spawn(move || {
                    if let Err(e) = handler.handle(&from, invocation) {
                        debug!("async request failed: {e}");
                    }
                })?;
            return Ok(Reply::Empty);
        }

        handler
            .handle(&self.local, invocation.clone())
            .map_err(|e| UperfError::remote(target.addr(), e.to_string()))
    }

    fn call_many(
        &self,
        targets: &[Member],
        invocation: &Invocation,
        options: CallOptions,
    ) -> Result<RspList> {
        if !options.is_sync() {
            let mut rsps = RspList::new();
            for target in targets {
                if let Err(e) = self.call(target, invocation, options) {
                    warn!("async call to {target} failed: {e}");
                }
                rsps.push(target.clone(), MemberResponse::NotReceived);
            }
            return Ok(rsps);
        }

        if let [target] = targets {
            let rsp = MemberResponse::from_result(self.call(target, invocation, options));
            return Ok(std::iter::once((target.clone(), rsp)).collect());
        }

        let rsps: RspList = thread::scope(|scope| {
            let pending: Vec<_> = targets
                .iter()
                .map(|target| {
                    let handle =
                        scope.spawn(move || self.call(target, invocation, options));
                    (target, handle)
                })
                .collect();

            pending
                .into_iter()
                .map(|(target, handle)| {
                    let rsp = handle.join().map_or_else(
                        |_| MemberResponse::Failed("call thread panicked".to_string()),
                        MemberResponse::from_result,
                    );
                    (target.clone(), rsp)
                })
                .collect()
        });
        Ok(rsps)
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.closed_cond.notify_all();
    }
}
