//! UDP transport for the command protocol.
//!
//! One socket per member. A receive task decodes every datagram: replies
//! complete the pending call with the same request id, requests go to the
//! installed [`RequestHandler`]. OOB requests run concurrently on tokio's
//! blocking pool; regular requests run one after another on a single lane in
//! arrival order.
//!
//! Callers are plain OS threads. They block on the runtime handle, so
//! [`UdpRpc`] must never be called from inside an async task.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
};

use log::{debug, trace, warn};
use tokio::{
    net::UdpSocket,
    runtime::Handle,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{timeout_at, Instant},
};
use uperf_common::{
    constants::MAX_DATAGRAM_SIZE,
    message::{decode, encode, MessageBody},
    Invocation, Reply, UperfMessage,
};

use crate::{
    error::{Result, UperfError},
    membership::{Member, ViewHandle},
    rpc::{timeout_error, CallOptions, MemberResponse, RequestHandler, RpcDispatcher, RspList},
};

pub fn create_socket(bind_addr: SocketAddr) -> Result<UdpSocket> {
    use socket2::{Domain, Socket, Type};
    let sock = Socket::new(
        if bind_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        },
        Type::DGRAM,
        None,
    )?;
    sock.set_reuse_port(true)?;
    sock.set_nonblocking(true)?;
    sock.bind(&bind_addr.into())?;
    Ok(UdpSocket::from_std(sock.into())?)
}

type Pending = HashMap<u64, oneshot::Sender<Result<Reply>>>;

/// A request waiting to be served.
struct Incoming {
    peer: SocketAddr,
    request_id: u64,
    expects_response: bool,
    invocation: Invocation,
}

struct Shared {
    socket: UdpSocket,
    runtime: Handle,
    view: ViewHandle,
    pending: Mutex<Pending>,
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    closed: AtomicBool,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, request_id: u64, outcome: Result<Reply>) {
        match self.pending().remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => trace!("dropping late reply for request {request_id}"),
        }
    }

    fn sender(&self, peer: SocketAddr) -> Member {
        self.view
            .current()
            .find(peer)
            .cloned()
            .unwrap_or_else(|| Member::new(String::new(), peer))
    }

    /// Runs a request through the handler and sends the reply, if any.
    /// Called on a blocking thread.
    fn serve(&self, req: Incoming) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let from = self.sender(req.peer);

        let outcome = match handler {
            Some(handler) => handler.handle(&from, req.invocation),
            None => Err(UperfError::invalid_state("member not started")),
        };
        if !req.expects_response {
            if let Err(e) = outcome {
                debug!("request from {from} failed: {e}");
            }
            return;
        }

        let msg = match outcome {
            Ok(reply) => UperfMessage::reply(req.request_id, reply),
            Err(e) => UperfMessage::failure(req.request_id, e.to_string()),
        };
        let bytes = match encode(&msg) {
            Ok(bytes) if bytes.len() <= MAX_DATAGRAM_SIZE => bytes,
            Ok(bytes) => {
                warn!("reply to {from} of {} bytes is too large", bytes.len());
                let failure = UperfMessage::failure(req.request_id, "reply too large".to_string());
                match encode(&failure) {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                }
            }
            Err(e) => {
                warn!("failed to encode reply to {from}: {e}");
                return;
            }
        };
        if let Err(e) = self
            .runtime
            .block_on(self.socket.send_to(&bytes, req.peer))
        {
            warn!("failed to send reply to {from}: {e}");
        }
    }
}

async fn receive_loop(shared: Arc<Shared>, lane: mpsc::UnboundedSender<Incoming>) {
    let mut buf = vec![0u8; 65_536].into_boxed_slice();
    loop {
        let (n, peer) = match shared.socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                if shared.closed.load(Ordering::Acquire) {
                    return;
                }
                warn!("receive failed: {e}");
                continue;
            }
        };

        let msg = match decode(&buf[..n]) {
            Ok(msg) if msg.is_valid() => msg,
            Ok(_) => {
                debug!("dropping datagram with bad magic from {peer}");
                continue;
            }
            Err(e) => {
                debug!("dropping malformed datagram from {peer}: {e}");
                continue;
            }
        };

        let oob = msg.is_oob();
        let expects_response = msg.expects_response();
        let request_id = msg.request_id;
        match msg.body {
            MessageBody::Request(invocation) => {
                let req = Incoming {
                    peer,
                    request_id,
                    expects_response,
                    invocation,
                };
                if oob {
                    let shared = shared.clone();
                    tokio::task::spawn_blocking(move || shared.serve(req));
                } else if lane.send(req).is_err() {
                    return;
                }
            }
            MessageBody::Reply(reply) => shared.complete(request_id, Ok(reply)),
            MessageBody::Failure(message) => {
                shared.complete(request_id, Err(UperfError::remote(peer, message)));
            }
        }
    }
}

async fn ordered_lane(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Incoming>) {
    while let Some(req) = rx.recv().await {
        let shared = shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || shared.serve(req)).await {
            warn!("request handler panicked: {e}");
        }
    }
}

/// Dispatcher that carries invocations in UDP datagrams.
pub struct UdpRpc {
    local: Member,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UdpRpc {
    /// Binds `local`'s address and starts receiving.
    ///
    /// Binding port 0 picks a free port; the local member then carries the
    /// bound address.
    pub fn bind(runtime: &Handle, local: Member, view: ViewHandle) -> Result<Arc<Self>> {
        let _enter = runtime.enter();
        let socket = create_socket(local.addr())?;
        let local = Member::new(local.name(), socket.local_addr()?);

        let shared = Arc::new(Shared {
            socket,
            runtime: runtime.clone(),
            view,
            pending: Mutex::new(HashMap::new()),
            handler: RwLock::new(None),
            closed: AtomicBool::new(false),
        });

        let (lane_tx, lane_rx) = mpsc::unbounded_channel();
        let tasks = vec![
            runtime.spawn(receive_loop(shared.clone(), lane_tx)),
            runtime.spawn(ordered_lane(shared.clone(), lane_rx)),
        ];
        debug!("listening on {}", local.addr());

        Ok(Arc::new(Self {
            local,
            shared,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(tasks),
        }))
    }

    /// Installs the handler that serves incoming requests.
    pub fn start(&self, handler: Arc<dyn RequestHandler>) {
        *self
            .shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn check_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            Err(UperfError::network_msg("dispatcher closed"))
        } else {
            Ok(())
        }
    }

    fn encode_request(&self, invocation: &Invocation, options: CallOptions) -> Result<(u64, Vec<u8>)> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let msg = UperfMessage::request(request_id, options.flags(), invocation.clone());
        let bytes = encode(&msg)
            .map_err(|e| UperfError::serialization("failed to encode request", e))?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(UperfError::network_msg(format!(
                "request of {} bytes exceeds the datagram limit of {MAX_DATAGRAM_SIZE}",
                bytes.len()
            )));
        }
        Ok((request_id, bytes.to_vec()))
    }

    fn register(&self, request_id: u64) -> oneshot::Receiver<Result<Reply>> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(request_id, tx);
        rx
    }

    async fn await_reply(
        rx: oneshot::Receiver<Result<Reply>>,
        deadline: Instant,
        invocation: &Invocation,
        options: CallOptions,
    ) -> Result<Reply> {
        match timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(UperfError::network_msg("dispatcher closed")),
            Err(_) => Err(timeout_error(invocation, options.timeout)),
        }
    }
}

impl RpcDispatcher for UdpRpc {
    fn local_member(&self) -> &Member {
        &self.local
    }

    fn call(
        &self,
        target: &Member,
        invocation: &Invocation,
        options: CallOptions,
    ) -> Result<Reply> {
        self.check_open()?;
        let (request_id, bytes) = self.encode_request(invocation, options)?;
        let socket = &self.shared.socket;

        if !options.is_sync() {
            self.shared
                .runtime
                .block_on(socket.send_to(&bytes, target.addr()))
                .map_err(|e| UperfError::network(format!("send to {target} failed"), e))?;
            return Ok(Reply::Empty);
        }

        let rx = self.register(request_id);
        let result = self.shared.runtime.block_on(async {
            let deadline = Instant::now() + options.timeout;
            socket
                .send_to(&bytes, target.addr())
                .await
                .map_err(|e| UperfError::network(format!("send to {target} failed"), e))?;
            Self::await_reply(rx, deadline, invocation, options).await
        });
        self.shared.pending().remove(&request_id);
        result
    }

    fn call_many(
        &self,
        targets: &[Member],
        invocation: &Invocation,
        options: CallOptions,
    ) -> Result<RspList> {
        self.check_open()?;
        let socket = &self.shared.socket;

        if !options.is_sync() {
            let (_, bytes) = self.encode_request(invocation, options)?;
            let mut rsps = RspList::new();
            self.shared.runtime.block_on(async {
                for target in targets {
                    if let Err(e) = socket.send_to(&bytes, target.addr()).await {
                        warn!("send to {target} failed: {e}");
                    }
                    rsps.push(target.clone(), MemberResponse::NotReceived);
                }
            });
            return Ok(rsps);
        }

        let mut calls = Vec::with_capacity(targets.len());
        for target in targets {
            let (request_id, bytes) = self.encode_request(invocation, options)?;
            let rx = self.register(request_id);
            calls.push((target, request_id, bytes, rx));
        }

        let rsps = self.shared.runtime.block_on(async {
            let deadline = Instant::now() + options.timeout;
            let mut waiting = Vec::with_capacity(calls.len());
            let mut rsps = RspList::new();
            for (target, request_id, bytes, rx) in calls {
                match socket.send_to(&bytes, target.addr()).await {
                    Ok(_) => waiting.push((target, request_id, rx)),
                    Err(e) => {
                        self.shared.pending().remove(&request_id);
                        rsps.push(target.clone(), MemberResponse::Failed(e.to_string()));
                    }
                }
            }
            for (target, request_id, rx) in waiting {
                let outcome = Self::await_reply(rx, deadline, invocation, options).await;
                self.shared.pending().remove(&request_id);
                rsps.push(target.clone(), MemberResponse::from_result(outcome));
            }
            rsps
        });
        Ok(rsps)
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing dispatcher of {}", self.local);
        self.shared.pending().clear();
        self.shared
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

impl Drop for UdpRpc {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uperf_common::{constants::MAX_PAYLOAD_SIZE, Arg, OperationCode};

    use super::*;
    use crate::membership::View;

    struct Echo;

    impl RequestHandler for Echo {
        fn handle(&self, _from: &Member, invocation: Invocation) -> Result<Reply> {
            match invocation.args.into_iter().next() {
                Some(Arg::Bytes(b)) => Ok(Reply::Payload(b)),
                _ => Err(UperfError::protocol("no payload")),
            }
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn bind(rt: &tokio::runtime::Runtime, name: &str) -> Arc<UdpRpc> {
        let member = Member::new(name, SocketAddr::from(([127, 0, 0, 1], 0)));
        UdpRpc::bind(rt.handle(), member, ViewHandle::new(View::new(0, vec![]))).unwrap()
    }

    fn echo(bytes: &[u8]) -> Invocation {
        Invocation::new(OperationCode::Write, vec![Arg::Bytes(bytes.to_vec())])
    }

    #[test]
    fn test_request_reply() {
        let rt = runtime();
        let a = bind(&rt, "a");
        let b = bind(&rt, "b");
        b.start(Arc::new(Echo));

        let options = CallOptions::sync(Duration::from_secs(2));
        let reply = a.call(b.local_member(), &echo(b"ping"), options).unwrap();
        assert_eq!(reply, Reply::Payload(b"ping".to_vec()));

        let oob = options.with_oob(true);
        let reply = a.call(b.local_member(), &echo(b"oob"), oob).unwrap();
        assert_eq!(reply, Reply::Payload(b"oob".to_vec()));

        let err = a
            .call(
                b.local_member(),
                &Invocation::new(OperationCode::Read, vec![]),
                options,
            )
            .unwrap_err();
        assert!(matches!(err, UperfError::Remote { .. }));
    }

    #[test]
    fn test_unanswered_call_times_out() {
        let rt = runtime();
        let a = bind(&rt, "a");
        let silent = bind(&rt, "silent");
        let target = silent.local_member().clone();
        silent.close();

        let err = a
            .call(&target, &echo(b"x"), CallOptions::sync(Duration::from_millis(100)))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_call_many_mixes_outcomes() {
        let rt = runtime();
        let a = bind(&rt, "a");
        let b = bind(&rt, "b");
        let c = bind(&rt, "c");
        b.start(Arc::new(Echo));
        let silent = c.local_member().clone();
        c.close();

        let targets = [b.local_member().clone(), silent.clone()];
        let rsps = a
            .call_many(&targets, &echo(b"x"), CallOptions::sync(Duration::from_millis(200)))
            .unwrap();
        assert!(rsps.get(b.local_member()).is_some_and(MemberResponse::is_received));
        assert_eq!(rsps.get(&silent), Some(&MemberResponse::Timeout));
    }

    #[test]
    fn test_largest_payload_round_trips() {
        let rt = runtime();
        let a = bind(&rt, "a");
        let b = bind(&rt, "b");
        b.start(Arc::new(Echo));

        let payload = vec![7u8; MAX_PAYLOAD_SIZE as usize];
        let reply = a
            .call(b.local_member(), &echo(&payload), CallOptions::sync(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(reply, Reply::Payload(payload));
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let rt = runtime();
        let a = bind(&rt, "a");
        let big = echo(&vec![0u8; MAX_DATAGRAM_SIZE + 1]);
        let err = a
            .call(a.local_member(), &big, CallOptions::sync(Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, UperfError::Network { .. }));
    }

    #[test]
    fn test_closed_dispatcher_rejects_calls() {
        let rt = runtime();
        let a = bind(&rt, "a");
        let target = a.local_member().clone();
        a.close();
        assert!(a
            .call(&target, &echo(b"x"), CallOptions::fire_and_forget())
            .is_err());
    }
}
