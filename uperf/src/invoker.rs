//! Load-generating worker threads.
//!
//! Each [`Invoker`] waits once on the run's [`StartGate`], then loops until
//! the run's stop flag is set. Every iteration tosses a weighted coin and
//! issues exactly one READ (to one random member) or one WRITE (anycast to
//! the members following this one in the view). Latencies are recorded in
//! the invoker's own accumulators, which are handed back when the thread is
//! joined.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{trace, warn};
use rand::Rng;
use uperf_common::{Invocation, StatAccumulator};

use crate::{
    command::Command,
    membership::Member,
    rpc::{CallOptions, ResponseMode, RpcDispatcher},
    settings::BenchSettings,
    store::PayloadStore,
};

/// One-shot latch every invoker waits on before generating load.
#[derive(Debug, Default)]
pub struct StartGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl StartGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .cond
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Completed operations of the current run, shared by all its invokers.
#[derive(Debug, Default)]
pub struct RunCounters {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl RunCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Current `(reads, writes)`.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed),
        )
    }
}

/// Returns true with the given probability. Values outside `[0, 1]` are
/// clamped.
pub fn toss_weighted_coin<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    if probability <= 0.0 {
        return false;
    }
    if probability >= 1.0 {
        return true;
    }
    rng.random::<f64>() < probability
}

/// Uniformly random member, or `None` for an empty list.
pub fn pick_target<'a, R: Rng + ?Sized>(rng: &mut R, members: &'a [Member]) -> Option<&'a Member> {
    if members.is_empty() {
        None
    } else {
        Some(&members[rng.random_range(0..members.len())])
    }
}

/// Up to `count` distinct members starting right after `local` and walking
/// forward with wraparound. `local` itself is never picked, so at most
/// `members.len() - 1` targets are returned. If `local` is not in the list
/// the walk starts at the first member.
#[must_use]
pub fn pick_anycast_targets(members: &[Member], local: &Member, count: usize) -> Vec<Member> {
    let len = members.len();
    let start = members
        .iter()
        .position(|m| m == local)
        .map_or(0, |idx| idx + 1);

    let mut targets: Vec<Member> = Vec::with_capacity(count.min(len));
    for offset in 0..len {
        if targets.len() >= count {
            break;
        }
        let candidate = &members[(start + offset) % len];
        if candidate != local && !targets.contains(candidate) {
            targets.push(candidate.clone());
        }
    }
    targets
}

/// Everything the invokers of one run share.
pub struct RunContext {
    pub rpc: Arc<dyn RpcDispatcher>,
    pub members: Vec<Member>,
    pub settings: BenchSettings,
    /// Budget of every READ and synchronous WRITE
    pub operation_timeout: Duration,
    pub store: Arc<PayloadStore>,
    pub counters: Arc<RunCounters>,
    pub gate: StartGate,
    pub stop: AtomicBool,
}

impl RunContext {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Accumulators of one invoker, returned at join.
#[derive(Debug, Clone, Default)]
pub struct InvokerStats {
    pub id: usize,
    pub reads: StatAccumulator,
    pub writes: StatAccumulator,
}

pub struct Invoker {
    ctx: Arc<RunContext>,
    stats: InvokerStats,
    read_options: CallOptions,
    write_options: CallOptions,
}

impl Invoker {
    #[must_use]
    pub fn new(id: usize, ctx: Arc<RunContext>) -> Self {
        let settings = &ctx.settings;
        let read_options = CallOptions::sync(ctx.operation_timeout).with_oob(settings.oob);
        let write_options = CallOptions {
            mode: if settings.sync {
                ResponseMode::All
            } else {
                ResponseMode::None
            },
            timeout: ctx.operation_timeout,
            oob: settings.oob,
        };
        Self {
            ctx,
            stats: InvokerStats {
                id,
                ..InvokerStats::default()
            },
            read_options,
            write_options,
        }
    }

    /// Starts the invoker on a thread named `invoker-<id>`.
    pub fn spawn(self) -> io::Result<JoinHandle<InvokerStats>> {
        thread::Builder::new()
            .name(format!("invoker-{}", self.stats.id))
            .spawn(move || {
                let mut rng = rand::rng();
                self.run(&mut rng)
            })
    }

    /// Generates load until the run is stopped.
    pub fn run<R: Rng + ?Sized>(mut self, rng: &mut R) -> InvokerStats {
        self.ctx.gate.wait();

        let payload = self.ctx.store.get(0).to_vec();
        let put_call = Command::Write { key: 0, payload }.encode();
        let get_call = Command::Read { key: 0 }.encode();

        while !self.ctx.is_stopped() {
            if toss_weighted_coin(rng, self.ctx.settings.read_percentage) {
                self.read_once(rng, &get_call);
            } else {
                self.write_once(&put_call);
            }
        }
        self.stats
    }

    fn read_once<R: Rng + ?Sized>(&mut self, rng: &mut R, get_call: &Invocation) {
        let ctx = &*self.ctx;
        let Some(target) = pick_target(rng, &ctx.members) else {
            return;
        };

        let start = Instant::now();
        if ctx.settings.allow_local_gets && target == ctx.rpc.local_member() {
            let _payload = ctx.store.get(1);
        } else if let Err(e) = ctx.rpc.call(target, get_call, self.read_options) {
            warn!("read from {target} failed: {e}");
            return;
        }
        self.stats.reads.add_duration(start.elapsed());
        ctx.counters.record_read();
    }

    fn write_once(&mut self, put_call: &Invocation) {
        let ctx = &*self.ctx;
        let count = usize::try_from(ctx.settings.anycast_count).unwrap_or(usize::MAX);
        let targets = pick_anycast_targets(&ctx.members, ctx.rpc.local_member(), count);

        let start = Instant::now();
        match ctx.rpc.call_many(&targets, put_call, self.write_options) {
            Ok(rsps) if self.write_options.is_sync() && !rsps.all_received() => {
                for (member, rsp) in rsps.iter().filter(|(_, rsp)| !rsp.is_received()) {
                    warn!("write to {member}: {rsp}");
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("write to {} members failed: {e}", targets.len());
                return;
            }
        }
        self.stats.writes.add_duration(start.elapsed());
        ctx.counters.record_write();
        trace!("write to {} members done", targets.len());
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn members(names: &[&str]) -> Vec<Member> {
        names
            .iter()
            .zip(7800u16..)
            .map(|(name, port)| Member::new(*name, SocketAddr::from(([127, 0, 0, 1], port))))
            .collect()
    }

    fn names(targets: &[Member]) -> Vec<&str> {
        targets.iter().map(Member::name).collect()
    }

    #[test]
    fn test_weighted_coin_converges() {
        let mut rng = StdRng::seed_from_u64(42);
        let tosses = 100_000;
        let heads = (0..tosses)
            .filter(|_| toss_weighted_coin(&mut rng, 0.8))
            .count();
        let ratio = heads as f64 / f64::from(tosses);
        assert!((ratio - 0.8).abs() < 0.01, "ratio was {ratio}");

        assert!(!toss_weighted_coin(&mut rng, 0.0));
        assert!(toss_weighted_coin(&mut rng, 1.0));
    }

    #[test]
    fn test_anycast_walks_forward_from_self() {
        let view = members(&["A", "B", "C", "D", "E"]);
        let targets = pick_anycast_targets(&view, &view[2], 2);
        assert_eq!(names(&targets), ["D", "E"]);

        let targets = pick_anycast_targets(&view, &view[4], 3);
        assert_eq!(names(&targets), ["A", "B", "C"]);
    }

    #[test]
    fn test_anycast_never_picks_self() {
        let view = members(&["A", "B", "C"]);
        for k in 0..6 {
            for local in &view {
                let targets = pick_anycast_targets(&view, local, k);
                assert_eq!(targets.len(), k.min(view.len() - 1));
                assert!(!targets.contains(local));
            }
        }

        let single = members(&["A"]);
        assert!(pick_anycast_targets(&single, &single[0], 2).is_empty());
    }

    #[test]
    fn test_anycast_without_self_starts_at_first() {
        let view = members(&["A", "B", "C"]);
        let outsider = Member::new("Z", SocketAddr::from(([127, 0, 0, 2], 1)));
        let targets = pick_anycast_targets(&view, &outsider, 2);
        assert_eq!(names(&targets), ["A", "B"]);
    }

    #[test]
    fn test_pick_target() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(pick_target(&mut rng, &[]).is_none());

        let view = members(&["A", "B"]);
        for _ in 0..20 {
            let target = pick_target(&mut rng, &view).unwrap();
            assert!(view.contains(target));
        }
    }

    #[test]
    fn test_counters_are_exact_under_contention() {
        let counters = Arc::new(RunCounters::new());
        let threads = 8;
        let rounds = 10_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counters = counters.clone();
                thread::spawn(move || {
                    for _ in 0..rounds {
                        counters.record_read();
                        counters.record_write();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counters.snapshot(), (threads * rounds, threads * rounds));
        counters.reset();
        assert_eq!(counters.snapshot(), (0, 0));
    }

    #[test]
    fn test_start_gate_releases_waiters() {
        let gate = Arc::new(StartGate::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.wait())
            })
            .collect();
        assert!(!gate.is_open());
        gate.open();
        for w in waiters {
            w.join().unwrap();
        }
        assert!(gate.is_open());
    }
}
