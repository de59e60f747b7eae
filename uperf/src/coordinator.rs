//! One timed benchmark run on the local member.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use log::{error, info};
use uperf_common::{constants::PROGRESS_INTERVALS, Results, StatAccumulator};

use crate::{
    error::{Result, UperfError},
    invoker::{Invoker, InvokerStats, RunContext, RunCounters, StartGate},
    membership::Member,
    rpc::RpcDispatcher,
    settings::BenchSettings,
    shutdown::Shutdown,
    store::PayloadStore,
};

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| UperfError::invalid_state("a run is already in progress"))?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the invokers of this member, one run at a time.
pub struct RunCoordinator {
    rpc: Arc<dyn RpcDispatcher>,
    store: Arc<PayloadStore>,
    counters: Arc<RunCounters>,
    shutdown: Shutdown,
    operation_timeout: Duration,
    running: AtomicBool,
}

impl RunCoordinator {
    #[must_use]
    pub fn new(
        rpc: Arc<dyn RpcDispatcher>,
        store: Arc<PayloadStore>,
        shutdown: Shutdown,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            store,
            counters: Arc::new(RunCounters::new()),
            shutdown,
            operation_timeout,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Budget of a single READ or WRITE issued by an invoker. A stopped run
    /// returns only after its in-flight calls finish, so a run may end up to
    /// this long after its nominal duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Generates load against `members` for `settings.time` seconds and
    /// returns the merged statistics of all invokers.
    ///
    /// Fails with [`UperfError::InvalidState`] if a run is already in
    /// progress or `members` is empty. A shutdown request ends the run early.
    pub fn run_once(&self, settings: &BenchSettings, members: &[Member]) -> Result<Results> {
        let _guard = RunGuard::acquire(&self.running)?;
        if members.is_empty() {
            return Err(UperfError::invalid_state("no members to invoke"));
        }

        self.counters.reset();
        self.store.resize(settings.msg_size as usize);

        let ctx = Arc::new(RunContext {
            rpc: self.rpc.clone(),
            members: members.to_vec(),
            settings: *settings,
            operation_timeout: self.operation_timeout,
            store: self.store.clone(),
            counters: self.counters.clone(),
            gate: StartGate::new(),
            stop: AtomicBool::new(false),
        });

        info!(
            "invoking RPCs on {} members with {} threads",
            members.len(),
            settings.num_threads
        );
        info!("running for {} seconds", settings.time);

        let mut handles = Vec::with_capacity(settings.num_threads as usize);
        for id in 0..settings.num_threads as usize {
            match Invoker::new(id, ctx.clone()).spawn() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("failed to spawn invoker {id}: {e}");
                    ctx.stop();
                    ctx.gate.open();
                    join_all(handles);
                    return Err(e.into());
                }
            }
        }

        let start = Instant::now();
        ctx.gate.open();

        let interval = settings.run_duration() / PROGRESS_INTERVALS;
        for i in 1..=PROGRESS_INTERVALS {
            if self.shutdown.wait_timeout(interval) {
                info!("run interrupted by shutdown");
                break;
            }
            info!("{i}: {}", self.progress(start));
        }

        ctx.stop();
        let stats = join_all(handles);
        let elapsed = start.elapsed();

        let mut reads = StatAccumulator::new();
        let mut writes = StatAccumulator::new();
        for s in &stats {
            if settings.print_invokers {
                info!(
                    "invoker {}: gets {} puts {}",
                    s.id,
                    s.reads.describe(settings.print_details),
                    s.writes.describe(settings.print_details)
                );
            }
            reads.merge(&s.reads);
            writes.merge(&s.writes);
        }
        if settings.print_invokers {
            info!(
                "avg over all invokers: gets {} puts {}",
                reads.describe(settings.print_details),
                writes.describe(settings.print_details)
            );
        }

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        info!("done (in {elapsed_ms} ms)");

        let (num_reads, num_writes) = self.counters.snapshot();
        Ok(Results::new(num_reads, num_writes, elapsed_ms, reads, writes))
    }

    #[allow(clippy::cast_precision_loss)]
    fn progress(&self, start: Instant) -> String {
        let (reads, writes) = self.counters.snapshot();
        let secs = start.elapsed().as_secs_f64();
        let reqs_sec = if secs > 0.0 {
            (reads + writes) as f64 / secs
        } else {
            0.0
        };
        format!("{reqs_sec:.0} reqs/sec ({reads} reads {writes} writes)")
    }
}

fn join_all(handles: Vec<JoinHandle<InvokerStats>>) -> Vec<InvokerStats> {
    handles
        .into_iter()
        .filter_map(|h| match h.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                error!("invoker thread panicked");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use super::*;
    use uperf_common::constants::OPERATION_TIMEOUT;

    use crate::{settings::Setting, transport::local::LocalNetwork};

    fn settings(threads: u32, time: u32) -> BenchSettings {
        let mut s = BenchSettings::default();
        s.apply(Setting::NumThreads(threads));
        s.apply(Setting::Time(time));
        s.apply(Setting::MsgSize(64));
        s
    }

    #[test]
    fn test_single_member_run_serves_reads_locally() {
        let network = LocalNetwork::new();
        let me = Member::new("solo", SocketAddr::from(([127, 0, 0, 1], 9000)));
        let rpc = network.join(me.clone());
        let shutdown = Shutdown::new();
        let coordinator = RunCoordinator::new(
            rpc,
            Arc::new(PayloadStore::new(0)),
            shutdown.clone(),
            OPERATION_TIMEOUT,
        );

        let mut s = settings(2, 1);
        s.apply(Setting::ReadPercentage(1.0));
        let results = coordinator.run_once(&s, &[me]).unwrap();

        assert!(results.num_reads() > 0);
        assert_eq!(results.num_writes(), 0);
        assert_eq!(results.reads().count(), results.num_reads());
        assert!(results.elapsed() >= Duration::from_millis(900));
        assert!(!coordinator.is_running());
    }

    #[test]
    fn test_rejects_empty_member_list() {
        let network = LocalNetwork::new();
        let me = Member::new("solo", SocketAddr::from(([127, 0, 0, 1], 9001)));
        let coordinator = RunCoordinator::new(
            network.join(me),
            Arc::new(PayloadStore::new(0)),
            Shutdown::new(),
            OPERATION_TIMEOUT,
        );
        assert!(matches!(
            coordinator.run_once(&settings(1, 1), &[]),
            Err(UperfError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_concurrent_run_is_rejected() {
        let network = LocalNetwork::new();
        let me = Member::new("solo", SocketAddr::from(([127, 0, 0, 1], 9002)));
        let coordinator = Arc::new(RunCoordinator::new(
            network.join(me.clone()),
            Arc::new(PayloadStore::new(0)),
            Shutdown::new(),
            OPERATION_TIMEOUT,
        ));

        let first = {
            let coordinator = coordinator.clone();
            let me = me.clone();
            std::thread::spawn(move || coordinator.run_once(&settings(1, 1), &[me]))
        };
        while !coordinator.is_running() {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(
            coordinator.run_once(&settings(1, 1), &[me]),
            Err(UperfError::InvalidState { .. })
        ));
        assert!(first.join().unwrap().is_ok());
    }

    #[test]
    fn test_shutdown_ends_run_early() {
        let network = LocalNetwork::new();
        let me = Member::new("solo", SocketAddr::from(([127, 0, 0, 1], 9003)));
        let shutdown = Shutdown::new();
        let coordinator = RunCoordinator::new(
            network.join(me.clone()),
            Arc::new(PayloadStore::new(0)),
            shutdown.clone(),
            OPERATION_TIMEOUT,
        );

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            shutdown.request();
        });
        let results = coordinator.run_once(&settings(1, 30), &[me]).unwrap();
        stopper.join().unwrap();
        assert!(results.elapsed() < Duration::from_secs(10));
    }
}
