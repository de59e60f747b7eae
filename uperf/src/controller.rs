//! Operator-facing control loop.
//!
//! The controller turns [`ControlEvent`]s into broadcasts of the command
//! protocol: a parameter change is sent to every member, a benchmark is
//! started on every member and their results are merged into a
//! [`ClusterReport`]. Failures of individual members never fail the
//! operation; they are carried in the returned responses.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use log::{info, warn};
use uperf_common::{
    constants::{MAX_PAYLOAD_SIZE, SET_PARAMETER_TIMEOUT, START_RUN_GRACE},
    Config, ConfigValue, Reply,
};

use crate::{
    command::Command,
    error::{Result, UperfError},
    node::UperfNode,
    report::{print_report, save_json_results, ClusterReport},
    rpc::{CallOptions, RspList},
    settings::{Parameter, Setting},
};

/// How long [`ClusterController::run`] waits for an event before checking
/// for a shutdown request.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    AwaitingBenchmark,
    ShuttingDown,
}

/// An operator action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    StartBenchmark,
    PrintView,
    /// Set a parameter on every member
    Change(Setting),
    /// Flip a boolean parameter on every member
    Toggle(Parameter),
    PrintVersion,
    /// Leave the cluster, others keep running
    Exit,
    /// Shut every member down
    ExitAll,
}

/// Producer of operator actions.
pub trait CommandSource {
    /// The next event, or `None` if none arrived within `timeout`.
    fn next_event(&mut self, timeout: Duration) -> Option<ControlEvent>;
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Added to the run time and the members' operation timeout to form the
    /// START_RUN timeout of each member
    pub start_run_grace: Duration,
    pub set_timeout: Duration,
    /// Where each cluster report is saved as JSON
    pub output: Option<PathBuf>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            start_run_grace: START_RUN_GRACE,
            set_timeout: SET_PARAMETER_TIMEOUT,
            output: None,
        }
    }
}

pub struct ClusterController {
    node: Arc<UperfNode>,
    options: ControllerOptions,
    state: ControllerState,
}

impl fmt::Debug for ClusterController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterController")
            .field("member", self.node.local_member())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ClusterController {
    #[must_use]
    pub const fn new(node: Arc<UperfNode>, options: ControllerOptions) -> Self {
        Self {
            node,
            options,
            state: ControllerState::Idle,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    fn ensure_not_shutting_down(&self) -> Result<()> {
        if self.state == ControllerState::ShuttingDown {
            Err(UperfError::invalid_state("controller is shutting down"))
        } else {
            Ok(())
        }
    }

    /// Fetches the settings of the view's coordinator and applies them
    /// locally.
    ///
    /// Only done when the view has at least two members and the local member
    /// is not the coordinator. On failure the local settings stay as they
    /// are.
    pub fn request_config_from_coordinator(&self, timeout: Duration) -> Option<Config> {
        let view = self.node.view().current();
        if view.size() < 2 {
            return None;
        }
        let coord = view.coordinator()?;
        if coord == self.node.local_member() {
            return None;
        }

        let invocation = Command::GetConfig.encode();
        let config = match self
            .node
            .rpc()
            .call(coord, &invocation, CallOptions::sync(timeout))
        {
            Ok(Reply::Config(config)) => config,
            Ok(other) => {
                warn!("unexpected reply to config request from {coord}: {other:?}");
                return None;
            }
            Err(e) => {
                warn!("failed to fetch config from {coord}: {e}");
                return None;
            }
        };

        info!("-- fetched config from {coord}: {config}");
        if let Err(e) = self.node.apply_config(&config) {
            warn!("failed to apply config from {coord}: {e}");
        }
        Some(config)
    }

    /// Checks an operator change against the current view and the datagram
    /// limit.
    pub fn validate_change(&self, setting: &Setting) -> Result<()> {
        match *setting {
            Setting::AnycastCount(count) => {
                let size = self.node.view().current().size();
                if count as usize > size {
                    return Err(UperfError::config_mismatch(
                        Parameter::AnycastCount.name(),
                        "count not larger than the view size",
                        format!("{count} (view size {size})"),
                    ));
                }
            }
            Setting::MsgSize(size) if size > MAX_PAYLOAD_SIZE => {
                return Err(UperfError::config_mismatch(
                    Parameter::MsgSize.name(),
                    "size that fits in one datagram",
                    format!("{size} (max {MAX_PAYLOAD_SIZE})"),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Per-member START_RUN budget. A stopped run waits for its in-flight
    /// calls, which may take up to the operation timeout each.
    #[must_use]
    pub fn start_run_timeout(&self) -> Duration {
        self.node.settings().run_duration()
            + self.node.coordinator().operation_timeout()
            + self.options.start_run_grace
    }

    /// Sets `setting` on every member of the view.
    pub fn broadcast_parameter_change(&self, setting: Setting) -> Result<RspList> {
        self.ensure_not_shutting_down()?;
        self.validate_change(&setting)?;

        let members = self.node.view().current().members().to_vec();
        let invocation = Command::Set(setting).encode();
        let rsps = self.node.rpc().call_many(
            &members,
            &invocation,
            CallOptions::sync(self.options.set_timeout),
        )?;

        for (member, rsp) in rsps.iter() {
            if !rsp.is_received() {
                warn!("setting {setting} on {member}: {rsp}");
            }
        }
        Ok(rsps)
    }

    /// Runs the benchmark on every member and merges their results.
    pub fn start_cluster_benchmark(&mut self) -> Result<ClusterReport> {
        self.ensure_not_shutting_down()?;
        self.state = ControllerState::AwaitingBenchmark;
        let outcome = self.collect_cluster_results();
        if self.state == ControllerState::AwaitingBenchmark {
            self.state = ControllerState::Idle;
        }

        let report = outcome?;
        print_report(&report);
        if let Some(path) = &self.options.output {
            if let Err(e) = save_json_results(&report, path) {
                warn!("failed to save report to {}: {e}", path.display());
            }
        }
        Ok(report)
    }

    fn collect_cluster_results(&self) -> Result<ClusterReport> {
        let settings = self.node.settings();
        let members = self.node.view().current().members().to_vec();
        let timeout = self.start_run_timeout();
        info!(
            "starting benchmark on {} members ({}s, {} threads each)",
            members.len(),
            settings.time,
            settings.num_threads
        );

        let rsps = self.node.rpc().call_many(
            &members,
            &Command::StartRun.encode(),
            CallOptions::sync(timeout).with_oob(true),
        )?;
        Ok(ClusterReport::from_responses(settings, rsps))
    }

    /// Asks every member, this one included, to shut down.
    pub fn shutdown_cluster(&mut self) -> Result<()> {
        let members = self.node.view().current().members().to_vec();
        info!("sending quit_all to {} members", members.len());
        let result = self.node.rpc().call_many(
            &members,
            &Command::QuitAll.encode(),
            CallOptions::fire_and_forget().with_oob(true),
        );
        self.state = ControllerState::ShuttingDown;
        self.node.shutdown().request();
        result.map(|_| ())
    }

    /// Handles operator events until a shutdown is requested.
    pub fn run(&mut self, source: &mut dyn CommandSource) -> Result<()> {
        while !self.node.shutdown().is_requested() {
            if let Some(event) = source.next_event(EVENT_POLL_INTERVAL) {
                if let Err(e) = self.handle_event(event) {
                    warn!("{e}");
                }
            }
        }
        self.state = ControllerState::ShuttingDown;
        Ok(())
    }

    pub fn handle_event(&mut self, event: ControlEvent) -> Result<()> {
        match event {
            ControlEvent::StartBenchmark => self.start_cluster_benchmark().map(|_| ()),
            ControlEvent::PrintView => {
                info!(
                    "-- local: {}, view: {}",
                    self.node.local_member(),
                    self.node.view().current()
                );
                Ok(())
            }
            ControlEvent::Change(setting) => self.broadcast_parameter_change(setting).map(|_| ()),
            ControlEvent::Toggle(param) => {
                let toggled = match self.node.settings().get(param).value() {
                    ConfigValue::Bool(b) => Setting::new(param, (!b).into())?,
                    _ => {
                        return Err(UperfError::config_mismatch(param.name(), "bool", "non-bool"))
                    }
                };
                self.broadcast_parameter_change(toggled).map(|_| ())
            }
            ControlEvent::PrintVersion => {
                info!("Version: {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
            ControlEvent::Exit => {
                self.state = ControllerState::ShuttingDown;
                self.node.shutdown().request();
                Ok(())
            }
            ControlEvent::ExitAll => self.shutdown_cluster(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, net::SocketAddr};

    use uperf_common::constants::OPERATION_TIMEOUT;

    use super::*;
    use crate::{
        dispatcher::CommandDispatcher,
        membership::{Member, View, ViewHandle},
        report::MemberOutcome,
        settings::BenchSettings,
        shutdown::Shutdown,
        transport::LocalNetwork,
    };

    struct Cluster {
        network: LocalNetwork,
        nodes: Vec<Arc<UperfNode>>,
    }

    fn cluster(size: u16, settings: BenchSettings) -> Cluster {
        cluster_with_timeout(size, settings, Duration::from_secs(2))
    }

    fn cluster_with_timeout(
        size: u16,
        settings: BenchSettings,
        operation_timeout: Duration,
    ) -> Cluster {
        let network = LocalNetwork::new();
        let members: Vec<Member> = (0..size)
            .map(|i| {
                Member::new(
                    format!("node-{i}"),
                    SocketAddr::from(([127, 0, 0, 1], 7800 + i)),
                )
            })
            .collect();
        let view = ViewHandle::new(View::new(1, members.clone()));

        let nodes = members
            .into_iter()
            .map(|member| {
                let rpc = network.join(member);
                let node = UperfNode::with_operation_timeout(
                    rpc.clone(),
                    view.clone(),
                    Shutdown::new(),
                    settings,
                    operation_timeout,
                );
                rpc.start(Arc::new(CommandDispatcher::new(node.clone())));
                node
            })
            .collect();
        Cluster { network, nodes }
    }

    fn short_run() -> BenchSettings {
        let mut settings = BenchSettings::default();
        settings.apply(Setting::NumThreads(4));
        settings.apply(Setting::Time(1));
        settings.apply(Setting::MsgSize(100));
        settings.apply(Setting::ReadPercentage(0.8));
        settings
    }

    fn options() -> ControllerOptions {
        ControllerOptions {
            start_run_grace: Duration::from_secs(2),
            set_timeout: Duration::from_millis(500),
            output: None,
        }
    }

    #[test]
    fn test_three_member_benchmark() {
        let cluster = cluster(3, short_run());
        let mut controller = ClusterController::new(cluster.nodes[0].clone(), options());

        let report = controller.start_cluster_benchmark().unwrap();
        assert_eq!(controller.state(), ControllerState::Idle);
        assert_eq!(report.members.len(), 3);
        assert_eq!(report.summary.failed, 0);

        for (_, results) in report.completed() {
            assert!(results.total_requests() > 0);
            assert!(results.elapsed() >= Duration::from_millis(900));
            assert!(results.elapsed() < Duration::from_secs(3));
            assert_eq!(results.reads().count(), results.num_reads());
            assert_eq!(results.writes().count(), results.num_writes());
        }
        assert!(report.summary.throughput > 0.0);
    }

    #[test]
    fn test_unreachable_member_is_marked_failed() {
        let cluster = cluster(3, short_run());
        cluster.network.leave(cluster.nodes[2].local_member());
        let mut controller = ClusterController::new(cluster.nodes[0].clone(), options());

        let report = controller.start_cluster_benchmark().unwrap();
        assert_eq!(report.completed().count(), 2);
        assert_eq!(report.summary.failed, 1);
        assert!(matches!(
            report.members[2].outcome,
            MemberOutcome::Failed(_)
        ));
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_silent_member_times_out_while_others_report() {
        let mut settings = short_run();
        settings.apply(Setting::AnycastCount(2));
        let cluster = cluster_with_timeout(3, settings, Duration::from_millis(300));
        cluster.network.silence(cluster.nodes[2].local_member());
        let mut controller = ClusterController::new(cluster.nodes[0].clone(), options());
        assert_eq!(
            controller.start_run_timeout(),
            Duration::from_millis(1000 + 300 + 2000)
        );

        let report = controller.start_cluster_benchmark().unwrap();
        assert_eq!(report.completed().count(), 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(
            report.members[2].outcome,
            MemberOutcome::Failed("timeout".to_string())
        );
        for (_, results) in report.completed() {
            assert!(results.total_requests() > 0);
        }
    }

    #[test]
    fn test_default_budget_outlasts_operation_timeout() {
        let cluster = cluster_with_timeout(1, short_run(), OPERATION_TIMEOUT);
        let controller =
            ClusterController::new(cluster.nodes[0].clone(), ControllerOptions::default());
        assert!(controller.start_run_timeout() > Duration::from_secs(1) + OPERATION_TIMEOUT);
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let cluster = cluster(2, BenchSettings::default());
        let controller = ClusterController::new(cluster.nodes[0].clone(), options());

        assert!(matches!(
            controller.broadcast_parameter_change(Setting::MsgSize(MAX_PAYLOAD_SIZE + 1)),
            Err(UperfError::ConfigMismatch { .. })
        ));
        assert_eq!(cluster.nodes[1].settings().msg_size, BenchSettings::default().msg_size);
        assert!(controller
            .broadcast_parameter_change(Setting::MsgSize(MAX_PAYLOAD_SIZE))
            .is_ok());
    }

    #[test]
    fn test_parameter_change_reaches_every_member() {
        let cluster = cluster(3, BenchSettings::default());
        let controller = ClusterController::new(cluster.nodes[1].clone(), options());

        let rsps = controller
            .broadcast_parameter_change(Setting::NumThreads(7))
            .unwrap();
        assert!(rsps.all_received());
        for node in &cluster.nodes {
            assert_eq!(node.settings().num_threads, 7);
        }
    }

    #[test]
    fn test_anycast_larger_than_view_is_rejected() {
        let cluster = cluster(2, BenchSettings::default());
        let controller = ClusterController::new(cluster.nodes[0].clone(), options());

        assert!(controller
            .broadcast_parameter_change(Setting::AnycastCount(3))
            .is_err());
        assert!(controller
            .broadcast_parameter_change(Setting::AnycastCount(2))
            .is_ok());
        assert_eq!(cluster.nodes[1].settings().anycast_count, 2);
    }

    #[test]
    fn test_config_fetched_from_coordinator() {
        let cluster = cluster(3, BenchSettings::default());
        cluster.nodes[0].apply(Setting::Time(5));
        cluster.nodes[0].apply(Setting::Oob(false));

        let controller = ClusterController::new(cluster.nodes[2].clone(), options());
        let config = controller
            .request_config_from_coordinator(Duration::from_secs(1))
            .unwrap();
        assert_eq!(config.len(), Parameter::ALL.len());
        assert_eq!(cluster.nodes[2].settings(), cluster.nodes[0].settings());

        let coordinator = ClusterController::new(cluster.nodes[0].clone(), options());
        assert!(coordinator
            .request_config_from_coordinator(Duration::from_secs(1))
            .is_none());
    }

    #[test]
    fn test_config_fetch_failure_keeps_defaults() {
        let cluster = cluster(2, BenchSettings::default());
        cluster.network.silence(cluster.nodes[0].local_member());

        let controller = ClusterController::new(cluster.nodes[1].clone(), options());
        assert!(controller
            .request_config_from_coordinator(Duration::from_millis(50))
            .is_none());
        assert_eq!(cluster.nodes[1].settings(), BenchSettings::default());
    }

    struct Scripted(VecDeque<ControlEvent>);

    impl CommandSource for Scripted {
        fn next_event(&mut self, _timeout: Duration) -> Option<ControlEvent> {
            self.0.pop_front()
        }
    }

    #[test]
    fn test_run_until_exit_all() {
        let cluster = cluster(3, BenchSettings::default());
        let mut controller = ClusterController::new(cluster.nodes[0].clone(), options());
        let mut source = Scripted(VecDeque::from([
            ControlEvent::Toggle(Parameter::Sync),
            ControlEvent::PrintView,
            ControlEvent::ExitAll,
        ]));

        controller.run(&mut source).unwrap();
        assert_eq!(controller.state(), ControllerState::ShuttingDown);
        assert!(!cluster.nodes[2].settings().sync);
        assert!(cluster.nodes[0].shutdown().is_requested());

        for node in &cluster.nodes[1..] {
            assert!(node.shutdown().wait_timeout(Duration::from_secs(2)));
        }
        assert!(controller.start_cluster_benchmark().is_err());
    }
}
