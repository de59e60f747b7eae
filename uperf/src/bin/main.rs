#!/usr/bin/env cargo run --bin uperf --
//! uperf CLI
//!
//! Starts one cluster member. Unless `--nohup` is given the member also runs
//! the interactive console from which benchmarks are started on the whole
//! cluster.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    process,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use uperf::{
    BenchSettings, ClusterConfig, ClusterController, CommandDispatcher, ConsoleSource,
    ControllerOptions, Member, Shutdown, UdpRpc, UperfNode, View, ViewHandle,
};
use uperf_common::constants::{CONFIG_FETCH_TIMEOUT, UPERF_DEFAULT_PORT};

/// Command-line arguments for a uperf member
#[derive(Parser, Debug)]
#[command(
    name = "uperf",
    about = "Distributed read/write load generator",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// Name of this member; defaults to its entry in the cluster file
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Address to bind to
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1")]
    bind_addr: IpAddr,

    /// UDP port to bind to
    #[arg(long, value_name = "PORT", default_value_t = UPERF_DEFAULT_PORT)]
    port: u16,

    /// Comma-separated list of cluster members (host:port,...)
    #[arg(long, value_name = "HOSTS", conflicts_with = "cluster")]
    initial_hosts: Option<String>,

    /// JSON file listing the cluster members
    #[arg(long, value_name = "PATH")]
    cluster: Option<PathBuf>,

    /// Serve requests without the interactive console
    #[arg(long)]
    nohup: bool,

    /// Save every cluster report to this JSON file
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Logging level
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        help = "Set logging level (error, warn, info, debug, trace)"
    )]
    log_level: String,

    /// Enable verbose output
    #[arg(
        short,
        long,
        help = "Enable verbose logging (equivalent to --log-level=debug)"
    )]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    if let Err(e) =
        env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).try_init()
    {
        eprintln!("Failed to initialize logger: {e}");
        process::exit(1);
    }

    if let Err(e) = run_member(args) {
        log::error!("uperf failed: {e}");
        let mut source = e.source();
        while let Some(err) = source {
            log::error!("Caused by: {err}");
            source = err.source();
        }
        process::exit(1);
    }
}

fn load_cluster(args: &Args) -> Result<ClusterConfig> {
    if let Some(path) = &args.cluster {
        return ClusterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load cluster from '{}'", path.display()));
    }
    if let Some(hosts) = &args.initial_hosts {
        return ClusterConfig::from_initial_hosts(hosts)
            .with_context(|| format!("Invalid initial hosts '{hosts}'"));
    }
    Ok(ClusterConfig::default())
}

fn run_member(args: Args) -> Result<()> {
    let bind = SocketAddr::new(args.bind_addr, args.port);
    let cluster = load_cluster(&args)?;

    let mut members = cluster.members();
    let name = args
        .name
        .clone()
        .or_else(|| members.iter().find(|m| m.addr() == bind).map(|m| m.name().to_string()))
        .unwrap_or_else(|| bind.to_string());
    if !members.iter().any(|m| m.addr() == bind) {
        warn!("{bind} is not listed in the cluster, appending it");
        members.push(Member::new(name.clone(), bind));
    }
    let view = ViewHandle::new(View::new(1, members));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("uperf-io")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let rpc = UdpRpc::bind(runtime.handle(), Member::new(name, bind), view.clone())
        .with_context(|| format!("Failed to bind {bind}"))?;

    let shutdown = Shutdown::new();
    let node = UperfNode::new(rpc.clone(), view, shutdown.clone(), BenchSettings::default());
    rpc.start(Arc::new(CommandDispatcher::new(node.clone())));

    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.request();
            shutdown.terminate();
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    info!(
        "created member {} ({}), view: {}",
        node.local_member(),
        bind,
        node.view().current()
    );

    let mut controller = ClusterController::new(
        node.clone(),
        ControllerOptions {
            output: args.output,
            ..ControllerOptions::default()
        },
    );
    controller.request_config_from_coordinator(CONFIG_FETCH_TIMEOUT);

    if args.nohup {
        info!("running without console, waiting for quit_all or Ctrl-C");
        shutdown.wait_requested();
    } else {
        let mut console =
            ConsoleSource::spawn(node.clone()).context("Failed to start console")?;
        controller.run(&mut console)?;
    }

    info!("shutting down");
    shutdown.terminate();
    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}
