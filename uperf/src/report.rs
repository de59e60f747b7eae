//! Cluster-wide benchmark reports.
//!
//! A [`ClusterReport`] collects the per-member outcome of one START_RUN
//! broadcast and the aggregate computed from the members that answered.
//! Members that failed or timed out keep a failure marker and contribute
//! nothing to the aggregate.

use std::{fs::File, io::Write, net::SocketAddr, path::Path};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use uperf_common::{Reply, Results, StatAccumulator};

use crate::{
    error::Result,
    rpc::{MemberResponse, RspList},
    settings::BenchSettings,
};

/// What one member returned for START_RUN.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberOutcome {
    Completed(Results),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberReport {
    pub name: String,
    pub addr: SocketAddr,
    pub outcome: MemberOutcome,
}

/// Aggregate over the members that completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub total_reads: u64,
    pub total_writes: u64,
    /// Longest run among the completed members
    pub max_elapsed_ms: u64,
    /// Requests per second over the whole cluster
    pub throughput: f64,
    pub bytes_per_sec: f64,
    pub reads: StatAccumulator,
    pub writes: StatAccumulator,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub timestamp: DateTime<Utc>,
    pub settings: BenchSettings,
    pub members: Vec<MemberReport>,
    pub summary: ClusterSummary,
}

impl ClusterReport {
    /// Builds the report from the responses of a START_RUN broadcast.
    #[must_use]
    pub fn from_responses(settings: BenchSettings, rsps: RspList) -> Self {
        let members: Vec<MemberReport> = rsps
            .into_iter()
            .map(|(member, rsp)| {
                let outcome = match rsp {
                    MemberResponse::Value(Reply::Results(results)) => {
                        MemberOutcome::Completed(results)
                    }
                    MemberResponse::Value(other) => {
                        MemberOutcome::Failed(format!("unexpected reply: {other:?}"))
                    }
                    MemberResponse::Failed(msg) => MemberOutcome::Failed(msg),
                    other => MemberOutcome::Failed(other.to_string()),
                };
                MemberReport {
                    name: member.to_string(),
                    addr: member.addr(),
                    outcome,
                }
            })
            .collect();

        let summary = summarize(&members, settings.msg_size);
        Self {
            timestamp: Utc::now(),
            settings,
            members,
            summary,
        }
    }

    pub fn completed(&self) -> impl Iterator<Item = (&MemberReport, &Results)> {
        self.members.iter().filter_map(|m| match &m.outcome {
            MemberOutcome::Completed(r) => Some((m, r)),
            MemberOutcome::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&MemberReport, &str)> {
        self.members.iter().filter_map(|m| match &m.outcome {
            MemberOutcome::Failed(msg) => Some((m, msg.as_str())),
            MemberOutcome::Completed(_) => None,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn summarize(members: &[MemberReport], msg_size: u32) -> ClusterSummary {
    let mut summary = ClusterSummary::default();
    for m in members {
        match &m.outcome {
            MemberOutcome::Completed(r) => {
                summary.total_reads += r.num_reads();
                summary.total_writes += r.num_writes();
                summary.max_elapsed_ms = summary.max_elapsed_ms.max(r.elapsed_ms());
                summary.reads.merge(r.reads());
                summary.writes.merge(r.writes());
                summary.completed += 1;
            }
            MemberOutcome::Failed(_) => summary.failed += 1,
        }
    }
    if summary.max_elapsed_ms > 0 {
        let total = (summary.total_reads + summary.total_writes) as f64;
        summary.throughput = total / (summary.max_elapsed_ms as f64 / 1000.0);
    }
    summary.bytes_per_sec = summary.throughput * f64::from(msg_size);
    summary
}

/// Human-readable byte count, e.g. `1.50MB`.
#[must_use]
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["b", "KB", "MB", "GB", "TB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0}{}", UNITS[unit])
    } else {
        format!("{value:.2}{}", UNITS[unit])
    }
}

pub fn print_report(report: &ClusterReport) {
    let details = report.settings.print_details;
    info!("======================= Results: ===========================");
    for m in &report.members {
        match &m.outcome {
            MemberOutcome::Completed(r) => info!("{}: {r}", m.name),
            MemberOutcome::Failed(msg) => warn!("{}: FAILED ({msg})", m.name),
        }
    }

    let s = &report.summary;
    info!(
        "Throughput: {:.2} reqs/sec ({}/sec)",
        s.throughput,
        format_bytes(s.bytes_per_sec)
    );
    info!(
        "Roundtrip:  gets {}, puts {}",
        s.reads.describe(details),
        s.writes.describe(details)
    );
    if s.failed > 0 {
        warn!("{} of {} members did not report", s.failed, report.members.len());
    }
}

/// Writes any serializable value as pretty JSON.
pub fn save_json_results<T: Serialize>(data: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    let mut file = File::create(path)?;
    file.write_all(json.as_bytes())?;
    info!("Results saved to {}", path.display());
    Ok(())
}
