//! Remote-procedure dispatch seam.
//!
//! The engine talks to other members only through [`RpcDispatcher`]; members
//! serve requests through a [`RequestHandler`]. Transports in
//! [`crate::transport`] implement the former and drive the latter.

use std::{fmt, time::Duration};

use uperf_common::{
    message::{FLAG_NO_RESPONSE, FLAG_OOB},
    Invocation, Reply,
};

use crate::{
    error::{Result, UperfError},
    membership::Member,
};

/// Whether the caller waits for replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Block until every target replied, failed or timed out
    All,
    /// Send and return immediately
    None,
}

/// Per-call delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    pub mode: ResponseMode,
    pub timeout: Duration,
    pub oob: bool,
}

impl CallOptions {
    #[must_use]
    pub const fn sync(timeout: Duration) -> Self {
        Self {
            mode: ResponseMode::All,
            timeout,
            oob: false,
        }
    }

    #[must_use]
    pub const fn fire_and_forget() -> Self {
        Self {
            mode: ResponseMode::None,
            timeout: Duration::ZERO,
            oob: false,
        }
    }

    #[must_use]
    pub const fn with_oob(mut self, oob: bool) -> Self {
        self.oob = oob;
        self
    }

    #[must_use]
    pub const fn is_sync(&self) -> bool {
        matches!(self.mode, ResponseMode::All)
    }

    /// Datagram flags for these options.
    #[must_use]
    pub const fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.oob {
            flags |= FLAG_OOB;
        }
        if !self.is_sync() {
            flags |= FLAG_NO_RESPONSE;
        }
        flags
    }
}

/// Outcome of a call for one target of a multi-target call.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberResponse {
    Value(Reply),
    Failed(String),
    Timeout,
    /// No reply was requested
    NotReceived,
}

impl MemberResponse {
    /// Folds the result of a single call into a per-member outcome.
    #[must_use]
    pub fn from_result(result: Result<Reply>) -> Self {
        match result {
            Ok(reply) => Self::Value(reply),
            Err(e) if e.is_timeout() => Self::Timeout,
            Err(UperfError::Remote { message, .. }) => Self::Failed(message),
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    #[must_use]
    pub const fn is_received(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl fmt::Display for MemberResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => write!(f, "ok"),
            Self::Failed(msg) => write!(f, "failed: {msg}"),
            Self::Timeout => write!(f, "timeout"),
            Self::NotReceived => write!(f, "not received"),
        }
    }
}

/// Responses of a multi-target call, in target order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RspList {
    entries: Vec<(Member, MemberResponse)>,
}

impl RspList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, member: Member, response: MemberResponse) {
        self.entries.push((member, response));
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Member, MemberResponse)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn get(&self, member: &Member) -> Option<&MemberResponse> {
        self.entries
            .iter()
            .find(|(m, _)| m == member)
            .map(|(_, rsp)| rsp)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every target produced a value.
    #[must_use]
    pub fn all_received(&self) -> bool {
        self.entries.iter().all(|(_, rsp)| rsp.is_received())
    }
}

impl IntoIterator for RspList {
    type Item = (Member, MemberResponse);
    type IntoIter = std::vec::IntoIter<(Member, MemberResponse)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(Member, MemberResponse)> for RspList {
    fn from_iter<I: IntoIterator<Item = (Member, MemberResponse)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Client side of the command protocol.
pub trait RpcDispatcher: Send + Sync {
    fn local_member(&self) -> &Member;

    /// Invokes `invocation` on one member.
    ///
    /// With [`ResponseMode::None`] this returns `Reply::Empty` as soon as the
    /// request is handed to the transport.
    fn call(&self, target: &Member, invocation: &Invocation, options: CallOptions)
        -> Result<Reply>;

    /// Invokes `invocation` on every target; per-target failures are recorded
    /// in the returned list rather than failing the whole call.
    fn call_many(
        &self,
        targets: &[Member],
        invocation: &Invocation,
        options: CallOptions,
    ) -> Result<RspList>;

    /// Fails every in-flight and future call.
    fn close(&self);
}

/// Server side of the command protocol.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, from: &Member, invocation: Invocation) -> Result<Reply>;
}

/// Error returned when a call to `target` exceeds its budget.
pub(crate) fn timeout_error(invocation: &Invocation, timeout: Duration) -> UperfError {
    let duration_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    match invocation.operation() {
        Some(op) => UperfError::timeout(op, duration_ms),
        None => UperfError::network_msg(format!(
            "call with id={} timed out after {duration_ms}ms",
            invocation.code
        )),
    }
}
