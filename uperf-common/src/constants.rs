use core::time::Duration;

/// Default UDP port a uperf member binds to.
pub const UPERF_DEFAULT_PORT: u16 = 7800;

/// Magic number used to identify valid uperf datagrams.
pub const UPERF_MAGIC: u32 = 0x7570_6572;

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest `msg_size` a READ reply or WRITE request can carry in one
/// datagram, leaving room for the message envelope.
pub const MAX_PAYLOAD_SIZE: u32 = 64_000;

/// Budget for a single READ or WRITE issued by an invoker.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(40);

/// Budget for fetching the coordinator's config at startup.
pub const CONFIG_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Budget for a SET_* broadcast.
pub const SET_PARAMETER_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra time granted to every member on top of the run duration and
/// [`OPERATION_TIMEOUT`] before its START_RUN response is considered lost.
pub const START_RUN_GRACE: Duration = Duration::from_secs(30);

/// Number of progress reports printed during a run.
pub const PROGRESS_INTERVALS: u32 = 10;
