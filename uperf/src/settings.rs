//! Typed benchmark settings and their mapping onto the config bag.
//!
//! Every tunable is a [`Parameter`] with a fixed name, a fixed value type and
//! a fixed SET_* operation code. A [`Setting`] is a parameter paired with a
//! type-checked value; it is the only way settings are changed, whether they
//! arrive as a SET_* command or as an entry of a fetched [`Config`].

use std::{fmt, ops::RangeInclusive, time::Duration};

use serde::{Deserialize, Serialize};
use uperf_common::{constants::MAX_PAYLOAD_SIZE, Config, ConfigValue, OperationCode};

use crate::error::{Result, UperfError};

/// Names a tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Sync,
    Oob,
    NumThreads,
    Time,
    MsgSize,
    AnycastCount,
    ReadPercentage,
    AllowLocalGets,
    PrintInvokers,
    PrintDetails,
}

impl Parameter {
    pub const ALL: [Self; 10] = [
        Self::Sync,
        Self::Oob,
        Self::NumThreads,
        Self::Time,
        Self::MsgSize,
        Self::AnycastCount,
        Self::ReadPercentage,
        Self::AllowLocalGets,
        Self::PrintInvokers,
        Self::PrintDetails,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Oob => "oob",
            Self::NumThreads => "num_threads",
            Self::Time => "time",
            Self::MsgSize => "msg_size",
            Self::AnycastCount => "anycast_count",
            Self::ReadPercentage => "read_percentage",
            Self::AllowLocalGets => "allow_local_gets",
            Self::PrintInvokers => "print_invokers",
            Self::PrintDetails => "print_details",
        }
    }

    #[must_use]
    pub const fn code(self) -> OperationCode {
        match self {
            Self::Sync => OperationCode::SetSync,
            Self::Oob => OperationCode::SetOob,
            Self::NumThreads => OperationCode::SetNumThreads,
            Self::Time => OperationCode::SetTime,
            Self::MsgSize => OperationCode::SetMsgSize,
            Self::AnycastCount => OperationCode::SetAnycastCount,
            Self::ReadPercentage => OperationCode::SetReadPercentage,
            Self::AllowLocalGets => OperationCode::SetAllowLocalGets,
            Self::PrintInvokers => OperationCode::SetPrintInvokers,
            Self::PrintDetails => OperationCode::SetPrintDetails,
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// The parameter a SET_* code changes; `None` for every other code.
    #[must_use]
    pub fn from_code(code: OperationCode) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parameter together with a validated value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    Sync(bool),
    Oob(bool),
    NumThreads(u32),
    Time(u32),
    MsgSize(u32),
    AnycastCount(u32),
    ReadPercentage(f64),
    AllowLocalGets(bool),
    PrintInvokers(bool),
    PrintDetails(bool),
}

impl Setting {
    /// Type-checks `value` against `param`.
    ///
    /// A value of the wrong type, or outside the parameter's range, is a
    /// [`UperfError::ConfigMismatch`].
    pub fn new(param: Parameter, value: ConfigValue) -> Result<Self> {
        let name = param.name();
        let setting = match param {
            Parameter::Sync => Self::Sync(expect_bool(name, value)?),
            Parameter::Oob => Self::Oob(expect_bool(name, value)?),
            Parameter::NumThreads => Self::NumThreads(expect_int(name, value, 1..=u32::MAX)?),
            Parameter::Time => Self::Time(expect_int(name, value, 1..=u32::MAX)?),
            Parameter::MsgSize => Self::MsgSize(expect_int(name, value, 0..=MAX_PAYLOAD_SIZE)?),
            Parameter::AnycastCount => Self::AnycastCount(expect_int(name, value, 0..=u32::MAX)?),
            Parameter::ReadPercentage => Self::ReadPercentage(expect_ratio(name, value)?),
            Parameter::AllowLocalGets => Self::AllowLocalGets(expect_bool(name, value)?),
            Parameter::PrintInvokers => Self::PrintInvokers(expect_bool(name, value)?),
            Parameter::PrintDetails => Self::PrintDetails(expect_bool(name, value)?),
        };
        Ok(setting)
    }

    /// Resolves a config entry. Unknown names are a protocol error.
    pub fn from_entry(name: &str, value: ConfigValue) -> Result<Self> {
        let param = Parameter::from_name(name)
            .ok_or_else(|| UperfError::protocol(format!("field with name {name} not known")))?;
        Self::new(param, value)
    }

    #[must_use]
    pub const fn parameter(&self) -> Parameter {
        match self {
            Self::Sync(_) => Parameter::Sync,
            Self::Oob(_) => Parameter::Oob,
            Self::NumThreads(_) => Parameter::NumThreads,
            Self::Time(_) => Parameter::Time,
            Self::MsgSize(_) => Parameter::MsgSize,
            Self::AnycastCount(_) => Parameter::AnycastCount,
            Self::ReadPercentage(_) => Parameter::ReadPercentage,
            Self::AllowLocalGets(_) => Parameter::AllowLocalGets,
            Self::PrintInvokers(_) => Parameter::PrintInvokers,
            Self::PrintDetails(_) => Parameter::PrintDetails,
        }
    }

    #[must_use]
    pub const fn value(&self) -> ConfigValue {
        match *self {
            Self::Sync(b)
            | Self::Oob(b)
            | Self::AllowLocalGets(b)
            | Self::PrintInvokers(b)
            | Self::PrintDetails(b) => ConfigValue::Bool(b),
            Self::NumThreads(n) | Self::Time(n) | Self::MsgSize(n) | Self::AnycastCount(n) => {
                ConfigValue::Int(n as i64)
            }
            Self::ReadPercentage(r) => ConfigValue::Float(r),
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.parameter(), self.value())
    }
}

fn expect_bool(name: &str, value: ConfigValue) -> Result<bool> {
    match value {
        ConfigValue::Bool(b) => Ok(b),
        other => Err(UperfError::config_mismatch(name, "bool", other.type_name())),
    }
}

fn expect_int(name: &str, value: ConfigValue, range: RangeInclusive<u32>) -> Result<u32> {
    let ConfigValue::Int(i) = value else {
        return Err(UperfError::config_mismatch(name, "int", value.type_name()));
    };
    u32::try_from(i)
        .ok()
        .filter(|v| range.contains(v))
        .ok_or_else(|| {
            UperfError::config_mismatch(
                name,
                "int in range",
                format!("{i} (allowed {}..={})", range.start(), range.end()),
            )
        })
}

fn expect_ratio(name: &str, value: ConfigValue) -> Result<f64> {
    let ConfigValue::Float(r) = value else {
        return Err(UperfError::config_mismatch(name, "float", value.type_name()));
    };
    if (0.0..=1.0).contains(&r) {
        Ok(r)
    } else {
        Err(UperfError::config_mismatch(
            name,
            "float in [0, 1]",
            r.to_string(),
        ))
    }
}

/// The benchmark settings of one member.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchSettings {
    /// Wait for write acknowledgements
    pub sync: bool,
    /// Ask the receiver to process requests out of band
    pub oob: bool,
    /// Number of invoker threads per member
    pub num_threads: u32,
    /// Run duration in seconds
    pub time: u32,
    /// Payload size in bytes
    pub msg_size: u32,
    /// Number of members a write is sent to
    pub anycast_count: u32,
    /// Fraction of operations that are reads
    pub read_percentage: f64,
    /// Serve reads that pick the local member without the network
    pub allow_local_gets: bool,
    /// Log per-invoker statistics after a run
    pub print_invokers: bool,
    /// Log min/avg/max instead of avg only
    pub print_details: bool,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            sync: true,
            oob: true,
            num_threads: 100,
            time: 60,
            msg_size: 1000,
            anycast_count: 2,
            read_percentage: 0.8,
            allow_local_gets: true,
            print_invokers: false,
            print_details: false,
        }
    }
}

impl BenchSettings {
    #[must_use]
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.time))
    }

    pub fn apply(&mut self, setting: Setting) {
        match setting {
            Setting::Sync(v) => self.sync = v,
            Setting::Oob(v) => self.oob = v,
            Setting::NumThreads(v) => self.num_threads = v,
            Setting::Time(v) => self.time = v,
            Setting::MsgSize(v) => self.msg_size = v,
            Setting::AnycastCount(v) => self.anycast_count = v,
            Setting::ReadPercentage(v) => self.read_percentage = v,
            Setting::AllowLocalGets(v) => self.allow_local_gets = v,
            Setting::PrintInvokers(v) => self.print_invokers = v,
            Setting::PrintDetails(v) => self.print_details = v,
        }
    }

    #[must_use]
    pub const fn get(&self, param: Parameter) -> Setting {
        match param {
            Parameter::Sync => Setting::Sync(self.sync),
            Parameter::Oob => Setting::Oob(self.oob),
            Parameter::NumThreads => Setting::NumThreads(self.num_threads),
            Parameter::Time => Setting::Time(self.time),
            Parameter::MsgSize => Setting::MsgSize(self.msg_size),
            Parameter::AnycastCount => Setting::AnycastCount(self.anycast_count),
            Parameter::ReadPercentage => Setting::ReadPercentage(self.read_percentage),
            Parameter::AllowLocalGets => Setting::AllowLocalGets(self.allow_local_gets),
            Parameter::PrintInvokers => Setting::PrintInvokers(self.print_invokers),
            Parameter::PrintDetails => Setting::PrintDetails(self.print_details),
        }
    }

    /// Snapshot of every parameter as a config bag.
    #[must_use]
    pub fn to_config(&self) -> Config {
        Parameter::ALL
            .into_iter()
            .fold(Config::new(), |config, param| {
                config.add(param.name(), self.get(param).value())
            })
    }

    /// Applies the entries of `config` in order.
    ///
    /// Stops at the first unknown or ill-typed entry; entries before it stay
    /// applied.
    pub fn apply_config(&mut self, config: &Config) -> Result<()> {
        for entry in config.iter() {
            let setting = Setting::from_entry(&entry.name, entry.value)?;
            self.apply(setting);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_parameters() {
        for param in Parameter::ALL {
            assert_eq!(Parameter::from_code(param.code()), Some(param));
            assert_eq!(Parameter::from_name(param.name()), Some(param));
        }
        assert_eq!(Parameter::from_code(OperationCode::Read), None);
        assert_eq!(Parameter::from_code(OperationCode::QuitAll), None);
    }

    #[test]
    fn test_type_checking() {
        assert_eq!(
            Setting::new(Parameter::Sync, ConfigValue::Bool(false)).unwrap(),
            Setting::Sync(false)
        );
        assert!(matches!(
            Setting::new(Parameter::Sync, ConfigValue::Int(1)),
            Err(UperfError::ConfigMismatch { .. })
        ));
        assert!(matches!(
            Setting::new(Parameter::NumThreads, ConfigValue::Float(4.0)),
            Err(UperfError::ConfigMismatch { .. })
        ));
        assert!(matches!(
            Setting::new(Parameter::ReadPercentage, ConfigValue::Int(1)),
            Err(UperfError::ConfigMismatch { .. })
        ));
    }

    #[test]
    fn test_ranges() {
        assert!(Setting::new(Parameter::NumThreads, ConfigValue::Int(0)).is_err());
        assert!(Setting::new(Parameter::Time, ConfigValue::Int(-5)).is_err());
        assert!(Setting::new(Parameter::MsgSize, ConfigValue::Int(0)).is_ok());
        assert!(Setting::new(Parameter::MsgSize, ConfigValue::Int(64_000)).is_ok());
        assert!(matches!(
            Setting::new(Parameter::MsgSize, ConfigValue::Int(70_000)),
            Err(UperfError::ConfigMismatch { .. })
        ));
        assert!(Setting::new(Parameter::AnycastCount, ConfigValue::Int(0)).is_ok());
        assert!(Setting::new(Parameter::ReadPercentage, ConfigValue::Float(1.0)).is_ok());
        assert!(Setting::new(Parameter::ReadPercentage, ConfigValue::Float(1.01)).is_err());
        assert!(Setting::new(Parameter::ReadPercentage, ConfigValue::Float(f64::NAN)).is_err());
    }

    #[test]
    fn test_config_round_trip() {
        let mut remote = BenchSettings::default();
        remote.apply(Setting::NumThreads(4));
        remote.apply(Setting::ReadPercentage(0.5));
        remote.apply(Setting::Sync(false));
        remote.apply(Setting::PrintDetails(true));

        let mut local = BenchSettings::default();
        local.apply_config(&remote.to_config()).unwrap();
        assert_eq!(local, remote);
    }

    #[test]
    fn test_unknown_key_keeps_earlier_entries() {
        let config = Config::new()
            .add("num_threads", 7u32)
            .add("no_such_field", true)
            .add("time", 5u32);

        let mut settings = BenchSettings::default();
        let err = settings.apply_config(&config).unwrap_err();

        assert!(matches!(err, UperfError::Protocol { .. }));
        assert_eq!(settings.num_threads, 7);
        assert_eq!(settings.time, BenchSettings::default().time);
    }
}
