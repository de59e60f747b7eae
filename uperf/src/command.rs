//! Typed commands of the control protocol.
//!
//! [`Command`] is the closed set of actions a member performs on request.
//! Invocations arrive as a raw code plus an untyped argument list;
//! [`Command::decode`] is the single place where they are checked.

use uperf_common::{Arg, ConfigValue, Invocation, OperationCode};

use crate::{
    error::{Result, UperfError},
    settings::{Parameter, Setting},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartRun,
    Read { key: i64 },
    Write { key: i64, payload: Vec<u8> },
    GetConfig,
    Set(Setting),
    QuitAll,
}

impl Command {
    #[must_use]
    pub const fn code(&self) -> OperationCode {
        match self {
            Self::StartRun => OperationCode::StartRun,
            Self::Read { .. } => OperationCode::Read,
            Self::Write { .. } => OperationCode::Write,
            Self::GetConfig => OperationCode::GetConfig,
            Self::Set(setting) => setting.parameter().code(),
            Self::QuitAll => OperationCode::QuitAll,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Invocation {
        let args = match self {
            Self::StartRun | Self::GetConfig | Self::QuitAll => Vec::new(),
            Self::Read { key } => vec![Arg::Int(*key)],
            Self::Write { key, payload } => vec![Arg::Int(*key), Arg::Bytes(payload.clone())],
            Self::Set(setting) => vec![value_to_arg(setting.value())],
        };
        Invocation::new(self.code(), args)
    }

    /// Checks an invocation against the argument list of its code.
    pub fn decode(invocation: Invocation) -> Result<Self> {
        let code = invocation
            .operation()
            .ok_or_else(|| UperfError::unknown_operation(invocation.code))?;
        let mut args = invocation.args.into_iter();

        let command = match code {
            OperationCode::StartRun => Self::StartRun,
            OperationCode::GetConfig => Self::GetConfig,
            OperationCode::QuitAll => Self::QuitAll,
            OperationCode::Read => Self::Read {
                key: expect_key(code, args.next())?,
            },
            OperationCode::Write => {
                let key = expect_key(code, args.next())?;
                let payload = match args.next() {
                    Some(Arg::Bytes(payload)) => payload,
                    other => return Err(malformed(code, "payload", other.as_ref())),
                };
                Self::Write { key, payload }
            }
            OperationCode::SetSync
            | OperationCode::SetOob
            | OperationCode::SetNumThreads
            | OperationCode::SetTime
            | OperationCode::SetMsgSize
            | OperationCode::SetAnycastCount
            | OperationCode::SetReadPercentage
            | OperationCode::SetAllowLocalGets
            | OperationCode::SetPrintInvokers
            | OperationCode::SetPrintDetails => {
                let param = Parameter::from_code(code).ok_or_else(|| {
                    UperfError::internal(format!("{code} has no matching parameter"))
                })?;
                let value = match args.next() {
                    Some(arg) => arg_to_value(param, arg)?,
                    None => return Err(malformed(code, "value", None)),
                };
                Self::Set(Setting::new(param, value)?)
            }
        };

        if args.next().is_some() {
            return Err(UperfError::protocol(format!("{code}: too many arguments")));
        }
        Ok(command)
    }
}

fn expect_key(code: OperationCode, arg: Option<Arg>) -> Result<i64> {
    match arg {
        Some(Arg::Int(key)) => Ok(key),
        other => Err(malformed(code, "key", other.as_ref())),
    }
}

fn malformed(code: OperationCode, what: &str, found: Option<&Arg>) -> UperfError {
    let found = found.map_or("nothing", Arg::type_name);
    UperfError::protocol(format!("{code}: malformed {what} argument ({found})"))
}

const fn value_to_arg(value: ConfigValue) -> Arg {
    match value {
        ConfigValue::Bool(b) => Arg::Bool(b),
        ConfigValue::Int(i) => Arg::Int(i),
        ConfigValue::Float(x) => Arg::Float(x),
    }
}

fn arg_to_value(param: Parameter, arg: Arg) -> Result<ConfigValue> {
    match arg {
        Arg::Bool(b) => Ok(ConfigValue::Bool(b)),
        Arg::Int(i) => Ok(ConfigValue::Int(i)),
        Arg::Float(x) => Ok(ConfigValue::Float(x)),
        Arg::Bytes(_) => Err(UperfError::config_mismatch(
            param.name(),
            "scalar",
            "bytes",
        )),
    }
}
