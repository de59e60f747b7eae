//! Operation codes understood by every cluster member.
//!
//! The numeric identity of each code is part of the wire protocol and must
//! never change: members do not negotiate it.

use core::fmt;

/// Enum representing a control verb of the uperf command protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum OperationCode {
    StartRun = 0,
    Read = 1,
    Write = 2,
    GetConfig = 3,
    SetSync = 4,
    SetOob = 5,
    SetNumThreads = 6,
    SetTime = 7,
    SetMsgSize = 8,
    SetAnycastCount = 9,
    SetReadPercentage = 10,
    SetAllowLocalGets = 11,
    SetPrintInvokers = 12,
    SetPrintDetails = 13,
    QuitAll = 14,
}

impl OperationCode {
    /// Converts a `u16` value to an `OperationCode` if possible.
    const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::StartRun),
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::GetConfig),
            4 => Some(Self::SetSync),
            5 => Some(Self::SetOob),
            6 => Some(Self::SetNumThreads),
            7 => Some(Self::SetTime),
            8 => Some(Self::SetMsgSize),
            9 => Some(Self::SetAnycastCount),
            10 => Some(Self::SetReadPercentage),
            11 => Some(Self::SetAllowLocalGets),
            12 => Some(Self::SetPrintInvokers),
            13 => Some(Self::SetPrintDetails),
            14 => Some(Self::QuitAll),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StartRun => "START_RUN",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::GetConfig => "GET_CONFIG",
            Self::SetSync => "SET_SYNC",
            Self::SetOob => "SET_OOB",
            Self::SetNumThreads => "SET_NUM_THREADS",
            Self::SetTime => "SET_TIME",
            Self::SetMsgSize => "SET_MSG_SIZE",
            Self::SetAnycastCount => "SET_ANYCAST_COUNT",
            Self::SetReadPercentage => "SET_READ_PERCENTAGE",
            Self::SetAllowLocalGets => "SET_ALLOW_LOCAL_GETS",
            Self::SetPrintInvokers => "SET_PRINT_INVOKERS",
            Self::SetPrintDetails => "SET_PRINT_DETAILS",
            Self::QuitAll => "QUIT_ALL",
        }
    }
}

impl From<OperationCode> for u16 {
    #[inline(always)]
    fn from(val: OperationCode) -> Self {
        val as Self
    }
}

impl TryFrom<u16> for OperationCode {
    type Error = ();

    /// Attempts to convert a `u16` to an `OperationCode`.
    ///
    /// Returns `Err(())` for codes outside the closed enumeration.
    #[inline(always)]
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_u16(value).ok_or(())
    }
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), *self as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(u16::from(OperationCode::StartRun), 0);
        assert_eq!(u16::from(OperationCode::Read), 1);
        assert_eq!(u16::from(OperationCode::Write), 2);
        assert_eq!(u16::from(OperationCode::GetConfig), 3);
        assert_eq!(u16::from(OperationCode::SetSync), 4);
        assert_eq!(u16::from(OperationCode::SetPrintDetails), 13);
        assert_eq!(u16::from(OperationCode::QuitAll), 14);
    }

    #[test]
    fn test_try_from() {
        for code in 0..=14u16 {
            let op = OperationCode::try_from(code).unwrap();
            assert_eq!(u16::from(op), code);
        }
        assert!(OperationCode::try_from(15).is_err());
        assert!(OperationCode::try_from(u16::MAX).is_err());
    }
}
