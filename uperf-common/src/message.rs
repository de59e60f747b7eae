//! Datagram format of the uperf command protocol.
//!
//! Every datagram carries exactly one archived [`UperfMessage`]. Requests are
//! correlated with their replies through `request_id`, which is chosen by the
//! caller and echoed back unchanged.

use rkyv::{rancor::Error as RkyvError, util::AlignedVec, Archive};
use serde::{Deserialize, Serialize};

use crate::{config::Config, constants::UPERF_MAGIC, op::OperationCode, stats::Results};

/// The request may be processed out of order on the receiving member.
pub const FLAG_OOB: u32 = 1 << 0;

/// The caller does not wait for a reply; the receiver must not send one.
pub const FLAG_NO_RESPONSE: u32 = 1 << 1;

/// A single argument of an invocation.
#[derive(Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Arg {
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl Arg {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Operation code plus its argument list, as delivered to a dispatcher.
///
/// `code` is kept as a raw integer so that a member can receive, and reject,
/// codes it does not know.
#[derive(Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Invocation {
    pub code: u16,
    pub args: Vec<Arg>,
}

impl Invocation {
    #[must_use]
    pub fn new(code: OperationCode, args: Vec<Arg>) -> Self {
        Self {
            code: code.into(),
            args,
        }
    }

    /// The decoded operation code, if it belongs to the closed enumeration.
    #[must_use]
    pub fn operation(&self) -> Option<OperationCode> {
        OperationCode::try_from(self.code).ok()
    }
}

/// Value returned by a dispatcher.
#[derive(Archive, rkyv::Serialize, rkyv::Deserialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Reply {
    Empty,
    Payload(Vec<u8>),
    Config(Config),
    Results(Results),
}

#[derive(Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum MessageBody {
    Request(Invocation),
    Reply(Reply),
    /// The remote dispatcher rejected the request.
    Failure(String),
}

/// Structure representing a uperf datagram.
#[derive(Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct UperfMessage {
    /// Magic number for message validation.
    pub magic: u32,
    /// Caller-chosen correlation id.
    pub request_id: u64,
    /// Combination of `FLAG_*` bits.
    pub flags: u32,
    pub body: MessageBody,
}

impl UperfMessage {
    #[must_use]
    pub const fn request(request_id: u64, flags: u32, invocation: Invocation) -> Self {
        Self {
            magic: UPERF_MAGIC,
            request_id,
            flags,
            body: MessageBody::Request(invocation),
        }
    }

    #[must_use]
    pub const fn reply(request_id: u64, reply: Reply) -> Self {
        Self {
            magic: UPERF_MAGIC,
            request_id,
            flags: 0,
            body: MessageBody::Reply(reply),
        }
    }

    #[must_use]
    pub const fn failure(request_id: u64, message: String) -> Self {
        Self {
            magic: UPERF_MAGIC,
            request_id,
            flags: 0,
            body: MessageBody::Failure(message),
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == UPERF_MAGIC
    }

    #[must_use]
    pub const fn is_oob(&self) -> bool {
        self.flags & FLAG_OOB != 0
    }

    #[must_use]
    pub const fn expects_response(&self) -> bool {
        self.flags & FLAG_NO_RESPONSE == 0
    }
}

/// Serializes a message into its datagram representation.
pub fn encode(msg: &UperfMessage) -> Result<AlignedVec, RkyvError> {
    rkyv::to_bytes::<RkyvError>(msg)
}

/// Validates and deserializes a datagram.
///
/// The bytes are copied into an aligned buffer first, receive buffers carry
/// no alignment guarantee.
pub fn decode(bytes: &[u8]) -> Result<UperfMessage, RkyvError> {
    let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<UperfMessage, RkyvError>(&aligned)
}
