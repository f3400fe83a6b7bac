use std::{
    collections::TryReserveError,
    error::Error,
    fmt::{self, Display, Formatter},
    io,
};

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug)]
pub enum ProtocolError {
    NumberOfFragmentsGreaterThanWindowSize,
    IncompleteMessage,
    EmptyRecvQueue,
    RecvBufferTooSmall,
    IOError(io::Error),

    PacketTooShort(usize),
    InvalidSessionId { expected: u32, actual: u32 },
    InvalidSegmentLength(u32),
    InvalidCommand(u8),

    OutOfMemory,
    OutputNotConfigured,
    InvalidConfiguration(&'static str),
}

impl ProtocolError {
    /// Returns true for the conditions a caller is expected to poll through (nothing to receive
    /// yet, or a buffer that needs to grow) as opposed to actual failures.
    pub fn is_transient(&self) -> bool {
        match self {
            ProtocolError::EmptyRecvQueue
            | ProtocolError::IncompleteMessage
            | ProtocolError::RecvBufferTooSmall => true,
            _ => false,
        }
    }

    /// Returns true if the error was caused by a malformed or foreign inbound packet.
    pub fn is_malformed_input(&self) -> bool {
        match self {
            ProtocolError::PacketTooShort(_)
            | ProtocolError::InvalidSessionId { .. }
            | ProtocolError::InvalidSegmentLength(_)
            | ProtocolError::InvalidCommand(_) => true,
            _ => false,
        }
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ProtocolError::NumberOfFragmentsGreaterThanWindowSize => write!(
                f,
                "Number of fragments required is greater than the window size."
            ),
            ProtocolError::IncompleteMessage => write!(
                f,
                "Attempted to read an incomplete message from the recv_queue."
            ),
            ProtocolError::EmptyRecvQueue => {
                write!(f, "Attempted to recv when the recv_queue is empty.")
            }
            ProtocolError::RecvBufferTooSmall => write!(
                f,
                "Attempted to recv with a buffer too small to hold the payload."
            ),
            ProtocolError::IOError(e) => write!(f, "An IO Error occurred. Reason: {:?}.", e),
            ProtocolError::PacketTooShort(len) => write!(
                f,
                "The packet ({} bytes) is shorter than a segment header.",
                len
            ),
            ProtocolError::InvalidSessionId { expected, actual } => write!(
                f,
                "Received a segment for session {:#010x}, expected {:#010x}.",
                actual, expected
            ),
            ProtocolError::InvalidSegmentLength(len) => write!(
                f,
                "A segment declared {} payload bytes but the packet is shorter.",
                len
            ),
            ProtocolError::InvalidCommand(cmd) => {
                write!(f, "Received a segment with unknown command {}.", cmd)
            }
            ProtocolError::OutOfMemory => write!(f, "Failed to allocate memory for a segment."),
            ProtocolError::OutputNotConfigured => {
                write!(f, "Attempted to flush before an output was set.")
            }
            ProtocolError::InvalidConfiguration(s) => write!(f, "Invalid Configuration: {}", s),
        }
    }
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProtocolError::IOError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(inner: io::Error) -> ProtocolError {
        ProtocolError::IOError(inner)
    }
}

impl From<TryReserveError> for ProtocolError {
    fn from(_: TryReserveError) -> ProtocolError {
        ProtocolError::OutOfMemory
    }
}

impl PartialEq for ProtocolError {
    fn eq(&self, other: &ProtocolError) -> bool {
        match (self, other) {
            (
                ProtocolError::NumberOfFragmentsGreaterThanWindowSize,
                ProtocolError::NumberOfFragmentsGreaterThanWindowSize,
            ) => true,
            (ProtocolError::IncompleteMessage, ProtocolError::IncompleteMessage) => true,
            (ProtocolError::EmptyRecvQueue, ProtocolError::EmptyRecvQueue) => true,
            (ProtocolError::RecvBufferTooSmall, ProtocolError::RecvBufferTooSmall) => true,
            (ProtocolError::PacketTooShort(a), ProtocolError::PacketTooShort(b)) => a == b,
            (
                ProtocolError::InvalidSessionId {
                    expected: e1,
                    actual: a1,
                },
                ProtocolError::InvalidSessionId {
                    expected: e2,
                    actual: a2,
                },
            ) => e1 == e2 && a1 == a2,
            (ProtocolError::InvalidSegmentLength(a), ProtocolError::InvalidSegmentLength(b)) => {
                a == b
            }
            (ProtocolError::InvalidCommand(a), ProtocolError::InvalidCommand(b)) => a == b,
            (ProtocolError::OutOfMemory, ProtocolError::OutOfMemory) => true,
            (ProtocolError::OutputNotConfigured, ProtocolError::OutputNotConfigured) => true,
            (ProtocolError::InvalidConfiguration(_), ProtocolError::InvalidConfiguration(_)) => {
                true
            }
            (ProtocolError::IOError(_), ProtocolError::IOError(_)) => true,
            (_, _) => false,
        }
    }
}
