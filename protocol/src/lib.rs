//! An ARQ protocol engine providing reliable, ordered delivery of messages over an unreliable,
//! unordered datagram channel.
//!
//! The engine never touches a socket or a clock. Raw inbound packets are handed to
//! [`ReliableConnection::input`], outbound packets leave through the closure installed with
//! [`ReliableConnection::set_output`], and time advances only through
//! [`ReliableConnection::update`], whose next due time can be queried with
//! [`ReliableConnection::check`].

mod config;
mod connection;
mod errors;
mod log_mask;
mod metrics;
mod output;
mod segment;
mod segment_store;

pub use crate::{
    config::Config,
    connection::{ConnectionState, ReliableConnection},
    errors::{ProtocolError, ProtocolResult},
    log_mask::LogMask,
    metrics::{DataPoint, Metrics},
    output::OutputFn,
    segment::{read_session_id, Command},
};

/// No delay min rto
pub const RTO_NDL: u32 = 30;
/// Normal min rto
pub const RTO_MIN: u32 = 100;
pub const RTO_DEF: u32 = 200;
pub const RTO_MAX: u32 = 60_000;

pub const CMD_PUSH: u8 = 81;
pub const CMD_ACK: u8 = 82;
/// Window probe (ask)
pub const CMD_WASK: u8 = 83;
/// Window size (tell)
pub const CMD_WINS: u8 = 84;

/// Need to send CMD_WASK
pub(crate) const ASK_SEND: u32 = 1;
/// Need to send CMD_WINS
pub(crate) const ASK_TELL: u32 = 2;

pub const SEND_WINDOW_SIZE: u32 = 32;
/// Must be >= the max number of fragments of a single message.
pub const RECV_WINDOW_SIZE: u32 = 128;

pub const DEFAULT_MTU: usize = 1400;
pub const MIN_MTU: usize = 50;
/// Size of the segment header on the wire.
pub const PROTOCOL_OVERHEAD: usize = 24;

pub const INTERVAL: u32 = 100;
pub const MIN_INTERVAL: u32 = 10;
pub const MAX_INTERVAL: u32 = 5000;

pub const DEADLINK: u32 = 20;
pub const THRESH_INIT: u32 = 2;
pub const THRESH_MIN: u32 = 2;
/// 7 secs to probe window size
pub const PROBE_INIT: u32 = 7000;
/// Up to 120 secs to probe window
pub const PROBE_LIMIT: u32 = 120_000;
/// Max times a single segment may be fast retransmitted
pub const FASTACK_LIMIT: u32 = 5;

/// A gap between `update` calls larger than this is treated as a clock jump.
pub(crate) const CLOCK_JUMP_LIMIT: i32 = 10_000;
