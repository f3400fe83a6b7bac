//! Reliable, ordered messaging over an unreliable datagram channel.
//!
//! `swallow` re-exports the protocol engine. A connection is driven entirely by its owner: hand
//! it every datagram received from the peer, install an output that writes datagrams to the
//! peer, and call `update` on a fixed tick (or when `check` says so).
//!
//! ```
//! use swallow::{Config, ReliableConnection};
//!
//! let config = Config::new(0x1122_3344).with_nodelay(1, 10, 2, false);
//! let mut connection = ReliableConnection::with_config(config)?;
//! connection.set_output(|packet: &[u8]| {
//!     // socket.send_to(packet, peer)
//!     assert!(packet.len() <= 1400);
//!     Ok(())
//! });
//!
//! connection.send(b"hello")?;
//! connection.update(0)?;
//! assert_eq!(connection.wait_send(), 1);
//! # Ok::<(), swallow::ProtocolError>(())
//! ```

pub use swallow_protocol::*;
