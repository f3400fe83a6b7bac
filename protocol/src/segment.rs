use crate::{
    ProtocolError, ProtocolResult, CMD_ACK, CMD_PUSH, CMD_WASK, CMD_WINS, PROTOCOL_OVERHEAD,
};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::Cursor;

/// The command a segment carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Payload data.
    Push,
    /// Acknowledges a single sequence number.
    Ack,
    /// Asks the peer for its receive window.
    WindowAsk,
    /// Tells the peer our receive window.
    WindowTell,
}

impl Command {
    pub fn from_u8(cmd: u8) -> Option<Command> {
        match cmd {
            CMD_PUSH => Some(Command::Push),
            CMD_ACK => Some(Command::Ack),
            CMD_WASK => Some(Command::WindowAsk),
            CMD_WINS => Some(Command::WindowTell),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Command::Push => CMD_PUSH,
            Command::Ack => CMD_ACK,
            Command::WindowAsk => CMD_WASK,
            Command::WindowTell => CMD_WINS,
        }
    }
}

/// A fragment of a user message, or a control frame.
///
/// `resend_time`, `rto`, `fastack` and `xmit` only carry meaning while the segment sits in the
/// send buffer.
#[derive(Debug)]
pub struct Segment {
    pub(crate) session_id: u32,
    pub(crate) command: Command,
    /// Number of fragments following this one in the same message. 0 is the last fragment.
    pub(crate) fragment_id: u8,
    pub(crate) window_size: u16,
    pub(crate) timestamp: u32,
    pub(crate) sequence_num: u32,
    pub(crate) unacked_sequence_num: u32,
    pub(crate) resend_time: u32,
    pub(crate) rto: u32,
    pub(crate) fastack: u32,
    pub(crate) xmit: u32,
    pub(crate) data: BytesMut,
}

impl Default for Segment {
    fn default() -> Self {
        Segment::new(BytesMut::new())
    }
}

impl Segment {
    pub fn new(data: BytesMut) -> Self {
        Self {
            session_id: 0,
            command: Command::Push,
            fragment_id: 0,
            window_size: 0,
            timestamp: 0,
            sequence_num: 0,
            unacked_sequence_num: 0,
            resend_time: 0,
            rto: 0,
            fastack: 0,
            xmit: 0,
            data,
        }
    }

    /// A payload-less segment used for acks and window probes.
    pub(crate) fn control(
        session_id: u32,
        command: Command,
        window_size: u16,
        unacked_sequence_num: u32,
    ) -> Self {
        Self {
            session_id,
            command,
            window_size,
            unacked_sequence_num,
            ..Segment::default()
        }
    }

    /// Copies a received PUSH segment out of the packet buffer.
    pub(crate) fn from_inbound(inbound: &InboundSegment) -> ProtocolResult<Self> {
        let header = &inbound.header;
        let mut segment = Segment::new(allocate_payload(&[inbound.payload])?);
        segment.session_id = header.session_id;
        segment.command = header.command;
        segment.fragment_id = header.fragment_id;
        segment.window_size = header.window_size;
        segment.timestamp = header.timestamp;
        segment.sequence_num = header.sequence_num;
        segment.unacked_sequence_num = header.unacked_sequence_num;
        Ok(segment)
    }

    /// Number of bytes this segment occupies on the wire.
    #[inline]
    pub(crate) fn encoded_len(&self) -> usize {
        PROTOCOL_OVERHEAD + self.data.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u32_le(self.session_id);
        buf.put_u8(self.command.as_u8());
        buf.put_u8(self.fragment_id);
        buf.put_u16_le(self.window_size);
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.sequence_num);
        buf.put_u32_le(self.unacked_sequence_num);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
    }
}

/// The fixed 24 byte header preceding every segment on the wire.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SegmentHeader {
    pub(crate) session_id: u32,
    pub(crate) command: Command,
    pub(crate) fragment_id: u8,
    pub(crate) window_size: u16,
    pub(crate) timestamp: u32,
    pub(crate) sequence_num: u32,
    pub(crate) unacked_sequence_num: u32,
    pub(crate) len: u32,
}

/// A decoded segment still borrowing its payload from the packet.
#[derive(Debug)]
pub(crate) struct InboundSegment<'a> {
    pub(crate) header: SegmentHeader,
    pub(crate) payload: &'a [u8],
}

impl SegmentHeader {
    /// Reads one header and validates it against the rest of the packet. The checks run in wire
    /// order: session id, declared length, command.
    fn decode(cursor: &mut Cursor<&[u8]>, expected_session_id: u32) -> ProtocolResult<Self> {
        let session_id = cursor.read_u32::<LittleEndian>()?;
        if session_id != expected_session_id {
            return Err(ProtocolError::InvalidSessionId {
                expected: expected_session_id,
                actual: session_id,
            });
        }
        let command = cursor.read_u8()?;
        let fragment_id = cursor.read_u8()?;
        let window_size = cursor.read_u16::<LittleEndian>()?;
        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let sequence_num = cursor.read_u32::<LittleEndian>()?;
        let unacked_sequence_num = cursor.read_u32::<LittleEndian>()?;
        let len = cursor.read_u32::<LittleEndian>()?;

        if remaining(cursor) < len as usize {
            return Err(ProtocolError::InvalidSegmentLength(len));
        }
        let command = Command::from_u8(command).ok_or(ProtocolError::InvalidCommand(command))?;

        Ok(Self {
            session_id,
            command,
            fragment_id,
            window_size,
            timestamp,
            sequence_num,
            unacked_sequence_num,
            len,
        })
    }
}

/// Splits a packet into its segments. Either every segment is valid or an error is returned;
/// trailing bytes too short to hold a header are ignored. Returns the segments and the number of
/// bytes they span.
pub(crate) fn decode_packet(
    packet: &[u8],
    expected_session_id: u32,
) -> ProtocolResult<(Vec<InboundSegment<'_>>, usize)> {
    if packet.len() < PROTOCOL_OVERHEAD {
        return Err(ProtocolError::PacketTooShort(packet.len()));
    }

    let mut segments = Vec::new();
    let mut cursor = Cursor::new(packet);
    while remaining(&cursor) >= PROTOCOL_OVERHEAD {
        let header = SegmentHeader::decode(&mut cursor, expected_session_id)?;
        let start = cursor.position() as usize;
        let end = start + header.len as usize;
        cursor.set_position(end as u64);
        segments.push(InboundSegment {
            header,
            payload: &packet[start..end],
        });
    }
    Ok((segments, cursor.position() as usize))
}

/// Reads the session id of a raw packet without validating the rest of it.
pub fn read_session_id(packet: &[u8]) -> Option<u32> {
    if packet.len() < PROTOCOL_OVERHEAD {
        return None;
    }
    Cursor::new(packet).read_u32::<LittleEndian>().ok()
}

/// Allocates an exact fit payload holding the concatenation of `parts`, reporting failure instead
/// of aborting.
pub(crate) fn allocate_payload(parts: &[&[u8]]) -> ProtocolResult<BytesMut> {
    let len = parts.iter().map(|part| part.len()).sum();
    let mut data = Vec::new();
    data.try_reserve_exact(len)?;
    for part in parts {
        data.extend_from_slice(part);
    }
    Ok(BytesMut::from(data))
}

#[inline]
fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor
        .get_ref()
        .len()
        .saturating_sub(cursor.position() as usize)
}

#[cfg(test)]
mod test {
    use super::{decode_packet, read_session_id, Command, Segment};
    use crate::{ProtocolError, PROTOCOL_OVERHEAD};
    use bytes::BytesMut;

    fn push_segment(session_id: u32, sequence_num: u32, payload: &str) -> Segment {
        let mut segment = Segment::new(BytesMut::from(payload.as_bytes()));
        segment.session_id = session_id;
        segment.command = Command::Push;
        segment.fragment_id = 2;
        segment.window_size = 0x0102;
        segment.timestamp = 0x0a0b_0c0d;
        segment.sequence_num = sequence_num;
        segment.unacked_sequence_num = 7;
        segment
    }

    #[test]
    fn encodes_header_little_endian() {
        let mut buf = BytesMut::new();
        push_segment(0x1122_3344, 0x0506_0708, "hi").encode(&mut buf);
        assert_eq!(buf.len(), PROTOCOL_OVERHEAD + 2);
        assert_eq!(
            &buf[..],
            &[
                0x44, 0x33, 0x22, 0x11, // session id
                81, 2, // command, fragment
                0x02, 0x01, // window
                0x0d, 0x0c, 0x0b, 0x0a, // timestamp
                0x08, 0x07, 0x06, 0x05, // sequence
                7, 0, 0, 0, // una
                2, 0, 0, 0, // len
                b'h', b'i',
            ][..]
        );
    }

    #[test]
    fn decodes_concatenated_segments() {
        let mut buf = BytesMut::new();
        push_segment(9, 1, "first").encode(&mut buf);
        Segment::control(9, Command::Ack, 32, 4).encode(&mut buf);
        push_segment(9, 2, "").encode(&mut buf);

        let (segments, consumed) = decode_packet(&buf, 9).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].header.sequence_num, 1);
        assert_eq!(segments[0].header.fragment_id, 2);
        assert_eq!(segments[0].header.window_size, 0x0102);
        assert_eq!(segments[0].payload, b"first");
        assert_eq!(segments[1].header.command, Command::Ack);
        assert_eq!(segments[1].header.window_size, 32);
        assert_eq!(segments[1].header.unacked_sequence_num, 4);
        assert!(segments[2].payload.is_empty());
    }

    #[test]
    fn ignores_trailing_bytes_shorter_than_a_header() {
        let mut buf = BytesMut::new();
        push_segment(1, 0, "abc").encode(&mut buf);
        buf.extend_from_slice(&[0u8; 10]);
        let (segments, consumed) = decode_packet(&buf, 1).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(consumed, PROTOCOL_OVERHEAD + 3);
    }

    #[test]
    fn rejects_short_packets() {
        assert_eq!(
            decode_packet(&[0u8; 23], 0).unwrap_err(),
            ProtocolError::PacketTooShort(23)
        );
    }

    #[test]
    fn rejects_packet_if_any_segment_is_foreign() {
        let mut buf = BytesMut::new();
        push_segment(1, 0, "ok").encode(&mut buf);
        push_segment(2, 1, "foreign").encode(&mut buf);
        assert_eq!(
            decode_packet(&buf, 1).unwrap_err(),
            ProtocolError::InvalidSessionId {
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut buf = BytesMut::new();
        push_segment(1, 0, "truncated").encode(&mut buf);
        let truncated = &buf[..buf.len() - 1];
        assert_eq!(
            decode_packet(truncated, 1).unwrap_err(),
            ProtocolError::InvalidSegmentLength(9)
        );
    }

    #[test]
    fn rejects_unknown_command() {
        let mut buf = BytesMut::new();
        push_segment(1, 0, "").encode(&mut buf);
        buf[4] = 99;
        assert_eq!(
            decode_packet(&buf, 1).unwrap_err(),
            ProtocolError::InvalidCommand(99)
        );
    }

    #[test]
    fn reads_session_id_of_raw_packet() {
        let mut buf = BytesMut::new();
        push_segment(0xdead_beef, 0, "").encode(&mut buf);
        assert_eq!(read_session_id(&buf), Some(0xdead_beef));
        assert_eq!(read_session_id(&buf[..4]), None);
    }

    #[test]
    fn command_codes_round_trip() {
        for cmd in 0..=255u8 {
            if let Some(command) = Command::from_u8(cmd) {
                assert_eq!(command.as_u8(), cmd);
            }
        }
        assert_eq!(Command::from_u8(81), Some(Command::Push));
        assert_eq!(Command::from_u8(84), Some(Command::WindowTell));
        assert_eq!(Command::from_u8(80), None);
    }
}
