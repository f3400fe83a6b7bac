use crate::{
    config::Config,
    log_mask::LogMask,
    metrics::{DataPoint, Metrics},
    output::PacketWriter,
    segment::{allocate_payload, decode_packet, Command, Segment},
    segment_store::{SegmentKey, SegmentQueue, SegmentStore},
    ProtocolError, ProtocolResult, ASK_SEND, ASK_TELL, CLOCK_JUMP_LIMIT, DEADLINK, DEFAULT_MTU,
    FASTACK_LIMIT, INTERVAL, MAX_INTERVAL, MIN_INTERVAL, MIN_MTU, PROBE_INIT, PROBE_LIMIT,
    PROTOCOL_OVERHEAD, RECV_WINDOW_SIZE, RTO_DEF, RTO_MAX, RTO_MIN, RTO_NDL, SEND_WINDOW_SIZE,
    THRESH_INIT, THRESH_MIN,
};
use bytes::BytesMut;
use log::{debug, warn};
use std::{cmp, io};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    /// A segment reached the dead link transmission count. Never cleared.
    Dead,
}

/// One end of an ARQ session.
///
/// Single threaded: `send`, `recv`, `input` and `update` must be serialized by the caller.
pub struct ReliableConnection {
    session_id: u32,
    max_transmission_unit: usize,
    max_segment_size: usize,
    connection_state: ConnectionState,

    unacked_send_sequence_num: u32,
    next_send_sequence_num: u32,
    next_recv_sequence_num: u32,

    ssthresh: u32,

    smoothed_rtt: u32,
    rtt_variance: u32,
    calculated_rto: u32,
    minimum_rto: u32,

    send_window_size: u32,
    recv_window_size: u32,
    remote_window_size: u32,
    congestion_window_size: u32,
    // Byte granular congestion window accumulator
    incr: u32,

    probe: u32,
    next_probe_time: u32,
    probe_wait: u32,

    current_time: u32,
    interval: u32,
    next_flush_time: u32,
    update_called: bool,

    // Number of timeout retransmissions over the life of the connection
    xmit: u32,
    nodelay: u32,
    // Maximum number of transmissions of a single segment
    dead_link: u32,
    // Number of skipped acks that trigger a fast retransmission
    fast_resend: u32,
    fast_limit: u32,
    use_congestion_control: bool,
    in_streaming_mode: bool,
    fastack_conserve: bool,

    store: SegmentStore,
    send_queue: SegmentQueue,
    send_buffer: SegmentQueue,
    recv_queue: SegmentQueue,
    recv_buffer: SegmentQueue,

    // (sequence_num, timestamp) of every data segment to acknowledge on the next flush
    ack_list: Vec<(u32, u32)>,
    writer: PacketWriter,

    log_mask: LogMask,
    metrics: Metrics,
}

impl ReliableConnection {
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            max_transmission_unit: DEFAULT_MTU,
            max_segment_size: DEFAULT_MTU - PROTOCOL_OVERHEAD,
            connection_state: ConnectionState::Connected,

            unacked_send_sequence_num: 0,
            next_send_sequence_num: 0,
            next_recv_sequence_num: 0,

            ssthresh: THRESH_INIT,

            smoothed_rtt: 0,
            rtt_variance: 0,
            calculated_rto: RTO_DEF,
            minimum_rto: RTO_MIN,

            send_window_size: SEND_WINDOW_SIZE,
            recv_window_size: RECV_WINDOW_SIZE,
            remote_window_size: RECV_WINDOW_SIZE,
            congestion_window_size: 0,
            incr: 0,

            probe: 0,
            next_probe_time: 0,
            probe_wait: 0,

            current_time: 0,
            interval: INTERVAL,
            next_flush_time: INTERVAL,
            update_called: false,

            xmit: 0,
            nodelay: 0,
            dead_link: DEADLINK,
            fast_resend: 0,
            fast_limit: FASTACK_LIMIT,
            use_congestion_control: true,
            in_streaming_mode: false,
            fastack_conserve: true,

            store: SegmentStore::new(),
            send_queue: SegmentQueue::new(),
            send_buffer: SegmentQueue::new(),
            recv_queue: SegmentQueue::new(),
            recv_buffer: SegmentQueue::new(),

            ack_list: Vec::new(),
            writer: PacketWriter::new(DEFAULT_MTU),

            log_mask: LogMask::NONE,
            metrics: Metrics::new(),
        }
    }

    /// Creates a connection from `config`, rejecting values the engine cannot run with.
    pub fn with_config(config: Config) -> ProtocolResult<Self> {
        if config.send_window_size == 0 {
            return Err(ProtocolError::InvalidConfiguration(
                "Send window size must be positive.",
            ));
        }
        let mut connection = Self::new(config.session_id);
        connection.set_mtu(config.mtu)?;
        connection.set_dead_link(config.dead_link)?;
        connection.set_window_sizes(config.send_window_size, config.recv_window_size);
        connection.nodelay = config.nodelay;
        connection.minimum_rto = config.minimum_rto.unwrap_or(if config.nodelay == 0 {
            RTO_MIN
        } else {
            RTO_NDL
        });
        connection.set_interval(config.interval);
        connection.fast_resend = config.fast_resend;
        connection.fast_limit = config.fast_limit;
        connection.use_congestion_control = config.use_congestion_control;
        connection.in_streaming_mode = config.stream_mode;
        connection.fastack_conserve = config.fastack_conserve;
        connection.log_mask = config.log_mask;
        Ok(connection)
    }

    /// Installs the sink every outgoing packet is handed to.
    pub fn set_output<F>(&mut self, output: F)
    where
        F: FnMut(&[u8]) -> io::Result<()> + Send + 'static,
    {
        self.writer.set_output(Box::new(output));
    }

    /// Consumes the next complete message into `buffer` and returns its length.
    pub fn recv(&mut self, buffer: &mut [u8]) -> ProtocolResult<usize> {
        let peek_size = self.peek_size()?;
        if peek_size > buffer.len() {
            return Err(ProtocolError::RecvBufferTooSmall);
        }

        let recover = self.recv_queue.len() >= self.recv_window_size as usize;

        let mut offset = 0;
        while let Some(key) = self.store.pop_front(&mut self.recv_queue) {
            let segment = self.store.release(key);
            let end = offset + segment.data.len();
            buffer[offset..end].copy_from_slice(&segment.data);
            offset = end;

            if self.log_mask.enabled(LogMask::RECV) {
                debug!("recv sn={}", segment.sequence_num);
            }
            if segment.fragment_id == 0 {
                break;
            }
        }
        debug_assert_eq!(offset, peek_size);

        self.promote_recv_buffer();

        // Tell the peer about the reopened window instead of waiting for its probe.
        if self.recv_queue.len() < self.recv_window_size as usize && recover {
            self.probe |= ASK_TELL;
        }

        Ok(offset)
    }

    /// Copies the next complete message into `buffer` without consuming it.
    pub fn peek(&self, buffer: &mut [u8]) -> ProtocolResult<usize> {
        let peek_size = self.peek_size()?;
        if peek_size > buffer.len() {
            return Err(ProtocolError::RecvBufferTooSmall);
        }

        let mut offset = 0;
        for segment in self.store.iter(&self.recv_queue) {
            let end = offset + segment.data.len();
            buffer[offset..end].copy_from_slice(&segment.data);
            offset = end;
            if segment.fragment_id == 0 {
                break;
            }
        }
        Ok(offset)
    }

    /// Consumes the next complete message into a newly allocated buffer of exactly its size.
    pub fn recv_bytes(&mut self) -> ProtocolResult<BytesMut> {
        let peek_size = self.peek_size()?;
        let mut data = Vec::new();
        data.try_reserve_exact(peek_size)?;
        data.resize(peek_size, 0);
        let len = self.recv(&mut data)?;
        data.truncate(len);
        Ok(BytesMut::from(data))
    }

    /// Size of the next complete message in the receive queue.
    pub fn peek_size(&self) -> ProtocolResult<usize> {
        let front = self
            .recv_queue
            .front()
            .ok_or(ProtocolError::EmptyRecvQueue)?;

        let segment = self.store.get(front);
        if segment.fragment_id == 0 {
            return Ok(segment.data.len());
        }

        if self.recv_queue.len() < segment.fragment_id as usize + 1 {
            return Err(ProtocolError::IncompleteMessage);
        }

        let mut length = 0;
        for segment in self.store.iter(&self.recv_queue) {
            length += segment.data.len();
            if segment.fragment_id == 0 {
                break;
            }
        }
        Ok(length)
    }

    /// Queues `payload` for transmission and returns the number of bytes accepted. Nothing is
    /// transmitted until the next flush.
    pub fn send(&mut self, payload: &[u8]) -> ProtocolResult<usize> {
        let mut sent = 0;

        if self.in_streaming_mode {
            if let Some(tail) = self.send_queue.back() {
                let old_len = self.store.get(tail).data.len();
                if old_len < self.max_segment_size {
                    let extend = cmp::min(payload.len(), self.max_segment_size - old_len);
                    if extend > 0 {
                        let old_data = &self.store.get(tail).data[..];
                        let data = allocate_payload(&[old_data, &payload[..extend]])?;
                        let segment = self.store.get_mut(tail);
                        segment.data = data;
                        segment.fragment_id = 0;
                        sent = extend;
                    }
                }
            }
            if sent == payload.len() {
                return Ok(sent);
            }
        }

        match self.queue_fragments(&payload[sent..]) {
            Ok(queued) => Ok(sent + queued),
            Err(e) if sent > 0 => {
                debug!("appended {} bytes, rejected the remainder: {}", sent, e);
                Ok(sent)
            }
            Err(e) => Err(e),
        }
    }

    /// Processes one raw packet from the peer and returns the number of bytes consumed.
    ///
    /// Every segment header in the packet is validated before any of them is applied, so a
    /// malformed or foreign packet leaves the connection untouched.
    pub fn input(&mut self, packet: &[u8]) -> ProtocolResult<usize> {
        if self.log_mask.enabled(LogMask::INPUT) {
            debug!("[RI] {} bytes", packet.len());
        }

        let (segments, consumed) = match decode_packet(packet, self.session_id) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.metrics.increment(DataPoint::PacketsInvalid);
                debug!("dropping inbound packet: {}", e);
                return Err(e);
            }
        };
        self.metrics.increment(DataPoint::PacketsReceived);

        let prev_unacked = self.unacked_send_sequence_num;
        // Highest acked sequence number of this packet, and its timestamp.
        let mut latest_ack: Option<(u32, u32)> = None;

        for inbound in &segments {
            let header = &inbound.header;
            self.remote_window_size = u32::from(header.window_size);
            self.parse_unacked(header.unacked_sequence_num);
            self.shrink_buffer();

            match header.command {
                Command::Ack => {
                    let rtt = time_diff(self.current_time, header.timestamp);
                    if rtt >= 0 {
                        self.update_ack(rtt as u32);
                    }
                    self.parse_ack(header.sequence_num);
                    self.shrink_buffer();

                    latest_ack = match latest_ack {
                        None => Some((header.sequence_num, header.timestamp)),
                        Some((max_ack, latest_ts))
                            if time_diff(header.sequence_num, max_ack) > 0
                                && (!self.fastack_conserve
                                    || time_diff(header.timestamp, latest_ts) > 0) =>
                        {
                            Some((header.sequence_num, header.timestamp))
                        }
                        unchanged => unchanged,
                    };

                    if self.log_mask.enabled(LogMask::IN_ACK) {
                        debug!(
                            "input ack: sn={} rtt={} rto={}",
                            header.sequence_num, rtt, self.calculated_rto
                        );
                    }
                }
                Command::Push => {
                    if self.log_mask.enabled(LogMask::IN_DATA) {
                        debug!(
                            "input psh: sn={} ts={}",
                            header.sequence_num, header.timestamp
                        );
                    }

                    let window_end = self
                        .next_recv_sequence_num
                        .wrapping_add(self.recv_window_size);
                    if time_diff(header.sequence_num, window_end) < 0 {
                        self.ack_list.try_reserve(1)?;
                        if time_diff(header.sequence_num, self.next_recv_sequence_num) >= 0 {
                            let key = self.store.allocate(Segment::from_inbound(inbound)?)?;
                            self.ack_list
                                .push((header.sequence_num, header.timestamp));
                            self.parse_data(key);
                        } else {
                            self.ack_list
                                .push((header.sequence_num, header.timestamp));
                            self.metrics.increment(DataPoint::SegmentsDuplicate);
                        }
                    }
                }
                Command::WindowAsk => {
                    if self.log_mask.enabled(LogMask::IN_PROBE) {
                        debug!("input probe");
                    }
                    self.probe |= ASK_TELL;
                }
                Command::WindowTell => {
                    if self.log_mask.enabled(LogMask::IN_WINS) {
                        debug!("input wins: {}", header.window_size);
                    }
                }
            }
        }

        if let Some((max_ack, latest_ts)) = latest_ack {
            self.parse_fastack(max_ack, latest_ts);
        }

        if time_diff(self.unacked_send_sequence_num, prev_unacked) > 0 {
            self.grow_congestion_window();
        }

        Ok(consumed)
    }

    /// Advances the clock to `current` (millis) and flushes if a flush is due. Call it every
    /// `interval` millis, or at the time returned by `check`.
    pub fn update(&mut self, current: u32) -> ProtocolResult<()> {
        if !self.writer.has_output() && self.flush_due(current) {
            return Err(ProtocolError::OutputNotConfigured);
        }

        self.current_time = current;

        if !self.update_called {
            self.update_called = true;
            self.next_flush_time = current;
        }

        let mut slap = time_diff(current, self.next_flush_time);
        if slap >= CLOCK_JUMP_LIMIT || slap < -CLOCK_JUMP_LIMIT {
            self.next_flush_time = current;
            slap = 0;
        }

        if slap >= 0 {
            self.next_flush_time = self.next_flush_time.wrapping_add(self.interval);
            if time_diff(current, self.next_flush_time) >= 0 {
                self.next_flush_time = current.wrapping_add(self.interval);
            }
            self.flush()?;
        }
        Ok(())
    }

    /// Returns when `update` should be called next. Scheduling many connections on `check`
    /// instead of a fixed tick saves needless `update` calls. Never changes any state.
    pub fn check(&self, current: u32) -> u32 {
        if !self.update_called {
            return current;
        }

        let mut next_flush_time = self.next_flush_time;
        let slap = time_diff(current, next_flush_time);
        if slap >= CLOCK_JUMP_LIMIT || slap < -CLOCK_JUMP_LIMIT {
            next_flush_time = current;
        }

        if time_diff(current, next_flush_time) >= 0 {
            return current;
        }

        let time_to_flush = time_diff(next_flush_time, current);
        let mut time_to_resend = i32::max_value();
        for segment in self.store.iter(&self.send_buffer) {
            let diff = time_diff(segment.resend_time, current);
            if diff <= 0 {
                return current;
            }
            time_to_resend = cmp::min(time_to_resend, diff);
        }

        let minimal = cmp::min(
            cmp::min(time_to_resend, time_to_flush) as u32,
            self.interval,
        );
        current.wrapping_add(minimal)
    }

    pub fn set_mtu(&mut self, mtu: usize) -> ProtocolResult<()> {
        if mtu < MIN_MTU || mtu <= PROTOCOL_OVERHEAD {
            return Err(ProtocolError::InvalidConfiguration("MTU too small."));
        }
        self.writer.resize(mtu);
        self.max_transmission_unit = mtu;
        self.max_segment_size = mtu - PROTOCOL_OVERHEAD;
        Ok(())
    }

    /// Sets the flush interval, clamped to [10, 5000] millis.
    pub fn set_interval(&mut self, interval: u32) {
        self.interval = bound(MIN_INTERVAL, interval, MAX_INTERVAL);
    }

    /// fastest: nodelay(1, 20, 2, false)
    ///
    /// `nodelay`: 0 disabled (default), 1 enabled.
    /// `interval`: internal update timer interval in millis, default is 100ms.
    /// `resend`: 0 disables fast resend (default), 1 enables it.
    /// `use_congestion_control`: false turns the congestion window off.
    ///
    /// A negative `nodelay`, `interval` or `resend` leaves that setting unchanged.
    pub fn nodelay(
        &mut self,
        nodelay: i32,
        interval: i32,
        resend: i32,
        use_congestion_control: bool,
    ) {
        if nodelay >= 0 {
            self.nodelay = nodelay as u32;
            self.minimum_rto = if nodelay != 0 { RTO_NDL } else { RTO_MIN };
        }
        if interval >= 0 {
            self.set_interval(interval as u32);
        }
        if resend >= 0 {
            self.fast_resend = resend as u32;
        }
        self.use_congestion_control = use_congestion_control;
    }

    /// A zero size leaves that window unchanged. The receive window never drops below the
    /// largest fragment count of a single message.
    pub fn set_window_sizes(&mut self, send_size: u32, recv_size: u32) {
        if send_size > 0 {
            self.send_window_size = send_size;
        }
        if recv_size > 0 {
            self.recv_window_size = cmp::max(recv_size, RECV_WINDOW_SIZE);
        }
    }

    pub fn set_stream_mode(&mut self, in_streaming_mode: bool) {
        self.in_streaming_mode = in_streaming_mode;
    }

    pub fn set_minimum_rto(&mut self, minimum_rto: u32) {
        self.minimum_rto = minimum_rto;
    }

    pub fn set_fast_limit(&mut self, fast_limit: u32) {
        self.fast_limit = fast_limit;
    }

    pub fn set_dead_link(&mut self, dead_link: u32) -> ProtocolResult<()> {
        if dead_link == 0 {
            return Err(ProtocolError::InvalidConfiguration(
                "Dead link threshold must be positive.",
            ));
        }
        self.dead_link = dead_link;
        Ok(())
    }

    pub fn set_fastack_conserve(&mut self, fastack_conserve: bool) {
        self.fastack_conserve = fastack_conserve;
    }

    pub fn set_log_mask(&mut self, log_mask: LogMask) {
        self.log_mask = log_mask;
    }

    /// Number of segments queued or in flight.
    pub fn wait_send(&self) -> usize {
        self.send_queue.len() + self.send_buffer.len()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_dead(&self) -> bool {
        self.connection_state == ConnectionState::Dead
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn mtu(&self) -> usize {
        self.max_transmission_unit
    }

    pub fn mss(&self) -> usize {
        self.max_segment_size
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Current retransmission timeout estimate in millis.
    pub fn rto(&self) -> u32 {
        self.calculated_rto
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Splits `payload` into fragments and appends them to the send queue. Every fragment is
    /// allocated before any is queued.
    fn queue_fragments(&mut self, payload: &[u8]) -> ProtocolResult<usize> {
        let mss = self.max_segment_size;
        let count = if payload.len() <= mss {
            1
        } else {
            (payload.len() + mss - 1) / mss
        };

        if count >= RECV_WINDOW_SIZE as usize {
            return Err(ProtocolError::NumberOfFragmentsGreaterThanWindowSize);
        }

        let mut fragments = Vec::new();
        fragments.try_reserve_exact(count)?;
        for i in 0..count {
            let start = i * mss;
            let end = cmp::min(start + mss, payload.len());
            let mut segment = Segment::new(allocate_payload(&[&payload[start..end]])?);
            segment.fragment_id = if self.in_streaming_mode {
                0
            } else {
                (count - i - 1) as u8
            };
            fragments.push(segment);
        }

        self.store.reserve(count)?;
        for segment in fragments {
            let key = self.store.allocate(segment)?;
            self.store.push_back(&mut self.send_queue, key);
        }

        if self.log_mask.enabled(LogMask::SEND) {
            debug!("send {} bytes in {} segments", payload.len(), count);
        }
        Ok(payload.len())
    }

    fn flush_due(&self, current: u32) -> bool {
        if !self.update_called {
            return true;
        }
        let slap = time_diff(current, self.next_flush_time);
        slap >= 0 || slap < -CLOCK_JUMP_LIMIT
    }

    /// Moves in-order segments from the receive buffer to the receive queue while the queue has
    /// room.
    fn promote_recv_buffer(&mut self) {
        while let Some(key) = self.recv_buffer.front() {
            if self.store.get(key).sequence_num != self.next_recv_sequence_num
                || self.recv_queue.len() >= self.recv_window_size as usize
            {
                break;
            }
            self.store.unlink(&mut self.recv_buffer, key);
            self.store.push_back(&mut self.recv_queue, key);
            self.next_recv_sequence_num = self.next_recv_sequence_num.wrapping_add(1);
        }
    }

    fn parse_data(&mut self, key: SegmentKey) {
        let sequence_num = self.store.get(key).sequence_num;
        let window_end = self
            .next_recv_sequence_num
            .wrapping_add(self.recv_window_size);
        if time_diff(sequence_num, window_end) >= 0
            || time_diff(sequence_num, self.next_recv_sequence_num) < 0
        {
            self.store.release(key);
            return;
        }

        let mut after = self.recv_buffer.back();
        let mut repeat = false;
        while let Some(candidate) = after {
            let candidate_sn = self.store.get(candidate).sequence_num;
            if candidate_sn == sequence_num {
                repeat = true;
                break;
            }
            if time_diff(sequence_num, candidate_sn) > 0 {
                break;
            }
            after = self.store.prev(candidate);
        }

        if repeat {
            self.store.release(key);
            self.metrics.increment(DataPoint::SegmentsDuplicate);
        } else {
            self.store.insert_after(&mut self.recv_buffer, after, key);
        }

        self.promote_recv_buffer();
    }

    fn update_ack(&mut self, rtt: u32) {
        if self.smoothed_rtt == 0 {
            self.smoothed_rtt = rtt;
            self.rtt_variance = rtt / 2;
        } else {
            let delta = if rtt > self.smoothed_rtt {
                rtt - self.smoothed_rtt
            } else {
                self.smoothed_rtt - rtt
            };
            self.rtt_variance = self
                .rtt_variance
                .saturating_mul(3)
                .saturating_add(delta)
                / 4;
            let smoothed = self.smoothed_rtt.saturating_mul(7).saturating_add(rtt) / 8;
            self.smoothed_rtt = cmp::max(smoothed, 1);
        }

        let rto = self.smoothed_rtt.saturating_add(cmp::max(
            self.interval,
            self.rtt_variance.saturating_mul(4),
        ));
        self.calculated_rto = bound(self.minimum_rto, rto, RTO_MAX);
    }

    fn shrink_buffer(&mut self) {
        self.unacked_send_sequence_num = match self.send_buffer.front() {
            Some(key) => self.store.get(key).sequence_num,
            None => self.next_send_sequence_num,
        };
    }

    fn parse_ack(&mut self, sequence_num: u32) {
        if time_diff(sequence_num, self.unacked_send_sequence_num) < 0
            || time_diff(sequence_num, self.next_send_sequence_num) >= 0
        {
            return;
        }

        let mut cursor = self.send_buffer.front();
        while let Some(key) = cursor {
            let segment_sn = self.store.get(key).sequence_num;
            if segment_sn == sequence_num {
                self.store.remove(&mut self.send_buffer, key);
                self.metrics.increment(DataPoint::SegmentsAcked);
                break;
            }
            if time_diff(sequence_num, segment_sn) < 0 {
                break;
            }
            cursor = self.store.next(key);
        }
    }

    fn parse_unacked(&mut self, unacked_sequence_num: u32) {
        while let Some(key) = self.send_buffer.front() {
            if time_diff(unacked_sequence_num, self.store.get(key).sequence_num) <= 0 {
                break;
            }
            self.store.remove(&mut self.send_buffer, key);
            self.metrics.increment(DataPoint::SegmentsAcked);
        }
    }

    /// Counts the ack of `sequence_num` as skipping every older segment still in flight.
    fn parse_fastack(&mut self, sequence_num: u32, timestamp: u32) {
        if time_diff(sequence_num, self.unacked_send_sequence_num) < 0
            || time_diff(sequence_num, self.next_send_sequence_num) >= 0
        {
            return;
        }

        let mut cursor = self.send_buffer.front();
        while let Some(key) = cursor {
            cursor = self.store.next(key);
            let segment = self.store.get_mut(key);
            if time_diff(sequence_num, segment.sequence_num) < 0 {
                break;
            }
            if sequence_num != segment.sequence_num
                && (!self.fastack_conserve || time_diff(timestamp, segment.timestamp) >= 0)
            {
                segment.fastack += 1;
            }
        }
    }

    fn grow_congestion_window(&mut self) {
        if self.congestion_window_size >= self.remote_window_size {
            return;
        }

        let mss = self.max_segment_size as u32;
        if self.congestion_window_size < self.ssthresh {
            self.congestion_window_size += 1;
            self.incr = self.incr.saturating_add(mss);
        } else {
            if self.incr < mss {
                self.incr = mss;
            }
            self.incr = self
                .incr
                .saturating_add(mss.saturating_mul(mss) / self.incr + mss / 16);
            if (self.congestion_window_size + 1).saturating_mul(mss) <= self.incr {
                self.congestion_window_size = self.incr.saturating_add(mss - 1) / mss;
            }
        }

        if self.congestion_window_size > self.remote_window_size {
            self.congestion_window_size = self.remote_window_size;
            self.incr = self.remote_window_size.saturating_mul(mss);
        }
    }

    fn unused_recv_window(&self) -> u16 {
        let queued = self.recv_queue.len() as u32;
        let unused = self.recv_window_size.saturating_sub(queued);
        cmp::min(unused, u32::from(u16::max_value())) as u16
    }

    fn mark_dead(&mut self, sequence_num: u32, xmit: u32) {
        if self.connection_state != ConnectionState::Dead {
            warn!(
                "session {:#010x}: segment {} sent {} times, link is dead",
                self.session_id, sequence_num, xmit
            );
            self.connection_state = ConnectionState::Dead;
        }
    }

    /// Sends pending acks and window probes, moves segments from the send queue into the send
    /// buffer as far as the windows allow, and (re)transmits whatever is due.
    fn flush(&mut self) -> ProtocolResult<()> {
        if !self.update_called {
            return Ok(());
        }
        if !self.writer.has_output() {
            return Err(ProtocolError::OutputNotConfigured);
        }

        let current = self.current_time;
        let mtu = self.max_transmission_unit;
        let window = self.unused_recv_window();

        let mut control = Segment::control(
            self.session_id,
            Command::Ack,
            window,
            self.next_recv_sequence_num,
        );
        for &(sequence_num, timestamp) in &self.ack_list {
            control.sequence_num = sequence_num;
            control.timestamp = timestamp;
            if self.log_mask.enabled(LogMask::OUT_ACK) {
                debug!("output ack: sn={} ts={}", sequence_num, timestamp);
            }
            self.writer
                .write(&control, mtu, self.log_mask, &mut self.metrics);
            self.metrics.increment(DataPoint::AcksSent);
        }
        self.ack_list.clear();

        // Probe the window size if the remote window is zero.
        if self.remote_window_size == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.next_probe_time = current.wrapping_add(self.probe_wait);
            } else if time_diff(current, self.next_probe_time) >= 0 {
                self.probe_wait = cmp::max(self.probe_wait, PROBE_INIT);
                self.probe_wait += self.probe_wait / 2;
                self.probe_wait = cmp::min(self.probe_wait, PROBE_LIMIT);
                self.next_probe_time = current.wrapping_add(self.probe_wait);
                self.probe |= ASK_SEND;
            }
        } else {
            self.next_probe_time = 0;
            self.probe_wait = 0;
        }

        // Window probes go out with the sn/ts of the last ack written above.
        if self.probe & ASK_SEND != 0 {
            control.command = Command::WindowAsk;
            if self.log_mask.enabled(LogMask::OUT_PROBE) {
                debug!("output window probe");
            }
            self.writer
                .write(&control, mtu, self.log_mask, &mut self.metrics);
            self.metrics.increment(DataPoint::WindowProbesSent);
        }
        if self.probe & ASK_TELL != 0 {
            control.command = Command::WindowTell;
            if self.log_mask.enabled(LogMask::OUT_WINS) {
                debug!("output wins: {}", window);
            }
            self.writer
                .write(&control, mtu, self.log_mask, &mut self.metrics);
            self.metrics.increment(DataPoint::WindowTellsSent);
        }
        self.probe = 0;

        let mut window_limit = cmp::min(self.send_window_size, self.remote_window_size);
        if self.use_congestion_control {
            window_limit = cmp::min(self.congestion_window_size, window_limit);
        }

        while time_diff(
            self.next_send_sequence_num,
            self.unacked_send_sequence_num.wrapping_add(window_limit),
        ) < 0
        {
            let key = match self.store.pop_front(&mut self.send_queue) {
                Some(key) => key,
                None => break,
            };
            self.store.push_back(&mut self.send_buffer, key);

            let segment = self.store.get_mut(key);
            segment.session_id = self.session_id;
            segment.command = Command::Push;
            segment.window_size = window;
            segment.timestamp = current;
            segment.sequence_num = self.next_send_sequence_num;
            segment.unacked_sequence_num = self.next_recv_sequence_num;
            segment.resend_time = current;
            segment.rto = self.calculated_rto;
            segment.fastack = 0;
            segment.xmit = 0;
            self.next_send_sequence_num = self.next_send_sequence_num.wrapping_add(1);
        }

        let resent = if self.fast_resend > 0 {
            self.fast_resend
        } else {
            u32::max_value()
        };
        let rto_min = if self.nodelay == 0 {
            self.calculated_rto >> 3
        } else {
            0
        };

        let mut change = false;
        let mut lost = false;
        let mut cursor = self.send_buffer.front();
        while let Some(key) = cursor {
            cursor = self.store.next(key);
            let segment = self.store.get_mut(key);
            let mut need_send = false;

            if segment.xmit == 0 {
                need_send = true;
                segment.xmit += 1;
                segment.rto = self.calculated_rto;
                segment.resend_time = current
                    .wrapping_add(segment.rto)
                    .wrapping_add(rto_min);
                self.metrics.increment(DataPoint::SegmentsSent);
            } else if time_diff(current, segment.resend_time) >= 0 {
                need_send = true;
                segment.xmit += 1;
                self.xmit = self.xmit.wrapping_add(1);
                if self.nodelay == 0 {
                    segment.rto = segment
                        .rto
                        .saturating_add(cmp::max(segment.rto, self.calculated_rto));
                } else {
                    let step = if self.nodelay < 2 {
                        segment.rto
                    } else {
                        self.calculated_rto
                    };
                    segment.rto = segment.rto.saturating_add(step / 2);
                }
                segment.resend_time = current.wrapping_add(segment.rto);
                lost = true;
                self.metrics.increment(DataPoint::SegmentsRetransmitted);
            } else if segment.fastack >= resent
                && (segment.xmit <= self.fast_limit || self.fast_limit == 0)
            {
                need_send = true;
                segment.xmit += 1;
                segment.fastack = 0;
                segment.resend_time = current.wrapping_add(segment.rto);
                change = true;
                self.metrics.increment(DataPoint::SegmentsFastRetransmitted);
            }

            if need_send {
                segment.timestamp = current;
                segment.window_size = window;
                segment.unacked_sequence_num = self.next_recv_sequence_num;

                if self.log_mask.enabled(LogMask::OUT_DATA) {
                    debug!(
                        "output psh: sn={} xmit={} rto={}",
                        segment.sequence_num, segment.xmit, segment.rto
                    );
                }
                self.writer
                    .write(segment, mtu, self.log_mask, &mut self.metrics);

                let (sequence_num, xmit) = (segment.sequence_num, segment.xmit);
                if xmit >= self.dead_link {
                    self.mark_dead(sequence_num, xmit);
                }
            }
        }

        let flushed = self.writer.finish(self.log_mask, &mut self.metrics);

        let mss = self.max_segment_size as u32;
        if change {
            let inflight = self
                .next_send_sequence_num
                .wrapping_sub(self.unacked_send_sequence_num);
            self.ssthresh = cmp::max(inflight / 2, THRESH_MIN);
            self.congestion_window_size = self.ssthresh.saturating_add(resent);
            self.incr = self.congestion_window_size.saturating_mul(mss);
        }

        if lost {
            self.ssthresh = cmp::max(window_limit / 2, THRESH_MIN);
            self.congestion_window_size = 1;
            self.incr = mss;
        }

        if self.congestion_window_size < 1 {
            self.congestion_window_size = 1;
            self.incr = mss;
        }

        flushed
    }
}

/// Signed distance from `earlier` to `later` on the wrapping 32 bit clock.
#[inline]
fn time_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

#[inline]
fn bound(lower: u32, value: u32, upper: u32) -> u32 {
    cmp::min(cmp::max(lower, value), upper)
}
