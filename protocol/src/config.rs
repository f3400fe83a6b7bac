use crate::{
    log_mask::LogMask, DEADLINK, DEFAULT_MTU, FASTACK_LIMIT, INTERVAL, RECV_WINDOW_SIZE,
    SEND_WINDOW_SIZE,
};

/// Construction-time options of a `ReliableConnection`.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Conversation id. Both ends of a connection must use the same value.
    pub(crate) session_id: u32,
    /// Upper bound of a packet handed to the output, headers included.
    pub(crate) mtu: usize,
    /// Max number of segments in flight, in segments.
    pub(crate) send_window_size: u32,
    /// Max number of segments held for the user, in segments. Never below `RECV_WINDOW_SIZE`.
    pub(crate) recv_window_size: u32,
    /// 0 for normal mode, 1 and 2 for increasingly aggressive retransmission.
    pub(crate) nodelay: u32,
    /// Internal flush interval in millis.
    pub(crate) interval: u32,
    /// Number of skipped acks that triggers a fast retransmission. 0 disables it.
    pub(crate) fast_resend: u32,
    /// Max transmit count up to which fast retransmission applies. 0 removes the limit.
    pub(crate) fast_limit: u32,
    pub(crate) use_congestion_control: bool,
    /// Overrides the minimum rto otherwise derived from `nodelay`.
    pub(crate) minimum_rto: Option<u32>,
    /// Merge payloads into a byte stream instead of keeping message boundaries.
    pub(crate) stream_mode: bool,
    /// Number of transmissions of a single segment after which the link is considered dead.
    pub(crate) dead_link: u32,
    /// Only count an ack as skipping a segment if it was sent after that segment.
    pub(crate) fastack_conserve: bool,
    pub(crate) log_mask: LogMask,
}

impl Config {
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            ..Self::default()
        }
    }

    /// Max payload bytes carried by a single segment.
    #[inline]
    pub const fn max_segment_size(&self) -> usize {
        self.mtu.saturating_sub(crate::PROTOCOL_OVERHEAD)
    }

    /// Largest message `send` accepts in message mode.
    #[inline]
    pub const fn max_message_size(&self) -> usize {
        (RECV_WINDOW_SIZE as usize - 1) * self.max_segment_size()
    }

    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_window_sizes(mut self, send_window_size: u32, recv_window_size: u32) -> Self {
        self.send_window_size = send_window_size;
        self.recv_window_size = recv_window_size;
        self
    }

    /// fastest: with_nodelay(2, 10, 2, false)
    pub fn with_nodelay(
        mut self,
        nodelay: u32,
        interval: u32,
        fast_resend: u32,
        use_congestion_control: bool,
    ) -> Self {
        self.nodelay = nodelay;
        self.interval = interval;
        self.fast_resend = fast_resend;
        self.use_congestion_control = use_congestion_control;
        self
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_fast_limit(mut self, fast_limit: u32) -> Self {
        self.fast_limit = fast_limit;
        self
    }

    pub fn with_minimum_rto(mut self, minimum_rto: u32) -> Self {
        self.minimum_rto = Some(minimum_rto);
        self
    }

    pub fn with_stream_mode(mut self, stream_mode: bool) -> Self {
        self.stream_mode = stream_mode;
        self
    }

    pub fn with_dead_link(mut self, dead_link: u32) -> Self {
        self.dead_link = dead_link;
        self
    }

    pub fn with_fastack_conserve(mut self, fastack_conserve: bool) -> Self {
        self.fastack_conserve = fastack_conserve;
        self
    }

    pub fn with_log_mask(mut self, log_mask: LogMask) -> Self {
        self.log_mask = log_mask;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_id: 0,
            mtu: DEFAULT_MTU,
            send_window_size: SEND_WINDOW_SIZE,
            recv_window_size: RECV_WINDOW_SIZE,
            nodelay: 0,
            interval: INTERVAL,
            fast_resend: 0,
            fast_limit: FASTACK_LIMIT,
            use_congestion_control: true,
            minimum_rto: None,
            stream_mode: false,
            dead_link: DEADLINK,
            fastack_conserve: true,
            log_mask: LogMask::NONE,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Config;

    #[test]
    fn default_segment_size_leaves_room_for_the_header() {
        let config = Config::default();
        assert_eq!(config.max_segment_size(), 1376);
        assert_eq!(config.max_message_size(), 127 * 1376);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new(0x1122_3344)
            .with_mtu(512)
            .with_nodelay(1, 20, 2, false)
            .with_minimum_rto(10);
        assert_eq!(config.session_id, 0x1122_3344);
        assert_eq!(config.max_segment_size(), 488);
        assert_eq!(config.nodelay, 1);
        assert_eq!(config.interval, 20);
        assert_eq!(config.fast_resend, 2);
        assert!(!config.use_congestion_control);
        assert_eq!(config.minimum_rto, Some(10));
    }
}
