use std::fmt;

/// Stores counters of what a connection has done. e.g. number of packets/segments sent, segments
/// retransmitted, acks received, etc
#[derive(Debug, Clone)]
pub struct Metrics {
    counters: [u64; DataPoint::Length as usize],
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: [0; DataPoint::Length as usize],
        }
    }

    // Returns the count of a particular data point.
    pub fn get_count(&self, data_point: DataPoint) -> u64 {
        self.counters[data_point as usize]
    }

    // Increments the value of a particular data point.
    pub(crate) fn increment(&mut self, data_point: DataPoint) {
        self.add(data_point, 1);
    }

    pub(crate) fn add(&mut self, data_point: DataPoint, count: u64) {
        let counter = &mut self.counters[data_point as usize];
        *counter = counter.saturating_add(count);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "packets sent={} received={} invalid={}; segments sent={} retransmitted={} \
             fast_retransmitted={} acked={} duplicate={}; acks sent={}; probes sent={}; \
             window tells sent={}",
            self.get_count(DataPoint::PacketsSent),
            self.get_count(DataPoint::PacketsReceived),
            self.get_count(DataPoint::PacketsInvalid),
            self.get_count(DataPoint::SegmentsSent),
            self.get_count(DataPoint::SegmentsRetransmitted),
            self.get_count(DataPoint::SegmentsFastRetransmitted),
            self.get_count(DataPoint::SegmentsAcked),
            self.get_count(DataPoint::SegmentsDuplicate),
            self.get_count(DataPoint::AcksSent),
            self.get_count(DataPoint::WindowProbesSent),
            self.get_count(DataPoint::WindowTellsSent),
        )
    }
}

#[derive(Copy, Clone, Debug, PartialOrd, PartialEq)]
pub enum DataPoint {
    PacketsSent = 0,
    PacketsReceived = 1,
    PacketsInvalid = 2,
    SegmentsSent = 3,
    SegmentsRetransmitted = 4,
    SegmentsFastRetransmitted = 5,
    SegmentsAcked = 6,
    SegmentsDuplicate = 7,
    AcksSent = 8,
    WindowProbesSent = 9,
    WindowTellsSent = 10,
    Length = 11,
}
