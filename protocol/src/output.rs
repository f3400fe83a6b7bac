use crate::{
    log_mask::LogMask,
    metrics::{DataPoint, Metrics},
    segment::Segment,
    ProtocolError, ProtocolResult, PROTOCOL_OVERHEAD,
};
use bytes::BytesMut;
use log::{debug, warn};
use std::io;

/// Receives every packet a connection emits, e.g. by writing it to a UDP socket. Must not block.
pub type OutputFn = Box<dyn FnMut(&[u8]) -> io::Result<()> + Send>;

/// Concatenates encoded segments into packets of at most `mtu` bytes and hands each finished
/// packet to the output.
pub(crate) struct PacketWriter {
    buffer: BytesMut,
    output: Option<OutputFn>,
    // First output failure of the current flush.
    error: Option<io::Error>,
}

impl PacketWriter {
    pub fn new(mtu: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(buffer_capacity(mtu)),
            output: None,
            error: None,
        }
    }

    pub fn set_output(&mut self, output: OutputFn) {
        self.output = Some(output);
    }

    #[inline]
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Grows the assembly buffer for a new mtu. Pending bytes are kept.
    pub fn resize(&mut self, mtu: usize) {
        let capacity = buffer_capacity(mtu);
        if self.buffer.capacity() < capacity {
            self.buffer.reserve(capacity - self.buffer.len());
        }
    }

    /// Appends `segment` to the current packet, first emitting the packet if the segment would
    /// push it past `mtu`.
    pub fn write(
        &mut self,
        segment: &Segment,
        mtu: usize,
        log_mask: LogMask,
        metrics: &mut Metrics,
    ) {
        if self.buffer.len() + segment.encoded_len() > mtu {
            self.emit(log_mask, metrics);
        }
        segment.encode(&mut self.buffer);
    }

    /// Emits whatever is left in the buffer and reports the first output failure since the last
    /// call.
    pub fn finish(&mut self, log_mask: LogMask, metrics: &mut Metrics) -> ProtocolResult<()> {
        self.emit(log_mask, metrics);
        match self.error.take() {
            Some(e) => Err(ProtocolError::IOError(e)),
            None => Ok(()),
        }
    }

    fn emit(&mut self, log_mask: LogMask, metrics: &mut Metrics) {
        if self.buffer.is_empty() {
            return;
        }
        if log_mask.enabled(LogMask::OUTPUT) {
            debug!("[RO] {} bytes", self.buffer.len());
        }

        match self.output.as_mut() {
            Some(output) => match output(&self.buffer) {
                Ok(()) => metrics.increment(DataPoint::PacketsSent),
                Err(e) => {
                    warn!("output failed for a {} byte packet: {}", self.buffer.len(), e);
                    if self.error.is_none() {
                        self.error = Some(e);
                    }
                }
            },
            None => warn!("dropping a {} byte packet, no output set", self.buffer.len()),
        }
        self.buffer.clear();
    }
}

#[inline]
fn buffer_capacity(mtu: usize) -> usize {
    (mtu + PROTOCOL_OVERHEAD) * 3
}
