use std::{fmt, ops};

/// Categories of diagnostic output a connection emits through the `log` facade.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct LogMask(u32);

impl LogMask {
    pub const NONE: LogMask = LogMask(0);
    pub const OUTPUT: LogMask = LogMask(1);
    pub const INPUT: LogMask = LogMask(1 << 1);
    pub const SEND: LogMask = LogMask(1 << 2);
    pub const RECV: LogMask = LogMask(1 << 3);
    pub const IN_DATA: LogMask = LogMask(1 << 4);
    pub const IN_ACK: LogMask = LogMask(1 << 5);
    pub const IN_PROBE: LogMask = LogMask(1 << 6);
    pub const IN_WINS: LogMask = LogMask(1 << 7);
    pub const OUT_DATA: LogMask = LogMask(1 << 8);
    pub const OUT_ACK: LogMask = LogMask(1 << 9);
    pub const OUT_PROBE: LogMask = LogMask(1 << 10);
    pub const OUT_WINS: LogMask = LogMask(1 << 11);
    pub const ALL: LogMask = LogMask((1 << 12) - 1);

    pub const fn from_bits(bits: u32) -> LogMask {
        LogMask(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: LogMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `category` is selected and the `log` facade would emit a debug record.
    #[inline]
    pub(crate) fn enabled(self, category: LogMask) -> bool {
        self.0 & category.0 != 0 && log::log_enabled!(log::Level::Debug)
    }
}

impl ops::BitOr for LogMask {
    type Output = LogMask;

    fn bitor(self, rhs: LogMask) -> LogMask {
        LogMask(self.0 | rhs.0)
    }
}

impl ops::BitOrAssign for LogMask {
    fn bitor_assign(&mut self, rhs: LogMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for LogMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LogMask({:#05x})", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::LogMask;

    #[test]
    fn combines_categories() {
        let mask = LogMask::INPUT | LogMask::OUT_ACK;
        assert!(mask.contains(LogMask::INPUT));
        assert!(mask.contains(LogMask::OUT_ACK));
        assert!(!mask.contains(LogMask::OUTPUT));
        assert!(LogMask::ALL.contains(mask));
    }

    #[test]
    fn from_bits_drops_unknown_categories() {
        assert_eq!(LogMask::from_bits(u32::max_value()), LogMask::ALL);
        assert_eq!(LogMask::from_bits(0b11).bits(), 0b11);
    }
}
