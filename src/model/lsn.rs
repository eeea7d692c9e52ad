use std::fmt;

/// Log sequence number of a partition. Replicas report `-1` when they don't know the value.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(i64);

impl Lsn {
    pub const UNKNOWN: Lsn = Lsn(-1);

    pub const fn new(lsn: i64) -> Self {
        Lsn(lsn)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn is_known(&self) -> bool {
        self.0 >= 0
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Lsn::UNKNOWN
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
