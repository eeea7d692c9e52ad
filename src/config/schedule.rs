use tokio::time::Duration;

/// Delays between barrier polls: a burst of short delays, then a longer cadence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarrierSchedule {
    pub short_count: u32,
    pub short_delay: Duration,
    pub long_count: u32,
    pub long_delay: Duration,
}

impl BarrierSchedule {
    pub fn total_delay(&self) -> Duration {
        self.short_delay * self.short_count + self.long_delay * self.long_count
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let short = std::iter::repeat(self.short_delay).take(self.short_count as usize);
        let long = std::iter::repeat(self.long_delay).take(self.long_count as usize);
        short.chain(long)
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.short_count + self.long_count == 0 {
            return Err("Barrier schedule must allow at least one retry");
        }
        if self.short_delay > self.long_delay {
            return Err("Barrier short delay must not exceed the long delay");
        }
        Ok(())
    }
}
