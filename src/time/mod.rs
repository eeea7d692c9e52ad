mod clock;
mod deadline;

pub use clock::Clock;
pub use clock::RealClock;
pub use deadline::Deadline;

#[cfg(test)]
pub(crate) use clock::mocked_clock;
#[cfg(test)]
pub(crate) use clock::MockClock;
