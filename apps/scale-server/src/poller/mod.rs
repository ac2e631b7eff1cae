pub mod reader;
pub mod scheduler;
pub mod status;

pub use reader::{OnDemandReader, OnceReading, ReadOnceError, ReadOverrides};
pub use scheduler::{PollScheduler, SchedulerState};
pub use status::{PollerStatus, StatusReporter};
