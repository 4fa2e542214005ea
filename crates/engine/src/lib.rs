//! Scheduling for the whale watcher.
//!
//! The poll loop drives each fetch, filter and notify cycle; the heartbeat
//! reports liveness through the same notification sink. Both stop on a
//! shared stop signal.

pub mod heartbeat;
pub mod poller;
pub mod stop;

pub use heartbeat::Heartbeat;
pub use poller::{CycleReport, PollError, PollLoop, PollSettings, PollStats};
pub use stop::{stop_channel, StopHandle, StopSignal};
