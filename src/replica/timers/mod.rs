mod scheduler;
mod stop_signal;
mod time;
mod tokio_scheduler;

#[cfg(test)]
mod test_utils;

pub use scheduler::Scheduler;
pub use scheduler::TimerCancellation;
pub use scheduler::TimerEvent;
pub use scheduler::TimerHandle;
pub use scheduler::TimerKind;

pub(crate) use tokio_scheduler::TokioScheduler;
