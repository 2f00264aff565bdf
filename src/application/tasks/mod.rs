mod runner;

pub use runner::{BoxError, JobId, Progress, TaskContext, TaskError, TaskHandle, TaskOutcome, submit};
