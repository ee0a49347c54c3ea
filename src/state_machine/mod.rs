mod job;
mod state;

pub use job::{Job, JobId, JobStatusReport, RetryConfig};
pub use state::{JobStatus, TransitionError, transition};
