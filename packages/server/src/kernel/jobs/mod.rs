pub mod job;
pub mod reaper;
pub mod store;

pub use job::{ClaimedJob, Job, JobType};
pub use reaper::Reaper;
pub use store::{JobQueue, PgJobStore};
