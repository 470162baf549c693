pub mod queue;
pub mod worker;

pub use queue::{ChannelJobQueue, InferenceJob, JobQueue};
pub use worker::Worker;
