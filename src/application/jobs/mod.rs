mod context;
mod fanout;

pub use context::{FANOUT_JOB_NAMESPACE, FanoutJobContext, job_failed};
pub use fanout::process_fanout_job;
