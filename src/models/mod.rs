pub mod api;
pub mod job;
pub mod method_result;

pub use job::{Job, JobFilter, JobPriority, JobStatus};
pub use method_result::{interpret, Method, MethodResult, ResultSet};
