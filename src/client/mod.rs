//! Client side of the job service: an HTTP client bound to an explicit
//! [`Session`], per-job polling with cancellation, and a reconciled local
//! view of the job list.

pub mod cache;
pub mod http;
pub mod session;
pub mod watch;

pub use cache::JobListView;
pub use http::{ClientError, JobSource, JobsClient};
pub use session::Session;
pub use watch::{JobWatcher, Watch, DEFAULT_POLL_INTERVAL};
