pub mod dispatcher;
pub mod engine;
pub mod job_store;
pub mod lifecycle;
pub mod queue;
pub mod storage;
pub mod worker;
