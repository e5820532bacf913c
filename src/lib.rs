//! StegnoX job service
//!
//! Accepts images for steganographic analysis, either synchronously or as
//! prioritized background jobs, and tracks each job through its lifecycle
//! until a worker records the results.

pub mod app_state;
pub mod client;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
