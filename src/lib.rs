//! Job status reporting over two channels: a webhook pushed by the job
//! server and periodic polling by the client, arbitrated into one result.
//!
//! [`server`] hosts the simulated job; [`client::Arbiter`] races both
//! detection paths against a deadline.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod status;
pub mod ui;

pub use client::{Arbiter, ArbiterSettings, HttpStatusApi, Resolution};
pub use config::JobwatchConfig;
pub use error::WatchError;
pub use status::{JobStatus, StatusCache};
