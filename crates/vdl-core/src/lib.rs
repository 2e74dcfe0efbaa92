pub mod config;
pub mod logging;

pub mod cache;
pub mod cancel;
pub mod error;
pub mod format;
pub mod job;
pub mod jobs;
pub mod metadata;
pub mod process;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod url_model;
