//! Scrape control server library
//!
//! Exposes the internal modules for the binary and the end-to-end tests.

pub mod business_store;
pub mod cities;
pub mod config;
pub mod export;
pub mod jobs;
pub mod log_tail;
pub mod server;
pub mod task_store;

// Re-export commonly used types for convenience
pub use business_store::{BusinessStore, InMemoryBusinessStore, MongoBusinessStore};
pub use jobs::{JobKind, JobManager, JobStatus};
pub use server::{run_server, RequestsLoggingLevel};
pub use task_store::{InMemoryTaskStore, MongoTaskStore, TaskStore};
