mod business_routes;
pub mod config;
mod data_routes;
pub mod error;
mod http_layers;
mod log_routes;
pub mod metrics;
mod pipeline_routes;
mod scraper_routes;
pub mod server;
pub mod state;
mod task_routes;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
