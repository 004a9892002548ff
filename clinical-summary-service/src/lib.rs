pub mod config;
pub mod models;
pub mod service;
pub mod telemetry;

pub use config::{ConfigError, EhrSettings, ServiceConfig};
pub use service::{AppState, build_router, create_app};
