pub mod config;
pub mod errors;

pub use config::AppConfig;
pub use errors::CoreError;
