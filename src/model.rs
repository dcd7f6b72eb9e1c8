pub mod app_config;
pub mod proxy;

pub use app_config::*;
pub use proxy::*;
