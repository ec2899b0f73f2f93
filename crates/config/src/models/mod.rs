pub mod app_config;
pub mod dispatch;
pub mod endpoints;
pub mod logging;
pub mod scatter_gather;

pub use app_config::AppConfig;
pub use dispatch::{DispatchConfig, EndpointDefaults};
pub use endpoints::{EndpointEntry, EndpointKind};
pub use logging::{LogConfig, LogFormat};
pub use scatter_gather::ScatterGatherDefaults;
