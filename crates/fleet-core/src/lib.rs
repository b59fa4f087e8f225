pub mod config;
pub mod image;
pub mod types;

pub use config::{
    AutoscalingConfig, ConfigError, FleetConfig, IamConfig, NetworkConfig, PoolConfig,
    RouterConfig, ServiceConfig, TopologyConfig,
};
pub use image::{ImageError, ImageRef};
pub use types::*;
