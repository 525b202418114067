pub mod config;
pub mod error;
pub mod lifecycle;

pub use config::{AwsConfig, BrokerConfig, ProviderConfig};
pub use error::*;
pub use lifecycle::*;
