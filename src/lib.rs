//! Federation gateway for OGC API Processes providers.

pub mod adapters;
pub mod api;
pub mod domain;
pub mod services;

pub use domain::{GatewayError, GatewayResult};
pub use services::{ConfigError, GatewayConfig};
