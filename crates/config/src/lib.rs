//! Configuration: schema, file discovery and environment overrides.

mod loader;
mod schema;

pub use loader::{apply_overrides, discover_and_load, load_config};
pub use schema::{AuthConfig, DatabaseConfig, GatewayConfig, ParleyConfig};
