//! Configuration for websync services.
//!
//! Configuration is layered: `configuration/base.*`, then `configuration/{environment}.*`,
//! then `APP_`-prefixed environment variables. See [`load_config`].

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
