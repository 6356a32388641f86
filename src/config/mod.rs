/// Configuration system
///
/// - `macros`: the `config_struct!` declaration macro
/// - `schemas`: every configuration section with defaults
/// - `utils`: TOML loading, validation and saving
#[macro_use]
pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::{
    CircuitBreakerConfig, Config, ConnectionConfig, HealthConfig, IrcConfig, LoggingConfig,
    WebSocketConfig,
};
pub use utils::{load_config, load_config_from_path, parse_config, save_config, CONFIG_FILE_PATH};
