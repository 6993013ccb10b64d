//! Configuration merge system
//!
//! Three layers, later layers winning:
//! 1. Built-in defaults
//! 2. Config file (TOML)
//! 3. CLI overrides

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers, override_at};
pub use settings::{
    ArtifactConfig, ArtifactsConfig, BuilderConfig, ChainsConfig, ControllerConfig, DocDbConfig,
    SignersConfig, StorageConfig, TransparencyConfig, TransparencyMode, X509Config,
};
