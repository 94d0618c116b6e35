//! Configuration loading, validation, and env substitution.
//!
//! Config files: `trellis.toml`, `trellis.yaml`, or `trellis.json`,
//! searched in `./` then the user config dir (`~/.config/trellis/`).
//!
//! Supports `${ENV_VAR}` substitution in the raw file text before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, load_config},
    schema::{
        AgentConfig, BindingConfig, DeliveryConfig, SupervisorConfig, TrellisConfig, WILDCARD,
    },
    validate::{Diagnostic, Severity, validate},
};
