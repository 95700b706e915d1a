//! Tool providers. Providers are data from the gateway's perspective:
//! each exposes a registration function yielding tool definitions, and a
//! static table maps provider identifiers to those functions. Selection is
//! driven by configuration; no dynamic loading.

pub mod arcgis;
pub mod example;
pub mod snl;
pub mod wikipedia;

use tracing::warn;

use crate::config::Config;
use crate::registry::{RegistryError, ToolRegistry};

pub type Registrar = fn(&mut ToolRegistry, &Config) -> Result<(), RegistryError>;

pub const PROVIDERS: &[(&str, Registrar)] = &[
    ("example", example::register_tools),
    ("wikipedia", wikipedia::register_tools),
    ("snl", snl::register_tools),
    ("arcgis", arcgis::register_tools),
];

/// Registers every enabled provider's tools, in configuration order.
/// Unknown provider names are logged and skipped; registration failures
/// (duplicate tool names, broken schemas) are startup-fatal.
pub fn register_enabled(registry: &mut ToolRegistry, config: &Config) -> Result<(), RegistryError> {
    for name in &config.enabled_providers {
        match PROVIDERS.iter().find(|(provider, _)| *provider == name.as_str()) {
            Some((_, registrar)) => registrar(registry, config)?,
            None => warn!(provider = %name, "unknown provider in configuration, skipped"),
        }
    }
    Ok(())
}
