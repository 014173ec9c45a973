use anyhow::{Context, Result};
use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads configuration from an optional file layered under `PREFIX_*`
/// environment variables. Missing keys fall back to the struct's serde
/// defaults.
pub fn load_layered_config<T: DeserializeOwned>(
    path: Option<&Path>,
    env_prefix: &str,
) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        let path_str = path.to_str().context("Invalid config path")?;
        builder = builder.add_source(File::with_name(path_str));
    }

    let settings = builder
        .add_source(Environment::with_prefix(env_prefix).try_parsing(true))
        .build()
        .context("Failed to build configuration")?;

    settings.try_deserialize::<T>().context("Failed to deserialize configuration")
}
