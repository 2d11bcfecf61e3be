//! Application settings.
//!
//! Read from an optional `settings.toml` in the working directory, then
//! overridden by `OPENSPLIT_`-prefixed environment variables using `__` to
//! reach nested keys (`OPENSPLIT_SERVER__PORT=9000`). `MONGODB_URI` is still
//! honoured for the store uri.
use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::money::Cents;

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Store {
    pub backend: Backend,
    pub uri: Option<String>,
    pub database: String,
    /// JSON array of groups the memory backend starts from.
    pub seed: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settlement {
    /// Balances at or below this many cents count as settled.
    pub epsilon_cents: u32,
}

impl Settlement {
    pub fn epsilon(&self) -> Cents {
        Cents::new(i64::from(self.epsilon_cents))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub store: Store,
    pub settlement: Settlement,
    pub log: Log,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("settings").required(false))
                .add_source(
                    Environment::with_prefix("OPENSPLIT")
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let mut defaults = Config::builder()
            .set_default("server.bind", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("store.backend", "mongo")?
            .set_default("store.database", "OpenSplit")?
            .set_default("settlement.epsilon_cents", 1)?
            .set_default("log.level", "info")?;
        if let Ok(uri) = std::env::var("MONGODB_URI") {
            defaults = defaults.set_default("store.uri", uri)?;
        }

        let settings = defaults.add_source(builder.build()?).build()?;

        settings.try_deserialize()
    }
}
