//! Configuration file loading.

use std::path::Path;

use anyhow::{Context, Result};
use druglink_core::EngineConfig;
use druglink_sources::SourceConfig;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

/// The TOML configuration file.
///
/// ```toml
/// [engine]
/// dataset_path = "formulary.json"
///
/// [engine.search]
/// default_limit = 20
///
/// [label_source]
/// requests_per_minute = 120
///
/// [authorization_source]
/// base_url = "https://mirror.example.org/medicines.json"
/// ```
///
/// Keys missing from a source section keep that source's own defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub label_source: SourceConfig,
    #[serde(deserialize_with = "authorization_section")]
    pub authorization_source: SourceConfig,
}

/// Overlay the keys of `[authorization_source]` onto the authorization defaults.
fn authorization_section<'de, D>(deserializer: D) -> std::result::Result<SourceConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = toml::Table::deserialize(deserializer)?;
    let toml::Value::Table(mut merged) =
        toml::Value::try_from(SourceConfig::authorization_defaults()).map_err(D::Error::custom)?
    else {
        return Err(D::Error::custom("authorization defaults are not a table"));
    };
    for (key, value) in overrides {
        merged.insert(key, value);
    }
    toml::Value::Table(merged).try_into().map_err(D::Error::custom)
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            label_source: SourceConfig::label_defaults(),
            authorization_source: SourceConfig::authorization_defaults(),
        }
    }
}

impl CliConfig {
    /// Read `path` if given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("engine")?;
        self.label_source.validate().context("label_source")?;
        self.authorization_source.validate().context("authorization_source")?;
        Ok(())
    }
}
