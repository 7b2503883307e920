//! Relation configuration loaded from files and the environment.
//!
//! Applications can keep their relation sets next to the rest of their settings and load them
//! with [`LinkManyConfig::load()`]: `config/config.toml` (optional) plus `LINKMANY__*`
//! environment variables. Each owner model maps to the list-or-mapping form accepted by
//! [`RelationSet::from_value`]:
//!
//! ```toml
//! [linkmany.relations]
//! post = ["languages", { tags = { validate = false, cascadeOnUnlink = false } }]
//! BlogPost = ["postTags", { name = "postLanguages", formName = "PL" }]
//! ```
//!
//! The `config` crate lowercases every table key, values are kept as written. Owner models are
//! therefore looked up ignoring case, and relation names with capitals must be given as values:
//! a bare string or a `name = ...` record, never a `{ postLanguages = {...} }` key.

use crate::error::LinkError;
use crate::relation::def::RelationSet;
use config::{Config, ConfigError, Environment, File, FileFormat};
use log::warn;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

const CONFIG_FILE: &str = "config/config.toml";
const ENV_PREFIX: &str = "LINKMANY";

#[derive(Debug, Deserialize, Default)]
pub struct LinkManyConfig {
    /// Relation configuration per owner model
    #[serde(default)]
    pub relations: BTreeMap<String, JsonValue>,
}

/// `LINKMANY__RELATIONS__POST=languages,tags` becomes `linkmany.relations.post`
fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .keep_prefix(true)
        .try_parsing(true)
        .list_separator(",")
}

impl LinkManyConfig {
    /// Load the configuration from `config/config.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(env_source());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // the file exists but cannot be read or parsed: retry with env only
                if std::path::Path::new(CONFIG_FILE).exists() {
                    warn!("failed to load {CONFIG_FILE}, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(env_source())
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };
        Self::from_settings(&settings)
    }

    /// Parse a TOML document holding a `[linkmany]` table
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::from_settings(&settings)
    }

    fn from_settings(settings: &Config) -> Result<Self, ConfigError> {
        match settings.get::<LinkManyConfig>("linkmany") {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "linkmany configuration could not be loaded from file or environment: {e}"
            ))),
        }
    }

    /// Relation set configured for `owner_model`; empty when the model has none
    ///
    /// The `config` crate lowercases table keys, so owners are matched ignoring ASCII case.
    pub fn relation_set(&self, owner_model: &str) -> Result<Arc<RelationSet>, LinkError> {
        let set = match self.owner_entry(owner_model)? {
            Some(value) => RelationSet::from_value(value)?,
            None => RelationSet::default(),
        };
        Ok(Arc::new(set))
    }

    fn owner_entry(&self, owner_model: &str) -> Result<Option<&JsonValue>, LinkError> {
        if let Some(value) = self.relations.get(owner_model) {
            return Ok(Some(value));
        }
        let mut matches = self
            .relations
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(owner_model));
        match (matches.next(), matches.next()) {
            (Some((_, value)), None) => Ok(Some(value)),
            (None, _) => Ok(None),
            (Some(_), Some(_)) => Err(LinkError::Configuration(format!(
                "relations for '{owner_model}' are configured more than once"
            ))),
        }
    }
}
