use cadence_core::materialize::MaterializerConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

const CONFIG_FILE: &str = "cadence.toml";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// SQLite database file
    pub database_path: String,
    /// Whose calendar the commands act on
    pub owner_id: i64,
    pub materializer: MaterializerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "cadence.db".to_string(),
            owner_id: 1,
            materializer: MaterializerConfig::default(),
        }
    }
}

impl Config {
    /// Loads `cadence.toml` (or the file named by `CADENCE_CONFIG`), then `CADENCE_*` variables.
    ///
    /// Nested keys use a double underscore, e.g. `CADENCE_MATERIALIZER__VISIBLE_START_HOUR=8`.
    pub fn new() -> Result<Self, figment::Error> {
        let file = std::env::var("CADENCE_CONFIG").unwrap_or_else(|_| CONFIG_FILE.to_string());
        Self::figment(&file).extract()
    }

    fn figment(file: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed("CADENCE_").ignore(&["config", "log"]).split("__"))
    }
}
