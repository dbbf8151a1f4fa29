/// Configuration loading for the Surfline bronze extractor.
///
/// The whole run is driven by one TOML file (default `config/config.toml`).
/// The parsed `Config` is never mutated after `load`; everything a single
/// request needs is merged once into a `RequestParams` value.
///
/// Secrets can be kept out of the file: `SURFLINE_ACCESS_TOKEN` and
/// `SURFLINE_SPOT_ID` (from the environment or a `.env` file) take
/// precedence over `api.access_token` / `api.spot_id`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::entities::{self, DedupStrategy, EntityProfile};
use crate::flatten::FlattenRules;
use crate::model::{DATE_FORMAT, Window};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const ENV_ACCESS_TOKEN: &str = "SURFLINE_ACCESS_TOKEN";
pub const ENV_SPOT_ID: &str = "SURFLINE_SPOT_ID";

/// Span requested per window when the entity does not override `days`.
pub const DEFAULT_WINDOW_SPAN_DAYS: u32 = 16;
pub const INTERVAL_HOURS: u32 = 1;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("entity '{0}' not found in config")]
    UnknownEntity(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub project: ProjectConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityConfig>,
    #[serde(default)]
    pub dbt: Option<DbtConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
    pub output_dir: PathBuf,
    #[serde(default = "default_landing_dir")]
    pub landing_dir: PathBuf,
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default)]
    pub capture_raw: bool,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default = "default_timezone", deserialize_with = "deserialize_tz")]
    pub timezone: Tz,
    /// Stride between window starts.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Fan-out pool size. Kept small so the upstream API is not hammered.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_entity_pause_secs")]
    pub entity_pause_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub spot_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause after every request, whatever its outcome.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Per-entity section (`[entities.<name>]`). Every field is optional;
/// missing ones fall back to the entity registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    pub json_path: Option<Vec<String>>,
    pub endpoint: Option<String>,
    pub normalize: Option<FlattenRules>,
    pub params: BTreeMap<String, toml::Value>,
    pub time_anchor: Option<String>,
    pub dedup: Option<DedupStrategy>,
    pub epoch_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbtConfig {
    pub project_dir: PathBuf,
    pub profiles_dir: PathBuf,
    #[serde(default = "default_dbt_executable")]
    pub executable: String,
}

fn default_project_name() -> String {
    "surfline".to_string()
}

fn default_landing_dir() -> PathBuf {
    PathBuf::from("data").join("landing")
}

fn default_raw_dir() -> PathBuf {
    default_landing_dir().join("surfline_raw")
}

fn default_timezone() -> Tz {
    chrono_tz::America::Sao_Paulo
}

fn default_window_days() -> u32 {
    crate::windows::DEFAULT_STRIDE_DAYS
}

fn default_workers() -> usize {
    2
}

fn default_entity_pause_secs() -> u64 {
    15
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cooldown_secs() -> u64 {
    2
}

fn default_dbt_executable() -> String {
    "dbt".to_string()
}

fn deserialize_tz<'de, D>(deserializer: D) -> Result<Tz, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    name.parse::<Tz>()
        .map_err(|e| serde::de::Error::custom(format!("unknown time zone '{name}': {e}")))
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("spot_id", &self.spot_id)
            .field("access_token", &mask(&self.access_token))
            .field("timeout_secs", &self.timeout_secs)
            .field("cooldown_secs", &self.cooldown_secs)
            .finish()
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "***" }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Read, parse, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate without touching the environment.
    pub fn from_toml_str(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay secrets found through `lookup` (normally the process
    /// environment) onto the API section. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_ACCESS_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.api.access_token = token;
        }
        if let Some(spot) = lookup(ENV_SPOT_ID).filter(|v| !v.trim().is_empty()) {
            self.api.spot_id = spot;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url must not be empty".into()));
        }
        if self.project.window_days == 0 {
            return Err(ConfigError::Invalid("project.window_days must be at least 1".into()));
        }
        if self.project.workers == 0 {
            return Err(ConfigError::Invalid("project.workers must be at least 1".into()));
        }
        for (key, value) in [
            ("project.start_date", &self.project.start_date),
            ("project.end_date", &self.project.end_date),
        ] {
            if let Some(date) = value {
                NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| {
                    ConfigError::Invalid(format!("{key} '{date}' is not a YYYY-MM-DD date"))
                })?;
            }
        }
        for name in self.entities.keys() {
            self.entity(name)?;
        }
        Ok(())
    }

    /// Configured entity names, in file-independent (sorted) order.
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    /// Resolve one configured entity against the registry defaults.
    pub fn entity(&self, name: &str) -> Result<EntitySpec, ConfigError> {
        let cfg = self
            .entities
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEntity(name.to_string()))?;
        let defaults = entities::find_entity(name);

        let json_path = cfg
            .json_path
            .clone()
            .or_else(|| defaults.map(|d| d.json_path()))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::Invalid(format!("entity '{name}' has no json_path")))?;

        let flatten = cfg
            .normalize
            .clone()
            .or_else(|| defaults.map(|d| d.flatten_rules()))
            .unwrap_or_default();

        let mut profile = defaults.map(|d| d.profile()).unwrap_or_default();
        if let Some(anchor) = &cfg.time_anchor {
            profile.time_anchor = anchor.clone();
        }
        if let Some(dedup) = cfg.dedup {
            profile.dedup = dedup;
        }
        if let Some(columns) = &cfg.epoch_columns {
            profile.epoch_columns = columns.clone();
        }

        let mut params = BTreeMap::new();
        for (key, value) in &cfg.params {
            params.insert(key.clone(), param_value(name, key, value)?);
        }

        Ok(EntitySpec {
            name: name.to_string(),
            url: cfg
                .endpoint
                .clone()
                .unwrap_or_else(|| join_url(&self.api.base_url, name)),
            json_path,
            flatten,
            params,
            profile,
        })
    }
}

fn join_url(base: &str, entity: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{entity}")
    } else {
        format!("{base}/{entity}")
    }
}

fn param_value(entity: &str, key: &str, value: &toml::Value) -> Result<String, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        _ => Err(ConfigError::Invalid(format!(
            "entities.{entity}.params.{key} must be a scalar"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Resolved entity and request parameters
// ---------------------------------------------------------------------------

/// Everything needed to fetch and consolidate one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpec {
    pub name: String,
    pub url: String,
    pub json_path: Vec<String>,
    pub flatten: FlattenRules,
    /// Query overrides, applied last.
    pub params: BTreeMap<String, String>,
    pub profile: EntityProfile,
}

/// Frozen query string for one request, in send order.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    /// Shared defaults first (`spotId`, `days`, `intervalHours`, `start`,
    /// `accesstoken`), then the entity's overrides on top.
    pub fn for_window(api: &ApiConfig, entity: &EntitySpec, window: &Window) -> Self {
        let days = entity
            .params
            .get("days")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WINDOW_SPAN_DAYS.to_string());
        let mut params = RequestParams {
            pairs: vec![
                ("spotId".to_string(), api.spot_id.clone()),
                ("days".to_string(), days),
                ("intervalHours".to_string(), INTERVAL_HOURS.to_string()),
                ("start".to_string(), window.start_param()),
                ("accesstoken".to_string(), api.access_token.clone()),
            ],
        };
        for (key, value) in &entity.params {
            params.upsert(key, value);
        }
        params
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        RequestParams {
            pairs: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn upsert(&mut self, key: &str, value: &str) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value.to_string(),
            None => self.pairs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The window start marker; empty if the request carries none.
    pub fn start(&self) -> &str {
        self.get("start").unwrap_or_default()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl fmt::Debug for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.pairs {
            if key == "accesstoken" {
                map.entry(key, &mask(value));
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[project]
name = "surfline-itauna"
output_dir = "data/bronze"
capture_raw = true
start_date = "2024-01-01"
end_date = "2024-03-31"

[api]
base_url = "https://services.surfline.com/kbyg/spots/forecasts/"
spot_id = "5842041f4e65fad6a7708b48"
access_token = "from-file"

[entities.wind]

[entities.swells]

[entities.sunlight]
params = { days = 17 }

[entities.custom]
json_path = ["data", "custom"]
endpoint = "http://localhost:9/custom"
dedup = "row"

[dbt]
project_dir = "dbt_surfline"
profiles_dir = "dbt_surfline"
"#;

    fn sample() -> Config {
        Config::from_toml_str(SAMPLE).expect("sample config should parse")
    }

    #[test]
    fn test_defaults_are_applied() {
        let config = sample();
        assert_eq!(config.project.timezone, chrono_tz::America::Sao_Paulo);
        assert_eq!(config.project.window_days, 16);
        assert_eq!(config.project.workers, 2);
        assert_eq!(config.project.entity_pause_secs, 15);
        assert_eq!(config.project.raw_dir, PathBuf::from("data/landing/surfline_raw"));
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
        assert_eq!(config.api.cooldown(), Duration::from_secs(2));
        assert_eq!(config.dbt.as_ref().map(|d| d.executable.as_str()), Some("dbt"));
    }

    #[test]
    fn test_entity_resolves_registry_defaults() {
        let swells = sample().entity("swells").unwrap();
        assert_eq!(swells.url, "https://services.surfline.com/kbyg/spots/forecasts/swells");
        assert_eq!(swells.json_path, vec!["data", "swells"]);
        assert_eq!(swells.profile.dedup, DedupStrategy::Row);
        assert_eq!(swells.flatten.record_path, vec!["swells"]);
    }

    #[test]
    fn test_unregistered_entity_uses_config_and_default_profile() {
        let custom = sample().entity("custom").unwrap();
        assert_eq!(custom.url, "http://localhost:9/custom");
        assert_eq!(custom.profile.dedup, DedupStrategy::Row);
        assert_eq!(custom.profile.time_anchor, entities::LOCAL_TIME_COLUMN);
    }

    #[test]
    fn test_unknown_entity_is_an_error() {
        assert!(matches!(
            sample().entity("tsunami"),
            Err(ConfigError::UnknownEntity(name)) if name == "tsunami"
        ));
    }

    #[test]
    fn test_request_params_merge_overrides_in_order() {
        let config = sample();
        let window = Window::new(NaiveDate::from_ymd_opt(2024, 1, 17).unwrap());

        let wind = RequestParams::for_window(&config.api, &config.entity("wind").unwrap(), &window);
        let keys: Vec<&str> = wind.pairs().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["spotId", "days", "intervalHours", "start", "accesstoken"]);
        assert_eq!(wind.get("days"), Some("16"));
        assert_eq!(wind.start(), "2024-01-17");

        let sunlight =
            RequestParams::for_window(&config.api, &config.entity("sunlight").unwrap(), &window);
        assert_eq!(sunlight.get("days"), Some("17"), "entity override wins");
        assert_eq!(sunlight.pairs().len(), 5, "override replaces, never duplicates");
    }

    #[test]
    fn test_debug_output_masks_access_token() {
        let config = sample();
        let window = Window::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let params = RequestParams::for_window(&config.api, &config.entity("wind").unwrap(), &window);
        let printed = format!("{params:?} {:?}", config.api);
        assert!(!printed.contains("from-file"), "token leaked: {printed}");
    }

    #[test]
    fn test_env_overrides_replace_secrets() {
        let mut config = sample();
        config.apply_overrides(|key| match key {
            ENV_ACCESS_TOKEN => Some("from-env".to_string()),
            ENV_SPOT_ID => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.api.access_token, "from-env");
        assert_eq!(config.api.spot_id, "5842041f4e65fad6a7708b48", "empty override ignored");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_tz = SAMPLE.replace("capture_raw = true", "capture_raw = true\ntimezone = \"Mars/Olympus\"");
        assert!(matches!(Config::from_toml_str(&bad_tz), Err(ConfigError::Parse { .. })));

        let bad_date = SAMPLE.replace("2024-03-31", "31/03/2024");
        assert!(matches!(Config::from_toml_str(&bad_date), Err(ConfigError::Invalid(_))));

        let no_path = SAMPLE.replace("json_path = [\"data\", \"custom\"]", "");
        assert!(matches!(Config::from_toml_str(&no_path), Err(ConfigError::Invalid(_))));
    }
}
