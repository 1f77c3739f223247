use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use storefront_protocol::Coordinates;

use crate::cache::CollectionName;
use crate::util::{env_bool, env_string, env_u64};

pub const ENV_BASE_URL: &str = "STOREFRONT_BASE_URL";
pub const ENV_LOCATION_DEBOUNCE_MS: &str = "STOREFRONT_LOCATION_DEBOUNCE_MS";
pub const ENV_RELAXATION: &str = "STOREFRONT_RELAXATION";
pub const ENV_SESSION: &str = "STOREFRONT_SESSION";
pub const ENV_SNAPSHOT_DIR: &str = "STOREFRONT_SNAPSHOT_DIR";

pub const ENV_OVERRIDE_KEYS: &[&str] = &[
    ENV_BASE_URL,
    ENV_LOCATION_DEBOUNCE_MS,
    ENV_RELAXATION,
    ENV_SESSION,
    ENV_SNAPSHOT_DIR,
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct FeedConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub default_location: LocationConfig,
    #[serde(default)]
    pub triggers: TriggersConfig,
    #[serde(default)]
    pub relaxation: RelaxationConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Where the listing collections are served from.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct EndpointsConfig {
    /// Base URL of the catalog API, e.g. <https://shop.example.com>
    pub base_url: String,
    pub primary_path: String,
    pub secondary_path: String,
    pub overlay_path: String,
    /// Postal-code geocoding endpoint used by the HTTP resolver.
    pub geocode_path: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            primary_path: "/api/products".to_string(),
            secondary_path: "/api/stores".to_string(),
            overlay_path: "/api/flash-sales".to_string(),
            geocode_path: "/api/geocode".to_string(),
        }
    }
}

impl EndpointsConfig {
    pub fn path_for(&self, collection: CollectionName) -> &str {
        match collection {
            CollectionName::Primary => &self.primary_path,
            CollectionName::Secondary => &self.secondary_path,
            CollectionName::Overlay => &self.overlay_path,
        }
    }
}

/// Operator-configured fallback location.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct LocationConfig {
    #[schemars(range(min = -90, max = 90))]
    pub lat: f64,
    #[schemars(range(min = -180, max = 180))]
    pub lng: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            lat: 51.5074,
            lng: -0.1278,
        }
    }
}

impl LocationConfig {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct TriggersConfig {
    /// Quiet window before a location update triggers a refetch.
    pub location_debounce_ms: u64,
}

impl Default for TriggersConfig {
    fn default() -> Self {
        Self {
            location_debounce_ms: 300,
        }
    }
}

impl TriggersConfig {
    pub fn location_debounce(&self) -> Duration {
        Duration::from_millis(self.location_debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct RelaxationConfig {
    /// Clear category/offers filters once when the first load is empty.
    pub enabled: bool,
    /// Only consider the first completed primary fetch.
    pub first_load_only: bool,
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            first_load_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Browsing session the snapshots belong to.
    pub session: String,
    /// Directory for file snapshots; defaults to the platform cache dir.
    pub dir: Option<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            session: "default".to_string(),
            dir: None,
        }
    }
}

impl SnapshotConfig {
    pub fn dir_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(PathBuf::from)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 3,
            request_timeout_secs: 15,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl FeedConfig {
    /// Apply `STOREFRONT_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(base) = env_string(ENV_BASE_URL) {
            self.endpoints.base_url = base;
        }
        if let Some(ms) = env_u64(ENV_LOCATION_DEBOUNCE_MS) {
            self.triggers.location_debounce_ms = ms;
        }
        if let Some(enabled) = env_bool(ENV_RELAXATION) {
            self.relaxation.enabled = enabled;
        }
        if let Some(session) = env_string(ENV_SESSION) {
            self.snapshot.session = session;
        }
        if let Some(dir) = env_string(ENV_SNAPSHOT_DIR) {
            self.snapshot.dir = Some(dir);
        }
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(FeedConfig);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(FeedConfig);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn write_schema_file(path: &str) -> std::io::Result<()> {
    let schema_json = config_schema_json();
    std::fs::write(path, serde_json::to_string_pretty(&schema_json)?)
}

/// Load a TOML config file, validate it against the schema, then apply
/// environment overrides.
pub fn load_config(path: &str) -> Result<FeedConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading config at {path}"))?;
    let mut cfg = parse_config(&content).with_context(|| format!("parsing config at {path}"))?;
    cfg.apply_env_overrides();
    Ok(cfg)
}

fn parse_config(content: &str) -> Result<FeedConfig> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: FeedConfig = toml::from_str(content)?;
    Ok(cfg)
}
