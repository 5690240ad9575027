//! Bridge configuration – reads `/etc/horas/bridge.toml` (or `$HORAS_CONFIG`).

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use horas_middleware::{BridgeConfig, TopicRegistry};
use horas_types::{BridgeError, RecordLimits, Schema};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Used when `HORAS_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/horas/bridge.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialise config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid topic table: {0}")]
    Topics(#[from] BridgeError),
}

/// One `[[topics]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub name: String,
    pub schema: Schema,
}

impl TopicEntry {
    fn new(name: &str, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            schema,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Node name; prefixes the sight topics.
    #[serde(default = "default_node")]
    pub node: String,

    /// Pending records kept per subscription.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_velocity_min")]
    pub velocity_min: f32,

    #[serde(default = "default_velocity_max")]
    pub velocity_max: f32,

    /// Reply timeout for sight requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,

    /// WebSocket tap address.  The tap is off when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_addr: Option<SocketAddr>,

    #[serde(default = "default_topics")]
    pub topics: Vec<TopicEntry>,
}

fn default_node() -> String {
    "horas".to_string()
}
fn default_queue_depth() -> usize {
    1
}
fn default_velocity_min() -> f32 {
    -1.0
}
fn default_velocity_max() -> f32 {
    1.0
}
fn default_request_timeout_ms() -> u64 {
    1000
}
fn default_diagnostics_capacity() -> usize {
    horas_middleware::DEFAULT_DIAGNOSTICS_CAPACITY
}
fn default_topics() -> Vec<TopicEntry> {
    vec![
        TopicEntry::new("can/tx/raw", Schema::Can),
        TopicEntry::new("horas/gnss/state", Schema::Gnss),
        TopicEntry::new("horas/motors", Schema::Motor),
        TopicEntry::new("horas/sight/lrf/tx/raw", Schema::LrfCommand),
        TopicEntry::new("horas/sight/lrf/rx/raw", Schema::LrfReply),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: default_node(),
            queue_depth: default_queue_depth(),
            velocity_min: default_velocity_min(),
            velocity_max: default_velocity_max(),
            request_timeout_ms: default_request_timeout_ms(),
            diagnostics_capacity: default_diagnostics_capacity(),
            tap_addr: None,
            topics: default_topics(),
        }
    }
}

impl Config {
    /// Check the fields that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be at least 1".into()));
        }
        self.limits()?;
        self.registry()?;
        Ok(())
    }

    pub fn limits(&self) -> Result<RecordLimits, ConfigError> {
        RecordLimits::new(self.velocity_min, self.velocity_max)
            .map_err(|v| ConfigError::Invalid(format!("velocity range: {v}")))
    }

    pub fn registry(&self) -> Result<TopicRegistry, ConfigError> {
        let mut registry = TopicRegistry::new();
        for entry in &self.topics {
            registry.register(entry.name.as_str(), entry.schema)?;
        }
        Ok(registry)
    }

    pub fn bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        Ok(BridgeConfig {
            queue_depth: self.queue_depth.max(1),
            limits: self.limits()?,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// `$HORAS_CONFIG`, or [`DEFAULT_CONFIG_PATH`].
pub fn config_path() -> PathBuf {
    std::env::var_os("HORAS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the effective configuration from `path`.
///
/// A missing file yields the defaults.  Environment overrides are applied
/// either way and the result is validated.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let mut cfg = match load_from(path)? {
        Some(cfg) => cfg,
        None => {
            warn!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        }
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(cfg))
}

/// Apply `HORAS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HORAS_NODE` | `node` |
/// | `HORAS_QUEUE_DEPTH` | `queue_depth` |
/// | `HORAS_TAP_ADDR` | `tap_addr` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// Override logic behind [`apply_env_overrides`], with the lookup injected.
pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("HORAS_NODE") {
        cfg.node = v;
    }
    if let Some(v) = lookup("HORAS_QUEUE_DEPTH") {
        match v.parse::<usize>() {
            Ok(depth) => cfg.queue_depth = depth,
            Err(_) => warn!(value = %v, "ignoring invalid HORAS_QUEUE_DEPTH"),
        }
    }
    if let Some(v) = lookup("HORAS_TAP_ADDR") {
        match v.parse::<SocketAddr>() {
            Ok(addr) => cfg.tap_addr = Some(addr),
            Err(_) => warn!(value = %v, "ignoring invalid HORAS_TAP_ADDR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_describe_the_reference_topics() {
        let cfg = Config::default();
        assert_eq!(cfg.node, "horas");
        assert_eq!(cfg.queue_depth, 1);
        assert_eq!(cfg.request_timeout_ms, 1000);
        let registry = cfg.registry().unwrap();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.schema_for("horas/motors"), Some(Schema::Motor));
        assert_eq!(
            registry.schema_for("horas/sight/lrf/rx/raw"),
            Some(Schema::LrfReply)
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bridge.toml");
        fs::write(
            &path,
            r#"
node = "rover-2"
queue_depth = 4
velocity_max = 0.5

[[topics]]
name = "rover-2/motors"
schema = "motor"
"#,
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.node, "rover-2");
        assert_eq!(cfg.queue_depth, 4);
        assert_eq!(cfg.velocity_min, -1.0);
        assert_eq!(cfg.velocity_max, 0.5);
        assert_eq!(cfg.topics, vec![TopicEntry::new("rover-2/motors", Schema::Motor)]);
        assert_eq!(cfg.bridge_config().unwrap().limits.velocity_max, 0.5);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(load_from(&dir.path().join("absent.toml")).unwrap().is_none());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "queue_depth = \"deep\"").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bridge.toml");
        fs::write(&path, "[[topics]]\nname = \"x\"\nschema = \"mr_motor\"\n").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let zero_depth = Config {
            queue_depth: 0,
            ..Config::default()
        };
        assert!(matches!(zero_depth.validate(), Err(ConfigError::Invalid(_))));

        let inverted = Config {
            velocity_min: 1.0,
            velocity_max: -1.0,
            ..Config::default()
        };
        assert!(inverted.validate().is_err());

        let mut clash = Config::default();
        clash.topics.push(TopicEntry::new("horas/motors", Schema::Gnss));
        assert!(matches!(clash.validate(), Err(ConfigError::Topics(_))));

        let mut bad_name = Config::default();
        bad_name.topics.push(TopicEntry::new("/leading", Schema::Can));
        assert!(bad_name.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = Config {
            tap_addr: Some("127.0.0.1:9090".parse().unwrap()),
            ..Config::default()
        };
        let text = cfg.to_toml().unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn overrides_apply() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            lookup(&[
                ("HORAS_NODE", "rover-7"),
                ("HORAS_QUEUE_DEPTH", "3"),
                ("HORAS_TAP_ADDR", "0.0.0.0:9000"),
            ]),
        );
        assert_eq!(cfg.node, "rover-7");
        assert_eq!(cfg.queue_depth, 3);
        assert_eq!(cfg.tap_addr, Some("0.0.0.0:9000".parse().unwrap()));
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            lookup(&[("HORAS_QUEUE_DEPTH", "many"), ("HORAS_TAP_ADDR", "nowhere")]),
        );
        assert_eq!(cfg.queue_depth, 1);
        assert_eq!(cfg.tap_addr, None);
    }

    #[test]
    fn env_override_reaches_loaded_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        // SAFETY: no other test in this crate reads HORAS_NODE.
        unsafe { std::env::set_var("HORAS_NODE", "env-node") };
        let cfg = load(&dir.path().join("absent.toml")).expect("defaults");
        unsafe { std::env::remove_var("HORAS_NODE") };
        assert_eq!(cfg.node, "env-node");
    }
}
