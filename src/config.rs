use std::collections::HashMap;

use rml_core::{DataModelKind, RmlError};
use serde::{Deserialize, Serialize};

/// Framework-wide configuration, loaded from the core TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// The `[core.*]` sections.
    #[serde(default)]
    pub core: CoreSections,
}

/// The `[core.*]` section group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreSections {
    /// `[core.logging]`
    #[serde(default)]
    pub logging: LoggingConfig,
    /// `[core.performance]`
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// `[core.security]`
    #[serde(default)]
    pub security: SecurityConfig,
    /// `[core.developer]`
    #[serde(default)]
    pub developer: DeveloperConfig,
    /// `[core.paths]`
    #[serde(default)]
    pub paths: PathsConfig,
}

/// `[core.logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level emitted (`trace`..`error`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// `[core.performance]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Cap on scripts queued across all priorities of one engine.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_max_queue_size() -> usize {
    10_000
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
        }
    }
}

/// `[core.security]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Whether user scripts may call into the bridge by default.
    #[serde(default)]
    pub allow_bridge_by_default: bool,
}

/// `[core.paths]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory the `@rml/` require prefix resolves against.
    #[serde(default = "default_framework_scripts")]
    pub framework_scripts: String,
}

fn default_framework_scripts() -> String {
    "framework".to_owned()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            framework_scripts: default_framework_scripts(),
        }
    }
}

/// `[core.developer]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeveloperConfig {
    /// Extra diagnostics for script execution.
    #[serde(default)]
    pub debug_scripts: bool,
    /// Log every hook enable/disable.
    #[serde(default)]
    pub verbose_hooks: bool,
}

impl CoreConfig {
    /// Parses the core configuration from TOML.
    pub fn from_toml(text: &str) -> Result<Self, RmlError> {
        toml::from_str(text).map_err(|err| {
            tracing::error!(%err, "core config rejected");
            RmlError::Other("invalid core configuration")
        })
    }
}

/// One mod's `mod.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModManifest {
    /// `[runtime]` — identity and dependencies.
    #[serde(default)]
    pub runtime: RuntimeSection,
    /// `[resources]` — bundled assets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesSection>,
    /// `[custom]` — free-form per-mod settings, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<toml::Table>,
    /// `[datamodel_context]` — which scripts run in which universe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datamodel_context: Option<DataModelContext>,
}

/// `[runtime]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// The mod's name.
    #[serde(default)]
    pub name: String,
    /// Version string.
    #[serde(default)]
    pub version: String,
    /// Author string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Names of mods that must load first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

/// `[resources]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesSection {
    /// Glob patterns of bundled asset files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<String>>,
}

/// `[datamodel_context]` — per-universe script glob arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataModelContext {
    /// Scripts for the stand-alone universe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standalone: Option<Vec<String>>,
    /// Scripts for the studio edit universe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit: Option<Vec<String>>,
    /// Scripts for client universes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Vec<String>>,
    /// Scripts for server universes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<Vec<String>>,
}

impl ModManifest {
    /// Parses a `mod.toml`.
    pub fn from_toml(text: &str) -> Result<Self, RmlError> {
        toml::from_str(text).map_err(|err| {
            tracing::error!(%err, "mod manifest rejected");
            RmlError::Other("invalid mod manifest")
        })
    }

    /// Serializes back to TOML. Round-trips through
    /// [`from_toml`](Self::from_toml) without loss.
    pub fn to_toml(&self) -> Result<String, RmlError> {
        toml::to_string(self).map_err(|err| {
            tracing::error!(%err, "mod manifest serialization failed");
            RmlError::Other("mod manifest serialization failed")
        })
    }

    /// The script glob patterns keyed by universe, for script discovery.
    pub fn patterns_by_kind(&self) -> HashMap<DataModelKind, Vec<String>> {
        let mut patterns = HashMap::new();

        let Some(context) = &self.datamodel_context else {
            return patterns;
        };

        let per_kind = [
            (DataModelKind::Standalone, &context.standalone),
            (DataModelKind::Edit, &context.edit),
            (DataModelKind::Client, &context.client),
            (DataModelKind::Server, &context.server),
        ];

        for (kind, globs) in per_kind {
            if let Some(globs) = globs {
                patterns.insert(kind, globs.clone());
            }
        }

        patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        [runtime]
        name = "example"
        version = "0.1.0"
        author = "someone"
        dependencies = ["base"]

        [resources]
        assets = ["assets/*.png"]

        [custom]
        greeting = "hello"

        [datamodel_context]
        client = ["scripts/client/*.lua"]
        server = ["scripts/server/*.lua"]
    "#;

    #[test]
    fn manifest_round_trips() {
        let parsed = ModManifest::from_toml(MANIFEST).unwrap();
        let emitted = parsed.to_toml().unwrap();
        let reparsed = ModManifest::from_toml(&emitted).unwrap();

        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn optional_sections_default_cleanly() {
        let parsed = ModManifest::from_toml("[runtime]\nname = \"tiny\"\n").unwrap();

        assert_eq!(parsed.runtime.name, "tiny");
        assert!(parsed.runtime.author.is_none());
        assert!(parsed.resources.is_none());
        assert!(parsed.datamodel_context.is_none());
        assert!(parsed.patterns_by_kind().is_empty());

        // Round-trip with everything defaulted.
        let reparsed = ModManifest::from_toml(&parsed.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn patterns_map_to_their_universe() {
        let parsed = ModManifest::from_toml(MANIFEST).unwrap();
        let patterns = parsed.patterns_by_kind();

        assert_eq!(patterns.len(), 2);
        assert_eq!(
            patterns[&DataModelKind::Client],
            vec!["scripts/client/*.lua".to_owned()]
        );
        assert!(!patterns.contains_key(&DataModelKind::Standalone));
    }

    #[test]
    fn core_config_defaults_are_sensible() {
        let config = CoreConfig::from_toml("").unwrap();

        assert_eq!(config.core.logging.level, "info");
        assert_eq!(config.core.performance.max_queue_size, 10_000);
        assert!(!config.core.security.allow_bridge_by_default);
        assert_eq!(config.core.paths.framework_scripts, "framework");

        let explicit = CoreConfig::from_toml(
            "[core.performance]\nmax_queue_size = 64\n[core.logging]\nlevel = \"debug\"\n",
        )
        .unwrap();
        assert_eq!(explicit.core.performance.max_queue_size, 64);
        assert_eq!(explicit.core.logging.level, "debug");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(ModManifest::from_toml("[runtime\nname=").is_err());
        assert!(CoreConfig::from_toml("core = 5").is_err());
    }
}
