//! Engine configuration.
//!
//! Loaded from `reconcile.yml` in the project root when present. A `.env`
//! file next to it is read first so the `RECONCILE_*` overrides can live there.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "reconcile.yml";
pub const STATE_DIR: &str = ".reconcile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategyKind {
    Heuristic,
    Collaborator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    Http,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub kind: GeneratorKind,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Program and arguments for `kind: command`.
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Http,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            timeout_secs: 120,
            command: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub extension: String,
    pub timeout_secs: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            program: "dart".to_string(),
            args: strings(&["analyze", "--fatal-infos", "--fatal-warnings"]),
            extension: "dart".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevServerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub device: Option<String>,
    pub ready_marker: String,
    pub ready_timeout_secs: u64,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            program: "flutter".to_string(),
            args: strings(&["run"]),
            device: None,
            ready_marker: "Flutter run key commands".to_string(),
            ready_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub folder: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder: format!("{}/cache", STATE_DIR),
        }
    }
}

/// All tunables of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub entry_file: String,
    pub manifest_file: String,
    pub source_extensions: Vec<String>,
    pub tracked_files: Vec<String>,
    pub ignored_dirs: Vec<String>,
    pub rescan_after_write: bool,
    pub max_plan_attempts: usize,
    pub max_generation_attempts: usize,
    pub max_merge_attempts: usize,
    pub max_repair_attempts: usize,
    pub max_context_length: usize,
    pub merge_strategy: MergeStrategyKind,
    pub revert_on_structural_failure: bool,
    pub skip_structural_check: bool,
    pub critical_patterns: Vec<String>,
    pub essential_packages: Vec<String>,
    pub reserved_packages: Vec<String>,
    pub generator: GeneratorConfig,
    pub checker: CheckerConfig,
    pub dev_server: DevServerConfig,
    pub cache: CacheConfig,
    pub prompts_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_file: "lib/main.dart".to_string(),
            manifest_file: "pubspec.yaml".to_string(),
            source_extensions: strings(&["dart"]),
            tracked_files: strings(&["pubspec.yaml"]),
            ignored_dirs: strings(&[
                ".dart_tool", "build", ".git", ".idea", STATE_DIR, "ios", "android", "macos",
                "linux", "windows", "web",
            ]),
            rescan_after_write: false,
            max_plan_attempts: 3,
            max_generation_attempts: 3,
            max_merge_attempts: 3,
            max_repair_attempts: 1,
            max_context_length: 100_000,
            merge_strategy: MergeStrategyKind::Heuristic,
            revert_on_structural_failure: true,
            skip_structural_check: false,
            critical_patterns: strings(&[
                r"Error:",
                r"Compilation failed",
                r"Undefined name",
                r"The method .* isn't defined",
                r"The class .* isn't defined",
                r"Undefined class",
                r"Invalid syntax",
                r"Expected to find",
            ]),
            essential_packages: strings(&[
                "provider",
                "shared_preferences",
                "http",
                "path_provider",
                "sqflite",
                "dio",
                "flutter_bloc",
                "flutter_riverpod",
                "hive",
                "hive_flutter",
                "intl",
            ]),
            reserved_packages: strings(&["flutter", "dart", "flutter_test"]),
            generator: GeneratorConfig::default(),
            checker: CheckerConfig::default(),
            dev_server: DevServerConfig::default(),
            cache: CacheConfig::default(),
            prompts_dir: "prompts".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads the configuration for a project root.
    ///
    /// Missing config file means defaults; a present but unparsable one is an error.
    pub fn load(root: &Path) -> Result<Self> {
        let env_path = root.join(".env");
        if env_path.exists() {
            dotenvy::from_path(&env_path)
                .with_context(|| format!("Failed to load {}", env_path.display()))?;
        }

        let config_path = root.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(model) = env::var("RECONCILE_MODEL") {
            self.generator.model = model;
        }
        if let Ok(endpoint) = env::var("RECONCILE_ENDPOINT") {
            self.generator.endpoint = endpoint;
        }
        if let Ok(key) = env::var("RECONCILE_API_KEY") {
            self.generator.api_key = Some(key);
        }
        if let Ok(skip) = env::var("RECONCILE_SKIP_CHECK") {
            self.skip_structural_check = matches!(skip.trim(), "1" | "true" | "yes");
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
