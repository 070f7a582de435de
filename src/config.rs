//! Build settings for entangler-sim.
//!
//! Settings are loaded from multiple sources in priority order:
//! 1. Environment variables (ENTANGLER_NUM_INPUTS, etc.)
//! 2. Project-local config file (`./entangler-sim.toml`)
//! 3. User config file (`~/.config/entangler-sim/config.toml`)
//! 4. Built-in defaults
//!
//! They describe what a core is built with (channel counts, reference line,
//! link pins). Run-time values such as cycle length and timeout go through
//! the register file instead.
//!
//! # Config File Format
//!
//! ```toml
//! # entangler-sim.toml
//! num_outputs = 4
//! num_inputs = 4
//! num_patterns = 4
//! use_reference = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::device::{core_spec, ConfigError, CoreLayout, GatingMode};

/// Global cached settings.
static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// entangler-sim settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Number of output channels (pulse units).
    pub num_outputs: Option<usize>,

    /// Number of gated input signals. Also the herald pattern width.
    pub num_inputs: Option<usize>,

    /// Number of herald pattern slots.
    pub num_patterns: Option<usize>,

    /// Build with a reference input line.
    pub use_reference: Option<bool>,

    /// Build with the master/slave link pins.
    pub core_link: Option<bool>,

    /// Gate window reference point.
    pub gating: Option<GatingMode>,
}

impl Settings {
    /// Load settings from all sources.
    pub fn load() -> Self {
        let mut settings = Self::default();

        if let Some(user) = Self::load_user_config() {
            settings.merge(user);
        }

        if let Some(local) = Self::load_local_config() {
            settings.merge(local);
        }

        settings.apply_env_overrides();

        settings
    }

    /// Get the cached global settings.
    ///
    /// Loads settings on first call and caches it.
    pub fn get() -> &'static Settings {
        SETTINGS.get_or_init(|| {
            let settings = Self::load();
            log::debug!("Loaded settings: {:?}", settings);
            settings
        })
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs.unwrap_or(core_spec::DEFAULT_NUM_OUTPUTS)
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs.unwrap_or(core_spec::DEFAULT_NUM_INPUTS)
    }

    pub fn num_patterns(&self) -> usize {
        self.num_patterns.unwrap_or(core_spec::DEFAULT_NUM_PATTERNS)
    }

    pub fn use_reference(&self) -> bool {
        self.use_reference.unwrap_or(false)
    }

    pub fn core_link(&self) -> bool {
        self.core_link.unwrap_or(true)
    }

    pub fn gating(&self) -> GatingMode {
        self.gating.unwrap_or_default()
    }

    /// Validated core layout for these settings.
    pub fn layout(&self) -> Result<CoreLayout, ConfigError> {
        let mut layout = CoreLayout::new(self.num_outputs(), self.num_inputs(), self.num_patterns())
            .with_gating(self.gating());
        if self.use_reference() {
            layout = layout.with_reference();
        }
        if !self.core_link() {
            layout = layout.without_link();
        }
        layout.validate()?;
        Ok(layout)
    }

    /// Load user settings from ~/.config/entangler-sim/config.toml
    fn load_user_config() -> Option<Self> {
        Self::load_from_file(&Self::user_config_path()?)
    }

    /// Load project-local settings from ./entangler-sim.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("entangler-sim.toml");
        if let Some(settings) = Self::load_from_file(local_path) {
            return Some(settings);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("entangler-sim.toml");
            if let Some(settings) = Self::load_from_file(&project_path) {
                return Some(settings);
            }
        }

        None
    }

    /// Load settings from a specific file.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    Some(settings)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge other settings into these.
    /// Only overrides fields that are Some in the other settings.
    pub fn merge(&mut self, other: Self) {
        if other.num_outputs.is_some() {
            self.num_outputs = other.num_outputs;
        }
        if other.num_inputs.is_some() {
            self.num_inputs = other.num_inputs;
        }
        if other.num_patterns.is_some() {
            self.num_patterns = other.num_patterns;
        }
        if other.use_reference.is_some() {
            self.use_reference = other.use_reference;
        }
        if other.core_link.is_some() {
            self.core_link = other.core_link;
        }
        if other.gating.is_some() {
            self.gating = other.gating;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse("ENTANGLER_NUM_OUTPUTS") {
            self.num_outputs = Some(n);
        }
        if let Some(n) = env_parse("ENTANGLER_NUM_INPUTS") {
            self.num_inputs = Some(n);
        }
        if let Some(n) = env_parse("ENTANGLER_NUM_PATTERNS") {
            self.num_patterns = Some(n);
        }
        if let Some(flag) = env_parse("ENTANGLER_USE_REFERENCE") {
            self.use_reference = Some(flag);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("entangler-sim").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# entangler-sim configuration
# Place this file at ~/.config/entangler-sim/config.toml or ./entangler-sim.toml

# Output channels driven by pulse units
num_outputs = 4

# Gated input signals (also the herald pattern width)
num_inputs = 4

# Herald pattern slots; num_patterns * (num_inputs + 1) must fit in 32 bits
num_patterns = 4

# Extra reference input, counted in NTRIGGERS (optional)
# use_reference = true

# Master/slave link pins; without them the core always runs standalone
# core_link = true

# Gate windows relative to the cycle ("cycle") or the reference edge ("reference")
# gating = "cycle"
"#
        .to_string()
    }
}

/// Parse an environment variable, logging values that do not parse.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => {
            log::info!("Using {} from environment: {}", name, value);
            Some(parsed)
        }
        Err(_) => {
            log::warn!("Ignoring {}={}: not a valid value", name, value);
            None
        }
    }
}
