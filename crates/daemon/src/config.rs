//! Configuration management for the vdesk daemon.
//!
//! Configuration is loaded from TOML files in the following locations (in order):
//! 1. `%APPDATA%/vdesk/config.toml` (Windows standard)
//! 2. `~/.config/vdesk/config.toml` (Unix-style, for WSL compatibility)
//! 3. `./config.toml` (current directory, for development)

use anyhow::{Context, Result};
use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vdesk_core::{DesktopOptions, PolicyConfig, ProcessRule, WindowPattern};
use vdesk_platform_win32::PlatformConfig;

/// Main configuration structure for vdesk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Behavior configuration.
    pub behavior: BehaviorConfig,
    /// Timeouts and polling intervals.
    pub timing: TimingConfig,
    /// Windows never managed, in addition to the built-in shell windows.
    #[serde(default)]
    pub deny: Vec<WindowPattern>,
    /// Per-process filter and hide rules.
    #[serde(default, rename = "process")]
    pub processes: Vec<ProcessRule>,
}

/// Behavior-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often the live window list is reconciled, in milliseconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,

    /// Ignore windows that stop responding instead of reporting them.
    #[serde(default = "default_false")]
    pub auto_ignore_unresponsive: bool,

    /// Recreate the desktops stored at the last shutdown.
    #[serde(default = "default_true")]
    pub restore_sessions: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            refresh_interval_ms: default_refresh_interval(),
            auto_ignore_unresponsive: false,
            restore_sessions: true,
        }
    }
}

/// Timing-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long a window may take to acknowledge a show or hide.
    #[serde(default = "default_reposition_timeout")]
    pub reposition_timeout_ms: u64,

    /// How often a suspending desktop checks whether its processes exited.
    #[serde(default = "default_suspend_poll_interval")]
    pub suspend_poll_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reposition_timeout_ms: default_reposition_timeout(),
            suspend_poll_interval_ms: default_suspend_poll_interval(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refresh_interval() -> u64 {
    1000
}

fn default_reposition_timeout() -> u64 {
    3000
}

fn default_suspend_poll_interval() -> u64 {
    1000
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

const MIN_REFRESH_INTERVAL_MS: u64 = 100;
const MIN_REPOSITION_TIMEOUT_MS: u64 = 100;
const MAX_REPOSITION_TIMEOUT_MS: u64 = 60_000;
const MIN_SUSPEND_POLL_INTERVAL_MS: u64 = 10;

/// A problem found and corrected by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ConfigWarning {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn pattern_error(pattern: &str) -> Option<String> {
    Regex::new(&format!("^(?:{pattern})$"))
        .err()
        .map(|e| e.to_string())
}

fn clamp_field(value: &mut u64, min: u64, max: u64, field: &str, warnings: &mut Vec<ConfigWarning>) {
    let clamped = (*value).clamp(min, max);
    if clamped != *value {
        warnings.push(ConfigWarning::new(
            field,
            format!("{} is out of range, using {}", value, clamped),
        ));
        *value = clamped;
    }
}

impl Config {
    /// Load configuration from standard locations.
    ///
    /// Tries the following locations in order:
    /// 1. `%APPDATA%/vdesk/config.toml`
    /// 2. `~/.config/vdesk/config.toml`
    /// 3. `./config.toml`
    ///
    /// Returns default config if no file is found.
    pub fn load() -> Result<Self> {
        let paths = config_paths();

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Clamp out-of-range values and drop entries that cannot be compiled.
    ///
    /// After this returns, [`Config::policy_config`] always compiles.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let level = self.behavior.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            warnings.push(ConfigWarning::new(
                "behavior.log_level",
                format!("unknown level '{}', using info", self.behavior.log_level),
            ));
            self.behavior.log_level = default_log_level();
        }

        clamp_field(
            &mut self.behavior.refresh_interval_ms,
            MIN_REFRESH_INTERVAL_MS,
            u64::MAX,
            "behavior.refresh_interval_ms",
            &mut warnings,
        );
        clamp_field(
            &mut self.timing.reposition_timeout_ms,
            MIN_REPOSITION_TIMEOUT_MS,
            MAX_REPOSITION_TIMEOUT_MS,
            "timing.reposition_timeout_ms",
            &mut warnings,
        );
        clamp_field(
            &mut self.timing.suspend_poll_interval_ms,
            MIN_SUSPEND_POLL_INTERVAL_MS,
            u64::MAX,
            "timing.suspend_poll_interval_ms",
            &mut warnings,
        );

        let mut kept = Vec::with_capacity(self.deny.len());
        for (i, pattern) in self.deny.drain(..).enumerate() {
            let field = format!("deny[{}]", i);
            if pattern.class.is_none() && pattern.visible.is_none() {
                warnings.push(ConfigWarning::new(field, "entry matches nothing, dropped"));
                continue;
            }
            if let Some(error) = pattern.class.as_deref().and_then(pattern_error) {
                warnings.push(ConfigWarning::new(field, format!("{}, dropped", error)));
                continue;
            }
            kept.push(pattern);
        }
        self.deny = kept;

        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(self.processes.len());
        for (i, mut rule) in self.processes.drain(..).enumerate() {
            let field = format!("process[{}]", i);
            if rule.name.trim().is_empty() {
                warnings.push(ConfigWarning::new(field, "missing process name, dropped"));
                continue;
            }
            let key = (rule.name.to_lowercase(), rule.version.clone());
            if !seen.insert(key) {
                warnings.push(ConfigWarning::new(
                    field,
                    format!("duplicate rule for '{}', dropped", rule.name),
                ));
                continue;
            }

            let before = rule.ignore.classes.len() + rule.include.len();
            rule.ignore.classes.retain(|p| pattern_error(p).is_none());
            rule.include.retain(|p| pattern_error(p).is_none());
            let dropped = before - rule.ignore.classes.len() - rule.include.len();
            if dropped > 0 {
                warnings.push(ConfigWarning::new(
                    field,
                    format!("{} invalid class pattern(s) dropped", dropped),
                ));
            }
            kept.push(rule);
        }
        self.processes = kept;

        warnings
    }

    /// Built-in deny list followed by the configured entries and rules.
    pub fn policy_config(&self) -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy.deny.extend(self.deny.iter().cloned());
        policy.processes = self.processes.clone();
        policy
    }

    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            reposition_timeout: Duration::from_millis(self.timing.reposition_timeout_ms),
        }
    }

    pub fn desktop_options(&self) -> DesktopOptions {
        DesktopOptions {
            suspend_poll_interval: Duration::from_millis(self.timing.suspend_poll_interval_ms),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.behavior.refresh_interval_ms)
    }
}

/// Get all possible config file paths in priority order.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Windows standard: %APPDATA%/vdesk/config.toml
    if let Some(proj_dirs) = ProjectDirs::from("com", "vdesk", "vdesk") {
        paths.push(proj_dirs.config_dir().join("config.toml"));
    }

    // 2. Unix-style: ~/.config/vdesk/config.toml
    if let Some(home) = dirs_home() {
        paths.push(home.join(".config").join("vdesk").join("config.toml"));
    }

    // 3. Current directory: ./config.toml
    paths.push(PathBuf::from("config.toml"));

    paths
}

/// Where stored desktops are kept between runs.
pub fn sessions_path() -> PathBuf {
    ProjectDirs::from("com", "vdesk", "vdesk")
        .map(|dirs| dirs.data_dir().join("sessions.json"))
        .unwrap_or_else(|| PathBuf::from("sessions.json"))
}

/// Get the user's home directory.
fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdesk_core::{HideBehavior, IgnoreMode, WindowPolicy};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.behavior.log_level, "info");
        assert_eq!(config.behavior.refresh_interval_ms, 1000);
        assert!(!config.behavior.auto_ignore_unresponsive);
        assert!(config.behavior.restore_sessions);
        assert_eq!(config.timing.reposition_timeout_ms, 3000);
        assert_eq!(config.timing.suspend_poll_interval_ms, 1000);
        assert!(config.deny.is_empty());
        assert!(config.processes.is_empty());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = Config::default();
        config.deny.push(WindowPattern::class("ConsoleWindowClass"));
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.behavior.refresh_interval_ms, config.behavior.refresh_interval_ms);
        assert_eq!(parsed.deny, config.deny);
    }

    #[test]
    fn test_config_partial_parse() {
        // Config with only some fields should use defaults for the rest
        let toml_str = r#"
            [timing]
            reposition_timeout_ms = 500
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.timing.reposition_timeout_ms, 500);
        assert_eq!(config.timing.suspend_poll_interval_ms, 1000); // default
        assert_eq!(config.behavior.log_level, "info"); // default
    }

    #[test]
    fn test_process_rules_parse() {
        let toml_str = r#"
            [[deny]]
            class = "ConsoleWindowClass"

            [[deny]]
            visible = false

            [[process]]
            name = "explorer.exe"
            version = "10.0"
            hide = "include_list"
            include = ["CabinetWClass"]

            [process.ignore]
            mode = "all_except_these"
            classes = ["CabinetWClass", "ExploreWClass"]

            [[process]]
            name = "chrome.exe"
            hide = "all_process_windows"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.deny.len(), 2);
        assert_eq!(config.deny[1].visible, Some(false));
        assert_eq!(config.processes.len(), 2);

        let explorer = &config.processes[0];
        assert_eq!(explorer.version.as_deref(), Some("10.0"));
        assert_eq!(explorer.hide, HideBehavior::IncludeList);
        assert_eq!(explorer.ignore.mode, IgnoreMode::AllExceptThese);
        assert_eq!(explorer.ignore.classes.len(), 2);

        let chrome = &config.processes[1];
        assert_eq!(chrome.hide, HideBehavior::AllProcessWindows);
        assert_eq!(chrome.ignore.mode, IgnoreMode::OnlyThese);
        assert!(chrome.ignore.classes.is_empty());
    }

    #[test]
    fn test_validate_clamps_intervals() {
        let mut config = Config::default();
        config.behavior.refresh_interval_ms = 0;
        config.timing.reposition_timeout_ms = 600_000;
        config.timing.suspend_poll_interval_ms = 1;

        let warnings = config.validate();

        assert_eq!(warnings.len(), 3);
        assert_eq!(config.behavior.refresh_interval_ms, MIN_REFRESH_INTERVAL_MS);
        assert_eq!(config.timing.reposition_timeout_ms, MAX_REPOSITION_TIMEOUT_MS);
        assert_eq!(config.timing.suspend_poll_interval_ms, MIN_SUSPEND_POLL_INTERVAL_MS);
        assert!(warnings.iter().any(|w| w.field == "timing.reposition_timeout_ms"));
    }

    #[test]
    fn test_validate_resets_unknown_log_level() {
        let mut config = Config::default();
        config.behavior.log_level = "verbose".into();

        let warnings = config.validate();

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "behavior.log_level");
        assert_eq!(config.behavior.log_level, "info");

        config.behavior.log_level = "DEBUG".into();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validate_drops_invalid_patterns() {
        let mut config = Config::default();
        config.deny = vec![
            WindowPattern::class("Valid.*"),
            WindowPattern::class("(unclosed"),
            WindowPattern::default(),
        ];
        config.processes = vec![
            ProcessRule {
                name: "app.exe".into(),
                include: vec!["Good".into(), "[bad".into()],
                ..Default::default()
            },
            ProcessRule {
                name: "APP.EXE".into(),
                ..Default::default()
            },
            ProcessRule::default(),
        ];

        let warnings = config.validate();

        assert_eq!(warnings.len(), 5);
        assert_eq!(config.deny, vec![WindowPattern::class("Valid.*")]);
        assert_eq!(config.processes.len(), 1);
        assert_eq!(config.processes[0].include, vec!["Good".to_string()]);
        assert!(WindowPolicy::new(&config.policy_config(), 0).is_ok());
    }

    #[test]
    fn test_policy_config_extends_builtin_deny_list() {
        let mut config = Config::default();
        config.deny.push(WindowPattern::class("ConsoleWindowClass"));

        let policy = config.policy_config();
        let builtin = PolicyConfig::default().deny;

        assert_eq!(policy.deny.len(), builtin.len() + 1);
        assert!(policy.deny.starts_with(&builtin));
        assert_eq!(policy.deny.last(), Some(&WindowPattern::class("ConsoleWindowClass")));
    }

    #[test]
    fn test_derived_settings() {
        let toml_str = r#"
            [behavior]
            refresh_interval_ms = 250

            [timing]
            reposition_timeout_ms = 1500
            suspend_poll_interval_ms = 200
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.refresh_interval(), Duration::from_millis(250));
        assert_eq!(
            config.platform_config().reposition_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(
            config.desktop_options().suspend_poll_interval,
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_load_from_path() {
        let path = std::env::temp_dir().join(format!("vdesk-config-{}.toml", std::process::id()));
        fs::write(&path, "[behavior]\nrestore_sessions = false\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert!(!config.behavior.restore_sessions);

        fs::write(&path, "[behavior\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_config_paths_not_empty() {
        let paths = config_paths();
        assert!(!paths.is_empty());
        assert_eq!(paths.last(), Some(&PathBuf::from("config.toml")));
        assert!(sessions_path().ends_with("sessions.json"));
    }
}
