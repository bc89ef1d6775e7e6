//! Window filter and hide-behavior policy.
//!
//! A [`PolicyConfig`] is the declarative form loaded from the config file.
//! [`WindowPolicy`] compiles it once and answers two questions:
//! - should this window be managed at all ([`WindowPolicy::window_filter`])
//! - which windows move together with it ([`WindowPolicy::hide_set`])
//!
//! Per-process rule resolution is cached per window handle and swept on each
//! reconciliation pass.

use crate::platform::{PlatformError, WindowManager};
use crate::window::{WindowHandle, WindowId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid window class pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Matches windows by class name and visibility.
///
/// A pattern with neither field set matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowPattern {
    /// Regex over the whole class name.
    pub class: Option<String>,
    /// Required visibility.
    pub visible: Option<bool>,
}

impl WindowPattern {
    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            visible: None,
        }
    }

    pub fn visibility(visible: bool) -> Self {
        Self {
            class: None,
            visible: Some(visible),
        }
    }
}

/// How a rule's `classes` list selects windows to leave alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreMode {
    /// Only the listed classes are ignored.
    #[default]
    OnlyThese,
    /// Every class except the listed ones is ignored.
    AllExceptThese,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreWindows {
    pub mode: IgnoreMode,
    pub classes: Vec<String>,
}

/// Which windows move together when one window of a process is cut or hidden.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HideBehavior {
    /// Only the window itself.
    #[default]
    SingleWindow,
    /// Every window of the same process.
    AllProcessWindows,
    /// The window plus its process's windows whose class is in `include`.
    IncludeList,
}

/// Behavior for one executable, optionally restricted to a version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessRule {
    /// Executable name, compared case-insensitively.
    pub name: String,
    /// Dotted version prefix, e.g. `"10.0"` matches `10.0.19041.1`.
    pub version: Option<String>,
    pub ignore: IgnoreWindows,
    pub hide: HideBehavior,
    /// Class regexes used with [`HideBehavior::IncludeList`].
    pub include: Vec<String>,
}

/// Declarative window policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Windows never managed, whatever their process.
    pub deny: Vec<WindowPattern>,
    pub processes: Vec<ProcessRule>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            deny: default_deny_list(),
            processes: Vec::new(),
        }
    }
}

/// Shell windows and every invisible window.
pub(crate) fn default_deny_list() -> Vec<WindowPattern> {
    vec![
        WindowPattern::class("Progman"),
        WindowPattern::class("WorkerW"),
        WindowPattern::class("Shell_TrayWnd"),
        WindowPattern::class("Shell_SecondaryTrayWnd"),
        WindowPattern::visibility(false),
    ]
}

fn compile(pattern: &str) -> Result<Regex, PolicyError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| PolicyError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, PolicyError> {
    patterns.iter().map(|p| compile(p)).collect()
}

#[derive(Debug)]
struct CompiledPattern {
    class: Option<Regex>,
    visible: Option<bool>,
}

impl CompiledPattern {
    fn matches(&self, class_name: &str, visible: bool) -> bool {
        if self.class.is_none() && self.visible.is_none() {
            return false;
        }
        self.class.as_ref().map_or(true, |r| r.is_match(class_name))
            && self.visible.map_or(true, |v| v == visible)
    }
}

#[derive(Debug)]
struct CompiledRule {
    name: String,
    version: Option<String>,
    ignore_mode: IgnoreMode,
    ignore: Vec<Regex>,
    hide: HideBehavior,
    include: Vec<Regex>,
}

impl CompiledRule {
    fn matches_version(&self, version: Option<&str>) -> bool {
        match (&self.version, version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(wanted), Some(actual)) => {
                actual == wanted
                    || actual
                        .strip_prefix(wanted.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }
        }
    }

    fn specificity(&self) -> usize {
        self.version.as_ref().map_or(0, String::len)
    }

    fn ignores(&self, class_name: &str) -> bool {
        let listed = self.ignore.iter().any(|r| r.is_match(class_name));
        match self.ignore_mode {
            IgnoreMode::OnlyThese => listed,
            IgnoreMode::AllExceptThese => !listed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// The owning process could not be inspected.
    Denied,
    /// No rule applies; manage with default behavior.
    Unmatched,
    Rule(usize),
}

/// Compiled window policy with a per-window resolution cache.
#[derive(Debug)]
pub struct WindowPolicy {
    own_process_id: u32,
    deny: Vec<CompiledPattern>,
    rules: Vec<CompiledRule>,
    cache: HashMap<WindowId, Resolution>,
}

impl WindowPolicy {
    /// Compile `config`. Windows of `own_process_id` are never managed.
    pub fn new(config: &PolicyConfig, own_process_id: u32) -> Result<Self, PolicyError> {
        let deny = config
            .deny
            .iter()
            .map(|p| {
                Ok(CompiledPattern {
                    class: p.class.as_deref().map(compile).transpose()?,
                    visible: p.visible,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;

        let rules = config
            .processes
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    version: rule.version.clone(),
                    ignore_mode: rule.ignore.mode,
                    ignore: compile_all(&rule.ignore.classes)?,
                    hide: rule.hide,
                    include: compile_all(&rule.include)?,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;

        Ok(Self {
            own_process_id,
            deny,
            rules,
            cache: HashMap::new(),
        })
    }

    /// A policy with no deny list and no process rules.
    pub fn permissive(own_process_id: u32) -> Self {
        Self {
            own_process_id,
            deny: Vec::new(),
            rules: Vec::new(),
            cache: HashMap::new(),
        }
    }

    /// Whether `window` should be managed.
    pub fn window_filter(&mut self, wm: &dyn WindowManager, window: &WindowHandle) -> bool {
        let visible = wm.is_visible(window.id);
        self.admits(wm, window, Some(visible))
    }

    /// Whether an already managed `window` is still managed. Deny patterns
    /// that constrain visibility are skipped, since applications hide and
    /// show their own windows.
    pub fn keeps_managing(&mut self, wm: &dyn WindowManager, window: &WindowHandle) -> bool {
        self.admits(wm, window, None)
    }

    fn admits(&mut self, wm: &dyn WindowManager, window: &WindowHandle, visible: Option<bool>) -> bool {
        if window.process_id == Some(self.own_process_id) {
            return false;
        }

        let denied = self.deny.iter().any(|p| match visible {
            Some(visible) => p.matches(&window.class_name, visible),
            None => p.visible.is_none() && p.matches(&window.class_name, true),
        });
        if denied {
            return false;
        }

        match self.resolve(wm, window) {
            Resolution::Denied => false,
            Resolution::Unmatched => true,
            Resolution::Rule(index) => !self.rules[index].ignores(&window.class_name),
        }
    }

    /// The windows that move together with `window`, `window` first.
    ///
    /// `candidates` are the other managed windows that could be pulled along,
    /// normally those of the desktop holding `window`.
    pub fn hide_set(
        &mut self,
        wm: &dyn WindowManager,
        window: &WindowHandle,
        candidates: &[WindowHandle],
    ) -> Vec<WindowId> {
        let mut set = vec![window.id];
        let Resolution::Rule(index) = self.resolve(wm, window) else {
            return set;
        };
        let rule = &self.rules[index];
        if rule.hide == HideBehavior::SingleWindow || window.process_id.is_none() {
            return set;
        }

        let siblings = candidates
            .iter()
            .filter(|c| c.id != window.id && c.process_id == window.process_id)
            .filter(|c| match rule.hide {
                HideBehavior::IncludeList => {
                    rule.include.iter().any(|r| r.is_match(&c.class_name))
                }
                _ => true,
            })
            .map(|c| c.id);
        set.extend(siblings);
        set
    }

    /// Drop cached resolutions for windows that no longer exist.
    pub fn forget_destroyed(&mut self, wm: &dyn WindowManager) {
        self.cache.retain(|window, _| !wm.is_destroyed(*window));
    }

    fn resolve(&mut self, wm: &dyn WindowManager, window: &WindowHandle) -> Resolution {
        if let Some(resolution) = self.cache.get(&window.id) {
            return *resolution;
        }

        let resolution = match window.process_id {
            None => Resolution::Unmatched,
            Some(pid) => match wm.process_info(pid) {
                Err(PlatformError::AccessDenied(_)) => {
                    debug!(window = window.id, pid, "Process access denied, not managing window");
                    Resolution::Denied
                }
                Err(_) => Resolution::Unmatched,
                Ok(info) => self
                    .rules
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.name.eq_ignore_ascii_case(&info.name))
                    .filter(|(_, r)| r.matches_version(info.version.as_deref()))
                    .max_by_key(|(_, r)| r.specificity())
                    .map_or(Resolution::Unmatched, |(index, _)| Resolution::Rule(index)),
            },
        };

        trace!(window = window.id, ?resolution, "Resolved window policy");
        self.cache.insert(window.id, resolution);
        resolution
    }
}
