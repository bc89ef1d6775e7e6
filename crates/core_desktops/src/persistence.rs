//! Suspending applications into opaque payloads and relaunching them.
//!
//! Each provider claims one process name. The desktop layer only routes
//! [`ProcessInfo`] in and [`PersistedApplication`] out; what the payload means
//! is entirely up to the provider.

use crate::window::ProcessInfo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported by persistence providers.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to suspend {process}: {message}")]
    Suspend { process: String, message: String },

    #[error("Failed to resume {path}: {message}")]
    Resume { path: PathBuf, message: String },

    #[error("No persistence provider for {0}")]
    NoProvider(String),

    #[error("Persisted data does not match provider: {0}")]
    Data(#[from] serde_json::Error),
}

/// One suspended application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedApplication {
    /// Executable name the provider was selected by.
    pub process_name: String,
    /// Executable path to relaunch.
    pub path: PathBuf,
    /// Provider-defined payload.
    pub data: serde_json::Value,
}

/// Object-safe persistence contract for one kind of application.
pub trait PersistenceProvider: Send + Sync {
    /// Executable name this provider handles, e.g. `"notepad.exe"`.
    fn process_name(&self) -> &str;

    /// Ask the application to save its state and exit. `Ok(None)` means there
    /// was nothing worth keeping and the process is left alone.
    fn suspend(&self, process: &ProcessInfo) -> Result<Option<serde_json::Value>, PersistenceError>;

    /// Relaunch the application from `data`.
    fn resume(&self, path: &Path, data: &serde_json::Value) -> Result<(), PersistenceError>;
}

/// Typed persistence for one kind of application.
///
/// Register with [`PersistenceRegistry::register_typed`]; payloads are
/// converted to and from JSON at the registry boundary.
pub trait ApplicationPersistence: Send + Sync + 'static {
    type Data: Serialize + DeserializeOwned;

    fn process_name(&self) -> &str;

    fn suspend(&self, process: &ProcessInfo) -> Result<Option<Self::Data>, PersistenceError>;

    fn resume(&self, path: &Path, data: Self::Data) -> Result<(), PersistenceError>;
}

struct Typed<A>(A);

impl<A: ApplicationPersistence> PersistenceProvider for Typed<A> {
    fn process_name(&self) -> &str {
        self.0.process_name()
    }

    fn suspend(&self, process: &ProcessInfo) -> Result<Option<serde_json::Value>, PersistenceError> {
        match self.0.suspend(process)? {
            Some(data) => Ok(Some(serde_json::to_value(data)?)),
            None => Ok(None),
        }
    }

    fn resume(&self, path: &Path, data: &serde_json::Value) -> Result<(), PersistenceError> {
        let data = A::Data::deserialize(data)?;
        self.0.resume(path, data)
    }
}

/// Routes processes to the provider claiming their executable name.
#[derive(Clone, Default)]
pub struct PersistenceRegistry {
    providers: Vec<Arc<dyn PersistenceProvider>>,
}

impl std::fmt::Debug for PersistenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.process_name()))
            .finish()
    }
}

impl PersistenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn PersistenceProvider>) {
        debug!("Registered persistence provider for {}", provider.process_name());
        self.providers.push(provider);
    }

    pub fn register_typed<A: ApplicationPersistence>(&mut self, provider: A) {
        self.register(Arc::new(Typed(provider)));
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The provider for `process_name`, compared case-insensitively.
    pub fn provider(&self, process_name: &str) -> Option<&Arc<dyn PersistenceProvider>> {
        self.providers
            .iter()
            .find(|p| p.process_name().eq_ignore_ascii_case(process_name))
    }

    /// Suspend one process. Failures are logged and yield `None` so the rest
    /// of a batch still runs.
    pub fn suspend(&self, process: &ProcessInfo) -> Option<PersistedApplication> {
        let provider = self.provider(&process.name)?;
        match provider.suspend(process) {
            Ok(Some(data)) => Some(PersistedApplication {
                process_name: process.name.clone(),
                path: process.path.clone(),
                data,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(pid = process.id, "Suspend failed: {}", e);
                None
            }
        }
    }

    /// Relaunch one persisted application.
    pub fn resume(&self, application: &PersistedApplication) -> Result<(), PersistenceError> {
        let provider = self
            .provider(&application.process_name)
            .ok_or_else(|| PersistenceError::NoProvider(application.process_name.clone()))?;
        provider.resume(&application.path, &application.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Notes {
        files: Vec<String>,
    }

    #[derive(Default)]
    struct Editor {
        resumed: Mutex<Vec<(PathBuf, Vec<String>)>>,
    }

    impl ApplicationPersistence for Arc<Editor> {
        type Data = Notes;

        fn process_name(&self) -> &str {
            "Editor.exe"
        }

        fn suspend(&self, process: &ProcessInfo) -> Result<Option<Notes>, PersistenceError> {
            match process.id {
                0 => Ok(None),
                1 => Err(PersistenceError::Suspend {
                    process: process.name.clone(),
                    message: "refused".into(),
                }),
                id => Ok(Some(Notes {
                    files: vec![format!("file{id}.txt")],
                })),
            }
        }

        fn resume(&self, path: &Path, data: Notes) -> Result<(), PersistenceError> {
            self.resumed
                .lock()
                .unwrap()
                .push((path.to_path_buf(), data.files));
            Ok(())
        }
    }

    fn process(id: u32) -> ProcessInfo {
        ProcessInfo {
            id,
            name: "editor.exe".into(),
            path: PathBuf::from("C:\\editor.exe"),
            version: None,
        }
    }

    #[test]
    fn test_typed_provider_round_trips_payload() {
        let editor = Arc::new(Editor::default());
        let mut registry = PersistenceRegistry::new();
        registry.register_typed(Arc::clone(&editor));

        let app = registry.suspend(&process(7)).unwrap();
        assert_eq!(app.process_name, "editor.exe");
        assert_eq!(app.data, serde_json::json!({ "files": ["file7.txt"] }));

        registry.resume(&app).unwrap();
        let resumed = editor.resumed.lock().unwrap();
        assert_eq!(resumed[0].1, vec!["file7.txt".to_string()]);
    }

    #[test]
    fn test_suspend_failures_and_empty_results_yield_none() {
        let mut registry = PersistenceRegistry::new();
        registry.register_typed(Arc::new(Editor::default()));

        assert!(registry.suspend(&process(0)).is_none());
        assert!(registry.suspend(&process(1)).is_none());

        let mut other = process(5);
        other.name = "other.exe".into();
        assert!(registry.suspend(&other).is_none());
    }

    #[test]
    fn test_resume_rejects_unknown_provider_and_bad_payload() {
        let mut registry = PersistenceRegistry::new();
        registry.register_typed(Arc::new(Editor::default()));

        let mut app = PersistedApplication {
            process_name: "missing.exe".into(),
            path: PathBuf::from("C:\\missing.exe"),
            data: serde_json::Value::Null,
        };
        assert!(matches!(
            registry.resume(&app),
            Err(PersistenceError::NoProvider(_))
        ));

        app.process_name = "EDITOR.EXE".into();
        assert!(matches!(registry.resume(&app), Err(PersistenceError::Data(_))));
    }
}
