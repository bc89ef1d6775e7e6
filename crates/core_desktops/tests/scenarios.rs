//! End-to-end desktop scenarios against the headless window manager.

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vdesk_core::headless::HeadlessWindowManager;
use vdesk_core::{
    DesktopEvent, DesktopManager, DesktopOptions, HideBehavior, PersistenceError,
    PersistenceProvider, PersistenceRegistry, PolicyConfig, ProcessInfo, ProcessRule,
    UnresponsiveWindowFault, WindowId, WindowPolicy,
};

const OWN_PID: u32 = 1;

fn manager(
    wm: &Arc<HeadlessWindowManager>,
    config: &PolicyConfig,
    registry: PersistenceRegistry,
) -> DesktopManager {
    let policy = WindowPolicy::new(config, OWN_PID).unwrap();
    let options = DesktopOptions {
        suspend_poll_interval: Duration::from_millis(5),
    };
    DesktopManager::new(wm.clone(), policy, registry, options).unwrap()
}

fn sorted(mut windows: Vec<WindowId>) -> Vec<WindowId> {
    windows.sort_unstable();
    windows
}

#[test]
fn switching_back_restores_stacking_and_topmost_band() {
    let wm = Arc::new(HeadlessWindowManager::with_process_id(OWN_PID));
    wm.open_window(1, "A", "a", None);
    wm.open_window(2, "B", "b", None);
    wm.open_window(3, "C", "c", None);
    wm.open_topmost_window(4, "Pin", "pinned", None);
    let mut manager = manager(&wm, &PolicyConfig::default(), PersistenceRegistry::new());
    let startup = manager.startup();

    let work = manager.create_desktop(Some("Work".into())).unwrap();
    manager.switch_to(work).unwrap();
    assert!(wm.visible_windows().is_empty());

    wm.open_window(5, "D", "d", None);
    manager.update_windows().unwrap();
    assert_eq!(manager.desktop(work).unwrap().windows(), &[5]);

    manager.switch_to(startup).unwrap();
    assert_eq!(wm.visible_windows(), vec![4, 3, 2, 1]);
    assert!(wm.stack().contains(&5));

    manager.close().unwrap();
    assert_eq!(sorted(wm.visible_windows()), vec![1, 2, 3, 4, 5]);
}

#[test]
fn process_windows_travel_together() {
    let wm = Arc::new(HeadlessWindowManager::with_process_id(OWN_PID));
    wm.add_process(30, "chrome.exe", Some("120.0.6099.110"));
    wm.open_window(10, "Chrome_WidgetWin_1", "Inbox", Some(30));
    wm.open_window(11, "Chrome_WidgetWin_1", "Docs", Some(30));
    wm.open_window(12, "Notepad", "notes", None);

    let config = PolicyConfig {
        processes: vec![ProcessRule {
            name: "Chrome.exe".into(),
            version: Some("120".into()),
            hide: HideBehavior::AllProcessWindows,
            ..Default::default()
        }],
        ..Default::default()
    };
    let mut manager = manager(&wm, &config, PersistenceRegistry::new());

    let cut = manager.cut_window(10).unwrap();
    assert_eq!(cut[0], 10);
    assert_eq!(sorted(cut), vec![10, 11]);
    assert_eq!(manager.clipboard().len(), 2);
    assert_eq!(wm.visible_windows(), vec![12]);

    let browsing = manager.create_desktop(Some("Browsing".into())).unwrap();
    manager.switch_to(browsing).unwrap();
    let pasted = manager.paste_windows().unwrap();

    assert_eq!(sorted(pasted), vec![10, 11]);
    assert!(manager.clipboard().is_empty());
    assert_eq!(sorted(wm.visible_windows()), vec![10, 11]);
}

#[test]
fn closure_handler_ignores_hung_windows() {
    let wm = Arc::new(HeadlessWindowManager::with_process_id(OWN_PID));
    wm.open_window(1, "A", "a", None);
    wm.open_window(2, "B", "b", None);
    let mut manager = manager(&wm, &PolicyConfig::default(), PersistenceRegistry::new());
    let events = manager.subscribe();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    manager.set_unresponsive_handler(move |fault: &UnresponsiveWindowFault| {
        log.lock().unwrap().push(fault.clone());
        fault.windows.clone()
    });

    let other = manager.create_desktop(None).unwrap();
    wm.set_hung(1, true);
    manager.switch_to(other).unwrap();

    let faults = seen.lock().unwrap().clone();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].desktop, manager.startup());
    assert_eq!(faults[0].windows, vec![1]);
    assert!(manager.snapshot(1).unwrap().is_ignored());
    assert!(matches!(
        events.try_recv(),
        Ok(DesktopEvent::UnresponsiveWindows(_))
    ));

    // Ignored windows no longer take part, so switching back is clean
    manager.switch_to(manager.startup()).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

/// Saves a note-taking app by exiting it and relaunches it on resume.
struct Notes {
    wm: Arc<HeadlessWindowManager>,
    resumed: Arc<Mutex<Vec<(PathBuf, serde_json::Value)>>>,
}

impl PersistenceProvider for Notes {
    fn process_name(&self) -> &str {
        "NOTES.EXE"
    }

    fn suspend(&self, process: &ProcessInfo) -> Result<Option<serde_json::Value>, PersistenceError> {
        self.wm.exit_process(process.id);
        Ok(Some(json!({ "open": ["todo.md"] })))
    }

    fn resume(&self, path: &Path, data: &serde_json::Value) -> Result<(), PersistenceError> {
        self.resumed
            .lock()
            .unwrap()
            .push((path.to_path_buf(), data.clone()));
        Ok(())
    }
}

#[test]
fn suspended_desktop_survives_a_restart() {
    let wm = Arc::new(HeadlessWindowManager::with_process_id(OWN_PID));
    wm.add_process(40, "notes.exe", None);
    wm.open_window(1, "Shell", "terminal", None);
    wm.open_window(2, "NotesMain", "todo.md", Some(40));

    let resumed = Arc::new(Mutex::new(Vec::new()));
    let registry = || {
        let mut registry = PersistenceRegistry::new();
        registry.register(Arc::new(Notes {
            wm: wm.clone(),
            resumed: resumed.clone(),
        }));
        registry
    };

    let mut first = manager(&wm, &PolicyConfig::default(), registry());
    let events = first.subscribe();
    let notes = first.create_desktop(Some("Notes".into())).unwrap();
    first.move_window(2, notes).unwrap();

    let report = first.suspend_desktop(notes).unwrap();
    assert_eq!(report.persisted, 1);
    assert!(report.released.is_empty());
    assert!(!wm.stack().contains(&2));

    let event = events
        .recv_timeout(Duration::from_secs(5))
        .expect("suspend completion");
    assert_eq!(event, DesktopEvent::DesktopSuspended { desktop: notes });

    let session = first.store(notes).unwrap();
    assert!(session.is_suspended());
    assert_eq!(session.name, "Notes");
    assert_eq!(session.applications[0].process_name, "notes.exe");
    first.close().unwrap();
    drop(first);

    let session: vdesk_core::Session =
        serde_json::from_str(&serde_json::to_string(&session).unwrap()).unwrap();
    let mut second = manager(&wm, &PolicyConfig::default(), registry());
    let restored = second.create_desktop_from_session(session).unwrap();
    assert!(second.desktop(restored).unwrap().is_suspended());
    assert_eq!(second.desktop(restored).unwrap().name(), "Notes");

    second.resume_desktop(restored).unwrap();

    assert_eq!(second.current(), restored);
    let resumed = resumed.lock().unwrap();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].0, PathBuf::from("C:\\Program Files\\notes.exe"));
    assert_eq!(resumed[0].1, json!({ "open": ["todo.md"] }));
}
