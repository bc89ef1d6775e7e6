//! Generic workspace lifecycle.
//!
//! [`WorkspaceManager`] owns a set of workspaces, the startup workspace and
//! the current one, and checks every lifecycle invariant before handing the
//! type-specific work to a [`WorkspaceHooks`] implementation:
//! - the startup workspace is set once and can never be merged away
//! - the current workspace is always a member and can't be merged away while current
//! - a caller error closes the manager first, so nothing is left off-screen

use crate::error::{DesktopError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Identifier of a workspace within one manager.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WorkspaceId(pub u32);

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-specific operations behind the manager's state machine.
pub trait WorkspaceHooks {
    type Workspace;
    type Session;

    /// Build an empty workspace.
    fn create_empty(&mut self, id: WorkspaceId) -> Result<Self::Workspace>;

    /// Build a workspace from a stored session. Content the session names may
    /// be taken from the existing workspaces.
    fn create_from_session(
        &mut self,
        id: WorkspaceId,
        session: Self::Session,
        existing: &mut HashMap<WorkspaceId, Self::Workspace>,
    ) -> Result<Self::Workspace>;

    /// Hide `from` and show `to`.
    fn switch(&mut self, from: &mut Self::Workspace, to: &mut Self::Workspace) -> Result<()>;

    /// Transfer all content of `from` into `into`. `from` is discarded on success.
    fn merge(&mut self, from: &mut Self::Workspace, into: &mut Self::Workspace) -> Result<()>;

    /// Leave all content in a normal, visible state. Called with the startup
    /// workspace current.
    fn close(
        &mut self,
        startup: WorkspaceId,
        workspaces: &mut HashMap<WorkspaceId, Self::Workspace>,
    ) -> Result<()>;
}

/// Owner of a set of workspaces.
#[derive(Debug)]
pub struct WorkspaceManager<H: WorkspaceHooks> {
    hooks: H,
    workspaces: HashMap<WorkspaceId, H::Workspace>,
    /// Insertion order of `workspaces`.
    order: Vec<WorkspaceId>,
    startup: Option<WorkspaceId>,
    current: Option<WorkspaceId>,
    next_id: u32,
    closed: bool,
}

impl<H: WorkspaceHooks> WorkspaceManager<H> {
    /// Create a manager with no workspaces. Call
    /// [`set_startup_workspace`](Self::set_startup_workspace) before anything else.
    pub fn new(hooks: H) -> Self {
        Self {
            hooks,
            workspaces: HashMap::new(),
            order: Vec::new(),
            startup: None,
            current: None,
            next_id: 0,
            closed: false,
        }
    }

    /// Install the startup workspace, which also becomes current.
    ///
    /// Fails with `InvalidState` when called a second time.
    pub fn set_startup_workspace(
        &mut self,
        build: impl FnOnce(&mut H, WorkspaceId) -> Result<H::Workspace>,
    ) -> Result<WorkspaceId> {
        if self.closed {
            return Err(DesktopError::InvalidState("manager is closed".into()));
        }
        if self.startup.is_some() {
            return Err(DesktopError::InvalidState(
                "startup workspace is already set".into(),
            ));
        }

        let id = self.allocate_id();
        let workspace = build(&mut self.hooks, id)?;
        self.register(id, workspace);
        self.startup = Some(id);
        self.current = Some(id);
        Ok(id)
    }

    fn allocate_id(&mut self) -> WorkspaceId {
        let id = WorkspaceId(self.next_id);
        self.next_id += 1;
        id
    }

    fn register(&mut self, id: WorkspaceId, workspace: H::Workspace) {
        self.workspaces.insert(id, workspace);
        self.order.push(id);
    }

    /// Startup and current ids, or `InvalidState` before init / after close.
    fn ready(&self) -> Result<(WorkspaceId, WorkspaceId)> {
        if self.closed {
            return Err(DesktopError::InvalidState("manager is closed".into()));
        }
        match (self.startup, self.current) {
            (Some(startup), Some(current)) => Ok((startup, current)),
            _ => Err(DesktopError::InvalidState(
                "startup workspace has not been set".into(),
            )),
        }
    }

    /// Fail unless the manager is initialized and open.
    pub fn ensure_open(&self) -> Result<()> {
        self.ready().map(|_| ())
    }

    /// Close the manager, then return `ArgumentInvalid` with `message`.
    pub fn reject(&mut self, message: impl Into<String>) -> DesktopError {
        let message = message.into();
        warn!("Rejecting call ({}), closing manager to restore content", message);
        if let Err(e) = self.close() {
            warn!("Protective close failed: {}", e);
        }
        DesktopError::ArgumentInvalid(message)
    }

    pub fn startup(&self) -> Option<WorkspaceId> {
        self.startup
    }

    pub fn current(&self) -> Option<WorkspaceId> {
        self.current
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn contains(&self, id: WorkspaceId) -> bool {
        self.workspaces.contains_key(&id)
    }

    /// Workspace ids in creation order.
    pub fn ids(&self) -> &[WorkspaceId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    pub fn get(&self, id: WorkspaceId) -> Option<&H::Workspace> {
        self.workspaces.get(&id)
    }

    /// Workspaces in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (WorkspaceId, &H::Workspace)> {
        self.order
            .iter()
            .filter_map(|id| self.workspaces.get(id).map(|w| (*id, w)))
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Borrow the hooks together with one workspace.
    pub fn split_mut(&mut self, id: WorkspaceId) -> Option<(&mut H, &mut H::Workspace)> {
        let workspace = self.workspaces.get_mut(&id)?;
        Some((&mut self.hooks, workspace))
    }

    /// Borrow the hooks together with every workspace.
    pub fn split_all_mut(&mut self) -> (&mut H, &mut HashMap<WorkspaceId, H::Workspace>) {
        (&mut self.hooks, &mut self.workspaces)
    }

    /// Run `f` with the hooks and two distinct workspaces borrowed mutably.
    pub fn with_pair<T>(
        &mut self,
        first: WorkspaceId,
        second: WorkspaceId,
        f: impl FnOnce(&mut H, &mut H::Workspace, &mut H::Workspace) -> Result<T>,
    ) -> Result<T> {
        if first == second {
            return Err(DesktopError::ArgumentInvalid(format!(
                "workspace {first} cannot be paired with itself"
            )));
        }
        let mut taken = self.workspaces.remove(&first).ok_or_else(|| {
            DesktopError::ArgumentInvalid(format!("workspace {first} is not managed here"))
        })?;
        let result = match self.workspaces.get_mut(&second) {
            Some(other) => f(&mut self.hooks, &mut taken, other),
            None => Err(DesktopError::ArgumentInvalid(format!(
                "workspace {second} is not managed here"
            ))),
        };
        self.workspaces.insert(first, taken);
        result
    }

    /// Create and register an empty workspace.
    pub fn create_empty_workspace(&mut self) -> Result<WorkspaceId> {
        self.ready()?;
        let id = self.allocate_id();
        let workspace = self.hooks.create_empty(id)?;
        self.register(id, workspace);
        debug!("Created workspace {}", id);
        Ok(id)
    }

    /// Create and register a workspace from a stored session.
    pub fn create_workspace_from_session(&mut self, session: H::Session) -> Result<WorkspaceId> {
        self.ready()?;
        let id = self.allocate_id();
        let workspace = self
            .hooks
            .create_from_session(id, session, &mut self.workspaces)?;
        self.register(id, workspace);
        debug!("Restored workspace {} from session", id);
        Ok(id)
    }

    /// Make `target` the current workspace.
    pub fn switch_to(&mut self, target: WorkspaceId) -> Result<()> {
        let (_, current) = self.ready()?;
        if target == current {
            return Ok(());
        }
        if !self.contains(target) {
            return Err(self.reject(format!("workspace {target} is not managed here")));
        }

        self.with_pair(current, target, |hooks, from, to| hooks.switch(from, to))?;
        self.current = Some(target);
        info!("Switched workspace {} -> {}", current, target);
        Ok(())
    }

    /// Move all content of `from` into `into` and discard `from`.
    ///
    /// An `ArgumentInvalid` from the hook closes the manager like any other
    /// invariant violation. Any other hook error is returned as is: `from`
    /// stays registered and the merge may be partial, with some content
    /// already moved into `into`.
    pub fn merge(&mut self, from: WorkspaceId, into: WorkspaceId) -> Result<()> {
        let (startup, current) = self.ready()?;
        if !self.contains(from) {
            return Err(self.reject(format!("workspace {from} is not managed here")));
        }
        if !self.contains(into) {
            return Err(self.reject(format!("workspace {into} is not managed here")));
        }
        if from == startup {
            return Err(self.reject("the startup workspace cannot be merged away"));
        }
        if from == current {
            return Err(self.reject("the current workspace cannot be merged away"));
        }
        if from == into {
            return Ok(());
        }

        match self.with_pair(from, into, |hooks, from_ws, into_ws| hooks.merge(from_ws, into_ws)) {
            Ok(()) => {
                self.workspaces.remove(&from);
                self.order.retain(|id| *id != from);
                info!("Merged workspace {} into {}", from, into);
                Ok(())
            }
            Err(DesktopError::ArgumentInvalid(message)) => Err(self.reject(message)),
            Err(e) => Err(e),
        }
    }

    /// Switch to the startup workspace and restore all content. Every later
    /// mutating call fails with `InvalidState`. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let (Some(startup), Some(current)) = (self.startup, self.current) else {
            return Ok(());
        };

        let mut first_error = None;
        if current != startup {
            match self.with_pair(current, startup, |hooks, from, to| hooks.switch(from, to)) {
                Ok(()) => {}
                Err(e) => {
                    warn!("Failed to switch back to startup workspace on close: {}", e);
                    first_error = Some(e);
                }
            }
            self.current = Some(startup);
        }

        if let Err(e) = self.hooks.close(startup, &mut self.workspaces) {
            warn!("Close hook failed: {}", e);
            first_error.get_or_insert(e);
        }

        info!("Workspace manager closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformError;

    /// Workspaces that are plain lists of items, one of them shown.
    #[derive(Debug, Default)]
    struct ListHooks {
        switches: Vec<(u32, u32)>,
        closed: bool,
        fail_merge: bool,
        /// Move one item, then fail as the platform would.
        break_merge: bool,
    }

    #[derive(Debug, Default)]
    struct List {
        id: u32,
        items: Vec<u32>,
        shown: bool,
    }

    impl WorkspaceHooks for ListHooks {
        type Workspace = List;
        type Session = Vec<u32>;

        fn create_empty(&mut self, id: WorkspaceId) -> Result<List> {
            Ok(List {
                id: id.0,
                ..Default::default()
            })
        }

        fn create_from_session(
            &mut self,
            id: WorkspaceId,
            session: Vec<u32>,
            _existing: &mut HashMap<WorkspaceId, List>,
        ) -> Result<List> {
            Ok(List {
                id: id.0,
                items: session,
                shown: false,
            })
        }

        fn switch(&mut self, from: &mut List, to: &mut List) -> Result<()> {
            from.shown = false;
            to.shown = true;
            self.switches.push((from.id, to.id));
            Ok(())
        }

        fn merge(&mut self, from: &mut List, into: &mut List) -> Result<()> {
            if self.fail_merge {
                return Err(DesktopError::ArgumentInvalid("incompatible".into()));
            }
            if self.break_merge {
                if let Some(item) = from.items.pop() {
                    into.items.push(item);
                }
                return Err(PlatformError::RepositionFailed("batch rejected".into()).into());
            }
            into.items.append(&mut from.items);
            Ok(())
        }

        fn close(
            &mut self,
            startup: WorkspaceId,
            workspaces: &mut HashMap<WorkspaceId, List>,
        ) -> Result<()> {
            let mut all = Vec::new();
            for (id, list) in workspaces.iter_mut() {
                if *id != startup {
                    all.append(&mut list.items);
                }
            }
            if let Some(list) = workspaces.get_mut(&startup) {
                list.items.extend(all);
            }
            self.closed = true;
            Ok(())
        }
    }

    fn manager() -> WorkspaceManager<ListHooks> {
        let mut manager = WorkspaceManager::new(ListHooks::default());
        manager
            .set_startup_workspace(|_, id| {
                Ok(List {
                    id: id.0,
                    items: vec![1, 2, 3],
                    shown: true,
                })
            })
            .unwrap();
        manager
    }

    fn assert_invariants(manager: &WorkspaceManager<ListHooks>) {
        let startup = manager.startup().unwrap();
        let current = manager.current().unwrap();
        assert!(manager.contains(startup));
        assert!(manager.contains(current));
        assert_eq!(manager.ids().len(), manager.len());
    }

    #[test]
    fn test_create_before_startup_is_invalid_state() {
        let mut manager = WorkspaceManager::new(ListHooks::default());
        assert!(matches!(
            manager.create_empty_workspace(),
            Err(DesktopError::InvalidState(_))
        ));
    }

    #[test]
    fn test_startup_can_only_be_set_once() {
        let mut manager = manager();
        let second = manager.set_startup_workspace(|hooks, id| hooks.create_empty(id));
        assert!(matches!(second, Err(DesktopError::InvalidState(_))));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_switch_updates_current_after_hook() {
        let mut manager = manager();
        let startup = manager.startup().unwrap();
        let other = manager.create_empty_workspace().unwrap();

        manager.switch_to(other).unwrap();
        assert_eq!(manager.current(), Some(other));
        assert_eq!(manager.hooks().switches, vec![(startup.0, other.0)]);

        // Switching to the current workspace does nothing
        manager.switch_to(other).unwrap();
        assert_eq!(manager.hooks().switches.len(), 1);
        assert_invariants(&manager);
    }

    #[test]
    fn test_switch_to_unknown_closes_and_rejects() {
        let mut manager = manager();
        let result = manager.switch_to(WorkspaceId(42));

        assert!(matches!(result, Err(DesktopError::ArgumentInvalid(_))));
        assert!(manager.is_closed());
        assert!(manager.hooks().closed);
    }

    #[test]
    fn test_merge_transfers_and_removes() {
        let mut manager = manager();
        let startup = manager.startup().unwrap();
        let other = manager
            .create_workspace_from_session(vec![7, 8])
            .unwrap();

        manager.merge(other, startup).unwrap();

        assert!(!manager.contains(other));
        assert_eq!(manager.get(startup).unwrap().items, vec![1, 2, 3, 7, 8]);
        assert_invariants(&manager);
    }

    #[test]
    fn test_merge_startup_or_current_is_rejected() {
        let mut manager = manager();
        let startup = manager.startup().unwrap();
        let other = manager.create_empty_workspace().unwrap();

        let before = manager.len();
        assert!(matches!(
            manager.merge(startup, other),
            Err(DesktopError::ArgumentInvalid(_))
        ));
        assert_eq!(manager.len(), before);
        assert!(manager.is_closed());
        assert_invariants(&manager);
    }

    #[test]
    fn test_merge_from_current_is_rejected_after_switch() {
        let mut manager = manager();
        let startup = manager.startup().unwrap();
        let other = manager.create_empty_workspace().unwrap();
        manager.switch_to(other).unwrap();

        let before = manager.len();
        assert!(matches!(
            manager.merge(other, startup),
            Err(DesktopError::ArgumentInvalid(_))
        ));
        assert_eq!(manager.len(), before);
        // Protective close switched back to startup
        assert_eq!(manager.current(), Some(startup));
    }

    #[test]
    fn test_merge_with_itself_is_noop() {
        let mut manager = manager();
        let other = manager.create_empty_workspace().unwrap();

        manager.merge(other, other).unwrap();
        assert!(manager.contains(other));
        assert!(!manager.is_closed());
    }

    #[test]
    fn test_hook_rejection_closes_manager_and_keeps_workspace() {
        let mut manager = manager();
        let startup = manager.startup().unwrap();
        let other = manager.create_workspace_from_session(vec![9]).unwrap();
        manager.hooks_mut().fail_merge = true;

        assert!(matches!(
            manager.merge(other, startup),
            Err(DesktopError::ArgumentInvalid(_))
        ));
        assert!(manager.contains(other));
        assert!(manager.is_closed());
        // Close hook gathered everything into startup
        assert_eq!(manager.get(startup).unwrap().items, vec![1, 2, 3, 9]);
    }

    #[test]
    fn test_hook_failure_leaves_partial_merge() {
        let mut manager = manager();
        let startup = manager.startup().unwrap();
        let other = manager.create_workspace_from_session(vec![8, 9]).unwrap();
        manager.hooks_mut().break_merge = true;

        assert!(matches!(
            manager.merge(other, startup),
            Err(DesktopError::Platform(_))
        ));
        assert!(!manager.is_closed());
        assert!(manager.contains(other));
        assert_eq!(manager.get(other).unwrap().items, vec![8]);
        assert_eq!(manager.get(startup).unwrap().items, vec![1, 2, 3, 9]);
        assert_invariants(&manager);
    }

    #[test]
    fn test_calls_after_close_are_invalid_state() {
        let mut manager = manager();
        let other = manager.create_empty_workspace().unwrap();
        manager.close().unwrap();

        assert!(matches!(
            manager.create_empty_workspace(),
            Err(DesktopError::InvalidState(_))
        ));
        assert!(matches!(
            manager.switch_to(other),
            Err(DesktopError::InvalidState(_))
        ));
        // Closing again is harmless
        manager.close().unwrap();
    }

    #[test]
    fn test_ids_keep_creation_order() {
        let mut manager = manager();
        let a = manager.create_empty_workspace().unwrap();
        let b = manager.create_empty_workspace().unwrap();

        let startup = manager.startup().unwrap();
        assert_eq!(manager.ids(), &[startup, a, b]);
        let listed: Vec<_> = manager.iter().map(|(id, _)| id).collect();
        assert_eq!(listed, vec![startup, a, b]);
    }
}
