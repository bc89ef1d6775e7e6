//! Windows detached from every desktop by a cut.

use crate::window::WindowId;
use std::collections::HashSet;

/// Last-in-first-out stack of cut windows.
#[derive(Debug, Default)]
pub struct WindowClipboard {
    /// Bottom first.
    stack: Vec<WindowId>,
}

impl WindowClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one cut. `windows` keeps its order, its first window ends up on top.
    pub(crate) fn push(&mut self, windows: &[WindowId]) {
        self.stack.extend(windows.iter().rev().copied());
    }

    /// Windows on the clipboard, most recently cut first.
    pub fn windows(&self) -> Vec<WindowId> {
        self.stack.iter().rev().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn contains(&self, window: WindowId) -> bool {
        self.stack.contains(&window)
    }

    /// Empty the clipboard, most recently cut first.
    pub(crate) fn take_all(&mut self) -> Vec<WindowId> {
        let mut windows = std::mem::take(&mut self.stack);
        windows.reverse();
        windows
    }

    pub(crate) fn remove(&mut self, window: WindowId) -> bool {
        let before = self.stack.len();
        self.stack.retain(|w| *w != window);
        self.stack.len() != before
    }

    pub(crate) fn forget(&mut self, gone: &HashSet<WindowId>) {
        self.stack.retain(|w| !gone.contains(w));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_cut_comes_out_first() {
        let mut clipboard = WindowClipboard::new();
        clipboard.push(&[1, 2]);
        clipboard.push(&[3]);

        assert_eq!(clipboard.windows(), vec![3, 1, 2]);
        assert_eq!(clipboard.take_all(), vec![3, 1, 2]);
        assert!(clipboard.is_empty());
    }

    #[test]
    fn test_forget_and_remove() {
        let mut clipboard = WindowClipboard::new();
        clipboard.push(&[1, 2, 3]);

        clipboard.forget(&HashSet::from([2]));
        assert!(!clipboard.contains(2));
        assert!(clipboard.remove(1));
        assert!(!clipboard.remove(1));
        assert_eq!(clipboard.windows(), vec![3]);
    }
}
