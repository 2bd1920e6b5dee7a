//! Confirmation-delay windowing over incoming block notifications.
//!
//! The tracker defers indexing of the most recent blocks until `delay_blocks`
//! further blocks have been observed. This narrows, but does not remove,
//! exposure to short-lived reorgs.

use crate::types::ConfirmationWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    /// No block observed yet.
    Uninitialized,
    /// Accumulating blocks for the open window.
    Windowing(ConfirmationWindow),
}

/// Turns a stream of block numbers into a stream of closed windows.
#[derive(Debug, Clone)]
pub struct WindowTracker {
    state: WindowState,
}

impl WindowTracker {
    pub fn new() -> Self {
        Self {
            state: WindowState::Uninitialized,
        }
    }

    /// The currently open window, if any.
    pub fn current(&self) -> Option<ConfirmationWindow> {
        match self.state {
            WindowState::Uninitialized => None,
            WindowState::Windowing(w) => Some(w),
        }
    }

    /// Feed a block notification.
    ///
    /// `delay_blocks` is read from the live configuration at call time and is
    /// only used when a new window is opened. Returns the window to flush when
    /// `block` closes the current one; the next window then starts at `block`.
    pub fn observe(&mut self, block: u64, delay_blocks: u64) -> Option<ConfirmationWindow> {
        let open = match self.state {
            WindowState::Uninitialized => {
                let first = ConfirmationWindow::open(block, delay_blocks);
                tracing::debug!(window = %first, "first window opened");
                self.state = WindowState::Windowing(first);
                return None;
            }
            WindowState::Windowing(w) => w,
        };

        if !open.is_closed_by(block) {
            return None;
        }

        self.state = WindowState::Windowing(ConfirmationWindow::open(block, delay_blocks));
        Some(open)
    }
}

impl Default for WindowTracker {
    fn default() -> Self {
        Self::new()
    }
}
