//! Teardown ledger for Vulkan objects.
//!
//! Every object created through this crate registers its destruction here.
//! Flushing runs the registered actions in reverse registration order, so an
//! object is always destroyed before the objects it was created from.

use crate::error::Result;

type TeardownAction = Box<dyn FnOnce() -> Result<()>>;

/// A destruction action pending in the ledger.
struct PendingTeardown {
    label: String,
    action: TeardownAction,
}

/// LIFO queue of destruction actions.
///
/// Dropping the ledger flushes whatever is still pending.
#[derive(Default)]
pub struct TeardownLedger {
    pending: Vec<PendingTeardown>,
}

impl TeardownLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a destruction action.
    ///
    /// The action runs exactly once, during the next flush.
    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        let label = label.into();
        tracing::trace!("Registered teardown for {label}");
        self.pending.push(PendingTeardown {
            label,
            action: Box::new(action),
        });
    }

    /// Run every pending action, newest first.
    ///
    /// A failing action is logged and does not stop the remaining ones.
    /// Returns the number of actions that failed.
    pub fn flush(&mut self) -> usize {
        let mut failures = 0;
        while let Some(PendingTeardown { label, action }) = self.pending.pop() {
            tracing::debug!("Destroying {label}");
            if let Err(e) = action() {
                tracing::warn!("Teardown of {label} failed: {e}");
                failures += 1;
            }
        }
        failures
    }

    /// Get the number of pending actions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Labels of the pending actions, in the order a flush would run them.
    pub fn pending_labels(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().rev().map(|p| p.label.as_str())
    }
}

impl Drop for TeardownLedger {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            self.flush();
        }
    }
}

impl std::fmt::Debug for TeardownLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownLedger")
            .field("pending", &self.pending_labels().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuError;
    use ash::vk;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording(
        log: &Rc<RefCell<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl FnOnce() -> Result<()> {
        let log = Rc::clone(log);
        move || {
            log.borrow_mut().push(name);
            Ok(())
        }
    }

    #[test]
    fn flush_runs_newest_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ledger = TeardownLedger::new();
        ledger.push("instance", recording(&log, "instance"));
        ledger.push("device", recording(&log, "device"));
        ledger.push("swapchain", recording(&log, "swapchain"));

        assert_eq!(
            ledger.pending_labels().collect::<Vec<_>>(),
            vec!["swapchain", "device", "instance"]
        );
        assert_eq!(ledger.flush(), 0);
        assert_eq!(*log.borrow(), vec!["swapchain", "device", "instance"]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn second_flush_is_a_no_op() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ledger = TeardownLedger::new();
        ledger.push("a", recording(&log, "a"));

        ledger.flush();
        ledger.flush();
        assert_eq!(*log.borrow(), vec!["a"]);
    }

    #[test]
    fn failure_does_not_stop_flush() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut ledger = TeardownLedger::new();
        ledger.push("a", recording(&log, "a"));
        ledger.push("broken", || Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
        ledger.push("c", recording(&log, "c"));

        assert_eq!(ledger.pending_count(), 3);
        assert_eq!(ledger.flush(), 1);
        assert_eq!(*log.borrow(), vec!["c", "a"]);
    }

    #[test]
    fn drop_flushes_pending_actions() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut ledger = TeardownLedger::new();
            ledger.push("first", recording(&log, "first"));
            ledger.push("second", recording(&log, "second"));
        }
        assert_eq!(*log.borrow(), vec!["second", "first"]);
    }
}
