//! Deferred unplug task
//!
//! Decouples "decide to unplug" from "perform unplug". The deciding call
//! path (a control request handler, or the controller's creation loop) may
//! run in a context where blocking teardown work is off limits, so the
//! actual unplug is handed to the runtime's blocking pool.

use crate::device::VirtualDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Asynchronous unit of work that unplugs its owning device
///
/// Created together with the device and scheduled at most once; the
/// device's own state machine is the backstop should a buggy caller get
/// past the latch.
pub struct UnplugTask {
    device: Weak<VirtualDevice>,
    scheduled: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UnplugTask {
    pub(crate) fn new(device: Weak<VirtualDevice>) -> Self {
        Self {
            device,
            scheduled: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Enqueue the unplug for asynchronous execution
    ///
    /// Returns immediately without blocking the caller. Re-scheduling an
    /// already scheduled task is a no-op, matching the enqueue semantics
    /// of the deferred-call primitive this models. Returns whether this
    /// call was the one that scheduled the work.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self) -> bool {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            debug!("Unplug task already scheduled");
            return false;
        }

        let Some(device) = self.device.upgrade() else {
            // The owning device is gone; nothing left to unplug.
            warn!("Unplug task scheduled after its device was released");
            return false;
        };

        // Unplug may block waiting on host plug-out completion, so it runs
        // on the blocking pool, never on the request-handling path.
        let handle = tokio::task::spawn_blocking(move || device.unplug());
        *self.handle.lock().unwrap() = Some(handle);
        true
    }

    /// Whether the task has been scheduled
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for UnplugTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnplugTask")
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schedule_without_device_is_noop() {
        // A Weak with no live Arc behind it
        let task = UnplugTask::new(Weak::new());
        assert!(!task.schedule());
        // The latch still flips, so later calls stay no-ops
        assert!(task.is_scheduled());
        assert!(!task.schedule());
    }
}
