//! Per-device control queue
//!
//! Every control request is completed with "not supported" -- the device
//! implements no protocol. What the queue does carry is the unplug
//! trigger: in the deferred scenario it holds a non-owning back-reference
//! to its device, consumed by the first request ever delivered. The
//! read-and-clear of that reference is the single synchronization point
//! of the whole design and must hold up even if the host delivers
//! requests to one queue concurrently.

use crate::config::Scenario;
use crate::device::VirtualDevice;
use host::QueueObjectId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Completion status of a dispatched request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Success,
    NotSupported,
    InvalidDeviceRequest,
}

/// A request on the device's default control channel
#[derive(Debug)]
pub struct ControlRequest {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    completion: Option<oneshot::Sender<RequestStatus>>,
}

impl ControlRequest {
    /// Build a request together with the receiver for its completion
    pub fn new(
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
    ) -> (Self, oneshot::Receiver<RequestStatus>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request_type,
                request,
                value,
                index,
                completion: Some(tx),
            },
            rx,
        )
    }

    /// Standard GET_DESCRIPTOR for a string descriptor
    ///
    /// The harness supplies no string descriptors, so the OS's attempt to
    /// read one is the first request a device's queue ever sees.
    pub fn get_string_descriptor(index: u8) -> (Self, oneshot::Receiver<RequestStatus>) {
        Self::new(0x80, 0x06, 0x0300 | index as u16, 0)
    }

    fn complete(mut self, status: RequestStatus) {
        if let Some(tx) = self.completion.take() {
            // The sender side never cares whether the requester is still
            // listening.
            let _ = tx.send(status);
        }
    }
}

/// Control-request queue bound to one virtual device
pub struct ControlQueue {
    scenario: Scenario,
    queue_object: QueueObjectId,
    /// Back-reference to the owning device; consumed at most once.
    /// Weak, never owning: the queue must not extend the device's life.
    device_ref: Mutex<Option<Weak<VirtualDevice>>>,
    /// Requests that reached a queue that should have been unreachable
    faults: AtomicU32,
}

impl ControlQueue {
    pub(crate) fn new(
        scenario: Scenario,
        queue_object: QueueObjectId,
        device: Weak<VirtualDevice>,
    ) -> Self {
        Self {
            scenario,
            queue_object,
            device_ref: Mutex::new(Some(device)),
            faults: AtomicU32::new(0),
        }
    }

    /// Host queue object backing this queue
    pub fn queue_object(&self) -> QueueObjectId {
        self.queue_object
    }

    /// Handle one control request
    ///
    /// Always completes the request with `NotSupported`. In the deferred
    /// scenario the first request additionally schedules the device's
    /// unplug task; later requests observe the cleared back-reference and
    /// schedule nothing.
    pub fn handle_control_request(&self, request: ControlRequest) {
        match self.scenario {
            Scenario::Immediate => {
                // Devices are unplugged before the OS can talk to them, so
                // no request may ever land here. Recorded as a fault the
                // tests can observe rather than taking the process down.
                self.faults.fetch_add(1, Ordering::SeqCst);
                error!(
                    "Control request reached an unreachable queue (bmRequestType {:#04x}, bRequest {:#04x})",
                    request.request_type, request.request
                );
            }
            Scenario::DeferredOnFirstRequest => {
                debug!("USB control request received");
                // Single indivisible read-and-clear: take() under the lock
                // means exactly one request can ever see the reference.
                let taken = self.device_ref.lock().unwrap().take();
                if let Some(device) = taken.and_then(|weak| weak.upgrade()) {
                    device.schedule_unplug();
                }
            }
        }

        request.complete(RequestStatus::NotSupported);
    }

    /// Drop the back-reference without dispatching to it
    ///
    /// Called when unplug starts via the other trigger path, so a late
    /// request cannot schedule a second teardown.
    pub(crate) fn clear_device_ref(&self) {
        self.device_ref.lock().unwrap().take();
    }

    /// Whether the back-reference is still armed
    pub fn has_device_ref(&self) -> bool {
        self.device_ref.lock().unwrap().is_some()
    }

    /// Requests that reached this queue although it should be unreachable
    pub fn faults(&self) -> u32 {
        self.faults.load(Ordering::SeqCst)
    }

    /// Spawn the serialized dispatch loop for this queue
    ///
    /// Models the host's per-queue request delivery: requests sent on the
    /// returned channel are handled one at a time in arrival order. The
    /// loop holds its own reference to the queue, so the queue survives
    /// its device's destruction window -- exactly the lifetime shape the
    /// harness exists to exercise.
    pub fn spawn_dispatch(self: &Arc<Self>) -> async_channel::Sender<ControlRequest> {
        let (tx, rx) = async_channel::bounded::<ControlRequest>(64);
        let queue = Arc::clone(self);

        tokio::spawn(async move {
            while let Ok(request) = rx.recv().await {
                queue.handle_control_request(request);
            }
            debug!("Dispatch loop for q#{} stopped", queue.queue_object.0);
        });

        tx
    }
}

impl std::fmt::Debug for ControlQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlQueue")
            .field("scenario", &self.scenario)
            .field("queue_object", &self.queue_object)
            .field("armed", &self.has_device_ref())
            .field("faults", &self.faults())
            .finish()
    }
}
