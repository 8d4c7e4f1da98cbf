//! Virtual device lifecycle
//!
//! One emulated child device: its host objects (device object, default
//! control endpoint, control-queue object), its control queue, its
//! deferred unplug task, and the state machine that guarantees teardown
//! happens exactly once. The device is the exclusive owner of its host
//! resources until unplug begins; from then on the teardown path owns
//! them.

use crate::config::Scenario;
use crate::queue::ControlQueue;
use crate::unplug::UnplugTask;
use host::descriptors::DEFAULT_CONTROL_ENDPOINT_ADDRESS;
use host::{DescriptorSet, DeviceObjectId, EndpointId, HostBus, LifecycleHooks};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle states of a virtual device
///
/// `Created -> PluggedIn -> Unplugging -> Destroyed`, never backwards.
/// A device that fails creation never leaves `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Created,
    PluggedIn,
    Unplugging,
    Destroyed,
}

/// One emulated USB device on the virtual controller
pub struct VirtualDevice {
    port: u32,
    object: DeviceObjectId,
    endpoint: EndpointId,
    host: Arc<dyn HostBus>,
    state: watch::Sender<DeviceState>,
    queue: Arc<ControlQueue>,
    task: UnplugTask,
}

impl VirtualDevice {
    /// Create the device and plug it into the controller
    ///
    /// Allocates the host device object with the supplied descriptors
    /// (rejected here if malformed), the default control endpoint, the
    /// control-queue object, and the deferred unplug task, then performs
    /// the host plug-in. Any failure releases exactly the intermediates
    /// allocated before it; no half-built device survives an error.
    pub fn create(
        host: Arc<dyn HostBus>,
        port: u32,
        scenario: Scenario,
        descriptors: &DescriptorSet,
        hooks: LifecycleHooks,
    ) -> host::Result<Arc<Self>> {
        let object = host.create_device_object(descriptors, hooks)?;

        let endpoint = match host.create_endpoint(object, DEFAULT_CONTROL_ENDPOINT_ADDRESS) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("Endpoint creation failed for port {}: {}", port, e);
                host.force_delete(object);
                return Err(e);
            }
        };

        let queue_object = match host.create_queue(object) {
            Ok(queue_object) => queue_object,
            Err(e) => {
                error!("Queue creation failed for port {}: {}", port, e);
                // The endpoint is released together with the device object.
                host.force_delete(object);
                return Err(e);
            }
        };

        let device = Arc::new_cyclic(|weak| Self {
            port,
            object,
            endpoint,
            host: Arc::clone(&host),
            state: watch::channel(DeviceState::Created).0,
            queue: Arc::new(ControlQueue::new(scenario, queue_object, weak.clone())),
            task: UnplugTask::new(weak.clone()),
        });

        if let Err(e) = host.plug_in(object) {
            error!("Plug-in failed for port {}: {}", port, e);
            if let Err(e) = host.release_queue(queue_object) {
                warn!("Queue release on failed plug-in: {}", e);
            }
            host.force_delete(object);
            device.state.send_replace(DeviceState::Destroyed);
            return Err(e);
        }

        device.state.send_replace(DeviceState::PluggedIn);
        debug!("Device on port {} plugged in as {}", port, object);
        Ok(device)
    }

    /// Unplug the device and release everything it owns
    ///
    /// Idempotent: only the caller that wins the PluggedIn -> Unplugging
    /// transition acts; any other invocation, concurrent or later, is a
    /// no-op. On host plug-out rejection the device object is deleted
    /// forcefully instead -- a degraded teardown, logged, never fatal.
    /// Either way the device ends up `Destroyed` and its control-queue
    /// object is released.
    pub fn unplug(&self) {
        let begun = self.state.send_if_modified(|state| {
            if *state == DeviceState::PluggedIn {
                *state = DeviceState::Unplugging;
                true
            } else {
                false
            }
        });
        if !begun {
            debug!("Unplug of port {} already handled", self.port);
            return;
        }

        // From here on no control request may trigger a second teardown.
        self.queue.clear_device_ref();

        match self.host.plug_out(self.object) {
            Ok(()) => info!("USB device on port {} plugged out", self.port),
            Err(e) => {
                error!("Plug-out of port {} rejected: {}", self.port, e);
                self.host.force_delete(self.object);
                warn!("USB device on port {} deleted forcefully", self.port);
            }
        }

        if let Err(e) = self.host.release_queue(self.queue.queue_object()) {
            warn!("Control-queue release for port {}: {}", self.port, e);
        }

        self.state.send_replace(DeviceState::Destroyed);
    }

    /// Schedule the deferred unplug task
    pub fn schedule_unplug(&self) -> bool {
        self.task.schedule()
    }

    /// Whether the unplug task has been scheduled
    pub fn unplug_scheduled(&self) -> bool {
        self.task.is_scheduled()
    }

    /// Current lifecycle state
    pub fn state(&self) -> DeviceState {
        *self.state.borrow()
    }

    /// Wait until the device reaches `Destroyed`
    pub async fn wait_destroyed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in self, so this cannot fail while we borrow it.
        let _ = rx.wait_for(|state| *state == DeviceState::Destroyed).await;
    }

    /// The device's control queue
    pub fn control_queue(&self) -> &Arc<ControlQueue> {
        &self.queue
    }

    /// Controller port this device occupies
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Host endpoint object for the default control endpoint
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Host device object backing this device
    pub fn object(&self) -> DeviceObjectId {
        self.object
    }
}

impl std::fmt::Debug for VirtualDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualDevice")
            .field("port", &self.port)
            .field("object", &self.object)
            .field("state", &self.state())
            .finish()
    }
}
