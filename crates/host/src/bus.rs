//! Host device/object lifecycle interface
//!
//! The harness never owns host resources directly; it asks the host to
//! create them and gets back opaque handles. [`HostBus`] is the consumed
//! surface: controller registration, device-object creation with attached
//! descriptors, endpoint and queue objects, plug-in/plug-out, and the
//! forced-delete fallback. Cleanup/destroy notifications are injectable
//! hooks with no required logic.

use crate::descriptors::DescriptorSet;
use crate::error::Result;

/// Handle to a registered controller instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(pub u64);

/// Handle to a host device object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceObjectId(pub u64);

/// Handle to a host endpoint object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(pub u64);

/// Handle to a host queue object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueObjectId(pub u64);

impl std::fmt::Display for DeviceObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

type LifecycleCallback = Box<dyn Fn(DeviceObjectId) + Send + Sync>;

/// Observability hooks fired when the host releases a device object
///
/// Cleanup fires first, then destroy. Both are purely diagnostic; the
/// harness attaches logging by default and tests attach counters.
#[derive(Default)]
pub struct LifecycleHooks {
    pub on_cleanup: Option<LifecycleCallback>,
    pub on_destroy: Option<LifecycleCallback>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_cleanup(mut self, f: impl Fn(DeviceObjectId) + Send + Sync + 'static) -> Self {
        self.on_cleanup = Some(Box::new(f));
        self
    }

    pub fn on_destroy(mut self, f: impl Fn(DeviceObjectId) + Send + Sync + 'static) -> Self {
        self.on_destroy = Some(Box::new(f));
        self
    }

    pub(crate) fn fire_cleanup(&self, id: DeviceObjectId) {
        if let Some(f) = &self.on_cleanup {
            f(id);
        }
    }

    pub(crate) fn fire_destroy(&self, id: DeviceObjectId) {
        if let Some(f) = &self.on_destroy {
            f(id);
        }
    }
}

impl std::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_cleanup", &self.on_cleanup.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .finish()
    }
}

/// Host device/object lifecycle interface consumed by the harness
pub trait HostBus: Send + Sync {
    /// Register a controller instance under a device name and symbolic link
    ///
    /// Fails with [`crate::HostError::NameCollision`] when another instance
    /// already owns the name; callers retry with an incremented suffix.
    fn register_controller(&self, name: &str, symlink: &str) -> Result<ControllerId>;

    /// Create a device object with the supplied descriptors attached
    ///
    /// Descriptor blobs are validated for size/type-tag correctness;
    /// a malformed set fails the creation before any object exists.
    fn create_device_object(
        &self,
        descriptors: &DescriptorSet,
        hooks: LifecycleHooks,
    ) -> Result<DeviceObjectId>;

    /// Create an endpoint on a device; released together with the device
    fn create_endpoint(&self, device: DeviceObjectId, address: u8) -> Result<EndpointId>;

    /// Create a queue object associated with a device
    ///
    /// Queue objects are NOT released when their device goes away; the
    /// owner must call [`HostBus::release_queue`] during teardown.
    fn create_queue(&self, device: DeviceObjectId) -> Result<QueueObjectId>;

    /// Release a queue object
    fn release_queue(&self, queue: QueueObjectId) -> Result<()>;

    /// Logically attach a device to the controller
    fn plug_in(&self, device: DeviceObjectId) -> Result<()>;

    /// Logically detach a device and release its object
    ///
    /// On success the device object and its endpoints are gone and the
    /// cleanup/destroy hooks have fired.
    fn plug_out(&self, device: DeviceObjectId) -> Result<()>;

    /// Unconditionally delete a device object
    ///
    /// The degraded teardown path used when plug-out is rejected.
    fn force_delete(&self, device: DeviceObjectId);

    /// Host's generic handler for controller-scoped USB-capability IOCTLs
    ///
    /// Returns true when the host consumed the request.
    fn try_handle_controller_ioctl(&self, code: u32) -> bool;
}
