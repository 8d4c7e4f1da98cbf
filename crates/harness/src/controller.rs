//! Virtual controller orchestration
//!
//! Brings up the emulated host controller: registers it with the host
//! (retrying the name suffix past collisions with other controller
//! instances), exposes the controller-scoped IOCTL surface, and populates
//! the port set with virtual devices. In the immediate scenario it also
//! schedules every device's unplug right after creation.

use crate::config::Scenario;
use crate::device::VirtualDevice;
use crate::queue::RequestStatus;
use host::{ControllerId, DescriptorSet, HostBus, HostError, LifecycleHooks};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Base device name; the instance suffix is appended
pub const BASE_DEVICE_NAME: &str = "usbfdo-";
/// Base symbolic-link name; the instance suffix is appended
pub const BASE_SYMBOLIC_LINK_NAME: &str = "hcd";

/// The emulated USB host controller and its device set
pub struct VirtualController {
    host: Arc<dyn HostBus>,
    id: ControllerId,
    scenario: Scenario,
    devices: Vec<Arc<VirtualDevice>>,
    creation_failures: u32,
}

impl VirtualController {
    /// Register the controller and create its devices
    ///
    /// A device that fails to create is logged and counted; the remaining
    /// devices are still brought up. Controller-level failures (name
    /// registration hitting a non-collision error) propagate immediately.
    ///
    /// Must be called from within a Tokio runtime: the immediate scenario
    /// schedules unplug work as part of bring-up.
    pub fn initialize(
        host: Arc<dyn HostBus>,
        scenario: Scenario,
        num_devices: u32,
        descriptors: &DescriptorSet,
    ) -> host::Result<Self> {
        let id = Self::register_with_host(host.as_ref())?;

        let mut devices = Vec::with_capacity(num_devices as usize);
        let mut creation_failures = 0;

        for port in 0..num_devices {
            let hooks = LifecycleHooks::new()
                .on_cleanup(|object| debug!("Device object cleanup for {}", object))
                .on_destroy(|object| debug!("Device object destroy for {}", object));

            match VirtualDevice::create(Arc::clone(&host), port, scenario, descriptors, hooks) {
                Ok(device) => {
                    info!("USB device created & plugged in on port {}", port);
                    if scenario == Scenario::Immediate {
                        device.schedule_unplug();
                    }
                    devices.push(device);
                }
                Err(e) => {
                    warn!("Device creation on port {} failed: {}", port, e);
                    creation_failures += 1;
                }
            }
        }

        info!(
            "Controller initialized: {} device(s) plugged in, {} failed, scenario {}",
            devices.len(),
            creation_failures,
            scenario
        );

        Ok(Self {
            host,
            id,
            scenario,
            devices,
            creation_failures,
        })
    }

    /// Register under the first free name suffix
    ///
    /// Collisions are expected at least once when another controller
    /// instance already exists; anything else aborts bring-up.
    fn register_with_host(host: &dyn HostBus) -> host::Result<ControllerId> {
        for instance in 0u32.. {
            let name = format!("{BASE_DEVICE_NAME}{instance}");
            let symlink = format!("{BASE_SYMBOLIC_LINK_NAME}{instance}");

            match host.register_controller(&name, &symlink) {
                Ok(id) => {
                    info!("Controller registered as {} ({})", name, symlink);
                    return Ok(id);
                }
                Err(HostError::NameCollision { name }) => {
                    debug!("Name {} already in use, trying next suffix", name);
                }
                Err(e) => {
                    error!("Controller registration failed: {}", e);
                    return Err(e);
                }
            }
        }
        unreachable!("name suffix space exhausted")
    }

    /// Controller-scoped device-control request handler
    ///
    /// Forwards host-defined USB-capability IOCTLs to the host's generic
    /// handler; anything it does not consume completes with
    /// `InvalidDeviceRequest`.
    pub fn handle_device_io_control(&self, code: u32) -> RequestStatus {
        if self.host.try_handle_controller_ioctl(code) {
            RequestStatus::Success
        } else {
            debug!("Unhandled controller IOCTL {:#x}", code);
            RequestStatus::InvalidDeviceRequest
        }
    }

    /// The live device set, in port order
    pub fn devices(&self) -> &[Arc<VirtualDevice>] {
        &self.devices
    }

    /// Devices that failed creation during bring-up
    pub fn creation_failures(&self) -> u32 {
        self.creation_failures
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Wait until every device has reached `Destroyed`
    pub async fn wait_all_destroyed(&self) {
        for device in &self.devices {
            device.wait_destroyed().await;
        }
    }
}

impl std::fmt::Debug for VirtualController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualController")
            .field("id", &self.id)
            .field("scenario", &self.scenario)
            .field("devices", &self.devices.len())
            .field("creation_failures", &self.creation_failures)
            .finish()
    }
}
