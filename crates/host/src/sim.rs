//! In-process host implementation
//!
//! [`SimHost`] stands in for the real host framework: it hands out opaque
//! handles, tracks every live object in a ledger, and fires the
//! cleanup/destroy hooks when an object is released. Failure injection
//! lets tests force the error paths the harness must survive: name
//! collisions, allocation failure partway through a device-creation loop,
//! and plug-in/plug-out rejection.
//!
//! The ledger doubles as the leak detector: after a full teardown the
//! [`LeakReport`] should list no devices, endpoints, or queues.

use crate::bus::{
    ControllerId, DeviceObjectId, EndpointId, HostBus, LifecycleHooks, QueueObjectId,
};
use crate::descriptors::{
    self, DESCRIPTOR_TYPE_CONFIGURATION, DESCRIPTOR_TYPE_DEVICE, DescriptorSet,
};
use crate::error::{HostError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Controller-scoped IOCTL codes the host's generic handler consumes
pub const IOCTL_QUERY_USB_CAPABILITY: u32 = 0x0022_0004;
/// Root-hub name query, also consumed by the generic handler
pub const IOCTL_GET_ROOT_HUB_NAME: u32 = 0x0022_0008;

#[derive(Debug)]
struct DeviceEntry {
    plugged_in: bool,
    endpoints: Vec<u64>,
}

#[derive(Debug, Default)]
struct Injection {
    /// Controller names already taken by "another instance"
    reserved_names: HashSet<String>,
    /// Fail the nth create_device_object call (1-based), once
    fail_device_create_at: Option<u32>,
    fail_plug_in: bool,
    fail_plug_out: bool,
}

#[derive(Default)]
struct Ledger {
    next_id: u64,
    controllers: HashMap<u64, String>,
    devices: HashMap<u64, DeviceEntry>,
    endpoints: HashMap<u64, u64>,
    queues: HashMap<u64, u64>,
    hooks: HashMap<u64, LifecycleHooks>,
    device_creates: u32,
    injection: Injection,
}

impl Ledger {
    fn assign_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Count of host objects still alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakReport {
    pub controllers: usize,
    pub devices: usize,
    pub endpoints: usize,
    pub queues: usize,
}

impl LeakReport {
    /// True when no device-scoped objects survive
    ///
    /// Controllers are excluded: they live for the process lifetime and
    /// are never explicitly destroyed.
    pub fn is_clean(&self) -> bool {
        self.devices == 0 && self.endpoints == 0 && self.queues == 0
    }
}

impl std::fmt::Display for LeakReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} device(s), {} endpoint(s), {} queue(s) still alive ({} controller(s) registered)",
            self.devices, self.endpoints, self.queues, self.controllers
        )
    }
}

/// Simulated host framework
pub struct SimHost {
    ledger: Mutex<Ledger>,
    plug_in_calls: AtomicU32,
    plug_out_calls: AtomicU32,
    force_delete_calls: AtomicU32,
}

impl SimHost {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            plug_in_calls: AtomicU32::new(0),
            plug_out_calls: AtomicU32::new(0),
            force_delete_calls: AtomicU32::new(0),
        }
    }

    /// Mark a controller name as already taken
    pub fn reserve_name(&self, name: &str) {
        self.ledger
            .lock()
            .unwrap()
            .injection
            .reserved_names
            .insert(name.to_string());
    }

    /// Fail the nth device-object creation (1-based) with OutOfResources
    pub fn fail_device_create_at(&self, n: u32) {
        self.ledger.lock().unwrap().injection.fail_device_create_at = Some(n);
    }

    /// Reject every plug-in request
    pub fn fail_plug_in(&self) {
        self.ledger.lock().unwrap().injection.fail_plug_in = true;
    }

    /// Reject every plug-out request
    pub fn fail_plug_out(&self) {
        self.ledger.lock().unwrap().injection.fail_plug_out = true;
    }

    pub fn plug_in_calls(&self) -> u32 {
        self.plug_in_calls.load(Ordering::SeqCst)
    }

    pub fn plug_out_calls(&self) -> u32 {
        self.plug_out_calls.load(Ordering::SeqCst)
    }

    pub fn force_delete_calls(&self) -> u32 {
        self.force_delete_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of the live-object ledger
    pub fn leak_report(&self) -> LeakReport {
        let ledger = self.ledger.lock().unwrap();
        LeakReport {
            controllers: ledger.controllers.len(),
            devices: ledger.devices.len(),
            endpoints: ledger.endpoints.len(),
            queues: ledger.queues.len(),
        }
    }

    /// Remove a device entry and fire its hooks outside the ledger lock
    fn release_device_entry(&self, device: DeviceObjectId) -> bool {
        let (entry, hooks) = {
            let mut ledger = self.ledger.lock().unwrap();
            let Some(entry) = ledger.devices.remove(&device.0) else {
                return false;
            };
            for ep in &entry.endpoints {
                ledger.endpoints.remove(ep);
            }
            let hooks = ledger.hooks.remove(&device.0);
            (entry, hooks)
        };

        debug!(
            "Host released {} ({} endpoint(s) with it)",
            device,
            entry.endpoints.len()
        );

        // Cleanup fires first, then destroy. Hooks run without the ledger
        // lock held so they may call back into the host.
        if let Some(hooks) = hooks {
            hooks.fire_cleanup(device);
            hooks.fire_destroy(device);
        }
        true
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBus for SimHost {
    fn register_controller(&self, name: &str, symlink: &str) -> Result<ControllerId> {
        let mut ledger = self.ledger.lock().unwrap();

        if ledger.injection.reserved_names.contains(name)
            || ledger.controllers.values().any(|n| n == name)
        {
            return Err(HostError::NameCollision {
                name: name.to_string(),
            });
        }

        let id = ledger.assign_id();
        ledger.controllers.insert(id, name.to_string());
        debug!("Registered controller {} as {} ({})", id, name, symlink);
        Ok(ControllerId(id))
    }

    fn create_device_object(
        &self,
        descriptors: &DescriptorSet,
        hooks: LifecycleHooks,
    ) -> Result<DeviceObjectId> {
        descriptors::validate_blob(DESCRIPTOR_TYPE_DEVICE, &descriptors.device_blob())?;
        descriptors::validate_blob(
            DESCRIPTOR_TYPE_CONFIGURATION,
            &descriptors.configuration_blob(),
        )?;

        let mut ledger = self.ledger.lock().unwrap();
        ledger.device_creates += 1;
        if ledger.injection.fail_device_create_at == Some(ledger.device_creates) {
            warn!("Injected allocation failure for device object");
            return Err(HostError::OutOfResources);
        }

        let id = ledger.assign_id();
        ledger.devices.insert(
            id,
            DeviceEntry {
                plugged_in: false,
                endpoints: Vec::new(),
            },
        );
        ledger.hooks.insert(id, hooks);
        debug!("Created device object dev#{}", id);
        Ok(DeviceObjectId(id))
    }

    fn create_endpoint(&self, device: DeviceObjectId, address: u8) -> Result<EndpointId> {
        let mut ledger = self.ledger.lock().unwrap();
        let id = ledger.assign_id();
        let entry = ledger
            .devices
            .get_mut(&device.0)
            .ok_or(HostError::NoSuchObject)?;
        entry.endpoints.push(id);
        ledger.endpoints.insert(id, device.0);
        debug!("Created endpoint ep#{} (address {:#x}) on {}", id, address, device);
        Ok(EndpointId(id))
    }

    fn create_queue(&self, device: DeviceObjectId) -> Result<QueueObjectId> {
        let mut ledger = self.ledger.lock().unwrap();
        if !ledger.devices.contains_key(&device.0) {
            return Err(HostError::NoSuchObject);
        }
        let id = ledger.assign_id();
        ledger.queues.insert(id, device.0);
        debug!("Created queue q#{} for {}", id, device);
        Ok(QueueObjectId(id))
    }

    fn release_queue(&self, queue: QueueObjectId) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger
            .queues
            .remove(&queue.0)
            .map(|owner| debug!("Released queue q#{} (was owned by dev#{})", queue.0, owner))
            .ok_or(HostError::NoSuchObject)
    }

    fn plug_in(&self, device: DeviceObjectId) -> Result<()> {
        self.plug_in_calls.fetch_add(1, Ordering::SeqCst);
        let mut ledger = self.ledger.lock().unwrap();
        if ledger.injection.fail_plug_in {
            return Err(HostError::PlugRejected { code: 0xC000_0001 });
        }
        let entry = ledger
            .devices
            .get_mut(&device.0)
            .ok_or(HostError::NoSuchObject)?;
        entry.plugged_in = true;
        debug!("{} plugged in", device);
        Ok(())
    }

    fn plug_out(&self, device: DeviceObjectId) -> Result<()> {
        self.plug_out_calls.fetch_add(1, Ordering::SeqCst);
        {
            let ledger = self.ledger.lock().unwrap();
            if ledger.injection.fail_plug_out {
                return Err(HostError::PlugRejected { code: 0xC000_0001 });
            }
            let entry = ledger.devices.get(&device.0).ok_or(HostError::NoSuchObject)?;
            if !entry.plugged_in {
                return Err(HostError::NotPluggedIn);
            }
        }
        self.release_device_entry(device);
        Ok(())
    }

    fn force_delete(&self, device: DeviceObjectId) {
        self.force_delete_calls.fetch_add(1, Ordering::SeqCst);
        if !self.release_device_entry(device) {
            warn!("Forced delete of unknown object {}", device);
        }
    }

    fn try_handle_controller_ioctl(&self, code: u32) -> bool {
        matches!(code, IOCTL_QUERY_USB_CAPABILITY | IOCTL_GET_ROOT_HUB_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn create_device(host: &SimHost) -> DeviceObjectId {
        host.create_device_object(&DescriptorSet::default(), LifecycleHooks::new())
            .unwrap()
    }

    #[test]
    fn test_plug_cycle_releases_everything() {
        let host = SimHost::new();
        let dev = create_device(&host);
        let _ep = host.create_endpoint(dev, 0).unwrap();
        let queue = host.create_queue(dev).unwrap();

        host.plug_in(dev).unwrap();
        host.plug_out(dev).unwrap();
        host.release_queue(queue).unwrap();

        assert!(host.leak_report().is_clean());
        assert_eq!(host.plug_out_calls(), 1);
    }

    #[test]
    fn test_unreleased_queue_shows_in_leak_report() {
        let host = SimHost::new();
        let dev = create_device(&host);
        let _queue = host.create_queue(dev).unwrap();

        host.plug_in(dev).unwrap();
        host.plug_out(dev).unwrap();

        let report = host.leak_report();
        assert_eq!(report.devices, 0);
        assert_eq!(report.queues, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_hooks_fire_cleanup_then_destroy() {
        let host = SimHost::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        let o2 = order.clone();
        let hooks = LifecycleHooks::new()
            .on_cleanup(move |id| o1.lock().unwrap().push(("cleanup", id)))
            .on_destroy(move |id| o2.lock().unwrap().push(("destroy", id)));

        let dev = host
            .create_device_object(&DescriptorSet::default(), hooks)
            .unwrap();
        host.plug_in(dev).unwrap();
        host.plug_out(dev).unwrap();

        let order = order.lock().unwrap();
        assert_eq!(*order, vec![("cleanup", dev), ("destroy", dev)]);
    }

    #[test]
    fn test_name_collision() {
        let host = SimHost::new();
        host.reserve_name("usbfdo-0");

        assert!(matches!(
            host.register_controller("usbfdo-0", "hcd0"),
            Err(HostError::NameCollision { .. })
        ));
        host.register_controller("usbfdo-1", "hcd1").unwrap();

        // Second registration of the same name also collides
        assert!(host.register_controller("usbfdo-1", "hcd1").is_err());
    }

    #[test]
    fn test_injected_allocation_failure() {
        let host = SimHost::new();
        host.fail_device_create_at(2);

        create_device(&host);
        assert!(matches!(
            host.create_device_object(&DescriptorSet::default(), LifecycleHooks::new()),
            Err(HostError::OutOfResources)
        ));
        // Only the injected call fails
        create_device(&host);
        assert_eq!(host.leak_report().devices, 2);
    }

    #[test]
    fn test_plug_out_rejection_and_forced_delete() {
        let host = SimHost::new();
        host.fail_plug_out();

        let destroys = Arc::new(AtomicUsize::new(0));
        let d = destroys.clone();
        let hooks = LifecycleHooks::new().on_destroy(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        });

        let dev = host
            .create_device_object(&DescriptorSet::default(), hooks)
            .unwrap();
        host.plug_in(dev).unwrap();

        assert!(matches!(
            host.plug_out(dev),
            Err(HostError::PlugRejected { .. })
        ));
        // Rejection must not release anything
        assert_eq!(host.leak_report().devices, 1);
        assert_eq!(destroys.load(Ordering::SeqCst), 0);

        host.force_delete(dev);
        assert_eq!(host.leak_report().devices, 0);
        assert_eq!(destroys.load(Ordering::SeqCst), 1);
        assert_eq!(host.force_delete_calls(), 1);
    }

    #[test]
    fn test_malformed_descriptors_rejected() {
        let host = SimHost::new();
        let set = DescriptorSet::from_raw(vec![0x12, 0x01, 0x00], vec![]);
        assert!(matches!(
            host.create_device_object(&set, LifecycleHooks::new()),
            Err(HostError::InvalidDescriptor { .. })
        ));
        assert_eq!(host.leak_report().devices, 0);
    }

    #[test]
    fn test_controller_ioctl_dispatch() {
        let host = SimHost::new();
        assert!(host.try_handle_controller_ioctl(IOCTL_QUERY_USB_CAPABILITY));
        assert!(host.try_handle_controller_ioctl(IOCTL_GET_ROOT_HUB_NAME));
        assert!(!host.try_handle_controller_ioctl(0xdead_beef));
    }

    #[test]
    fn test_release_queue_twice_fails() {
        let host = SimHost::new();
        let dev = create_device(&host);
        let queue = host.create_queue(dev).unwrap();

        host.release_queue(queue).unwrap();
        assert!(matches!(
            host.release_queue(queue),
            Err(HostError::NoSuchObject)
        ));
    }
}
