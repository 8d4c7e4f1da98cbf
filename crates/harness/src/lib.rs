//! Virtual host-controller harness
//!
//! Emulates a USB host controller exposing N child devices and drives the
//! plug-in/plug-out/teardown sequence to surface resource-lifetime bugs.
//! Two scenarios are supported: every device is unplugged immediately
//! after creation, or a device is unplugged when the first control request
//! reaches its queue. Either way, teardown must happen exactly once per
//! device no matter how the trigger races.

pub mod config;
pub mod controller;
pub mod device;
pub mod queue;
pub mod unplug;

pub use config::{HarnessConfig, Scenario};
pub use controller::VirtualController;
pub use device::{DeviceState, VirtualDevice};
pub use queue::{ControlQueue, ControlRequest, RequestStatus};
pub use unplug::UnplugTask;
