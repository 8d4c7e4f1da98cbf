//! Host-framework model for the virtual host-controller harness
//!
//! This crate provides the pieces the harness consumes from "the host":
//! the device/object lifecycle interface ([`HostBus`]), the static USB
//! descriptor data handed to device creation, error types, and logging
//! setup. The [`SimHost`] implementation keeps a ledger of every object
//! the harness allocates, so tests and the demo binary can check that a
//! full plug-in/plug-out cycle leaves nothing behind.

pub mod bus;
pub mod descriptors;
pub mod error;
pub mod logging;
pub mod sim;

pub use bus::{
    ControllerId, DeviceObjectId, EndpointId, HostBus, LifecycleHooks, QueueObjectId,
};
pub use descriptors::{ConfigurationSet, DescriptorSet, DeviceDescriptor};
pub use error::{HostError, Result};
pub use logging::setup_logging;
pub use sim::{LeakReport, SimHost};
