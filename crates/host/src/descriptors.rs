//! Static USB descriptor data
//!
//! The harness exposes one fixed device: a vendor-specific USB 2.0 device
//! with a single configuration holding a single interface and no endpoints
//! beyond the implicit control endpoint. The host treats descriptors as
//! opaque byte blobs and validates only size and type-tag correctness;
//! everything here encodes to the standard little-endian wire layout.
//!
//! No string descriptors are supplied. When the OS asks for them, the host
//! forwards those control requests to the device's control queue, which is
//! exactly what drives the deferred-unplug scenario.

use crate::error::{HostError, Result};

/// Standard descriptor type tags
pub const DESCRIPTOR_TYPE_DEVICE: u8 = 0x01;
pub const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 0x02;
pub const DESCRIPTOR_TYPE_INTERFACE: u8 = 0x04;

/// Encoded length of a device descriptor
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;
/// Encoded length of a configuration descriptor header
pub const CONFIGURATION_DESCRIPTOR_LEN: usize = 9;
/// Encoded length of an interface descriptor
pub const INTERFACE_DESCRIPTOR_LEN: usize = 9;

/// Address of the implicit default control endpoint
pub const DEFAULT_CONTROL_ENDPOINT_ADDRESS: u8 = 0x00;

/// USB device descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// bcdUSB
    pub usb_version: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    /// bMaxPacketSize0
    pub max_control_packet_size: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice
    pub device_version: u16,
    pub manufacturer_string: u8,
    pub product_string: u8,
    pub serial_string: u8,
    pub num_configurations: u8,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            usb_version: 0x0200, // usb 2.0
            class: 0xff,         // vendor specific
            subclass: 0xff,
            protocol: 0xff,
            max_control_packet_size: 8,
            vendor_id: 0x1234,
            product_id: 0x5678,
            device_version: 0x0101,
            manufacturer_string: 1,
            product_string: 2,
            serial_string: 3,
            num_configurations: 1,
        }
    }
}

impl DeviceDescriptor {
    /// Encode to the 18-byte wire layout
    pub fn encode(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(DEVICE_DESCRIPTOR_LEN);
        blob.push(DEVICE_DESCRIPTOR_LEN as u8);
        blob.push(DESCRIPTOR_TYPE_DEVICE);
        blob.extend_from_slice(&self.usb_version.to_le_bytes());
        blob.push(self.class);
        blob.push(self.subclass);
        blob.push(self.protocol);
        blob.push(self.max_control_packet_size);
        blob.extend_from_slice(&self.vendor_id.to_le_bytes());
        blob.extend_from_slice(&self.product_id.to_le_bytes());
        blob.extend_from_slice(&self.device_version.to_le_bytes());
        blob.push(self.manufacturer_string);
        blob.push(self.product_string);
        blob.push(self.serial_string);
        blob.push(self.num_configurations);
        blob
    }
}

/// Configuration descriptor with its single inlined interface descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSet {
    pub num_interfaces: u8,
    pub configuration_value: u8,
    /// bmAttributes
    pub attributes: u8,
    /// Bus current, not relevant
    pub max_power: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub num_endpoints: u8,
}

impl Default for ConfigurationSet {
    fn default() -> Self {
        Self {
            num_interfaces: 1,
            configuration_value: 1,
            attributes: 0x80, // bus powered
            max_power: 1,
            interface_class: 0xff,
            interface_subclass: 0xff,
            interface_protocol: 0xff,
            num_endpoints: 0,
        }
    }
}

impl ConfigurationSet {
    /// Encode configuration + interface descriptors as one blob
    ///
    /// wTotalLength covers the inlined interface descriptor.
    pub fn encode(&self) -> Vec<u8> {
        let total = (CONFIGURATION_DESCRIPTOR_LEN + INTERFACE_DESCRIPTOR_LEN) as u16;
        let mut blob = Vec::with_capacity(total as usize);

        blob.push(CONFIGURATION_DESCRIPTOR_LEN as u8);
        blob.push(DESCRIPTOR_TYPE_CONFIGURATION);
        blob.extend_from_slice(&total.to_le_bytes());
        blob.push(self.num_interfaces);
        blob.push(self.configuration_value);
        blob.push(0); // configuration name string
        blob.push(self.attributes);
        blob.push(self.max_power);

        blob.push(INTERFACE_DESCRIPTOR_LEN as u8);
        blob.push(DESCRIPTOR_TYPE_INTERFACE);
        blob.push(0); // interface index
        blob.push(0); // alternate setting
        blob.push(self.num_endpoints);
        blob.push(self.interface_class);
        blob.push(self.interface_subclass);
        blob.push(self.interface_protocol);
        blob.push(0); // interface name string

        blob
    }
}

/// The descriptor blobs handed to device creation
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    device: DescriptorSource,
    configuration: DescriptorSource,
}

#[derive(Debug, Clone)]
enum DescriptorSource {
    Device(DeviceDescriptor),
    Configuration(ConfigurationSet),
    Raw(Vec<u8>),
}

impl Default for DescriptorSet {
    fn default() -> Self {
        Self::new(DeviceDescriptor::default(), ConfigurationSet::default())
    }
}

impl DescriptorSet {
    /// Descriptor set for the one device the harness emulates
    pub fn new(device: DeviceDescriptor, configuration: ConfigurationSet) -> Self {
        Self {
            device: DescriptorSource::Device(device),
            configuration: DescriptorSource::Configuration(configuration),
        }
    }

    /// Build from raw blobs, bypassing the typed constructors
    ///
    /// Nothing is validated here; the host rejects malformed blobs at
    /// device creation time.
    pub fn from_raw(device: Vec<u8>, configuration: Vec<u8>) -> Self {
        Self {
            device: DescriptorSource::Raw(device),
            configuration: DescriptorSource::Raw(configuration),
        }
    }

    pub fn device_blob(&self) -> Vec<u8> {
        match &self.device {
            DescriptorSource::Device(d) => d.encode(),
            DescriptorSource::Configuration(c) => c.encode(),
            DescriptorSource::Raw(b) => b.clone(),
        }
    }

    pub fn configuration_blob(&self) -> Vec<u8> {
        match &self.configuration {
            DescriptorSource::Device(d) => d.encode(),
            DescriptorSource::Configuration(c) => c.encode(),
            DescriptorSource::Raw(b) => b.clone(),
        }
    }
}

/// Validate a descriptor blob for size and type-tag correctness
///
/// The blob's leading length byte must match its actual size, and the type
/// tag must be the expected one. Configuration blobs must additionally
/// carry a wTotalLength equal to the blob size, since the interface
/// descriptor is inlined.
pub fn validate_blob(expected_type: u8, blob: &[u8]) -> Result<()> {
    if blob.len() < 2 {
        return Err(HostError::InvalidDescriptor {
            reason: format!("blob too short: {} bytes", blob.len()),
        });
    }

    if blob[1] != expected_type {
        return Err(HostError::InvalidDescriptor {
            reason: format!("type tag {:#x}, expected {:#x}", blob[1], expected_type),
        });
    }

    match expected_type {
        DESCRIPTOR_TYPE_DEVICE => {
            if blob.len() != DEVICE_DESCRIPTOR_LEN || blob[0] as usize != blob.len() {
                return Err(HostError::InvalidDescriptor {
                    reason: format!(
                        "device descriptor length {} (header says {})",
                        blob.len(),
                        blob[0]
                    ),
                });
            }
        }
        DESCRIPTOR_TYPE_CONFIGURATION => {
            if blob[0] as usize != CONFIGURATION_DESCRIPTOR_LEN
                || blob.len() < CONFIGURATION_DESCRIPTOR_LEN
            {
                return Err(HostError::InvalidDescriptor {
                    reason: format!("configuration header length {}", blob[0]),
                });
            }
            let total = u16::from_le_bytes([blob[2], blob[3]]) as usize;
            if total != blob.len() {
                return Err(HostError::InvalidDescriptor {
                    reason: format!("wTotalLength {} but blob is {} bytes", total, blob.len()),
                });
            }
        }
        _ => {
            return Err(HostError::InvalidDescriptor {
                reason: format!("unsupported descriptor type {:#x}", expected_type),
            });
        }
    }

    Ok(())
}
