//! Host error types

use thiserror::Error;

/// Errors reported by the host object/lifecycle interface
#[derive(Debug, Error)]
pub enum HostError {
    /// Allocation failure during device/endpoint/queue creation
    #[error("Insufficient resources")]
    OutOfResources,

    /// Another controller instance already owns this name
    #[error("Object name collision: {name}")]
    NameCollision { name: String },

    /// Descriptor blob failed size/type-tag validation
    #[error("Invalid descriptor: {reason}")]
    InvalidDescriptor { reason: String },

    /// Host rejected a plug-in or plug-out request
    #[error("Plug operation rejected by host (status {code:#x})")]
    PlugRejected { code: u32 },

    /// Operation referenced an object the host no longer tracks
    #[error("No such host object")]
    NoSuchObject,

    /// Plug-out requested for a device that was never plugged in
    #[error("Device is not plugged in")]
    NotPluggedIn,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HostError>;
