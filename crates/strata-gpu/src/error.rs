//! GPU error types.

use ash::vk;
use strata_binding::BindingError;
use strata_core::QueryKind;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Native query pool creation failed.
    #[error("Failed to create {kind} query pool: {source}")]
    QueryPoolCreation {
        kind: QueryKind,
        #[source]
        source: vk::Result,
    },

    /// A device created by the factory is still alive.
    #[error("A device has already been initialized by this factory")]
    DeviceAlreadyInitialized,

    /// Resource signature error.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
