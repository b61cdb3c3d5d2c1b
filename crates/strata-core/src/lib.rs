//! Core types for the Strata graphics layer.
//!
//! This crate provides the vocabulary shared by the binding and GPU crates:
//! - Shader stage masks
//! - Query kinds
//! - Shader resource kinds, variable types and flags
//! - Common error types

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{QueryKind, ResourceFlags, ResourceKind, ShaderStages, VariableType};

/// Engine-wide constants
pub mod constants {
    /// Maximum number of resource signatures a pipeline can bind at once
    pub const MAX_RESOURCE_SIGNATURES: usize = 8;
    /// Descriptor sets a single signature can occupy (static+mutable and dynamic)
    pub const MAX_DESCRIPTOR_SETS_PER_SIGNATURE: usize = 2;
    /// Upper bound on descriptor-set-layout slots used by one pipeline
    pub const MAX_DESCRIPTOR_SET_SLOTS: usize =
        MAX_RESOURCE_SIGNATURES * MAX_DESCRIPTOR_SETS_PER_SIGNATURE;
}
