//! Binding error types.

use strata_core::{ResourceFlags, ResourceKind};
use thiserror::Error;

/// Errors raised while validating or resolving resource signatures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// Signature binding index exceeds the supported range.
    #[error("Signature '{signature}': binding index {index} exceeds the maximum allowed value ({max})")]
    BindingIndexOutOfRange {
        signature: String,
        index: u8,
        max: usize,
    },

    /// More signatures than a pipeline can bind.
    #[error("{count} resource signatures were given, at most {max} are supported")]
    TooManySignatures { count: usize, max: usize },

    /// Two signatures claim the same binding index.
    #[error(
        "Signature '{second}' at binding index {index} conflicts with signature '{first}' that uses the same index"
    )]
    BindingIndexConflict {
        index: u8,
        first: String,
        second: String,
    },

    /// Resource or sampler name is empty.
    #[error("Signature '{signature}': resource {index} has an empty name")]
    EmptyName { signature: String, index: usize },

    /// Resource or sampler is not visible to any stage.
    #[error("Signature '{signature}': '{resource}' has no shader stages")]
    EmptyShaderStages { signature: String, resource: String },

    /// Array size of zero.
    #[error("Signature '{signature}': resource '{resource}' has zero array size")]
    ZeroArraySize { signature: String, resource: String },

    /// Flags not applicable to the resource kind.
    #[error("Signature '{signature}': flags {flags:?} are not valid for {} '{resource}'", .kind.name())]
    InvalidFlags {
        signature: String,
        resource: String,
        kind: ResourceKind,
        flags: ResourceFlags,
    },

    /// The same resource is defined twice in overlapping stages of one signature.
    #[error("Signature '{signature}': resource '{resource}' is defined more than once in the same stage")]
    DuplicateResource { signature: String, resource: String },

    /// The same immutable sampler is defined twice in overlapping stages of one signature.
    #[error("Signature '{signature}': immutable sampler '{sampler}' is defined more than once in the same stage")]
    DuplicateImmutableSampler { signature: String, sampler: String },

    /// A signature that only holds immutable samplers has no set to put them in.
    #[error("Signature '{signature}' contains immutable samplers but no other resources")]
    OnlyImmutableSamplers { signature: String },

    /// A resource is defined by more than one signature in the same stage.
    #[error(
        "Shader resource '{resource}' is found in more than one resource signature ('{first}' and '{second}') in the same shader stage"
    )]
    AmbiguousResource {
        resource: String,
        first: String,
        second: String,
    },

    /// An immutable sampler is defined by more than one signature in the same stage.
    #[error(
        "Immutable sampler '{sampler}' is found in more than one resource signature ('{first}' and '{second}') in the same shader stage"
    )]
    AmbiguousImmutableSampler {
        sampler: String,
        first: String,
        second: String,
    },

    /// Shader resources with the same name cannot be merged into one signature entry.
    #[error("Pipeline '{pipeline}': shader resource '{resource}' cannot be merged: {reason}")]
    IncompatibleMerge {
        pipeline: String,
        resource: String,
        reason: String,
    },

    /// Shader resource is not present in any signature.
    #[error("Shader '{shader}' contains resource '{resource}' that is not present in any resource signature")]
    UnresolvedResource { shader: String, resource: String },

    /// Shader declaration does not match the resource the signature defines.
    #[error("Shader '{shader}' contains resource '{resource}' that is not compatible with its signature: {reason}")]
    IncompatibleResource {
        shader: String,
        resource: String,
        reason: String,
    },

    /// Pre-bound shader disagrees with the resolved binding.
    #[error(
        "Shader '{shader}' maps resource '{resource}' to set {actual_set} binding {actual_binding}, but the signature maps it to set {expected_set} binding {expected_binding}"
    )]
    BindingMismatch {
        shader: String,
        resource: String,
        expected_set: u32,
        expected_binding: u32,
        actual_set: u32,
        actual_binding: u32,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, BindingError>;
