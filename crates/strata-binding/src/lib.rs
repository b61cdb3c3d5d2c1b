//! Resource signatures and their placement into pipeline descriptor sets.
//!
//! This crate is backend-agnostic. It provides:
//! - [`ResourceSignature`]: validated groups of shader resources with resolved bindings
//! - [`resolve_signatures`]: sorting by binding index and descriptor set slot assignment
//! - [`emit_resource_bindings`] and [`BindingTable`]: per-resource `(set, binding)` pairs
//! - [`default_signature_desc`]: the implicit signature for pipelines created without one

pub mod emitter;
pub mod error;
pub mod implicit;
pub mod resolver;
pub mod signature;

pub use emitter::{emit_resource_bindings, BindingSource, BindingTable, ResourceBinding};
pub use error::{BindingError, Result};
pub use implicit::{
    default_signature_desc, PipelineResourceLayout, ShaderReflection, ShaderResourceDecl,
    ShaderVariableDesc,
};
pub use resolver::{resolve_or_default, resolve_signatures, ResolvedSignatures};
pub use signature::{
    DescriptorSetId, DescriptorType, ImmutableSamplerBinding, ImmutableSamplerDesc,
    PipelineResourceDesc, ResourceAttribs, ResourceSignature, ResourceSignatureDesc,
    SetLayoutBinding,
};
