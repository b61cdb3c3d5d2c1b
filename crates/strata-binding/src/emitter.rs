//! Flattening of resolved signatures into per-resource binding decorations.
//!
//! The shader translation layer consumes [`ResourceBinding`]s to rewrite resource
//! references into native `(set, binding)` pairs, either by remapping them or by
//! verifying shaders that were compiled with explicit bindings.

use std::collections::HashMap;

use strata_core::{ResourceFlags, ResourceKind, ShaderStages};

use crate::error::{BindingError, Result};
use crate::implicit::ShaderResourceDecl;
use crate::resolver::ResolvedSignatures;
use crate::signature::{DescriptorType, ImmutableSamplerBinding};

/// What a binding was emitted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingSource {
    /// Resource index within the signature.
    Resource(usize),
    /// Immutable sampler index within the signature.
    ImmutableSampler(usize),
}

/// Binding of one shader resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceBinding {
    /// Shader variable name.
    pub name: String,
    /// Alternative variable name (`<texture><suffix>` for standalone samplers).
    pub alias: Option<String>,
    /// Binding index of the owning signature.
    pub signature_index: usize,
    pub source: BindingSource,
    pub kind: ResourceKind,
    pub flags: ResourceFlags,
    pub descriptor_type: DescriptorType,
    /// Resource stages restricted to the requested filter.
    pub stages: ShaderStages,
    /// Absolute descriptor set index in the pipeline layout.
    pub descriptor_set: u32,
    /// Binding index within the set.
    pub binding: u32,
    pub array_size: u32,
}

/// Emit a binding for every resource visible to `stage_filter`.
pub fn emit_resource_bindings(
    resolved: &ResolvedSignatures,
    stage_filter: ShaderStages,
) -> Vec<ResourceBinding> {
    let mut bindings = Vec::new();
    let mut total_sets = 0;
    let mut empty_signatures = 0;

    for (signature_index, sig) in resolved.iter() {
        let Some(first_set) = resolved.first_set_index(signature_index) else {
            continue;
        };
        total_sets += sig.num_descriptor_sets();
        if sig.is_empty() {
            empty_signatures += 1;
        }

        for index in 0..sig.resource_count() {
            let res = sig.resource(index);
            if !res.stages.intersects(stage_filter) {
                continue;
            }
            let attribs = sig.attribs(index);
            bindings.push(ResourceBinding {
                name: res.name.clone(),
                alias: None,
                signature_index,
                source: BindingSource::Resource(index),
                kind: res.kind,
                flags: res.flags,
                descriptor_type: attribs.descriptor_type,
                stages: res.stages & stage_filter,
                descriptor_set: first_set + attribs.descriptor_set,
                binding: attribs.binding,
                array_size: attribs.array_size,
            });
        }

        let suffix = sig.desc().combined_sampler_suffix.as_deref();
        for index in 0..sig.immutable_sampler_count() {
            let ImmutableSamplerBinding::Standalone {
                descriptor_set,
                binding,
            } = sig.immutable_sampler_binding(index)
            else {
                continue;
            };
            let sam = sig.immutable_sampler(index);
            if !sam.stages.intersects(stage_filter) {
                continue;
            }
            bindings.push(ResourceBinding {
                name: sam.sampler_or_texture_name.clone(),
                alias: suffix.map(|suffix| format!("{}{suffix}", sam.sampler_or_texture_name)),
                signature_index,
                source: BindingSource::ImmutableSampler(index),
                kind: ResourceKind::Sampler,
                flags: ResourceFlags::empty(),
                descriptor_type: DescriptorType::Sampler,
                stages: sam.stages & stage_filter,
                descriptor_set: first_set + descriptor_set,
                binding,
                array_size: 1,
            });
        }
    }

    debug_assert_eq!(total_sets, resolved.descriptor_set_count());
    debug_assert!(
        total_sets as usize >= resolved.requested_count() - empty_signatures,
        "only empty signatures may occupy no descriptor set"
    );

    bindings
}

/// Name lookup over emitted bindings.
#[derive(Clone, Debug, Default)]
pub struct BindingTable {
    bindings: Vec<ResourceBinding>,
    by_name: HashMap<String, Vec<usize>>,
}

impl BindingTable {
    /// Emit bindings for `stage_filter` and index them by name and alias.
    pub fn new(resolved: &ResolvedSignatures, stage_filter: ShaderStages) -> Self {
        Self::from_bindings(emit_resource_bindings(resolved, stage_filter))
    }

    pub fn from_bindings(bindings: Vec<ResourceBinding>) -> Self {
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, binding) in bindings.iter().enumerate() {
            by_name.entry(binding.name.clone()).or_default().push(index);
            if let Some(alias) = &binding.alias {
                by_name.entry(alias.clone()).or_default().push(index);
            }
        }
        Self { bindings, by_name }
    }

    pub fn bindings(&self) -> &[ResourceBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Binding of the variable `name` as seen from `stage`.
    ///
    /// Resources take precedence over immutable samplers of the same name.
    pub fn lookup(&self, stage: ShaderStages, name: &str) -> Option<&ResourceBinding> {
        let mut candidates = self
            .by_name
            .get(name)?
            .iter()
            .map(|&index| &self.bindings[index])
            .filter(|binding| binding.stages.intersects(stage));
        let first = candidates.next()?;
        if matches!(first.source, BindingSource::Resource(_)) {
            return Some(first);
        }
        Some(
            candidates
                .find(|binding| matches!(binding.source, BindingSource::Resource(_)))
                .unwrap_or(first),
        )
    }

    /// `(set, binding)` to assign to a shader resource.
    ///
    /// The shader declaration must be compatible with the resource the signature
    /// defines under the same name.
    pub fn resolve(
        &self,
        shader: &str,
        stage: ShaderStages,
        decl: &ShaderResourceDecl,
    ) -> Result<(u32, u32)> {
        let binding =
            self.lookup(stage, &decl.name)
                .ok_or_else(|| BindingError::UnresolvedResource {
                    shader: shader.to_owned(),
                    resource: decl.name.clone(),
                })?;
        check_compatibility(shader, decl, binding)?;
        Ok((binding.descriptor_set, binding.binding))
    }

    /// Check the `(set, binding)` a shader was compiled with.
    pub fn verify(
        &self,
        shader: &str,
        stage: ShaderStages,
        decl: &ShaderResourceDecl,
        set: u32,
        binding: u32,
    ) -> Result<()> {
        let (expected_set, expected_binding) = self.resolve(shader, stage, decl)?;
        if (expected_set, expected_binding) != (set, binding) {
            return Err(BindingError::BindingMismatch {
                shader: shader.to_owned(),
                resource: decl.name.clone(),
                expected_set,
                expected_binding,
                actual_set: set,
                actual_binding: binding,
            });
        }
        Ok(())
    }
}

fn check_compatibility(
    shader: &str,
    decl: &ShaderResourceDecl,
    binding: &ResourceBinding,
) -> Result<()> {
    let incompatible = |reason: String| BindingError::IncompatibleResource {
        shader: shader.to_owned(),
        resource: decl.name.clone(),
        reason,
    };

    if matches!(binding.source, BindingSource::ImmutableSampler(_)) {
        if decl.kind != ResourceKind::Sampler {
            return Err(incompatible(format!(
                "it is declared as {}, but the signature defines an immutable sampler",
                decl.kind.name()
            )));
        }
        return Ok(());
    }

    if decl.kind != binding.kind {
        return Err(incompatible(format!(
            "it is declared as {}, but the signature defines {}",
            decl.kind.name(),
            binding.kind.name()
        )));
    }

    for flag in [ResourceFlags::FORMATTED_BUFFER, ResourceFlags::COMBINED_SAMPLER] {
        if decl.flags.contains(flag) != binding.flags.contains(flag) {
            return Err(incompatible(format!(
                "flag {flag:?} is {} in the shader and {} in the signature",
                if decl.flags.contains(flag) { "set" } else { "not set" },
                if binding.flags.contains(flag) { "set" } else { "not set" },
            )));
        }
    }

    if decl.array_size == 0 {
        if !binding.flags.contains(ResourceFlags::RUNTIME_ARRAY) {
            return Err(incompatible(
                "it is a runtime-sized array, but the signature does not allow runtime arrays"
                    .to_owned(),
            ));
        }
    } else if decl.array_size > binding.array_size {
        return Err(incompatible(format!(
            "its array size {} exceeds the signature array size {}",
            decl.array_size, binding.array_size
        )));
    }

    Ok(())
}
