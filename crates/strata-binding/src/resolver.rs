//! Placement of resource signatures into a pipeline's descriptor set slots.

use std::collections::HashMap;
use std::sync::Arc;

use strata_core::constants::{MAX_DESCRIPTOR_SET_SLOTS, MAX_RESOURCE_SIGNATURES};
use strata_core::ShaderStages;

use crate::error::{BindingError, Result};
use crate::implicit::{default_signature_desc, PipelineResourceLayout, ShaderReflection};
use crate::signature::{DescriptorSetId, ResourceSignature};

/// Signatures sorted by binding index, with the first descriptor set slot of each.
#[derive(Clone, Debug, Default)]
pub struct ResolvedSignatures {
    signatures: [Option<Arc<ResourceSignature>>; MAX_RESOURCE_SIGNATURES],
    first_set_index: [u32; MAX_RESOURCE_SIGNATURES],
    signature_count: usize,
    descriptor_set_count: u32,
    requested_count: usize,
}

impl ResolvedSignatures {
    /// Signature at a binding index, `None` for holes.
    pub fn signature(&self, index: usize) -> Option<&Arc<ResourceSignature>> {
        self.signatures.get(index).and_then(Option::as_ref)
    }

    /// One past the highest occupied binding index.
    pub const fn signature_count(&self) -> usize {
        self.signature_count
    }

    /// Number of signatures that were passed in.
    pub const fn requested_count(&self) -> usize {
        self.requested_count
    }

    /// First descriptor set slot of the signature at `index`.
    ///
    /// Holes record the running slot counter too, so the value is defined for every
    /// index below `signature_count`. `None` past it.
    pub fn first_set_index(&self, index: usize) -> Option<u32> {
        (index < self.signature_count).then(|| self.first_set_index[index])
    }

    /// Total number of descriptor sets in the pipeline layout.
    pub const fn descriptor_set_count(&self) -> u32 {
        self.descriptor_set_count
    }

    /// Dynamic offsets needed to bind every signature.
    pub fn dynamic_offset_count(&self) -> u32 {
        self.iter().map(|(_, sig)| sig.dynamic_offset_count()).sum()
    }

    /// Present signatures with their binding index, in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<ResourceSignature>)> + '_ {
        self.signatures[..self.signature_count]
            .iter()
            .enumerate()
            .filter_map(|(index, sig)| sig.as_ref().map(|sig| (index, sig)))
    }

    /// Locate a shader resource: `(binding index, resource index)`.
    pub fn find_resource(&self, stage: ShaderStages, name: &str) -> Option<(usize, usize)> {
        self.iter()
            .find_map(|(index, sig)| sig.find_resource(stage, name).map(|res| (index, res)))
    }

    /// Locate an immutable sampler: `(binding index, sampler index)`.
    pub fn find_immutable_sampler(
        &self,
        stage: ShaderStages,
        name: &str,
    ) -> Option<(usize, usize)> {
        self.iter().find_map(|(index, sig)| {
            sig.find_immutable_sampler(stage, name)
                .map(|sam| (index, sam))
        })
    }

    /// Absolute descriptor set index of a partition of the signature at `index`.
    pub fn descriptor_set(&self, index: usize, id: DescriptorSetId) -> Option<u32> {
        let sig = self.signature(index)?;
        sig.descriptor_set_index(id)
            .map(|set| self.first_set_index[index] + set)
    }
}

/// Sort signatures by binding index and assign descriptor set slots.
pub fn resolve_signatures(signatures: &[Arc<ResourceSignature>]) -> Result<ResolvedSignatures> {
    if signatures.len() > MAX_RESOURCE_SIGNATURES {
        return Err(BindingError::TooManySignatures {
            count: signatures.len(),
            max: MAX_RESOURCE_SIGNATURES,
        });
    }

    let mut resolved = ResolvedSignatures {
        requested_count: signatures.len(),
        ..ResolvedSignatures::default()
    };

    for sig in signatures {
        let index = usize::from(sig.binding_index());
        debug_assert!(index < MAX_RESOURCE_SIGNATURES);

        if let Some(existing) = &resolved.signatures[index] {
            return Err(BindingError::BindingIndexConflict {
                index: sig.binding_index(),
                first: existing.name().to_owned(),
                second: sig.name().to_owned(),
            });
        }
        resolved.signatures[index] = Some(Arc::clone(sig));
        resolved.signature_count = resolved.signature_count.max(index + 1);
    }

    let mut set_counter = 0u32;
    for index in 0..resolved.signature_count {
        resolved.first_set_index[index] = set_counter;
        if let Some(sig) = &resolved.signatures[index] {
            set_counter += sig.num_descriptor_sets();
        }
    }
    assert!(
        set_counter as usize <= MAX_DESCRIPTOR_SET_SLOTS,
        "descriptor set count {set_counter} exceeds {MAX_DESCRIPTOR_SET_SLOTS}"
    );
    resolved.descriptor_set_count = set_counter;

    validate_unique_resources(&resolved)?;

    tracing::debug!(
        "Resolved {} signatures into {} slots and {} descriptor sets",
        resolved.requested_count,
        resolved.signature_count,
        resolved.descriptor_set_count
    );

    Ok(resolved)
}

/// Resolve `signatures`, or the implicit signature built from `shaders` if none are given.
pub fn resolve_or_default(
    signatures: &[Arc<ResourceSignature>],
    pipeline_name: &str,
    shaders: &[ShaderReflection],
    layout: &PipelineResourceLayout,
) -> Result<ResolvedSignatures> {
    if !signatures.is_empty() {
        return resolve_signatures(signatures);
    }

    let implicit = ResourceSignature::new(default_signature_desc(pipeline_name, shaders, layout)?)?;
    resolve_signatures(&[implicit])
}

fn validate_unique_resources(resolved: &ResolvedSignatures) -> Result<()> {
    let mut resources: HashMap<&str, Vec<(ShaderStages, &str)>> = HashMap::new();
    let mut samplers: HashMap<&str, Vec<(ShaderStages, &str)>> = HashMap::new();

    for (_, sig) in resolved.iter() {
        for index in 0..sig.resource_count() {
            let res = sig.resource(index);
            let entries = resources.entry(&res.name).or_default();
            if let Some((_, first)) = entries
                .iter()
                .find(|(stages, _)| stages.intersects(res.stages))
            {
                return Err(BindingError::AmbiguousResource {
                    resource: res.name.clone(),
                    first: (*first).to_owned(),
                    second: sig.name().to_owned(),
                });
            }
            entries.push((res.stages, sig.name()));
        }

        for index in 0..sig.immutable_sampler_count() {
            let sam = sig.immutable_sampler(index);
            let entries = samplers.entry(&sam.sampler_or_texture_name).or_default();
            if let Some((_, first)) = entries
                .iter()
                .find(|(stages, _)| stages.intersects(sam.stages))
            {
                return Err(BindingError::AmbiguousImmutableSampler {
                    sampler: sam.sampler_or_texture_name.clone(),
                    first: (*first).to_owned(),
                    second: sig.name().to_owned(),
                });
            }
            entries.push((sam.stages, sig.name()));
        }
    }

    Ok(())
}
