//! Pipeline resource signatures.
//!
//! A signature is a device-agnostic group of shader resources that is bound as one
//! unit. Every signature occupies at most two descriptor sets: one for static and
//! mutable variables and one for dynamic variables. Inside each set, bindings are
//! ordered by cache group:
//!
//! ```text
//! static/mutable set: | dynamic UBs | dynamic SBs | the rest |
//! dynamic set:        | dynamic UBs | dynamic SBs | the rest |
//! ```

use std::sync::Arc;

use strata_core::constants::{MAX_DESCRIPTOR_SETS_PER_SIGNATURE, MAX_RESOURCE_SIGNATURES};
use strata_core::{ResourceFlags, ResourceKind, ShaderStages, VariableType};

use crate::error::{BindingError, Result};

/// Description of one shader resource in a signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineResourceDesc {
    /// Name the shaders use for this resource.
    pub name: String,
    /// Stages the resource is visible to.
    pub stages: ShaderStages,
    /// Number of array elements (1 for non-arrays).
    pub array_size: u32,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Update frequency.
    pub var_type: VariableType,
    /// Additional flags.
    pub flags: ResourceFlags,
}

impl PipelineResourceDesc {
    /// Create a resource description without flags.
    pub fn new(
        stages: ShaderStages,
        name: impl Into<String>,
        array_size: u32,
        kind: ResourceKind,
        var_type: VariableType,
    ) -> Self {
        Self {
            name: name.into(),
            stages,
            array_size,
            kind,
            var_type,
            flags: ResourceFlags::empty(),
        }
    }

    /// Set resource flags.
    #[must_use]
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Immutable sampler declared by a signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImmutableSamplerDesc {
    /// Stages the sampler is visible to.
    pub stages: ShaderStages,
    /// Name of the sampler, or of the texture it is combined with.
    pub sampler_or_texture_name: String,
}

impl ImmutableSamplerDesc {
    /// Create an immutable sampler description.
    pub fn new(stages: ShaderStages, sampler_or_texture_name: impl Into<String>) -> Self {
        Self {
            stages,
            sampler_or_texture_name: sampler_or_texture_name.into(),
        }
    }
}

/// Signature description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceSignatureDesc {
    /// Debug name.
    pub name: String,
    /// Shader resources.
    pub resources: Vec<PipelineResourceDesc>,
    /// Immutable samplers.
    pub immutable_samplers: Vec<ImmutableSamplerDesc>,
    /// Position of this signature among all signatures of a pipeline.
    pub binding_index: u8,
    /// Suffix that links a separate sampler to its texture (e.g. `_sampler`).
    pub combined_sampler_suffix: Option<String>,
}

impl ResourceSignatureDesc {
    /// Create an empty description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the binding index.
    #[must_use]
    pub fn binding_index(mut self, index: u8) -> Self {
        self.binding_index = index;
        self
    }

    /// Add a resource.
    #[must_use]
    pub fn resource(mut self, resource: PipelineResourceDesc) -> Self {
        self.resources.push(resource);
        self
    }

    /// Add an immutable sampler.
    #[must_use]
    pub fn immutable_sampler(mut self, sampler: ImmutableSamplerDesc) -> Self {
        self.immutable_samplers.push(sampler);
        self
    }

    /// Set the combined sampler suffix.
    #[must_use]
    pub fn combined_sampler_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.combined_sampler_suffix = Some(suffix.into());
        self
    }
}

/// Native descriptor type a resource maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SeparateImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    UniformBufferDynamic,
    StorageBuffer,
    StorageBufferReadOnly,
    StorageBufferDynamic,
    StorageBufferDynamicReadOnly,
    InputAttachment,
    InputAttachmentGeneral,
    AccelerationStructure,
}

impl DescriptorType {
    /// Descriptor type for a resource description.
    pub const fn for_resource(res: &PipelineResourceDesc) -> Self {
        let with_dynamic_offset = !res.flags.contains(ResourceFlags::NO_DYNAMIC_BUFFERS);
        let combined_sampler = res.flags.contains(ResourceFlags::COMBINED_SAMPLER);
        let texel_buffer = res.flags.contains(ResourceFlags::FORMATTED_BUFFER);

        match res.kind {
            ResourceKind::ConstantBuffer => {
                if with_dynamic_offset {
                    Self::UniformBufferDynamic
                } else {
                    Self::UniformBuffer
                }
            }
            ResourceKind::TextureSrv => {
                if combined_sampler {
                    Self::CombinedImageSampler
                } else {
                    Self::SeparateImage
                }
            }
            ResourceKind::BufferSrv => {
                if texel_buffer {
                    Self::UniformTexelBuffer
                } else if with_dynamic_offset {
                    Self::StorageBufferDynamicReadOnly
                } else {
                    Self::StorageBufferReadOnly
                }
            }
            ResourceKind::TextureUav => Self::StorageImage,
            ResourceKind::BufferUav => {
                if texel_buffer {
                    Self::StorageTexelBuffer
                } else if with_dynamic_offset {
                    Self::StorageBufferDynamic
                } else {
                    Self::StorageBuffer
                }
            }
            ResourceKind::Sampler => Self::Sampler,
            ResourceKind::InputAttachment => {
                if res.flags.contains(ResourceFlags::GENERAL_INPUT_ATTACHMENT) {
                    Self::InputAttachmentGeneral
                } else {
                    Self::InputAttachment
                }
            }
            ResourceKind::AccelerationStructure => Self::AccelerationStructure,
        }
    }

    /// Returns true for uniform buffers bound with a dynamic offset.
    #[inline]
    pub const fn is_dynamic_uniform_buffer(self) -> bool {
        matches!(self, Self::UniformBufferDynamic)
    }

    /// Returns true for storage buffers bound with a dynamic offset.
    #[inline]
    pub const fn is_dynamic_storage_buffer(self) -> bool {
        matches!(
            self,
            Self::StorageBufferDynamic | Self::StorageBufferDynamicReadOnly
        )
    }

    /// Returns true for any buffer bound with a dynamic offset.
    #[inline]
    pub const fn is_dynamic_buffer(self) -> bool {
        self.is_dynamic_uniform_buffer() || self.is_dynamic_storage_buffer()
    }
}

/// Logical descriptor set of a signature.
///
/// This is a partition id, not the set index in the pipeline layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorSetId {
    /// Static and mutable variables.
    StaticMutable = 0,
    /// Dynamic variables.
    Dynamic = 1,
}

impl DescriptorSetId {
    /// Both partitions, in set order.
    pub const ALL: [Self; MAX_DESCRIPTOR_SETS_PER_SIGNATURE] = [Self::StaticMutable, Self::Dynamic];

    /// Partition for a variable type.
    #[inline]
    pub const fn for_variable(var_type: VariableType) -> Self {
        if var_type.is_static_or_mutable() {
            Self::StaticMutable
        } else {
            Self::Dynamic
        }
    }

    /// Dense index.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CacheGroup {
    DynamicUniform = 0,
    DynamicStorage = 1,
    Other = 2,
}

const CACHE_GROUP_COUNT: usize = 3;

impl CacheGroup {
    const fn of(descriptor_type: DescriptorType) -> Self {
        if descriptor_type.is_dynamic_uniform_buffer() {
            Self::DynamicUniform
        } else if descriptor_type.is_dynamic_storage_buffer() {
            Self::DynamicStorage
        } else {
            Self::Other
        }
    }
}

/// Resolved placement of a resource inside its signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceAttribs {
    /// Binding index within the descriptor set.
    pub binding: u32,
    /// Descriptor set index within the signature (0 or 1).
    pub descriptor_set: u32,
    /// Partition the resource belongs to.
    pub set_id: DescriptorSetId,
    /// Native descriptor type.
    pub descriptor_type: DescriptorType,
    /// Number of descriptors.
    pub array_size: u32,
    /// Offset of the first descriptor in the set's resource cache.
    pub cache_offset: u32,
    /// Immutable sampler embedded in this binding.
    pub immutable_sampler: Option<usize>,
}

/// Where an immutable sampler ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImmutableSamplerBinding {
    /// Embedded in the binding of a sampler or combined image sampler resource.
    Embedded { resource: usize },
    /// Has a binding of its own.
    Standalone { descriptor_set: u32, binding: u32 },
}

/// One binding of a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
    pub stages: ShaderStages,
    /// Immutable sampler index, for bindings that carry one.
    pub immutable_sampler: Option<usize>,
}

/// A validated resource signature with resolved descriptor placement.
///
/// Signatures are shared between pipelines through `Arc`; the last owner to drop
/// its reference destroys it.
#[derive(Debug)]
pub struct ResourceSignature {
    desc: ResourceSignatureDesc,
    attribs: Vec<ResourceAttribs>,
    sampler_bindings: Vec<ImmutableSamplerBinding>,
    /// Set index for each partition; `None` when the partition is empty.
    set_mapping: [Option<u32>; MAX_DESCRIPTOR_SETS_PER_SIGNATURE],
    /// Descriptor count for each partition.
    set_sizes: [u32; MAX_DESCRIPTOR_SETS_PER_SIGNATURE],
    dynamic_offset_count: u32,
    active_stages: ShaderStages,
}

impl ResourceSignature {
    /// Validate a description and assign descriptor sets and bindings.
    ///
    /// Resources are reordered by variable type (static, mutable, dynamic).
    pub fn new(mut desc: ResourceSignatureDesc) -> Result<Arc<Self>> {
        validate_desc(&desc)?;

        desc.resources.sort_by_key(|res| res.var_type);

        let descriptor_types: Vec<DescriptorType> =
            desc.resources.iter().map(DescriptorType::for_resource).collect();

        let mut binding_count = [[0u32; CACHE_GROUP_COUNT]; MAX_DESCRIPTOR_SETS_PER_SIGNATURE];
        let mut group_sizes = [[0u32; CACHE_GROUP_COUNT]; MAX_DESCRIPTOR_SETS_PER_SIGNATURE];
        for (res, &descriptor_type) in desc.resources.iter().zip(&descriptor_types) {
            let set = DescriptorSetId::for_variable(res.var_type).index();
            let group = CacheGroup::of(descriptor_type) as usize;
            binding_count[set][group] += 1;
            group_sizes[set][group] += res.array_size;
        }

        // Compact the set indices so that a signature with only dynamic
        // resources uses set 0.
        let mut set_mapping = [None; MAX_DESCRIPTOR_SETS_PER_SIGNATURE];
        let mut next_set = 0u32;
        for id in DescriptorSetId::ALL {
            if binding_count[id.index()].iter().sum::<u32>() != 0 {
                set_mapping[id.index()] = Some(next_set);
                next_set += 1;
            }
        }

        let mut next_binding = binding_count.map(exclusive_prefix_sum);
        let mut next_offset = group_sizes.map(exclusive_prefix_sum);

        let suffix = desc.combined_sampler_suffix.as_deref();
        let mut sampler_bindings: Vec<Option<ImmutableSamplerBinding>> =
            vec![None; desc.immutable_samplers.len()];
        let mut attribs = Vec::with_capacity(desc.resources.len());

        for (index, (res, &descriptor_type)) in
            desc.resources.iter().zip(&descriptor_types).enumerate()
        {
            let set_id = DescriptorSetId::for_variable(res.var_type);
            let set = set_id.index();
            let group = CacheGroup::of(descriptor_type) as usize;

            let immutable_sampler = match descriptor_type {
                DescriptorType::CombinedImageSampler => {
                    find_immutable_sampler(&desc.immutable_samplers, res.stages, &res.name, None)
                }
                DescriptorType::Sampler => {
                    find_immutable_sampler(&desc.immutable_samplers, res.stages, &res.name, suffix)
                }
                _ => None,
            };
            if let Some(sampler) = immutable_sampler {
                sampler_bindings[sampler]
                    .get_or_insert(ImmutableSamplerBinding::Embedded { resource: index });
            }

            let Some(descriptor_set) = set_mapping[set] else {
                unreachable!("partition with resources always has a set");
            };

            attribs.push(ResourceAttribs {
                binding: next_binding[set][group],
                descriptor_set,
                set_id,
                descriptor_type,
                array_size: res.array_size,
                cache_offset: next_offset[set][group],
                immutable_sampler,
            });
            next_binding[set][group] += 1;
            next_offset[set][group] += res.array_size;
        }

        // Immutable samplers not consumed by a resource get their own binding at the
        // end of the static/mutable set, or of the dynamic set if that is the only one.
        let sampler_set = if set_mapping[DescriptorSetId::StaticMutable.index()].is_some() {
            DescriptorSetId::StaticMutable
        } else {
            DescriptorSetId::Dynamic
        };
        let sampler_bindings = sampler_bindings
            .into_iter()
            .map(|binding| match binding {
                Some(binding) => Ok(binding),
                None => {
                    let set = sampler_set.index();
                    let descriptor_set =
                        set_mapping[set].ok_or_else(|| BindingError::OnlyImmutableSamplers {
                            signature: desc.name.clone(),
                        })?;
                    let group = CacheGroup::Other as usize;
                    let binding = next_binding[set][group];
                    next_binding[set][group] += 1;
                    Ok(ImmutableSamplerBinding::Standalone {
                        descriptor_set,
                        binding,
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let set_sizes = group_sizes.map(|sizes| sizes.iter().sum());
        let dynamic_offset_count = group_sizes
            .iter()
            .map(|sizes| {
                sizes[CacheGroup::DynamicUniform as usize]
                    + sizes[CacheGroup::DynamicStorage as usize]
            })
            .sum();

        let active_stages = desc
            .resources
            .iter()
            .map(|res| res.stages)
            .chain(desc.immutable_samplers.iter().map(|sam| sam.stages))
            .fold(ShaderStages::empty(), |acc, stages| acc | stages);

        tracing::debug!(
            "Created resource signature '{}' (binding index {}, {} resources, {} descriptor sets)",
            desc.name,
            desc.binding_index,
            desc.resources.len(),
            next_set
        );

        Ok(Arc::new(Self {
            desc,
            attribs,
            sampler_bindings,
            set_mapping,
            set_sizes,
            dynamic_offset_count,
            active_stages,
        }))
    }

    /// The (sorted) description.
    pub const fn desc(&self) -> &ResourceSignatureDesc {
        &self.desc
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Position among all signatures of a pipeline.
    pub const fn binding_index(&self) -> u8 {
        self.desc.binding_index
    }

    /// Number of resources.
    pub fn resource_count(&self) -> usize {
        self.desc.resources.len()
    }

    /// Resource description by index.
    pub fn resource(&self, index: usize) -> &PipelineResourceDesc {
        &self.desc.resources[index]
    }

    /// Resolved placement of a resource.
    pub fn attribs(&self, index: usize) -> &ResourceAttribs {
        &self.attribs[index]
    }

    /// Number of immutable samplers.
    pub fn immutable_sampler_count(&self) -> usize {
        self.desc.immutable_samplers.len()
    }

    /// Immutable sampler description by index.
    pub fn immutable_sampler(&self, index: usize) -> &ImmutableSamplerDesc {
        &self.desc.immutable_samplers[index]
    }

    /// Placement of an immutable sampler.
    pub fn immutable_sampler_binding(&self, index: usize) -> ImmutableSamplerBinding {
        self.sampler_bindings[index]
    }

    /// Number of descriptors in a partition, `None` if the partition has no set.
    pub fn descriptor_set_size(&self, id: DescriptorSetId) -> Option<u32> {
        self.set_mapping[id.index()].map(|_| self.set_sizes[id.index()])
    }

    /// Set index of a partition within this signature, `None` if absent.
    pub fn descriptor_set_index(&self, id: DescriptorSetId) -> Option<u32> {
        self.set_mapping[id.index()]
    }

    /// Number of descriptor sets this signature occupies (0, 1 or 2).
    pub fn num_descriptor_sets(&self) -> u32 {
        self.set_mapping.iter().flatten().count() as u32
    }

    /// Returns true if the signature occupies no descriptor set.
    pub fn is_empty(&self) -> bool {
        self.num_descriptor_sets() == 0
    }

    /// Number of dynamic offsets a bind of this signature requires.
    pub const fn dynamic_offset_count(&self) -> u32 {
        self.dynamic_offset_count
    }

    /// Union of all stages used by resources and immutable samplers.
    pub const fn active_stages(&self) -> ShaderStages {
        self.active_stages
    }

    /// Find a resource visible to `stage` by name.
    pub fn find_resource(&self, stage: ShaderStages, name: &str) -> Option<usize> {
        self.desc
            .resources
            .iter()
            .position(|res| res.stages.intersects(stage) && res.name == name)
    }

    /// Find an immutable sampler visible to `stage` by shader variable name.
    pub fn find_immutable_sampler(&self, stage: ShaderStages, name: &str) -> Option<usize> {
        find_immutable_sampler(
            &self.desc.immutable_samplers,
            stage,
            name,
            self.desc.combined_sampler_suffix.as_deref(),
        )
    }

    /// Bindings of one descriptor set of this signature, ordered by binding index.
    pub fn set_layout_bindings(&self, descriptor_set: u32) -> Vec<SetLayoutBinding> {
        let resources = self
            .desc
            .resources
            .iter()
            .zip(&self.attribs)
            .filter(|(_, attribs)| attribs.descriptor_set == descriptor_set)
            .map(|(res, attribs)| SetLayoutBinding {
                binding: attribs.binding,
                descriptor_type: attribs.descriptor_type,
                descriptor_count: attribs.array_size,
                stages: res.stages,
                immutable_sampler: attribs.immutable_sampler,
            });

        let samplers = self
            .sampler_bindings
            .iter()
            .enumerate()
            .filter_map(|(index, placement)| match *placement {
                ImmutableSamplerBinding::Standalone {
                    descriptor_set: set,
                    binding,
                } if set == descriptor_set => Some(SetLayoutBinding {
                    binding,
                    descriptor_type: DescriptorType::Sampler,
                    descriptor_count: 1,
                    stages: self.desc.immutable_samplers[index].stages,
                    immutable_sampler: Some(index),
                }),
                _ => None,
            });

        let mut bindings: Vec<SetLayoutBinding> = resources.chain(samplers).collect();
        bindings.sort_by_key(|binding| binding.binding);
        bindings
    }
}

fn exclusive_prefix_sum(counts: [u32; CACHE_GROUP_COUNT]) -> [u32; CACHE_GROUP_COUNT] {
    let mut sum = 0;
    counts.map(|count| {
        let start = sum;
        sum += count;
        start
    })
}

/// Returns true if an immutable sampler declared as `sampler_name` applies to the
/// shader variable `name`.
pub(crate) fn sampler_name_matches(sampler_name: &str, name: &str, suffix: Option<&str>) -> bool {
    if sampler_name == name {
        return true;
    }
    suffix.is_some_and(|suffix| {
        name.strip_suffix(suffix)
            .is_some_and(|texture| texture == sampler_name)
    })
}

fn find_immutable_sampler(
    samplers: &[ImmutableSamplerDesc],
    stages: ShaderStages,
    name: &str,
    suffix: Option<&str>,
) -> Option<usize> {
    samplers.iter().position(|sam| {
        sam.stages.intersects(stages) && sampler_name_matches(&sam.sampler_or_texture_name, name, suffix)
    })
}

fn validate_desc(desc: &ResourceSignatureDesc) -> Result<()> {
    if usize::from(desc.binding_index) >= MAX_RESOURCE_SIGNATURES {
        return Err(BindingError::BindingIndexOutOfRange {
            signature: desc.name.clone(),
            index: desc.binding_index,
            max: MAX_RESOURCE_SIGNATURES - 1,
        });
    }

    for (index, res) in desc.resources.iter().enumerate() {
        if res.name.is_empty() {
            return Err(BindingError::EmptyName {
                signature: desc.name.clone(),
                index,
            });
        }
        if res.stages.is_empty() {
            return Err(BindingError::EmptyShaderStages {
                signature: desc.name.clone(),
                resource: res.name.clone(),
            });
        }
        if res.array_size == 0 {
            return Err(BindingError::ZeroArraySize {
                signature: desc.name.clone(),
                resource: res.name.clone(),
            });
        }
        if !ResourceFlags::valid_for(res.kind).contains(res.flags) {
            return Err(BindingError::InvalidFlags {
                signature: desc.name.clone(),
                resource: res.name.clone(),
                kind: res.kind,
                flags: res.flags,
            });
        }
        let duplicate = desc.resources[..index]
            .iter()
            .any(|other| other.name == res.name && other.stages.intersects(res.stages));
        if duplicate {
            return Err(BindingError::DuplicateResource {
                signature: desc.name.clone(),
                resource: res.name.clone(),
            });
        }
    }

    for (index, sam) in desc.immutable_samplers.iter().enumerate() {
        if sam.sampler_or_texture_name.is_empty() {
            return Err(BindingError::EmptyName {
                signature: desc.name.clone(),
                index,
            });
        }
        if sam.stages.is_empty() {
            return Err(BindingError::EmptyShaderStages {
                signature: desc.name.clone(),
                resource: sam.sampler_or_texture_name.clone(),
            });
        }
        let duplicate = desc.immutable_samplers[..index].iter().any(|other| {
            other.sampler_or_texture_name == sam.sampler_or_texture_name
                && other.stages.intersects(sam.stages)
        });
        if duplicate {
            return Err(BindingError::DuplicateImmutableSampler {
                signature: desc.name.clone(),
                sampler: sam.sampler_or_texture_name.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(name: &str, kind: ResourceKind, var_type: VariableType) -> PipelineResourceDesc {
        PipelineResourceDesc::new(ShaderStages::FRAGMENT, name, 1, kind, var_type)
    }

    #[test]
    fn static_and_dynamic_partitions() {
        let sig = ResourceSignature::new(
            ResourceSignatureDesc::new("mixed")
                .resource(res("g_Dyn", ResourceKind::TextureSrv, VariableType::Dynamic))
                .resource(res("g_Static", ResourceKind::TextureSrv, VariableType::Static)),
        )
        .unwrap();

        assert_eq!(sig.num_descriptor_sets(), 2);
        // Sorted by variable type.
        assert_eq!(sig.resource(0).name, "g_Static");
        assert_eq!(sig.attribs(0).descriptor_set, 0);
        assert_eq!(sig.attribs(1).descriptor_set, 1);
        assert_eq!(sig.attribs(1).set_id, DescriptorSetId::Dynamic);
    }

    #[test]
    fn dynamic_only_signature_uses_set_zero() {
        let sig = ResourceSignature::new(
            ResourceSignatureDesc::new("dyn")
                .resource(res("g_Tex", ResourceKind::TextureSrv, VariableType::Dynamic)),
        )
        .unwrap();

        assert_eq!(sig.descriptor_set_size(DescriptorSetId::StaticMutable), None);
        assert_eq!(sig.descriptor_set_size(DescriptorSetId::Dynamic), Some(1));
        assert_eq!(sig.descriptor_set_index(DescriptorSetId::Dynamic), Some(0));
        assert_eq!(sig.attribs(0).descriptor_set, 0);
    }

    #[test]
    fn empty_signature_has_no_sets() {
        let sig = ResourceSignature::new(ResourceSignatureDesc::new("empty")).unwrap();
        assert!(sig.is_empty());
        assert_eq!(sig.descriptor_set_size(DescriptorSetId::StaticMutable), None);
        assert_eq!(sig.descriptor_set_size(DescriptorSetId::Dynamic), None);
    }

    #[test]
    fn bindings_ordered_by_cache_group() {
        let sig = ResourceSignature::new(
            ResourceSignatureDesc::new("groups")
                .resource(res("g_Tex", ResourceKind::TextureSrv, VariableType::Mutable))
                .resource(res("g_Storage", ResourceKind::BufferUav, VariableType::Mutable))
                .resource(res("g_Constants", ResourceKind::ConstantBuffer, VariableType::Mutable)),
        )
        .unwrap();

        let binding_of = |name: &str| {
            let index = sig.find_resource(ShaderStages::FRAGMENT, name).unwrap();
            sig.attribs(index).binding
        };
        assert_eq!(binding_of("g_Constants"), 0);
        assert_eq!(binding_of("g_Storage"), 1);
        assert_eq!(binding_of("g_Tex"), 2);
        assert_eq!(sig.dynamic_offset_count(), 2);
    }

    #[test]
    fn array_sizes_advance_cache_offsets() {
        let sig = ResourceSignature::new(
            ResourceSignatureDesc::new("arrays")
                .resource(PipelineResourceDesc::new(
                    ShaderStages::FRAGMENT,
                    "g_Textures",
                    4,
                    ResourceKind::TextureSrv,
                    VariableType::Static,
                ))
                .resource(res("g_Other", ResourceKind::TextureSrv, VariableType::Static)),
        )
        .unwrap();

        assert_eq!(sig.attribs(0).cache_offset, 0);
        assert_eq!(sig.attribs(1).cache_offset, 4);
        assert_eq!(sig.attribs(1).binding, 1);
        assert_eq!(sig.descriptor_set_size(DescriptorSetId::StaticMutable), Some(5));
    }

    #[test]
    fn no_dynamic_buffers_flag() {
        let sig = ResourceSignature::new(
            ResourceSignatureDesc::new("flags").resource(
                res("g_Constants", ResourceKind::ConstantBuffer, VariableType::Static)
                    .with_flags(ResourceFlags::NO_DYNAMIC_BUFFERS),
            ),
        )
        .unwrap();

        assert_eq!(sig.attribs(0).descriptor_type, DescriptorType::UniformBuffer);
        assert_eq!(sig.dynamic_offset_count(), 0);
    }

    #[test]
    fn immutable_sampler_embedded_in_sampler_resource() {
        let sig = ResourceSignature::new(
            ResourceSignatureDesc::new("samplers")
                .combined_sampler_suffix("_sampler")
                .resource(res("g_Texture", ResourceKind::TextureSrv, VariableType::Static))
                .resource(res("g_Texture_sampler", ResourceKind::Sampler, VariableType::Static))
                .immutable_sampler(ImmutableSamplerDesc::new(ShaderStages::FRAGMENT, "g_Texture")),
        )
        .unwrap();

        let sampler = sig
            .find_resource(ShaderStages::FRAGMENT, "g_Texture_sampler")
            .unwrap();
        assert_eq!(sig.attribs(sampler).immutable_sampler, Some(0));
        assert_eq!(
            sig.immutable_sampler_binding(0),
            ImmutableSamplerBinding::Embedded { resource: sampler }
        );
    }

    #[test]
    fn standalone_immutable_sampler_gets_own_binding() {
        let sig = ResourceSignature::new(
            ResourceSignatureDesc::new("standalone")
                .resource(res("g_Texture", ResourceKind::TextureSrv, VariableType::Mutable))
                .resource(res("g_Dyn", ResourceKind::TextureSrv, VariableType::Dynamic))
                .immutable_sampler(ImmutableSamplerDesc::new(ShaderStages::FRAGMENT, "g_Texture")),
        )
        .unwrap();

        assert_eq!(
            sig.immutable_sampler_binding(0),
            ImmutableSamplerBinding::Standalone {
                descriptor_set: 0,
                binding: 1
            }
        );

        let bindings = sig.set_layout_bindings(0);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].descriptor_type, DescriptorType::Sampler);
        assert_eq!(bindings[1].immutable_sampler, Some(0));
        assert_eq!(sig.set_layout_bindings(1).len(), 1);
    }

    #[test]
    fn only_immutable_samplers_rejected() {
        let err = ResourceSignature::new(
            ResourceSignatureDesc::new("samplers-only")
                .immutable_sampler(ImmutableSamplerDesc::new(ShaderStages::FRAGMENT, "g_Sampler")),
        )
        .unwrap_err();
        assert!(matches!(err, BindingError::OnlyImmutableSamplers { .. }));
    }

    #[test]
    fn validation_errors() {
        let out_of_range = ResourceSignature::new(ResourceSignatureDesc::new("far").binding_index(8));
        assert!(matches!(
            out_of_range,
            Err(BindingError::BindingIndexOutOfRange { index: 8, .. })
        ));

        let duplicate = ResourceSignature::new(
            ResourceSignatureDesc::new("dup")
                .resource(res("g_Tex", ResourceKind::TextureSrv, VariableType::Static))
                .resource(res("g_Tex", ResourceKind::TextureSrv, VariableType::Dynamic)),
        );
        assert!(matches!(duplicate, Err(BindingError::DuplicateResource { .. })));

        let zero = ResourceSignature::new(ResourceSignatureDesc::new("zero").resource(
            PipelineResourceDesc::new(
                ShaderStages::VERTEX,
                "g_Tex",
                0,
                ResourceKind::TextureSrv,
                VariableType::Static,
            ),
        ));
        assert!(matches!(zero, Err(BindingError::ZeroArraySize { .. })));

        let flags = ResourceSignature::new(ResourceSignatureDesc::new("flags").resource(
            res("g_Sam", ResourceKind::Sampler, VariableType::Static)
                .with_flags(ResourceFlags::COMBINED_SAMPLER),
        ));
        assert!(matches!(flags, Err(BindingError::InvalidFlags { .. })));
    }

    #[test]
    fn same_name_in_disjoint_stages_is_allowed() {
        let sig = ResourceSignature::new(
            ResourceSignatureDesc::new("split")
                .resource(PipelineResourceDesc::new(
                    ShaderStages::VERTEX,
                    "g_Data",
                    1,
                    ResourceKind::ConstantBuffer,
                    VariableType::Static,
                ))
                .resource(res("g_Data", ResourceKind::ConstantBuffer, VariableType::Static)),
        )
        .unwrap();

        assert_eq!(sig.find_resource(ShaderStages::VERTEX, "g_Data"), Some(0));
        assert_eq!(sig.find_resource(ShaderStages::FRAGMENT, "g_Data"), Some(1));
        assert_eq!(sig.find_resource(ShaderStages::COMPUTE, "g_Data"), None);
    }

    #[test]
    fn sampler_suffix_matching() {
        assert!(sampler_name_matches("g_Tex", "g_Tex", None));
        assert!(sampler_name_matches("g_Tex", "g_Tex_sampler", Some("_sampler")));
        assert!(!sampler_name_matches("g_Tex", "g_Tex_sampler", None));
        assert!(!sampler_name_matches("g_Tex", "g_Other_sampler", Some("_sampler")));
    }
}
