//! Descriptor set layouts for resource signatures.

use crate::error::{GpuError, Result};
use ash::vk;
use strata_binding::{DescriptorSetId, DescriptorType, ResourceSignature};
use strata_core::ShaderStages;

/// Native descriptor type.
pub const fn descriptor_type_to_vk(descriptor_type: DescriptorType) -> vk::DescriptorType {
    match descriptor_type {
        DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::SeparateImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorType::StorageBuffer | DescriptorType::StorageBufferReadOnly => {
            vk::DescriptorType::STORAGE_BUFFER
        }
        DescriptorType::StorageBufferDynamic | DescriptorType::StorageBufferDynamicReadOnly => {
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        }
        DescriptorType::InputAttachment | DescriptorType::InputAttachmentGeneral => {
            vk::DescriptorType::INPUT_ATTACHMENT
        }
        DescriptorType::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

/// Native shader stage flags.
pub fn shader_stages_to_vk(stages: ShaderStages) -> vk::ShaderStageFlags {
    const MAPPING: [(ShaderStages, vk::ShaderStageFlags); 8] = [
        (ShaderStages::VERTEX, vk::ShaderStageFlags::VERTEX),
        (
            ShaderStages::TESSELLATION_CONTROL,
            vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ),
        (
            ShaderStages::TESSELLATION_EVALUATION,
            vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ),
        (ShaderStages::GEOMETRY, vk::ShaderStageFlags::GEOMETRY),
        (ShaderStages::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
        (ShaderStages::COMPUTE, vk::ShaderStageFlags::COMPUTE),
        (ShaderStages::TASK, vk::ShaderStageFlags::TASK_EXT),
        (ShaderStages::MESH, vk::ShaderStageFlags::MESH_EXT),
    ];

    MAPPING
        .iter()
        .filter(|(stage, _)| stages.contains(*stage))
        .fold(vk::ShaderStageFlags::empty(), |acc, (_, flags)| acc | *flags)
}

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    #[must_use]
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a binding with one immutable sampler per descriptor.
    #[must_use]
    pub fn binding_with_samplers(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        samplers: &'a [vk::Sampler],
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .stage_flags(stage_flags)
                .immutable_samplers(samplers),
        );
        self
    }

    /// Number of bindings added so far.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = device.create_descriptor_set_layout(&layout_info, None)?;
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Native descriptor set layouts of one signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureSetLayouts {
    layouts: [Option<vk::DescriptorSetLayout>; 2],
}

impl SignatureSetLayouts {
    /// Create a layout for every descriptor set of `signature`.
    ///
    /// `immutable_samplers` holds one native sampler per immutable sampler of the
    /// signature, in declaration order.
    ///
    /// # Safety
    /// The device and samplers must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        signature: &ResourceSignature,
        immutable_samplers: &[vk::Sampler],
    ) -> Result<Self> {
        if immutable_samplers.len() != signature.immutable_sampler_count() {
            return Err(GpuError::InvalidState(format!(
                "Signature '{}' declares {} immutable samplers, {} were provided",
                signature.name(),
                signature.immutable_sampler_count(),
                immutable_samplers.len()
            )));
        }

        let mut result = Self::default();
        for id in DescriptorSetId::ALL {
            let Some(set_index) = signature.descriptor_set_index(id) else {
                continue;
            };

            let bindings = signature.set_layout_bindings(set_index);
            let samplers: Vec<Vec<vk::Sampler>> = bindings
                .iter()
                .map(|binding| {
                    binding.immutable_sampler.map_or_else(Vec::new, |index| {
                        vec![immutable_samplers[index]; binding.descriptor_count as usize]
                    })
                })
                .collect();

            let mut builder = DescriptorSetLayoutBuilder::new();
            for (binding, samplers) in bindings.iter().zip(&samplers) {
                let descriptor_type = descriptor_type_to_vk(binding.descriptor_type);
                let stages = shader_stages_to_vk(binding.stages);
                builder = if samplers.is_empty() {
                    builder.binding(
                        binding.binding,
                        descriptor_type,
                        binding.descriptor_count,
                        stages,
                    )
                } else {
                    builder.binding_with_samplers(binding.binding, descriptor_type, stages, samplers)
                };
            }

            let layout = match builder.build(device) {
                Ok(layout) => layout,
                Err(err) => {
                    result.destroy(device);
                    return Err(err);
                }
            };
            result.layouts[set_index as usize] = Some(layout);
        }

        tracing::debug!(
            "Created {} descriptor set layouts for signature '{}'",
            signature.num_descriptor_sets(),
            signature.name()
        );

        Ok(result)
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(layouts: [Option<vk::DescriptorSetLayout>; 2]) -> Self {
        Self { layouts }
    }

    /// Layouts in set order.
    pub fn layouts(&self) -> impl Iterator<Item = vk::DescriptorSetLayout> + '_ {
        self.layouts.iter().flatten().copied()
    }

    /// Destroy all layouts.
    ///
    /// # Safety
    /// The device must be valid and the layouts must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for layout in self.layouts.iter_mut().filter_map(Option::take) {
            device.destroy_descriptor_set_layout(layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_buffers_map_to_dynamic_descriptors() {
        assert_eq!(
            descriptor_type_to_vk(DescriptorType::UniformBufferDynamic),
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
        assert_eq!(
            descriptor_type_to_vk(DescriptorType::StorageBufferDynamicReadOnly),
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        );
        assert_eq!(
            descriptor_type_to_vk(DescriptorType::SeparateImage),
            vk::DescriptorType::SAMPLED_IMAGE
        );
    }

    #[test]
    fn stage_conversion() {
        assert_eq!(
            shader_stages_to_vk(ShaderStages::VERTEX | ShaderStages::FRAGMENT),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(
            shader_stages_to_vk(ShaderStages::ALL_GRAPHICS),
            vk::ShaderStageFlags::ALL_GRAPHICS
        );
        assert_eq!(
            shader_stages_to_vk(ShaderStages::empty()),
            vk::ShaderStageFlags::empty()
        );
    }

    #[test]
    fn builder_counts_bindings() {
        let samplers = [vk::Sampler::null(); 2];
        let builder = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                1,
                vk::ShaderStageFlags::VERTEX,
            )
            .binding_with_samplers(
                1,
                vk::DescriptorType::SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                &samplers,
            );
        assert_eq!(builder.len(), 2);
        assert_eq!(builder.bindings[1].descriptor_count, 2);
    }
}
