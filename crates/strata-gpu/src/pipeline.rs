//! Pipeline layouts built from resolved resource signatures.

use crate::descriptors::SignatureSetLayouts;
use crate::error::{GpuError, Result};
use ash::vk;
use strata_binding::ResolvedSignatures;

/// Order the set layouts of every signature by descriptor set slot.
///
/// `layouts` is indexed by signature binding index; entries for holes are ignored.
pub fn collect_set_layouts(
    resolved: &ResolvedSignatures,
    layouts: &[SignatureSetLayouts],
) -> Result<Vec<vk::DescriptorSetLayout>> {
    let mut set_layouts = Vec::with_capacity(resolved.descriptor_set_count() as usize);

    for (index, signature) in resolved.iter() {
        let signature_layouts = layouts.get(index).ok_or_else(|| {
            GpuError::InvalidState(format!(
                "No descriptor set layouts for signature '{}' at binding index {index}",
                signature.name()
            ))
        })?;

        debug_assert_eq!(
            Some(set_layouts.len()),
            resolved.first_set_index(index).map(|first| first as usize)
        );
        let before = set_layouts.len();
        set_layouts.extend(signature_layouts.layouts());

        let added = set_layouts.len() - before;
        if added != signature.num_descriptor_sets() as usize {
            return Err(GpuError::InvalidState(format!(
                "Signature '{}' uses {} descriptor sets, {} layouts were provided",
                signature.name(),
                signature.num_descriptor_sets(),
                added
            )));
        }
    }

    debug_assert_eq!(set_layouts.len(), resolved.descriptor_set_count() as usize);
    Ok(set_layouts)
}

/// Pipeline layout wrapper.
pub struct PipelineLayout {
    pub layout: vk::PipelineLayout,
    /// First descriptor set slot per signature binding index.
    pub first_set_index: Vec<u32>,
    pub descriptor_set_count: u32,
    pub dynamic_offset_count: u32,
}

impl PipelineLayout {
    /// Create a pipeline layout whose descriptor sets follow the resolved slot order.
    ///
    /// # Safety
    /// The device and set layouts must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        resolved: &ResolvedSignatures,
        layouts: &[SignatureSetLayouts],
    ) -> Result<Self> {
        let set_layouts = collect_set_layouts(resolved, layouts)?;

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = device.create_pipeline_layout(&layout_info, None)?;

        let first_set_index = (0..resolved.signature_count())
            .map_while(|index| resolved.first_set_index(index))
            .collect();

        Ok(Self {
            layout,
            first_set_index,
            descriptor_set_count: resolved.descriptor_set_count(),
            dynamic_offset_count: resolved.dynamic_offset_count(),
        })
    }

    /// Destroy the pipeline layout.
    ///
    /// # Safety
    /// The device must be valid and the layout must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline_layout(self.layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use strata_binding::{
        resolve_signatures, PipelineResourceDesc, ResourceSignature, ResourceSignatureDesc,
    };
    use strata_core::{ResourceKind, ShaderStages, VariableType};

    fn signature(name: &str, index: u8, var_types: &[VariableType]) -> std::sync::Arc<ResourceSignature> {
        let mut desc = ResourceSignatureDesc::new(name).binding_index(index);
        for (i, &var_type) in var_types.iter().enumerate() {
            desc = desc.resource(PipelineResourceDesc::new(
                ShaderStages::COMPUTE,
                format!("{name}{i}"),
                1,
                ResourceKind::BufferUav,
                var_type,
            ));
        }
        ResourceSignature::new(desc).unwrap()
    }

    fn layout(raw: u64) -> Option<vk::DescriptorSetLayout> {
        Some(vk::DescriptorSetLayout::from_raw(raw))
    }

    #[test]
    fn layouts_follow_slot_order() {
        let resolved = resolve_signatures(&[
            signature("B", 2, &[VariableType::Static, VariableType::Dynamic]),
            signature("A", 0, &[VariableType::Dynamic]),
        ])
        .unwrap();

        let layouts = [
            SignatureSetLayouts::from_raw([layout(1), None]),
            SignatureSetLayouts::default(),
            SignatureSetLayouts::from_raw([layout(2), layout(3)]),
        ];
        let set_layouts = collect_set_layouts(&resolved, &layouts).unwrap();
        let raw: Vec<u64> = set_layouts.iter().map(|l| l.as_raw()).collect();
        assert_eq!(raw, vec![1, 2, 3]);
    }

    #[test]
    fn missing_layouts_are_rejected() {
        let resolved =
            resolve_signatures(&[signature("A", 1, &[VariableType::Static])]).unwrap();

        let short = [SignatureSetLayouts::default()];
        assert!(matches!(
            collect_set_layouts(&resolved, &short),
            Err(GpuError::InvalidState(_))
        ));

        let empty = [SignatureSetLayouts::default(), SignatureSetLayouts::default()];
        assert!(matches!(
            collect_set_layouts(&resolved, &empty),
            Err(GpuError::InvalidState(_))
        ));
    }
}
