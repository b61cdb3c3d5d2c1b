//! Demo signatures and their resolved binding tables.

use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use strata_binding::{
    resolve_or_default, BindingTable, ImmutableSamplerDesc, PipelineResourceDesc,
    PipelineResourceLayout, ResolvedSignatures, ResourceSignature, ResourceSignatureDesc,
    ShaderReflection, ShaderResourceDecl,
};
use strata_core::{ResourceFlags, ResourceKind, ShaderStages, VariableType};
use strata_gpu::{GpuContext, PipelineLayout, SignatureSetLayouts};
use tracing::info;

/// Per-frame resources at binding index 0.
fn frame_signature() -> Result<Arc<ResourceSignature>> {
    Ok(ResourceSignature::new(
        ResourceSignatureDesc::new("Frame")
            .binding_index(0)
            .resource(PipelineResourceDesc::new(
                ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                "g_Camera",
                1,
                ResourceKind::ConstantBuffer,
                VariableType::Static,
            ))
            .resource(PipelineResourceDesc::new(
                ShaderStages::VERTEX,
                "g_Instances",
                1,
                ResourceKind::BufferSrv,
                VariableType::Dynamic,
            )),
    )?)
}

/// Material resources at binding index 2, leaving index 1 empty.
fn material_signature() -> Result<Arc<ResourceSignature>> {
    Ok(ResourceSignature::new(
        ResourceSignatureDesc::new("Material")
            .binding_index(2)
            .combined_sampler_suffix("_sampler")
            .resource(PipelineResourceDesc::new(
                ShaderStages::FRAGMENT,
                "g_Albedo",
                1,
                ResourceKind::TextureSrv,
                VariableType::Mutable,
            ))
            .resource(
                PipelineResourceDesc::new(
                    ShaderStages::FRAGMENT,
                    "g_Params",
                    1,
                    ResourceKind::ConstantBuffer,
                    VariableType::Mutable,
                )
                .with_flags(ResourceFlags::NO_DYNAMIC_BUFFERS),
            )
            .immutable_sampler(ImmutableSamplerDesc::new(ShaderStages::FRAGMENT, "g_Albedo")),
    )?)
}

fn log_table(label: &str, resolved: &ResolvedSignatures, stages: ShaderStages) {
    let table = BindingTable::new(resolved, stages);
    info!(
        "{label}: {} signature slots, {} descriptor sets, {} dynamic offsets",
        resolved.signature_count(),
        resolved.descriptor_set_count(),
        resolved.dynamic_offset_count()
    );
    for binding in table.bindings() {
        info!(
            "  {:<20} set {} binding {} ({:?}, {:?})",
            binding.alias.as_deref().unwrap_or(&binding.name),
            binding.descriptor_set,
            binding.binding,
            binding.descriptor_type,
            binding.stages
        );
    }
}

/// Explicit signatures of the demo graphics pipeline.
pub fn graphics_signatures() -> Result<Vec<Arc<ResourceSignature>>> {
    Ok(vec![material_signature()?, frame_signature()?])
}

/// Resolve the demo pipelines and log their binding tables.
pub fn resolve_demo_pipelines() -> Result<(ResolvedSignatures, ResolvedSignatures)> {
    let graphics = resolve_or_default(
        &graphics_signatures()?,
        "Forward",
        &[],
        &PipelineResourceLayout::default(),
    )?;
    log_table("Forward pipeline", &graphics, ShaderStages::ALL_GRAPHICS);

    let blur_shader = ShaderReflection::new("BlurCS", ShaderStages::COMPUTE)
        .resource(ShaderResourceDecl::new("g_Input", ResourceKind::TextureSrv, 1))
        .resource(ShaderResourceDecl::new("g_Output", ResourceKind::TextureUav, 1));
    let layout = PipelineResourceLayout {
        default_variable_type: VariableType::Mutable,
        ..PipelineResourceLayout::default()
    };
    let compute = resolve_or_default(&[], "Blur", &[blur_shader], &layout)?;
    log_table("Blur pipeline", &compute, ShaderStages::COMPUTE);

    Ok((graphics, compute))
}

/// Create native descriptor set and pipeline layouts for a resolved pipeline.
pub fn create_native_layouts(ctx: &GpuContext, resolved: &ResolvedSignatures) -> Result<()> {
    let device = ctx.device();

    unsafe {
        let sampler = device.create_sampler(&vk::SamplerCreateInfo::default(), None)?;

        let mut set_layouts = vec![SignatureSetLayouts::default(); resolved.signature_count()];
        let result = (|| -> Result<()> {
            for (index, signature) in resolved.iter() {
                let samplers = vec![sampler; signature.immutable_sampler_count()];
                set_layouts[index] = SignatureSetLayouts::new(device, signature, &samplers)?;
            }

            let layout = PipelineLayout::new(device, resolved, &set_layouts)?;
            info!(
                "Created pipeline layout with {} descriptor sets (first set per signature: {:?})",
                layout.descriptor_set_count, layout.first_set_index
            );
            layout.destroy(device);
            Ok(())
        })();

        for layouts in &mut set_layouts {
            layouts.destroy(device);
        }
        device.destroy_sampler(sampler, None);
        result
    }
}
