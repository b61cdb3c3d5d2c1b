//! Implicit signature synthesis from shader reflection.
//!
//! When a pipeline is created without any resource signature, the resources the
//! shaders declare are gathered into a single signature at binding index 0.

use strata_core::{ResourceFlags, ResourceKind, ShaderStages, VariableType};

use crate::error::{BindingError, Result};
use crate::signature::{
    sampler_name_matches, ImmutableSamplerDesc, PipelineResourceDesc, ResourceSignatureDesc,
};

/// A resource declared by a shader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderResourceDecl {
    pub name: String,
    pub kind: ResourceKind,
    /// Number of array elements; 0 for unsized arrays.
    pub array_size: u32,
    pub flags: ResourceFlags,
}

impl ShaderResourceDecl {
    pub fn new(name: impl Into<String>, kind: ResourceKind, array_size: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            array_size,
            flags: ResourceFlags::empty(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Reflected resource list of one shader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderReflection {
    pub name: String,
    /// The single stage this shader runs in.
    pub stage: ShaderStages,
    pub resources: Vec<ShaderResourceDecl>,
}

impl ShaderReflection {
    pub fn new(name: impl Into<String>, stage: ShaderStages) -> Self {
        debug_assert!(stage.is_single_stage(), "shader must have exactly one stage");
        Self {
            name: name.into(),
            stage,
            resources: Vec::new(),
        }
    }

    #[must_use]
    pub fn resource(mut self, resource: ShaderResourceDecl) -> Self {
        self.resources.push(resource);
        self
    }
}

/// Explicit variable type for a named shader variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderVariableDesc {
    pub name: String,
    pub stages: ShaderStages,
    pub var_type: VariableType,
}

impl ShaderVariableDesc {
    pub fn new(stages: ShaderStages, name: impl Into<String>, var_type: VariableType) -> Self {
        Self {
            name: name.into(),
            stages,
            var_type,
        }
    }
}

/// Resource layout used to build the implicit signature.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineResourceLayout {
    /// Variable type for resources with no matching variable.
    pub default_variable_type: VariableType,
    pub variables: Vec<ShaderVariableDesc>,
    pub immutable_samplers: Vec<ImmutableSamplerDesc>,
    pub combined_sampler_suffix: Option<String>,
}

impl PipelineResourceLayout {
    /// First variable that matches `name` and is visible to `stage`.
    pub fn find_variable(&self, stage: ShaderStages, name: &str) -> Option<&ShaderVariableDesc> {
        self.variables
            .iter()
            .find(|var| var.stages.contains(stage) && var.name == name)
    }

    /// Variable that controls a declared shader resource.
    ///
    /// With a combined sampler suffix, a separate sampler `<texture><suffix>` follows
    /// the variable of its texture.
    pub fn find_resource_variable(
        &self,
        stage: ShaderStages,
        decl: &ShaderResourceDecl,
    ) -> Option<&ShaderVariableDesc> {
        let suffix = self.combined_sampler_suffix.as_deref();
        if decl.kind != ResourceKind::Sampler || suffix.is_none() {
            return self.find_variable(stage, &decl.name);
        }
        self.variables.iter().find(|var| {
            var.stages.contains(stage) && sampler_name_matches(&var.name, &decl.name, suffix)
        })
    }
}

/// Build the description of the implicit signature for a pipeline.
pub fn default_signature_desc(
    pipeline_name: &str,
    shaders: &[ShaderReflection],
    layout: &PipelineResourceLayout,
) -> Result<ResourceSignatureDesc> {
    let signature_name = format!("Implicit signature of '{pipeline_name}'");
    let mut resources: Vec<PipelineResourceDesc> = Vec::new();

    for shader in shaders {
        for decl in &shader.resources {
            if decl.array_size == 0 {
                return Err(BindingError::ZeroArraySize {
                    signature: signature_name,
                    resource: decl.name.clone(),
                });
            }

            let (stages, var_type) = layout.find_resource_variable(shader.stage, decl).map_or(
                (shader.stage, layout.default_variable_type),
                |var| (var.stages, var.var_type),
            );

            let existing = resources
                .iter()
                .position(|res| res.stages == stages && res.name == decl.name);

            match existing {
                Some(index) => {
                    let res = &resources[index];
                    let reason = if res.kind != decl.kind {
                        Some(format!(
                            "it is declared as {} and as {}",
                            res.kind.name(),
                            decl.kind.name()
                        ))
                    } else if res.array_size != decl.array_size {
                        Some(format!(
                            "array sizes {} and {} differ",
                            res.array_size, decl.array_size
                        ))
                    } else if res.flags != decl.flags {
                        Some(format!("flags {:?} and {:?} differ", res.flags, decl.flags))
                    } else {
                        None
                    };
                    if let Some(reason) = reason {
                        return Err(BindingError::IncompatibleMerge {
                            pipeline: pipeline_name.to_owned(),
                            resource: decl.name.clone(),
                            reason,
                        });
                    }
                }
                None => resources.push(
                    PipelineResourceDesc::new(
                        stages,
                        decl.name.clone(),
                        decl.array_size,
                        decl.kind,
                        var_type,
                    )
                    .with_flags(decl.flags),
                ),
            }
        }
    }

    tracing::debug!(
        "Pipeline '{}': implicit signature with {} resources from {} shaders",
        pipeline_name,
        resources.len(),
        shaders.len()
    );

    Ok(ResourceSignatureDesc {
        name: signature_name,
        resources,
        immutable_samplers: layout.immutable_samplers.clone(),
        binding_index: 0,
        combined_sampler_suffix: layout.combined_sampler_suffix.clone(),
    })
}
