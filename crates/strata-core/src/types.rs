//! Core shader-resource and query types.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

bitflags! {
    /// Set of shader stages a resource is visible to.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
        const TASK = 1 << 6;
        const MESH = 1 << 7;

        /// Every stage of the classic graphics pipeline.
        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::TESSELLATION_CONTROL.bits()
            | Self::TESSELLATION_EVALUATION.bits()
            | Self::GEOMETRY.bits()
            | Self::FRAGMENT.bits();
    }
}

impl ShaderStages {
    /// Returns true if exactly one stage bit is set.
    #[inline]
    pub const fn is_single_stage(self) -> bool {
        self.bits().is_power_of_two()
    }
}

/// Kind of GPU query.
///
/// The declaration order is the order in which query pools are created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Number of samples that passed depth/stencil tests.
    Occlusion,
    /// Whether any sample passed depth/stencil tests.
    BinaryOcclusion,
    /// GPU timestamp.
    Timestamp,
    /// Pipeline statistics counters.
    PipelineStatistics,
    /// A begin/end timestamp pair.
    Duration,
}

impl QueryKind {
    /// Number of query kinds.
    pub const COUNT: usize = 5;

    /// All query kinds in pool-creation order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Occlusion,
        Self::BinaryOcclusion,
        Self::Timestamp,
        Self::PipelineStatistics,
        Self::Duration,
    ];

    /// Dense index of this kind, usable for per-kind arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Occlusion => "occlusion",
            Self::BinaryOcclusion => "binary_occlusion",
            Self::Timestamp => "timestamp",
            Self::PipelineStatistics => "pipeline_statistics",
            Self::Duration => "duration",
        }
    }

    /// Native slots consumed per logical query.
    ///
    /// Duration queries need a begin and an end timestamp.
    #[inline]
    pub const fn slots_per_query(self) -> u32 {
        match self {
            Self::Duration => 2,
            _ => 1,
        }
    }

    /// Returns true if this kind is backed by timestamp writes.
    #[inline]
    pub const fn is_timestamp_based(self) -> bool {
        matches!(self, Self::Timestamp | Self::Duration)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::InvalidData(format!("unknown query kind '{s}'")))
    }
}

/// Kind of shader resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Uniform (constant) buffer.
    ConstantBuffer,
    /// Read-only texture.
    TextureSrv,
    /// Read-only buffer.
    BufferSrv,
    /// Read-write texture.
    TextureUav,
    /// Read-write buffer.
    BufferUav,
    /// Separate sampler.
    Sampler,
    /// Subpass input attachment.
    InputAttachment,
    /// Ray-tracing acceleration structure.
    AccelerationStructure,
}

impl ResourceKind {
    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ConstantBuffer => "constant buffer",
            Self::TextureSrv => "texture SRV",
            Self::BufferSrv => "buffer SRV",
            Self::TextureUav => "texture UAV",
            Self::BufferUav => "buffer UAV",
            Self::Sampler => "sampler",
            Self::InputAttachment => "input attachment",
            Self::AccelerationStructure => "acceleration structure",
        }
    }
}

/// How often a shader variable is expected to change.
///
/// Ordered so that resources can be sorted static first, dynamic last.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    /// Set once per signature.
    #[default]
    Static,
    /// Set once per resource binding object.
    Mutable,
    /// May change between draws.
    Dynamic,
}

impl VariableType {
    /// Returns true for static and mutable variables, which share a descriptor set.
    #[inline]
    pub const fn is_static_or_mutable(self) -> bool {
        !matches!(self, Self::Dynamic)
    }
}

bitflags! {
    /// Additional per-resource flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u32 {
        /// Buffers never use dynamic offsets.
        const NO_DYNAMIC_BUFFERS = 1 << 0;
        /// Texture is a combined image sampler.
        const COMBINED_SAMPLER = 1 << 1;
        /// Buffer is accessed through a texel view.
        const FORMATTED_BUFFER = 1 << 2;
        /// Array with a size not known until bind time.
        const RUNTIME_ARRAY = 1 << 3;
        /// Input attachment in the general layout.
        const GENERAL_INPUT_ATTACHMENT = 1 << 4;
    }
}

impl ResourceFlags {
    /// Flags that are meaningful for the given resource kind.
    pub const fn valid_for(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::ConstantBuffer => {
                Self::from_bits_truncate(Self::NO_DYNAMIC_BUFFERS.bits() | Self::RUNTIME_ARRAY.bits())
            }
            ResourceKind::TextureSrv => {
                Self::from_bits_truncate(Self::COMBINED_SAMPLER.bits() | Self::RUNTIME_ARRAY.bits())
            }
            ResourceKind::BufferSrv | ResourceKind::BufferUav => Self::from_bits_truncate(
                Self::NO_DYNAMIC_BUFFERS.bits()
                    | Self::FORMATTED_BUFFER.bits()
                    | Self::RUNTIME_ARRAY.bits(),
            ),
            ResourceKind::TextureUav | ResourceKind::Sampler | ResourceKind::AccelerationStructure => {
                Self::RUNTIME_ARRAY
            }
            ResourceKind::InputAttachment => Self::GENERAL_INPUT_ATTACHMENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_kind_order_is_stable() {
        for (i, kind) in QueryKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn query_kind_from_str() {
        assert_eq!("duration".parse::<QueryKind>(), Ok(QueryKind::Duration));
        assert_eq!(
            "pipeline_statistics".parse::<QueryKind>(),
            Ok(QueryKind::PipelineStatistics)
        );
        assert!("bogus".parse::<QueryKind>().is_err());
    }

    #[test]
    fn duration_uses_two_slots() {
        assert_eq!(QueryKind::Duration.slots_per_query(), 2);
        assert_eq!(QueryKind::Timestamp.slots_per_query(), 1);
    }

    #[test]
    fn timestamp_based_kinds() {
        let timestamp_based: Vec<_> = QueryKind::ALL
            .into_iter()
            .filter(|kind| kind.is_timestamp_based())
            .collect();
        assert_eq!(timestamp_based, [QueryKind::Timestamp, QueryKind::Duration]);
    }

    #[test]
    fn variable_type_order() {
        assert!(VariableType::Static < VariableType::Mutable);
        assert!(VariableType::Mutable < VariableType::Dynamic);
        assert!(VariableType::Mutable.is_static_or_mutable());
        assert!(!VariableType::Dynamic.is_static_or_mutable());
    }

    #[test]
    fn flags_valid_for_kind() {
        assert!(ResourceFlags::valid_for(ResourceKind::TextureSrv)
            .contains(ResourceFlags::COMBINED_SAMPLER));
        assert!(!ResourceFlags::valid_for(ResourceKind::Sampler)
            .contains(ResourceFlags::COMBINED_SAMPLER));
    }

    #[test]
    fn single_stage() {
        assert!(ShaderStages::FRAGMENT.is_single_stage());
        assert!(!(ShaderStages::VERTEX | ShaderStages::FRAGMENT).is_single_stage());
        assert!(!ShaderStages::empty().is_single_stage());
    }
}
