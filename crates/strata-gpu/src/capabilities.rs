//! GPU capability detection.

use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Device features that affect which query kinds are available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFeatures {
    /// Occlusion queries can return exact sample counts.
    pub occlusion_query_precise: bool,
    /// Pipeline statistics queries.
    pub pipeline_statistics_query: bool,
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    /// Queries can be reset from the host (Vulkan 1.2 core).
    pub host_query_reset: bool,
    /// Timestamp queries on transfer-only queues.
    ///
    /// Reset commands are not allowed on transfer queues, so this depends on host reset.
    pub transfer_queue_timestamps: bool,
}

impl DeviceFeatures {
    /// Features with everything enabled.
    pub const fn all() -> Self {
        Self {
            occlusion_query_precise: true,
            pipeline_statistics_query: true,
            geometry_shader: true,
            tessellation_shader: true,
            host_query_reset: true,
            transfer_queue_timestamps: true,
        }
    }

    /// Build from the core feature structures.
    pub fn from_vk(features: &vk::PhysicalDeviceFeatures, host_query_reset: bool) -> Self {
        Self {
            occlusion_query_precise: features.occlusion_query_precise == vk::TRUE,
            pipeline_statistics_query: features.pipeline_statistics_query == vk::TRUE,
            geometry_shader: features.geometry_shader == vk::TRUE,
            tessellation_shader: features.tessellation_shader == vk::TRUE,
            host_query_reset,
            transfer_queue_timestamps: host_query_reset,
        }
    }
}

/// Pipeline stages executed by any queue that supports transfers.
const ALL_TRANSFER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::TOP_OF_PIPE.as_raw()
        | vk::PipelineStageFlags::BOTTOM_OF_PIPE.as_raw()
        | vk::PipelineStageFlags::TRANSFER.as_raw()
        | vk::PipelineStageFlags::HOST.as_raw(),
);

/// Pipeline stages a queue family can execute.
///
/// Geometry and tessellation stages are only included when the features are enabled.
pub fn supported_stages(flags: vk::QueueFlags, features: &DeviceFeatures) -> vk::PipelineStageFlags {
    let compute_stages =
        vk::PipelineStageFlags::DRAW_INDIRECT | vk::PipelineStageFlags::COMPUTE_SHADER;

    let mut graphics_stages = vk::PipelineStageFlags::VERTEX_INPUT
        | vk::PipelineStageFlags::VERTEX_SHADER
        | vk::PipelineStageFlags::FRAGMENT_SHADER
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::ALL_GRAPHICS;
    if features.geometry_shader {
        graphics_stages |= vk::PipelineStageFlags::GEOMETRY_SHADER;
    }
    if features.tessellation_shader {
        graphics_stages |= vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER;
    }

    if flags.contains(vk::QueueFlags::GRAPHICS) {
        graphics_stages | compute_stages | ALL_TRANSFER_STAGES
    } else if flags.contains(vk::QueueFlags::COMPUTE) {
        compute_stages | ALL_TRANSFER_STAGES
    } else if flags.contains(vk::QueueFlags::TRANSFER) {
        ALL_TRANSFER_STAGES
    } else {
        vk::PipelineStageFlags::empty()
    }
}

/// Capabilities of one queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapabilities {
    pub family_index: u32,
    pub flags: vk::QueueFlags,
    /// Meaningful bits in timestamps written on this queue; 0 if unsupported.
    pub timestamp_valid_bits: u32,
    pub supported_stages: vk::PipelineStageFlags,
}

impl QueueCapabilities {
    /// Build capabilities for a queue family.
    pub fn new(
        family_index: u32,
        flags: vk::QueueFlags,
        timestamp_valid_bits: u32,
        features: &DeviceFeatures,
    ) -> Self {
        Self {
            family_index,
            flags,
            timestamp_valid_bits,
            supported_stages: supported_stages(flags, features),
        }
    }

    #[inline]
    pub fn is_graphics(&self) -> bool {
        self.flags.contains(vk::QueueFlags::GRAPHICS)
    }

    /// Supports transfers but neither graphics nor compute.
    #[inline]
    pub fn is_transfer_only(&self) -> bool {
        !self
            .flags
            .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            && self.flags.contains(vk::QueueFlags::TRANSFER)
    }

    #[inline]
    pub const fn supports_timestamps(&self) -> bool {
        self.timestamp_valid_bits != 0
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    pub features: DeviceFeatures,
    /// Per queue family, indexed by family index.
    pub queues: Vec<QueueCapabilities>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);

        let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 =
            vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_2_features);
        instance.get_physical_device_features2(physical_device, &mut features2);
        let core_features = features2.features;
        let host_query_reset = vulkan_1_2_features.host_query_reset == vk::TRUE;
        let features = DeviceFeatures::from_vk(&core_features, host_query_reset);

        let queues = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .enumerate()
            .map(|(index, family)| {
                QueueCapabilities::new(
                    index as u32,
                    family.queue_flags,
                    family.timestamp_valid_bits,
                    &features,
                )
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            timestamp_period: properties.limits.timestamp_period,
            features,
            queues,
        }
    }

    /// Check if the GPU meets minimum requirements.
    pub fn meets_requirements(&self) -> bool {
        // Host query reset is core in Vulkan 1.2
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);
        if api_major < 1 || (api_major == 1 && api_minor < 2) {
            return false;
        }

        self.queues.iter().any(QueueCapabilities::is_graphics)
    }

    /// Capabilities of a queue family.
    pub fn queue(&self, family_index: u32) -> Option<&QueueCapabilities> {
        self.queues.get(family_index as usize)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - timestamp period {} ns",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.timestamp_period,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
    }

    #[test]
    fn graphics_queue_stages_follow_features() {
        let flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;

        let all = supported_stages(flags, &DeviceFeatures::all());
        assert!(all.contains(vk::PipelineStageFlags::GEOMETRY_SHADER));
        assert!(all.contains(vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER));
        assert!(all.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(all.contains(vk::PipelineStageFlags::TRANSFER));

        let no_geometry = DeviceFeatures {
            geometry_shader: false,
            tessellation_shader: false,
            ..DeviceFeatures::all()
        };
        let stages = supported_stages(flags, &no_geometry);
        assert!(!stages.contains(vk::PipelineStageFlags::GEOMETRY_SHADER));
        assert!(!stages.contains(vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER));
        assert!(stages.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    }

    #[test]
    fn compute_and_transfer_queue_stages() {
        let features = DeviceFeatures::all();

        let compute = supported_stages(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, &features);
        assert!(compute.contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        assert!(!compute.contains(vk::PipelineStageFlags::GEOMETRY_SHADER));
        assert!(!compute.contains(vk::PipelineStageFlags::VERTEX_SHADER));

        let transfer = supported_stages(vk::QueueFlags::TRANSFER, &features);
        assert_eq!(transfer, ALL_TRANSFER_STAGES);
    }

    #[test]
    fn queue_classification() {
        let features = DeviceFeatures::default();
        let transfer = QueueCapabilities::new(2, vk::QueueFlags::TRANSFER, 64, &features);
        assert!(transfer.is_transfer_only());
        assert!(!transfer.is_graphics());

        let compute = QueueCapabilities::new(
            1,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            0,
            &features,
        );
        assert!(!compute.is_transfer_only());
        assert!(!compute.supports_timestamps());
    }

    #[test]
    fn transfer_timestamps_follow_host_reset() {
        let features = DeviceFeatures::from_vk(&vk::PhysicalDeviceFeatures::default(), true);
        assert!(features.transfer_queue_timestamps);
        assert!(!features.occlusion_query_precise);
    }
}
