//! GPU context management.

use crate::capabilities::{DeviceFeatures, GpuCapabilities};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::query_manager::{QueryManager, QueryPoolSizes};
use ash::vk;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,

    // Queue families and queues
    pub(crate) graphics_queue_family: u32,
    pub(crate) compute_queue_family: u32,
    pub(crate) transfer_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) compute_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,

    /// One manager per distinct queue family.
    pub(crate) query_managers: Vec<QueryManager<ash::Device>>,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the Vulkan instance handle.
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the graphics queue.
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the compute queue.
    pub const fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Get the transfer queue.
    pub const fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Get the graphics queue family index.
    pub const fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the compute queue family index.
    pub const fn compute_queue_family(&self) -> u32 {
        self.compute_queue_family
    }

    /// Get the transfer queue family index.
    pub const fn transfer_queue_family(&self) -> u32 {
        self.transfer_queue_family
    }

    /// Query manager serving a queue family.
    pub fn query_manager(&self, queue_family: u32) -> Option<&QueryManager<ash::Device>> {
        self.query_managers
            .iter()
            .find(|manager| manager.queue_family_index() == queue_family)
    }

    /// All query managers.
    pub fn query_managers(&self) -> &[QueryManager<ash::Device>] {
        &self.query_managers
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Query pools must be destroyed before the device
            self.query_managers.clear();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    query_pool_sizes: QueryPoolSizes,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Strata".to_string(),
            enable_validation: cfg!(debug_assertions),
            query_pool_sizes: QueryPoolSizes::default(),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set the number of queries per kind created for every queue.
    #[must_use]
    pub const fn query_pool_sizes(mut self, sizes: QueryPoolSizes) -> Self {
        self.query_pool_sizes = sizes;
        self
    }

    /// Build the GPU context.
    ///
    /// Prefer [`DeviceFactory::create_context`], which refuses to create a second device.
    pub fn build(self) -> Result<GpuContext> {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let result = unsafe { self.build_with_instance(&instance) };
        match result {
            Ok(parts) => Ok(GpuContext {
                entry,
                instance,
                physical_device: parts.physical_device,
                device: parts.device,
                capabilities: parts.capabilities,
                graphics_queue_family: parts.families.graphics,
                compute_queue_family: parts.families.compute,
                transfer_queue_family: parts.families.transfer,
                graphics_queue: parts.queues[0],
                compute_queue: parts.queues[1],
                transfer_queue: parts.queues[2],
                query_managers: parts.query_managers,
            }),
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                Err(err)
            }
        }
    }

    unsafe fn build_with_instance(&self, instance: &ash::Instance) -> Result<DeviceParts> {
        let physical_device = select_physical_device(instance)?;
        let capabilities = GpuCapabilities::query(instance, physical_device);

        if !capabilities.meets_requirements() {
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let families = find_queue_families(&capabilities)?;
        let (device, queues) =
            create_device(instance, physical_device, &families, &capabilities.features)?;
        let device = Arc::new(device);

        let mut query_managers: Vec<QueryManager<ash::Device>> = Vec::new();
        for family in families.unique() {
            let Some(queue) = capabilities.queue(family) else {
                continue;
            };
            match QueryManager::new(
                &device,
                queue,
                &capabilities.features,
                capabilities.timestamp_period,
                &self.query_pool_sizes,
            ) {
                Ok(manager) => query_managers.push(manager),
                Err(err) => {
                    query_managers.clear();
                    device.destroy_device(None);
                    return Err(err);
                }
            }
        }

        Ok(DeviceParts {
            physical_device,
            device,
            capabilities,
            families,
            queues,
            query_managers,
        })
    }
}

struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    families: QueueFamilyIndices,
    queues: [vk::Queue; 3],
    query_managers: Vec<QueryManager<ash::Device>>,
}

/// Creates at most one live [`GpuContext`].
///
/// A second device can only be created after every reference to the first one has
/// been dropped.
pub struct DeviceFactory<T = GpuContext> {
    device: Mutex<Weak<T>>,
}

impl<T> Default for DeviceFactory<T> {
    fn default() -> Self {
        Self {
            device: Mutex::new(Weak::new()),
        }
    }
}

impl<T> DeviceFactory<T> {
    /// Create a factory with no device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a device created by this factory is alive.
    pub fn is_initialized(&self) -> bool {
        self.device.lock().strong_count() > 0
    }

    /// The live device, if any.
    pub fn device(&self) -> Option<Arc<T>> {
        self.device.lock().upgrade()
    }

    /// Create a device with `create` unless one is already alive.
    pub fn create_with(&self, create: impl FnOnce() -> Result<T>) -> Result<Arc<T>> {
        let mut slot = self.device.lock();
        if slot.strong_count() > 0 {
            return Err(GpuError::DeviceAlreadyInitialized);
        }

        let device = Arc::new(create()?);
        *slot = Arc::downgrade(&device);
        Ok(device)
    }
}

impl DeviceFactory<GpuContext> {
    /// Build a GPU context unless one is already alive.
    pub fn create_context(&self, builder: GpuContextBuilder) -> Result<Arc<GpuContext>> {
        self.create_with(|| builder.build())
    }
}

/// Queue family indices.
struct QueueFamilyIndices {
    graphics: u32,
    compute: u32,
    transfer: u32,
}

impl QueueFamilyIndices {
    /// Distinct families in graphics, compute, transfer order.
    fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        for family in [self.compute, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Find queue families for graphics, compute, and transfer.
fn find_queue_families(capabilities: &GpuCapabilities) -> Result<QueueFamilyIndices> {
    let mut graphics_family = None;
    let mut compute_family = None;
    let mut transfer_family = None;

    for queue in &capabilities.queues {
        let i = queue.family_index;

        // Look for dedicated compute queue (no graphics)
        if queue.flags.contains(vk::QueueFlags::COMPUTE)
            && !queue.is_graphics()
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        // Look for dedicated transfer queue (no graphics or compute)
        if queue.is_transfer_only() && transfer_family.is_none() {
            transfer_family = Some(i);
        }

        // Graphics queue (also supports compute and transfer)
        if queue.is_graphics() && graphics_family.is_none() {
            graphics_family = Some(i);
        }
    }

    // Graphics queue is required
    let graphics = graphics_family.ok_or(GpuError::NoSuitableDevice)?;

    // Fall back to graphics queue for compute if no dedicated queue
    let compute = compute_family.unwrap_or(graphics);

    // Fall back to compute queue for transfer if no dedicated queue
    let transfer = transfer_family.unwrap_or(compute);

    Ok(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// Create the logical device and retrieve graphics, compute and transfer queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    features: &DeviceFeatures,
) -> Result<(ash::Device, [vk::Queue; 3])> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    // Enable every supported feature that query pools rely on
    let mut vulkan_1_2_features =
        vk::PhysicalDeviceVulkan12Features::default().host_query_reset(features.host_query_reset);

    let core_features = vk::PhysicalDeviceFeatures::default()
        .occlusion_query_precise(features.occlusion_query_precise)
        .pipeline_statistics_query(features.pipeline_statistics_query)
        .geometry_shader(features.geometry_shader)
        .tessellation_shader(features.tessellation_shader);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(core_features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let queues = [
        device.get_device_queue(queue_families.graphics, 0),
        device.get_device_queue(queue_families.compute, 0),
        device.get_device_queue(queue_families.transfer, 0),
    ];

    Ok((device, queues))
}
