//! Command buffer management.

use crate::error::{GpuError, Result};
use crate::query_manager::QueryManager;
use crate::query_pool::QueryDevice;
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(
        &self,
        device: &ash::Device,
        level: vk::CommandBufferLevel,
    ) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(level)
            .command_buffer_count(1);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::Other("Driver returned no command buffer".into()))
    }

    /// Reset the command pool.
    ///
    /// # Safety
    /// The device must be valid and all command buffers from this pool must not be in use.
    pub unsafe fn reset(
        &self,
        device: &ash::Device,
        flags: vk::CommandPoolResetFlags,
    ) -> Result<()> {
        device.reset_command_pool(self.pool, flags)?;
        Ok(())
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Recording state of a command buffer.
///
/// Query resets are recorded commands and are not allowed inside a render pass, so
/// resets go through this tracker.
#[derive(Debug)]
pub struct CommandState {
    cmd: vk::CommandBuffer,
    inside_render_pass: bool,
    num_commands: u32,
}

impl CommandState {
    /// Track a command buffer that has just begun recording.
    pub const fn new(cmd: vk::CommandBuffer) -> Self {
        Self {
            cmd,
            inside_render_pass: false,
            num_commands: 0,
        }
    }

    /// The tracked command buffer.
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    pub const fn is_inside_render_pass(&self) -> bool {
        self.inside_render_pass
    }

    /// Number of commands recorded so far.
    pub const fn num_commands(&self) -> u32 {
        self.num_commands
    }

    /// Note that a render pass was begun.
    pub fn begin_render_pass(&mut self) -> Result<()> {
        if self.inside_render_pass {
            return Err(GpuError::InvalidState(
                "Render pass is already active".into(),
            ));
        }
        self.inside_render_pass = true;
        self.num_commands += 1;
        Ok(())
    }

    /// Note that the active render pass ended.
    pub fn end_render_pass(&mut self) -> Result<()> {
        if !self.inside_render_pass {
            return Err(GpuError::InvalidState("No active render pass".into()));
        }
        self.inside_render_pass = false;
        self.num_commands += 1;
        Ok(())
    }

    /// Note that a command was recorded.
    pub fn record_command(&mut self) {
        self.num_commands += 1;
    }

    /// Reset stale queries of `queries` into this command buffer.
    ///
    /// Returns the number of reset operations issued. Only resets recorded into the
    /// command buffer count as commands; host resets do not.
    ///
    /// # Safety
    /// The command buffer must be recording and belong to the queue `queries` serves.
    pub unsafe fn reset_stale_queries<D: QueryDevice>(
        &mut self,
        queries: &QueryManager<D>,
    ) -> Result<u32> {
        if self.inside_render_pass {
            return Err(GpuError::InvalidState(
                "Queries cannot be reset inside a render pass".into(),
            ));
        }
        let reset_count = queries.reset_stale_queries(self.cmd);
        if !queries.uses_host_reset() {
            self.num_commands += reset_count;
        }
        Ok(reset_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{DeviceFeatures, QueueCapabilities};
    use crate::query_manager::QueryPoolSizes;
    use crate::query_pool::mock::{Call, MockDevice};
    use strata_core::QueryKind;

    fn manager(device: &std::sync::Arc<MockDevice>) -> QueryManager<MockDevice> {
        manager_with_reset(device, false)
    }

    fn manager_with_reset(
        device: &std::sync::Arc<MockDevice>,
        host_query_reset: bool,
    ) -> QueryManager<MockDevice> {
        let features = DeviceFeatures {
            host_query_reset,
            ..DeviceFeatures::all()
        };
        let queue = QueueCapabilities::new(0, vk::QueueFlags::GRAPHICS, 64, &features);
        let sizes = QueryPoolSizes::none()
            .with(QueryKind::Timestamp, 4)
            .with(QueryKind::Occlusion, 4);
        unsafe { QueryManager::new(device, &queue, &features, 1.0, &sizes) }.unwrap()
    }

    #[test]
    fn reset_outside_render_pass() {
        let device = MockDevice::new();
        let queries = manager(&device);
        let mut state = CommandState::new(vk::CommandBuffer::null());

        let reset_count = unsafe { state.reset_stale_queries(&queries) }.unwrap();
        assert_eq!(reset_count, 2);
        assert_eq!(state.num_commands(), 2);
    }

    #[test]
    fn reset_inside_render_pass_is_rejected() {
        let device = MockDevice::new();
        let queries = manager(&device);
        let mut state = CommandState::new(vk::CommandBuffer::null());

        state.begin_render_pass().unwrap();
        let result = unsafe { state.reset_stale_queries(&queries) };
        assert!(matches!(result, Err(GpuError::InvalidState(_))));
        // Nothing was reset.
        assert_eq!(queries.pool(QueryKind::Timestamp).unwrap().stats().stale, 4);

        state.end_render_pass().unwrap();
        assert_eq!(unsafe { state.reset_stale_queries(&queries) }.unwrap(), 2);
    }

    #[test]
    fn host_resets_record_no_commands() {
        let device = MockDevice::new();
        let queries = manager_with_reset(&device, true);
        assert!(queries.uses_host_reset());
        let mut state = CommandState::new(vk::CommandBuffer::null());

        let reset_count = unsafe { state.reset_stale_queries(&queries) }.unwrap();
        assert_eq!(reset_count, 2);
        assert_eq!(state.num_commands(), 0);
        assert!(device
            .calls()
            .iter()
            .all(|call| !matches!(call, Call::CmdReset { .. })));
    }

    #[test]
    fn render_pass_nesting() {
        let mut state = CommandState::new(vk::CommandBuffer::null());
        assert!(state.end_render_pass().is_err());
        state.begin_render_pass().unwrap();
        assert!(state.begin_render_pass().is_err());
        assert!(state.is_inside_render_pass());
    }
}
