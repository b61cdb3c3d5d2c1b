//! Fixed-size Vulkan query pools with thread-safe slot recycling.
//!
//! Every slot is in exactly one of three states:
//!
//! ```text
//! available --allocate--> allocated --discard--> stale --reset--> available
//! ```
//!
//! Fresh slots start stale because Vulkan leaves new queries undefined until they are
//! reset.

use ash::prelude::VkResult;
use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_core::QueryKind;

use crate::error::{GpuError, Result};

/// Device operations needed to manage query pools.
///
/// Implemented for [`ash::Device`]; tests substitute a recording device.
pub trait QueryDevice: Send + Sync {
    /// Create a native query pool.
    ///
    /// # Safety
    /// The device must be valid.
    unsafe fn create_query_pool(&self, info: &vk::QueryPoolCreateInfo<'_>) -> VkResult<vk::QueryPool>;

    /// Destroy a native query pool.
    ///
    /// # Safety
    /// The pool must have been created by this device and must not be in use.
    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool);

    /// Reset queries from the host.
    ///
    /// # Safety
    /// Host query reset must be enabled and the queries must not be in use.
    unsafe fn host_reset_query_pool(&self, pool: vk::QueryPool, first_query: u32, query_count: u32);

    /// Record a query reset command.
    ///
    /// # Safety
    /// The command buffer must be recording and outside of a render pass.
    unsafe fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    );
}

impl QueryDevice for ash::Device {
    unsafe fn create_query_pool(&self, info: &vk::QueryPoolCreateInfo<'_>) -> VkResult<vk::QueryPool> {
        ash::Device::create_query_pool(self, info, None)
    }

    unsafe fn destroy_query_pool(&self, pool: vk::QueryPool) {
        ash::Device::destroy_query_pool(self, pool, None);
    }

    unsafe fn host_reset_query_pool(&self, pool: vk::QueryPool, first_query: u32, query_count: u32) {
        self.reset_query_pool(pool, first_query, query_count);
    }

    unsafe fn cmd_reset_query_pool(
        &self,
        cmd: vk::CommandBuffer,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
    ) {
        ash::Device::cmd_reset_query_pool(self, cmd, pool, first_query, query_count);
    }
}

/// Native query type backing a query kind.
pub const fn native_query_type(kind: QueryKind) -> vk::QueryType {
    match kind {
        QueryKind::Occlusion | QueryKind::BinaryOcclusion => vk::QueryType::OCCLUSION,
        QueryKind::Timestamp | QueryKind::Duration => vk::QueryType::TIMESTAMP,
        QueryKind::PipelineStatistics => vk::QueryType::PIPELINE_STATISTICS,
    }
}

/// Snapshot of slot usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPoolStats {
    pub query_count: u32,
    pub available: u32,
    pub stale: u32,
    pub allocated: u32,
    /// Highest number of slots allocated at the same time.
    pub max_allocated: u32,
}

struct PoolState {
    available: Vec<u32>,
    stale: Vec<u32>,
    max_allocated: u32,
}

/// A native query pool with slot bookkeeping.
pub struct QueryPool<D: QueryDevice> {
    device: Arc<D>,
    handle: vk::QueryPool,
    kind: QueryKind,
    query_count: u32,
    host_reset: bool,
    state: Mutex<PoolState>,
}

impl<D: QueryDevice> QueryPool<D> {
    /// Create a pool with `query_count` slots, all of them stale.
    ///
    /// `host_reset` selects host-side resets over recorded reset commands.
    ///
    /// # Safety
    /// The device must be valid and outlive the pool.
    pub unsafe fn new(
        device: Arc<D>,
        kind: QueryKind,
        query_count: u32,
        pipeline_statistics: vk::QueryPipelineStatisticFlags,
        host_reset: bool,
    ) -> Result<Self> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(native_query_type(kind))
            .query_count(query_count)
            .pipeline_statistics(pipeline_statistics);

        let handle = device
            .create_query_pool(&create_info)
            .map_err(|source| GpuError::QueryPoolCreation { kind, source })?;

        tracing::debug!("Created {} query pool with {} slots", kind, query_count);

        Ok(Self {
            device,
            handle,
            kind,
            query_count,
            host_reset,
            state: Mutex::new(PoolState {
                available: Vec::with_capacity(query_count as usize),
                // Reversed so that slots are handed out in ascending order.
                stale: (0..query_count).rev().collect(),
                max_allocated: 0,
            }),
        })
    }

    /// Query kind of this pool.
    pub const fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Native pool handle.
    pub const fn handle(&self) -> vk::QueryPool {
        self.handle
    }

    /// Total number of slots.
    pub const fn query_count(&self) -> u32 {
        self.query_count
    }

    /// Whether stale slots are reset from the host rather than by recorded commands.
    pub const fn uses_host_reset(&self) -> bool {
        self.host_reset
    }

    /// Take an available slot, or `None` if every slot is allocated or stale.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn allocate(&self) -> Option<u32> {
        let mut state = self.state.lock();
        let index = state.available.pop()?;

        let allocated = self.query_count - state.available.len() as u32 - state.stale.len() as u32;
        state.max_allocated = state.max_allocated.max(allocated);

        Some(index)
    }

    /// Return an allocated slot. It becomes available again after the next reset.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn discard(&self, index: u32) {
        let mut state = self.state.lock();
        debug_assert!(
            index < self.query_count,
            "query index {index} is out of range [0, {})",
            self.query_count
        );
        debug_assert!(
            !state.available.contains(&index),
            "{} query {index} is already available",
            self.kind
        );
        debug_assert!(
            !state.stale.contains(&index),
            "{} query {index} has already been discarded",
            self.kind
        );
        state.stale.push(index);
    }

    /// Reset all stale slots and make them available.
    ///
    /// Returns the number of reset operations issued. When every slot is stale the
    /// whole pool is reset with a single operation.
    ///
    /// # Safety
    /// Without host reset, `cmd` must be recording and outside of a render pass.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn reset_stale_queries(&self, cmd: vk::CommandBuffer) -> u32 {
        let mut state = self.state.lock();
        if state.stale.is_empty() {
            return 0;
        }

        let reset_count = if state.stale.len() == self.query_count as usize {
            self.reset_range(cmd, 0, self.query_count);
            1
        } else {
            for &index in &state.stale {
                self.reset_range(cmd, index, 1);
            }
            state.stale.len() as u32
        };

        let PoolState {
            available, stale, ..
        } = &mut *state;
        available.append(stale);

        reset_count
    }

    unsafe fn reset_range(&self, cmd: vk::CommandBuffer, first_query: u32, query_count: u32) {
        if self.host_reset {
            self.device
                .host_reset_query_pool(self.handle, first_query, query_count);
        } else {
            self.device
                .cmd_reset_query_pool(cmd, self.handle, first_query, query_count);
        }
    }

    /// Highest number of slots allocated at the same time.
    pub fn max_allocated(&self) -> u32 {
        self.state.lock().max_allocated
    }

    /// Current slot usage.
    pub fn stats(&self) -> QueryPoolStats {
        let state = self.state.lock();
        let available = state.available.len() as u32;
        let stale = state.stale.len() as u32;
        QueryPoolStats {
            query_count: self.query_count,
            available,
            stale,
            allocated: self.query_count - available - stale,
            max_allocated: state.max_allocated,
        }
    }
}

impl<D: QueryDevice> Drop for QueryPool<D> {
    fn drop(&mut self) {
        let stats = self.stats();
        if stats.allocated != 0 {
            tracing::error!(
                "{} of {} {} queries have not been returned to the pool",
                stats.allocated,
                self.query_count,
                self.kind
            );
        }

        unsafe {
            self.device.destroy_query_pool(self.handle);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{Call, MockDevice};
    use super::*;
    use std::collections::HashSet;

    fn pool(device: &Arc<MockDevice>, count: u32, host_reset: bool) -> QueryPool<MockDevice> {
        unsafe {
            QueryPool::new(
                Arc::clone(device),
                QueryKind::Occlusion,
                count,
                vk::QueryPipelineStatisticFlags::empty(),
                host_reset,
            )
        }
        .unwrap()
    }

    fn assert_partition(pool: &QueryPool<MockDevice>) {
        let stats = pool.stats();
        assert_eq!(
            stats.available + stats.stale + stats.allocated,
            stats.query_count
        );
    }

    #[test]
    fn new_pool_is_fully_stale() {
        let device = MockDevice::new();
        let pool = pool(&device, 8, false);

        let stats = pool.stats();
        assert_eq!(stats.stale, 8);
        assert_eq!(stats.available, 0);
        assert_eq!(pool.allocate(), None);
        assert_eq!(
            device.created(),
            vec![Call::Create {
                query_type: vk::QueryType::OCCLUSION,
                query_count: 8,
                pipeline_statistics: vk::QueryPipelineStatisticFlags::empty(),
            }]
        );
    }

    #[test]
    fn whole_pool_reset_is_one_command() {
        let device = MockDevice::new();
        let pool = pool(&device, 4, false);
        device.clear();

        assert_eq!(unsafe { pool.reset_stale_queries(vk::CommandBuffer::null()) }, 1);
        assert_eq!(
            device.calls(),
            vec![Call::CmdReset {
                pool: pool.handle(),
                first: 0,
                count: 4
            }]
        );
        assert_eq!(pool.stats().available, 4);
        assert_eq!(unsafe { pool.reset_stale_queries(vk::CommandBuffer::null()) }, 0);
    }

    #[test]
    fn partial_reset_is_per_slot() {
        let device = MockDevice::new();
        let pool = pool(&device, 4, true);
        unsafe { pool.reset_stale_queries(vk::CommandBuffer::null()) };

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        pool.discard(a);
        pool.discard(b);
        device.clear();

        assert_eq!(unsafe { pool.reset_stale_queries(vk::CommandBuffer::null()) }, 2);
        let calls = device.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls
            .iter()
            .all(|call| matches!(call, Call::HostReset { count: 1, .. })));
    }

    #[test]
    fn slot_lifecycle_and_partition() {
        let device = MockDevice::new();
        let pool = pool(&device, 4, false);
        assert_partition(&pool);
        unsafe { pool.reset_stale_queries(vk::CommandBuffer::null()) };

        let mut allocated = HashSet::new();
        for _ in 0..4 {
            assert!(allocated.insert(pool.allocate().unwrap()));
            assert_partition(&pool);
        }
        // Exhausted pools fail immediately.
        assert_eq!(pool.allocate(), None);

        let freed = *allocated.iter().next().unwrap();
        pool.discard(freed);
        assert_partition(&pool);
        // Discarded slots are not reused before a reset.
        assert_eq!(pool.allocate(), None);

        assert_eq!(unsafe { pool.reset_stale_queries(vk::CommandBuffer::null()) }, 1);
        assert_eq!(pool.allocate(), Some(freed));
        assert_eq!(pool.max_allocated(), 4);

        for index in allocated {
            pool.discard(index);
        }
        assert_partition(&pool);
    }

    #[test]
    fn creation_failure_is_reported() {
        let device = MockDevice::failing();
        let result = unsafe {
            QueryPool::new(
                device,
                QueryKind::Timestamp,
                16,
                vk::QueryPipelineStatisticFlags::empty(),
                false,
            )
        };
        assert!(matches!(
            result,
            Err(GpuError::QueryPoolCreation {
                kind: QueryKind::Timestamp,
                source: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            })
        ));
    }

    #[test]
    fn drop_destroys_pool_with_leaks() {
        let device = MockDevice::new();
        let pool = pool(&device, 2, true);
        unsafe { pool.reset_stale_queries(vk::CommandBuffer::null()) };
        let _leaked = pool.allocate();
        let handle = pool.handle();
        drop(pool);

        assert_eq!(device.calls().last(), Some(&Call::Destroy(handle)));
    }

    #[test]
    #[should_panic(expected = "already been discarded")]
    #[cfg(debug_assertions)]
    fn double_discard_is_caught() {
        let device = MockDevice::new();
        let pool = pool(&device, 2, true);
        unsafe { pool.reset_stale_queries(vk::CommandBuffer::null()) };
        let index = pool.allocate().unwrap();
        pool.discard(index);
        pool.discard(index);
    }
}
