//! Per-queue query pool management.

use ash::vk;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use strata_core::QueryKind;

use crate::capabilities::{DeviceFeatures, QueueCapabilities};
use crate::error::Result;
use crate::query_pool::{QueryDevice, QueryPool};

/// Requested number of logical queries per kind. Zero disables a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPoolSizes {
    pub occlusion: u32,
    pub binary_occlusion: u32,
    pub timestamp: u32,
    pub pipeline_statistics: u32,
    pub duration: u32,
}

impl Default for QueryPoolSizes {
    fn default() -> Self {
        Self {
            occlusion: 128,
            binary_occlusion: 128,
            timestamp: 512,
            pipeline_statistics: 128,
            duration: 256,
        }
    }
}

impl QueryPoolSizes {
    /// All kinds disabled.
    pub const fn none() -> Self {
        Self {
            occlusion: 0,
            binary_occlusion: 0,
            timestamp: 0,
            pipeline_statistics: 0,
            duration: 0,
        }
    }

    /// Requested count for a kind.
    pub const fn get(&self, kind: QueryKind) -> u32 {
        match kind {
            QueryKind::Occlusion => self.occlusion,
            QueryKind::BinaryOcclusion => self.binary_occlusion,
            QueryKind::Timestamp => self.timestamp,
            QueryKind::PipelineStatistics => self.pipeline_statistics,
            QueryKind::Duration => self.duration,
        }
    }

    /// Set the requested count for a kind.
    #[must_use]
    pub const fn with(mut self, kind: QueryKind, count: u32) -> Self {
        match kind {
            QueryKind::Occlusion => self.occlusion = count,
            QueryKind::BinaryOcclusion => self.binary_occlusion = count,
            QueryKind::Timestamp => self.timestamp = count,
            QueryKind::PipelineStatistics => self.pipeline_statistics = count,
            QueryKind::Duration => self.duration = count,
        }
        self
    }
}

/// Statistics collected by pipeline statistics queries on a queue.
///
/// Geometry and tessellation counters are only requested when the queue can run
/// those stages.
pub fn pipeline_statistics_flags(
    supported_stages: vk::PipelineStageFlags,
) -> vk::QueryPipelineStatisticFlags {
    let mut flags = vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_VERTICES
        | vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::CLIPPING_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::CLIPPING_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::COMPUTE_SHADER_INVOCATIONS;

    if supported_stages.contains(vk::PipelineStageFlags::GEOMETRY_SHADER) {
        flags |= vk::QueryPipelineStatisticFlags::GEOMETRY_SHADER_INVOCATIONS
            | vk::QueryPipelineStatisticFlags::GEOMETRY_SHADER_PRIMITIVES;
    }
    if supported_stages.contains(
        vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER,
    ) {
        flags |= vk::QueryPipelineStatisticFlags::TESSELLATION_CONTROL_SHADER_PATCHES
            | vk::QueryPipelineStatisticFlags::TESSELLATION_EVALUATION_SHADER_INVOCATIONS;
    }

    flags
}

/// Returns true if `queue` can host queries of `kind` on a device with `features`.
pub fn is_kind_supported(
    kind: QueryKind,
    queue: &QueueCapabilities,
    features: &DeviceFeatures,
) -> bool {
    match kind {
        QueryKind::Occlusion if !features.occlusion_query_precise => false,
        QueryKind::PipelineStatistics if !features.pipeline_statistics_query => false,
        kind if kind.is_timestamp_based() => {
            queue.supports_timestamps()
                && (!queue.is_transfer_only() || features.transfer_queue_timestamps)
        }
        _ => queue.is_graphics(),
    }
}

/// Query pools for one hardware queue.
pub struct QueryManager<D: QueryDevice> {
    queue_family_index: u32,
    counter_frequency: u64,
    pools: [Option<QueryPool<D>>; QueryKind::COUNT],
}

impl<D: QueryDevice> QueryManager<D> {
    /// Create a pool for every requested kind the queue supports.
    ///
    /// # Safety
    /// The device must be valid and outlive the manager.
    pub unsafe fn new(
        device: &Arc<D>,
        queue: &QueueCapabilities,
        features: &DeviceFeatures,
        timestamp_period: f32,
        sizes: &QueryPoolSizes,
    ) -> Result<Self> {
        let mut pools: [Option<QueryPool<D>>; QueryKind::COUNT] = Default::default();

        for kind in QueryKind::ALL {
            let requested = sizes.get(kind);
            if requested == 0 {
                continue;
            }
            if !is_kind_supported(kind, queue, features) {
                tracing::debug!(
                    "Queue family {} does not support {} queries",
                    queue.family_index,
                    kind
                );
                continue;
            }

            let pipeline_statistics = if kind == QueryKind::PipelineStatistics {
                pipeline_statistics_flags(queue.supported_stages)
            } else {
                vk::QueryPipelineStatisticFlags::empty()
            };

            pools[kind.index()] = Some(QueryPool::new(
                Arc::clone(device),
                kind,
                requested * kind.slots_per_query(),
                pipeline_statistics,
                features.host_query_reset,
            )?);
        }

        let counter_frequency = if timestamp_period > 0.0 {
            (1_000_000_000.0 / f64::from(timestamp_period)) as u64
        } else {
            0
        };

        Ok(Self {
            queue_family_index: queue.family_index,
            counter_frequency,
            pools,
        })
    }

    /// Queue family this manager serves.
    pub const fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Timestamp ticks per second.
    pub const fn counter_frequency(&self) -> u64 {
        self.counter_frequency
    }

    /// Pool for a kind, if the queue supports it.
    pub fn pool(&self, kind: QueryKind) -> Option<&QueryPool<D>> {
        self.pools[kind.index()].as_ref()
    }

    /// Whether the pools reset from the host, so resets record no commands.
    pub fn uses_host_reset(&self) -> bool {
        self.pools.iter().flatten().any(QueryPool::uses_host_reset)
    }

    /// Native pool handle for a kind.
    pub fn query_pool(&self, kind: QueryKind) -> Option<vk::QueryPool> {
        self.pool(kind).map(QueryPool::handle)
    }

    /// Allocate a query slot. Returns `None` when the pool is exhausted.
    ///
    /// Allocating a kind the queue does not support is a usage error.
    pub fn allocate_query(&self, kind: QueryKind) -> Option<u32> {
        let pool = self.pool(kind);
        debug_assert!(
            pool.is_some(),
            "{kind} queries are not supported by queue family {}",
            self.queue_family_index
        );
        pool?.allocate()
    }

    /// Return a query slot to its pool.
    pub fn discard_query(&self, kind: QueryKind, index: u32) {
        let pool = self.pool(kind);
        debug_assert!(
            pool.is_some(),
            "{kind} queries are not supported by queue family {}",
            self.queue_family_index
        );
        if let Some(pool) = pool {
            pool.discard(index);
        }
    }

    /// Reset stale slots of every pool. Returns the number of reset operations issued.
    ///
    /// # Safety
    /// Without host reset, `cmd` must be recording and outside of a render pass. Only the
    /// thread that records submissions for this queue may call this.
    pub unsafe fn reset_stale_queries(&self, cmd: vk::CommandBuffer) -> u32 {
        self.pools
            .iter()
            .flatten()
            .map(|pool| pool.reset_stale_queries(cmd))
            .sum()
    }
}

impl<D: QueryDevice> Drop for QueryManager<D> {
    fn drop(&mut self) {
        let mut usage = String::new();
        for pool in self.pools.iter().flatten() {
            let _ = write!(
                usage,
                " {} {}/{};",
                pool.kind(),
                pool.max_allocated(),
                pool.query_count()
            );
        }
        if !usage.is_empty() {
            tracing::info!(
                "Queue family {} peak query usage:{}",
                self.queue_family_index,
                usage.trim_end_matches(';')
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_pool::mock::{Call, MockDevice};
    use std::collections::HashSet;

    fn graphics_queue() -> QueueCapabilities {
        QueueCapabilities::new(
            0,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            64,
            &DeviceFeatures::all(),
        )
    }

    fn manager(
        device: &Arc<MockDevice>,
        queue: &QueueCapabilities,
        features: &DeviceFeatures,
        sizes: &QueryPoolSizes,
    ) -> QueryManager<MockDevice> {
        unsafe { QueryManager::new(device, queue, features, 1.0, sizes) }.unwrap()
    }

    #[test]
    fn default_sizes() {
        let sizes = QueryPoolSizes::default();
        assert_eq!(sizes.get(QueryKind::Timestamp), 512);
        assert_eq!(sizes.get(QueryKind::Duration), 256);
        assert_eq!(sizes.with(QueryKind::Occlusion, 4).occlusion, 4);
    }

    #[test]
    fn sizes_from_toml() {
        let sizes: QueryPoolSizes = toml::from_str("timestamp = 64\nduration = 0\n").unwrap();
        assert_eq!(sizes.timestamp, 64);
        assert_eq!(sizes.duration, 0);
        assert_eq!(sizes.occlusion, 128);
    }

    #[test]
    fn graphics_queue_creates_every_kind() {
        let device = MockDevice::new();
        let manager = manager(
            &device,
            &graphics_queue(),
            &DeviceFeatures::all(),
            &QueryPoolSizes::default(),
        );

        for kind in QueryKind::ALL {
            assert!(manager.pool(kind).is_some(), "missing {kind} pool");
        }
        assert_eq!(device.created().len(), QueryKind::COUNT);
    }

    #[test]
    fn duration_pool_is_doubled() {
        let device = MockDevice::new();
        let sizes = QueryPoolSizes::none().with(QueryKind::Duration, 10);
        let manager = manager(&device, &graphics_queue(), &DeviceFeatures::all(), &sizes);

        assert_eq!(manager.pool(QueryKind::Duration).unwrap().query_count(), 20);
        assert!(manager.pool(QueryKind::Timestamp).is_none());
    }

    #[test]
    fn transfer_queue_without_timestamp_support() {
        let features = DeviceFeatures {
            transfer_queue_timestamps: false,
            ..DeviceFeatures::all()
        };
        let queue = QueueCapabilities::new(2, vk::QueueFlags::TRANSFER, 64, &features);
        let device = MockDevice::new();
        let manager = manager(&device, &queue, &features, &QueryPoolSizes::default());

        for kind in QueryKind::ALL {
            assert!(manager.pool(kind).is_none(), "unexpected {kind} pool");
        }
        assert!(device.created().is_empty());
    }

    #[test]
    fn transfer_queue_with_timestamp_support() {
        let features = DeviceFeatures::all();
        let queue = QueueCapabilities::new(2, vk::QueueFlags::TRANSFER, 64, &features);
        let device = MockDevice::new();
        let manager = manager(&device, &queue, &features, &QueryPoolSizes::default());

        assert!(manager.pool(QueryKind::Timestamp).is_some());
        assert!(manager.pool(QueryKind::Duration).is_some());
        assert!(manager.pool(QueryKind::Occlusion).is_none());
        assert!(manager.pool(QueryKind::BinaryOcclusion).is_none());
        assert!(manager.pool(QueryKind::PipelineStatistics).is_none());
    }

    #[test]
    fn queue_without_timestamp_bits() {
        let features = DeviceFeatures::all();
        let queue = QueueCapabilities::new(
            1,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            0,
            &features,
        );
        let device = MockDevice::new();
        let manager = manager(&device, &queue, &features, &QueryPoolSizes::default());
        assert!(device.created().is_empty());
        assert_eq!(manager.query_pool(QueryKind::Timestamp), None);
    }

    #[test]
    fn device_features_filter_kinds() {
        let features = DeviceFeatures {
            occlusion_query_precise: false,
            pipeline_statistics_query: false,
            ..DeviceFeatures::all()
        };
        let device = MockDevice::new();
        let manager = manager(&device, &graphics_queue(), &features, &QueryPoolSizes::default());

        assert!(manager.pool(QueryKind::Occlusion).is_none());
        assert!(manager.pool(QueryKind::PipelineStatistics).is_none());
        assert!(manager.pool(QueryKind::BinaryOcclusion).is_some());
    }

    #[test]
    fn pipeline_statistics_follow_queue_stages() {
        let features = DeviceFeatures {
            geometry_shader: false,
            ..DeviceFeatures::all()
        };
        let queue = QueueCapabilities::new(0, vk::QueueFlags::GRAPHICS, 64, &features);
        let device = MockDevice::new();
        let sizes = QueryPoolSizes::none().with(QueryKind::PipelineStatistics, 8);
        let _manager = manager(&device, &queue, &DeviceFeatures::all(), &sizes);

        let created = device.created();
        let [Call::Create {
            pipeline_statistics,
            query_type,
            ..
        }] = created.as_slice()
        else {
            panic!("expected one pool");
        };
        assert_eq!(*query_type, vk::QueryType::PIPELINE_STATISTICS);
        assert!(!pipeline_statistics
            .contains(vk::QueryPipelineStatisticFlags::GEOMETRY_SHADER_INVOCATIONS));
        assert!(pipeline_statistics
            .contains(vk::QueryPipelineStatisticFlags::TESSELLATION_CONTROL_SHADER_PATCHES));
        assert!(pipeline_statistics
            .contains(vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS));
    }

    #[test]
    fn counter_frequency_from_period() {
        let device = MockDevice::new();
        let manager = unsafe {
            QueryManager::new(
                &device,
                &graphics_queue(),
                &DeviceFeatures::all(),
                0.5,
                &QueryPoolSizes::none(),
            )
        }
        .unwrap();
        assert_eq!(manager.counter_frequency(), 2_000_000_000);
    }

    #[test]
    fn occlusion_round_trip() {
        let device = MockDevice::new();
        let features = DeviceFeatures {
            host_query_reset: false,
            ..DeviceFeatures::all()
        };
        let sizes = QueryPoolSizes::none().with(QueryKind::Occlusion, 4);
        let manager = manager(&device, &graphics_queue(), &features, &sizes);
        let cmd = vk::CommandBuffer::null();

        // Fresh slots need a reset before first use.
        assert_eq!(manager.allocate_query(QueryKind::Occlusion), None);
        assert_eq!(unsafe { manager.reset_stale_queries(cmd) }, 1);

        let indices: Vec<u32> = (0..4)
            .map(|_| manager.allocate_query(QueryKind::Occlusion).unwrap())
            .collect();
        assert_eq!(indices.iter().collect::<HashSet<_>>().len(), 4);
        assert_eq!(manager.allocate_query(QueryKind::Occlusion), None);

        manager.discard_query(QueryKind::Occlusion, indices[2]);
        device.clear();
        assert_eq!(unsafe { manager.reset_stale_queries(cmd) }, 1);
        assert!(matches!(
            device.calls()[..],
            [Call::CmdReset { count: 1, .. }]
        ));
        assert_eq!(manager.allocate_query(QueryKind::Occlusion), Some(indices[2]));

        for index in indices {
            manager.discard_query(QueryKind::Occlusion, index);
        }
    }

    #[test]
    fn concurrent_allocate_and_discard() {
        let device = MockDevice::new();
        let sizes = QueryPoolSizes::none().with(QueryKind::Timestamp, 64);
        let manager = manager(&device, &graphics_queue(), &DeviceFeatures::all(), &sizes);
        unsafe { manager.reset_stale_queries(vk::CommandBuffer::null()) };

        let allocated: Vec<Vec<u32>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        (0..16)
                            .filter_map(|_| manager.allocate_query(QueryKind::Timestamp))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<u32> = allocated.iter().flatten().copied().collect();
        assert_eq!(unique.len(), 64);

        std::thread::scope(|scope| {
            for indices in &allocated {
                let manager = &manager;
                scope.spawn(move || {
                    for &index in indices {
                        manager.discard_query(QueryKind::Timestamp, index);
                    }
                });
            }
        });

        let stats = manager.pool(QueryKind::Timestamp).unwrap().stats();
        assert_eq!(stats.stale, 64);
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.max_allocated, 64);
    }

    #[test]
    fn manager_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QueryManager<MockDevice>>();
        assert_send_sync::<QueryManager<ash::Device>>();
    }
}
