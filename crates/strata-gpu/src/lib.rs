//! Vulkan backend for Strata.
//!
//! This crate provides:
//! - Per-queue query pools with lock-protected slot recycling
//! - Device and queue capability detection
//! - Descriptor set and pipeline layouts for resolved resource signatures
//! - Headless instance and device setup behind a single-device factory
//! - Command buffer and fence helpers

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod query_manager;
pub mod query_pool;
pub mod sync;

pub use capabilities::{
    supported_stages, DeviceFeatures, GpuCapabilities, GpuVendor, QueueCapabilities,
};
pub use command::{CommandPool, CommandState};
pub use context::{DeviceFactory, GpuContext, GpuContextBuilder};
pub use descriptors::{
    descriptor_type_to_vk, shader_stages_to_vk, DescriptorSetLayoutBuilder, SignatureSetLayouts,
};
pub use error::{GpuError, Result};
pub use pipeline::PipelineLayout;
pub use query_manager::{pipeline_statistics_flags, QueryManager, QueryPoolSizes};
pub use query_pool::{QueryDevice, QueryPool, QueryPoolStats};
pub use sync::{create_fence, destroy_fence, reset_fence, wait_for_fence};
