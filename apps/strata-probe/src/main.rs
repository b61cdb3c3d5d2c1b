//! Strata Probe
//!
//! Resolves a few demo resource signatures into binding tables, then opens a headless
//! Vulkan device, reports its query support and measures GPU timestamps through the
//! per-queue query managers.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p strata-probe -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-c, --config <PATH>`: TOML settings file (see `config.rs` for fields)
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod bindings;
mod config;

use std::path::PathBuf;
use std::slice;

use anyhow::{bail, Result};
use ash::vk;
use strata_core::QueryKind;
use strata_gpu::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use strata_gpu::{
    create_fence, destroy_fence, reset_fence, wait_for_fence, CommandPool, CommandState,
    DeviceFactory, GpuContext, GpuContextBuilder, QueryManager,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ProbeConfig;

const FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    init_logging();

    let config = ProbeConfig::load(config_path()?.as_deref())?;

    let (graphics, _compute) = bindings::resolve_demo_pipelines()?;

    let factory = DeviceFactory::new();
    let ctx = match factory.create_context(
        GpuContextBuilder::new()
            .app_name(config.app_name.clone())
            .validation(config.validation)
            .query_pool_sizes(config.query_pool_sizes),
    ) {
        Ok(ctx) => ctx,
        Err(err) => {
            warn!("No usable Vulkan device, skipping GPU probes: {err}");
            return Ok(());
        }
    };

    info!("GPU: {}", ctx.capabilities().summary());
    report_query_support(&ctx);

    bindings::create_native_layouts(&ctx, &graphics)?;

    let family = ctx.graphics_queue_family();
    let Some(queries) = ctx.query_manager(family) else {
        bail!("No query manager for graphics queue family {family}");
    };
    if queries.pool(QueryKind::Timestamp).is_none() {
        warn!("Graphics queue does not support timestamps");
        return Ok(());
    }

    unsafe { measure_timestamps(&ctx, queries, config.iterations)? };

    for manager in ctx.query_managers() {
        for kind in QueryKind::ALL {
            if let Some(pool) = manager.pool(kind) {
                let stats = pool.stats();
                info!(
                    "Queue family {}: {kind} pool peak usage {}/{}",
                    manager.queue_family_index(),
                    stats.max_allocated,
                    stats.query_count
                );
            }
        }
    }

    Ok(())
}

fn init_logging() {
    #[cfg(feature = "profiling-tracy")]
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,strata_gpu=trace,strata_binding=trace,strata_probe=trace")
        });
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }
    #[cfg(not(feature = "profiling-tracy"))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }
}

/// Value following `-c`/`--config`, if present.
fn config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-c" || arg == "--config" {
            let Some(path) = args.next() else {
                bail!("{arg} requires a path");
            };
            return Ok(Some(PathBuf::from(path)));
        }
    }
    Ok(None)
}

fn report_query_support(ctx: &GpuContext) {
    for manager in ctx.query_managers() {
        let supported: Vec<&str> = QueryKind::ALL
            .into_iter()
            .filter(|kind| manager.pool(*kind).is_some())
            .map(QueryKind::name)
            .collect();
        info!(
            "Queue family {} supports queries: [{}] (counter frequency {} Hz)",
            manager.queue_family_index(),
            supported.join(", "),
            manager.counter_frequency()
        );
    }
}

/// Record begin/end timestamps around an empty command buffer and log the elapsed time.
///
/// # Safety
/// `queries` must belong to the graphics queue family of `ctx`.
unsafe fn measure_timestamps(
    ctx: &GpuContext,
    queries: &QueryManager<ash::Device>,
    iterations: u32,
) -> Result<()> {
    let device = ctx.device();
    let cmd_pool = CommandPool::new(
        device,
        ctx.graphics_queue_family(),
        vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
    )?;
    let fence = match create_fence(device, false) {
        Ok(fence) => fence,
        Err(err) => {
            cmd_pool.destroy(device);
            return Err(err.into());
        }
    };

    let result = (|| -> Result<()> {
        let cmd = cmd_pool.allocate_command_buffer(device, vk::CommandBufferLevel::PRIMARY)?;
        for iteration in 0..iterations {
            let elapsed = timestamp_round_trip(ctx, queries, cmd, fence)?;
            info!("Timestamp round trip {iteration}: {elapsed:.0} ns");
        }
        Ok(())
    })();

    destroy_fence(device, fence);
    cmd_pool.destroy(device);
    result
}

unsafe fn timestamp_round_trip(
    ctx: &GpuContext,
    queries: &QueryManager<ash::Device>,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
) -> Result<f64> {
    let device = ctx.device();
    let Some(pool) = queries.query_pool(QueryKind::Timestamp) else {
        bail!("Timestamp queries are not supported");
    };

    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    let mut state = CommandState::new(cmd);
    let resets = state.reset_stale_queries(queries)?;
    tracing::debug!("Recorded {resets} query pool resets");

    let Some(begin) = queries.allocate_query(QueryKind::Timestamp) else {
        end_command_buffer(device, cmd)?;
        bail!("Timestamp pool exhausted");
    };
    let Some(end) = queries.allocate_query(QueryKind::Timestamp) else {
        queries.discard_query(QueryKind::Timestamp, begin);
        end_command_buffer(device, cmd)?;
        bail!("Timestamp pool exhausted");
    };

    device.cmd_write_timestamp(cmd, vk::PipelineStageFlags::TOP_OF_PIPE, pool, begin);
    state.record_command();
    device.cmd_write_timestamp(cmd, vk::PipelineStageFlags::BOTTOM_OF_PIPE, pool, end);
    state.record_command();

    let submitted = (|| -> Result<(u64, u64)> {
        end_command_buffer(device, cmd)?;
        submit_command_buffers(device, ctx.graphics_queue(), &[cmd], &[], &[], &[], fence)?;
        wait_for_fence(device, fence, FENCE_TIMEOUT_NS)?;
        reset_fence(device, fence)?;

        let flags = vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT;
        let mut begin_ticks = 0u64;
        let mut end_ticks = 0u64;
        device.get_query_pool_results(pool, begin, slice::from_mut(&mut begin_ticks), flags)?;
        device.get_query_pool_results(pool, end, slice::from_mut(&mut end_ticks), flags)?;
        Ok((begin_ticks, end_ticks))
    })();

    queries.discard_query(QueryKind::Timestamp, begin);
    queries.discard_query(QueryKind::Timestamp, end);
    let (begin_ticks, end_ticks) = submitted?;

    let valid_bits = ctx
        .capabilities()
        .queue(ctx.graphics_queue_family())
        .map_or(64, |queue| queue.timestamp_valid_bits);
    let mask = if valid_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << valid_bits) - 1
    };
    let ticks = end_ticks.wrapping_sub(begin_ticks) & mask;

    #[allow(clippy::cast_precision_loss)]
    Ok(ticks as f64 * 1e9 / queries.counter_frequency().max(1) as f64)
}

fn print_help() {
    eprintln!(
        "Strata Probe

USAGE:
    cargo run -p strata-probe -- [OPTIONS]

OPTIONS:
    -c, --config <PATH>     TOML settings file
                            Fields: app_name, validation, iterations,
                            [query_pool_sizes] occlusion, binary_occlusion,
                            timestamp, pipeline_statistics, duration
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
