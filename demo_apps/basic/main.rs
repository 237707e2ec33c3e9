//! Two-Buffer Pipeline
//!
//! Fills two buffers with 1.0 and 2.0, runs `addBuffers`
//! (`a = (a + b) * MAGIC_NUMBER`, `b = TEST_DEFINITION`) and then
//! `mulBuffers` (`a = a * b`), reading results back after each launch.
//!
//! Expected output: `30` then `370350`.

use compute_manager::{ComputeContext, ComputeSettings, KernelSource, LAUNCH_RANGE};

const KERNELS: &str = include_str!("kernels.wgsl");

/// Work-items per launch and elements per buffer.
const N: u32 = 1000;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let source = KernelSource::new()
        .header("// basic demo\n")
        .header(LAUNCH_RANGE)
        .define("MAGIC_NUMBER", "10.0")
        .define("TEST_DEFINITION", 12345)
        .fragment(KERNELS)
        .build();

    let mut ctx = ComputeContext::init(&source, &ComputeSettings::default())?;
    log::info!("Running on {}", ctx.device_info());

    // Kernel names must match entry points in kernels.wgsl.
    let add = ctx.create_kernel("addBuffers", Some(N))?;
    let mul = ctx.create_kernel("mulBuffers", Some(N))?;

    let buffer1 = ctx.create_buffer::<f32>("buffer1", N as usize, None)?;
    let buffer2 = ctx.create_buffer::<f32>("buffer2", N as usize, None)?;
    ctx.fill_buffer(buffer1, N as usize, 1.0_f32)?;
    ctx.fill_buffer(buffer2, N as usize, 2.0_f32)?;

    ctx.set_param_buffers(add, 0, &[buffer1, buffer2])?;
    ctx.set_param_buffers(mul, 0, &[buffer1, buffer2])?;

    ctx.run(add)?;
    let values = ctx.read_buffer_vec::<f32>(buffer1, N as usize, 0)?;
    println!("{}", values[0]);

    ctx.run(mul)?;
    let mut single = [0.0_f32];
    ctx.read_buffer(buffer1, &mut single, 10)?;
    println!("{}", single[0]);

    Ok(())
}
