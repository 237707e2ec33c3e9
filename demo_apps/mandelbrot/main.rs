//! Mandelbrot (interop)
//!
//! A renderer-owned wgpu device is shared with the compute context. Each
//! frame the compute kernel writes iteration counts into an interop storage
//! buffer, the buffer is released, and a fullscreen-triangle render pass
//! reads it to colour the frame. A scripted sequence of view changes stands
//! in for interactive input; every drawn frame is written out as a PNG.
//!
//! ```text
//! cargo run -p mandelbrot -- [output-dir]
//! ```

mod camera;
mod fractal;
mod view;

use std::path::PathBuf;

use compute_manager::{ComputeContext, GraphicsHandle, KernelSource};
use glam::Vec2;

use fractal::Mandelbrot;
use view::FrameRenderer;

const WIDTH: u32 = 480;
const HEIGHT: u32 = 320;

/// One scripted view change.
#[derive(Debug, Clone, Copy)]
enum Input {
    Idle,
    Pan(Vec2),
    Zoom(f32),
    SuperSampling(i32),
    MaxIterations(f32),
    Resize(u32, u32),
    Reset,
}

const SCRIPT: &[(&str, Input)] = &[
    ("overview", Input::Idle),
    ("unchanged", Input::Idle),
    ("zoom", Input::Zoom(4.0)),
    ("seahorse_valley", Input::Pan(Vec2::new(-0.6, 0.35))),
    ("supersampled", Input::SuperSampling(2)),
    ("detailed", Input::MaxIterations(8.0)),
    ("wide", Input::Resize(640, 320)),
    ("reset", Input::Reset),
];

async fn request_graphics() -> anyhow::Result<GraphicsHandle> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await?;

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("Mandelbrot Device"),
            ..Default::default()
        })
        .await?;

    Ok(GraphicsHandle {
        device,
        queue,
        adapter_info: Some(adapter.get_info()),
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let out_dir = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("."), PathBuf::from);
    std::fs::create_dir_all(&out_dir)?;

    let graphics = pollster::block_on(request_graphics())?;
    let renderer_device = graphics.device.clone();
    let renderer_queue = graphics.queue.clone();

    let source = KernelSource::new()
        .fragment(include_str!("kernels.wgsl"))
        .build();
    let mut ctx = ComputeContext::init_shared(&source, graphics)?;

    let mut renderer = FrameRenderer::new(&renderer_device, &renderer_queue, WIDTH, HEIGHT);
    let mut fractal = Mandelbrot::new(&mut ctx, WIDTH, HEIGHT)?;

    for (index, &(name, input)) in SCRIPT.iter().enumerate() {
        match input {
            Input::Idle => {}
            Input::Pan(delta) => fractal.update_camera(delta, 1.0),
            Input::Zoom(factor) => fractal.update_camera(Vec2::ZERO, factor),
            Input::SuperSampling(delta) => fractal.update_super_sampling(&mut ctx, delta)?,
            Input::MaxIterations(factor) => fractal.update_max_iterations(factor),
            Input::Resize(width, height) => {
                renderer = FrameRenderer::new(&renderer_device, &renderer_queue, width, height);
                fractal.on_resize(&mut ctx, width, height)?;
            }
            Input::Reset => fractal.reset_camera(),
        }

        if let Err(err) = fractal.update(&mut ctx) {
            if err.is_recoverable() {
                log::warn!("Frame {index} ({name}): {err}");
                fractal.request_update();
                continue;
            }
            return Err(err.into());
        }

        if fractal.draw(&ctx, &renderer)? {
            let path = out_dir.join(format!("mandelbrot_{index}_{name}.png"));
            renderer.capture()?.save(&path)?;
            log::info!(
                "Frame {index} ({name}): zoom {:.2}, {}x supersampling, {} iterations -> {}",
                fractal.camera_zoom(),
                fractal.super_sampling(),
                fractal.max_iterations(),
                path.display()
            );
        } else {
            log::info!("Frame {index} ({name}): view unchanged, skipped draw");
        }
    }

    Ok(())
}
