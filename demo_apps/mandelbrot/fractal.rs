use compute_manager::{
    BufferId, ComputeContext, GraphicsTarget, KernelId, Result, WgpuBackend,
};
use glam::{UVec2, Vec2};

use crate::camera::Camera2D;
use crate::view::{FrameRenderer, ViewUniforms};

const KERNEL: &str = "mandelbrot";
const ITERATIONS: &str = "texIterations";

const MAX_SUPER_SAMPLING: u32 = 8;
const MAX_ITERATIONS: u32 = 4096;

/// Mandelbrot view state: one interop buffer of iteration counts at
/// `screen * super_sampling` resolution, recomputed only when the view changes.
pub struct Mandelbrot {
    kernel: KernelId,
    iterations: BufferId,
    screen: UVec2,
    super_sampling: u32,
    max_iterations: u32,
    camera: Camera2D,
    dirty: bool,
}

impl Mandelbrot {
    pub fn new(ctx: &mut ComputeContext<WgpuBackend>, width: u32, height: u32) -> Result<Self> {
        let screen = UVec2::new(width, height);
        let kernel = ctx.create_kernel(KERNEL, None)?;
        let iterations = ctx.create_interop_buffer::<u32>(
            ITERATIONS,
            GraphicsTarget::Storage,
            (screen.x * screen.y) as usize,
        )?;

        Ok(Self {
            kernel,
            iterations,
            screen,
            super_sampling: 1,
            max_iterations: 100,
            camera: Camera2D::new(width, height),
            dirty: true,
        })
    }

    fn tex_size(&self) -> UVec2 {
        self.screen * self.super_sampling
    }

    /// Replaces the iteration buffer to match the current texture size. The
    /// previous buffer leaves the acquire set along with its registration.
    fn create_iteration_buffer(&mut self, ctx: &mut ComputeContext<WgpuBackend>) -> Result<()> {
        let tex = self.tex_size();
        self.iterations = ctx.recreate_interop_buffer::<u32>(
            ITERATIONS,
            GraphicsTarget::Storage,
            (tex.x * tex.y) as usize,
        )?;
        self.dirty = true;
        Ok(())
    }

    pub fn on_resize(&mut self, ctx: &mut ComputeContext<WgpuBackend>, width: u32, height: u32) -> Result<()> {
        self.screen = UVec2::new(width, height);
        self.camera.set_aspect_ratio(width, height);
        self.create_iteration_buffer(ctx)
    }

    pub fn update_super_sampling(&mut self, ctx: &mut ComputeContext<WgpuBackend>, delta: i32) -> Result<()> {
        let next = self
            .super_sampling
            .saturating_add_signed(delta)
            .clamp(1, MAX_SUPER_SAMPLING);
        if next == self.super_sampling {
            return Ok(());
        }
        self.super_sampling = next;
        self.create_iteration_buffer(ctx)
    }

    pub fn update_max_iterations(&mut self, factor: f32) {
        self.max_iterations =
            ((self.max_iterations as f32 * factor) as u32).clamp(1, MAX_ITERATIONS);
        self.dirty = true;
    }

    pub fn update_camera(&mut self, delta_pos: Vec2, zoom_factor: f32) {
        self.camera.update_position(delta_pos);
        self.camera.update_view(zoom_factor);
        self.dirty = true;
    }

    pub fn reset_camera(&mut self) {
        self.camera.reset();
        self.dirty = true;
    }

    #[must_use]
    pub fn camera_zoom(&self) -> f32 {
        self.camera.zoom()
    }

    #[must_use]
    pub fn super_sampling(&self) -> u32 {
        self.super_sampling
    }

    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn request_update(&mut self) {
        self.dirty = true;
    }

    /// Recomputes the iteration counts if the view changed.
    pub fn update(&mut self, ctx: &mut ComputeContext<WgpuBackend>) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let tex = self.tex_size();
        let mut frame = ctx.acquire(&[self.iterations])?;
        frame.set_range(self.kernel, tex.x * tex.y)?;
        frame.set_param_interop_buffers(self.kernel, 0, &[self.iterations])?;
        frame.set_param_value(self.kernel, 1, tex.x)?;
        frame.set_param_value(self.kernel, 2, tex.y)?;
        frame.set_param_value(self.kernel, 3, self.max_iterations)?;
        frame.set_param_value(self.kernel, 4, self.camera.screen_to_world())?;
        frame.run(self.kernel)?;
        frame.release()
    }

    /// Draws the current iteration buffer. Returns `false` when nothing
    /// changed since the last draw.
    pub fn draw(&mut self, ctx: &ComputeContext<WgpuBackend>, renderer: &FrameRenderer) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        let tex = self.tex_size();
        let view = ViewUniforms {
            screen_width: self.screen.x,
            screen_height: self.screen.y,
            tex_width: tex.x,
            super_sampling: self.super_sampling,
            max_iterations: self.max_iterations,
            _pad: [0; 3],
        };
        renderer.draw(ctx.graphics_buffer(self.iterations)?, &view);

        self.dirty = false;
        Ok(true)
    }
}
