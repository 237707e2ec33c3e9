use glam::{Mat4, Vec2, Vec3};

const HOME: Vec2 = Vec2::new(-0.5, 0.0);
/// World-space half height of the view at zoom 1.
const HALF_EXTENT: f32 = 1.25;
const MIN_ZOOM: f32 = 0.25;
const MAX_ZOOM: f32 = 1.0e5;

/// Orthographic 2D camera over the complex plane.
#[derive(Debug, Clone)]
pub struct Camera2D {
    position: Vec2,
    zoom: f32,
    aspect: f32,
}

impl Camera2D {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let mut camera = Self {
            position: HOME,
            zoom: 1.0,
            aspect: 1.0,
        };
        camera.set_aspect_ratio(width, height);
        camera
    }

    pub fn set_aspect_ratio(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Pans by `delta` in screen units; panning slows as the view zooms in.
    pub fn update_position(&mut self, delta: Vec2) {
        self.position += delta * HALF_EXTENT / self.zoom;
    }

    /// Multiplies the zoom by `factor`.
    pub fn update_view(&mut self, factor: f32) {
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn reset(&mut self) {
        self.position = HOME;
        self.zoom = 1.0;
    }

    /// Maps normalized device coordinates (-1..1 on both axes) to the
    /// complex plane.
    #[must_use]
    pub fn screen_to_world(&self) -> Mat4 {
        let half = HALF_EXTENT / self.zoom;
        Mat4::from_translation(self.position.extend(0.0))
            * Mat4::from_scale(Vec3::new(half * self.aspect, half, 1.0))
    }
}
