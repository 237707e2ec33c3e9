//! Device Selection Settings
//!
//! [`ComputeSettings`] configures how the compute-only wgpu backend picks an
//! adapter and which device features/limits it asks for. Interop contexts
//! adopt the graphics backend's device and ignore these settings.
//!
//! ```rust,ignore
//! use compute_manager::{ComputeContext, ComputeSettings};
//!
//! // Default: first high-performance adapter, default limits
//! let ctx = ComputeContext::init(&source, &ComputeSettings::default())?;
//!
//! // Force the software adapter (CI machines without a GPU)
//! let settings = ComputeSettings {
//!     force_fallback_adapter: true,
//!     ..Default::default()
//! };
//! ```

/// Adapter and device configuration for [`WgpuBackend`](crate::backend::WgpuBackend).
#[derive(Debug, Clone)]
pub struct ComputeSettings {
    /// Adapter preference when several devices are present.
    pub power_preference: wgpu::PowerPreference,
    /// Only accept the software fallback adapter.
    pub force_fallback_adapter: bool,
    /// Features the device must support.
    pub required_features: wgpu::Features,
    /// Limits the device must support. The dispatcher reads
    /// `max_compute_workgroups_per_dimension` from the granted limits.
    pub required_limits: wgpu::Limits,
    /// Debug label attached to the device.
    pub label: Option<String>,
}

impl Default for ComputeSettings {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            label: Some("Compute Device".to_string()),
        }
    }
}

impl ComputeSettings {
    /// Settings that accept the lowest-common-denominator limits, for
    /// software rasterizers and older integrated GPUs.
    #[must_use]
    pub fn downlevel() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::LowPower,
            required_limits: wgpu::Limits::downlevel_defaults(),
            ..Default::default()
        }
    }
}
