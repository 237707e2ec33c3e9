//! Compute Context
//!
//! [`ComputeContext`] is the single owner of everything the compute layer
//! manages:
//!
//! - the backend (selected device, context and in-order queue)
//! - the compiled [`Program`]
//! - the kernel registry and the buffer registry
//! - the interop acquire set
//!
//! It is created once by the application and passed by reference to every
//! operation. Registry, buffer, interop and dispatch operations are
//! implemented in their own modules as further `impl ComputeContext` blocks.
//!
//! ```rust,ignore
//! // Compute-only
//! let mut ctx = ComputeContext::init(&source, &ComputeSettings::default())?;
//!
//! // Sharing a renderer's device for interop
//! let mut ctx = ComputeContext::init_shared(&source, GraphicsHandle {
//!     device: renderer.device.clone(),
//!     queue: renderer.queue.clone(),
//!     adapter_info: None,
//! })?;
//! ```

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::backend::{ComputeBackend, DeviceInfo, GraphicsHandle, WgpuBackend};
use crate::buffer::{BufferEntry, BufferId};
use crate::errors::Result;
use crate::interop::InteropSet;
use crate::kernel::{KernelEntry, KernelId};
use crate::program::Program;
use crate::settings::ComputeSettings;

/// Owner of the device binding, the program and all registries.
pub struct ComputeContext<B: ComputeBackend> {
    pub(crate) backend: B,
    pub(crate) program: Program<B::Program>,

    pub(crate) kernels: SlotMap<KernelId, KernelEntry<B>>,
    pub(crate) kernel_names: FxHashMap<String, KernelId>,

    pub(crate) buffers: SlotMap<BufferId, BufferEntry<B::Memory>>,
    pub(crate) buffer_names: FxHashMap<String, BufferId>,

    pub(crate) acquired: InteropSet,
}

impl<B: ComputeBackend> ComputeContext<B> {
    /// Binds `backend` and builds `source` into the program.
    ///
    /// Fails without retaining any state when the program does not build.
    pub fn new(mut backend: B, source: &str) -> Result<Self> {
        let info = backend.device_info();
        log::info!(
            "Compute device: {info}{}",
            if backend.supports_interop() { " [interop]" } else { "" }
        );

        let program = Program::compile(&mut backend, source)?;

        Ok(Self {
            backend,
            program,
            kernels: SlotMap::with_key(),
            kernel_names: FxHashMap::default(),
            buffers: SlotMap::with_key(),
            buffer_names: FxHashMap::default(),
            acquired: InteropSet::default(),
        })
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    #[must_use]
    pub fn program(&self) -> &Program<B::Program> {
        &self.program
    }

    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        self.backend.device_info()
    }

    /// Whether interop buffers can be created on this context.
    #[must_use]
    pub fn supports_interop(&self) -> bool {
        self.backend.supports_interop()
    }
}

impl ComputeContext<WgpuBackend> {
    /// Compute-only initialization: own adapter, device and queue.
    pub fn init(source: &str, settings: &ComputeSettings) -> Result<Self> {
        Self::new(WgpuBackend::new(settings)?, source)
    }

    /// Interop initialization on the graphics backend's device.
    pub fn init_shared(source: &str, graphics: GraphicsHandle) -> Result<Self> {
        Self::new(WgpuBackend::shared(graphics), source)
    }
}

impl<B: ComputeBackend> Drop for ComputeContext<B> {
    fn drop(&mut self) {
        if !self.acquired.is_empty() {
            log::warn!(
                "Compute context dropped with {} interop buffer(s) still acquired",
                self.acquired.len()
            );
        }
    }
}
