//! Compute Backends
//!
//! The registries, the interop protocol and the dispatcher are written
//! against [`ComputeBackend`]. A backend owns the bound device, its context
//! and its single in-order queue, and provides the primitive operations:
//! program build, entry-point creation, memory allocation and transfer,
//! kernel launch and shared-memory acquire/release.
//!
//! Two implementations ship:
//! - [`WgpuBackend`]: the GPU backend. Compute-only, or sharing a device with
//!   a wgpu renderer for interop.
//! - [`HostBackend`]: a CPU reference backend whose entry points are Rust
//!   closures. Used for deterministic tests and headless tooling.

mod gpu;
mod host;

use std::fmt;

pub use gpu::{GraphicsHandle, WgpuBackend, WgpuEntry};
pub use host::{HostBackend, HostEntry, HostKernelFn, HostLaunch, HostMemory};

use crate::errors::Result;
use crate::program::{KernelSignature, ProgramLayout, SlotKind};

/// Human-readable description of the bound device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: String,
    pub device_type: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.backend, self.device_type)
    }
}

/// Graphics-pipeline role of an interop buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsTarget {
    /// Bound as a vertex buffer.
    Vertex,
    /// Bound as an index buffer.
    Index,
    /// Bound as a uniform block.
    Uniform,
    /// Bound as a shader storage block, with no vertex layout attached.
    Storage,
}

/// Allocation class requested from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Compute-only storage.
    Device,
    /// Storage shared with the graphics backend.
    Interop(GraphicsTarget),
    /// Backing store of a value parameter.
    Value,
}

/// One bound parameter handed to [`ComputeBackend::dispatch`].
#[derive(Debug)]
pub struct KernelArg<'a, M> {
    pub slot: u32,
    pub kind: SlotKind,
    pub memory: &'a M,
}

/// Primitive operations of a compute device.
///
/// All operations are issued on one in-order queue: a read observes every
/// write, fill and dispatch issued before it.
pub trait ComputeBackend {
    /// Executable form of a whole program.
    type Program;
    /// Executable form of a single entry point.
    type Entry;
    /// Handle to device memory. Cloning yields another handle to the same
    /// storage.
    type Memory: Clone;

    /// Byte granularity of writes and fills.
    const COPY_ALIGNMENT: u64;

    fn device_info(&self) -> DeviceInfo;

    /// Whether memory can be shared with a graphics backend.
    fn supports_interop(&self) -> bool;

    /// Builds a validated source blob.
    fn compile(&mut self, source: &str, layout: &ProgramLayout) -> Result<Self::Program>;

    /// Creates the launchable form of entry point `name`.
    fn create_entry(
        &mut self,
        program: &Self::Program,
        name: &str,
        signature: &KernelSignature,
    ) -> Result<Self::Entry>;

    /// Allocates `size` bytes, optionally initialized from `contents`.
    fn create_memory(
        &mut self,
        label: &str,
        size: u64,
        kind: MemoryKind,
        contents: Option<&[u8]>,
    ) -> Result<Self::Memory>;

    /// Writes `pattern` `count` times starting at byte `offset`.
    fn fill(&mut self, memory: &Self::Memory, offset: u64, pattern: &[u8], count: usize)
    -> Result<()>;

    /// Writes `data` at byte `offset`.
    fn write(&mut self, memory: &Self::Memory, offset: u64, data: &[u8]) -> Result<()>;

    /// Reads `out.len()` bytes at byte `offset`. Blocks until every
    /// previously queued operation has completed.
    fn read(&mut self, memory: &Self::Memory, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Launches `entry` over `range` work-items with `args` bound.
    fn dispatch(
        &mut self,
        entry: &Self::Entry,
        range: u32,
        args: &[KernelArg<'_, Self::Memory>],
    ) -> Result<()>;

    /// Makes shared memory accessible to compute.
    fn acquire_shared(&mut self, memories: &[&Self::Memory]) -> Result<()>;

    /// Hands shared memory back to the graphics backend.
    fn release_shared(&mut self, memories: &[&Self::Memory]) -> Result<()>;
}
