//! Host Reference Backend
//!
//! Runs kernels on the CPU. Every `@compute` entry point of the program must
//! have a Rust implementation registered under the same name; the program
//! fails to build otherwise, mirroring a device compiler rejecting a source
//! with an unresolved function.
//!
//! Memory is plain byte storage behind a mutex, so cloned handles alias the
//! same bytes the way an interop buffer's graphics and compute handles do.
//!
//! ```rust,ignore
//! let backend = HostBackend::new().with_kernel("scale", |launch: &HostLaunch<'_>| {
//!     let mut data = launch.load::<f32>(0)?;
//!     let factor = launch.value::<f32>(1)?;
//!     for x in data.iter_mut().take(launch.range()) {
//!         *x *= factor;
//!     }
//!     launch.store(0, &data)
//! });
//! ```

use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{ComputeBackend, DeviceInfo, KernelArg, MemoryKind};
use crate::errors::{ComputeError, Result};
use crate::program::{KernelSignature, ProgramLayout, SlotKind};

/// Host implementation of one entry point. Called once per dispatch.
pub type HostKernelFn = Arc<dyn Fn(&HostLaunch<'_>) -> Result<()> + Send + Sync>;

/// Byte storage of the host backend.
#[derive(Debug, Clone)]
pub struct HostMemory {
    bytes: Arc<Mutex<Vec<u8>>>,
    kind: MemoryKind,
}

impl HostMemory {
    fn new(size: usize, kind: MemoryKind) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0; size])),
            kind,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the raw bytes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Contents reinterpreted as `T`. Trailing bytes that do not form a
    /// whole element are ignored.
    #[must_use]
    pub fn to_vec<T: Pod>(&self) -> Vec<T> {
        decode(&self.bytes.lock())
    }

    /// Whether two handles refer to the same storage.
    #[must_use]
    pub fn same_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

fn decode<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Arguments of one host dispatch.
pub struct HostLaunch<'a> {
    kernel: &'a str,
    range: u32,
    args: &'a [KernelArg<'a, HostMemory>],
}

impl HostLaunch<'_> {
    /// Number of work-items requested.
    #[must_use]
    pub fn range(&self) -> usize {
        self.range as usize
    }

    fn arg(&self, slot: u32) -> Result<&KernelArg<'_, HostMemory>> {
        self.args
            .iter()
            .find(|arg| arg.slot == slot)
            .ok_or_else(|| ComputeError::UnboundSlot {
                kernel: self.kernel.to_string(),
                slot,
            })
    }

    /// Contents of the buffer bound at `slot`.
    pub fn load<T: Pod>(&self, slot: u32) -> Result<Vec<T>> {
        Ok(self.arg(slot)?.memory.to_vec())
    }

    /// Value bound at `slot`.
    pub fn value<T: Pod>(&self, slot: u32) -> Result<T> {
        let arg = self.arg(slot)?;
        let bytes = arg.memory.bytes.lock();
        if bytes.len() < size_of::<T>() {
            return Err(ComputeError::ValueSizeMismatch {
                kernel: self.kernel.to_string(),
                slot,
                expected: bytes.len() as u32,
                found: size_of::<T>(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size_of::<T>()]))
    }

    /// Overwrites the front of the buffer bound at `slot` with `values`.
    pub fn store<T: Pod>(&self, slot: u32, values: &[T]) -> Result<()> {
        let arg = self.arg(slot)?;
        if !matches!(arg.kind, SlotKind::Buffer { read_only: false }) {
            return Err(ComputeError::Backend(format!(
                "kernel '{}' stored to slot {slot}, which is not a writable buffer",
                self.kernel
            )));
        }

        let src: &[u8] = bytemuck::cast_slice(values);
        let mut bytes = arg.memory.bytes.lock();
        if src.len() > bytes.len() {
            return Err(ComputeError::Backend(format!(
                "kernel '{}' stored {} bytes into a {}-byte buffer at slot {slot}",
                self.kernel,
                src.len(),
                bytes.len()
            )));
        }
        bytes[..src.len()].copy_from_slice(src);
        Ok(())
    }
}

/// Launchable host entry point.
#[derive(Clone)]
pub struct HostEntry {
    name: String,
    run: HostKernelFn,
}

impl std::fmt::Debug for HostEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEntry").field("name", &self.name).finish()
    }
}

/// CPU backend. Interop-capable when built with [`HostBackend::with_interop`],
/// in which case the caller itself plays the graphics side.
pub struct HostBackend {
    kernels: FxHashMap<String, HostKernelFn>,
    interop: bool,
    reject_sync: bool,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    /// Compute-only host backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            kernels: FxHashMap::default(),
            interop: false,
            reject_sync: false,
        }
    }

    /// Host backend that accepts interop buffers.
    #[must_use]
    pub fn with_interop() -> Self {
        Self {
            interop: true,
            ..Self::new()
        }
    }

    /// Registers the implementation of entry point `name`.
    #[must_use]
    pub fn with_kernel<F>(mut self, name: &str, run: F) -> Self
    where
        F: Fn(&HostLaunch<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.kernels.insert(name.to_string(), Arc::new(run));
        self
    }

    /// Makes every following acquire/release fail, the way a driver that
    /// lost its shared context would.
    pub fn set_reject_sync(&mut self, reject: bool) {
        self.reject_sync = reject;
    }

    fn check_sync(&self, op: &str, memories: &[&HostMemory]) -> Result<()> {
        if !self.interop {
            return Err(ComputeError::InteropSync(format!(
                "{op}: host backend was created without interop"
            )));
        }
        if self.reject_sync {
            return Err(ComputeError::InteropSync(format!(
                "{op} of {} buffer(s) rejected",
                memories.len()
            )));
        }
        if let Some(memory) = memories
            .iter()
            .find(|m| !matches!(m.kind, MemoryKind::Interop(_)))
        {
            return Err(ComputeError::InteropSync(format!(
                "{op}: memory of kind {:?} is not shared",
                memory.kind
            )));
        }
        Ok(())
    }
}

fn bounds(memory: &[u8], offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
    let start = offset as usize;
    let end = start.saturating_add(len);
    if end > memory.len() {
        return Err(ComputeError::Backend(format!(
            "access {start}..{end} outside {}-byte allocation",
            memory.len()
        )));
    }
    Ok(start..end)
}

impl ComputeBackend for HostBackend {
    type Program = FxHashMap<String, HostKernelFn>;
    type Entry = HostEntry;
    type Memory = HostMemory;

    const COPY_ALIGNMENT: u64 = 1;

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "host".to_string(),
            backend: "cpu".to_string(),
            device_type: if self.interop { "interop" } else { "compute" }.to_string(),
        }
    }

    fn supports_interop(&self) -> bool {
        self.interop
    }

    fn compile(&mut self, _source: &str, layout: &ProgramLayout) -> Result<Self::Program> {
        let mut missing: Vec<&str> = layout
            .entry_names()
            .filter(|name| !self.kernels.contains_key(*name))
            .collect();

        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(ComputeError::Compile {
                log: missing
                    .iter()
                    .map(|name| format!("error: entry point '{name}' has no host implementation"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            });
        }

        Ok(layout
            .entry_names()
            .map(|name| (name.to_string(), Arc::clone(&self.kernels[name])))
            .collect())
    }

    fn create_entry(
        &mut self,
        program: &Self::Program,
        name: &str,
        _signature: &KernelSignature,
    ) -> Result<Self::Entry> {
        let run = program
            .get(name)
            .ok_or_else(|| ComputeError::UnknownEntryPoint(name.to_string()))?;
        Ok(HostEntry {
            name: name.to_string(),
            run: Arc::clone(run),
        })
    }

    fn create_memory(
        &mut self,
        _label: &str,
        size: u64,
        kind: MemoryKind,
        contents: Option<&[u8]>,
    ) -> Result<Self::Memory> {
        let memory = HostMemory::new(size as usize, kind);
        if let Some(bytes) = contents {
            let mut storage = memory.bytes.lock();
            let range = bounds(&storage, 0, bytes.len())?;
            storage[range].copy_from_slice(bytes);
        }
        Ok(memory)
    }

    fn fill(
        &mut self,
        memory: &Self::Memory,
        offset: u64,
        pattern: &[u8],
        count: usize,
    ) -> Result<()> {
        if pattern.is_empty() {
            return Ok(());
        }
        let mut storage = memory.bytes.lock();
        let range = bounds(&storage, offset, pattern.len() * count)?;
        for chunk in storage[range].chunks_exact_mut(pattern.len()) {
            chunk.copy_from_slice(pattern);
        }
        Ok(())
    }

    fn write(&mut self, memory: &Self::Memory, offset: u64, data: &[u8]) -> Result<()> {
        let mut storage = memory.bytes.lock();
        let range = bounds(&storage, offset, data.len())?;
        storage[range].copy_from_slice(data);
        Ok(())
    }

    fn read(&mut self, memory: &Self::Memory, offset: u64, out: &mut [u8]) -> Result<()> {
        let storage = memory.bytes.lock();
        let range = bounds(&storage, offset, out.len())?;
        out.copy_from_slice(&storage[range]);
        Ok(())
    }

    fn dispatch(
        &mut self,
        entry: &Self::Entry,
        range: u32,
        args: &[KernelArg<'_, Self::Memory>],
    ) -> Result<()> {
        if range == 0 {
            return Err(ComputeError::InvalidRange {
                kernel: entry.name.clone(),
                range,
                reason: "range must be at least 1".to_string(),
            });
        }

        let launch = HostLaunch {
            kernel: &entry.name,
            range,
            args,
        };
        (entry.run)(&launch)
    }

    fn acquire_shared(&mut self, memories: &[&Self::Memory]) -> Result<()> {
        self.check_sync("acquire", memories)
    }

    fn release_shared(&mut self, memories: &[&Self::Memory]) -> Result<()> {
        self.check_sync("release", memories)
    }
}
