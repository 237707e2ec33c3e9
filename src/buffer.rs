//! Buffer Registry
//!
//! Named device allocations, addressed by [`BufferId`] after creation.
//!
//! A buffer records its element size and element count at creation; every
//! transfer is checked against both before anything reaches the backend:
//!
//! - the element type's size must equal the buffer's element size
//! - `offset + count` must not exceed the element count
//! - writes and fills must land on the backend's copy granularity
//!
//! Interop buffers carry two handles to one storage: the compute-side handle
//! bound into kernels and the graphics-side handle bound into draw calls.

use bytemuck::Pod;
use slotmap::new_key_type;

use crate::backend::{ComputeBackend, GraphicsTarget, MemoryKind};
use crate::context::ComputeContext;
use crate::errors::{ComputeError, Result};

new_key_type! {
    /// Handle to a registered buffer.
    pub struct BufferId;
}

/// Ownership kind of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Only the compute backend uses the storage.
    Device,
    /// Storage allocated for the graphics backend and shared with compute.
    Interop(GraphicsTarget),
}

impl BufferKind {
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Device => "device-only",
            Self::Interop(_) => "interop",
        }
    }
}

pub(crate) enum BufferStorage<M> {
    Device(M),
    Interop {
        compute: M,
        graphics: M,
        target: GraphicsTarget,
    },
}

pub(crate) struct BufferEntry<M> {
    pub(crate) name: String,
    pub(crate) element_size: usize,
    pub(crate) len: usize,
    pub(crate) storage: BufferStorage<M>,
}

impl<M> BufferEntry<M> {
    pub(crate) fn kind(&self) -> BufferKind {
        match &self.storage {
            BufferStorage::Device(_) => BufferKind::Device,
            BufferStorage::Interop { target, .. } => BufferKind::Interop(*target),
        }
    }

    pub(crate) fn is_interop(&self) -> bool {
        matches!(self.storage, BufferStorage::Interop { .. })
    }

    pub(crate) fn compute_memory(&self) -> &M {
        match &self.storage {
            BufferStorage::Device(memory) => memory,
            BufferStorage::Interop { compute, .. } => compute,
        }
    }

    pub(crate) fn graphics_memory(&self) -> Option<&M> {
        match &self.storage {
            BufferStorage::Device(_) => None,
            BufferStorage::Interop { graphics, .. } => Some(graphics),
        }
    }
}

impl<B: ComputeBackend> ComputeContext<B> {
    /// Allocates a device-only buffer of `count` elements of `T`.
    ///
    /// `initial`, when given, must hold exactly `count` values.
    pub fn create_buffer<T: Pod>(
        &mut self,
        name: &str,
        count: usize,
        initial: Option<&[T]>,
    ) -> Result<BufferId> {
        self.check_new_buffer::<T>(name)?;

        if let Some(values) = initial
            && values.len() != count
        {
            return Err(ComputeError::InitialValueLength {
                buffer: name.to_string(),
                expected: count,
                found: values.len(),
            });
        }

        let size = Self::allocation_size::<T>(name, count)?;
        let memory = self.backend.create_memory(
            name,
            size,
            MemoryKind::Device,
            initial.map(bytemuck::cast_slice),
        )?;

        Ok(self.register_buffer::<T>(name, count, BufferStorage::Device(memory)))
    }

    /// Allocates a buffer usable by the graphics pipeline as `target` and
    /// shares it with compute.
    pub fn create_interop_buffer<T: Pod>(
        &mut self,
        name: &str,
        target: GraphicsTarget,
        count: usize,
    ) -> Result<BufferId> {
        self.check_interop_available(name)?;
        self.check_new_buffer::<T>(name)?;

        let size = Self::allocation_size::<T>(name, count)?;
        let graphics = self.backend.create_memory(
            name,
            size,
            MemoryKind::Interop(target),
            None,
        )?;
        let compute = graphics.clone();

        Ok(self.register_buffer::<T>(
            name,
            count,
            BufferStorage::Interop {
                compute,
                graphics,
                target,
            },
        ))
    }

    /// Replaces the interop buffer registered under `name` (if any) with a
    /// new allocation of `count` elements. The old buffer leaves the acquire
    /// set before it is dropped; its handle becomes stale.
    pub fn recreate_interop_buffer<T: Pod>(
        &mut self,
        name: &str,
        target: GraphicsTarget,
        count: usize,
    ) -> Result<BufferId> {
        self.check_interop_available(name)?;
        Self::allocation_size::<T>(name, count)?;

        if let Some(&old) = self.buffer_names.get(name) {
            let entry = &self.buffers[old];
            if !entry.is_interop() {
                return Err(ComputeError::WrongBufferKind {
                    buffer: name.to_string(),
                    actual: entry.kind().describe(),
                    requested: "interop",
                });
            }
            self.remove_buffer(old)?;
        }

        self.create_interop_buffer::<T>(name, target, count)
    }

    /// Drops a buffer, evicting it from the interop acquire set first.
    pub fn remove_buffer(&mut self, id: BufferId) -> Result<()> {
        let name = self.buffer_entry(id)?.name.clone();

        if self.acquired.evict(id) {
            log::debug!("Evicted '{name}' from the interop acquire set");
        }

        self.buffers.remove(id);
        self.buffer_names.remove(&name);
        log::debug!("Removed buffer '{name}'");
        Ok(())
    }

    /// Sets the first `count` elements to `value`.
    pub fn fill_buffer<T: Pod>(&mut self, id: BufferId, count: usize, value: T) -> Result<()> {
        let offset = self.check_transfer::<T>(id, 0, count, true)?;
        if count == 0 {
            return Ok(());
        }
        let memory = self.buffers[id].compute_memory();
        self.backend
            .fill(memory, offset, bytemuck::bytes_of(&value), count)
    }

    /// Copies `values` into the buffer starting at element `offset`.
    pub fn write_buffer<T: Pod>(&mut self, id: BufferId, values: &[T], offset: usize) -> Result<()> {
        let byte_offset = self.check_transfer::<T>(id, offset, values.len(), true)?;
        if values.is_empty() {
            return Ok(());
        }
        let memory = self.buffers[id].compute_memory();
        self.backend
            .write(memory, byte_offset, bytemuck::cast_slice(values))
    }

    /// Copies `dest.len()` elements starting at element `offset` into `dest`.
    /// Blocks until all previously queued work has completed.
    pub fn read_buffer<T: Pod>(&mut self, id: BufferId, dest: &mut [T], offset: usize) -> Result<()> {
        let byte_offset = self.check_transfer::<T>(id, offset, dest.len(), false)?;
        if dest.is_empty() {
            return Ok(());
        }
        let memory = self.buffers[id].compute_memory();
        self.backend
            .read(memory, byte_offset, bytemuck::cast_slice_mut(dest))
    }

    /// [`read_buffer`](Self::read_buffer) into a new vector.
    pub fn read_buffer_vec<T: Pod>(&mut self, id: BufferId, count: usize, offset: usize) -> Result<Vec<T>> {
        let mut values = vec![T::zeroed(); count];
        self.read_buffer(id, &mut values, offset)?;
        Ok(values)
    }

    /// Looks a buffer up by name.
    pub fn buffer_id(&self, name: &str) -> Result<BufferId> {
        self.buffer_names
            .get(name)
            .copied()
            .ok_or_else(|| ComputeError::BufferNotFound(name.to_string()))
    }

    pub fn buffer_name(&self, id: BufferId) -> Result<&str> {
        Ok(&self.buffer_entry(id)?.name)
    }

    /// Element capacity.
    pub fn buffer_len(&self, id: BufferId) -> Result<usize> {
        Ok(self.buffer_entry(id)?.len)
    }

    pub fn buffer_element_size(&self, id: BufferId) -> Result<usize> {
        Ok(self.buffer_entry(id)?.element_size)
    }

    pub fn buffer_kind(&self, id: BufferId) -> Result<BufferKind> {
        Ok(self.buffer_entry(id)?.kind())
    }

    pub fn buffer_names(&self) -> impl Iterator<Item = &str> {
        self.buffer_names.keys().map(String::as_str)
    }

    /// Compute-side memory handle. Interop buffers must be acquired before
    /// compute touches this storage.
    pub fn compute_buffer(&self, id: BufferId) -> Result<&B::Memory> {
        Ok(self.buffer_entry(id)?.compute_memory())
    }

    pub(crate) fn buffer_entry(&self, id: BufferId) -> Result<&BufferEntry<B::Memory>> {
        self.buffers
            .get(id)
            .ok_or_else(|| ComputeError::BufferNotFound(format!("{id:?}")))
    }

    fn check_new_buffer<T: Pod>(&self, name: &str) -> Result<()> {
        if self.buffer_names.contains_key(name) {
            return Err(ComputeError::DuplicateBuffer(name.to_string()));
        }
        if size_of::<T>() == 0 {
            return Err(ComputeError::ElementSizeMismatch {
                buffer: name.to_string(),
                expected: 1,
                found: 0,
            });
        }
        Ok(())
    }

    /// Byte size of `count` elements of `T`.
    fn allocation_size<T: Pod>(name: &str, count: usize) -> Result<u64> {
        count
            .checked_mul(size_of::<T>())
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| ComputeError::CapacityExceeded {
                buffer: name.to_string(),
                offset: 0,
                count,
                capacity: usize::MAX / size_of::<T>().max(1),
            })
    }

    fn check_interop_available(&self, name: &str) -> Result<()> {
        if self.backend.supports_interop() {
            Ok(())
        } else {
            Err(ComputeError::InteropUnavailable(format!(
                "cannot create '{name}': context has no graphics backend"
            )))
        }
    }

    fn register_buffer<T: Pod>(&mut self, name: &str, count: usize, storage: BufferStorage<B::Memory>) -> BufferId {
        let id = self.buffers.insert(BufferEntry {
            name: name.to_string(),
            element_size: size_of::<T>(),
            len: count,
            storage,
        });
        self.buffer_names.insert(name.to_string(), id);

        log::debug!(
            "Created buffer '{name}': {count} x {} bytes",
            size_of::<T>()
        );
        id
    }

    /// Validates a transfer of `count` elements of `T` at element `offset`
    /// and returns its byte offset.
    fn check_transfer<T: Pod>(&self, id: BufferId, offset: usize, count: usize, aligned: bool) -> Result<u64> {
        let entry = self.buffer_entry(id)?;

        if size_of::<T>() != entry.element_size {
            return Err(ComputeError::ElementSizeMismatch {
                buffer: entry.name.clone(),
                expected: entry.element_size,
                found: size_of::<T>(),
            });
        }

        if offset.checked_add(count).is_none_or(|end| end > entry.len) {
            return Err(ComputeError::CapacityExceeded {
                buffer: entry.name.clone(),
                offset,
                count,
                capacity: entry.len,
            });
        }

        let byte_offset = (offset * entry.element_size) as u64;
        let byte_size = (count * entry.element_size) as u64;
        if aligned
            && (byte_offset % B::COPY_ALIGNMENT != 0 || byte_size % B::COPY_ALIGNMENT != 0)
        {
            return Err(ComputeError::Unaligned {
                buffer: entry.name.clone(),
                offset: byte_offset,
                size: byte_size,
            });
        }

        Ok(byte_offset)
    }
}
