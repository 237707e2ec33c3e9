//! Kernel Registry
//!
//! Kernels are created by name against the compiled program and addressed by
//! [`KernelId`] afterwards; the name is kept for lookups and diagnostics.
//!
//! Each kernel carries its launch range (default 1) and a sparse map from
//! slot index to [`SlotBinding`]. Every bind is checked against the
//! kernel's reflected signature:
//!
//! | Check                        | Error                                 |
//! |------------------------------|---------------------------------------|
//! | slot is declared             | [`ComputeError::UnknownSlot`]         |
//! | value vs buffer slot         | [`ComputeError::SlotKindMismatch`]    |
//! | device vs interop variant    | [`ComputeError::WrongBufferKind`]     |
//! | value byte size              | [`ComputeError::ValueSizeMismatch`]   |
//! | buffer element vs array stride | [`ComputeError::ElementSizeMismatch`] |
//! | buffer covers a fixed-size type | [`ComputeError::CapacityExceeded`]  |
//!
//! A multi-slot bind that fails leaves every slot as it was.

use std::collections::BTreeMap;

use bytemuck::Pod;
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::backend::{ComputeBackend, MemoryKind};
use crate::buffer::BufferId;
use crate::context::ComputeContext;
use crate::errors::{ComputeError, Result};
use crate::program::{KernelSignature, SlotKind};

new_key_type! {
    /// Handle to a registered kernel.
    pub struct KernelId;
}

/// What a parameter slot is currently bound to.
#[derive(Debug, Clone)]
pub enum SlotBinding<M> {
    /// A value, stored in backend memory of `size` bytes.
    Value { memory: M, size: usize },
    /// A device-only buffer.
    Buffer(BufferId),
    /// A graphics-shared buffer.
    InteropBuffer(BufferId),
}

impl<M> SlotBinding<M> {
    /// The bound buffer, if this slot holds one.
    #[must_use]
    pub fn buffer(&self) -> Option<BufferId> {
        match self {
            Self::Value { .. } => None,
            Self::Buffer(id) | Self::InteropBuffer(id) => Some(*id),
        }
    }
}

pub(crate) struct KernelEntry<B: ComputeBackend> {
    pub(crate) name: String,
    pub(crate) entry: B::Entry,
    pub(crate) signature: KernelSignature,
    pub(crate) range: u32,
    pub(crate) bindings: BTreeMap<u32, SlotBinding<B::Memory>>,
}

impl<B: ComputeBackend> ComputeContext<B> {
    /// Registers the program entry point `name` as a kernel.
    pub fn create_kernel(&mut self, name: &str, range: Option<u32>) -> Result<KernelId> {
        if self.kernel_names.contains_key(name) {
            return Err(ComputeError::DuplicateKernel(name.to_string()));
        }

        let signature = self
            .program
            .layout()
            .signature(name)
            .ok_or_else(|| ComputeError::UnknownEntryPoint(name.to_string()))?
            .clone();

        let entry = self
            .backend
            .create_entry(self.program.compiled(), name, &signature)?;

        let range = range.unwrap_or(1);
        let id = self.kernels.insert(KernelEntry {
            name: name.to_string(),
            entry,
            signature,
            range,
            bindings: BTreeMap::new(),
        });
        self.kernel_names.insert(name.to_string(), id);

        log::debug!("Created kernel '{name}' with range {range}");
        Ok(id)
    }

    /// Looks a kernel up by name.
    pub fn kernel_id(&self, name: &str) -> Result<KernelId> {
        self.kernel_names
            .get(name)
            .copied()
            .ok_or_else(|| ComputeError::KernelNotFound(name.to_string()))
    }

    pub(crate) fn kernel_entry(&self, id: KernelId) -> Result<&KernelEntry<B>> {
        self.kernels
            .get(id)
            .ok_or_else(|| ComputeError::KernelNotFound(format!("{id:?}")))
    }

    pub fn kernel_name(&self, id: KernelId) -> Result<&str> {
        Ok(&self.kernel_entry(id)?.name)
    }

    pub fn kernel_range(&self, id: KernelId) -> Result<u32> {
        Ok(self.kernel_entry(id)?.range)
    }

    pub fn kernel_signature(&self, id: KernelId) -> Result<&KernelSignature> {
        Ok(&self.kernel_entry(id)?.signature)
    }

    /// Current binding of `slot`, if any.
    pub fn slot_binding(&self, id: KernelId, slot: u32) -> Result<Option<&SlotBinding<B::Memory>>> {
        Ok(self.kernel_entry(id)?.bindings.get(&slot))
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernel_names.keys().map(String::as_str)
    }

    /// Sets the number of work-items the next [`run`](Self::run) launches.
    pub fn set_range(&mut self, id: KernelId, count: u32) -> Result<()> {
        let kernel = self
            .kernels
            .get_mut(id)
            .ok_or_else(|| ComputeError::KernelNotFound(format!("{id:?}")))?;
        kernel.range = count;
        Ok(())
    }

    /// Binds a plain value to the value slot `slot`.
    pub fn set_param_value<T: Pod>(&mut self, id: KernelId, slot: u32, value: T) -> Result<()> {
        let kernel = self
            .kernels
            .get_mut(id)
            .ok_or_else(|| ComputeError::KernelNotFound(format!("{id:?}")))?;

        let decl = kernel
            .signature
            .slot(slot)
            .ok_or_else(|| ComputeError::UnknownSlot {
                kernel: kernel.name.clone(),
                slot,
            })?;

        if decl.kind != SlotKind::Value {
            return Err(ComputeError::SlotKindMismatch {
                kernel: kernel.name.clone(),
                slot,
                expected: decl.kind.describe(),
                found: SlotKind::Value.describe(),
            });
        }

        let bytes = bytemuck::bytes_of(&value);
        if bytes.len() != decl.size as usize {
            return Err(ComputeError::ValueSizeMismatch {
                kernel: kernel.name.clone(),
                slot,
                expected: decl.size,
                found: bytes.len(),
            });
        }

        if let Some(SlotBinding::Value { memory, size }) = kernel.bindings.get(&slot)
            && *size == bytes.len()
        {
            return self.backend.write(memory, 0, bytes);
        }

        let memory = self.backend.create_memory(
            &format!("{}[{slot}]", kernel.name),
            bytes.len() as u64,
            MemoryKind::Value,
            Some(bytes),
        )?;
        kernel.bindings.insert(
            slot,
            SlotBinding::Value {
                memory,
                size: bytes.len(),
            },
        );
        Ok(())
    }

    /// Binds device-only `buffers` to consecutive slots starting at `slot`.
    pub fn set_param_buffers(&mut self, id: KernelId, slot: u32, buffers: &[BufferId]) -> Result<()> {
        self.bind_buffers(id, slot, buffers, false)
    }

    /// Binds interop `buffers` to consecutive slots starting at `slot`.
    pub fn set_param_interop_buffers(
        &mut self,
        id: KernelId,
        slot: u32,
        buffers: &[BufferId],
    ) -> Result<()> {
        self.bind_buffers(id, slot, buffers, true)
    }

    fn bind_buffers(
        &mut self,
        id: KernelId,
        slot: u32,
        buffers: &[BufferId],
        interop: bool,
    ) -> Result<()> {
        let kernel = self
            .kernels
            .get_mut(id)
            .ok_or_else(|| ComputeError::KernelNotFound(format!("{id:?}")))?;

        let mut staged: SmallVec<[(u32, SlotBinding<B::Memory>); 4]> = SmallVec::new();

        for (index, &buffer) in (slot..).zip(buffers) {
            let decl = kernel
                .signature
                .slot(index)
                .ok_or_else(|| ComputeError::UnknownSlot {
                    kernel: kernel.name.clone(),
                    slot: index,
                })?;

            if !matches!(decl.kind, SlotKind::Buffer { .. }) {
                return Err(ComputeError::SlotKindMismatch {
                    kernel: kernel.name.clone(),
                    slot: index,
                    expected: decl.kind.describe(),
                    found: "buffer",
                });
            }

            let entry = self
                .buffers
                .get(buffer)
                .ok_or_else(|| ComputeError::BufferNotFound(format!("{buffer:?}")))?;

            if entry.is_interop() != interop {
                return Err(ComputeError::WrongBufferKind {
                    buffer: entry.name.clone(),
                    actual: entry.kind().describe(),
                    requested: if interop { "interop" } else { "device-only" },
                });
            }

            if let Some(stride) = decl.element_stride
                && stride as usize != entry.element_size
            {
                return Err(ComputeError::ElementSizeMismatch {
                    buffer: entry.name.clone(),
                    expected: stride as usize,
                    found: entry.element_size,
                });
            }

            let declared = decl.size as usize;
            if !decl.runtime_sized && entry.len * entry.element_size < declared {
                return Err(ComputeError::CapacityExceeded {
                    buffer: entry.name.clone(),
                    offset: 0,
                    count: declared.div_ceil(entry.element_size),
                    capacity: entry.len,
                });
            }

            let binding = if interop {
                SlotBinding::InteropBuffer(buffer)
            } else {
                SlotBinding::Buffer(buffer)
            };
            staged.push((index, binding));
        }

        for (index, binding) in staged {
            kernel.bindings.insert(index, binding);
        }
        Ok(())
    }
}
