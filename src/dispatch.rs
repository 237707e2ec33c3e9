//! Kernel Dispatcher
//!
//! Launches a kernel over its current range with its current bindings.
//! Every declared slot must be bound, every bound buffer must still exist
//! and every bound interop buffer must be acquired; all of this is checked
//! before the backend sees the launch.

use smallvec::SmallVec;

use crate::backend::{ComputeBackend, KernelArg};
use crate::context::ComputeContext;
use crate::errors::{ComputeError, Result};
use crate::kernel::{KernelId, SlotBinding};

impl<B: ComputeBackend> ComputeContext<B> {
    /// Enqueues one launch of `kernel`.
    ///
    /// Returns once the launch is queued; completion is observed by the next
    /// read on the same context.
    pub fn run(&mut self, id: KernelId) -> Result<()> {
        let kernel = self
            .kernels
            .get(id)
            .ok_or_else(|| ComputeError::KernelNotFound(format!("{id:?}")))?;

        let mut args: SmallVec<[KernelArg<'_, B::Memory>; 8]> = SmallVec::new();

        for (&slot, decl) in &kernel.signature.slots {
            let binding = kernel
                .bindings
                .get(&slot)
                .ok_or_else(|| ComputeError::UnboundSlot {
                    kernel: kernel.name.clone(),
                    slot,
                })?;

            let memory = match binding {
                SlotBinding::Value { memory, .. } => memory,
                SlotBinding::Buffer(buffer) | SlotBinding::InteropBuffer(buffer) => {
                    let entry = self.buffers.get(*buffer).ok_or_else(|| {
                        ComputeError::BufferNotFound(format!(
                            "{buffer:?} bound to slot {slot} of kernel '{}'",
                            kernel.name
                        ))
                    })?;

                    if entry.is_interop() && !self.acquired.contains(*buffer) {
                        return Err(ComputeError::InteropNotAcquired {
                            kernel: kernel.name.clone(),
                            buffer: entry.name.clone(),
                        });
                    }
                    entry.compute_memory()
                }
            };

            args.push(KernelArg {
                slot,
                kind: decl.kind,
                memory,
            });
        }

        log::trace!(
            "Dispatch '{}' over {} work-item(s), {} arg(s)",
            kernel.name,
            kernel.range,
            args.len()
        );

        self.backend.dispatch(&kernel.entry, kernel.range, &args)
    }
}
