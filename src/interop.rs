//! Interop Synchronizer
//!
//! An interop buffer is owned by the graphics pipeline until compute acquires
//! it, and must be released before graphics touches it again. The context
//! tracks the buffers compute currently holds in an [`InteropSet`]:
//!
//! - [`run`](ComputeContext::run) refuses kernels bound to interop buffers
//!   outside the set
//! - [`graphics_buffer`](ComputeContext::graphics_buffer) refuses buffers
//!   inside it
//!
//! The usual frame bracket is scoped:
//!
//! ```rust,ignore
//! {
//!     let mut frame = ctx.acquire(&[positions])?;
//!     frame.run(update)?;
//! } // released here
//! renderer.draw(ctx.graphics_buffer(positions)?);
//! ```

use std::ops::{Deref, DerefMut};

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::backend::ComputeBackend;
use crate::buffer::BufferId;
use crate::context::ComputeContext;
use crate::errors::{ComputeError, Result};

/// Buffers currently accessible by compute.
#[derive(Debug, Default)]
pub struct InteropSet {
    held: FxHashSet<BufferId>,
}

impl InteropSet {
    #[inline]
    #[must_use]
    pub fn contains(&self, id: BufferId) -> bool {
        self.held.contains(&id)
    }

    pub(crate) fn insert(&mut self, id: BufferId) -> bool {
        self.held.insert(id)
    }

    /// Removes `id`; returns whether it was held.
    pub(crate) fn evict(&mut self, id: BufferId) -> bool {
        self.held.remove(&id)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.held.iter().copied()
    }
}

type IdList = SmallVec<[BufferId; 4]>;

impl<B: ComputeBackend> ComputeContext<B> {
    /// Makes `buffers` accessible to compute.
    ///
    /// Buffers already held are skipped. On failure none of the requested
    /// buffers enter the set.
    pub fn acquire_interop(&mut self, buffers: &[BufferId]) -> Result<()> {
        self.acquire_new(buffers).map(drop)
    }

    /// Acquires the buffers of `buffers` not yet held and returns them.
    fn acquire_new(&mut self, buffers: &[BufferId]) -> Result<IdList> {
        let pending = self.collect_interop(buffers, |set, id| !set.contains(id))?;
        if pending.is_empty() {
            return Ok(pending);
        }

        let memories: SmallVec<[&B::Memory; 4]> = pending
            .iter()
            .map(|&id| self.buffers[id].compute_memory())
            .collect();
        self.backend.acquire_shared(&memories)?;

        for &id in &pending {
            self.acquired.insert(id);
        }
        log::trace!("Acquired {} interop buffer(s)", pending.len());
        Ok(pending)
    }

    /// Hands `buffers` back to the graphics pipeline.
    ///
    /// Buffers not held are skipped. On failure the buffers stay in the set,
    /// so the next release retries them.
    pub fn release_interop(&mut self, buffers: &[BufferId]) -> Result<()> {
        let pending = self.collect_interop(buffers, InteropSet::contains)?;
        if pending.is_empty() {
            return Ok(());
        }

        let memories: SmallVec<[&B::Memory; 4]> = pending
            .iter()
            .map(|&id| self.buffers[id].compute_memory())
            .collect();
        self.backend.release_shared(&memories)?;

        for &id in &pending {
            self.acquired.evict(id);
        }
        log::trace!("Released {} interop buffer(s)", pending.len());
        Ok(())
    }

    /// Acquires `buffers` for the lifetime of the returned guard.
    ///
    /// Buffers already held when the guard is created stay with their
    /// holder: the guard neither acquires nor releases them.
    pub fn acquire(&mut self, buffers: &[BufferId]) -> Result<InteropGuard<'_, B>> {
        let buffers = self.acquire_new(buffers)?;
        Ok(InteropGuard { ctx: self, buffers })
    }

    #[must_use]
    pub fn is_acquired(&self, id: BufferId) -> bool {
        self.acquired.contains(id)
    }

    #[must_use]
    pub fn acquired_buffers(&self) -> &InteropSet {
        &self.acquired
    }

    /// Graphics-side handle of an interop buffer, for binding into draw
    /// calls. Fails while compute holds the buffer.
    pub fn graphics_buffer(&self, id: BufferId) -> Result<&B::Memory> {
        let entry = self.buffer_entry(id)?;
        let memory = entry
            .graphics_memory()
            .ok_or_else(|| ComputeError::WrongBufferKind {
                buffer: entry.name.clone(),
                actual: entry.kind().describe(),
                requested: "interop",
            })?;

        if self.acquired.contains(id) {
            return Err(ComputeError::InteropBusy(entry.name.clone()));
        }
        Ok(memory)
    }

    /// Validates `buffers` as interop buffers and keeps the distinct ones
    /// `select` accepts.
    fn collect_interop(
        &self,
        buffers: &[BufferId],
        select: impl Fn(&InteropSet, BufferId) -> bool,
    ) -> Result<IdList> {
        let mut pending = IdList::new();
        for &id in buffers {
            let entry = self.buffer_entry(id)?;
            if !entry.is_interop() {
                return Err(ComputeError::WrongBufferKind {
                    buffer: entry.name.clone(),
                    actual: entry.kind().describe(),
                    requested: "interop",
                });
            }
            if select(&self.acquired, id) && !pending.contains(&id) {
                pending.push(id);
            }
        }
        Ok(pending)
    }
}

/// Scoped acquisition of interop buffers.
///
/// Dereferences to the context so kernels can run inside the scope. Buffers
/// still held when the guard drops are released; a failure there is logged
/// and the buffers stay acquired.
pub struct InteropGuard<'a, B: ComputeBackend> {
    ctx: &'a mut ComputeContext<B>,
    buffers: IdList,
}

impl<B: ComputeBackend> InteropGuard<'_, B> {
    /// Buffers this guard acquired.
    #[must_use]
    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }

    /// Releases now and reports the outcome.
    pub fn release(mut self) -> Result<()> {
        let buffers = std::mem::take(&mut self.buffers);
        self.ctx.release_interop(&buffers)
    }
}

impl<B: ComputeBackend> Deref for InteropGuard<'_, B> {
    type Target = ComputeContext<B>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<B: ComputeBackend> DerefMut for InteropGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<B: ComputeBackend> Drop for InteropGuard<'_, B> {
    fn drop(&mut self) {
        // Skip ids released or removed inside the scope.
        let held: IdList = self
            .buffers
            .iter()
            .copied()
            .filter(|&id| self.ctx.acquired.contains(id))
            .collect();
        if held.is_empty() {
            return;
        }

        if let Err(err) = self.ctx.release_interop(&held) {
            log::warn!("Interop release on scope exit failed: {err}");
        }
    }
}
