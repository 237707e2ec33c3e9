//! Error Types
//!
//! This module defines the error type used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`ComputeError`] covers every failure mode of the
//! resource layer:
//! - Device and context initialization failures
//! - Program compilation failures (with the compiler log)
//! - Lookup failures for kernels, buffers and entry points
//! - Parameter binding failures
//! - Capacity and element-size violations on buffer transfers
//! - Interop acquire/release failures
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, ComputeError>`.
//!
//! ```rust,ignore
//! use compute_manager::errors::{ComputeError, Result};
//!
//! fn run_frame(ctx: &mut ComputeContext<WgpuBackend>) -> Result<()> {
//!     ctx.run(kernel)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the compute layer.
///
/// Names of kernels and buffers are carried verbatim so that messages point
/// at the caller's own identifiers.
#[derive(Error, Debug)]
pub enum ComputeError {
    // ========================================================================
    // Initialization Errors
    // ========================================================================
    /// Failed to find a compatible adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// Interop was requested from a context bound without a graphics backend.
    #[error("Interop unavailable: {0}")]
    InteropUnavailable(String),

    // ========================================================================
    // Program Errors
    // ========================================================================
    /// The program source failed to build. `log` is the compiler output.
    #[error("Program build failed:\n{log}")]
    Compile {
        /// Full diagnostic text
        log: String,
    },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// No compiled entry point carries this name.
    #[error("No kernel entry point named '{0}' in the program")]
    UnknownEntryPoint(String),

    /// A kernel with this name is already registered.
    #[error("Kernel '{0}' already exists")]
    DuplicateKernel(String),

    /// A buffer with this name is already registered.
    #[error("Buffer '{0}' already exists")]
    DuplicateBuffer(String),

    /// The kernel name or handle does not resolve to a registered kernel.
    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    /// The buffer name or handle does not resolve to a registered buffer.
    #[error("Buffer not found: {0}")]
    BufferNotFound(String),

    // ========================================================================
    // Binding Errors
    // ========================================================================
    /// The kernel does not declare a parameter at this slot.
    #[error("Kernel '{kernel}' has no parameter at slot {slot}")]
    UnknownSlot {
        /// Kernel name
        kernel: String,
        /// Slot index
        slot: u32,
    },

    /// A value was bound to a buffer slot or a buffer to a value slot.
    #[error("Kernel '{kernel}' slot {slot} expects a {expected}, got a {found}")]
    SlotKindMismatch {
        /// Kernel name
        kernel: String,
        /// Slot index
        slot: u32,
        /// Declared parameter kind
        expected: &'static str,
        /// Supplied parameter kind
        found: &'static str,
    },

    /// Device-only buffer bound through the interop variant, or vice versa.
    #[error("Buffer '{buffer}' is a {actual} buffer and cannot be bound as {requested}")]
    WrongBufferKind {
        /// Buffer name
        buffer: String,
        /// Ownership kind of the buffer
        actual: &'static str,
        /// Binding variant that was used
        requested: &'static str,
    },

    /// A bound value's byte size differs from the declared parameter size.
    #[error("Kernel '{kernel}' slot {slot} expects {expected} bytes, got {found}")]
    ValueSizeMismatch {
        /// Kernel name
        kernel: String,
        /// Slot index
        slot: u32,
        /// Declared size in bytes
        expected: u32,
        /// Supplied size in bytes
        found: usize,
    },

    /// A declared parameter slot was never bound before dispatch.
    #[error("Kernel '{kernel}' dispatched with slot {slot} unbound")]
    UnboundSlot {
        /// Kernel name
        kernel: String,
        /// Slot index
        slot: u32,
    },

    // ========================================================================
    // Capacity Errors
    // ========================================================================
    /// `offset + count` runs past the end of the buffer.
    #[error("Buffer '{buffer}': {count} elements at offset {offset} exceed capacity {capacity}")]
    CapacityExceeded {
        /// Buffer name
        buffer: String,
        /// First element touched
        offset: usize,
        /// Number of elements touched
        count: usize,
        /// Element capacity of the buffer
        capacity: usize,
    },

    /// Initial contents do not match the requested element count.
    #[error("Buffer '{buffer}': {found} initial values supplied for {expected} elements")]
    InitialValueLength {
        /// Buffer name
        buffer: String,
        /// Requested element count
        expected: usize,
        /// Supplied element count
        found: usize,
    },

    /// The element type used at this site differs from the buffer's element size.
    #[error("Buffer '{buffer}': element size {found} does not match {expected}")]
    ElementSizeMismatch {
        /// Buffer name
        buffer: String,
        /// Element size the buffer (or slot) was declared with
        expected: usize,
        /// Element size used at this site
        found: usize,
    },

    /// The transfer cannot be expressed in the backend's copy granularity.
    #[error("Buffer '{buffer}': {size} bytes at byte offset {offset} are not 4-byte aligned")]
    Unaligned {
        /// Buffer name
        buffer: String,
        /// Byte offset of the transfer
        offset: u64,
        /// Byte size of the transfer
        size: u64,
    },

    // ========================================================================
    // Interop Errors
    // ========================================================================
    /// The backend rejected an acquire or release.
    #[error("Interop sync failed: {0}")]
    InteropSync(String),

    /// A kernel touching an interop buffer was dispatched without acquiring it.
    #[error("Kernel '{kernel}' uses interop buffer '{buffer}' which is not acquired")]
    InteropNotAcquired {
        /// Kernel name
        kernel: String,
        /// Buffer name
        buffer: String,
    },

    /// Graphics access was requested while compute holds the buffer.
    #[error("Interop buffer '{0}' is acquired by compute")]
    InteropBusy(String),

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// The launch range cannot be dispatched.
    #[error("Kernel '{kernel}': invalid range {range} ({reason})")]
    InvalidRange {
        /// Kernel name
        kernel: String,
        /// Requested range
        range: u32,
        /// Why the backend cannot launch it
        reason: String,
    },

    /// Device-side failure (lost device, map failure, rejected submission).
    #[error("Backend error: {0}")]
    Backend(String),
}

impl ComputeError {
    /// Whether a frame loop may log this error and carry on.
    ///
    /// Only interop synchronization failures qualify; the acquire/release
    /// pair is attempted again on the next update.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InteropSync(_))
    }
}

/// Alias for `Result<T, ComputeError>`.
pub type Result<T> = std::result::Result<T, ComputeError>;
