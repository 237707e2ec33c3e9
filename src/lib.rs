#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod buffer;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod interop;
pub mod kernel;
pub mod program;
pub mod settings;
pub mod source;

pub use backend::{
    ComputeBackend, DeviceInfo, GraphicsHandle, GraphicsTarget, HostBackend, HostLaunch,
    HostMemory, KernelArg, MemoryKind, WgpuBackend,
};
pub use buffer::{BufferId, BufferKind};
pub use context::ComputeContext;
pub use errors::{ComputeError, Result};
pub use interop::{InteropGuard, InteropSet};
pub use kernel::{KernelId, SlotBinding};
pub use program::{
    KernelSignature, LAUNCH_GROUP, LAUNCH_RANGE, Program, ProgramLayout, SlotDecl, SlotKind,
};
pub use settings::ComputeSettings;
pub use source::{KernelSource, format_fragment};
