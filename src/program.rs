//! Program Store
//!
//! Compiles the single kernel-source blob into a [`Program`]. Compilation
//! has two stages:
//!
//! 1. **Reflection**: the WGSL is parsed and validated with naga (the same
//!    front-end wgpu runs internally) and every `@compute` entry point is
//!    reflected into a [`KernelSignature`]: its workgroup size and the
//!    parameter slots it declares.
//! 2. **Backend build**: the backend turns the validated source into its
//!    own executable form.
//!
//! Either stage failing fails the whole program; the diagnostic text is
//! returned verbatim in [`ComputeError::Compile`].
//!
//! ## Slot mapping
//!
//! | WGSL declaration                          | Slot kind            |
//! |-------------------------------------------|----------------------|
//! | `@group(0) @binding(N) var<storage, ..>`  | [`SlotKind::Buffer`] |
//! | `@group(0) @binding(N) var<uniform>`      | [`SlotKind::Value`]  |
//!
//! Slot index is the binding number `N`.
//!
//! ## Launch range
//!
//! GPU work is launched in whole workgroups, so a launch may start more
//! invocations than the kernel's range. A kernel that reads [`LAUNCH_RANGE`]
//! (`@group(1) @binding(0) var<uniform> launch_range: u32`) gets the range
//! written there before every launch and guards on it. It is not a parameter
//! slot. A kernel that does not read it can only be launched over whole
//! workgroups on the GPU backend.

use std::collections::BTreeMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use rustc_hash::FxHashMap;

use crate::backend::ComputeBackend;
use crate::errors::{ComputeError, Result};

/// Bind group reserved for launch state.
pub const LAUNCH_GROUP: u32 = 1;

/// Declaration of the launch range uniform.
pub const LAUNCH_RANGE: &str = "@group(1) @binding(0) var<uniform> launch_range: u32;";

/// What a parameter slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// A device buffer (`var<storage>`).
    Buffer {
        /// Declared without write access.
        read_only: bool,
    },
    /// A plain value (`var<uniform>`).
    Value,
}

impl SlotKind {
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Buffer { .. } => "buffer",
            Self::Value => "value",
        }
    }
}

/// One declared kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDecl {
    /// Name of the WGSL global, when it has one.
    pub name: Option<String>,
    pub kind: SlotKind,
    /// Byte size of the declared type. For runtime-sized arrays this is the
    /// size of a single element.
    pub size: u32,
    /// Array stride when the declared type is an array.
    pub element_stride: Option<u32>,
    /// The type ends in a runtime-sized array, so any buffer of at least
    /// `size` bytes fits.
    pub runtime_sized: bool,
}

/// Reflected interface of one compute entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub workgroup_size: [u32; 3],
    /// Declared slots keyed by binding number.
    pub slots: BTreeMap<u32, SlotDecl>,
    /// Whether the entry point reads [`LAUNCH_RANGE`].
    pub reads_launch_range: bool,
}

impl KernelSignature {
    #[inline]
    #[must_use]
    pub fn slot(&self, index: u32) -> Option<&SlotDecl> {
        self.slots.get(&index)
    }
}

/// Entry points of a program, by name.
#[derive(Debug, Clone, Default)]
pub struct ProgramLayout {
    entries: FxHashMap<String, KernelSignature>,
}

impl ProgramLayout {
    /// Parses, validates and reflects a WGSL source blob.
    pub fn reflect(source: &str) -> Result<Self> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| ComputeError::Compile {
            log: e.emit_to_string(source),
        })?;

        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| ComputeError::Compile {
                log: e.emit_to_string(source),
            })?;

        let mut entries = FxHashMap::default();
        for (index, entry) in module.entry_points.iter().enumerate() {
            if entry.stage != naga::ShaderStage::Compute {
                continue;
            }

            let usage = info.get_entry_point(index);
            let mut slots = BTreeMap::new();
            let mut reads_launch_range = false;

            for (handle, var) in module.global_variables.iter() {
                if usage[handle].is_empty() {
                    continue;
                }
                let Some(binding) = &var.binding else {
                    continue;
                };

                let label = var.name.as_deref().unwrap_or("<unnamed>");
                if binding.group == LAUNCH_GROUP {
                    let is_range = binding.binding == 0
                        && var.space == naga::AddressSpace::Uniform
                        && matches!(
                            module.types[var.ty].inner,
                            naga::TypeInner::Scalar(naga::Scalar::U32)
                        );
                    if !is_range {
                        return Err(ComputeError::Compile {
                            log: format!(
                                "entry point '{}': @group({LAUNCH_GROUP}) only holds the launch range, declared as `{LAUNCH_RANGE}`; found '{label}' at @binding({})",
                                entry.name, binding.binding
                            ),
                        });
                    }
                    reads_launch_range = true;
                    continue;
                }
                if binding.group != 0 {
                    return Err(ComputeError::Compile {
                        log: format!(
                            "entry point '{}': parameter '{label}' is in @group({}); kernel parameters must be in @group(0)",
                            entry.name, binding.group
                        ),
                    });
                }

                let kind = match var.space {
                    naga::AddressSpace::Storage { access } => SlotKind::Buffer {
                        read_only: !access.contains(naga::StorageAccess::STORE),
                    },
                    naga::AddressSpace::Uniform => SlotKind::Value,
                    _ => {
                        return Err(ComputeError::Compile {
                            log: format!(
                                "entry point '{}': parameter '{label}' at @binding({}) is not a storage or uniform buffer",
                                entry.name, binding.binding
                            ),
                        });
                    }
                };

                let inner = &module.types[var.ty].inner;
                let element_stride = match inner {
                    naga::TypeInner::Array { stride, .. } => Some(*stride),
                    _ => None,
                };

                slots.insert(
                    binding.binding,
                    SlotDecl {
                        name: var.name.clone(),
                        kind,
                        size: inner.size(module.to_ctx()),
                        element_stride,
                        runtime_sized: inner.is_dynamically_sized(&module.types),
                    },
                );
            }

            entries.insert(
                entry.name.clone(),
                KernelSignature {
                    workgroup_size: entry.workgroup_size,
                    slots,
                    reads_launch_range,
                },
            );
        }

        Ok(Self { entries })
    }

    #[must_use]
    pub fn signature(&self, name: &str) -> Option<&KernelSignature> {
        self.entries.get(name)
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A compiled program: the reflected layout plus the backend's build.
pub struct Program<P> {
    layout: ProgramLayout,
    compiled: P,
}

impl<P> Program<P> {
    /// Builds `source` for `backend`.
    pub fn compile<B>(backend: &mut B, source: &str) -> Result<Self>
    where
        B: ComputeBackend<Program = P>,
    {
        let layout = ProgramLayout::reflect(source)?;
        let compiled = backend.compile(source, &layout)?;

        log::debug!(
            "Compiled program with {} kernel entry point(s): {:?}",
            layout.len(),
            layout.entry_names().collect::<Vec<_>>()
        );

        Ok(Self { layout, compiled })
    }

    #[inline]
    #[must_use]
    pub fn layout(&self) -> &ProgramLayout {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub fn compiled(&self) -> &P {
        &self.compiled
    }
}
