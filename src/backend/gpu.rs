//! wgpu Backend
//!
//! [`WgpuBackend`] binds one `wgpu::Device` and its queue. It is created in
//! one of two modes:
//!
//! - **Compute-only** ([`WgpuBackend::new`]): requests its own adapter and
//!   device. Interop buffers are rejected.
//! - **Shared** ([`WgpuBackend::shared`]): adopts the device and queue of a
//!   wgpu renderer through a [`GraphicsHandle`]. Buffers allocated here can
//!   be bound into the renderer's pipelines.
//!
//! Compute and graphics work on a shared device go through the same queue,
//! so ordering across acquire → dispatch → release → draw follows submission
//! order.
//!
//! Pipeline creation and dispatch run inside a validation error scope; a
//! device-side rejection comes back as [`ComputeError::Backend`].

use std::borrow::Cow;

use wgpu::util::DeviceExt;

use super::{ComputeBackend, DeviceInfo, GraphicsTarget, KernelArg, MemoryKind};
use crate::errors::{ComputeError, Result};
use crate::program::{KernelSignature, ProgramLayout, SlotKind};
use crate::settings::ComputeSettings;

/// Upper bound of the host staging used by pattern fills.
const FILL_CHUNK_BYTES: usize = 64 * 1024;

/// Device and queue handed over by the graphics backend.
#[derive(Debug, Clone)]
pub struct GraphicsHandle {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Adapter description, used for logging only.
    pub adapter_info: Option<wgpu::AdapterInfo>,
}

/// Uniform holding the launch range, bound at `@group(1)`.
#[derive(Debug)]
struct LaunchRange {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Launchable compute pipeline for one entry point.
#[derive(Debug)]
pub struct WgpuEntry {
    name: String,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    workgroup_size: [u32; 3],
    launch: Option<LaunchRange>,
}

/// GPU backend built on wgpu.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: DeviceInfo,
    interop: bool,
    max_workgroups: u32,
}

fn describe(info: &wgpu::AdapterInfo) -> DeviceInfo {
    DeviceInfo {
        name: info.name.clone(),
        backend: format!("{:?}", info.backend),
        device_type: format!("{:?}", info.device_type),
    }
}

impl WgpuBackend {
    /// Compute-only backend on the first adapter matching `settings`.
    pub fn new(settings: &ComputeSettings) -> Result<Self> {
        pollster::block_on(Self::new_async(settings))
    }

    pub async fn new_async(settings: &ComputeSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: settings.force_fallback_adapter,
            })
            .await
            .map_err(|e| ComputeError::AdapterRequestFailed(e.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: settings.label.as_deref(),
                required_features: settings.required_features,
                required_limits: settings.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let info = describe(&adapter.get_info());
        Ok(Self::from_parts(device, queue, info, false))
    }

    /// Backend sharing the graphics backend's device.
    #[must_use]
    pub fn shared(graphics: GraphicsHandle) -> Self {
        let info = graphics.adapter_info.as_ref().map_or_else(
            || DeviceInfo {
                name: "shared device".to_string(),
                backend: "unknown".to_string(),
                device_type: "unknown".to_string(),
            },
            describe,
        );
        Self::from_parts(graphics.device, graphics.queue, info, true)
    }

    fn from_parts(device: wgpu::Device, queue: wgpu::Queue, info: DeviceInfo, interop: bool) -> Self {
        let max_workgroups = device.limits().max_compute_workgroups_per_dimension;
        Self {
            device,
            queue,
            info,
            interop,
            max_workgroups,
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn usage(kind: MemoryKind) -> wgpu::BufferUsages {
        let compute = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        match kind {
            MemoryKind::Device => compute,
            MemoryKind::Value => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            MemoryKind::Interop(target) => {
                compute
                    | match target {
                        GraphicsTarget::Vertex => wgpu::BufferUsages::VERTEX,
                        GraphicsTarget::Index => wgpu::BufferUsages::INDEX,
                        GraphicsTarget::Uniform => wgpu::BufferUsages::UNIFORM,
                        GraphicsTarget::Storage => wgpu::BufferUsages::empty(),
                    }
            }
        }
    }

    fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| ComputeError::Backend(e.to_string()))
    }

    /// Runs `build` inside a validation error scope.
    fn validated<T>(&self, what: &str, build: impl FnOnce() -> T) -> Result<T> {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build();
        match pollster::block_on(scope.pop()) {
            None => Ok(value),
            Some(err) => Err(ComputeError::Backend(format!("{what}: {err}"))),
        }
    }

    fn create_launch_range(&self, name: &str) -> (wgpu::BindGroupLayout, LaunchRange) {
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Launch Range Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{name} launch range")),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{name} launch range")),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });

        (layout, LaunchRange { buffer, bind_group })
    }

    fn check_interop(&self, op: &str) -> Result<()> {
        if self.interop {
            Ok(())
        } else {
            Err(ComputeError::InteropSync(format!(
                "{op}: device is not shared with a graphics backend"
            )))
        }
    }
}

impl ComputeBackend for WgpuBackend {
    type Program = wgpu::ShaderModule;
    type Entry = WgpuEntry;
    type Memory = wgpu::Buffer;

    const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn supports_interop(&self) -> bool {
        self.interop
    }

    fn compile(&mut self, source: &str, _layout: &ProgramLayout) -> Result<Self::Program> {
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Kernel Program"),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            });

        let info = pollster::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| m.message.clone())
            .collect();

        if errors.is_empty() {
            Ok(module)
        } else {
            Err(ComputeError::Compile {
                log: errors.join("\n"),
            })
        }
    }

    fn create_entry(
        &mut self,
        program: &Self::Program,
        name: &str,
        signature: &KernelSignature,
    ) -> Result<Self::Entry> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = signature
            .slots
            .iter()
            .map(|(&binding, decl)| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match decl.kind {
                        SlotKind::Buffer { read_only } => {
                            wgpu::BufferBindingType::Storage { read_only }
                        }
                        SlotKind::Value => wgpu::BufferBindingType::Uniform,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        self.validated(&format!("kernel '{name}'"), || {
            let bind_group_layout =
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(name),
                        entries: &entries,
                    });

            let (launch_layout, launch) = if signature.reads_launch_range {
                let (layout, launch) = self.create_launch_range(name);
                (Some(layout), Some(launch))
            } else {
                (None, None)
            };

            let group_layouts = [Some(&bind_group_layout), launch_layout.as_ref()];
            let used = if launch_layout.is_some() { 2 } else { 1 };
            let layout = self
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(name),
                    bind_group_layouts: &group_layouts[..used],
                    immediate_size: 0,
                });

            let pipeline = self
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(name),
                    layout: Some(&layout),
                    module: program,
                    entry_point: Some(name),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                });

            WgpuEntry {
                name: name.to_string(),
                pipeline,
                bind_group_layout,
                workgroup_size: signature.workgroup_size,
                launch,
            }
        })
    }

    fn create_memory(
        &mut self,
        label: &str,
        size: u64,
        kind: MemoryKind,
        contents: Option<&[u8]>,
    ) -> Result<Self::Memory> {
        // Uniform bindings are sized in 16-byte rows; everything else in copy units.
        let granularity = if kind == MemoryKind::Value { 16 } else { Self::COPY_ALIGNMENT };
        let padded = size.max(1).next_multiple_of(granularity);
        let usage = Self::usage(kind);

        let buffer = match contents {
            Some(bytes) => {
                let mut init = bytes.to_vec();
                init.resize(padded as usize, 0);
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(label),
                        contents: &init,
                        usage,
                    })
            }
            None => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: padded,
                usage,
                mapped_at_creation: false,
            }),
        };

        log::debug!("Allocated {label:?}: {size} bytes ({padded} padded) as {kind:?}");
        Ok(buffer)
    }

    fn fill(
        &mut self,
        memory: &Self::Memory,
        offset: u64,
        pattern: &[u8],
        count: usize,
    ) -> Result<()> {
        if pattern.iter().all(|&b| b == 0) {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Buffer Clear"),
                });
            encoder.clear_buffer(memory, offset, Some((pattern.len() * count) as u64));
            self.queue.submit(std::iter::once(encoder.finish()));
        } else {
            // Whole groups of four elements keep every chunk copy-aligned.
            let per_chunk = ((FILL_CHUNK_BYTES / pattern.len()) / 4 * 4).max(4);
            let staging = pattern.repeat(per_chunk.min(count));
            let mut at = offset;
            let mut remaining = count;
            while remaining > 0 {
                let n = remaining.min(per_chunk);
                let bytes = &staging[..n * pattern.len()];
                self.queue.write_buffer(memory, at, bytes);
                at += bytes.len() as u64;
                remaining -= n;
            }
        }
        Ok(())
    }

    fn write(&mut self, memory: &Self::Memory, offset: u64, data: &[u8]) -> Result<()> {
        self.queue.write_buffer(memory, offset, data);
        Ok(())
    }

    fn read(&mut self, memory: &Self::Memory, offset: u64, out: &mut [u8]) -> Result<()> {
        // Copies move whole 4-byte units; widen the window and slice afterwards.
        let start = offset - offset % Self::COPY_ALIGNMENT;
        let end = (offset + out.len() as u64).next_multiple_of(Self::COPY_ALIGNMENT);
        let size = end - start;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(memory, start, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait_idle()?;

        rx.recv()
            .map_err(|e| ComputeError::Backend(format!("readback channel closed: {e}")))?
            .map_err(|e| ComputeError::Backend(format!("readback map failed: {e}")))?;

        {
            let view = slice.get_mapped_range();
            let skip = (offset - start) as usize;
            out.copy_from_slice(&view[skip..skip + out.len()]);
        }
        staging.unmap();
        Ok(())
    }

    fn dispatch(
        &mut self,
        entry: &Self::Entry,
        range: u32,
        args: &[KernelArg<'_, Self::Memory>],
    ) -> Result<()> {
        let width = entry.workgroup_size[0].max(1);
        let workgroups = range.div_ceil(width);
        if range == 0 || workgroups > self.max_workgroups {
            return Err(ComputeError::InvalidRange {
                kernel: entry.name.clone(),
                range,
                reason: format!(
                    "needs {workgroups} workgroups of {width}, device allows 1..={}",
                    self.max_workgroups
                ),
            });
        }
        if entry.launch.is_none() && range % width != 0 {
            return Err(ComputeError::InvalidRange {
                kernel: entry.name.clone(),
                range,
                reason: format!(
                    "kernel does not read launch_range, so the range must be a multiple of its workgroup width {width}"
                ),
            });
        }

        if let Some(launch) = &entry.launch {
            self.queue
                .write_buffer(&launch.buffer, 0, bytemuck::bytes_of(&range));
        }

        let entries: Vec<wgpu::BindGroupEntry<'_>> = args
            .iter()
            .map(|arg| wgpu::BindGroupEntry {
                binding: arg.slot,
                resource: arg.memory.as_entire_binding(),
            })
            .collect();

        self.validated(&format!("dispatch '{}'", entry.name), || {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&entry.name),
                layout: &entry.bind_group_layout,
                entries: &entries,
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(&entry.name),
                });
            {
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&entry.name),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(&entry.pipeline);
                cpass.set_bind_group(0, &bind_group, &[]);
                if let Some(launch) = &entry.launch {
                    cpass.set_bind_group(1, &launch.bind_group, &[]);
                }
                cpass.dispatch_workgroups(workgroups, 1, 1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));
        })
    }

    fn acquire_shared(&mut self, memories: &[&Self::Memory]) -> Result<()> {
        self.check_interop("acquire")?;
        log::trace!("Acquired {} shared buffer(s) for compute", memories.len());
        Ok(())
    }

    fn release_shared(&mut self, memories: &[&Self::Memory]) -> Result<()> {
        self.check_interop("release")?;
        log::trace!("Released {} shared buffer(s) to graphics", memories.len());
        Ok(())
    }
}
