//! wgpu backend
//!
//! Texel buffers are storage buffers of `vec4<f32>`; programs are WGSL compute
//! modules with one pipeline per entry point, all sharing the bind group
//! layout described on [`ProgramDescriptor`]. Each call records and submits
//! its own command buffer.

use crate::backend::{
    AttributeTargets, Backend, Bindings, BufferDescriptor, BufferHandle, ProgramDescriptor, ProgramHandle,
};
use crate::error::{ConfigurationError, KernelError, ResourceError, SimulationError};
use crate::params::DispatchInfo;
use std::collections::HashMap;
use std::sync::mpsc;
use trail_physics::{MeshVertex, Texel, TexelGrid};
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: u32 = 8;
const TEXEL_SIZE: u64 = std::mem::size_of::<Texel>() as u64;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
}

struct GpuProgram {
    label: &'static str,
    layout: wgpu::BindGroupLayout,
    pipelines: Vec<wgpu::ComputePipeline>,
    input_count: usize,
    output_count: usize,
}

/// GPU backend over a wgpu device
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    programs: HashMap<ProgramHandle, GpuProgram>,
    // Bound to input slots nothing was assigned to
    placeholder: wgpu::Buffer,
    next_id: u32,
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn workgroups(extent: u32) -> u32 {
    extent.div_ceil(WORKGROUP_SIZE)
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Unbound Input Placeholder"),
            size: TEXEL_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            buffers: HashMap::new(),
            programs: HashMap::new(),
            placeholder,
            next_id: 0,
        }
    }

    /// Create a device without a surface. Used by tests and offline runs.
    pub async fn headless() -> Result<Self, SimulationError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ResourceError::NoAdapter(e.to_string()))?;

        log::info!("Using GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Headless Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ResourceError::DeviceRequest(e.to_string()))?;

        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Underlying storage buffer, for binding into render passes
    pub fn texel_buffer(&self, handle: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle).map(|b| &b.buffer)
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&GpuBuffer, ResourceError> {
        self.buffers.get(&handle).ok_or(ResourceError::UnknownBuffer(handle.0))
    }

    fn uniform_buffer(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        // Uniform blocks are bound whole; keep them at a 16-byte multiple.
        let mut bytes = contents.to_vec();
        let padded = bytes.len().max(16).next_multiple_of(16);
        bytes.resize(padded, 0);
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: &bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    fn submit_pass(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        width: u32,
        height: u32,
    ) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(pipeline);
            compute_pass.set_bind_group(0, bind_group, &[]);
            compute_pass.dispatch_workgroups(workgroups(width), workgroups(height), 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl Backend for WgpuBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, SimulationError> {
        let size = TexelGrid::byte_size(desc.width, desc.height);
        let max_size = self.device.limits().max_storage_buffer_binding_size as u64;
        if size == 0 || size > max_size {
            return Err(ResourceError::BufferAllocation {
                label: desc.label.to_string(),
                width: desc.width,
                height: desc.height,
            }
            .into());
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(
            handle,
            GpuBuffer {
                buffer,
                width: desc.width,
                height: desc.height,
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(gpu) = self.buffers.remove(&buffer) {
            gpu.buffer.destroy();
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> Result<ProgramHandle, SimulationError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let mut entries = vec![
            layout_entry(0, wgpu::BufferBindingType::Uniform),
            layout_entry(1, wgpu::BufferBindingType::Uniform),
        ];
        let first_output = 2 + desc.input_count as u32;
        for i in 0..desc.input_count as u32 {
            entries.push(layout_entry(2 + i, wgpu::BufferBindingType::Storage { read_only: true }));
        }
        for i in 0..desc.output_count as u32 {
            entries.push(layout_entry(
                first_output + i,
                wgpu::BufferBindingType::Storage { read_only: false },
            ));
        }

        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(desc.label),
            entries: &entries,
        });
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipelines = desc
            .entry_points
            .iter()
            .map(|&entry| {
                self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    cache: None,
                })
            })
            .collect();

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ResourceError::ProgramCreation {
                label: desc.label.to_string(),
                reason: error.to_string(),
            }
            .into());
        }

        log::debug!("Created program `{}` ({} passes)", desc.label, desc.entry_points.len());
        let handle = ProgramHandle(self.allocate_id());
        self.programs.insert(
            handle,
            GpuProgram {
                label: desc.label,
                layout,
                pipelines,
                input_count: desc.input_count,
                output_count: desc.output_count,
            },
        );
        Ok(handle)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn dispatch(
        &mut self,
        program: ProgramHandle,
        pass: usize,
        bindings: &Bindings,
        target: BufferHandle,
    ) -> Result<(), SimulationError> {
        let gpu_program = self
            .programs
            .get(&program)
            .ok_or(ResourceError::UnknownProgram(program.0))?;
        let pipeline = gpu_program.pipelines.get(pass).ok_or(KernelError::UnknownPass {
            label: gpu_program.label,
            pass,
        })?;
        if gpu_program.output_count != 1 {
            return Err(ResourceError::ProgramCreation {
                label: gpu_program.label.to_string(),
                reason: "full-buffer dispatch needs exactly one output".to_string(),
            }
            .into());
        }

        let output = self.buffer(target)?;
        let info = self.uniform_buffer("Dispatch Info", bytemuck::bytes_of(&DispatchInfo::new(output.width, output.height)));
        let params = self.uniform_buffer("Kernel Params", bindings.uniforms());

        let mut inputs = Vec::with_capacity(gpu_program.input_count);
        for slot in 0..gpu_program.input_count {
            let buffer = match bindings.input(slot) {
                Some(handle) => &self.buffer(handle)?.buffer,
                None => &self.placeholder,
            };
            inputs.push(buffer);
        }

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: info.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: params.as_entire_binding(),
            },
        ];
        for (i, buffer) in inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + i as u32,
                resource: buffer.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: 2 + gpu_program.input_count as u32,
            resource: output.buffer.as_entire_binding(),
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(gpu_program.label),
            layout: &gpu_program.layout,
            entries: &entries,
        });

        self.submit_pass(gpu_program.label, pipeline, &bind_group, output.width, output.height);
        Ok(())
    }

    fn extract_attributes(
        &mut self,
        program: ProgramHandle,
        vertices: &[MeshVertex],
        targets: &AttributeTargets,
    ) -> Result<(), SimulationError> {
        if vertices.is_empty() {
            return Err(ConfigurationError::ZeroVertices.into());
        }
        let gpu_program = self
            .programs
            .get(&program)
            .ok_or(ResourceError::UnknownProgram(program.0))?;
        let pipeline = gpu_program.pipelines.first().ok_or(KernelError::UnknownPass {
            label: gpu_program.label,
            pass: 0,
        })?;
        if gpu_program.input_count != 1 || gpu_program.output_count != 3 {
            return Err(ResourceError::ProgramCreation {
                label: gpu_program.label.to_string(),
                reason: "extraction needs one input and three outputs".to_string(),
            }
            .into());
        }

        let position = self.buffer(targets.position)?;
        let normal = self.buffer(targets.normal)?;
        let tangent = self.buffer(targets.tangent)?;
        let width = position.width.min(vertices.len() as u32);

        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Deformed Vertex Buffer"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let info = self.uniform_buffer("Dispatch Info", bytemuck::bytes_of(&DispatchInfo::new(width, 1)));
        let params = self.uniform_buffer("Bake Params", &[]);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(gpu_program.label),
            layout: &gpu_program.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: info.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: vertex_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: position.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: normal.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: tangent.buffer.as_entire_binding(),
                },
            ],
        });

        self.submit_pass(gpu_program.label, pipeline, &bind_group, width, 1);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> Result<TexelGrid, SimulationError> {
        let source = self.buffer(buffer)?;
        let (width, height) = (source.width, source.height);
        let size = TexelGrid::byte_size(width, height);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texel Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texel Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| ResourceError::ReadBack(e.to_string()))?;
        receiver
            .recv()
            .map_err(|e| ResourceError::ReadBack(e.to_string()))?
            .map_err(|e| ResourceError::ReadBack(e.to_string()))?;

        let texels: Vec<Texel> = {
            let data = slice.get_mapped_range();
            bytemuck::pod_collect_to_vec(&data[..])
        };
        staging.unmap();

        TexelGrid::from_texels(width, height, texels)
            .ok_or_else(|| ResourceError::ReadBack("texel count does not match buffer size".to_string()).into())
    }

    fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn live_programs(&self) -> usize {
        self.programs.len()
    }
}
