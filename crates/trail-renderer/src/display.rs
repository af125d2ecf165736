//! Trail display adapter
//!
//! Binds the newest Position/Velocity/Orthnorm slots of a [`FrameOutput`] and
//! draws `line_count` ribbons of `history_length - 1` segments each. Vertex
//! positions are generated in the shader from the vertex index; no vertex
//! buffer is bound.

use crate::camera::{Camera, CameraUniform};
use bytemuck::{Pod, Zeroable};
use trail_physics::texel_u;
use trail_simulation::{BufferHandle, FrameOutput, ResourceError, SimulationError, WgpuBackend};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Per-frame trail parameters (binding 1)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TrailDrawUniform {
    /// `(max_width, cutoff_speed, speed_to_width / max_width)`
    pub line_width: [f32; 3],
    pub random_seed: u32,
    pub line_count: u32,
    pub history_length: u32,
    /// Columns in the simulation buffers
    pub width: u32,
    pub _padding: u32,
}

impl TrailDrawUniform {
    pub fn from_frame(frame: &FrameOutput) -> Self {
        Self {
            line_width: frame.line_width,
            random_seed: frame.random_seed,
            line_count: frame.line_count,
            history_length: frame.history_length,
            width: frame.width,
            _padding: 0,
        }
    }
}

/// Simulation column sampled by trail line `line`.
///
/// Lines are spread evenly over the columns, sampling at the texel centre
/// `(line + 0.5) / line_count`.
pub fn line_column(line: u32, line_count: u32, width: u32) -> u32 {
    if width == 0 {
        return 0;
    }
    let u = texel_u(line, line_count.max(1));
    ((u * width as f32) as u32).min(width - 1)
}

/// Vertices in one non-indexed ribbon draw
pub fn ribbon_vertex_count(line_count: u32, history_length: u32) -> u32 {
    line_count * history_length.saturating_sub(1) * 6
}

pub struct TrailRenderer {
    render_pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    trail_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    depth_texture: wgpu::TextureView,
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl TrailRenderer {
    pub fn new(device: &wgpu::Device, surface_config: &wgpu::SurfaceConfiguration) -> Self {
        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Camera Buffer"),
            size: std::mem::size_of::<CameraUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let trail_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Trail Draw Buffer"),
            size: std::mem::size_of::<TrailDrawUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let depth_texture = Self::create_depth_texture(device, surface_config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Trail Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/trail.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Trail Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                uniform_entry(1),
                // position, velocity, orthnorm
                storage_entry(2),
                storage_entry(3),
                storage_entry(4),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Trail Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Trail Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vertex"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fragment"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_config.format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            render_pipeline,
            camera_buffer,
            trail_buffer,
            bind_group_layout,
            depth_texture,
        }
    }

    fn create_depth_texture(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
        let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d {
                width: config.width.max(1),
                height: config.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        depth_texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    pub fn resize(&mut self, device: &wgpu::Device, new_config: &wgpu::SurfaceConfiguration) {
        self.depth_texture = Self::create_depth_texture(device, new_config);
        log::debug!("Trail depth target resized to {}x{}", new_config.width, new_config.height);
    }

    /// Clear the target and draw the trails of `frame`, or only clear when
    /// there is nothing to draw yet.
    pub fn render(
        &self,
        backend: &WgpuBackend,
        surface_view: &wgpu::TextureView,
        camera: &Camera,
        frame: Option<&FrameOutput>,
        time: f32,
    ) -> Result<(), SimulationError> {
        let device = backend.device();
        let queue = backend.queue();

        queue.write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[camera.to_uniform(time)]));

        let bind_group = match frame {
            Some(frame) => {
                let resolve = |handle: BufferHandle| {
                    backend
                        .texel_buffer(handle)
                        .ok_or(ResourceError::UnknownBuffer(handle.id()))
                };
                let position = resolve(frame.position.last)?;
                let velocity = resolve(frame.velocity.last)?;
                let orthnorm = resolve(frame.orthnorm.last)?;
                queue.write_buffer(
                    &self.trail_buffer,
                    0,
                    bytemuck::cast_slice(&[TrailDrawUniform::from_frame(frame)]),
                );
                Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Trail Bind Group"),
                    layout: &self.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self.camera_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: self.trail_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: position.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: velocity.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: orthnorm.as_entire_binding(),
                        },
                    ],
                }))
            }
            None => None,
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Trail Render Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Trail Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: surface_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: 0.01,
                            g: 0.01,
                            b: 0.018,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let (Some(frame), Some(bind_group)) = (frame, &bind_group) {
                render_pass.set_pipeline(&self.render_pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.draw(0..ribbon_vertex_count(frame.line_count, frame.history_length), 0..1);
            }
        }

        queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_uniform_layout() {
        assert_eq!(std::mem::size_of::<TrailDrawUniform>(), 32);
    }

    #[test]
    fn test_lines_spread_over_columns() {
        // more lines than columns: every column is used, none overflows
        let columns: Vec<u32> = (0..8).map(|l| line_column(l, 8, 3)).collect();
        assert_eq!(columns, vec![0, 0, 0, 1, 1, 2, 2, 2]);
        assert_eq!(line_column(4094, 4095, 100), 99);
        assert_eq!(line_column(0, 4095, 100), 0);
        assert_eq!(line_column(3, 10, 0), 0);
    }

    #[test]
    fn test_ribbon_vertex_count_matches_template() {
        let template = trail_physics::TrailTemplate::new(8).unwrap();
        assert_eq!(
            ribbon_vertex_count(template.line_count(), template.history_length()),
            template.ribbon_vertex_count()
        );
        assert_eq!(ribbon_vertex_count(10, 0), 0);
    }
}
