#![allow(dead_code)]

use std::borrow::Cow;

use wgpu_shadow::{
    binding_model::{
        BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor, BindingResource,
        BufferBinding, PipelineLayoutDescriptor,
    },
    command::{RenderPassColorAttachment, RenderPassDescriptor},
    device::DeviceDescriptor,
    id,
    pipeline::{
        FragmentState, ProgrammableStageDescriptor, RenderPipelineDescriptor,
        ShaderModuleDescriptor, VertexBufferLayout, VertexState,
    },
    resource::{BufferDescriptor, TextureDescriptor, TextureViewDescriptor},
    ValidationContext,
};
use wgt::{BufferUsages, TextureFormat};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct TestDevice {
    pub ctx: ValidationContext,
    pub device: id::DeviceId,
}

impl TestDevice {
    pub fn new() -> Self {
        init_logger();
        let mut ctx = ValidationContext::new();
        let device = ctx.device_create(&DeviceDescriptor::default()).unwrap();
        Self { ctx, device }
    }

    pub fn buffer(&mut self, size: u64, usage: BufferUsages) -> id::BufferId {
        self.ctx
            .device_create_buffer(
                self.device,
                &BufferDescriptor {
                    label: None,
                    size,
                    usage,
                    mapped_at_creation: false,
                },
            )
            .unwrap()
    }

    pub fn texture(&mut self, format: TextureFormat, width: u32, height: u32) -> id::TextureId {
        self.ctx
            .device_create_texture(
                self.device,
                &TextureDescriptor {
                    label: None,
                    size: wgt::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgt::TextureDimension::D2,
                    format,
                    usage: wgt::TextureUsages::RENDER_ATTACHMENT
                        | wgt::TextureUsages::TEXTURE_BINDING,
                    view_formats: Vec::new(),
                },
            )
            .unwrap()
    }

    pub fn view(&mut self, texture: id::TextureId) -> id::TextureViewId {
        self.ctx
            .texture_create_view(texture, &TextureViewDescriptor::default())
            .unwrap()
    }

    pub fn encoder(&mut self) -> id::CommandEncoderId {
        self.ctx
            .device_create_command_encoder(self.device, &Default::default())
            .unwrap()
    }

    /// Begin a pass on a fresh encoder with a single color attachment.
    pub fn color_pass(
        &mut self,
        format: TextureFormat,
        occlusion_query_set: Option<id::QuerySetId>,
    ) -> (id::CommandEncoderId, id::RenderPassEncoderId) {
        let texture = self.texture(format, 4, 4);
        let view = self.view(texture);
        let encoder = self.encoder();
        let pass = self
            .ctx
            .command_encoder_begin_render_pass(
                encoder,
                &RenderPassDescriptor {
                    color_attachments: Cow::Owned(vec![Some(RenderPassColorAttachment {
                        view,
                        depth_slice: None,
                        resolve_target: None,
                    })]),
                    occlusion_query_set,
                    ..Default::default()
                },
            )
            .unwrap();
        (encoder, pass)
    }

    /// A shader module the context cannot see into.
    pub fn opaque_module(&mut self) -> id::ShaderModuleId {
        self.ctx
            .device_create_shader_module(
                self.device,
                &ShaderModuleDescriptor {
                    label: None,
                    code: Cow::Borrowed("// opaque"),
                },
            )
            .unwrap()
    }

    pub fn render_pipeline(
        &mut self,
        layout: Option<id::PipelineLayoutId>,
        targets: &[Option<TextureFormat>],
        vertex_buffers: &[Option<VertexBufferLayout>],
        sample_count: u32,
    ) -> Result<id::RenderPipelineId, wgpu_shadow::Error> {
        let module = self.opaque_module();
        let stage = |entry_point: &'static str| ProgrammableStageDescriptor {
            module,
            entry_point: Cow::Borrowed(entry_point),
        };
        let targets = targets
            .iter()
            .map(|format| {
                format.map(|format| wgt::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgt::ColorWrites::ALL,
                })
            })
            .collect::<Vec<_>>();
        self.ctx.device_create_render_pipeline(
            self.device,
            &RenderPipelineDescriptor {
                label: None,
                layout,
                vertex: VertexState {
                    stage: stage("vs_main"),
                    buffers: Cow::Borrowed(vertex_buffers),
                },
                primitive: wgt::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgt::MultisampleState {
                    count: sample_count,
                    ..Default::default()
                },
                fragment: Some(FragmentState {
                    stage: stage("fs_main"),
                    targets: Cow::Owned(targets),
                }),
            },
        )
    }

    /// A bind group layout with one uniform buffer at binding 0.
    pub fn uniform_layout(&mut self) -> id::BindGroupLayoutId {
        self.ctx
            .device_create_bind_group_layout(
                self.device,
                &BindGroupLayoutDescriptor {
                    label: None,
                    entries: Cow::Owned(vec![uniform_entry(0)]),
                },
            )
            .unwrap()
    }

    pub fn pipeline_layout(&mut self, groups: &[id::BindGroupLayoutId]) -> id::PipelineLayoutId {
        self.ctx
            .device_create_pipeline_layout(
                self.device,
                &PipelineLayoutDescriptor {
                    label: None,
                    bind_group_layouts: Cow::Borrowed(groups),
                },
            )
            .unwrap()
    }

    pub fn uniform_bind_group(
        &mut self,
        layout: id::BindGroupLayoutId,
        buffer: id::BufferId,
    ) -> id::BindGroupId {
        self.ctx
            .device_create_bind_group(
                self.device,
                &BindGroupDescriptor {
                    label: None,
                    layout,
                    entries: Cow::Owned(vec![BindGroupEntry {
                        binding: 0,
                        resource: BindingResource::Buffer(BufferBinding {
                            buffer_id: buffer,
                            offset: 0,
                            size: None,
                        }),
                    }]),
                },
            )
            .unwrap()
    }
}

pub fn uniform_entry(binding: u32) -> wgt::BindGroupLayoutEntry {
    wgt::BindGroupLayoutEntry {
        binding,
        visibility: wgt::ShaderStages::VERTEX,
        ty: wgt::BindingType::Buffer {
            ty: wgt::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// One `Float32x4` attribute at location `location`, tightly packed.
pub fn float4_attribute(location: u32) -> [wgt::VertexAttribute; 1] {
    [wgt::VertexAttribute {
        format: wgt::VertexFormat::Float32x4,
        offset: 0,
        shader_location: location,
    }]
}
