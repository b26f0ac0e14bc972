use crate::{
    binding_model::{BindError, BoundResource, ReifiedBindGroupLayout},
    command::DrawError,
    device::Limits,
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    hub::Hub,
    id::{BindGroupId, BufferId, DeviceId, TextureId},
    pipeline::ResolvedLayout,
    resource::ResourceError,
    MAX_BIND_GROUPS,
};

use std::sync::Arc;
use thiserror::Error;
use wgt::DynamicOffset;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SetBindGroupError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Bind group index {index} is greater than the device's requested `max_bind_groups` limit {max}")]
    IndexOutOfRange { index: u32, max: u32 },
    #[error(transparent)]
    Bind(#[from] BindError),
}

impl ErrorDetail for SetBindGroupError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::IndexOutOfRange { .. } => ErrorKind::OutOfRange,
            Self::Bind(ref e) => e.kind(),
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::IndexOutOfRange { .. } => {}
            Self::Bind(ref e) => e.collect_related(related),
        }
    }
}

/// A bind group recorded at some index of a pass or bundle encoder.
#[derive(Clone, Debug)]
pub(crate) struct BoundBindGroup {
    pub(crate) id: BindGroupId,
    pub(crate) layout: Arc<ReifiedBindGroupLayout>,
    pub(crate) dynamic_offsets: Vec<DynamicOffset>,
    /// Resources the group refers to, checked again at every use.
    pub(crate) buffers: Vec<BufferId>,
    pub(crate) textures: Vec<TextureId>,
}

/// Bind groups currently set on an encoder, by group index.
#[derive(Debug, Default)]
pub(crate) struct Binder {
    entries: [Option<BoundBindGroup>; MAX_BIND_GROUPS],
}

impl Binder {
    pub(crate) fn reset(&mut self) {
        self.entries = Default::default();
    }

    pub(crate) fn assign_group(&mut self, index: u32, bound: Option<BoundBindGroup>) {
        log::trace!(
            "\tBinding group {} to {:?}",
            index,
            bound.as_ref().map(|b| b.id)
        );
        self.entries[index as usize] = bound;
    }

    /// Check that a compatible group is bound at every index `layout`
    /// requires, and that none of their resources were destroyed since.
    /// Returns the number of bind group slots the layout uses.
    pub(crate) fn check_compatibility(
        &self,
        hub: &Hub,
        layout: &ResolvedLayout,
    ) -> Result<u32, DrawError> {
        let mut slots = 0;
        for &index in layout.required_groups.iter() {
            let expected = &layout.bind_group_layouts[index as usize];
            let bound = match self.entries[index as usize] {
                Some(ref bound) => bound,
                None => return Err(DrawError::MissingBindGroup { index }),
            };
            if !bound.layout.is_compatible(expected) {
                return Err(DrawError::IncompatibleBindGroup {
                    index,
                    group: bound.id,
                });
            }
            for &buffer in bound.buffers.iter() {
                hub.buffers.get_alive(buffer)?;
            }
            for &texture in bound.textures.iter() {
                hub.textures.get_alive(texture)?;
            }
            slots = slots.max(index + 1);
        }
        Ok(slots)
    }

    pub(crate) fn group(&self, index: u32) -> Option<(BindGroupId, &[DynamicOffset])> {
        self.entries
            .get(index as usize)?
            .as_ref()
            .map(|bound| (bound.id, bound.dynamic_offsets.as_slice()))
    }
}

/// Validate a `set_bind_group` call, returning what to record at `index`.
///
/// The caller checks the encoder state first. Nothing is recorded here.
pub(crate) fn resolve_bind_group(
    hub: &Hub,
    device_id: DeviceId,
    limits: &Limits,
    index: u32,
    bind_group_id: Option<BindGroupId>,
    offsets: &[DynamicOffset],
) -> Result<Option<BoundBindGroup>, SetBindGroupError> {
    let max = limits.max_bind_groups.min(MAX_BIND_GROUPS as u32);
    if index >= max {
        return Err(SetBindGroupError::IndexOutOfRange { index, max });
    }

    let bind_group_id = match bind_group_id {
        Some(id) => id,
        None => {
            if !offsets.is_empty() {
                return Err(BindError::MismatchedDynamicOffsetCount {
                    group: index,
                    expected: 0,
                    actual: offsets.len(),
                }
                .into());
            }
            return Ok(None);
        }
    };

    let bind_group = hub.bind_groups.get(bind_group_id)?;
    if bind_group.dynamic_binding_info.len() != offsets.len() {
        return Err(BindError::MismatchedDynamicOffsetCount {
            group: index,
            expected: bind_group.dynamic_binding_info.len(),
            actual: offsets.len(),
        }
        .into());
    }

    bind_group
        .info
        .check_device(bind_group_id.into(), device_id)?;
    let mut buffers = Vec::new();
    let mut textures = Vec::new();
    for entry in bind_group.entries.iter() {
        match entry.resource {
            BoundResource::Buffer { id, .. } => {
                hub.buffers.get_alive(id)?;
                buffers.push(id);
            }
            BoundResource::TextureView { texture, .. } => {
                hub.textures.get_alive(texture)?;
                textures.push(texture);
            }
            BoundResource::Sampler(_) => {}
        }
    }
    bind_group.validate_dynamic_bindings(index, offsets, limits)?;

    Ok(Some(BoundBindGroup {
        id: bind_group_id,
        layout: Arc::clone(&bind_group.layout),
        dynamic_offsets: offsets.to_vec(),
        buffers,
        textures,
    }))
}

#[cfg(test)]
mod tests {
    use crate::{
        binding_model::{
            BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor, BindingResource,
            BufferBinding, PipelineLayoutDescriptor,
        },
        command::{ComputePassDescriptor, RenderPassColorAttachment, RenderPassDescriptor},
        device::DeviceDescriptor,
        id,
        pipeline::{
            ComputePipelineDescriptor, FragmentState, ProgrammableStageDescriptor,
            RenderPipelineDescriptor, ShaderModuleDescriptor, VertexState,
        },
        resource::{BufferDescriptor, TextureDescriptor, TextureViewDescriptor},
        ErrorKind, ValidationContext,
    };
    use std::borrow::Cow;
    use wgt::{BufferSize, BufferUsages, TextureFormat};

    /// A device with one layout holding a dynamic uniform buffer at
    /// binding 0, and a group binding 16 bytes of a 512 byte buffer.
    struct Fixture {
        ctx: ValidationContext,
        device: id::DeviceId,
        module: id::ShaderModuleId,
        pipeline_layout: id::PipelineLayoutId,
        buffer: id::BufferId,
        group: id::BindGroupId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ctx = ValidationContext::new();
            let device = ctx.device_create(&DeviceDescriptor::default()).unwrap();
            let module = ctx
                .device_create_shader_module(
                    device,
                    &ShaderModuleDescriptor {
                        label: None,
                        code: Cow::Borrowed(""),
                    },
                )
                .unwrap();
            let layout = ctx
                .device_create_bind_group_layout(
                    device,
                    &BindGroupLayoutDescriptor {
                        label: None,
                        entries: Cow::Owned(vec![wgt::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgt::ShaderStages::VERTEX | wgt::ShaderStages::COMPUTE,
                            ty: wgt::BindingType::Buffer {
                                ty: wgt::BufferBindingType::Uniform,
                                has_dynamic_offset: true,
                                min_binding_size: None,
                            },
                            count: None,
                        }]),
                    },
                )
                .unwrap();
            let pipeline_layout = ctx
                .device_create_pipeline_layout(
                    device,
                    &PipelineLayoutDescriptor {
                        label: None,
                        bind_group_layouts: Cow::Owned(vec![layout]),
                    },
                )
                .unwrap();
            let buffer = ctx
                .device_create_buffer(
                    device,
                    &BufferDescriptor {
                        label: None,
                        size: 512,
                        usage: BufferUsages::UNIFORM,
                        mapped_at_creation: false,
                    },
                )
                .unwrap();
            let group = ctx
                .device_create_bind_group(
                    device,
                    &BindGroupDescriptor {
                        label: None,
                        layout,
                        entries: Cow::Owned(vec![BindGroupEntry {
                            binding: 0,
                            resource: BindingResource::Buffer(BufferBinding {
                                buffer_id: buffer,
                                offset: 0,
                                size: BufferSize::new(16),
                            }),
                        }]),
                    },
                )
                .unwrap();
            Self {
                ctx,
                device,
                module,
                pipeline_layout,
                buffer,
                group,
            }
        }

        /// Begin a render pass with a pipeline using the dynamic layout.
        fn render_pass(&mut self) -> id::RenderPassEncoderId {
            let texture = self
                .ctx
                .device_create_texture(
                    self.device,
                    &TextureDescriptor {
                        label: None,
                        size: wgt::Extent3d {
                            width: 4,
                            height: 4,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgt::TextureDimension::D2,
                        format: TextureFormat::Rgba8Unorm,
                        usage: wgt::TextureUsages::RENDER_ATTACHMENT,
                        view_formats: Vec::new(),
                    },
                )
                .unwrap();
            let view = self
                .ctx
                .texture_create_view(texture, &TextureViewDescriptor::default())
                .unwrap();
            let targets = [Some(wgt::ColorTargetState {
                format: TextureFormat::Rgba8Unorm,
                blend: None,
                write_mask: wgt::ColorWrites::ALL,
            })];
            let pipeline = self
                .ctx
                .device_create_render_pipeline(
                    self.device,
                    &RenderPipelineDescriptor {
                        label: None,
                        layout: Some(self.pipeline_layout),
                        vertex: VertexState {
                            stage: ProgrammableStageDescriptor {
                                module: self.module,
                                entry_point: Cow::Borrowed("vs_main"),
                            },
                            buffers: Cow::Borrowed(&[]),
                        },
                        primitive: wgt::PrimitiveState::default(),
                        depth_stencil: None,
                        multisample: wgt::MultisampleState::default(),
                        fragment: Some(FragmentState {
                            stage: ProgrammableStageDescriptor {
                                module: self.module,
                                entry_point: Cow::Borrowed("fs_main"),
                            },
                            targets: Cow::Borrowed(&targets),
                        }),
                    },
                )
                .unwrap();
            let encoder = self
                .ctx
                .device_create_command_encoder(self.device, &Default::default())
                .unwrap();
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
                        ..Default::default()
                    },
                )
                .unwrap();
            self.ctx.render_pass_set_pipeline(pass, pipeline).unwrap();
            pass
        }

        fn compute_pass(&mut self) -> id::ComputePassEncoderId {
            let pipeline = self
                .ctx
                .device_create_compute_pipeline(
                    self.device,
                    &ComputePipelineDescriptor {
                        label: None,
                        layout: Some(self.pipeline_layout),
                        stage: ProgrammableStageDescriptor {
                            module: self.module,
                            entry_point: Cow::Borrowed("main"),
                        },
                    },
                )
                .unwrap();
            let encoder = self
                .ctx
                .device_create_command_encoder(self.device, &Default::default())
                .unwrap();
            let pass = self
                .ctx
                .command_encoder_begin_compute_pass(encoder, &ComputePassDescriptor::default())
                .unwrap();
            self.ctx.compute_pass_set_pipeline(pass, pipeline).unwrap();
            pass
        }
    }

    #[test]
    fn dynamic_offsets_are_aligned_and_bounded() {
        let mut f = Fixture::new();
        let pass = f.render_pass();
        let group = Some(f.group);

        let err = f
            .ctx
            .render_pass_set_bind_group(pass, 0, group, &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        let err = f
            .ctx
            .render_pass_set_bind_group(pass, 0, group, &[4])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        // 16 bytes bound in a 512 byte buffer leaves room up to 496.
        let err = f
            .ctx
            .render_pass_set_bind_group(pass, 0, group, &[512])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);

        // Rejected calls leave nothing bound.
        let err = f.ctx.render_pass_draw(pass, 3, 1, 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBinding);

        f.ctx
            .render_pass_set_bind_group(pass, 0, group, &[256])
            .unwrap();
        f.ctx.render_pass_draw(pass, 3, 1, 0, 0).unwrap();
    }

    #[test]
    fn groups_outside_the_device_limit_are_rejected() {
        let mut f = Fixture::new();
        let pass = f.compute_pass();
        let err = f
            .ctx
            .compute_pass_set_bind_group(pass, 4, Some(f.group), &[0])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        let err = f
            .ctx
            .compute_pass_set_bind_group(pass, 1, None, &[0])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
    }

    #[test]
    fn destroying_a_bound_buffer_fails_later_draws() {
        let mut f = Fixture::new();
        let pass = f.render_pass();
        f.ctx
            .render_pass_set_bind_group(pass, 0, Some(f.group), &[0])
            .unwrap();
        f.ctx.render_pass_draw(pass, 3, 1, 0, 0).unwrap();

        f.ctx.buffer_destroy(f.buffer).unwrap();
        let err = f.ctx.render_pass_draw(pass, 3, 1, 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestroyedResource);
        assert_eq!(err.related()[0], id::ResourceRef::Buffer(f.buffer));
    }

    #[test]
    fn destroying_a_bound_buffer_fails_later_dispatches() {
        let mut f = Fixture::new();
        let pass = f.compute_pass();
        f.ctx
            .compute_pass_set_bind_group(pass, 0, Some(f.group), &[256])
            .unwrap();
        f.ctx.compute_pass_dispatch_workgroups(pass, 1, 1, 1).unwrap();

        f.ctx.buffer_destroy(f.buffer).unwrap();
        let err = f
            .ctx
            .compute_pass_dispatch_workgroups(pass, 1, 1, 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestroyedResource);

        // Rebinding the group is rejected too.
        let err = f
            .ctx
            .compute_pass_set_bind_group(pass, 0, Some(f.group), &[0])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestroyedResource);
    }
}
