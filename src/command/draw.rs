/*! Draw structures - shared between render passes and bundles.
!*/

use crate::{
    binding_model::BoundResource,
    command::{
        bind::{self, Binder},
        DebugGroupError, EncoderStateError, SetBindGroupError,
    },
    device::{Limits, RenderPassCompatibilityError, RenderPassContext},
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    hub::Hub,
    id::{self, ResourceRef},
    pipeline::PipelineFlags,
    resource::ResourceError,
    validation::{check_buffer_usage, MissingBufferUsageError},
    FastHashSet, MAX_VERTEX_BUFFERS,
};

use thiserror::Error;
use wgt::{BufferAddress, BufferSize, BufferUsages, DynamicOffset, IndexFormat};

/// Size of the argument block of an indirect draw.
pub(crate) const DRAW_INDIRECT_SIZE: BufferAddress = 16;
/// Size of the argument block of an indirect indexed draw.
pub(crate) const DRAW_INDEXED_INDIRECT_SIZE: BufferAddress = 20;

/// Error validating a draw or dispatch call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    MissingBufferUsage(#[from] MissingBufferUsageError),
    #[error("Pipeline must be set")]
    MissingPipeline,
    #[error("The pipeline layout requires a bind group at index {index}, but none is set")]
    MissingBindGroup { index: u32 },
    #[error("Bind group {group:?} at index {index} is incompatible with the current pipeline layout")]
    IncompatibleBindGroup { index: u32, group: id::BindGroupId },
    #[error("Vertex buffer {slot} must be set")]
    MissingVertexBuffer { slot: u32 },
    #[error("Index buffer must be set")]
    MissingIndexBuffer,
    #[error("Vertex buffer {slot} ({buffer:?}) binds {size} bytes, but {required} bytes are read for the drawn vertices. Did you bind the correct `Vertex` step-rate vertex buffer?")]
    VertexBeyondLimit {
        slot: u32,
        buffer: id::BufferId,
        required: BufferAddress,
        size: BufferAddress,
    },
    #[error("Vertex buffer {slot} ({buffer:?}) binds {size} bytes, but {required} bytes are read for the drawn instances. Did you bind the correct `Instance` step-rate vertex buffer?")]
    InstanceBeyondLimit {
        slot: u32,
        buffer: id::BufferId,
        required: BufferAddress,
        size: BufferAddress,
    },
    #[error("Index buffer {buffer:?} binds {size} bytes, but {required} bytes of indices are read. Did you bind the correct index buffer?")]
    IndexBeyondLimit {
        buffer: id::BufferId,
        required: BufferAddress,
        size: BufferAddress,
    },
    #[error(
        "Pipeline strip index format ({pipeline:?}) and buffer index format ({buffer:?}) do not match"
    )]
    UnmatchedIndexFormats {
        pipeline: Option<IndexFormat>,
        buffer: IndexFormat,
    },
    #[error("{bind_groups} bind group slots and {vertex_buffers} vertex buffer slots are used, more than the device's requested `max_bind_groups_plus_vertex_buffers` limit {limit}")]
    TooManyBindings {
        bind_groups: u32,
        vertex_buffers: u32,
        limit: u32,
    },
    #[error("Indirect buffer offset {0} is not a multiple of 4")]
    UnalignedIndirectOffset(BufferAddress),
    #[error("Indirect arguments {offset}..{end} overrun {buffer:?} of size {size}")]
    IndirectBufferOverrun {
        buffer: id::BufferId,
        offset: BufferAddress,
        end: BufferAddress,
        size: BufferAddress,
    },
    #[error("Each current dispatch group size dimension ({current:?}) must be less or equal to {limit}")]
    DispatchGroupSizeExceeded { current: [u32; 3], limit: u32 },
}

impl ErrorDetail for DrawError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::MissingBufferUsage(ref e) => e.kind(),
            Self::MissingPipeline
            | Self::MissingBindGroup { .. }
            | Self::MissingVertexBuffer { .. }
            | Self::MissingIndexBuffer => ErrorKind::MissingBinding,
            Self::IncompatibleBindGroup { .. } => ErrorKind::LayoutIncompatible,
            Self::VertexBeyondLimit { .. }
            | Self::InstanceBeyondLimit { .. }
            | Self::IndexBeyondLimit { .. }
            | Self::IndirectBufferOverrun { .. } => ErrorKind::SizeMismatch,
            Self::UnmatchedIndexFormats { .. } | Self::UnalignedIndirectOffset(_) => {
                ErrorKind::MalformedArguments
            }
            Self::TooManyBindings { .. } | Self::DispatchGroupSizeExceeded { .. } => {
                ErrorKind::OutOfRange
            }
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::MissingBufferUsage(ref e) => e.collect_related(related),
            Self::IncompatibleBindGroup { group, .. } => related.push(group.into()),
            Self::VertexBeyondLimit { buffer, .. }
            | Self::InstanceBeyondLimit { buffer, .. }
            | Self::IndexBeyondLimit { buffer, .. }
            | Self::IndirectBufferOverrun { buffer, .. } => related.push(buffer.into()),
            _ => {}
        }
    }
}

/// Error encountered when encoding a render command.
/// This is the shared error set between render bundles and passes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RenderCommandError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] EncoderStateError),
    #[error(transparent)]
    DebugGroup(#[from] DebugGroupError),
    #[error(transparent)]
    SetBindGroup(#[from] SetBindGroupError),
    #[error("Vertex buffer slot {index} is greater than the device's requested `max_vertex_buffers` limit {max}")]
    VertexBufferIndexOutOfRange { index: u32, max: u32 },
    #[error("Buffer offset {offset} is not a multiple of {alignment}")]
    UnalignedBufferOffset {
        offset: BufferAddress,
        alignment: BufferAddress,
    },
    #[error("Range {offset}..{offset}+{size} is out of the bounds of {buffer:?} of size {buffer_size}")]
    BufferRangeOutOfBounds {
        buffer: id::BufferId,
        offset: BufferAddress,
        size: BufferAddress,
        buffer_size: BufferAddress,
    },
    #[error(transparent)]
    MissingBufferUsage(#[from] MissingBufferUsageError),
    #[error("Render pipeline is incompatible with the render pass")]
    IncompatiblePipelineTargets(#[from] RenderPassCompatibilityError),
    #[error("Render pipeline {pipeline:?} writes to depth, while the pass has read-only depth access")]
    IncompatibleDepthAccess { pipeline: id::RenderPipelineId },
    #[error("Render pipeline {pipeline:?} writes to stencil, while the pass has read-only stencil access")]
    IncompatibleStencilAccess { pipeline: id::RenderPipelineId },
    #[error(transparent)]
    Draw(#[from] DrawError),
    #[error("{0} commands cannot be recorded in a render bundle")]
    UnsupportedInBundle(&'static str),
}

impl ErrorDetail for RenderCommandError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::State(ref e) => e.kind(),
            Self::DebugGroup(ref e) => e.kind(),
            Self::SetBindGroup(ref e) => e.kind(),
            Self::MissingBufferUsage(ref e) => e.kind(),
            Self::IncompatiblePipelineTargets(ref e) => e.kind(),
            Self::Draw(ref e) => e.kind(),
            Self::VertexBufferIndexOutOfRange { .. } | Self::BufferRangeOutOfBounds { .. } => {
                ErrorKind::OutOfRange
            }
            Self::UnalignedBufferOffset { .. } | Self::UnsupportedInBundle(_) => {
                ErrorKind::MalformedArguments
            }
            Self::IncompatibleDepthAccess { .. } | Self::IncompatibleStencilAccess { .. } => {
                ErrorKind::LayoutIncompatible
            }
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::State(ref e) => e.collect_related(related),
            Self::SetBindGroup(ref e) => e.collect_related(related),
            Self::MissingBufferUsage(ref e) => e.collect_related(related),
            Self::IncompatiblePipelineTargets(ref e) => e.collect_related(related),
            Self::Draw(ref e) => e.collect_related(related),
            Self::BufferRangeOutOfBounds { buffer, .. } => related.push(buffer.into()),
            Self::IncompatibleDepthAccess { pipeline }
            | Self::IncompatibleStencilAccess { pipeline } => related.push(pipeline.into()),
            _ => {}
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rect<T> {
    pub x: T,
    pub y: T,
    pub w: T,
    pub h: T,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct IndexState {
    pub(crate) buffer: id::BufferId,
    pub(crate) format: IndexFormat,
    pub(crate) size: BufferAddress,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct VertexBufferState {
    pub(crate) buffer: id::BufferId,
    pub(crate) size: BufferAddress,
}

fn index_format_size(format: IndexFormat) -> BufferAddress {
    match format {
        IndexFormat::Uint16 => 2,
        IndexFormat::Uint32 => 4,
    }
}

/// Element counts a draw reads from its vertex buffers. `None` when only the
/// presence of the buffers can be checked.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DrawExtent {
    pub(crate) vertices: Option<u64>,
    pub(crate) instances: Option<u64>,
}

impl DrawExtent {
    pub(crate) const UNKNOWN: Self = Self {
        vertices: None,
        instances: None,
    };
}

/// Validate the buffer of an indirect draw or dispatch.
pub(crate) fn check_indirect_buffer(
    hub: &Hub,
    device_id: id::DeviceId,
    buffer_id: id::BufferId,
    offset: BufferAddress,
    block_size: BufferAddress,
) -> Result<(), DrawError> {
    let buffer = hub.buffers.get_usable(buffer_id, device_id)?;
    check_buffer_usage(buffer_id, buffer.usage, BufferUsages::INDIRECT)?;
    if offset % 4 != 0 {
        return Err(DrawError::UnalignedIndirectOffset(offset));
    }
    let end = offset.saturating_add(block_size);
    if end > buffer.size {
        return Err(DrawError::IndirectBufferOverrun {
            buffer: buffer_id,
            offset,
            end,
            size: buffer.size,
        });
    }
    Ok(())
}

/// Recording state shared by render passes and render bundle encoders.
///
/// Every method validates its call completely before recording anything.
#[derive(Debug)]
pub(crate) struct RenderState {
    pub(crate) device_id: id::DeviceId,
    pub(crate) limits: Limits,
    pub(crate) context: RenderPassContext,
    pub(crate) is_depth_read_only: bool,
    pub(crate) is_stencil_read_only: bool,
    pub(crate) binder: Binder,
    pub(crate) pipeline: Option<id::RenderPipelineId>,
    pub(crate) index: Option<IndexState>,
    pub(crate) vertex: [Option<VertexBufferState>; MAX_VERTEX_BUFFERS],
    /// Buffers and textures referenced by recorded commands.
    pub(crate) used_buffers: FastHashSet<id::BufferId>,
    pub(crate) used_textures: FastHashSet<id::TextureId>,
}

impl RenderState {
    pub(crate) fn new(
        device_id: id::DeviceId,
        limits: Limits,
        context: RenderPassContext,
        is_depth_read_only: bool,
        is_stencil_read_only: bool,
    ) -> Self {
        Self {
            device_id,
            limits,
            context,
            is_depth_read_only,
            is_stencil_read_only,
            binder: Binder::default(),
            pipeline: None,
            index: None,
            vertex: Default::default(),
            used_buffers: FastHashSet::default(),
            used_textures: FastHashSet::default(),
        }
    }

    /// Forget the pipeline and every binding.
    pub(crate) fn reset_bindings(&mut self) {
        self.binder.reset();
        self.pipeline = None;
        self.index = None;
        self.vertex = Default::default();
    }

    pub(crate) fn set_bind_group(
        &mut self,
        hub: &Hub,
        index: u32,
        bind_group_id: Option<id::BindGroupId>,
        offsets: &[DynamicOffset],
    ) -> Result<(), RenderCommandError> {
        let bound = bind::resolve_bind_group(
            hub,
            self.device_id,
            &self.limits,
            index,
            bind_group_id,
            offsets,
        )?;
        if let Some(bind_group_id) = bind_group_id {
            // Resolved above, so the group and its resources are alive.
            let bind_group = hub.bind_groups.get(bind_group_id)?;
            for entry in bind_group.entries.iter() {
                match entry.resource {
                    BoundResource::Buffer { id, .. } => {
                        self.used_buffers.insert(id);
                    }
                    BoundResource::TextureView { texture, .. } => {
                        self.used_textures.insert(texture);
                    }
                    BoundResource::Sampler(_) => {}
                }
            }
        }
        self.binder.assign_group(index, bound);
        Ok(())
    }

    pub(crate) fn set_pipeline(
        &mut self,
        hub: &Hub,
        pipeline_id: id::RenderPipelineId,
    ) -> Result<(), RenderCommandError> {
        let pipeline = hub
            .render_pipelines
            .get_on_device(pipeline_id, self.device_id)?;

        self.context
            .check_compatible(&pipeline.pass_context, ResourceRef::RenderPipeline(pipeline_id))?;
        if pipeline.flags.contains(PipelineFlags::WRITES_DEPTH) && self.is_depth_read_only {
            return Err(RenderCommandError::IncompatibleDepthAccess {
                pipeline: pipeline_id,
            });
        }
        if pipeline.flags.contains(PipelineFlags::WRITES_STENCIL) && self.is_stencil_read_only {
            return Err(RenderCommandError::IncompatibleStencilAccess {
                pipeline: pipeline_id,
            });
        }

        log::trace!("\tSetting pipeline {:?}", pipeline_id);
        self.pipeline = Some(pipeline_id);
        Ok(())
    }

    /// Check `offset`/`size` against a buffer and resolve the bound size.
    fn buffer_range(
        &self,
        hub: &Hub,
        buffer_id: id::BufferId,
        usage: BufferUsages,
        offset: BufferAddress,
        size: Option<BufferSize>,
    ) -> Result<BufferAddress, RenderCommandError> {
        let buffer = hub.buffers.get_usable(buffer_id, self.device_id)?;
        check_buffer_usage(buffer_id, buffer.usage, usage)?;
        let bound_size = match size {
            Some(size) => size.get(),
            None => buffer.size.saturating_sub(offset),
        };
        let fits = offset
            .checked_add(bound_size)
            .map_or(false, |end| end <= buffer.size);
        if !fits {
            return Err(RenderCommandError::BufferRangeOutOfBounds {
                buffer: buffer_id,
                offset,
                size: bound_size,
                buffer_size: buffer.size,
            });
        }
        Ok(bound_size)
    }

    pub(crate) fn set_vertex_buffer(
        &mut self,
        hub: &Hub,
        slot: u32,
        buffer_id: Option<id::BufferId>,
        offset: BufferAddress,
        size: Option<BufferSize>,
    ) -> Result<(), RenderCommandError> {
        let max = self.limits.max_vertex_buffers.min(MAX_VERTEX_BUFFERS as u32);
        if slot >= max {
            return Err(RenderCommandError::VertexBufferIndexOutOfRange { index: slot, max });
        }
        if offset % wgt::VERTEX_STRIDE_ALIGNMENT != 0 {
            return Err(RenderCommandError::UnalignedBufferOffset {
                offset,
                alignment: wgt::VERTEX_STRIDE_ALIGNMENT,
            });
        }

        let state = match buffer_id {
            Some(buffer_id) => {
                let size = self.buffer_range(hub, buffer_id, BufferUsages::VERTEX, offset, size)?;
                self.used_buffers.insert(buffer_id);
                Some(VertexBufferState {
                    buffer: buffer_id,
                    size,
                })
            }
            None => None,
        };
        log::trace!("\tVertex buffer slot {} set to {:?}", slot, state);
        self.vertex[slot as usize] = state;
        Ok(())
    }

    pub(crate) fn set_index_buffer(
        &mut self,
        hub: &Hub,
        buffer_id: id::BufferId,
        format: IndexFormat,
        offset: BufferAddress,
        size: Option<BufferSize>,
    ) -> Result<(), RenderCommandError> {
        let alignment = index_format_size(format);
        if offset % alignment != 0 {
            return Err(RenderCommandError::UnalignedBufferOffset { offset, alignment });
        }
        let size = self.buffer_range(hub, buffer_id, BufferUsages::INDEX, offset, size)?;

        self.used_buffers.insert(buffer_id);
        self.index = Some(IndexState {
            buffer: buffer_id,
            format,
            size,
        });
        Ok(())
    }

    /// Checks shared by every kind of draw: pipeline, bind groups, vertex
    /// buffers and the slot budget.
    fn check_draw(&self, hub: &Hub, extent: DrawExtent) -> Result<(), DrawError> {
        let pipeline_id = self.pipeline.ok_or(DrawError::MissingPipeline)?;
        let pipeline = hub.render_pipelines.get(pipeline_id)?;

        let bind_group_slots = self.binder.check_compatibility(hub, &pipeline.layout)?;

        for (slot, layout) in pipeline.vertex_buffers.iter().enumerate() {
            let layout = match *layout {
                Some(ref layout) => layout,
                None => continue,
            };
            let slot = slot as u32;
            let bound = self.vertex[slot as usize].ok_or(DrawError::MissingVertexBuffer { slot })?;
            hub.buffers.get_alive(bound.buffer)?;

            let (count, is_instance) = match layout.step_mode {
                wgt::VertexStepMode::Vertex => (extent.vertices, false),
                wgt::VertexStepMode::Instance => (extent.instances, true),
            };
            let count = match count {
                Some(count) => count,
                None => continue,
            };
            let required = layout.required_size(count);
            if required > bound.size {
                let (buffer, size) = (bound.buffer, bound.size);
                return Err(if is_instance {
                    DrawError::InstanceBeyondLimit {
                        slot,
                        buffer,
                        required,
                        size,
                    }
                } else {
                    DrawError::VertexBeyondLimit {
                        slot,
                        buffer,
                        required,
                        size,
                    }
                });
            }
        }

        let vertex_buffer_slots = self
            .vertex
            .iter()
            .rposition(Option::is_some)
            .map_or(0, |slot| slot as u32 + 1);
        let limit = self.limits.max_bind_groups_plus_vertex_buffers;
        if bind_group_slots + vertex_buffer_slots > limit {
            return Err(DrawError::TooManyBindings {
                bind_groups: bind_group_slots,
                vertex_buffers: vertex_buffer_slots,
                limit,
            });
        }
        Ok(())
    }

    /// Checks the bound index buffer against the pipeline, returning it.
    fn check_index_buffer(&self, hub: &Hub) -> Result<IndexState, DrawError> {
        let index = self.index.ok_or(DrawError::MissingIndexBuffer)?;
        hub.buffers.get_alive(index.buffer)?;
        if let Some(pipeline_id) = self.pipeline {
            let pipeline = hub.render_pipelines.get(pipeline_id)?;
            let strip_format = pipeline.primitive.strip_index_format;
            if pipeline.primitive.topology.is_strip() && strip_format != Some(index.format) {
                return Err(DrawError::UnmatchedIndexFormats {
                    pipeline: strip_format,
                    buffer: index.format,
                });
            }
        }
        Ok(index)
    }

    pub(crate) fn draw(
        &self,
        hub: &Hub,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), DrawError> {
        self.check_draw(
            hub,
            DrawExtent {
                vertices: Some(first_vertex as u64 + vertex_count as u64),
                instances: Some(first_instance as u64 + instance_count as u64),
            },
        )
    }

    pub(crate) fn draw_indexed(
        &self,
        hub: &Hub,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        first_instance: u32,
    ) -> Result<(), DrawError> {
        self.check_draw(
            hub,
            DrawExtent {
                vertices: None,
                instances: Some(first_instance as u64 + instance_count as u64),
            },
        )?;
        let index = self.check_index_buffer(hub)?;
        let required = (first_index as u64 + index_count as u64) * index_format_size(index.format);
        if required > index.size {
            return Err(DrawError::IndexBeyondLimit {
                buffer: index.buffer,
                required,
                size: index.size,
            });
        }
        Ok(())
    }

    pub(crate) fn draw_indirect(
        &self,
        hub: &Hub,
        buffer_id: id::BufferId,
        offset: BufferAddress,
        indexed: bool,
    ) -> Result<(), DrawError> {
        self.check_draw(hub, DrawExtent::UNKNOWN)?;
        if indexed {
            self.check_index_buffer(hub)?;
        }
        let block_size = if indexed {
            DRAW_INDEXED_INDIRECT_SIZE
        } else {
            DRAW_INDIRECT_SIZE
        };
        check_indirect_buffer(hub, self.device_id, buffer_id, offset, block_size)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        command::{RenderPassColorAttachment, RenderPassDescriptor},
        device::DeviceDescriptor,
        id,
        id::ResourceRef,
        pipeline::{
            FragmentState, ProgrammableStageDescriptor, RenderPipelineDescriptor,
            ShaderModuleDescriptor, VertexBufferLayout, VertexState,
        },
        resource::{BufferDescriptor, TextureDescriptor, TextureViewDescriptor},
        ErrorKind, Limits, ValidationContext,
    };
    use std::borrow::Cow;
    use wgt::{BufferUsages, IndexFormat, TextureFormat};

    struct Fixture {
        ctx: ValidationContext,
        device: id::DeviceId,
        pass: id::RenderPassEncoderId,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_limits(Limits::default())
        }

        fn with_limits(limits: Limits) -> Self {
            let mut ctx = ValidationContext::new();
            let device = ctx
                .device_create(&DeviceDescriptor {
                    label: None,
                    limits,
                })
                .unwrap();
            let texture = ctx
                .device_create_texture(
                    device,
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
            let view = ctx
                .texture_create_view(texture, &TextureViewDescriptor::default())
                .unwrap();
            let encoder = ctx
                .device_create_command_encoder(device, &Default::default())
                .unwrap();
            let pass = ctx
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
            Self { ctx, device, pass }
        }

        fn buffer(&mut self, size: u64, usage: BufferUsages) -> id::BufferId {
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

        /// Create a pipeline over an opaque module and set it on the pass.
        fn use_pipeline(
            &mut self,
            primitive: wgt::PrimitiveState,
            vertex_buffers: &[Option<VertexBufferLayout>],
        ) -> id::RenderPipelineId {
            let module = self
                .ctx
                .device_create_shader_module(
                    self.device,
                    &ShaderModuleDescriptor {
                        label: None,
                        code: Cow::Borrowed(""),
                    },
                )
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
                        layout: None,
                        vertex: VertexState {
                            stage: ProgrammableStageDescriptor {
                                module,
                                entry_point: Cow::Borrowed("vs_main"),
                            },
                            buffers: Cow::Borrowed(vertex_buffers),
                        },
                        primitive,
                        depth_stencil: None,
                        multisample: wgt::MultisampleState::default(),
                        fragment: Some(FragmentState {
                            stage: ProgrammableStageDescriptor {
                                module,
                                entry_point: Cow::Borrowed("fs_main"),
                            },
                            targets: Cow::Borrowed(&targets),
                        }),
                    },
                )
                .unwrap();
            self.ctx.render_pass_set_pipeline(self.pass, pipeline).unwrap();
            pipeline
        }
    }

    const FLOAT4: [wgt::VertexAttribute; 1] = [wgt::VertexAttribute {
        format: wgt::VertexFormat::Float32x4,
        offset: 0,
        shader_location: 0,
    }];

    #[test]
    fn indexed_draws_stay_inside_the_index_buffer() {
        let mut f = Fixture::new();
        f.use_pipeline(wgt::PrimitiveState::default(), &[]);
        let err = f
            .ctx
            .render_pass_draw_indexed(f.pass, 3, 1, 0, 0, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBinding);

        // Six 16-bit indices.
        let indices = f.buffer(12, BufferUsages::INDEX);
        f.ctx
            .render_pass_set_index_buffer(f.pass, indices, IndexFormat::Uint16, 0, None)
            .unwrap();
        f.ctx
            .render_pass_draw_indexed(f.pass, 6, 1, 0, 0, 0)
            .unwrap();
        f.ctx
            .render_pass_draw_indexed(f.pass, 3, 1, 3, -2, 0)
            .unwrap();
        let err = f
            .ctx
            .render_pass_draw_indexed(f.pass, 4, 1, 3, 0, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(err.related()[0], ResourceRef::Buffer(indices));
    }

    #[test]
    fn index_buffer_offsets_follow_the_format() {
        let mut f = Fixture::new();
        let indices = f.buffer(16, BufferUsages::INDEX);
        let err = f
            .ctx
            .render_pass_set_index_buffer(f.pass, indices, IndexFormat::Uint16, 1, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        let err = f
            .ctx
            .render_pass_set_index_buffer(f.pass, indices, IndexFormat::Uint32, 2, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        assert_eq!(f.ctx.render_pass(f.pass).unwrap().index_buffer(), None);

        f.ctx
            .render_pass_set_index_buffer(f.pass, indices, IndexFormat::Uint16, 2, None)
            .unwrap();
        f.ctx
            .render_pass_set_index_buffer(f.pass, indices, IndexFormat::Uint32, 4, None)
            .unwrap();
        assert_eq!(
            f.ctx.render_pass(f.pass).unwrap().index_buffer(),
            Some((indices, IndexFormat::Uint32))
        );

        let vertices = f.buffer(16, BufferUsages::VERTEX);
        let err = f
            .ctx
            .render_pass_set_index_buffer(f.pass, vertices, IndexFormat::Uint16, 0, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
    }

    #[test]
    fn strip_topologies_need_the_declared_index_format() {
        let mut f = Fixture::new();
        let indices = f.buffer(16, BufferUsages::INDEX);
        f.ctx
            .render_pass_set_index_buffer(f.pass, indices, IndexFormat::Uint32, 0, None)
            .unwrap();

        f.use_pipeline(
            wgt::PrimitiveState {
                topology: wgt::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                ..Default::default()
            },
            &[],
        );
        let err = f
            .ctx
            .render_pass_draw_indexed(f.pass, 3, 1, 0, 0, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);

        f.use_pipeline(
            wgt::PrimitiveState {
                topology: wgt::PrimitiveTopology::TriangleStrip,
                strip_index_format: Some(IndexFormat::Uint16),
                ..Default::default()
            },
            &[],
        );
        let err = f
            .ctx
            .render_pass_draw_indexed(f.pass, 3, 1, 0, 0, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);

        f.use_pipeline(
            wgt::PrimitiveState {
                topology: wgt::PrimitiveTopology::TriangleStrip,
                strip_index_format: Some(IndexFormat::Uint32),
                ..Default::default()
            },
            &[],
        );
        f.ctx
            .render_pass_draw_indexed(f.pass, 3, 1, 0, 0, 0)
            .unwrap();

        // List topologies ignore the index format.
        f.use_pipeline(wgt::PrimitiveState::default(), &[]);
        f.ctx
            .render_pass_draw_indexed(f.pass, 3, 1, 0, 0, 0)
            .unwrap();
    }

    #[test]
    fn instance_buffers_are_sized_by_instance_count() {
        let mut f = Fixture::new();
        f.use_pipeline(
            wgt::PrimitiveState::default(),
            &[Some(VertexBufferLayout {
                array_stride: 16,
                step_mode: wgt::VertexStepMode::Instance,
                attributes: Cow::Borrowed(&FLOAT4),
            })],
        );
        let instances = f.buffer(32, BufferUsages::VERTEX);
        f.ctx
            .render_pass_set_vertex_buffer(f.pass, 0, Some(instances), 0, None)
            .unwrap();

        // The vertex count does not matter for instance-stepped buffers.
        f.ctx.render_pass_draw(f.pass, 1000, 2, 0, 0).unwrap();
        let err = f.ctx.render_pass_draw(f.pass, 3, 2, 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(err.related()[0], ResourceRef::Buffer(instances));

        let indices = f.buffer(1024, BufferUsages::INDEX);
        f.ctx
            .render_pass_set_index_buffer(f.pass, indices, IndexFormat::Uint16, 0, None)
            .unwrap();
        f.ctx
            .render_pass_draw_indexed(f.pass, 512, 2, 0, 0, 0)
            .unwrap();
        let err = f
            .ctx
            .render_pass_draw_indexed(f.pass, 3, 3, 0, 0, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn indirect_argument_blocks() {
        let mut f = Fixture::new();
        f.use_pipeline(wgt::PrimitiveState::default(), &[]);
        let args = f.buffer(20, BufferUsages::INDIRECT);

        let err = f
            .ctx
            .render_pass_draw_indirect(f.pass, args, 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        f.ctx.render_pass_draw_indirect(f.pass, args, 4).unwrap();
        let err = f
            .ctx
            .render_pass_draw_indirect(f.pass, args, 8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(err.related()[0], ResourceRef::Buffer(args));

        // Indexed draws need an index buffer and a 20 byte block.
        let err = f
            .ctx
            .render_pass_draw_indexed_indirect(f.pass, args, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBinding);
        let indices = f.buffer(16, BufferUsages::INDEX);
        f.ctx
            .render_pass_set_index_buffer(f.pass, indices, IndexFormat::Uint32, 0, None)
            .unwrap();
        f.ctx
            .render_pass_draw_indexed_indirect(f.pass, args, 0)
            .unwrap();
        let err = f
            .ctx
            .render_pass_draw_indexed_indirect(f.pass, args, 4)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);

        let plain = f.buffer(20, BufferUsages::VERTEX);
        let err = f
            .ctx
            .render_pass_draw_indirect(f.pass, plain, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        assert_eq!(err.related()[0], ResourceRef::Buffer(plain));
    }

    #[test]
    fn bind_group_and_vertex_slots_share_a_budget() {
        let mut f = Fixture::with_limits(Limits {
            max_bind_groups_plus_vertex_buffers: 2,
            ..Limits::default()
        });
        f.use_pipeline(wgt::PrimitiveState::default(), &[]);
        let vertices = f.buffer(16, BufferUsages::VERTEX);

        f.ctx
            .render_pass_set_vertex_buffer(f.pass, 1, Some(vertices), 0, None)
            .unwrap();
        f.ctx.render_pass_draw(f.pass, 3, 1, 0, 0).unwrap();

        // Slot 2 makes three vertex buffer slots in use.
        f.ctx
            .render_pass_set_vertex_buffer(f.pass, 2, Some(vertices), 0, None)
            .unwrap();
        let err = f.ctx.render_pass_draw(f.pass, 3, 1, 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);

        f.ctx
            .render_pass_set_vertex_buffer(f.pass, 2, None, 0, None)
            .unwrap();
        f.ctx.render_pass_draw(f.pass, 3, 1, 0, 0).unwrap();
    }
}
