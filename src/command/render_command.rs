//! Typed render commands.
//!
//! A host that intercepts calls in bulk, or records them for later, can
//! describe them as [`RenderCommand`] values and replay them through
//! [`ValidationContext::render_pass_execute_commands`] or
//! [`ValidationContext::render_bundle_encoder_execute_commands`]. Replay runs
//! the same validation as the individual methods and stops at the first
//! command that fails.

use crate::{
    command::{PassErrorScope, Rect, RenderBundleError, RenderCommandError},
    global::ValidationContext,
    id, Error,
};

use wgt::{BufferAddress, BufferSize, Color, DynamicOffset};

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderCommand {
    SetBindGroup {
        index: u32,
        bind_group_id: Option<id::BindGroupId>,
        dynamic_offsets: Vec<DynamicOffset>,
    },
    SetPipeline(id::RenderPipelineId),
    SetIndexBuffer {
        buffer_id: id::BufferId,
        index_format: wgt::IndexFormat,
        offset: BufferAddress,
        size: Option<BufferSize>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer_id: Option<id::BufferId>,
        offset: BufferAddress,
        size: Option<BufferSize>,
    },
    SetBlendConstant(Color),
    SetStencilReference(u32),
    SetViewport {
        rect: Rect<f32>,
        depth_min: f32,
        depth_max: f32,
    },
    SetScissor(Rect<u32>),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer_id: id::BufferId,
        offset: BufferAddress,
        indexed: bool,
    },
    PushDebugGroup(String),
    PopDebugGroup,
    InsertDebugMarker(String),
    BeginOcclusionQuery {
        query_index: u32,
    },
    EndOcclusionQuery,
    ExecuteBundle(id::RenderBundleId),
}

impl ValidationContext {
    pub fn render_pass_execute_commands(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        commands: &[RenderCommand],
    ) -> Result<(), Error> {
        profiling::scope!("RenderPass::execute_commands");
        log::trace!("Replaying {} commands into {:?}", commands.len(), pass_id);

        for command in commands {
            match *command {
                RenderCommand::SetBindGroup {
                    index,
                    bind_group_id,
                    ref dynamic_offsets,
                } => self.render_pass_set_bind_group(pass_id, index, bind_group_id, dynamic_offsets),
                RenderCommand::SetPipeline(pipeline_id) => {
                    self.render_pass_set_pipeline(pass_id, pipeline_id)
                }
                RenderCommand::SetIndexBuffer {
                    buffer_id,
                    index_format,
                    offset,
                    size,
                } => self.render_pass_set_index_buffer(pass_id, buffer_id, index_format, offset, size),
                RenderCommand::SetVertexBuffer {
                    slot,
                    buffer_id,
                    offset,
                    size,
                } => self.render_pass_set_vertex_buffer(pass_id, slot, buffer_id, offset, size),
                RenderCommand::SetBlendConstant(ref color) => {
                    self.render_pass_set_blend_constant(pass_id, color)
                }
                RenderCommand::SetStencilReference(reference) => {
                    self.render_pass_set_stencil_reference(pass_id, reference)
                }
                RenderCommand::SetViewport {
                    rect,
                    depth_min,
                    depth_max,
                } => self.render_pass_set_viewport(
                    pass_id, rect.x, rect.y, rect.w, rect.h, depth_min, depth_max,
                ),
                RenderCommand::SetScissor(rect) => {
                    self.render_pass_set_scissor_rect(pass_id, rect.x, rect.y, rect.w, rect.h)
                }
                RenderCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => self.render_pass_draw(
                    pass_id,
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                ),
                RenderCommand::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                } => self.render_pass_draw_indexed(
                    pass_id,
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                ),
                RenderCommand::DrawIndirect {
                    buffer_id,
                    offset,
                    indexed: false,
                } => self.render_pass_draw_indirect(pass_id, buffer_id, offset),
                RenderCommand::DrawIndirect {
                    buffer_id,
                    offset,
                    indexed: true,
                } => self.render_pass_draw_indexed_indirect(pass_id, buffer_id, offset),
                RenderCommand::PushDebugGroup(ref label) => {
                    self.render_pass_push_debug_group(pass_id, label)
                }
                RenderCommand::PopDebugGroup => self.render_pass_pop_debug_group(pass_id),
                RenderCommand::InsertDebugMarker(ref label) => {
                    self.render_pass_insert_debug_marker(pass_id, label)
                }
                RenderCommand::BeginOcclusionQuery { query_index } => {
                    self.render_pass_begin_occlusion_query(pass_id, query_index)
                }
                RenderCommand::EndOcclusionQuery => self.render_pass_end_occlusion_query(pass_id),
                RenderCommand::ExecuteBundle(bundle_id) => {
                    self.render_pass_execute_bundles(pass_id, &[bundle_id])
                }
            }?;
        }
        Ok(())
    }

    pub fn render_bundle_encoder_execute_commands(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        commands: &[RenderCommand],
    ) -> Result<(), Error> {
        profiling::scope!("RenderBundleEncoder::execute_commands");
        log::trace!(
            "Replaying {} commands into {:?}",
            commands.len(),
            bundle_encoder_id
        );

        for command in commands {
            let id = bundle_encoder_id;
            match *command {
                RenderCommand::SetBindGroup {
                    index,
                    bind_group_id,
                    ref dynamic_offsets,
                } => self.render_bundle_encoder_set_bind_group(id, index, bind_group_id, dynamic_offsets),
                RenderCommand::SetPipeline(pipeline_id) => {
                    self.render_bundle_encoder_set_pipeline(id, pipeline_id)
                }
                RenderCommand::SetIndexBuffer {
                    buffer_id,
                    index_format,
                    offset,
                    size,
                } => self.render_bundle_encoder_set_index_buffer(id, buffer_id, index_format, offset, size),
                RenderCommand::SetVertexBuffer {
                    slot,
                    buffer_id,
                    offset,
                    size,
                } => self.render_bundle_encoder_set_vertex_buffer(id, slot, buffer_id, offset, size),
                RenderCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => self.render_bundle_encoder_draw(
                    id,
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                ),
                RenderCommand::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                } => self.render_bundle_encoder_draw_indexed(
                    id,
                    index_count,
                    instance_count,
                    first_index,
                    base_vertex,
                    first_instance,
                ),
                RenderCommand::DrawIndirect {
                    buffer_id,
                    offset,
                    indexed: false,
                } => self.render_bundle_encoder_draw_indirect(id, buffer_id, offset),
                RenderCommand::DrawIndirect {
                    buffer_id,
                    offset,
                    indexed: true,
                } => self.render_bundle_encoder_draw_indexed_indirect(id, buffer_id, offset),
                RenderCommand::PushDebugGroup(ref label) => {
                    self.render_bundle_encoder_push_debug_group(id, label)
                }
                RenderCommand::PopDebugGroup => self.render_bundle_encoder_pop_debug_group(id),
                RenderCommand::InsertDebugMarker(ref label) => {
                    self.render_bundle_encoder_insert_debug_marker(id, label)
                }
                RenderCommand::SetBlendConstant(_) => self.unsupported_in_bundle("set_blend_constant"),
                RenderCommand::SetStencilReference(_) => {
                    self.unsupported_in_bundle("set_stencil_reference")
                }
                RenderCommand::SetViewport { .. } => self.unsupported_in_bundle("set_viewport"),
                RenderCommand::SetScissor(_) => self.unsupported_in_bundle("set_scissor_rect"),
                RenderCommand::BeginOcclusionQuery { .. } => {
                    self.unsupported_in_bundle("begin_occlusion_query")
                }
                RenderCommand::EndOcclusionQuery => {
                    self.unsupported_in_bundle("end_occlusion_query")
                }
                RenderCommand::ExecuteBundle(_) => self.unsupported_in_bundle("execute_bundles"),
            }?;
        }
        Ok(())
    }

    fn unsupported_in_bundle(&mut self, command: &'static str) -> Result<(), Error> {
        self.report(Err(RenderBundleError {
            scope: PassErrorScope::Bundle,
            inner: RenderCommandError::UnsupportedInBundle(command),
        }))
    }
}
