/*! Render Bundles

A render bundle is a prerecorded sequence of render commands that can be
executed in any render pass whose attachments match the ones the bundle was
encoded for.

## Render Bundle Isolation

Draw calls in a render bundle depend solely on the pipeline and state
established within the bundle itself: a bundle encoder starts with no
pipeline, bind groups or buffers bound, whatever the pass it later runs in.
In the other direction, executing a bundle unsets the pass's pipeline, bind
groups, and vertex and index buffers, so later draws in the pass cannot rely
on state from before the bundle.

## Render Bundle Lifecycle

1) Create a [`RenderBundleEncoder`] with
   [`ValidationContext::device_create_render_bundle_encoder`].

2) Record commands with the `render_bundle_encoder_*` methods. These share
   their validation with the render pass methods of the same name.

3) Call [`ValidationContext::render_bundle_encoder_finish`], which ends the
   encoder and returns a `RenderBundleId`.

4) Execute the bundle any number of times with
   [`ValidationContext::render_pass_execute_bundles`].
!*/

use crate::{
    api_log,
    command::{
        check_open,
        define_pass_error,
        draw::{RenderCommandError, RenderState},
        validate_color_attachment_bytes_per_sample, ColorAttachmentError, DebugGroupStack,
        EncoderState, MapPassErr, PassErrorScope,
    },
    device::RenderPassContext,
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    global::ValidationContext,
    hub::Hub,
    id,
    resource::{impl_resource, Resource, ResourceError, ResourceInfo},
    Error, FastHashSet, Label,
};

use std::borrow::Cow;
use thiserror::Error;
use wgt::{BufferAddress, BufferSize, DynamicOffset, IndexFormat, TextureFormat};

/// Describes a [`RenderBundleEncoder`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderBundleEncoderDescriptor<'a> {
    /// Debug label of the render bundle encoder.
    pub label: Label<'a>,
    /// The formats of the color attachments that this render bundle is capable
    /// to rendering to.
    ///
    /// This must match the formats of the color attachments in the
    /// renderpass this render bundle is executed in.
    pub color_formats: Cow<'a, [Option<TextureFormat>]>,
    /// Information about the depth attachment that this render bundle is
    /// capable to rendering to.
    ///
    /// The format must match the format of the depth attachments in the
    /// renderpass this render bundle is executed in.
    pub depth_stencil: Option<wgt::RenderBundleDepthStencil>,
    /// Sample count this render bundle is capable of rendering to.
    ///
    /// This must match the pipelines and the renderpasses it is used in.
    pub sample_count: u32,
}

#[derive(Debug)]
pub struct RenderBundleEncoder {
    pub(crate) info: ResourceInfo,
    pub(crate) state: EncoderState,
    pub(crate) render: RenderState,
    pub(crate) debug_groups: DebugGroupStack,
}

impl RenderBundleEncoder {
    pub fn label(&self) -> &str {
        self.info.label()
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn context(&self) -> &RenderPassContext {
        &self.render.context
    }

    pub fn pipeline(&self) -> Option<id::RenderPipelineId> {
        self.render.pipeline
    }
}

/// Error type returned from `device_create_render_bundle_encoder`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreateRenderBundleError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    ColorAttachment(#[from] ColorAttachmentError),
    #[error("Format {0:?} is not a depth-stencil format")]
    InvalidDepthStencilFormat(TextureFormat),
    #[error("Invalid number of samples {0}")]
    InvalidSampleCount(u32),
    #[error("A render bundle needs at least one color or depth-stencil format")]
    NoAttachments,
}

impl ErrorDetail for CreateRenderBundleError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::ColorAttachment(ref e) => e.kind(),
            Self::InvalidDepthStencilFormat(_)
            | Self::InvalidSampleCount(_)
            | Self::NoAttachments => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

define_pass_error!(
    /// Error encountered when recording or finishing a render bundle.
    RenderBundleError(RenderCommandError)
);

pub type RenderBundleDescriptor<'a> = wgt::RenderBundleDescriptor<Label<'a>>;

/// A finished render bundle: the pass shape it runs in and everything its
/// commands touch.
#[derive(Debug)]
pub struct RenderBundle {
    pub(crate) info: ResourceInfo,
    pub(crate) context: RenderPassContext,
    pub(crate) is_depth_read_only: bool,
    pub(crate) is_stencil_read_only: bool,
    pub(crate) used_buffers: FastHashSet<id::BufferId>,
    pub(crate) used_textures: FastHashSet<id::TextureId>,
}

impl RenderBundle {
    pub fn context(&self) -> &RenderPassContext {
        &self.context
    }

    pub fn is_depth_read_only(&self) -> bool {
        self.is_depth_read_only
    }

    pub fn is_stencil_read_only(&self) -> bool {
        self.is_stencil_read_only
    }
}

impl_resource!(RenderBundle);

impl ValidationContext {
    pub fn device_create_render_bundle_encoder(
        &mut self,
        device_id: id::DeviceId,
        desc: &RenderBundleEncoderDescriptor,
    ) -> Result<id::RenderBundleEncoderId, Error> {
        profiling::scope!("Device::create_render_bundle_encoder");
        let result = (|| -> Result<_, CreateRenderBundleError> {
            let device = self.hub.devices.get(device_id)?;
            device.check_is_valid(device_id)?;

            let limit = device.limits.max_color_attachments as usize;
            if desc.color_formats.len() > limit {
                return Err(ColorAttachmentError::TooMany {
                    given: desc.color_formats.len(),
                    limit,
                }
                .into());
            }
            validate_color_attachment_bytes_per_sample(
                desc.color_formats.iter().copied(),
                device.limits.max_color_attachment_bytes_per_sample,
                &*self.formats,
            )?;

            if let Some(ref ds) = desc.depth_stencil {
                let is_depth_stencil = self
                    .formats
                    .info(ds.format)
                    .map_or(false, |info| info.is_depth_stencil());
                if !is_depth_stencil {
                    return Err(CreateRenderBundleError::InvalidDepthStencilFormat(ds.format));
                }
            }
            if desc.color_formats.iter().all(Option::is_none) && desc.depth_stencil.is_none() {
                return Err(CreateRenderBundleError::NoAttachments);
            }
            if !matches!(desc.sample_count, 1 | 4) {
                return Err(CreateRenderBundleError::InvalidSampleCount(desc.sample_count));
            }

            let context = RenderPassContext::new(
                desc.color_formats.iter().copied(),
                desc.depth_stencil.as_ref().map(|ds| ds.format),
                desc.sample_count,
            );
            let (depth_read_only, stencil_read_only) = desc
                .depth_stencil
                .as_ref()
                .map_or((false, false), |ds| (ds.depth_read_only, ds.stencil_read_only));

            let encoder = RenderBundleEncoder {
                info: ResourceInfo::new(&desc.label, device_id),
                state: EncoderState::Open,
                render: RenderState::new(
                    device_id,
                    device.limits.clone(),
                    context,
                    depth_read_only,
                    stencil_read_only,
                ),
                debug_groups: DebugGroupStack::default(),
            };
            Ok(self.encoders.render_bundle_encoders.insert(encoder))
        })();

        if let Ok(id) = result {
            api_log!(
                "Device::create_render_bundle_encoder({:?}) -> {:?}",
                desc.label,
                id
            );
        }
        self.report(result)
    }

    /// Run `record` against an open render bundle encoder.
    fn record_render_bundle<T>(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        scope: PassErrorScope,
        record: impl FnOnce(&mut RenderBundleEncoder, &Hub) -> Result<T, RenderCommandError>,
    ) -> Result<T, Error> {
        let hub = &self.hub;
        let bundle_encoders = &mut self.encoders.render_bundle_encoders;
        let result: Result<T, RenderBundleError> = (|| -> Result<T, RenderCommandError> {
            let encoder = bundle_encoders.get_mut(bundle_encoder_id)?;
            check_open(encoder.state, bundle_encoder_id)?;
            record(encoder, hub)
        })()
        .map_pass_err(scope);
        self.report(result)
    }

    fn render_bundle_pipeline(
        &self,
        bundle_encoder_id: id::RenderBundleEncoderId,
    ) -> Option<id::RenderPipelineId> {
        self.encoders
            .render_bundle_encoders
            .get(bundle_encoder_id)
            .ok()
            .and_then(|encoder| encoder.render.pipeline)
    }

    pub fn render_bundle_encoder_set_pipeline(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        pipeline_id: id::RenderPipelineId,
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::set_pipeline {:?} {:?}",
            bundle_encoder_id,
            pipeline_id
        );
        let scope = PassErrorScope::SetPipelineRender(pipeline_id);
        self.record_render_bundle(bundle_encoder_id, scope, |encoder, hub| {
            encoder.render.set_pipeline(hub, pipeline_id)
        })
    }

    pub fn render_bundle_encoder_set_bind_group(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        index: u32,
        bind_group_id: Option<id::BindGroupId>,
        offsets: &[DynamicOffset],
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::set_bind_group {:?} {} {:?}",
            bundle_encoder_id,
            index,
            bind_group_id
        );
        let scope = PassErrorScope::SetBindGroup(bind_group_id);
        self.record_render_bundle(bundle_encoder_id, scope, |encoder, hub| {
            encoder
                .render
                .set_bind_group(hub, index, bind_group_id, offsets)
        })
    }

    pub fn render_bundle_encoder_set_vertex_buffer(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        slot: u32,
        buffer_id: Option<id::BufferId>,
        offset: BufferAddress,
        size: Option<BufferSize>,
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::set_vertex_buffer {:?} {} {:?}",
            bundle_encoder_id,
            slot,
            buffer_id
        );
        let scope = PassErrorScope::SetVertexBuffer(buffer_id);
        self.record_render_bundle(bundle_encoder_id, scope, |encoder, hub| {
            encoder
                .render
                .set_vertex_buffer(hub, slot, buffer_id, offset, size)
        })
    }

    pub fn render_bundle_encoder_set_index_buffer(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        buffer_id: id::BufferId,
        index_format: IndexFormat,
        offset: BufferAddress,
        size: Option<BufferSize>,
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::set_index_buffer {:?} {:?}",
            bundle_encoder_id,
            buffer_id
        );
        let scope = PassErrorScope::SetIndexBuffer(buffer_id);
        self.record_render_bundle(bundle_encoder_id, scope, |encoder, hub| {
            encoder
                .render
                .set_index_buffer(hub, buffer_id, index_format, offset, size)
        })
    }

    pub fn render_bundle_encoder_draw(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::draw {:?} {} {} {} {}",
            bundle_encoder_id,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance
        );
        let scope = PassErrorScope::Draw {
            indexed: false,
            indirect: false,
            pipeline: self.render_bundle_pipeline(bundle_encoder_id),
        };
        self.record_render_bundle(bundle_encoder_id, scope, |encoder, hub| {
            Ok(encoder.render.draw(
                hub,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )?)
        })
    }

    pub fn render_bundle_encoder_draw_indexed(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::draw_indexed {:?} {} {} {} {} {}",
            bundle_encoder_id,
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance
        );
        let scope = PassErrorScope::Draw {
            indexed: true,
            indirect: false,
            pipeline: self.render_bundle_pipeline(bundle_encoder_id),
        };
        self.record_render_bundle(bundle_encoder_id, scope, |encoder, hub| {
            Ok(encoder.render.draw_indexed(
                hub,
                index_count,
                instance_count,
                first_index,
                first_instance,
            )?)
        })
    }

    pub fn render_bundle_encoder_draw_indirect(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        buffer_id: id::BufferId,
        offset: BufferAddress,
    ) -> Result<(), Error> {
        self.render_bundle_encoder_draw_indirect_impl(bundle_encoder_id, buffer_id, offset, false)
    }

    pub fn render_bundle_encoder_draw_indexed_indirect(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        buffer_id: id::BufferId,
        offset: BufferAddress,
    ) -> Result<(), Error> {
        self.render_bundle_encoder_draw_indirect_impl(bundle_encoder_id, buffer_id, offset, true)
    }

    fn render_bundle_encoder_draw_indirect_impl(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        buffer_id: id::BufferId,
        offset: BufferAddress,
        indexed: bool,
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::draw_indirect (indexed:{}) {:?} {:?} {}",
            indexed,
            bundle_encoder_id,
            buffer_id,
            offset
        );
        let scope = PassErrorScope::Draw {
            indexed,
            indirect: true,
            pipeline: self.render_bundle_pipeline(bundle_encoder_id),
        };
        self.record_render_bundle(bundle_encoder_id, scope, |encoder, hub| {
            encoder.render.draw_indirect(hub, buffer_id, offset, indexed)?;
            encoder.render.used_buffers.insert(buffer_id);
            Ok(())
        })
    }

    pub fn render_bundle_encoder_push_debug_group(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        label: &str,
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::push_debug_group {:?} {}",
            bundle_encoder_id,
            label
        );
        self.record_render_bundle(
            bundle_encoder_id,
            PassErrorScope::PushDebugGroup,
            |encoder, _| {
                encoder.debug_groups.push();
                Ok(())
            },
        )
    }

    pub fn render_bundle_encoder_pop_debug_group(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
    ) -> Result<(), Error> {
        api_log!("RenderBundleEncoder::pop_debug_group {:?}", bundle_encoder_id);
        self.record_render_bundle(
            bundle_encoder_id,
            PassErrorScope::PopDebugGroup,
            |encoder, _| Ok(encoder.debug_groups.pop()?),
        )
    }

    pub fn render_bundle_encoder_insert_debug_marker(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        label: &str,
    ) -> Result<(), Error> {
        api_log!(
            "RenderBundleEncoder::insert_debug_marker {:?} {}",
            bundle_encoder_id,
            label
        );
        self.record_render_bundle(
            bundle_encoder_id,
            PassErrorScope::InsertDebugMarker,
            |_, _| Ok(()),
        )
    }

    pub fn render_bundle_encoder_finish(
        &mut self,
        bundle_encoder_id: id::RenderBundleEncoderId,
        desc: &RenderBundleDescriptor,
    ) -> Result<id::RenderBundleId, Error> {
        profiling::scope!("RenderBundleEncoder::finish");

        let hub = &mut self.hub;
        let bundle_encoders = &mut self.encoders.render_bundle_encoders;
        let result: Result<_, RenderBundleError> = (|| -> Result<_, RenderCommandError> {
            let encoder = bundle_encoders.get_mut(bundle_encoder_id)?;
            check_open(encoder.state, bundle_encoder_id)?;
            encoder.debug_groups.check_balanced()?;

            let device_id = encoder.render.device_id;
            let bundle = RenderBundle {
                info: ResourceInfo::new(&desc.label, device_id),
                context: encoder.render.context.clone(),
                is_depth_read_only: encoder.render.is_depth_read_only,
                is_stencil_read_only: encoder.render.is_stencil_read_only,
                used_buffers: encoder.render.used_buffers.clone(),
                used_textures: encoder.render.used_textures.clone(),
            };
            encoder.state = EncoderState::Ended;
            Ok(hub.render_bundles.insert(bundle))
        })()
        .map_pass_err(PassErrorScope::Finish);

        if let Ok(id) = result {
            api_log!(
                "RenderBundleEncoder::finish({:?}, {:?}) -> {:?}",
                bundle_encoder_id,
                desc.label,
                id
            );
        }
        self.report(result)
    }

    pub fn render_bundle_encoder(
        &self,
        bundle_encoder_id: id::RenderBundleEncoderId,
    ) -> Result<&RenderBundleEncoder, Error> {
        Ok(self.encoders.render_bundle_encoders.get(bundle_encoder_id)?)
    }

    pub fn render_bundle(&self, bundle_id: id::RenderBundleId) -> Result<&RenderBundle, Error> {
        Ok(self.hub.render_bundles.get(bundle_id)?)
    }
}
