use crate::{
    api_log,
    command::{
        check_open,
        draw::{DrawError, Rect, RenderCommandError, RenderState},
        define_pass_error,
        query::{validate_timestamp_writes, PassTimestampWrites, QueryUseError, SimplifiedQueryType},
        DebugGroupError, DebugGroupStack, EncoderState, EncoderStateError, MapPassErr,
        PassErrorScope,
    },
    device::{RenderPassCompatibilityError, RenderPassContext},
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    format::{round_up, FormatCapabilities},
    global::ValidationContext,
    hub::Hub,
    id,
    resource::{ResourceError, ResourceInfo, TextureView},
    validation::{check_texture_usage, MissingTextureUsageError},
    Error, FastHashMap, FastHashSet, Label, MAX_COLOR_ATTACHMENTS,
};

use arrayvec::ArrayVec;
use std::{borrow::Cow, ops::Range};
use thiserror::Error;
use wgt::{BufferAddress, BufferSize, DynamicOffset, IndexFormat, TextureFormat};

/// Describes a color attachment to a render pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderPassColorAttachment {
    /// The view to use as an attachment.
    pub view: id::TextureViewId,
    /// The depth slice of a 3D view to render into.
    pub depth_slice: Option<u32>,
    /// The view that will receive the resolved output if multisampling is used.
    pub resolve_target: Option<id::TextureViewId>,
}

/// Describes a depth/stencil attachment to a render pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderPassDepthStencilAttachment {
    /// The view to use as an attachment.
    pub view: id::TextureViewId,
    pub depth_read_only: bool,
    pub stencil_read_only: bool,
}

/// Describes the attachments of a render pass.
#[derive(Clone, Debug, Default)]
pub struct RenderPassDescriptor<'a> {
    pub label: Label<'a>,
    /// The color attachments of the render pass. `None` entries are holes.
    pub color_attachments: Cow<'a, [Option<RenderPassColorAttachment>]>,
    /// The depth and stencil attachment of the render pass, if any.
    pub depth_stencil_attachment: Option<&'a RenderPassDepthStencilAttachment>,
    /// Defines where and when timestamp values will be written for this pass.
    pub timestamp_writes: Option<&'a PassTimestampWrites>,
    /// Defines where the occlusion query results will be stored for this pass.
    pub occlusion_query_set: Option<id::QuerySetId>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ColorAttachmentError {
    #[error("Attachment format {0:?} is not a color format")]
    InvalidFormat(TextureFormat),
    #[error("The number of color attachments {given} exceeds the limit {limit}")]
    TooMany { given: usize, limit: usize },
    #[error("The total number of bytes per sample in color attachments {total} exceeds the limit {limit}")]
    TooManyBytesPerSample { total: u32, limit: u32 },
}

impl ErrorDetail for ColorAttachmentError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::InvalidFormat(_) => ErrorKind::MalformedArguments,
            Self::TooMany { .. } | Self::TooManyBytesPerSample { .. } => ErrorKind::OutOfRange,
        }
    }
}

/// Check the per-sample byte cost of a set of color attachments against
/// `limit`. Each attachment costs its byte cost rounded up to its component
/// alignment. Holes cost nothing.
pub fn validate_color_attachment_bytes_per_sample(
    attachment_formats: impl IntoIterator<Item = Option<TextureFormat>>,
    limit: u32,
    formats: &dyn FormatCapabilities,
) -> Result<(), ColorAttachmentError> {
    let mut total = 0;
    for format in attachment_formats.into_iter().flatten() {
        let render = formats
            .info(format)
            .and_then(|info| info.color_render)
            .ok_or(ColorAttachmentError::InvalidFormat(format))?;
        total += round_up(render.byte_cost, render.alignment);
    }
    if total > limit {
        return Err(ColorAttachmentError::TooManyBytesPerSample { total, limit });
    }
    Ok(())
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    MissingTextureUsage(#[from] MissingTextureUsageError),
    #[error("A render pass needs at least one color or depth-stencil attachment")]
    MissingAttachments,
    #[error("Attachment view {view:?} must cover a single mip level and array layer, but covers mips {mips:?} and layers {layers:?}")]
    InvalidViewRange {
        view: id::TextureViewId,
        mips: Range<u32>,
        layers: Range<u32>,
    },
    #[error("3D attachment view {0:?} needs a depth slice")]
    MissingDepthSlice(id::TextureViewId),
    #[error("Depth slice {depth_slice} of attachment view {view:?} is outside of its depth {depth}")]
    DepthSliceOutOfRange {
        view: id::TextureViewId,
        depth_slice: u32,
        depth: u32,
    },
    #[error("Attachment view {0:?} is not 3D and cannot have a depth slice")]
    UnexpectedDepthSlice(id::TextureViewId),
    #[error("Attachment view {view:?} has format {format:?}, which is not color renderable")]
    ColorFormatNotRenderable {
        view: id::TextureViewId,
        format: TextureFormat,
    },
    #[error("Attachment view {view:?} has format {format:?}, which is not a depth-stencil format")]
    InvalidDepthStencilFormat {
        view: id::TextureViewId,
        format: TextureFormat,
    },
    #[error("Attachment view {view:?} of texture {texture:?} is {actual:?}, but the pass targets {expected:?}")]
    SizeMismatch {
        view: id::TextureViewId,
        texture: id::TextureId,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("Attachment view {view:?} has {actual} samples, but the pass uses {expected}")]
    SampleCountMismatch {
        view: id::TextureViewId,
        expected: u32,
        actual: u32,
    },
    #[error("Layer {layer}, mip {mip} of texture {texture:?} is attached more than once, again through view {view:?}")]
    SubresourceInUse {
        view: id::TextureViewId,
        texture: id::TextureId,
        layer: u32,
        mip: u32,
    },
    #[error("Attachment view {0:?} has a resolve target but is not multisampled")]
    ResolveSourceNotMultisampled(id::TextureViewId),
    #[error("Resolve target {0:?} must not be multisampled")]
    ResolveTargetMultisampled(id::TextureViewId),
    #[error("Resolve target {view:?} has format {actual:?}, but the resolved attachment has {expected:?}")]
    ResolveFormatMismatch {
        view: id::TextureViewId,
        expected: TextureFormat,
        actual: TextureFormat,
    },
    #[error("Format {format:?} of attachment {view:?} cannot be resolved")]
    UnresolvableFormat {
        view: id::TextureViewId,
        format: TextureFormat,
    },
}

impl ErrorDetail for AttachmentError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::MissingTextureUsage(ref e) => e.kind(),
            Self::DepthSliceOutOfRange { .. } => ErrorKind::OutOfRange,
            Self::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::SubresourceInUse { .. } => ErrorKind::AlreadyInUse,
            Self::MissingAttachments
            | Self::InvalidViewRange { .. }
            | Self::MissingDepthSlice(_)
            | Self::UnexpectedDepthSlice(_)
            | Self::ColorFormatNotRenderable { .. }
            | Self::InvalidDepthStencilFormat { .. }
            | Self::SampleCountMismatch { .. }
            | Self::ResolveSourceNotMultisampled(_)
            | Self::ResolveTargetMultisampled(_)
            | Self::ResolveFormatMismatch { .. }
            | Self::UnresolvableFormat { .. } => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::MissingTextureUsage(ref e) => e.collect_related(related),
            Self::MissingAttachments => {}
            Self::SizeMismatch { view, texture, .. }
            | Self::SubresourceInUse { view, texture, .. } => {
                related.push(view.into());
                related.push(texture.into());
            }
            Self::InvalidViewRange { view, .. }
            | Self::DepthSliceOutOfRange { view, .. }
            | Self::ColorFormatNotRenderable { view, .. }
            | Self::InvalidDepthStencilFormat { view, .. }
            | Self::SampleCountMismatch { view, .. }
            | Self::ResolveFormatMismatch { view, .. }
            | Self::UnresolvableFormat { view, .. } => related.push(view.into()),
            Self::MissingDepthSlice(view)
            | Self::UnexpectedDepthSlice(view)
            | Self::ResolveSourceNotMultisampled(view)
            | Self::ResolveTargetMultisampled(view) => related.push(view.into()),
        }
    }
}

/// Error encountered when performing a render pass.
#[derive(Clone, Debug, Error)]
pub enum RenderPassErrorInner {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] EncoderStateError),
    #[error(transparent)]
    ColorAttachment(#[from] ColorAttachmentError),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Query(#[from] QueryUseError),
    #[error(transparent)]
    RenderCommand(#[from] RenderCommandError),
    #[error(transparent)]
    Draw(#[from] DrawError),
    #[error(transparent)]
    DebugGroup(#[from] DebugGroupError),
    #[error("Render bundle is incompatible with the render pass")]
    IncompatibleBundleTargets(#[source] RenderPassCompatibilityError),
    #[error("Render bundle {bundle:?} has read-only depth/stencil flags ({bundle_depth}, {bundle_stencil}), but the pass requires ({pass_depth}, {pass_stencil})")]
    IncompatibleBundleReadOnlyDepthStencil {
        bundle: id::RenderBundleId,
        pass_depth: bool,
        pass_stencil: bool,
        bundle_depth: bool,
        bundle_stencil: bool,
    },
    #[error("Viewport {rect:?} is outside of the {width}x{height} render target")]
    InvalidViewportRect {
        rect: Rect<f32>,
        width: u32,
        height: u32,
    },
    #[error("Viewport depth range {0}..{1} is not inside of 0.0..1.0")]
    InvalidViewportDepth(f32, f32),
    #[error("Scissor {rect:?} is outside of the {width}x{height} render target")]
    InvalidScissorRect {
        rect: Rect<u32>,
        width: u32,
        height: u32,
    },
    #[error("Occlusion query {0} is still active at the end of the pass")]
    UnendedOcclusionQuery(u32),
}

impl ErrorDetail for RenderPassErrorInner {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::State(ref e) => e.kind(),
            Self::ColorAttachment(ref e) => e.kind(),
            Self::Attachment(ref e) => e.kind(),
            Self::Query(ref e) => e.kind(),
            Self::RenderCommand(ref e) => e.kind(),
            Self::Draw(ref e) => e.kind(),
            Self::DebugGroup(ref e) => e.kind(),
            Self::IncompatibleBundleTargets(ref e) => e.kind(),
            Self::IncompatibleBundleReadOnlyDepthStencil { .. } => ErrorKind::LayoutIncompatible,
            Self::InvalidViewportRect { .. }
            | Self::InvalidViewportDepth(..)
            | Self::InvalidScissorRect { .. } => ErrorKind::OutOfRange,
            Self::UnendedOcclusionQuery(_) => ErrorKind::AlreadyInUse,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::State(ref e) => e.collect_related(related),
            Self::Attachment(ref e) => e.collect_related(related),
            Self::Query(ref e) => e.collect_related(related),
            Self::RenderCommand(ref e) => e.collect_related(related),
            Self::Draw(ref e) => e.collect_related(related),
            Self::IncompatibleBundleTargets(ref e) => e.collect_related(related),
            Self::IncompatibleBundleReadOnlyDepthStencil { bundle, .. } => {
                related.push(bundle.into())
            }
            _ => {}
        }
    }
}

define_pass_error!(
    /// Error encountered when performing a render pass, with the command it happened in.
    RenderPassError(RenderPassErrorInner)
);

/// Texture subresources attached to a pass being begun: texture, then
/// array layer (or depth slice), then mip levels.
#[derive(Debug, Default)]
struct InUseTextures {
    textures: FastHashMap<id::TextureId, FastHashMap<u32, FastHashSet<u32>>>,
}

impl InUseTextures {
    /// Returns `false` if the subresource was already claimed.
    fn claim(&mut self, texture: id::TextureId, layer: u32, mip: u32) -> bool {
        self.textures
            .entry(texture)
            .or_default()
            .entry(layer)
            .or_default()
            .insert(mip)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttachmentAspect {
    Color,
    DepthStencil,
}

/// Accumulates the attachments of a pass being begun, checking each one
/// against the ones before it.
struct AttachmentCollector<'a> {
    hub: &'a Hub,
    device_id: id::DeviceId,
    formats: &'a dyn FormatCapabilities,
    extent: Option<(u32, u32)>,
    sample_count: Option<u32>,
    in_use: InUseTextures,
}

impl<'a> AttachmentCollector<'a> {
    fn view(
        &self,
        view_id: id::TextureViewId,
        depth_slice: Option<u32>,
    ) -> Result<(&'a TextureView, u32), AttachmentError> {
        let view = self.hub.texture_views.get_on_device(view_id, self.device_id)?;
        let texture = self.hub.textures.get_usable(view.parent, self.device_id)?;
        check_texture_usage(
            view.parent,
            texture.usage,
            wgt::TextureUsages::RENDER_ATTACHMENT,
        )?;

        if view.mips.len() != 1 || view.layers.len() != 1 {
            return Err(AttachmentError::InvalidViewRange {
                view: view_id,
                mips: view.mips.clone(),
                layers: view.layers.clone(),
            });
        }

        let layer = match (view.dimension, depth_slice) {
            (wgt::TextureViewDimension::D3, None) => {
                return Err(AttachmentError::MissingDepthSlice(view_id))
            }
            (wgt::TextureViewDimension::D3, Some(depth_slice)) => {
                if depth_slice >= view.extent.depth_or_array_layers {
                    return Err(AttachmentError::DepthSliceOutOfRange {
                        view: view_id,
                        depth_slice,
                        depth: view.extent.depth_or_array_layers,
                    });
                }
                depth_slice
            }
            (_, Some(_)) => return Err(AttachmentError::UnexpectedDepthSlice(view_id)),
            (_, None) => view.layers.start,
        };
        Ok((view, layer))
    }

    fn claim(
        &mut self,
        view_id: id::TextureViewId,
        view: &TextureView,
        layer: u32,
    ) -> Result<(), AttachmentError> {
        let mip = view.mips.start;
        if !self.in_use.claim(view.parent, layer, mip) {
            return Err(AttachmentError::SubresourceInUse {
                view: view_id,
                texture: view.parent,
                layer,
                mip,
            });
        }
        Ok(())
    }

    fn add(
        &mut self,
        view_id: id::TextureViewId,
        depth_slice: Option<u32>,
        aspect: AttachmentAspect,
    ) -> Result<&'a TextureView, AttachmentError> {
        let (view, layer) = self.view(view_id, depth_slice)?;

        let info = self.formats.info(view.format);
        match aspect {
            AttachmentAspect::Color => {
                if !info.map_or(false, |info| info.is_color_renderable()) {
                    return Err(AttachmentError::ColorFormatNotRenderable {
                        view: view_id,
                        format: view.format,
                    });
                }
            }
            AttachmentAspect::DepthStencil => {
                if !info.map_or(false, |info| info.is_depth_stencil()) {
                    return Err(AttachmentError::InvalidDepthStencilFormat {
                        view: view_id,
                        format: view.format,
                    });
                }
            }
        }

        let actual = (view.extent.width, view.extent.height);
        match self.extent {
            None => self.extent = Some(actual),
            Some(expected) if expected != actual => {
                return Err(AttachmentError::SizeMismatch {
                    view: view_id,
                    texture: view.parent,
                    expected,
                    actual,
                })
            }
            Some(_) => {}
        }
        match self.sample_count {
            None => self.sample_count = Some(view.samples),
            Some(expected) if expected != view.samples => {
                return Err(AttachmentError::SampleCountMismatch {
                    view: view_id,
                    expected,
                    actual: view.samples,
                })
            }
            Some(_) => {}
        }

        self.claim(view_id, view, layer)?;
        Ok(view)
    }

    fn add_resolve_target(
        &mut self,
        source_id: id::TextureViewId,
        source: &TextureView,
        view_id: id::TextureViewId,
    ) -> Result<(), AttachmentError> {
        if source.samples == 1 {
            return Err(AttachmentError::ResolveSourceNotMultisampled(source_id));
        }
        let (view, layer) = self.view(view_id, None)?;
        if view.samples != 1 {
            return Err(AttachmentError::ResolveTargetMultisampled(view_id));
        }
        if view.format != source.format {
            return Err(AttachmentError::ResolveFormatMismatch {
                view: view_id,
                expected: source.format,
                actual: view.format,
            });
        }
        let expected = (source.extent.width, source.extent.height);
        let actual = (view.extent.width, view.extent.height);
        if expected != actual {
            return Err(AttachmentError::SizeMismatch {
                view: view_id,
                texture: view.parent,
                expected,
                actual,
            });
        }
        let resolvable = self
            .formats
            .info(source.format)
            .and_then(|info| info.color_render)
            .map_or(false, |render| render.resolve);
        if !resolvable {
            return Err(AttachmentError::UnresolvableFormat {
                view: source_id,
                format: source.format,
            });
        }
        self.claim(view_id, view, layer)
    }
}

/// Shadow state of a render pass encoder.
#[derive(Debug)]
pub struct RenderPass {
    pub(crate) info: ResourceInfo,
    pub(crate) parent: id::CommandEncoderId,
    pub(crate) state: EncoderState,
    /// Width and height of the attachments.
    pub(crate) extent: (u32, u32),
    pub(crate) render: RenderState,
    pub(crate) occlusion_query_set: Option<id::QuerySetId>,
    pub(crate) active_occlusion_query: Option<u32>,
    pub(crate) used_occlusion_queries: FastHashSet<u32>,
    pub(crate) debug_groups: DebugGroupStack,
}

impl RenderPass {
    pub fn label(&self) -> &str {
        self.info.label()
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn parent(&self) -> id::CommandEncoderId {
        self.parent
    }

    pub fn context(&self) -> &RenderPassContext {
        &self.render.context
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    pub fn pipeline(&self) -> Option<id::RenderPipelineId> {
        self.render.pipeline
    }

    pub fn bind_group(&self, index: u32) -> Option<(id::BindGroupId, &[DynamicOffset])> {
        self.render.binder.group(index)
    }

    pub fn vertex_buffer(&self, slot: u32) -> Option<id::BufferId> {
        self.render
            .vertex
            .get(slot as usize)
            .copied()
            .flatten()
            .map(|state| state.buffer)
    }

    pub fn index_buffer(&self) -> Option<(id::BufferId, IndexFormat)> {
        self.render.index.map(|index| (index.buffer, index.format))
    }

    pub fn active_occlusion_query(&self) -> Option<u32> {
        self.active_occlusion_query
    }
}

impl ValidationContext {
    pub fn command_encoder_begin_render_pass(
        &mut self,
        encoder_id: id::CommandEncoderId,
        desc: &RenderPassDescriptor,
    ) -> Result<id::RenderPassEncoderId, Error> {
        profiling::scope!("CommandEncoder::begin_render_pass");
        let scope = PassErrorScope::Pass(encoder_id);

        let result: Result<_, RenderPassError> = (|| -> Result<_, RenderPassErrorInner> {
            let encoder = self.encoders.command_encoders.get(encoder_id)?;
            check_open(encoder.state, encoder_id)?;
            let device_id = encoder.info.device_id(encoder_id.into())?;
            let device = self.hub.devices.get(device_id)?;
            device.check_is_valid(device_id)?;

            let limit = device.limits.max_color_attachments as usize;
            if desc.color_attachments.len() > limit {
                return Err(ColorAttachmentError::TooMany {
                    given: desc.color_attachments.len(),
                    limit,
                }
                .into());
            }

            let mut collector = AttachmentCollector {
                hub: &self.hub,
                device_id,
                formats: &*self.formats,
                extent: None,
                sample_count: None,
                in_use: InUseTextures::default(),
            };
            let mut color_formats = ArrayVec::<Option<TextureFormat>, MAX_COLOR_ATTACHMENTS>::new();
            for attachment in desc.color_attachments.iter() {
                let at = match *attachment {
                    Some(ref at) => at,
                    None => {
                        color_formats.push(None);
                        continue;
                    }
                };
                let view = collector.add(at.view, at.depth_slice, AttachmentAspect::Color)?;
                if let Some(resolve_target) = at.resolve_target {
                    collector.add_resolve_target(at.view, view, resolve_target)?;
                }
                color_formats.push(Some(view.format));
            }
            validate_color_attachment_bytes_per_sample(
                color_formats.iter().copied(),
                device.limits.max_color_attachment_bytes_per_sample,
                &*self.formats,
            )?;

            let depth_stencil_format = match desc.depth_stencil_attachment {
                Some(at) => Some(
                    collector
                        .add(at.view, None, AttachmentAspect::DepthStencil)?
                        .format,
                ),
                None => None,
            };

            let (extent, sample_count) = match (collector.extent, collector.sample_count) {
                (Some(extent), Some(sample_count)) => (extent, sample_count),
                _ => return Err(AttachmentError::MissingAttachments.into()),
            };

            if let Some(tw) = desc.timestamp_writes {
                validate_timestamp_writes(&self.hub, device_id, tw)?;
            }
            if let Some(query_set_id) = desc.occlusion_query_set {
                let query_set = self.hub.query_sets.get_usable(query_set_id, device_id)?;
                let set_type = SimplifiedQueryType::from(query_set.ty);
                if set_type != SimplifiedQueryType::Occlusion {
                    return Err(QueryUseError::IncompatibleType {
                        query_set: query_set_id,
                        set_type,
                        query_type: SimplifiedQueryType::Occlusion,
                    }
                    .into());
                }
            }

            let context = RenderPassContext::new(color_formats, depth_stencil_format, sample_count);
            log::trace!("Beginning render pass with {}", context);
            let (depth_read_only, stencil_read_only) = desc
                .depth_stencil_attachment
                .map_or((false, false), |at| (at.depth_read_only, at.stencil_read_only));

            let pass = RenderPass {
                info: ResourceInfo::new(&desc.label, device_id),
                parent: encoder_id,
                state: EncoderState::Open,
                extent,
                render: RenderState::new(
                    device_id,
                    device.limits.clone(),
                    context,
                    depth_read_only,
                    stencil_read_only,
                ),
                occlusion_query_set: desc.occlusion_query_set,
                active_occlusion_query: None,
                used_occlusion_queries: FastHashSet::default(),
                debug_groups: DebugGroupStack::default(),
            };

            self.encoders.command_encoders.get_mut(encoder_id)?.state = EncoderState::Locked;
            Ok(self.encoders.render_passes.insert(pass))
        })()
        .map_pass_err(scope);

        if let Ok(id) = result {
            api_log!(
                "CommandEncoder::begin_render_pass({:?}, {:?}) -> {:?}",
                encoder_id,
                desc.label,
                id
            );
        }
        self.report(result)
    }

    /// Run `record` against an open render pass.
    fn record_render_pass<T>(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        scope: PassErrorScope,
        record: impl FnOnce(&mut RenderPass, &Hub) -> Result<T, RenderPassErrorInner>,
    ) -> Result<T, Error> {
        let hub = &self.hub;
        let render_passes = &mut self.encoders.render_passes;
        let result: Result<T, RenderPassError> = (|| -> Result<T, RenderPassErrorInner> {
            let pass = render_passes.get_mut(pass_id)?;
            check_open(pass.state, pass_id)?;
            record(pass, hub)
        })()
        .map_pass_err(scope);
        self.report(result)
    }

    fn render_pass_pipeline(&self, pass_id: id::RenderPassEncoderId) -> Option<id::RenderPipelineId> {
        self.encoders
            .render_passes
            .get(pass_id)
            .ok()
            .and_then(|pass| pass.render.pipeline)
    }

    pub fn render_pass_set_pipeline(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        pipeline_id: id::RenderPipelineId,
    ) -> Result<(), Error> {
        api_log!("RenderPass::set_pipeline {:?} {:?}", pass_id, pipeline_id);
        let scope = PassErrorScope::SetPipelineRender(pipeline_id);
        self.record_render_pass(pass_id, scope, |pass, hub| {
            Ok(pass.render.set_pipeline(hub, pipeline_id)?)
        })
    }

    pub fn render_pass_set_bind_group(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        index: u32,
        bind_group_id: Option<id::BindGroupId>,
        offsets: &[DynamicOffset],
    ) -> Result<(), Error> {
        api_log!(
            "RenderPass::set_bind_group {:?} {} {:?}",
            pass_id,
            index,
            bind_group_id
        );
        let scope = PassErrorScope::SetBindGroup(bind_group_id);
        self.record_render_pass(pass_id, scope, |pass, hub| {
            Ok(pass.render.set_bind_group(hub, index, bind_group_id, offsets)?)
        })
    }

    pub fn render_pass_set_vertex_buffer(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        slot: u32,
        buffer_id: Option<id::BufferId>,
        offset: BufferAddress,
        size: Option<BufferSize>,
    ) -> Result<(), Error> {
        api_log!(
            "RenderPass::set_vertex_buffer {:?} {} {:?}",
            pass_id,
            slot,
            buffer_id
        );
        let scope = PassErrorScope::SetVertexBuffer(buffer_id);
        self.record_render_pass(pass_id, scope, |pass, hub| {
            Ok(pass
                .render
                .set_vertex_buffer(hub, slot, buffer_id, offset, size)?)
        })
    }

    pub fn render_pass_set_index_buffer(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        buffer_id: id::BufferId,
        index_format: IndexFormat,
        offset: BufferAddress,
        size: Option<BufferSize>,
    ) -> Result<(), Error> {
        api_log!("RenderPass::set_index_buffer {:?} {:?}", pass_id, buffer_id);
        let scope = PassErrorScope::SetIndexBuffer(buffer_id);
        self.record_render_pass(pass_id, scope, |pass, hub| {
            Ok(pass
                .render
                .set_index_buffer(hub, buffer_id, index_format, offset, size)?)
        })
    }

    pub fn render_pass_draw(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), Error> {
        api_log!(
            "RenderPass::draw {:?} {} {} {} {}",
            pass_id,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance
        );
        let scope = PassErrorScope::Draw {
            indexed: false,
            indirect: false,
            pipeline: self.render_pass_pipeline(pass_id),
        };
        self.record_render_pass(pass_id, scope, |pass, hub| {
            Ok(pass.render.draw(
                hub,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )?)
        })
    }

    pub fn render_pass_draw_indexed(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), Error> {
        api_log!(
            "RenderPass::draw_indexed {:?} {} {} {} {} {}",
            pass_id,
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance
        );
        let scope = PassErrorScope::Draw {
            indexed: true,
            indirect: false,
            pipeline: self.render_pass_pipeline(pass_id),
        };
        self.record_render_pass(pass_id, scope, |pass, hub| {
            Ok(pass.render.draw_indexed(
                hub,
                index_count,
                instance_count,
                first_index,
                first_instance,
            )?)
        })
    }

    pub fn render_pass_draw_indirect(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        buffer_id: id::BufferId,
        offset: BufferAddress,
    ) -> Result<(), Error> {
        self.render_pass_draw_indirect_impl(pass_id, buffer_id, offset, false)
    }

    pub fn render_pass_draw_indexed_indirect(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        buffer_id: id::BufferId,
        offset: BufferAddress,
    ) -> Result<(), Error> {
        self.render_pass_draw_indirect_impl(pass_id, buffer_id, offset, true)
    }

    fn render_pass_draw_indirect_impl(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        buffer_id: id::BufferId,
        offset: BufferAddress,
        indexed: bool,
    ) -> Result<(), Error> {
        api_log!(
            "RenderPass::draw_indirect (indexed:{}) {:?} {:?} {}",
            indexed,
            pass_id,
            buffer_id,
            offset
        );
        let scope = PassErrorScope::Draw {
            indexed,
            indirect: true,
            pipeline: self.render_pass_pipeline(pass_id),
        };
        self.record_render_pass(pass_id, scope, |pass, hub| {
            Ok(pass.render.draw_indirect(hub, buffer_id, offset, indexed)?)
        })
    }

    pub fn render_pass_set_blend_constant(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        color: &wgt::Color,
    ) -> Result<(), Error> {
        api_log!("RenderPass::set_blend_constant {:?} {:?}", pass_id, color);
        self.record_render_pass(pass_id, PassErrorScope::SetBlendConstant, |_, _| Ok(()))
    }

    pub fn render_pass_set_stencil_reference(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        reference: u32,
    ) -> Result<(), Error> {
        api_log!("RenderPass::set_stencil_reference {:?} {}", pass_id, reference);
        self.record_render_pass(pass_id, PassErrorScope::SetStencilReference, |_, _| Ok(()))
    }

    pub fn render_pass_set_viewport(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        min_depth: f32,
        max_depth: f32,
    ) -> Result<(), Error> {
        api_log!(
            "RenderPass::set_viewport {:?} ({}, {}, {}, {}) {}..{}",
            pass_id,
            x,
            y,
            w,
            h,
            min_depth,
            max_depth
        );
        self.record_render_pass(pass_id, PassErrorScope::SetViewport, |pass, _| {
            let (width, height) = pass.extent;
            let rect = Rect { x, y, w, h };
            let inside = x >= 0.0
                && y >= 0.0
                && w >= 0.0
                && h >= 0.0
                && x + w <= width as f32
                && y + h <= height as f32;
            if !inside {
                return Err(RenderPassErrorInner::InvalidViewportRect {
                    rect,
                    width,
                    height,
                });
            }
            if !(0.0..=1.0).contains(&min_depth)
                || !(0.0..=1.0).contains(&max_depth)
                || min_depth > max_depth
            {
                return Err(RenderPassErrorInner::InvalidViewportDepth(
                    min_depth, max_depth,
                ));
            }
            Ok(())
        })
    }

    pub fn render_pass_set_scissor_rect(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<(), Error> {
        api_log!(
            "RenderPass::set_scissor_rect {:?} ({}, {}, {}, {})",
            pass_id,
            x,
            y,
            w,
            h
        );
        self.record_render_pass(pass_id, PassErrorScope::SetScissorRect, |pass, _| {
            let (width, height) = pass.extent;
            if x as u64 + w as u64 > width as u64 || y as u64 + h as u64 > height as u64 {
                return Err(RenderPassErrorInner::InvalidScissorRect {
                    rect: Rect { x, y, w, h },
                    width,
                    height,
                });
            }
            Ok(())
        })
    }

    pub fn render_pass_begin_occlusion_query(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        query_index: u32,
    ) -> Result<(), Error> {
        api_log!("RenderPass::begin_occlusion_query {:?} {}", pass_id, query_index);
        self.record_render_pass(pass_id, PassErrorScope::BeginOcclusionQuery, |pass, hub| {
            let query_set_id = pass
                .occlusion_query_set
                .ok_or(QueryUseError::MissingOcclusionQuerySet)?;
            let query_set = hub.query_sets.get_alive(query_set_id)?;
            query_set.validate_query(query_set_id, SimplifiedQueryType::Occlusion, query_index)?;

            if pass.used_occlusion_queries.contains(&query_index) {
                return Err(QueryUseError::UsedTwiceInsideRenderpass { query_index }.into());
            }
            if let Some(active_query_index) = pass.active_occlusion_query {
                return Err(QueryUseError::AlreadyStarted {
                    active_query_index,
                    new_query_index: query_index,
                }
                .into());
            }

            pass.used_occlusion_queries.insert(query_index);
            pass.active_occlusion_query = Some(query_index);
            Ok(())
        })
    }

    pub fn render_pass_end_occlusion_query(
        &mut self,
        pass_id: id::RenderPassEncoderId,
    ) -> Result<(), Error> {
        api_log!("RenderPass::end_occlusion_query {:?}", pass_id);
        self.record_render_pass(pass_id, PassErrorScope::EndOcclusionQuery, |pass, _| {
            match pass.active_occlusion_query.take() {
                Some(_) => Ok(()),
                None => Err(QueryUseError::AlreadyStopped.into()),
            }
        })
    }

    pub fn render_pass_execute_bundles(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        bundle_ids: &[id::RenderBundleId],
    ) -> Result<(), Error> {
        profiling::scope!("RenderPass::execute_bundles");
        api_log!("RenderPass::execute_bundles {:?} {:?}", pass_id, bundle_ids);
        self.record_render_pass(pass_id, PassErrorScope::ExecuteBundle, |pass, hub| {
            for &bundle_id in bundle_ids {
                let bundle = hub.render_bundles.get(bundle_id)?;
                bundle
                    .info
                    .check_device(bundle_id.into(), pass.render.device_id)?;
                pass.render
                    .context
                    .check_compatible(&bundle.context, bundle_id.into())
                    .map_err(RenderPassErrorInner::IncompatibleBundleTargets)?;

                let (pass_depth, pass_stencil) =
                    (pass.render.is_depth_read_only, pass.render.is_stencil_read_only);
                if (pass_depth && !bundle.is_depth_read_only)
                    || (pass_stencil && !bundle.is_stencil_read_only)
                {
                    return Err(RenderPassErrorInner::IncompatibleBundleReadOnlyDepthStencil {
                        bundle: bundle_id,
                        pass_depth,
                        pass_stencil,
                        bundle_depth: bundle.is_depth_read_only,
                        bundle_stencil: bundle.is_stencil_read_only,
                    });
                }

                for &buffer_id in bundle.used_buffers.iter() {
                    hub.buffers.get_alive(buffer_id)?;
                }
                for &texture_id in bundle.used_textures.iter() {
                    hub.textures.get_alive(texture_id)?;
                }
            }

            // Bundles do not inherit or leave behind any bindings.
            pass.render.reset_bindings();
            Ok(())
        })
    }

    pub fn render_pass_push_debug_group(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        label: &str,
    ) -> Result<(), Error> {
        api_log!("RenderPass::push_debug_group {:?} {}", pass_id, label);
        self.record_render_pass(pass_id, PassErrorScope::PushDebugGroup, |pass, _| {
            pass.debug_groups.push();
            Ok(())
        })
    }

    pub fn render_pass_pop_debug_group(
        &mut self,
        pass_id: id::RenderPassEncoderId,
    ) -> Result<(), Error> {
        api_log!("RenderPass::pop_debug_group {:?}", pass_id);
        self.record_render_pass(pass_id, PassErrorScope::PopDebugGroup, |pass, _| {
            Ok(pass.debug_groups.pop()?)
        })
    }

    pub fn render_pass_insert_debug_marker(
        &mut self,
        pass_id: id::RenderPassEncoderId,
        label: &str,
    ) -> Result<(), Error> {
        api_log!("RenderPass::insert_debug_marker {:?} {}", pass_id, label);
        self.record_render_pass(pass_id, PassErrorScope::InsertDebugMarker, |_, _| Ok(()))
    }

    pub fn render_pass_end(&mut self, pass_id: id::RenderPassEncoderId) -> Result<(), Error> {
        profiling::scope!("RenderPass::end");
        api_log!("RenderPass::end {:?}", pass_id);

        let encoders = &mut self.encoders;
        let result: Result<(), RenderPassError> = (|| -> Result<(), RenderPassErrorInner> {
            let pass = encoders.render_passes.get_mut(pass_id)?;
            check_open(pass.state, pass_id)?;
            if let Some(query_index) = pass.active_occlusion_query {
                return Err(RenderPassErrorInner::UnendedOcclusionQuery(query_index));
            }
            pass.debug_groups.check_balanced()?;
            let parent = encoders.command_encoders.get_mut(pass.parent)?;

            pass.state = EncoderState::Ended;
            if parent.state == EncoderState::Locked {
                parent.state = EncoderState::Open;
            }
            log::trace!("Render pass {:?} ended, unlocking {:?}", pass_id, pass.parent);
            Ok(())
        })()
        .map_pass_err(PassErrorScope::End);
        self.report(result)
    }

    pub fn render_pass(&self, pass_id: id::RenderPassEncoderId) -> Result<&RenderPass, Error> {
        Ok(self.encoders.render_passes.get(pass_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::DeviceDescriptor,
        format::StaticFormatTable,
        resource::{QuerySetDescriptor, TextureDescriptor, TextureViewDescriptor},
    };

    struct Fixture {
        ctx: ValidationContext,
        device: id::DeviceId,
        encoder: id::CommandEncoderId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut ctx = ValidationContext::new();
            let device = ctx.device_create(&DeviceDescriptor::default()).unwrap();
            let encoder = ctx
                .device_create_command_encoder(device, &Default::default())
                .unwrap();
            Self {
                ctx,
                device,
                encoder,
            }
        }

        fn texture(&mut self, format: TextureFormat, width: u32, layers: u32) -> id::TextureId {
            self.ctx
                .device_create_texture(
                    self.device,
                    &TextureDescriptor {
                        label: None,
                        size: wgt::Extent3d {
                            width,
                            height: width,
                            depth_or_array_layers: layers,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgt::TextureDimension::D2,
                        format,
                        usage: wgt::TextureUsages::RENDER_ATTACHMENT,
                        view_formats: Vec::new(),
                    },
                )
                .unwrap()
        }

        fn view(&mut self, texture: id::TextureId, layer: u32) -> id::TextureViewId {
            self.ctx
                .texture_create_view(
                    texture,
                    &TextureViewDescriptor {
                        dimension: Some(wgt::TextureViewDimension::D2),
                        base_array_layer: layer,
                        array_layer_count: Some(1),
                        ..Default::default()
                    },
                )
                .unwrap()
        }

        fn color_view(&mut self, format: TextureFormat, width: u32) -> id::TextureViewId {
            let texture = self.texture(format, width, 1);
            self.view(texture, 0)
        }

        fn begin(
            &mut self,
            colors: &[id::TextureViewId],
        ) -> Result<id::RenderPassEncoderId, Error> {
            let color_attachments: Vec<_> = colors
                .iter()
                .map(|&view| {
                    Some(RenderPassColorAttachment {
                        view,
                        depth_slice: None,
                        resolve_target: None,
                    })
                })
                .collect();
            self.ctx.command_encoder_begin_render_pass(
                self.encoder,
                &RenderPassDescriptor {
                    color_attachments: Cow::Owned(color_attachments),
                    ..Default::default()
                },
            )
        }
    }

    #[test]
    fn bytes_per_sample_are_aligned() {
        let formats = StaticFormatTable;
        // r8 costs 1 byte, rgba32float costs 16 bytes aligned to 4.
        let attachments = [
            Some(TextureFormat::R8Unorm),
            None,
            Some(TextureFormat::Rgba32Float),
            Some(TextureFormat::Rgba32Float),
        ];
        assert_eq!(
            validate_color_attachment_bytes_per_sample(attachments, 32, &formats),
            Err(ColorAttachmentError::TooManyBytesPerSample {
                total: 33,
                limit: 32
            })
        );
        assert!(validate_color_attachment_bytes_per_sample(attachments, 33, &formats).is_ok());
    }

    #[test]
    fn byte_budget_does_not_pad_between_attachments() {
        let mut f = Fixture::new();
        let mut views = Vec::new();
        for &format in &[
            TextureFormat::R8Unorm,
            TextureFormat::R32Float,
            TextureFormat::R8Unorm,
            TextureFormat::R32Float,
            TextureFormat::R8Unorm,
            TextureFormat::R32Float,
            TextureFormat::R8Unorm,
        ] {
            views.push(f.color_view(format, 4));
        }
        // 1 + 4 + 1 + 4 + 1 + 4 + 1 + 16 is exactly the default limit of 32.
        views.push(f.color_view(TextureFormat::Rgba32Float, 4));
        let pass = f.begin(&views).unwrap();
        f.ctx.render_pass_end(pass).unwrap();

        views[0] = f.color_view(TextureFormat::Rg8Unorm, 4);
        let err = f.begin(&views).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn pass_locks_encoder() {
        let mut f = Fixture::new();
        let view = f.color_view(TextureFormat::Rgba8Unorm, 4);
        let pass = f.begin(&[view]).unwrap();
        assert_eq!(
            f.ctx.command_encoder_state(f.encoder).unwrap(),
            EncoderState::Locked
        );
        let err = f.ctx.command_encoder_finish(f.encoder).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncoderState);
        assert!(err.to_string().contains("locked"));

        f.ctx.render_pass_end(pass).unwrap();
        assert_eq!(
            f.ctx.command_encoder_state(f.encoder).unwrap(),
            EncoderState::Open
        );
        let err = f.ctx.render_pass_end(pass).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncoderState);
        f.ctx.command_encoder_finish(f.encoder).unwrap();
    }

    #[test]
    fn failed_begin_keeps_encoder_open() {
        let mut f = Fixture::new();
        let err = f.begin(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        assert_eq!(
            f.ctx.command_encoder_state(f.encoder).unwrap(),
            EncoderState::Open
        );
        assert_eq!(f.ctx.generate_report().render_passes.num_occupied, 0);
    }

    #[test]
    fn attachment_sizes_must_agree() {
        let mut f = Fixture::new();
        let a = f.color_view(TextureFormat::Rgba8Unorm, 4);
        let b = f.color_view(TextureFormat::Rgba8Unorm, 8);
        let err = f.begin(&[a, b]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert!(err.related().contains(&b.into()));
    }

    #[test]
    fn aliasing_attachments_are_rejected() {
        let mut f = Fixture::new();
        let texture = f.texture(TextureFormat::Rgba8Unorm, 4, 2);
        let first = f.view(texture, 0);
        let same = f.view(texture, 0);
        let other_layer = f.view(texture, 1);
        assert_eq!(
            f.begin(&[first, same]).unwrap_err().kind(),
            ErrorKind::AlreadyInUse
        );
        let pass = f.begin(&[first, other_layer]).unwrap();
        f.ctx.render_pass_end(pass).unwrap();
    }

    #[test]
    fn depth_formats_are_not_color_attachments() {
        let mut f = Fixture::new();
        let depth = f.color_view(TextureFormat::Depth32Float, 4);
        let err = f.begin(&[depth]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
    }

    #[test]
    fn destroyed_attachment() {
        let mut f = Fixture::new();
        let texture = f.texture(TextureFormat::Rgba8Unorm, 4, 1);
        let view = f.view(texture, 0);
        f.ctx.texture_destroy(texture).unwrap();
        let err = f.begin(&[view]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestroyedResource);
        assert_eq!(err.related()[0], crate::id::ResourceRef::Texture(texture));
    }

    #[test]
    fn viewport_and_scissor_bounds() {
        let mut f = Fixture::new();
        let view = f.color_view(TextureFormat::Rgba8Unorm, 4);
        let pass = f.begin(&[view]).unwrap();

        f.ctx
            .render_pass_set_viewport(pass, 0.0, 0.0, 4.0, 4.0, 0.0, 1.0)
            .unwrap();
        let err = f
            .ctx
            .render_pass_set_viewport(pass, 1.0, 0.0, 4.0, 4.0, 0.0, 1.0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        let err = f
            .ctx
            .render_pass_set_viewport(pass, 0.0, 0.0, 4.0, 4.0, 0.5, 0.25)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);

        f.ctx.render_pass_set_scissor_rect(pass, 2, 2, 2, 2).unwrap();
        let err = f
            .ctx
            .render_pass_set_scissor_rect(pass, 3, 0, 2, 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn occlusion_queries() {
        let mut f = Fixture::new();
        let view = f.color_view(TextureFormat::Rgba8Unorm, 4);
        let query_set = f
            .ctx
            .device_create_query_set(
                f.device,
                &QuerySetDescriptor {
                    label: None,
                    ty: wgt::QueryType::Occlusion,
                    count: 2,
                },
            )
            .unwrap();
        let pass = f
            .ctx
            .command_encoder_begin_render_pass(
                f.encoder,
                &RenderPassDescriptor {
                    color_attachments: Cow::Owned(vec![Some(RenderPassColorAttachment {
                        view,
                        depth_slice: None,
                        resolve_target: None,
                    })]),
                    occlusion_query_set: Some(query_set),
                    ..Default::default()
                },
            )
            .unwrap();

        f.ctx.render_pass_begin_occlusion_query(pass, 0).unwrap();
        let err = f.ctx.render_pass_begin_occlusion_query(pass, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyInUse);
        let err = f.ctx.render_pass_end(pass).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyInUse);

        f.ctx.render_pass_end_occlusion_query(pass).unwrap();
        let err = f.ctx.render_pass_end_occlusion_query(pass).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        let err = f.ctx.render_pass_begin_occlusion_query(pass, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);

        f.ctx.render_pass_begin_occlusion_query(pass, 1).unwrap();
        f.ctx.render_pass_end_occlusion_query(pass).unwrap();
        f.ctx.render_pass_end(pass).unwrap();
    }

    #[test]
    fn pass_without_query_set() {
        let mut f = Fixture::new();
        let view = f.color_view(TextureFormat::Rgba8Unorm, 4);
        let pass = f.begin(&[view]).unwrap();
        let err = f.ctx.render_pass_begin_occlusion_query(pass, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBinding);
    }
}
