/*! Command encoders, and the passes and bundles recorded with them.

Every encoder kind carries an [`EncoderState`]. A command encoder is
`Locked` while one of its passes is open and returns to `Open` when the pass
ends; `finish` moves it to `Ended` for good. Passes and bundle encoders go
straight from `Open` to `Ended`. Any recording call on an encoder that is not
`Open` fails with an [`EncoderStateError`] naming the state it observed.
!*/

mod bind;
mod bundle;
mod compute;
mod draw;
mod query;
mod render;
mod render_command;
mod transfer;

pub use self::bind::SetBindGroupError;
pub use self::bundle::{
    CreateRenderBundleError, RenderBundle, RenderBundleDescriptor, RenderBundleEncoder,
    RenderBundleEncoderDescriptor, RenderBundleError,
};
pub use self::compute::{ComputePass, ComputePassDescriptor, ComputePassError, ComputePassErrorInner};
pub use self::draw::{DrawError, Rect, RenderCommandError};
pub use self::query::{
    PassTimestampWrites, QueryError, QueryUseError, ResolveError, SimplifiedQueryType,
};
pub use self::render::{
    validate_color_attachment_bytes_per_sample, AttachmentError, ColorAttachmentError,
    RenderPass, RenderPassColorAttachment, RenderPassDepthStencilAttachment,
    RenderPassDescriptor, RenderPassError, RenderPassErrorInner,
};
pub use self::render_command::RenderCommand;
pub use self::transfer::{CopySide, TransferError};

use crate::{
    api_log,
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    global::ValidationContext,
    id::{self, ResourceRef},
    resource::{ResourceError, ResourceInfo},
    Error, Label,
};

use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderState {
    /// Ready to record.
    Open,
    /// A pass is being recorded on this command encoder.
    Locked,
    /// Finished or ended. Never reopened.
    Ended,
}

impl fmt::Display for EncoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Open => "open",
            Self::Locked => "locked",
            Self::Ended => "ended",
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{encoder} is {state}, but it must be open")]
pub struct EncoderStateError {
    pub encoder: ResourceRef,
    pub state: EncoderState,
}

impl ErrorDetail for EncoderStateError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidEncoderState
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        related.push(self.encoder);
    }
}

pub(crate) fn check_open(
    state: EncoderState,
    encoder: impl Into<ResourceRef>,
) -> Result<(), EncoderStateError> {
    match state {
        EncoderState::Open => Ok(()),
        state => Err(EncoderStateError {
            encoder: encoder.into(),
            state,
        }),
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DebugGroupError {
    #[error("Cannot pop debug group, because number of pushed debug groups is zero")]
    InvalidPop,
    #[error("{0} debug groups were pushed but never popped")]
    MissingPop(u32),
}

impl ErrorDetail for DebugGroupError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidEncoderState
    }
}

/// Nesting depth of debug groups on an encoder.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DebugGroupStack {
    depth: u32,
}

impl DebugGroupStack {
    pub(crate) fn push(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn check_pop(&self) -> Result<(), DebugGroupError> {
        if self.depth == 0 {
            return Err(DebugGroupError::InvalidPop);
        }
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<(), DebugGroupError> {
        self.check_pop()?;
        self.depth -= 1;
        Ok(())
    }

    pub(crate) fn check_balanced(&self) -> Result<(), DebugGroupError> {
        match self.depth {
            0 => Ok(()),
            depth => Err(DebugGroupError::MissingPop(depth)),
        }
    }
}

pub type CommandEncoderDescriptor<'a> = wgt::CommandEncoderDescriptor<Label<'a>>;

#[derive(Debug)]
pub struct CommandEncoder {
    pub(crate) info: ResourceInfo,
    pub(crate) state: EncoderState,
    pub(crate) debug_groups: DebugGroupStack,
}

impl CommandEncoder {
    pub fn state(&self) -> EncoderState {
        self.state
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandEncoderError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] EncoderStateError),
    #[error(transparent)]
    DebugGroup(#[from] DebugGroupError),
}

impl ErrorDetail for CommandEncoderError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::State(ref e) => e.kind(),
            Self::DebugGroup(ref e) => e.kind(),
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::State(ref e) => e.collect_related(related),
            Self::DebugGroup(ref e) => e.collect_related(related),
        }
    }
}

/// The command a pass or bundle error happened in.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PassErrorScope {
    #[error("In a bundle parameter")]
    Bundle,
    #[error("In a pass parameter")]
    Pass(id::CommandEncoderId),
    #[error("In a set_bind_group command")]
    SetBindGroup(Option<id::BindGroupId>),
    #[error("In a set_pipeline command")]
    SetPipelineRender(id::RenderPipelineId),
    #[error("In a set_pipeline command")]
    SetPipelineCompute(id::ComputePipelineId),
    #[error("In a set_vertex_buffer command")]
    SetVertexBuffer(Option<id::BufferId>),
    #[error("In a set_index_buffer command")]
    SetIndexBuffer(id::BufferId),
    #[error("In a set_blend_constant command")]
    SetBlendConstant,
    #[error("In a set_stencil_reference command")]
    SetStencilReference,
    #[error("In a set_viewport command")]
    SetViewport,
    #[error("In a set_scissor_rect command")]
    SetScissorRect,
    #[error("In a draw command, indexed:{indexed} indirect:{indirect}")]
    Draw {
        indexed: bool,
        indirect: bool,
        pipeline: Option<id::RenderPipelineId>,
    },
    #[error("In a begin_occlusion_query command")]
    BeginOcclusionQuery,
    #[error("In a end_occlusion_query command")]
    EndOcclusionQuery,
    #[error("In a execute_bundle command")]
    ExecuteBundle,
    #[error("In a dispatch command, indirect:{indirect}")]
    Dispatch {
        indirect: bool,
        pipeline: Option<id::ComputePipelineId>,
    },
    #[error("In a push_debug_group command")]
    PushDebugGroup,
    #[error("In a pop_debug_group command")]
    PopDebugGroup,
    #[error("In a insert_debug_marker command")]
    InsertDebugMarker,
    #[error("In an end command")]
    End,
    #[error("In a finish command")]
    Finish,
}

impl PassErrorScope {
    pub(crate) fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Pass(id) => related.push(id.into()),
            Self::SetBindGroup(Some(id)) => related.push(id.into()),
            Self::SetPipelineRender(id) => related.push(id.into()),
            Self::SetPipelineCompute(id) => related.push(id.into()),
            Self::SetVertexBuffer(Some(id)) | Self::SetIndexBuffer(id) => related.push(id.into()),
            Self::Draw {
                pipeline: Some(id), ..
            } => related.push(id.into()),
            Self::Dispatch {
                pipeline: Some(id), ..
            } => related.push(id.into()),
            _ => {}
        }
    }
}

pub(crate) trait MapPassErr<T, O> {
    fn map_pass_err(self, scope: PassErrorScope) -> Result<T, O>;
}

/// Defines the error type of a pass kind: an inner error plus the scope it
/// happened in.
macro_rules! define_pass_error {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Error)]
        #[error("{scope}")]
        pub struct $name {
            pub scope: PassErrorScope,
            #[source]
            pub inner: $inner,
        }

        impl ErrorDetail for $name {
            fn kind(&self) -> ErrorKind {
                self.inner.kind()
            }

            fn collect_related(&self, related: &mut RelatedObjects) {
                self.inner.collect_related(related);
                self.scope.collect_related(related);
            }
        }

        impl<T, E> MapPassErr<T, $name> for Result<T, E>
        where
            E: Into<$inner>,
        {
            fn map_pass_err(self, scope: PassErrorScope) -> Result<T, $name> {
                self.map_err(|inner| $name {
                    scope,
                    inner: inner.into(),
                })
            }
        }
    };
}
pub(crate) use define_pass_error;

impl ValidationContext {
    pub fn device_create_command_encoder(
        &mut self,
        device_id: id::DeviceId,
        desc: &CommandEncoderDescriptor,
    ) -> Result<id::CommandEncoderId, Error> {
        profiling::scope!("Device::create_command_encoder");
        let result = (|| -> Result<_, CommandEncoderError> {
            let device = self.hub.devices.get(device_id)?;
            device.check_is_valid(device_id)?;
            Ok(self.encoders.command_encoders.insert(CommandEncoder {
                info: ResourceInfo::new(&desc.label, device_id),
                state: EncoderState::Open,
                debug_groups: DebugGroupStack::default(),
            }))
        })();
        if let Ok(id) = result {
            api_log!("Device::create_command_encoder({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    pub fn command_encoder_finish(&mut self, encoder_id: id::CommandEncoderId) -> Result<(), Error> {
        profiling::scope!("CommandEncoder::finish");
        api_log!("CommandEncoder::finish {:?}", encoder_id);

        let result = (|| -> Result<(), CommandEncoderError> {
            let encoder = self.encoders.command_encoders.get_mut(encoder_id)?;
            check_open(encoder.state, encoder_id)?;
            encoder.debug_groups.check_balanced()?;
            encoder.state = EncoderState::Ended;
            log::trace!("Command encoder {:?} ended", encoder_id);
            Ok(())
        })();
        self.report(result)
    }

    pub fn command_encoder_push_debug_group(
        &mut self,
        encoder_id: id::CommandEncoderId,
        label: &str,
    ) -> Result<(), Error> {
        api_log!("CommandEncoder::push_debug_group {:?} {}", encoder_id, label);
        let result = self.record_command_encoder(encoder_id, |encoder| {
            encoder.debug_groups.push();
            Ok(())
        });
        self.report(result)
    }

    pub fn command_encoder_pop_debug_group(
        &mut self,
        encoder_id: id::CommandEncoderId,
    ) -> Result<(), Error> {
        api_log!("CommandEncoder::pop_debug_group {:?}", encoder_id);
        let result = self.record_command_encoder(encoder_id, |encoder| {
            encoder.debug_groups.pop()?;
            Ok(())
        });
        self.report(result)
    }

    pub fn command_encoder_insert_debug_marker(
        &mut self,
        encoder_id: id::CommandEncoderId,
        label: &str,
    ) -> Result<(), Error> {
        api_log!("CommandEncoder::insert_debug_marker {:?} {}", encoder_id, label);
        let result = self.record_command_encoder(encoder_id, |_| Ok(()));
        self.report(result)
    }

    pub fn command_encoder_state(
        &self,
        encoder_id: id::CommandEncoderId,
    ) -> Result<EncoderState, Error> {
        Ok(self.encoders.command_encoders.get(encoder_id)?.state())
    }

    fn record_command_encoder(
        &mut self,
        encoder_id: id::CommandEncoderId,
        record: impl FnOnce(&mut CommandEncoder) -> Result<(), CommandEncoderError>,
    ) -> Result<(), CommandEncoderError> {
        let encoder = self.encoders.command_encoders.get_mut(encoder_id)?;
        check_open(encoder.state, encoder_id)?;
        record(encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::DeviceDescriptor, ErrorKind};

    fn encoder() -> (ValidationContext, id::CommandEncoderId) {
        let mut ctx = ValidationContext::new();
        let device = ctx.device_create(&DeviceDescriptor::default()).unwrap();
        let encoder = ctx
            .device_create_command_encoder(device, &CommandEncoderDescriptor::default())
            .unwrap();
        (ctx, encoder)
    }

    #[test]
    fn finish_twice() {
        let (mut ctx, encoder) = encoder();
        ctx.command_encoder_finish(encoder).unwrap();
        let err = ctx.command_encoder_finish(encoder).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEncoderState);
        assert!(err.to_string().contains("ended"));
        assert_eq!(ctx.command_encoder_state(encoder).unwrap(), EncoderState::Ended);
    }

    #[test]
    fn debug_groups_must_balance() {
        let (mut ctx, encoder) = encoder();
        assert_eq!(
            ctx.command_encoder_pop_debug_group(encoder).unwrap_err().kind(),
            ErrorKind::InvalidEncoderState
        );
        ctx.command_encoder_push_debug_group(encoder, "outer").unwrap();
        ctx.command_encoder_insert_debug_marker(encoder, "marker").unwrap();
        assert!(ctx.command_encoder_finish(encoder).is_err());
        // The failed finish left the encoder open.
        assert_eq!(ctx.command_encoder_state(encoder).unwrap(), EncoderState::Open);
        ctx.command_encoder_pop_debug_group(encoder).unwrap();
        ctx.command_encoder_finish(encoder).unwrap();
    }

    #[test]
    fn destroyed_device_refuses_encoders() {
        let mut ctx = ValidationContext::new();
        let device = ctx.device_create(&DeviceDescriptor::default()).unwrap();
        ctx.device_destroy(device).unwrap();
        let err = ctx
            .device_create_command_encoder(device, &CommandEncoderDescriptor::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestroyedResource);
    }
}
