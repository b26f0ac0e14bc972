use crate::{
    api_log,
    command::{
        bind::{resolve_bind_group, Binder},
        check_open, define_pass_error,
        draw::{check_indirect_buffer, DrawError},
        query::{validate_timestamp_writes, PassTimestampWrites, QueryUseError},
        DebugGroupError, DebugGroupStack, EncoderState, EncoderStateError, MapPassErr,
        PassErrorScope, SetBindGroupError,
    },
    device::Limits,
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    global::ValidationContext,
    hub::Hub,
    id,
    resource::{ResourceError, ResourceInfo},
    Error, Label,
};

use thiserror::Error;
use wgt::{BufferAddress, DynamicOffset};

/// Size of the arguments of an indirect dispatch.
const DISPATCH_INDIRECT_SIZE: BufferAddress = 12;

#[derive(Clone, Debug, Default)]
pub struct ComputePassDescriptor<'a> {
    pub label: Label<'a>,
    /// Defines where and when timestamp values will be written for this pass.
    pub timestamp_writes: Option<&'a PassTimestampWrites>,
}

/// Error encountered when performing a compute pass.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ComputePassErrorInner {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] EncoderStateError),
    #[error(transparent)]
    Query(#[from] QueryUseError),
    #[error(transparent)]
    SetBindGroup(#[from] SetBindGroupError),
    #[error(transparent)]
    Dispatch(#[from] DrawError),
    #[error(transparent)]
    DebugGroup(#[from] DebugGroupError),
}

impl ErrorDetail for ComputePassErrorInner {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::State(ref e) => e.kind(),
            Self::Query(ref e) => e.kind(),
            Self::SetBindGroup(ref e) => e.kind(),
            Self::Dispatch(ref e) => e.kind(),
            Self::DebugGroup(ref e) => e.kind(),
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::State(ref e) => e.collect_related(related),
            Self::Query(ref e) => e.collect_related(related),
            Self::SetBindGroup(ref e) => e.collect_related(related),
            Self::Dispatch(ref e) => e.collect_related(related),
            Self::DebugGroup(ref e) => e.collect_related(related),
        }
    }
}

define_pass_error!(
    /// Error encountered when performing a compute pass, with the command it
    /// happened in.
    ComputePassError(ComputePassErrorInner)
);

#[derive(Debug)]
pub struct ComputePass {
    pub(crate) info: ResourceInfo,
    pub(crate) parent: id::CommandEncoderId,
    pub(crate) state: EncoderState,
    device_id: id::DeviceId,
    limits: Limits,
    binder: Binder,
    pipeline: Option<id::ComputePipelineId>,
    debug_groups: DebugGroupStack,
}

impl ComputePass {
    pub fn label(&self) -> &str {
        self.info.label()
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn parent(&self) -> id::CommandEncoderId {
        self.parent
    }

    pub fn pipeline(&self) -> Option<id::ComputePipelineId> {
        self.pipeline
    }

    pub fn bind_group(&self, index: u32) -> Option<(id::BindGroupId, &[DynamicOffset])> {
        self.binder.group(index)
    }

    fn dispatch(&self, hub: &Hub, groups: Option<[u32; 3]>) -> Result<(), DrawError> {
        let pipeline_id = self.pipeline.ok_or(DrawError::MissingPipeline)?;
        let pipeline = hub.compute_pipelines.get(pipeline_id)?;
        self.binder.check_compatibility(hub, &pipeline.layout)?;

        if let Some(groups) = groups {
            let limit = self.limits.max_compute_workgroups_per_dimension;
            if groups.iter().any(|&count| count > limit) {
                return Err(DrawError::DispatchGroupSizeExceeded {
                    current: groups,
                    limit,
                });
            }
        }
        Ok(())
    }
}

impl ValidationContext {
    pub fn command_encoder_begin_compute_pass(
        &mut self,
        encoder_id: id::CommandEncoderId,
        desc: &ComputePassDescriptor,
    ) -> Result<id::ComputePassEncoderId, Error> {
        profiling::scope!("CommandEncoder::begin_compute_pass");
        let scope = PassErrorScope::Pass(encoder_id);

        let result: Result<_, ComputePassError> = (|| -> Result<_, ComputePassErrorInner> {
            let encoder = self.encoders.command_encoders.get(encoder_id)?;
            check_open(encoder.state, encoder_id)?;
            let device_id = encoder.info.device_id(encoder_id.into())?;
            let device = self.hub.devices.get(device_id)?;
            device.check_is_valid(device_id)?;

            if let Some(tw) = desc.timestamp_writes {
                validate_timestamp_writes(&self.hub, device_id, tw)?;
            }

            let pass = ComputePass {
                info: ResourceInfo::new(&desc.label, device_id),
                parent: encoder_id,
                state: EncoderState::Open,
                device_id,
                limits: device.limits.clone(),
                binder: Binder::default(),
                pipeline: None,
                debug_groups: DebugGroupStack::default(),
            };
            self.encoders.command_encoders.get_mut(encoder_id)?.state = EncoderState::Locked;
            Ok(self.encoders.compute_passes.insert(pass))
        })()
        .map_pass_err(scope);

        if let Ok(id) = result {
            api_log!(
                "CommandEncoder::begin_compute_pass({:?}, {:?}) -> {:?}",
                encoder_id,
                desc.label,
                id
            );
        }
        self.report(result)
    }

    fn record_compute_pass<T>(
        &mut self,
        pass_id: id::ComputePassEncoderId,
        scope: PassErrorScope,
        record: impl FnOnce(&mut ComputePass, &Hub) -> Result<T, ComputePassErrorInner>,
    ) -> Result<T, Error> {
        let hub = &self.hub;
        let compute_passes = &mut self.encoders.compute_passes;
        let result: Result<T, ComputePassError> = (|| -> Result<T, ComputePassErrorInner> {
            let pass = compute_passes.get_mut(pass_id)?;
            check_open(pass.state, pass_id)?;
            record(pass, hub)
        })()
        .map_pass_err(scope);
        self.report(result)
    }

    pub fn compute_pass_set_pipeline(
        &mut self,
        pass_id: id::ComputePassEncoderId,
        pipeline_id: id::ComputePipelineId,
    ) -> Result<(), Error> {
        api_log!("ComputePass::set_pipeline {:?} {:?}", pass_id, pipeline_id);
        let scope = PassErrorScope::SetPipelineCompute(pipeline_id);
        self.record_compute_pass(pass_id, scope, |pass, hub| {
            hub.compute_pipelines
                .get_on_device(pipeline_id, pass.device_id)?;
            log::trace!("\tSetting pipeline {:?}", pipeline_id);
            pass.pipeline = Some(pipeline_id);
            Ok(())
        })
    }

    pub fn compute_pass_set_bind_group(
        &mut self,
        pass_id: id::ComputePassEncoderId,
        index: u32,
        bind_group_id: Option<id::BindGroupId>,
        offsets: &[DynamicOffset],
    ) -> Result<(), Error> {
        api_log!(
            "ComputePass::set_bind_group {:?} {} {:?}",
            pass_id,
            index,
            bind_group_id
        );
        let scope = PassErrorScope::SetBindGroup(bind_group_id);
        self.record_compute_pass(pass_id, scope, |pass, hub| {
            let bound = resolve_bind_group(
                hub,
                pass.device_id,
                &pass.limits,
                index,
                bind_group_id,
                offsets,
            )?;
            pass.binder.assign_group(index, bound);
            Ok(())
        })
    }

    pub fn compute_pass_dispatch_workgroups(
        &mut self,
        pass_id: id::ComputePassEncoderId,
        groups_x: u32,
        groups_y: u32,
        groups_z: u32,
    ) -> Result<(), Error> {
        api_log!(
            "ComputePass::dispatch {:?} {:?}",
            pass_id,
            [groups_x, groups_y, groups_z]
        );
        let scope = PassErrorScope::Dispatch {
            indirect: false,
            pipeline: self.compute_pass_pipeline(pass_id),
        };
        self.record_compute_pass(pass_id, scope, |pass, hub| {
            Ok(pass.dispatch(hub, Some([groups_x, groups_y, groups_z]))?)
        })
    }

    pub fn compute_pass_dispatch_workgroups_indirect(
        &mut self,
        pass_id: id::ComputePassEncoderId,
        buffer_id: id::BufferId,
        offset: BufferAddress,
    ) -> Result<(), Error> {
        api_log!(
            "ComputePass::dispatch_indirect {:?} {:?} {}",
            pass_id,
            buffer_id,
            offset
        );
        let scope = PassErrorScope::Dispatch {
            indirect: true,
            pipeline: self.compute_pass_pipeline(pass_id),
        };
        self.record_compute_pass(pass_id, scope, |pass, hub| {
            pass.dispatch(hub, None)?;
            check_indirect_buffer(hub, pass.device_id, buffer_id, offset, DISPATCH_INDIRECT_SIZE)?;
            Ok(())
        })
    }

    pub fn compute_pass_push_debug_group(
        &mut self,
        pass_id: id::ComputePassEncoderId,
        label: &str,
    ) -> Result<(), Error> {
        api_log!("ComputePass::push_debug_group {:?} {}", pass_id, label);
        self.record_compute_pass(pass_id, PassErrorScope::PushDebugGroup, |pass, _| {
            pass.debug_groups.push();
            Ok(())
        })
    }

    pub fn compute_pass_pop_debug_group(
        &mut self,
        pass_id: id::ComputePassEncoderId,
    ) -> Result<(), Error> {
        api_log!("ComputePass::pop_debug_group {:?}", pass_id);
        self.record_compute_pass(pass_id, PassErrorScope::PopDebugGroup, |pass, _| {
            Ok(pass.debug_groups.pop()?)
        })
    }

    pub fn compute_pass_insert_debug_marker(
        &mut self,
        pass_id: id::ComputePassEncoderId,
        label: &str,
    ) -> Result<(), Error> {
        api_log!("ComputePass::insert_debug_marker {:?} {}", pass_id, label);
        self.record_compute_pass(pass_id, PassErrorScope::InsertDebugMarker, |_, _| Ok(()))
    }

    pub fn compute_pass_end(&mut self, pass_id: id::ComputePassEncoderId) -> Result<(), Error> {
        profiling::scope!("ComputePass::end");
        api_log!("ComputePass::end {:?}", pass_id);

        let encoders = &mut self.encoders;
        let result: Result<(), ComputePassError> = (|| -> Result<(), ComputePassErrorInner> {
            let pass = encoders.compute_passes.get_mut(pass_id)?;
            check_open(pass.state, pass_id)?;
            pass.debug_groups.check_balanced()?;
            let parent = encoders.command_encoders.get_mut(pass.parent)?;

            pass.state = EncoderState::Ended;
            if parent.state == EncoderState::Locked {
                parent.state = EncoderState::Open;
            }
            log::trace!("Compute pass {:?} ended, unlocking {:?}", pass_id, pass.parent);
            Ok(())
        })()
        .map_pass_err(PassErrorScope::End);
        self.report(result)
    }

    pub fn compute_pass(&self, pass_id: id::ComputePassEncoderId) -> Result<&ComputePass, Error> {
        Ok(self.encoders.compute_passes.get(pass_id)?)
    }

    fn compute_pass_pipeline(
        &self,
        pass_id: id::ComputePassEncoderId,
    ) -> Option<id::ComputePipelineId> {
        self.encoders
            .compute_passes
            .get(pass_id)
            .ok()
            .and_then(|pass| pass.pipeline)
    }
}
