/*! Allocating resource ids, and tracking the resources they refer to.

The [`ValidationContext`] keeps one [`Storage`] per kind of shadow record.
Records for immutable or destroy-only objects live in the [`Hub`]; records
for encoders, which change on every recording call, live in [`Encoders`].
Keeping the two apart lets a recording call mutate its encoder while it
reads buffers, pipelines and bind groups out of the hub.

Records never hold each other: a bind group names its buffers by id, a
texture view names its texture by id. When the host reports that a real
object went away, its record is removed and its id stops resolving, while
records that named it remain untouched.

[`ValidationContext`]: crate::global::ValidationContext
[`Storage`]: crate::storage::Storage
!*/

use crate::{
    binding_model::{BindGroup, BindGroupLayout, PipelineLayout},
    command::{CommandEncoder, ComputePass, RenderBundle, RenderBundleEncoder, RenderPass},
    device::Device,
    id,
    pipeline::{ComputePipeline, RenderPipeline, ShaderModule},
    resource::{Buffer, QuerySet, Sampler, Texture, TextureView},
    storage::{Storage, StorageReport},
};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct HubReport {
    pub devices: StorageReport,
    pub shader_modules: StorageReport,
    pub bind_group_layouts: StorageReport,
    pub pipeline_layouts: StorageReport,
    pub bind_groups: StorageReport,
    pub render_pipelines: StorageReport,
    pub compute_pipelines: StorageReport,
    pub render_bundles: StorageReport,
    pub buffers: StorageReport,
    pub textures: StorageReport,
    pub texture_views: StorageReport,
    pub samplers: StorageReport,
    pub query_sets: StorageReport,
    pub command_encoders: StorageReport,
    pub render_passes: StorageReport,
    pub compute_passes: StorageReport,
    pub render_bundle_encoders: StorageReport,
}

impl HubReport {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Shadow records of devices and everything created from them, except
/// encoders.
#[derive(Debug)]
pub struct Hub {
    pub(crate) devices: Storage<Device, id::DeviceId>,
    pub(crate) shader_modules: Storage<ShaderModule, id::ShaderModuleId>,
    pub(crate) bind_group_layouts: Storage<BindGroupLayout, id::BindGroupLayoutId>,
    pub(crate) pipeline_layouts: Storage<PipelineLayout, id::PipelineLayoutId>,
    pub(crate) bind_groups: Storage<BindGroup, id::BindGroupId>,
    pub(crate) render_pipelines: Storage<RenderPipeline, id::RenderPipelineId>,
    pub(crate) compute_pipelines: Storage<ComputePipeline, id::ComputePipelineId>,
    pub(crate) render_bundles: Storage<RenderBundle, id::RenderBundleId>,
    pub(crate) buffers: Storage<Buffer, id::BufferId>,
    pub(crate) textures: Storage<Texture, id::TextureId>,
    pub(crate) texture_views: Storage<TextureView, id::TextureViewId>,
    pub(crate) samplers: Storage<Sampler, id::SamplerId>,
    pub(crate) query_sets: Storage<QuerySet, id::QuerySetId>,
}

impl Hub {
    pub(crate) fn new() -> Self {
        Self {
            devices: Storage::new("Device"),
            shader_modules: Storage::new("ShaderModule"),
            bind_group_layouts: Storage::new("BindGroupLayout"),
            pipeline_layouts: Storage::new("PipelineLayout"),
            bind_groups: Storage::new("BindGroup"),
            render_pipelines: Storage::new("RenderPipeline"),
            compute_pipelines: Storage::new("ComputePipeline"),
            render_bundles: Storage::new("RenderBundle"),
            buffers: Storage::new("Buffer"),
            textures: Storage::new("Texture"),
            texture_views: Storage::new("TextureView"),
            samplers: Storage::new("Sampler"),
            query_sets: Storage::new("QuerySet"),
        }
    }
}

/// Shadow records of command encoders and the passes and bundle encoders
/// recording into them.
#[derive(Debug)]
pub struct Encoders {
    pub(crate) command_encoders: Storage<CommandEncoder, id::CommandEncoderId>,
    pub(crate) render_passes: Storage<RenderPass, id::RenderPassEncoderId>,
    pub(crate) compute_passes: Storage<ComputePass, id::ComputePassEncoderId>,
    pub(crate) render_bundle_encoders: Storage<RenderBundleEncoder, id::RenderBundleEncoderId>,
}

impl Encoders {
    pub(crate) fn new() -> Self {
        Self {
            command_encoders: Storage::new("CommandEncoder"),
            render_passes: Storage::new("RenderPass"),
            compute_passes: Storage::new("ComputePass"),
            render_bundle_encoders: Storage::new("RenderBundleEncoder"),
        }
    }
}

pub(crate) fn generate_report(hub: &Hub, encoders: &Encoders) -> HubReport {
    HubReport {
        devices: hub.devices.generate_report(),
        shader_modules: hub.shader_modules.generate_report(),
        bind_group_layouts: hub.bind_group_layouts.generate_report(),
        pipeline_layouts: hub.pipeline_layouts.generate_report(),
        bind_groups: hub.bind_groups.generate_report(),
        render_pipelines: hub.render_pipelines.generate_report(),
        compute_pipelines: hub.compute_pipelines.generate_report(),
        render_bundles: hub.render_bundles.generate_report(),
        buffers: hub.buffers.generate_report(),
        textures: hub.textures.generate_report(),
        texture_views: hub.texture_views.generate_report(),
        samplers: hub.samplers.generate_report(),
        query_sets: hub.query_sets.generate_report(),
        command_encoders: encoders.command_encoders.generate_report(),
        render_passes: encoders.render_passes.generate_report(),
        compute_passes: encoders.compute_passes.generate_report(),
        render_bundle_encoders: encoders.render_bundle_encoders.generate_report(),
    }
}
