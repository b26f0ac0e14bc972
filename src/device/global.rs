use crate::{
    api_log,
    binding_model::{
        self, BindGroupLayout, CreateBindGroupError, CreateBindGroupLayoutError,
        CreatePipelineLayoutError, ExclusivePipeline,
    },
    device::{Device, DeviceDescriptor, DeviceError, Limits},
    error::Error,
    format::FormatCapabilities,
    global::ValidationContext,
    hub::Hub,
    id,
    pipeline::{
        self, ComputePipeline, CreateComputePipelineError, CreateRenderPipelineError,
        CreateShaderModuleError, GetBindGroupLayoutError, RenderPipeline,
    },
    resource::{
        self, CreateBufferError, CreateQuerySetError, CreateTextureError, CreateTextureViewError,
        ResourceError, ResourceInfo,
    },
    validation::ShaderReflection,
};

use std::sync::Arc;

impl Hub {
    fn create_device(&mut self, desc: &DeviceDescriptor) -> Result<id::DeviceId, DeviceError> {
        let device = Device::new(desc)?;
        Ok(self.devices.insert(device))
    }

    fn destroy_device(&mut self, device_id: id::DeviceId) -> Result<(), ResourceError> {
        let device = self.devices.get_mut(device_id)?;
        if !device.destroyed {
            log::debug!("Destroying device {:?}", device_id);
        }
        device.destroyed = true;
        Ok(())
    }

    fn create_buffer(
        &mut self,
        device_id: id::DeviceId,
        desc: &resource::BufferDescriptor,
    ) -> Result<id::BufferId, CreateBufferError> {
        let device = self.devices.get(device_id)?;
        let buffer = device.create_buffer(device_id, desc)?;
        Ok(self.buffers.insert(buffer))
    }

    fn create_texture(
        &mut self,
        device_id: id::DeviceId,
        desc: &resource::TextureDescriptor,
        formats: &dyn FormatCapabilities,
    ) -> Result<id::TextureId, CreateTextureError> {
        let device = self.devices.get(device_id)?;
        let texture = device.create_texture(device_id, desc, formats)?;
        Ok(self.textures.insert(texture))
    }

    fn create_texture_view(
        &mut self,
        texture_id: id::TextureId,
        desc: &resource::TextureViewDescriptor,
    ) -> Result<id::TextureViewId, CreateTextureViewError> {
        let texture = self.textures.get(texture_id)?;
        let device_id = texture.info.device_id(texture_id.into())?;
        let device = self.devices.get(device_id)?;
        let view = device.create_texture_view(device_id, texture_id, texture, desc)?;
        Ok(self.texture_views.insert(view))
    }

    fn create_sampler(
        &mut self,
        device_id: id::DeviceId,
        desc: &resource::SamplerDescriptor,
    ) -> Result<id::SamplerId, ResourceError> {
        let device = self.devices.get(device_id)?;
        let sampler = device.create_sampler(device_id, desc)?;
        Ok(self.samplers.insert(sampler))
    }

    fn create_query_set(
        &mut self,
        device_id: id::DeviceId,
        desc: &resource::QuerySetDescriptor,
    ) -> Result<id::QuerySetId, CreateQuerySetError> {
        let device = self.devices.get(device_id)?;
        let query_set = device.create_query_set(device_id, desc)?;
        Ok(self.query_sets.insert(query_set))
    }

    fn create_shader_module(
        &mut self,
        device_id: id::DeviceId,
        desc: &pipeline::ShaderModuleDescriptor,
        reflection: &dyn ShaderReflection,
    ) -> Result<id::ShaderModuleId, CreateShaderModuleError> {
        let device = self.devices.get(device_id)?;
        let module = device.create_shader_module(device_id, desc, reflection)?;
        Ok(self.shader_modules.insert(module))
    }

    fn create_bind_group_layout(
        &mut self,
        device_id: id::DeviceId,
        desc: &binding_model::BindGroupLayoutDescriptor,
    ) -> Result<id::BindGroupLayoutId, CreateBindGroupLayoutError> {
        let device = self.devices.get(device_id)?;
        let layout = device.create_bind_group_layout(device_id, desc)?;
        Ok(self.bind_group_layouts.insert(layout))
    }

    fn create_pipeline_layout(
        &mut self,
        device_id: id::DeviceId,
        desc: &binding_model::PipelineLayoutDescriptor,
    ) -> Result<id::PipelineLayoutId, CreatePipelineLayoutError> {
        let device = self.devices.get(device_id)?;
        let layout = device.create_pipeline_layout(device_id, self, desc)?;
        Ok(self.pipeline_layouts.insert(layout))
    }

    fn create_bind_group(
        &mut self,
        device_id: id::DeviceId,
        desc: &binding_model::BindGroupDescriptor,
    ) -> Result<id::BindGroupId, CreateBindGroupError> {
        let device = self.devices.get(device_id)?;
        let bind_group = device.create_bind_group(device_id, self, desc)?;
        Ok(self.bind_groups.insert(bind_group))
    }

    fn create_render_pipeline(
        &mut self,
        device_id: id::DeviceId,
        desc: &pipeline::RenderPipelineDescriptor,
        formats: &dyn FormatCapabilities,
    ) -> Result<id::RenderPipelineId, CreateRenderPipelineError> {
        let device = self.devices.get(device_id)?;
        let mut pipeline = device.create_render_pipeline(device_id, self, desc, formats)?;
        Ok(self.render_pipelines.insert_with(|id| {
            pipeline
                .layout
                .make_exclusive(ExclusivePipeline::Render(id));
            pipeline
        }))
    }

    fn create_compute_pipeline(
        &mut self,
        device_id: id::DeviceId,
        desc: &pipeline::ComputePipelineDescriptor,
    ) -> Result<id::ComputePipelineId, CreateComputePipelineError> {
        let device = self.devices.get(device_id)?;
        let mut pipeline = device.create_compute_pipeline(device_id, self, desc)?;
        Ok(self.compute_pipelines.insert_with(|id| {
            pipeline
                .layout
                .make_exclusive(ExclusivePipeline::Compute(id));
            pipeline
        }))
    }

    /// Register a fresh bind group layout id sharing `layout`.
    fn expose_bind_group_layout(
        &mut self,
        device_id: id::DeviceId,
        layout: &Arc<binding_model::ReifiedBindGroupLayout>,
    ) -> id::BindGroupLayoutId {
        self.bind_group_layouts.insert(BindGroupLayout {
            info: ResourceInfo::new(&None, device_id),
            inner: Arc::clone(layout),
        })
    }

    fn render_pipeline_bind_group_layout(
        &mut self,
        pipeline_id: id::RenderPipelineId,
        index: u32,
    ) -> Result<id::BindGroupLayoutId, GetBindGroupLayoutError> {
        let pipeline = self.render_pipelines.get(pipeline_id)?;
        let device_id = pipeline.info.device_id(pipeline_id.into())?;
        let layout = Arc::clone(pipeline.layout.get_bind_group_layout(index)?);
        Ok(self.expose_bind_group_layout(device_id, &layout))
    }

    fn compute_pipeline_bind_group_layout(
        &mut self,
        pipeline_id: id::ComputePipelineId,
        index: u32,
    ) -> Result<id::BindGroupLayoutId, GetBindGroupLayoutError> {
        let pipeline = self.compute_pipelines.get(pipeline_id)?;
        let device_id = pipeline.info.device_id(pipeline_id.into())?;
        let layout = Arc::clone(pipeline.layout.get_bind_group_layout(index)?);
        Ok(self.expose_bind_group_layout(device_id, &layout))
    }
}

impl ValidationContext {
    pub fn device_create(&mut self, desc: &DeviceDescriptor) -> Result<id::DeviceId, Error> {
        profiling::scope!("Device::create");
        let result = self.hub.create_device(desc);
        if let Ok(id) = result {
            api_log!("Device::create({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    /// Mark a device destroyed. Creating anything on it fails from now on.
    pub fn device_destroy(&mut self, device_id: id::DeviceId) -> Result<(), Error> {
        api_log!("Device::destroy {:?}", device_id);
        let result = self.hub.destroy_device(device_id);
        self.report(result)
    }

    pub fn device_limits(&mut self, device_id: id::DeviceId) -> Result<Limits, Error> {
        let result = self
            .hub
            .devices
            .get(device_id)
            .map(|device| device.limits.clone());
        self.report(result)
    }

    pub fn device_create_buffer(
        &mut self,
        device_id: id::DeviceId,
        desc: &resource::BufferDescriptor,
    ) -> Result<id::BufferId, Error> {
        profiling::scope!("Device::create_buffer");
        let result = self.hub.create_buffer(device_id, desc);
        if let Ok(id) = result {
            api_log!(
                "Device::create_buffer({:?}{}) -> {:?}",
                desc.label.as_deref().unwrap_or(""),
                if desc.mapped_at_creation {
                    ", mapped_at_creation"
                } else {
                    ""
                },
                id
            );
        }
        self.report(result)
    }

    pub fn buffer_destroy(&mut self, buffer_id: id::BufferId) -> Result<(), Error> {
        api_log!("Buffer::destroy {:?}", buffer_id);
        let result = self.hub.buffers.mark_destroyed(buffer_id);
        self.report(result)
    }

    pub fn device_create_texture(
        &mut self,
        device_id: id::DeviceId,
        desc: &resource::TextureDescriptor,
    ) -> Result<id::TextureId, Error> {
        profiling::scope!("Device::create_texture");
        let result = self.hub.create_texture(device_id, desc, &*self.formats);
        if let Ok(id) = result {
            api_log!("Device::create_texture({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    pub fn texture_destroy(&mut self, texture_id: id::TextureId) -> Result<(), Error> {
        api_log!("Texture::destroy {:?}", texture_id);
        let result = self.hub.textures.mark_destroyed(texture_id);
        self.report(result)
    }

    pub fn texture_create_view(
        &mut self,
        texture_id: id::TextureId,
        desc: &resource::TextureViewDescriptor,
    ) -> Result<id::TextureViewId, Error> {
        profiling::scope!("Texture::create_view");
        let result = self.hub.create_texture_view(texture_id, desc);
        if let Ok(id) = result {
            api_log!(
                "Texture::create_view({:?}, {:?}) -> {:?}",
                texture_id,
                desc.label,
                id
            );
        }
        self.report(result)
    }

    pub fn device_create_sampler(
        &mut self,
        device_id: id::DeviceId,
        desc: &resource::SamplerDescriptor,
    ) -> Result<id::SamplerId, Error> {
        let result = self.hub.create_sampler(device_id, desc);
        if let Ok(id) = result {
            api_log!("Device::create_sampler({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    pub fn device_create_query_set(
        &mut self,
        device_id: id::DeviceId,
        desc: &resource::QuerySetDescriptor,
    ) -> Result<id::QuerySetId, Error> {
        let result = self.hub.create_query_set(device_id, desc);
        if let Ok(id) = result {
            api_log!("Device::create_query_set({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    pub fn query_set_destroy(&mut self, query_set_id: id::QuerySetId) -> Result<(), Error> {
        api_log!("QuerySet::destroy {:?}", query_set_id);
        let result = self.hub.query_sets.mark_destroyed(query_set_id);
        self.report(result)
    }

    /// Record a shader module, running the reflection collaborator over its
    /// source. A module the collaborator cannot see into is kept as opaque:
    /// pipelines using it skip interface checks.
    pub fn device_create_shader_module(
        &mut self,
        device_id: id::DeviceId,
        desc: &pipeline::ShaderModuleDescriptor,
    ) -> Result<id::ShaderModuleId, Error> {
        profiling::scope!("Device::create_shader_module");
        let result = self
            .hub
            .create_shader_module(device_id, desc, &*self.reflection);
        if let Ok(id) = result {
            api_log!("Device::create_shader_module({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    pub fn device_create_bind_group_layout(
        &mut self,
        device_id: id::DeviceId,
        desc: &binding_model::BindGroupLayoutDescriptor,
    ) -> Result<id::BindGroupLayoutId, Error> {
        profiling::scope!("Device::create_bind_group_layout");
        let result = self.hub.create_bind_group_layout(device_id, desc);
        if let Ok(id) = result {
            api_log!(
                "Device::create_bind_group_layout({:?}) -> {:?}",
                desc.label,
                id
            );
        }
        self.report(result)
    }

    pub fn device_create_pipeline_layout(
        &mut self,
        device_id: id::DeviceId,
        desc: &binding_model::PipelineLayoutDescriptor,
    ) -> Result<id::PipelineLayoutId, Error> {
        profiling::scope!("Device::create_pipeline_layout");
        let result = self.hub.create_pipeline_layout(device_id, desc);
        if let Ok(id) = result {
            api_log!("Device::create_pipeline_layout({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    pub fn device_create_bind_group(
        &mut self,
        device_id: id::DeviceId,
        desc: &binding_model::BindGroupDescriptor,
    ) -> Result<id::BindGroupId, Error> {
        profiling::scope!("Device::create_bind_group");
        let result = self.hub.create_bind_group(device_id, desc);
        if let Ok(id) = result {
            api_log!("Device::create_bind_group({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    pub fn device_create_render_pipeline(
        &mut self,
        device_id: id::DeviceId,
        desc: &pipeline::RenderPipelineDescriptor,
    ) -> Result<id::RenderPipelineId, Error> {
        profiling::scope!("Device::create_render_pipeline");
        let result = self
            .hub
            .create_render_pipeline(device_id, desc, &*self.formats);
        if let Ok(id) = result {
            api_log!("Device::create_render_pipeline({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    pub fn device_create_compute_pipeline(
        &mut self,
        device_id: id::DeviceId,
        desc: &pipeline::ComputePipelineDescriptor,
    ) -> Result<id::ComputePipelineId, Error> {
        profiling::scope!("Device::create_compute_pipeline");
        let result = self.hub.create_compute_pipeline(device_id, desc);
        if let Ok(id) = result {
            api_log!("Device::create_compute_pipeline({:?}) -> {:?}", desc.label, id);
        }
        self.report(result)
    }

    /// Get the layout of bind group `index` of a render pipeline.
    ///
    /// Every call returns a new id, but all of them share one layout: bind
    /// groups created from any of them are interchangeable.
    pub fn render_pipeline_get_bind_group_layout(
        &mut self,
        pipeline_id: id::RenderPipelineId,
        index: u32,
    ) -> Result<id::BindGroupLayoutId, Error> {
        let result = self
            .hub
            .render_pipeline_bind_group_layout(pipeline_id, index);
        if let Ok(id) = result {
            api_log!(
                "RenderPipeline::get_bind_group_layout({:?}, {}) -> {:?}",
                pipeline_id,
                index,
                id
            );
        }
        self.report(result)
    }

    /// See [`Self::render_pipeline_get_bind_group_layout`].
    pub fn compute_pipeline_get_bind_group_layout(
        &mut self,
        pipeline_id: id::ComputePipelineId,
        index: u32,
    ) -> Result<id::BindGroupLayoutId, Error> {
        let result = self
            .hub
            .compute_pipeline_bind_group_layout(pipeline_id, index);
        if let Ok(id) = result {
            api_log!(
                "ComputePipeline::get_bind_group_layout({:?}, {}) -> {:?}",
                pipeline_id,
                index,
                id
            );
        }
        self.report(result)
    }

    // Read-back accessors. These are not validated calls and do not go
    // through the error sink.

    pub fn bind_group_layout_entries(
        &self,
        layout_id: id::BindGroupLayoutId,
    ) -> Result<&[wgt::BindGroupLayoutEntry], Error> {
        let layout = self.hub.bind_group_layouts.get(layout_id)?;
        Ok(layout.inner.entries())
    }

    pub fn bind_group_entries(
        &self,
        bind_group_id: id::BindGroupId,
    ) -> Result<&[binding_model::BoundEntry], Error> {
        let bind_group = self.hub.bind_groups.get(bind_group_id)?;
        Ok(bind_group.entries())
    }

    pub fn render_pipeline_descriptor(
        &self,
        pipeline_id: id::RenderPipelineId,
    ) -> Result<&RenderPipeline, Error> {
        Ok(self.hub.render_pipelines.get(pipeline_id)?)
    }

    pub fn compute_pipeline_descriptor(
        &self,
        pipeline_id: id::ComputePipelineId,
    ) -> Result<&ComputePipeline, Error> {
        Ok(self.hub.compute_pipelines.get(pipeline_id)?)
    }
}
