use crate::{
    api_log,
    error::{Error, ErrorSink, LogSink},
    format::{FormatCapabilities, StaticFormatTable},
    hub::{self, Encoders, Hub, HubReport},
    id,
    resource_log,
    validation::{NoReflection, ShaderReflection},
};

use std::fmt;

/// Owner of every shadow record, and the entry point for every intercepted
/// call.
///
/// Methods are named after the call they shadow (`device_create_buffer`,
/// `render_pass_draw`, ...). Each one validates the call completely before
/// touching any shadow state, so a failed call leaves the context exactly as
/// it was. Every failure is handed to the configured [`ErrorSink`] before it
/// is returned.
pub struct ValidationContext {
    pub(crate) hub: Hub,
    pub(crate) encoders: Encoders,
    pub(crate) formats: Box<dyn FormatCapabilities>,
    pub(crate) reflection: Box<dyn ShaderReflection>,
    sink: Box<dyn ErrorSink>,
}

impl ValidationContext {
    pub fn new() -> Self {
        profiling::scope!("ValidationContext::new");
        Self {
            hub: Hub::new(),
            encoders: Encoders::new(),
            formats: Box::new(StaticFormatTable),
            reflection: Box::new(NoReflection),
            sink: Box::new(LogSink),
        }
    }

    /// Replace the table consulted for per-format capabilities.
    pub fn with_format_capabilities(mut self, formats: impl FormatCapabilities + 'static) -> Self {
        self.formats = Box::new(formats);
        self
    }

    /// Replace the shader introspection collaborator.
    pub fn with_shader_reflection(mut self, reflection: impl ShaderReflection + 'static) -> Self {
        self.reflection = Box::new(reflection);
        self
    }

    /// Replace where failures are reported.
    pub fn with_error_sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn generate_report(&self) -> HubReport {
        hub::generate_report(&self.hub, &self.encoders)
    }

    /// Route a failed call through the sink.
    pub(crate) fn report<T, E: Into<Error>>(&mut self, result: Result<T, E>) -> Result<T, Error> {
        result.map_err(|e| {
            let error = e.into();
            log::warn!("Validation failed: {}", error);
            self.sink.report(&error);
            error
        })
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("hub", &self.hub)
            .field("encoders", &self.encoders)
            .finish_non_exhaustive()
    }
}

/// Defines the `*_drop` method for a kind of shadow record.
///
/// The host calls these once the real object is gone. Dropping an id that
/// no longer resolves only logs.
macro_rules! define_drop {
    ($($(#[$meta:meta])* $name:ident($field:ident.$storage:ident, $id:ty)),* $(,)?) => {
        impl ValidationContext {
            $(
                $(#[$meta])*
                pub fn $name(&mut self, id: $id) {
                    profiling::scope!(stringify!($name));
                    api_log!("{}({:?})", stringify!($name), id);
                    let storage = &mut self.$field.$storage;
                    match storage.remove(id) {
                        Some(_) => resource_log!("Removed {} {:?}", storage.kind(), id),
                        None => log::warn!("{} {:?} dropped while not alive", storage.kind(), id),
                    }
                }
            )*
        }
    };
}

define_drop!(
    /// Forget a device. Records created from it stay until they are dropped.
    device_drop(hub.devices, id::DeviceId),
    shader_module_drop(hub.shader_modules, id::ShaderModuleId),
    bind_group_layout_drop(hub.bind_group_layouts, id::BindGroupLayoutId),
    pipeline_layout_drop(hub.pipeline_layouts, id::PipelineLayoutId),
    bind_group_drop(hub.bind_groups, id::BindGroupId),
    render_pipeline_drop(hub.render_pipelines, id::RenderPipelineId),
    compute_pipeline_drop(hub.compute_pipelines, id::ComputePipelineId),
    render_bundle_drop(hub.render_bundles, id::RenderBundleId),
    buffer_drop(hub.buffers, id::BufferId),
    texture_drop(hub.textures, id::TextureId),
    texture_view_drop(hub.texture_views, id::TextureViewId),
    sampler_drop(hub.samplers, id::SamplerId),
    query_set_drop(hub.query_sets, id::QuerySetId),
    command_encoder_drop(encoders.command_encoders, id::CommandEncoderId),
    /// Forget a render pass. An open pass leaves its command encoder locked.
    render_pass_drop(encoders.render_passes, id::RenderPassEncoderId),
    /// Forget a compute pass. An open pass leaves its command encoder locked.
    compute_pass_drop(encoders.compute_passes, id::ComputePassEncoderId),
    render_bundle_encoder_drop(encoders.render_bundle_encoders, id::RenderBundleEncoderId),
);
