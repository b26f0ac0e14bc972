use crate::{
    binding_model::{
        buffer_binding_type_alignment, BindGroup, BindGroupDescriptor,
        BindGroupDynamicBindingData, BindGroupLayout, BindGroupLayoutDescriptor, BindingResource,
        BoundEntry, BoundResource, BufferBinding, CreateBindGroupError,
        CreateBindGroupLayoutError, CreatePipelineLayoutError, ExclusivePipeline, PipelineLayout,
        PipelineLayoutDescriptor, ReifiedBindGroupLayout,
    },
    command::{self, ColorAttachmentError},
    device::{Device, RenderPassContext},
    format::FormatCapabilities,
    hub::Hub,
    id::{DeviceId, PipelineLayoutId, TextureId},
    pipeline::{
        ColorStateError, ComputePipeline, ComputePipelineDescriptor, CreateComputePipelineError,
        CreateRenderPipelineError, CreateShaderModuleError, DepthStencilStateError,
        ImplicitLayoutError, PipelineFlags, ProgrammableStageDescriptor, ReifiedVertexBuffer,
        RenderPipeline, RenderPipelineDescriptor, ResolvedLayout, ShaderModule,
        ShaderModuleDescriptor,
    },
    resource::{
        self, Buffer, CreateBufferError, CreateQuerySetError, CreateTextureError,
        CreateTextureViewError, QuerySet, ResourceError, ResourceInfo, Sampler, Texture,
        TextureView, QUERY_SET_MAX_QUERIES,
    },
    validation::{self, check_buffer_usage, EntryPoint, ShaderReflection, StageError},
    FastHashSet,
};

use arrayvec::ArrayVec;
use std::sync::Arc;
use wgt::{
    BufferUsages, ShaderStages, TextureDimension, TextureFormat, TextureUsages,
    TextureViewDimension,
};

/// Formats that differ only in sRGB-ness may be reinterpreted as each other.
fn base_format(formats: &dyn FormatCapabilities, format: TextureFormat) -> TextureFormat {
    formats
        .info(format)
        .and_then(|info| info.base_format)
        .unwrap_or(format)
}

impl Device {
    pub(crate) fn create_buffer(
        &self,
        self_id: DeviceId,
        desc: &resource::BufferDescriptor,
    ) -> Result<Buffer, CreateBufferError> {
        self.check_is_valid(self_id)?;

        if desc.usage.is_empty() {
            return Err(CreateBufferError::EmptyUsage);
        }
        let write_mismatch = desc.usage.contains(BufferUsages::MAP_WRITE)
            && !(BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC).contains(desc.usage);
        let read_mismatch = desc.usage.contains(BufferUsages::MAP_READ)
            && !(BufferUsages::MAP_READ | BufferUsages::COPY_DST).contains(desc.usage);
        if write_mismatch || read_mismatch {
            return Err(CreateBufferError::UsageMismatch(desc.usage));
        }
        if desc.mapped_at_creation && desc.size % wgt::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(CreateBufferError::UnalignedSize);
        }

        Ok(Buffer {
            info: ResourceInfo::new(&desc.label, self_id),
            size: desc.size,
            usage: desc.usage,
        })
    }

    pub(crate) fn create_texture(
        &self,
        self_id: DeviceId,
        desc: &resource::TextureDescriptor,
        formats: &dyn FormatCapabilities,
    ) -> Result<Texture, CreateTextureError> {
        self.check_is_valid(self_id)?;

        let size = desc.size;
        if size.width == 0 || size.height == 0 || size.depth_or_array_layers == 0 {
            return Err(CreateTextureError::ZeroSize(size));
        }
        if desc.usage.is_empty() {
            return Err(CreateTextureError::EmptyUsage);
        }

        let mips = resource::max_mips(desc.dimension, &size);
        if desc.mip_level_count == 0 || desc.mip_level_count > mips {
            return Err(CreateTextureError::InvalidMipLevelCount {
                requested: desc.mip_level_count,
                maximum: mips,
            });
        }

        match desc.sample_count {
            1 => {}
            4 => {
                let multisample = formats
                    .info(desc.format)
                    .map_or(false, |info| info.multisample);
                if !multisample {
                    return Err(CreateTextureError::InvalidSampleCount(
                        desc.sample_count,
                        desc.format,
                    ));
                }
                if desc.dimension != TextureDimension::D2
                    || desc.mip_level_count != 1
                    || size.depth_or_array_layers != 1
                {
                    return Err(CreateTextureError::InvalidMultisampledTexture);
                }
            }
            other => return Err(CreateTextureError::InvalidSampleCount(other, desc.format)),
        }

        let texture_base = base_format(formats, desc.format);
        for &view in desc.view_formats.iter() {
            if base_format(formats, view) != texture_base {
                return Err(CreateTextureError::InvalidViewFormat {
                    view,
                    texture: desc.format,
                });
            }
        }

        Ok(Texture {
            info: ResourceInfo::new(&desc.label, self_id),
            size,
            mip_level_count: desc.mip_level_count,
            sample_count: desc.sample_count,
            dimension: desc.dimension,
            format: desc.format,
            usage: desc.usage,
            view_formats: desc.view_formats.clone(),
        })
    }

    pub(crate) fn create_texture_view(
        &self,
        self_id: DeviceId,
        texture_id: TextureId,
        texture: &Texture,
        desc: &resource::TextureViewDescriptor,
    ) -> Result<TextureView, CreateTextureViewError> {
        self.check_is_valid(self_id)?;
        texture.info.check_not_destroyed(texture_id.into())?;

        let format = desc.format.unwrap_or(texture.format);
        if format != texture.format && !texture.view_formats.contains(&format) {
            return Err(CreateTextureViewError::FormatReinterpretation {
                texture: texture.format,
                view: format,
            });
        }

        let total_layers = texture.array_layer_count();
        let dimension = desc.dimension.unwrap_or(match texture.dimension {
            TextureDimension::D1 => TextureViewDimension::D1,
            TextureDimension::D2 if total_layers == 1 => TextureViewDimension::D2,
            TextureDimension::D2 => TextureViewDimension::D2Array,
            TextureDimension::D3 => TextureViewDimension::D3,
        });
        let expected_texture_dimension = match dimension {
            TextureViewDimension::D1 => TextureDimension::D1,
            TextureViewDimension::D3 => TextureDimension::D3,
            _ => TextureDimension::D2,
        };
        if expected_texture_dimension != texture.dimension {
            return Err(CreateTextureViewError::InvalidDimension {
                view: dimension,
                texture: texture.dimension,
            });
        }

        let mip_count = desc
            .mip_level_count
            .unwrap_or_else(|| texture.mip_level_count.saturating_sub(desc.base_mip_level));
        let mip_end = desc.base_mip_level.checked_add(mip_count);
        if mip_count == 0 || mip_end.map_or(true, |end| end > texture.mip_level_count) {
            return Err(CreateTextureViewError::InvalidMipRange {
                base: desc.base_mip_level,
                count: mip_count,
                total: texture.mip_level_count,
            });
        }

        let layer_count = desc.array_layer_count.unwrap_or(match dimension {
            TextureViewDimension::Cube => 6,
            TextureViewDimension::D2Array | TextureViewDimension::CubeArray => {
                total_layers.saturating_sub(desc.base_array_layer)
            }
            _ => 1,
        });
        let layer_end = desc.base_array_layer.checked_add(layer_count);
        if layer_count == 0 || layer_end.map_or(true, |end| end > total_layers) {
            return Err(CreateTextureViewError::InvalidArrayLayerRange {
                base: desc.base_array_layer,
                count: layer_count,
                total: total_layers,
            });
        }
        match dimension {
            TextureViewDimension::D1 | TextureViewDimension::D2 | TextureViewDimension::D3
                if layer_count != 1 =>
            {
                return Err(CreateTextureViewError::InvalidArrayLayerRange {
                    base: desc.base_array_layer,
                    count: layer_count,
                    total: total_layers,
                });
            }
            TextureViewDimension::Cube if layer_count != 6 => {
                return Err(CreateTextureViewError::InvalidCubeLayerCount(layer_count));
            }
            TextureViewDimension::CubeArray if layer_count % 6 != 0 => {
                return Err(CreateTextureViewError::InvalidCubeLayerCount(layer_count));
            }
            _ => {}
        }

        let mut extent = texture.mip_level_size(desc.base_mip_level);
        if texture.dimension != TextureDimension::D3 {
            extent.depth_or_array_layers = layer_count;
        }

        Ok(TextureView {
            info: ResourceInfo::new(&desc.label, self_id),
            parent: texture_id,
            format,
            dimension,
            mips: desc.base_mip_level..desc.base_mip_level + mip_count,
            layers: desc.base_array_layer..desc.base_array_layer + layer_count,
            extent,
            samples: texture.sample_count,
        })
    }

    pub(crate) fn create_sampler(
        &self,
        self_id: DeviceId,
        desc: &resource::SamplerDescriptor,
    ) -> Result<Sampler, ResourceError> {
        self.check_is_valid(self_id)?;

        let filtering = [desc.mag_filter, desc.min_filter, desc.mipmap_filter]
            .iter()
            .any(|&filter| filter == wgt::FilterMode::Linear);
        Ok(Sampler {
            info: ResourceInfo::new(&desc.label, self_id),
            comparison: desc.compare.is_some(),
            filtering,
        })
    }

    pub(crate) fn create_query_set(
        &self,
        self_id: DeviceId,
        desc: &resource::QuerySetDescriptor,
    ) -> Result<QuerySet, CreateQuerySetError> {
        self.check_is_valid(self_id)?;

        if desc.count == 0 || desc.count > QUERY_SET_MAX_QUERIES {
            return Err(CreateQuerySetError::InvalidCount {
                count: desc.count,
                maximum: QUERY_SET_MAX_QUERIES,
            });
        }

        Ok(QuerySet {
            info: ResourceInfo::new(&desc.label, self_id),
            ty: desc.ty,
            count: desc.count,
        })
    }
}

fn sampler_description(sampler: &Sampler) -> &'static str {
    if sampler.comparison {
        "a comparison sampler"
    } else if sampler.filtering {
        "a filtering sampler"
    } else {
        "a non-filtering sampler"
    }
}

fn binding_resource_name(resource: &BindingResource) -> &'static str {
    match *resource {
        BindingResource::Buffer(_) => "buffer",
        BindingResource::Sampler(_) => "sampler",
        BindingResource::TextureView(_) => "texture view",
    }
}

fn binding_type_name(ty: &wgt::BindingType) -> &'static str {
    match *ty {
        wgt::BindingType::Buffer { .. } => "buffer",
        wgt::BindingType::Sampler(_) => "sampler",
        wgt::BindingType::Texture { .. } => "sampled texture",
        wgt::BindingType::StorageTexture { .. } => "storage texture",
        _ => "binding",
    }
}

impl Device {
    pub(crate) fn create_bind_group_layout(
        &self,
        self_id: DeviceId,
        desc: &BindGroupLayoutDescriptor,
    ) -> Result<BindGroupLayout, CreateBindGroupLayoutError> {
        self.check_is_valid(self_id)?;
        let inner = ReifiedBindGroupLayout::new(&desc.entries, ExclusivePipeline::None)?;
        Ok(BindGroupLayout {
            info: ResourceInfo::new(&desc.label, self_id),
            inner: Arc::new(inner),
        })
    }

    pub(crate) fn create_pipeline_layout(
        &self,
        self_id: DeviceId,
        hub: &Hub,
        desc: &PipelineLayoutDescriptor,
    ) -> Result<PipelineLayout, CreatePipelineLayoutError> {
        self.check_is_valid(self_id)?;

        let max = self.limits.max_bind_groups as usize;
        if desc.bind_group_layouts.len() > max {
            return Err(CreatePipelineLayoutError::TooManyGroups {
                actual: desc.bind_group_layouts.len(),
                max,
            });
        }

        let mut bind_group_layouts = ArrayVec::new();
        for &id in desc.bind_group_layouts.iter() {
            let layout = hub.bind_group_layouts.get_on_device(id, self_id)?;
            bind_group_layouts.push(Arc::clone(&layout.inner));
        }

        Ok(PipelineLayout {
            info: ResourceInfo::new(&desc.label, self_id),
            bind_group_layouts,
        })
    }

    fn create_buffer_binding(
        &self,
        self_id: DeviceId,
        hub: &Hub,
        binding: u32,
        bb: &BufferBinding,
        ty: wgt::BufferBindingType,
        has_dynamic_offset: bool,
        min_binding_size: Option<wgt::BufferSize>,
        dynamic_binding_info: &mut Vec<BindGroupDynamicBindingData>,
    ) -> Result<BoundResource, CreateBindGroupError> {
        let buffer = hub.buffers.get_usable(bb.buffer_id, self_id)?;
        let required_usage = match ty {
            wgt::BufferBindingType::Uniform => BufferUsages::UNIFORM,
            wgt::BufferBindingType::Storage { .. } => BufferUsages::STORAGE,
        };
        check_buffer_usage(bb.buffer_id, buffer.usage, required_usage)?;

        let (alignment, limit_name) = buffer_binding_type_alignment(&self.limits, ty);
        if bb.offset % alignment as u64 != 0 {
            return Err(CreateBindGroupError::UnalignedBufferOffset {
                binding,
                offset: bb.offset,
                alignment,
                limit_name,
            });
        }

        let end = match bb.size {
            Some(size) => bb.offset.checked_add(size.get()),
            None => Some(buffer.size),
        };
        let end = match end {
            Some(end) if end <= buffer.size && bb.offset <= end => end,
            _ => {
                return Err(CreateBindGroupError::BindingRangeTooLarge {
                    binding,
                    buffer: bb.buffer_id,
                    offset: bb.offset,
                    end: end.unwrap_or(u64::MAX),
                    size: buffer.size,
                })
            }
        };
        let bind_size = end - bb.offset;
        if bind_size == 0 {
            return Err(CreateBindGroupError::BindingZeroSize(binding));
        }
        if let Some(min) = min_binding_size {
            if bind_size < min.get() {
                return Err(CreateBindGroupError::BindingSizeTooSmall {
                    binding,
                    actual: bind_size,
                    min: min.get(),
                });
            }
        }

        if has_dynamic_offset {
            dynamic_binding_info.push(BindGroupDynamicBindingData {
                binding_idx: binding,
                buffer_id: bb.buffer_id,
                binding_range: bb.offset..end,
                maximum_dynamic_offset: buffer.size - end,
                binding_type: ty,
            });
        }

        Ok(BoundResource::Buffer {
            id: bb.buffer_id,
            range: bb.offset..end,
        })
    }

    pub(crate) fn create_bind_group(
        &self,
        self_id: DeviceId,
        hub: &Hub,
        desc: &BindGroupDescriptor,
    ) -> Result<BindGroup, CreateBindGroupError> {
        use wgt::BindingType as Bt;

        self.check_is_valid(self_id)?;
        let layout = hub.bind_group_layouts.get_on_device(desc.layout, self_id)?;
        let reified = &layout.inner;

        if desc.entries.len() != reified.entries.len() {
            return Err(CreateBindGroupError::BindingsNumMismatch {
                expected: reified.entries.len(),
                actual: desc.entries.len(),
            });
        }

        let mut used_bindings = FastHashSet::default();
        let mut entries = Vec::with_capacity(desc.entries.len());
        let mut dynamic_binding_info = Vec::new();

        for entry in desc.entries.iter() {
            let binding = entry.binding;
            if !used_bindings.insert(binding) {
                return Err(CreateBindGroupError::DuplicateBinding(binding));
            }
            let decl = reified
                .entry(binding)
                .ok_or(CreateBindGroupError::MissingBindingDeclaration(binding))?;

            let resource = match (&entry.resource, decl.ty) {
                (
                    &BindingResource::Buffer(ref bb),
                    Bt::Buffer {
                        ty,
                        has_dynamic_offset,
                        min_binding_size,
                    },
                ) => self.create_buffer_binding(
                    self_id,
                    hub,
                    binding,
                    bb,
                    ty,
                    has_dynamic_offset,
                    min_binding_size,
                    &mut dynamic_binding_info,
                )?,
                (&BindingResource::Sampler(id), Bt::Sampler(ty)) => {
                    let sampler = hub.samplers.get_on_device(id, self_id)?;
                    let matches = match ty {
                        wgt::SamplerBindingType::Filtering => !sampler.comparison,
                        wgt::SamplerBindingType::NonFiltering => {
                            !sampler.comparison && !sampler.filtering
                        }
                        wgt::SamplerBindingType::Comparison => sampler.comparison,
                    };
                    if !matches {
                        return Err(CreateBindGroupError::WrongSamplerType {
                            binding,
                            sampler: sampler_description(sampler),
                            expected: ty,
                        });
                    }
                    BoundResource::Sampler(id)
                }
                (&BindingResource::TextureView(id), Bt::Texture { multisampled, .. }) => {
                    let view = hub.texture_views.get_on_device(id, self_id)?;
                    let texture = hub.textures.get_usable(view.parent, self_id)?;
                    if !texture.usage.contains(TextureUsages::TEXTURE_BINDING) {
                        return Err(CreateBindGroupError::MissingTextureUsage {
                            binding,
                            view: id,
                            expected: TextureUsages::TEXTURE_BINDING,
                        });
                    }
                    if multisampled != (view.samples > 1) {
                        return Err(CreateBindGroupError::InvalidTextureMultisample {
                            binding,
                            samples: view.samples,
                            expected: if multisampled {
                                "a multisampled view"
                            } else {
                                "a single sampled view"
                            },
                        });
                    }
                    BoundResource::TextureView {
                        id,
                        texture: view.parent,
                    }
                }
                (&BindingResource::TextureView(id), Bt::StorageTexture { .. }) => {
                    let view = hub.texture_views.get_on_device(id, self_id)?;
                    let texture = hub.textures.get_usable(view.parent, self_id)?;
                    if !texture.usage.contains(TextureUsages::STORAGE_BINDING) {
                        return Err(CreateBindGroupError::MissingTextureUsage {
                            binding,
                            view: id,
                            expected: TextureUsages::STORAGE_BINDING,
                        });
                    }
                    BoundResource::TextureView {
                        id,
                        texture: view.parent,
                    }
                }
                (resource, ref ty) => {
                    return Err(CreateBindGroupError::WrongBindingType {
                        binding,
                        actual: binding_resource_name(resource),
                        expected: binding_type_name(ty),
                    })
                }
            };
            entries.push(BoundEntry { binding, resource });
        }

        entries.sort_by_key(|entry| entry.binding);
        dynamic_binding_info.sort_by_key(|info| info.binding_idx);

        Ok(BindGroup {
            info: ResourceInfo::new(&desc.label, self_id),
            layout: Arc::clone(reified),
            entries,
            dynamic_binding_info,
        })
    }

    pub(crate) fn create_shader_module(
        &self,
        self_id: DeviceId,
        desc: &ShaderModuleDescriptor,
        reflection: &dyn ShaderReflection,
    ) -> Result<ShaderModule, CreateShaderModuleError> {
        self.check_is_valid(self_id)?;
        let definitions = reflection
            .definitions_from_source(&desc.code)
            .map_err(CreateShaderModuleError::Parsing)?;
        Ok(ShaderModule {
            info: ResourceInfo::new(&desc.label, self_id),
            definitions,
        })
    }

    /// Find the entry point a stage uses. `Ok(None)` for opaque modules.
    fn stage_entry_point<'h>(
        &self,
        self_id: DeviceId,
        hub: &'h Hub,
        stage: &ProgrammableStageDescriptor,
        stage_bit: ShaderStages,
    ) -> Result<Option<&'h EntryPoint>, StageOrResourceError> {
        let module = hub.shader_modules.get_on_device(stage.module, self_id)?;
        match module.definitions {
            None => Ok(None),
            Some(ref definitions) => definitions
                .entry_point(&stage.entry_point, stage_bit)
                .map(Some)
                .ok_or_else(|| {
                    StageOrResourceError::Stage(StageError::MissingEntryPoint {
                        name: stage.entry_point.to_string(),
                        stage: stage_bit,
                    })
                }),
        }
    }

    /// Resolve the layout of a pipeline: either the explicit one, checked
    /// against the shader interface, or one derived from the shaders.
    fn resolve_pipeline_layout(
        &self,
        self_id: DeviceId,
        hub: &Hub,
        layout: Option<PipelineLayoutId>,
        stages: &[(ShaderStages, Option<&EntryPoint>)],
    ) -> Result<ResolvedLayout, PipelineLayoutResolveError> {
        match layout {
            Some(layout_id) => {
                let layout = hub.pipeline_layouts.get_on_device(layout_id, self_id)?;
                for &(stage, entry_point) in stages {
                    if let Some(entry_point) = entry_point {
                        validation::check_stage_interface(
                            &layout.bind_group_layouts,
                            stage,
                            entry_point,
                        )
                        .map_err(|error| PipelineLayoutResolveError::Stage { stage, error })?;
                    }
                }
                Ok(ResolvedLayout::explicit(&layout.bind_group_layouts))
            }
            None => {
                let reflected: Vec<_> = stages
                    .iter()
                    .filter_map(|&(stage, entry_point)| entry_point.map(|ep| (stage, ep)))
                    .collect();
                let groups =
                    validation::derive_bind_group_layouts(&reflected, self.limits.max_bind_groups)
                        .map_err(|error| PipelineLayoutResolveError::Stage {
                            stage: reflected
                                .iter()
                                .fold(ShaderStages::empty(), |acc, &(stage, _)| acc | stage),
                            error,
                        })?;
                ResolvedLayout::derived(&groups)
                    .map_err(|e| PipelineLayoutResolveError::Implicit(e.into()))
            }
        }
    }

    pub(crate) fn create_render_pipeline(
        &self,
        self_id: DeviceId,
        hub: &Hub,
        desc: &RenderPipelineDescriptor,
        formats: &dyn FormatCapabilities,
    ) -> Result<RenderPipeline, CreateRenderPipelineError> {
        use CreateRenderPipelineError as Error;

        self.check_is_valid(self_id)?;

        let vertex_buffer_count = desc.vertex.buffers.len() as u32;
        if vertex_buffer_count > self.limits.max_vertex_buffers {
            return Err(Error::TooManyVertexBuffers {
                given: vertex_buffer_count,
                limit: self.limits.max_vertex_buffers,
            });
        }
        let mut shader_locations = FastHashSet::default();
        let mut vertex_buffers = Vec::with_capacity(desc.vertex.buffers.len());
        for (index, vb) in desc.vertex.buffers.iter().enumerate() {
            let vb = match *vb {
                Some(ref vb) => vb,
                None => {
                    vertex_buffers.push(None);
                    continue;
                }
            };
            if vb.array_stride % wgt::VERTEX_STRIDE_ALIGNMENT != 0 {
                return Err(Error::UnalignedVertexStride {
                    index: index as u32,
                    stride: vb.array_stride,
                });
            }
            for attribute in vb.attributes.iter() {
                let size = attribute.format.size();
                let misaligned = attribute.offset % size.min(4) != 0;
                let overruns = vb.array_stride != 0 && attribute.offset + size > vb.array_stride;
                if misaligned || overruns {
                    return Err(Error::InvalidVertexAttributeOffset {
                        location: attribute.shader_location,
                        offset: attribute.offset,
                    });
                }
                if !shader_locations.insert(attribute.shader_location) {
                    return Err(Error::ShaderLocationClash(attribute.shader_location));
                }
            }
            vertex_buffers.push(Some(ReifiedVertexBuffer::new(vb)));
        }

        if desc.primitive.strip_index_format.is_some() && !desc.primitive.topology.is_strip() {
            return Err(Error::StripIndexFormatForNonStripTopology {
                strip_index_format: desc.primitive.strip_index_format,
                topology: desc.primitive.topology,
            });
        }

        let sample_count = desc.multisample.count;
        if sample_count != 1 && sample_count != 4 {
            return Err(Error::InvalidSampleCount(sample_count));
        }

        let targets: Vec<Option<wgt::ColorTargetState>> = desc
            .fragment
            .as_ref()
            .map_or_else(Vec::new, |fragment| fragment.targets.to_vec());
        if targets.len() > self.limits.max_color_attachments as usize {
            return Err(ColorAttachmentError::TooMany {
                given: targets.len(),
                limit: self.limits.max_color_attachments as usize,
            }
            .into());
        }
        let mut flags = PipelineFlags::empty();
        for (index, target) in targets.iter().enumerate() {
            let target = match *target {
                Some(ref target) => target,
                None => continue,
            };
            let render = formats
                .info(target.format)
                .and_then(|info| info.color_render)
                .ok_or(Error::ColorState(
                    index as u8,
                    ColorStateError::FormatNotRenderable(target.format),
                ))?;
            if let Some(blend) = target.blend {
                if !render.blend {
                    return Err(Error::ColorState(
                        index as u8,
                        ColorStateError::FormatNotBlendable(target.format),
                    ));
                }
                let uses_constant = [
                    blend.color.src_factor,
                    blend.color.dst_factor,
                    blend.alpha.src_factor,
                    blend.alpha.dst_factor,
                ]
                .iter()
                .any(|&factor| {
                    factor == wgt::BlendFactor::Constant
                        || factor == wgt::BlendFactor::OneMinusConstant
                });
                if uses_constant {
                    flags |= PipelineFlags::BLEND_CONSTANT;
                }
            }
        }
        command::validate_color_attachment_bytes_per_sample(
            targets.iter().map(|target| target.as_ref().map(|t| t.format)),
            self.limits.max_color_attachment_bytes_per_sample,
            formats,
        )?;

        if let Some(ref ds) = desc.depth_stencil {
            let info = formats
                .info(ds.format)
                .filter(|info| info.is_depth_stencil())
                .ok_or(DepthStencilStateError::FormatNotRenderable(ds.format))?;
            if ds.is_depth_enabled() && info.depth.is_none() {
                return Err(DepthStencilStateError::FormatNotDepth(ds.format).into());
            }
            if ds.stencil.is_enabled() && info.stencil.is_none() {
                return Err(DepthStencilStateError::FormatNotStencil(ds.format).into());
            }
            if ds.depth_write_enabled {
                flags |= PipelineFlags::WRITES_DEPTH;
            }
            if !ds.stencil.is_read_only(desc.primitive.cull_mode) {
                flags |= PipelineFlags::WRITES_STENCIL;
            }
            if ds.stencil.needs_ref_value() {
                flags |= PipelineFlags::STENCIL_REFERENCE;
            }
        }

        let mut stages = ArrayVec::<_, 2>::new();
        let vertex_entry = self
            .stage_entry_point(self_id, hub, &desc.vertex.stage, ShaderStages::VERTEX)
            .map_err(|e| e.into_render(ShaderStages::VERTEX))?;
        stages.push((ShaderStages::VERTEX, vertex_entry));
        if let Some(ref fragment) = desc.fragment {
            let fragment_entry = self
                .stage_entry_point(self_id, hub, &fragment.stage, ShaderStages::FRAGMENT)
                .map_err(|e| e.into_render(ShaderStages::FRAGMENT))?;
            stages.push((ShaderStages::FRAGMENT, fragment_entry));
        }
        let layout = self
            .resolve_pipeline_layout(self_id, hub, desc.layout, &stages)
            .map_err(PipelineLayoutResolveError::into_render)?;

        let pass_context = RenderPassContext::new(
            targets.iter().map(|target| target.as_ref().map(|t| t.format)),
            desc.depth_stencil.as_ref().map(|ds| ds.format),
            sample_count,
        );

        Ok(RenderPipeline {
            info: ResourceInfo::new(&desc.label, self_id),
            layout,
            pass_context,
            flags,
            vertex_buffers,
            primitive: desc.primitive,
            depth_stencil: desc.depth_stencil.clone(),
            multisample: desc.multisample,
            targets,
        })
    }

    pub(crate) fn create_compute_pipeline(
        &self,
        self_id: DeviceId,
        hub: &Hub,
        desc: &ComputePipelineDescriptor,
    ) -> Result<ComputePipeline, CreateComputePipelineError> {
        self.check_is_valid(self_id)?;

        let entry = self
            .stage_entry_point(self_id, hub, &desc.stage, ShaderStages::COMPUTE)
            .map_err(StageOrResourceError::into_compute)?;
        let layout = self
            .resolve_pipeline_layout(
                self_id,
                hub,
                desc.layout,
                &[(ShaderStages::COMPUTE, entry)],
            )
            .map_err(PipelineLayoutResolveError::into_compute)?;

        Ok(ComputePipeline {
            info: ResourceInfo::new(&desc.label, self_id),
            layout,
        })
    }
}

enum StageOrResourceError {
    Resource(ResourceError),
    Stage(StageError),
}

impl From<ResourceError> for StageOrResourceError {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

impl StageOrResourceError {
    fn into_render(self, stage: ShaderStages) -> CreateRenderPipelineError {
        match self {
            Self::Resource(e) => e.into(),
            Self::Stage(error) => CreateRenderPipelineError::Stage { stage, error },
        }
    }

    fn into_compute(self) -> CreateComputePipelineError {
        match self {
            Self::Resource(e) => e.into(),
            Self::Stage(error) => error.into(),
        }
    }
}

enum PipelineLayoutResolveError {
    Resource(ResourceError),
    Stage { stage: ShaderStages, error: StageError },
    Implicit(ImplicitLayoutError),
}

impl From<ResourceError> for PipelineLayoutResolveError {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

impl PipelineLayoutResolveError {
    fn into_render(self) -> CreateRenderPipelineError {
        match self {
            Self::Resource(e) => e.into(),
            Self::Stage { stage, error } => CreateRenderPipelineError::Stage { stage, error },
            Self::Implicit(e) => e.into(),
        }
    }

    fn into_compute(self) -> CreateComputePipelineError {
        match self {
            Self::Resource(e) => e.into(),
            Self::Stage { error, .. } => error.into(),
            Self::Implicit(e) => e.into(),
        }
    }
}
