use crate::{
    binding_model::{CreateBindGroupLayoutError, ExclusivePipeline, ReifiedBindGroupLayout},
    command::ColorAttachmentError,
    device::RenderPassContext,
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    id::{PipelineLayoutId, ShaderModuleId},
    resource::{impl_resource, Resource, ResourceError, ResourceInfo},
    validation::{ShaderDefinitions, StageError},
    Label, MAX_BIND_GROUPS,
};

use arrayvec::ArrayVec;
use std::{borrow::Cow, sync::Arc};
use thiserror::Error;
use wgt::{BufferAddress, ShaderStages};

#[derive(Clone, Debug)]
pub struct ShaderModuleDescriptor<'a> {
    pub label: Label<'a>,
    pub code: Cow<'a, str>,
}

#[derive(Debug)]
pub struct ShaderModule {
    pub(crate) info: ResourceInfo,
    /// `None` if reflection could not see into the module.
    pub(crate) definitions: Option<ShaderDefinitions>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreateShaderModuleError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Shader reflection failed: {0}")]
    Parsing(String),
}

impl ErrorDetail for CreateShaderModuleError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::Parsing(_) => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

/// Describes a programmable pipeline stage.
#[derive(Clone, Debug)]
pub struct ProgrammableStageDescriptor<'a> {
    /// The compiled shader module for this stage.
    pub module: ShaderModuleId,
    /// The name of the entry point in the compiled shader.
    pub entry_point: Cow<'a, str>,
}

/// Describes how the vertex buffer is interpreted.
#[derive(Clone, Debug)]
pub struct VertexBufferLayout<'a> {
    /// The stride, in bytes, between elements of this buffer.
    pub array_stride: BufferAddress,
    /// How often this vertex buffer is "stepped" forward.
    pub step_mode: wgt::VertexStepMode,
    /// The list of attributes which comprise a single vertex.
    pub attributes: Cow<'a, [wgt::VertexAttribute]>,
}

/// Describes the vertex process in a render pipeline.
#[derive(Clone, Debug)]
pub struct VertexState<'a> {
    /// The compiled vertex stage and its entry point.
    pub stage: ProgrammableStageDescriptor<'a>,
    /// The format of any vertex buffers used with this pipeline. Empty
    /// slots are allowed.
    pub buffers: Cow<'a, [Option<VertexBufferLayout<'a>>]>,
}

/// Describes fragment processing in a render pipeline.
#[derive(Clone, Debug)]
pub struct FragmentState<'a> {
    /// The compiled fragment stage and its entry point.
    pub stage: ProgrammableStageDescriptor<'a>,
    /// The effect of draw calls on the color aspect of the output target.
    pub targets: Cow<'a, [Option<wgt::ColorTargetState>]>,
}

/// Describes a render (graphics) pipeline.
#[derive(Clone, Debug)]
pub struct RenderPipelineDescriptor<'a> {
    pub label: Label<'a>,
    /// The layout of bind groups for this pipeline. `None` derives the
    /// layout from the shaders.
    pub layout: Option<PipelineLayoutId>,
    /// The vertex processing state for this pipeline.
    pub vertex: VertexState<'a>,
    /// The properties of the pipeline at the primitive assembly and rasterization level.
    pub primitive: wgt::PrimitiveState,
    /// The effect of draw calls on the depth and stencil aspects of the output target, if any.
    pub depth_stencil: Option<wgt::DepthStencilState>,
    /// The multi-sampling properties of the pipeline.
    pub multisample: wgt::MultisampleState,
    /// The fragment processing state for this pipeline.
    pub fragment: Option<FragmentState<'a>>,
}

/// Describes a compute pipeline.
#[derive(Clone, Debug)]
pub struct ComputePipelineDescriptor<'a> {
    pub label: Label<'a>,
    /// The layout of bind groups for this pipeline. `None` derives the
    /// layout from the shader.
    pub layout: Option<PipelineLayoutId>,
    /// The compiled compute stage and its entry point.
    pub stage: ProgrammableStageDescriptor<'a>,
}

bitflags::bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PipelineFlags: u32 {
        const BLEND_CONSTANT = 1 << 0;
        const STENCIL_REFERENCE = 1 << 1;
        const WRITES_DEPTH = 1 << 2;
        const WRITES_STENCIL = 1 << 3;
    }
}

/// A vertex buffer layout as captured at pipeline creation.
#[derive(Clone, Debug, PartialEq)]
pub struct ReifiedVertexBuffer {
    pub array_stride: BufferAddress,
    pub step_mode: wgt::VertexStepMode,
    pub attributes: Vec<wgt::VertexAttribute>,
    /// Largest `offset + size` over the attributes.
    pub last_attribute_extent: BufferAddress,
}

impl ReifiedVertexBuffer {
    pub(crate) fn new(layout: &VertexBufferLayout) -> Self {
        let last_attribute_extent = layout
            .attributes
            .iter()
            .map(|attribute| attribute.offset + attribute.format.size())
            .max()
            .unwrap_or(0);
        Self {
            array_stride: layout.array_stride,
            step_mode: layout.step_mode,
            attributes: layout.attributes.to_vec(),
            last_attribute_extent,
        }
    }

    /// Bytes needed to fetch `count` elements.
    pub(crate) fn required_size(&self, count: u64) -> BufferAddress {
        if count == 0 {
            0
        } else {
            (count - 1) * self.array_stride + self.last_attribute_extent
        }
    }
}

/// The bind group layouts a pipeline was created with.
#[derive(Debug)]
pub(crate) struct ResolvedLayout {
    pub(crate) bind_group_layouts: ArrayVec<Arc<ReifiedBindGroupLayout>, MAX_BIND_GROUPS>,
    /// Group indices a draw or dispatch needs a bind group at.
    pub(crate) required_groups: ArrayVec<u32, MAX_BIND_GROUPS>,
    /// The layouts were derived from the shaders rather than given.
    pub(crate) is_auto: bool,
}

impl ResolvedLayout {
    pub(crate) fn explicit(bind_group_layouts: &[Arc<ReifiedBindGroupLayout>]) -> Self {
        Self {
            bind_group_layouts: bind_group_layouts.iter().cloned().collect(),
            required_groups: (0..bind_group_layouts.len() as u32).collect(),
            is_auto: false,
        }
    }

    pub(crate) fn derived(
        groups: &[Vec<wgt::BindGroupLayoutEntry>],
    ) -> Result<Self, CreateBindGroupLayoutError> {
        let mut bind_group_layouts = ArrayVec::new();
        let mut required_groups = ArrayVec::new();
        for (index, entries) in groups.iter().enumerate() {
            if !entries.is_empty() {
                required_groups.push(index as u32);
            }
            bind_group_layouts.push(Arc::new(ReifiedBindGroupLayout::new(
                entries,
                ExclusivePipeline::None,
            )?));
        }
        Ok(Self {
            bind_group_layouts,
            required_groups,
            is_auto: true,
        })
    }

    /// Tie derived layouts to the pipeline they were derived for.
    pub(crate) fn make_exclusive(&mut self, pipeline: ExclusivePipeline) {
        if !self.is_auto {
            return;
        }
        for layout in self.bind_group_layouts.iter_mut() {
            *layout = Arc::new(ReifiedBindGroupLayout {
                entries: layout.entries.clone(),
                exclusive_pipeline: pipeline,
                dynamic_bindings: layout.dynamic_bindings.clone(),
            });
        }
    }

    pub(crate) fn get_bind_group_layout(
        &self,
        index: u32,
    ) -> Result<&Arc<ReifiedBindGroupLayout>, GetBindGroupLayoutError> {
        self.bind_group_layouts
            .get(index as usize)
            .ok_or(GetBindGroupLayoutError::InvalidGroupIndex {
                index,
                count: self.bind_group_layouts.len() as u32,
            })
    }
}

/// A render pipeline as captured at creation, with defaults filled in.
#[derive(Debug)]
pub struct RenderPipeline {
    pub(crate) info: ResourceInfo,
    pub(crate) layout: ResolvedLayout,
    pub(crate) pass_context: RenderPassContext,
    pub(crate) flags: PipelineFlags,
    pub(crate) vertex_buffers: Vec<Option<ReifiedVertexBuffer>>,
    pub(crate) primitive: wgt::PrimitiveState,
    pub(crate) depth_stencil: Option<wgt::DepthStencilState>,
    pub(crate) multisample: wgt::MultisampleState,
    pub(crate) targets: Vec<Option<wgt::ColorTargetState>>,
}

impl RenderPipeline {
    pub fn pass_context(&self) -> &RenderPassContext {
        &self.pass_context
    }

    pub fn vertex_buffers(&self) -> &[Option<ReifiedVertexBuffer>] {
        &self.vertex_buffers
    }

    pub fn primitive(&self) -> &wgt::PrimitiveState {
        &self.primitive
    }

    pub fn depth_stencil(&self) -> Option<&wgt::DepthStencilState> {
        self.depth_stencil.as_ref()
    }

    pub fn multisample(&self) -> &wgt::MultisampleState {
        &self.multisample
    }

    pub fn targets(&self) -> &[Option<wgt::ColorTargetState>] {
        &self.targets
    }

    pub fn flags(&self) -> PipelineFlags {
        self.flags
    }

    /// Group indices a draw with this pipeline needs a bind group at.
    pub fn required_bind_groups(&self) -> &[u32] {
        &self.layout.required_groups
    }
}

#[derive(Debug)]
pub struct ComputePipeline {
    pub(crate) info: ResourceInfo,
    pub(crate) layout: ResolvedLayout,
}

impl ComputePipeline {
    pub fn required_bind_groups(&self) -> &[u32] {
        &self.layout.required_groups
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ImplicitLayoutError {
    #[error("Unable to reflect the shader {0:?} interface")]
    ReflectionError(ShaderStages),
    #[error(transparent)]
    BindGroup(#[from] CreateBindGroupLayoutError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ColorStateError {
    #[error("Format {0:?} is not renderable")]
    FormatNotRenderable(wgt::TextureFormat),
    #[error("Format {0:?} is not blendable")]
    FormatNotBlendable(wgt::TextureFormat),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DepthStencilStateError {
    #[error("Format {0:?} is not renderable")]
    FormatNotRenderable(wgt::TextureFormat),
    #[error("Format {0:?} does not have a depth aspect, but depth test/write is enabled")]
    FormatNotDepth(wgt::TextureFormat),
    #[error("Format {0:?} does not have a stencil aspect, but stencil test/write is enabled")]
    FormatNotStencil(wgt::TextureFormat),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreateRenderPipelineError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    ColorAttachment(#[from] ColorAttachmentError),
    #[error("Unable to derive an implicit layout")]
    Implicit(#[from] ImplicitLayoutError),
    #[error("Color state [{0}] is invalid")]
    ColorState(u8, #[source] ColorStateError),
    #[error("Depth/stencil state is invalid")]
    DepthStencilState(#[from] DepthStencilStateError),
    #[error("Invalid sample count {0}")]
    InvalidSampleCount(u32),
    #[error("The number of vertex buffers {given} exceeds the limit {limit}")]
    TooManyVertexBuffers { given: u32, limit: u32 },
    #[error("Vertex buffer {index} stride {stride} does not respect `VERTEX_STRIDE_ALIGNMENT`")]
    UnalignedVertexStride { index: u32, stride: BufferAddress },
    #[error("Vertex attribute at location {location} has invalid offset {offset}")]
    InvalidVertexAttributeOffset {
        location: wgt::ShaderLocation,
        offset: BufferAddress,
    },
    #[error("Two or more vertex attributes were assigned to the same location in the shader: {0}")]
    ShaderLocationClash(u32),
    #[error("Strip index format was not set to None but to {strip_index_format:?} while using the non-strip topology {topology:?}")]
    StripIndexFormatForNonStripTopology {
        strip_index_format: Option<wgt::IndexFormat>,
        topology: wgt::PrimitiveTopology,
    },
    #[error("Error matching {stage:?} shader requirements against the pipeline")]
    Stage {
        stage: ShaderStages,
        #[source]
        error: StageError,
    },
}

impl ErrorDetail for CreateRenderPipelineError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::ColorAttachment(ref e) => e.kind(),
            Self::Implicit(ImplicitLayoutError::ReflectionError(_)) => {
                ErrorKind::MalformedArguments
            }
            Self::Implicit(ImplicitLayoutError::BindGroup(ref e)) => e.kind(),
            Self::Stage { ref error, .. } => error.kind(),
            Self::TooManyVertexBuffers { .. } | Self::InvalidVertexAttributeOffset { .. } => {
                ErrorKind::OutOfRange
            }
            Self::ColorState(..)
            | Self::DepthStencilState(_)
            | Self::InvalidSampleCount(_)
            | Self::UnalignedVertexStride { .. }
            | Self::ShaderLocationClash(_)
            | Self::StripIndexFormatForNonStripTopology { .. } => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreateComputePipelineError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Unable to derive an implicit layout")]
    Implicit(#[from] ImplicitLayoutError),
    #[error("Error matching shader requirements against the pipeline")]
    Stage(#[from] StageError),
}

impl ErrorDetail for CreateComputePipelineError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::Implicit(ImplicitLayoutError::ReflectionError(_)) => {
                ErrorKind::MalformedArguments
            }
            Self::Implicit(ImplicitLayoutError::BindGroup(ref e)) => e.kind(),
            Self::Stage(ref e) => e.kind(),
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GetBindGroupLayoutError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Invalid group index {index}, the pipeline has {count} bind group layouts")]
    InvalidGroupIndex { index: u32, count: u32 },
}

impl ErrorDetail for GetBindGroupLayoutError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::InvalidGroupIndex { .. } => ErrorKind::OutOfRange,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

impl_resource!(ShaderModule, RenderPipeline, ComputePipeline);
