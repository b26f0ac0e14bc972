use crate::{
    device::Limits,
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    id::{
        BindGroupLayoutId, BufferId, ComputePipelineId, RenderPipelineId, ResourceRef, SamplerId,
        TextureId, TextureViewId,
    },
    resource::{impl_resource, Resource, ResourceError, ResourceInfo},
    validation::MissingBufferUsageError,
    FastHashSet, Label, MAX_BIND_GROUPS,
};

use arrayvec::ArrayVec;
use std::{borrow::Cow, ops::Range, sync::Arc};
use thiserror::Error;
use wgt::{BufferAddress, BufferBindingType, BufferSize, DynamicOffset};

/// The pipeline an automatically derived bind group layout belongs to.
///
/// Layouts derived for one pipeline are never compatible with another
/// pipeline's, even if their entries are identical.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ExclusivePipeline {
    None,
    Render(RenderPipelineId),
    Compute(ComputePipelineId),
}

#[derive(Clone, Debug)]
pub struct BindGroupLayoutDescriptor<'a> {
    pub label: Label<'a>,
    pub entries: Cow<'a, [wgt::BindGroupLayoutEntry]>,
}

/// Immutable copy of a bind group layout, shared by everything that refers
/// to the layout.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ReifiedBindGroupLayout {
    /// Entries sorted by binding number.
    pub(crate) entries: Vec<wgt::BindGroupLayoutEntry>,
    pub(crate) exclusive_pipeline: ExclusivePipeline,
    /// Binding numbers of the entries with a dynamic offset, in binding order.
    pub(crate) dynamic_bindings: Vec<u32>,
}

impl ReifiedBindGroupLayout {
    pub(crate) fn new(
        entries: &[wgt::BindGroupLayoutEntry],
        exclusive_pipeline: ExclusivePipeline,
    ) -> Result<Self, CreateBindGroupLayoutError> {
        let mut seen = FastHashSet::default();
        for entry in entries {
            if !seen.insert(entry.binding) {
                return Err(CreateBindGroupLayoutError::ConflictBinding(entry.binding));
            }
            if entry.count.is_some() {
                return Err(CreateBindGroupLayoutError::ArrayUnsupported(entry.binding));
            }
        }

        let mut entries = entries.to_vec();
        entries.sort_by_key(|entry| entry.binding);
        let dynamic_bindings = entries
            .iter()
            .filter(|entry| match entry.ty {
                wgt::BindingType::Buffer {
                    has_dynamic_offset, ..
                } => has_dynamic_offset,
                _ => false,
            })
            .map(|entry| entry.binding)
            .collect();

        Ok(Self {
            entries,
            exclusive_pipeline,
            dynamic_bindings,
        })
    }

    pub fn entries(&self) -> &[wgt::BindGroupLayoutEntry] {
        &self.entries
    }

    pub(crate) fn entry(&self, binding: u32) -> Option<&wgt::BindGroupLayoutEntry> {
        self.entries
            .binary_search_by_key(&binding, |entry| entry.binding)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Two layouts are interchangeable if they are the same object or have
    /// equal signatures.
    pub(crate) fn is_compatible(self: &Arc<Self>, other: &Arc<Self>) -> bool {
        Arc::ptr_eq(self, other) || **self == **other
    }
}

#[derive(Debug)]
pub struct BindGroupLayout {
    pub(crate) info: ResourceInfo,
    pub(crate) inner: Arc<ReifiedBindGroupLayout>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreateBindGroupLayoutError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Conflicting binding at index {0}")]
    ConflictBinding(u32),
    #[error("Binding {0} is an array, which is not supported")]
    ArrayUnsupported(u32),
}

impl ErrorDetail for CreateBindGroupLayoutError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::ConflictBinding(_) | Self::ArrayUnsupported(_) => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineLayoutDescriptor<'a> {
    pub label: Label<'a>,
    pub bind_group_layouts: Cow<'a, [BindGroupLayoutId]>,
}

#[derive(Debug)]
pub struct PipelineLayout {
    pub(crate) info: ResourceInfo,
    pub(crate) bind_group_layouts: ArrayVec<Arc<ReifiedBindGroupLayout>, MAX_BIND_GROUPS>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreatePipelineLayoutError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Bind group layout count {actual} exceeds device bind group limit {max}")]
    TooManyGroups { actual: usize, max: usize },
}

impl ErrorDetail for CreatePipelineLayoutError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::TooManyGroups { .. } => ErrorKind::OutOfRange,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferBinding {
    pub buffer_id: BufferId,
    pub offset: BufferAddress,
    pub size: Option<BufferSize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingResource {
    Buffer(BufferBinding),
    Sampler(SamplerId),
    TextureView(TextureViewId),
}

#[derive(Clone, Debug)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

#[derive(Clone, Debug)]
pub struct BindGroupDescriptor<'a> {
    pub label: Label<'a>,
    pub layout: BindGroupLayoutId,
    pub entries: Cow<'a, [BindGroupEntry]>,
}

/// A resource captured by a bind group at creation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoundResource {
    Buffer {
        id: BufferId,
        range: Range<BufferAddress>,
    },
    Sampler(SamplerId),
    TextureView {
        id: TextureViewId,
        texture: TextureId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundEntry {
    pub binding: u32,
    pub resource: BoundResource,
}

#[derive(Debug)]
pub(crate) struct BindGroupDynamicBindingData {
    /// The index of the binding.
    pub(crate) binding_idx: u32,
    pub(crate) buffer_id: BufferId,
    /// The range that the binding covers.
    pub(crate) binding_range: Range<BufferAddress>,
    /// The maximum value the dynamic offset can have before running off the end of the buffer.
    pub(crate) maximum_dynamic_offset: BufferAddress,
    /// The binding type.
    pub(crate) binding_type: BufferBindingType,
}

/// Alignment a dynamic or static offset of the given buffer binding type
/// must respect, and the name of the limit defining it.
pub(crate) fn buffer_binding_type_alignment(
    limits: &Limits,
    binding_type: BufferBindingType,
) -> (u32, &'static str) {
    match binding_type {
        BufferBindingType::Uniform => (
            limits.min_uniform_buffer_offset_alignment,
            "min_uniform_buffer_offset_alignment",
        ),
        BufferBindingType::Storage { .. } => (
            limits.min_storage_buffer_offset_alignment,
            "min_storage_buffer_offset_alignment",
        ),
    }
}

#[derive(Debug)]
pub struct BindGroup {
    pub(crate) info: ResourceInfo,
    pub(crate) layout: Arc<ReifiedBindGroupLayout>,
    /// Entries sorted by binding number.
    pub(crate) entries: Vec<BoundEntry>,
    pub(crate) dynamic_binding_info: Vec<BindGroupDynamicBindingData>,
}

impl BindGroup {
    pub fn entries(&self) -> &[BoundEntry] {
        &self.entries
    }

    pub(crate) fn validate_dynamic_bindings(
        &self,
        bind_group_index: u32,
        offsets: &[DynamicOffset],
        limits: &Limits,
    ) -> Result<(), BindError> {
        if self.dynamic_binding_info.len() != offsets.len() {
            return Err(BindError::MismatchedDynamicOffsetCount {
                group: bind_group_index,
                expected: self.dynamic_binding_info.len(),
                actual: offsets.len(),
            });
        }

        for (idx, (info, &offset)) in self
            .dynamic_binding_info
            .iter()
            .zip(offsets.iter())
            .enumerate()
        {
            let (alignment, limit_name) = buffer_binding_type_alignment(limits, info.binding_type);
            if offset as BufferAddress % alignment as BufferAddress != 0 {
                return Err(BindError::UnalignedDynamicBinding {
                    group: bind_group_index,
                    binding: info.binding_idx,
                    idx,
                    offset,
                    alignment,
                    limit_name,
                });
            }

            if offset as BufferAddress > info.maximum_dynamic_offset {
                return Err(BindError::DynamicBindingOutOfBounds {
                    group: bind_group_index,
                    binding: info.binding_idx,
                    idx,
                    offset,
                    buffer: info.buffer_id,
                    binding_range: info.binding_range.clone(),
                    maximum_dynamic_offset: info.maximum_dynamic_offset,
                });
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreateBindGroupError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Binding count declared with at most {expected} items, but {actual} items were provided")]
    BindingsNumMismatch { actual: usize, expected: usize },
    #[error("Binding {0} is used at least twice in the descriptor")]
    DuplicateBinding(u32),
    #[error("Unable to find a corresponding declaration for the given binding {0}")]
    MissingBindingDeclaration(u32),
    #[error("The resource bound at {binding} is a {actual}, but the layout expects a {expected}")]
    WrongBindingType {
        binding: u32,
        actual: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    MissingBufferUsage(#[from] MissingBufferUsageError),
    #[error("Texture view {view:?} bound at {binding} is missing usage {expected:?}")]
    MissingTextureUsage {
        binding: u32,
        view: TextureViewId,
        expected: wgt::TextureUsages,
    },
    #[error("Buffer offset {offset} of binding {binding} does not respect device's requested `{limit_name}` limit {alignment}")]
    UnalignedBufferOffset {
        binding: u32,
        offset: BufferAddress,
        alignment: u32,
        limit_name: &'static str,
    },
    #[error("Buffer binding {binding} range {offset}..{end} does not fit in {buffer:?} of size {size}")]
    BindingRangeTooLarge {
        binding: u32,
        buffer: BufferId,
        offset: BufferAddress,
        end: BufferAddress,
        size: BufferAddress,
    },
    #[error("Buffer binding {0} has a size of zero")]
    BindingZeroSize(u32),
    #[error("Buffer binding {binding} range is {actual} bytes, smaller than the minimum binding size {min}")]
    BindingSizeTooSmall {
        binding: u32,
        actual: BufferAddress,
        min: BufferAddress,
    },
    #[error("Sampler bound at {binding} is {sampler}, but the layout expects {expected:?}")]
    WrongSamplerType {
        binding: u32,
        sampler: &'static str,
        expected: wgt::SamplerBindingType,
    },
    #[error("Texture view bound at {binding} has {samples} samples, but the layout expects {expected}")]
    InvalidTextureMultisample {
        binding: u32,
        samples: u32,
        expected: &'static str,
    },
}

impl ErrorDetail for CreateBindGroupError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::MissingBufferUsage(ref e) => e.kind(),
            Self::BindingsNumMismatch { .. }
            | Self::DuplicateBinding(_)
            | Self::WrongBindingType { .. }
            | Self::MissingTextureUsage { .. }
            | Self::UnalignedBufferOffset { .. }
            | Self::WrongSamplerType { .. }
            | Self::InvalidTextureMultisample { .. } => ErrorKind::MalformedArguments,
            Self::MissingBindingDeclaration(_) => ErrorKind::MissingBinding,
            Self::BindingRangeTooLarge { .. } => ErrorKind::OutOfRange,
            Self::BindingZeroSize(_) | Self::BindingSizeTooSmall { .. } => ErrorKind::SizeMismatch,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        match *self {
            Self::Resource(ref e) => e.collect_related(related),
            Self::MissingBufferUsage(ref e) => e.collect_related(related),
            Self::MissingTextureUsage { view, .. } => related.push(view.into()),
            Self::BindingRangeTooLarge { buffer, .. } => related.push(buffer.into()),
            _ => {}
        }
    }
}

/// Failure of a `set_bind_group` call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error(
        "Bind group {group} expects {expected} dynamic offset{s0}. However {actual} dynamic offset{s1} were provided.",
        s0 = if *.expected >= 2 { "s" } else { "" },
        s1 = if *.actual >= 2 { "s" } else { "" },
    )]
    MismatchedDynamicOffsetCount {
        group: u32,
        actual: usize,
        expected: usize,
    },
    #[error(
        "Dynamic binding index {idx} (targeting bind group {group}, binding {binding}) with value {offset}, does not respect device's requested `{limit_name}` limit: {alignment}"
    )]
    UnalignedDynamicBinding {
        idx: usize,
        group: u32,
        binding: u32,
        offset: u32,
        alignment: u32,
        limit_name: &'static str,
    },
    #[error(
        "Dynamic binding offset index {idx} with offset {offset} would overrun the buffer bound to bind group {group} -> binding {binding}. \
         Buffer size is {} bytes, the binding binds bytes {}..{}, meaning the maximum the binding can be offset is {maximum_dynamic_offset} bytes",
        .binding_range.end + .maximum_dynamic_offset,
        .binding_range.start,
        .binding_range.end,
    )]
    DynamicBindingOutOfBounds {
        idx: usize,
        group: u32,
        binding: u32,
        offset: u32,
        buffer: BufferId,
        binding_range: Range<BufferAddress>,
        maximum_dynamic_offset: BufferAddress,
    },
}

impl ErrorDetail for BindError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::MismatchedDynamicOffsetCount { .. } | Self::UnalignedDynamicBinding { .. } => {
                ErrorKind::MalformedArguments
            }
            Self::DynamicBindingOutOfBounds { .. } => ErrorKind::OutOfRange,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::DynamicBindingOutOfBounds { buffer, .. } = *self {
            related.push(ResourceRef::Buffer(buffer));
        }
    }
}

impl_resource!(BindGroupLayout, PipelineLayout, BindGroup);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TypedId;
    use wgt::{BindingType, ShaderStages};

    fn uniform_entry(binding: u32, has_dynamic_offset: bool) -> wgt::BindGroupLayoutEntry {
        wgt::BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::VERTEX,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset,
                min_binding_size: None,
            },
            count: None,
        }
    }

    #[test]
    fn entries_are_sorted_and_unique() {
        let layout = ReifiedBindGroupLayout::new(
            &[uniform_entry(3, true), uniform_entry(1, false), uniform_entry(2, true)],
            ExclusivePipeline::None,
        )
        .unwrap();
        let bindings: Vec<_> = layout.entries().iter().map(|e| e.binding).collect();
        assert_eq!(bindings, [1, 2, 3]);
        assert_eq!(layout.dynamic_bindings, [2, 3]);
        assert!(layout.entry(2).is_some());
        assert!(layout.entry(4).is_none());

        let err = ReifiedBindGroupLayout::new(
            &[uniform_entry(0, false), uniform_entry(0, false)],
            ExclusivePipeline::None,
        )
        .unwrap_err();
        assert_eq!(err, CreateBindGroupLayoutError::ConflictBinding(0));
    }

    #[test]
    fn exclusive_layouts_only_match_their_pipeline() {
        let entries = [uniform_entry(0, false)];
        let explicit_a = Arc::new(ReifiedBindGroupLayout::new(&entries, ExclusivePipeline::None).unwrap());
        let explicit_b = Arc::new(ReifiedBindGroupLayout::new(&entries, ExclusivePipeline::None).unwrap());
        assert!(explicit_a.is_compatible(&explicit_b));

        let auto = Arc::new(
            ReifiedBindGroupLayout::new(
                &entries,
                ExclusivePipeline::Render(RenderPipelineId::zip(0, 1)),
            )
            .unwrap(),
        );
        assert!(!auto.is_compatible(&explicit_a));
        assert!(auto.is_compatible(&auto.clone()));
    }

    #[test]
    fn dynamic_offsets_are_checked() {
        let limits = Limits::default();
        let layout = Arc::new(
            ReifiedBindGroupLayout::new(&[uniform_entry(0, true)], ExclusivePipeline::None).unwrap(),
        );
        let group = BindGroup {
            info: ResourceInfo::new(&None, crate::id::DeviceId::zip(0, 1)),
            layout,
            entries: Vec::new(),
            dynamic_binding_info: vec![BindGroupDynamicBindingData {
                binding_idx: 0,
                buffer_id: BufferId::zip(0, 1),
                binding_range: 0..64,
                maximum_dynamic_offset: 512 - 64,
                binding_type: BufferBindingType::Uniform,
            }],
        };
        assert!(group.validate_dynamic_bindings(0, &[256], &limits).is_ok());
        assert!(matches!(
            group.validate_dynamic_bindings(0, &[], &limits),
            Err(BindError::MismatchedDynamicOffsetCount { .. })
        ));
        let err = group.validate_dynamic_bindings(0, &[4], &limits).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
        let err = group.validate_dynamic_bindings(0, &[512], &limits).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }
}
