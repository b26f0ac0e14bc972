//! Usage checks and the shader interface.
//!
//! Shader source is opaque to the engine. A [`ShaderReflection`]
//! collaborator turns it into [`ShaderDefinitions`]: the entry points of a
//! module and the resource bindings each of them uses. Pipelines are checked
//! against, or derive their layouts from, those definitions.

use crate::{
    binding_model::ReifiedBindGroupLayout,
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    id::{BufferId, ResourceRef, TextureId},
    FastHashMap, MAX_BIND_GROUPS,
};

use arrayvec::ArrayVec;
use std::sync::Arc;
use thiserror::Error;
use wgt::{BindingType, ShaderStages};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Usage flags {actual:?} of {res:?} do not contain required usage flags {expected:?}")]
pub struct MissingBufferUsageError {
    pub(crate) res: BufferId,
    pub(crate) actual: wgt::BufferUsages,
    pub(crate) expected: wgt::BufferUsages,
}

impl ErrorDetail for MissingBufferUsageError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::MalformedArguments
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        related.push(ResourceRef::Buffer(self.res));
    }
}

/// Checks that the given buffer usage contains the required buffer usage,
/// returns an error otherwise.
pub fn check_buffer_usage(
    res: BufferId,
    actual: wgt::BufferUsages,
    expected: wgt::BufferUsages,
) -> Result<(), MissingBufferUsageError> {
    if !actual.contains(expected) {
        Err(MissingBufferUsageError {
            res,
            actual,
            expected,
        })
    } else {
        Ok(())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Usage flags {actual:?} of {res:?} do not contain required usage flags {expected:?}")]
pub struct MissingTextureUsageError {
    pub(crate) res: TextureId,
    pub(crate) actual: wgt::TextureUsages,
    pub(crate) expected: wgt::TextureUsages,
}

impl ErrorDetail for MissingTextureUsageError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::MalformedArguments
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        related.push(ResourceRef::Texture(self.res));
    }
}

/// Checks that the given texture usage contains the required texture usage,
/// returns an error otherwise.
pub fn check_texture_usage(
    res: TextureId,
    actual: wgt::TextureUsages,
    expected: wgt::TextureUsages,
) -> Result<(), MissingTextureUsageError> {
    if !actual.contains(expected) {
        Err(MissingTextureUsageError {
            res,
            actual,
            expected,
        })
    } else {
        Ok(())
    }
}

/// A resource a shader entry point declares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceBinding {
    pub group: u32,
    pub binding: u32,
    pub ty: BindingType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub stage: ShaderStages,
    pub resources: Vec<ResourceBinding>,
}

/// What reflection learned about a shader module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderDefinitions {
    pub entry_points: Vec<EntryPoint>,
}

impl ShaderDefinitions {
    pub fn entry_point(&self, name: &str, stage: ShaderStages) -> Option<&EntryPoint> {
        self.entry_points
            .iter()
            .find(|ep| ep.name == name && ep.stage == stage)
    }
}

/// Shader introspection collaborator.
pub trait ShaderReflection {
    /// Reflect a module's source.
    ///
    /// `Ok(None)` means the module is opaque: pipelines using it skip
    /// interface checks, and automatic layouts derive no bindings from it.
    fn definitions_from_source(&self, code: &str) -> Result<Option<ShaderDefinitions>, String>;
}

impl<F> ShaderReflection for F
where
    F: Fn(&str) -> Result<ShaderDefinitions, String>,
{
    fn definitions_from_source(&self, code: &str) -> Result<Option<ShaderDefinitions>, String> {
        self(code).map(Some)
    }
}

/// Reflection that treats every module as opaque.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReflection;

impl ShaderReflection for NoReflection {
    fn definitions_from_source(&self, _code: &str) -> Result<Option<ShaderDefinitions>, String> {
        Ok(None)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("Binding is missing from the pipeline layout")]
    Missing,
    #[error("Visibility flags don't include the shader stage")]
    Invisible,
    #[error("Type on the shader side does not match the pipeline binding")]
    WrongType,
    #[error("Derived bind group layout type is not consistent between stages")]
    InconsistentlyDerivedType,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("Unable to find entry point '{name}' for the {stage:?} stage")]
    MissingEntryPoint { name: String, stage: ShaderStages },
    #[error("Shader global binding at index {binding} in group {group} uses a group index beyond the maximum of {max}")]
    GroupOutOfRange { group: u32, binding: u32, max: u32 },
    #[error("Error matching shader requirements against the pipeline: global binding at index {binding} in group {group}: {error}")]
    Binding {
        group: u32,
        binding: u32,
        #[source]
        error: BindingError,
    },
}

impl ErrorDetail for StageError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::MissingEntryPoint { .. } => ErrorKind::MissingBinding,
            Self::GroupOutOfRange { .. } => ErrorKind::OutOfRange,
            Self::Binding {
                error: BindingError::Missing,
                ..
            } => ErrorKind::MissingBinding,
            Self::Binding { .. } => ErrorKind::LayoutIncompatible,
        }
    }
}

fn same_binding_kind(layout: &BindingType, shader: &BindingType) -> bool {
    match (*layout, *shader) {
        (BindingType::Buffer { ty: a, .. }, BindingType::Buffer { ty: b, .. }) => {
            std::mem::discriminant(&a) == std::mem::discriminant(&b)
        }
        (BindingType::Sampler(_), BindingType::Sampler(_)) => true,
        (BindingType::Texture { .. }, BindingType::Texture { .. }) => true,
        (BindingType::StorageTexture { .. }, BindingType::StorageTexture { .. }) => true,
        _ => false,
    }
}

/// Check that every binding an entry point uses is provided by `layouts`
/// with the right visibility and kind.
pub(crate) fn check_stage_interface(
    layouts: &[Arc<ReifiedBindGroupLayout>],
    stage: ShaderStages,
    entry_point: &EntryPoint,
) -> Result<(), StageError> {
    for res in entry_point.resources.iter() {
        let entry = layouts
            .get(res.group as usize)
            .and_then(|layout| layout.entry(res.binding));
        let error = match entry {
            None => Some(BindingError::Missing),
            Some(entry) if !entry.visibility.contains(stage) => Some(BindingError::Invisible),
            Some(entry) if !same_binding_kind(&entry.ty, &res.ty) => Some(BindingError::WrongType),
            Some(_) => None,
        };
        if let Some(error) = error {
            return Err(StageError::Binding {
                group: res.group,
                binding: res.binding,
                error,
            });
        }
    }
    Ok(())
}

/// Entries of every derived group, indexed by group.
pub(crate) type DerivedLayouts = ArrayVec<Vec<wgt::BindGroupLayoutEntry>, MAX_BIND_GROUPS>;

/// Merge the bindings used by the given stages into bind group layout
/// entries. Visibility is the union of the stages using a binding.
pub fn derive_bind_group_layouts(
    stages: &[(ShaderStages, &EntryPoint)],
    max_bind_groups: u32,
) -> Result<DerivedLayouts, StageError> {
    let mut merged = FastHashMap::<(u32, u32), wgt::BindGroupLayoutEntry>::default();
    let mut group_count = 0;

    for &(stage, entry_point) in stages {
        for res in entry_point.resources.iter() {
            if res.group >= max_bind_groups.min(MAX_BIND_GROUPS as u32) {
                return Err(StageError::GroupOutOfRange {
                    group: res.group,
                    binding: res.binding,
                    max: max_bind_groups,
                });
            }
            group_count = group_count.max(res.group as usize + 1);
            let entry = merged
                .entry((res.group, res.binding))
                .or_insert(wgt::BindGroupLayoutEntry {
                    binding: res.binding,
                    visibility: ShaderStages::empty(),
                    ty: res.ty,
                    count: None,
                });
            if entry.ty != res.ty {
                return Err(StageError::Binding {
                    group: res.group,
                    binding: res.binding,
                    error: BindingError::InconsistentlyDerivedType,
                });
            }
            entry.visibility |= stage;
        }
    }

    let mut layouts: DerivedLayouts = (0..group_count).map(|_| Vec::new()).collect();
    for ((group, _), entry) in merged {
        layouts[group as usize].push(entry);
    }
    for entries in layouts.iter_mut() {
        entries.sort_by_key(|entry| entry.binding);
    }
    Ok(layouts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding_model::ExclusivePipeline;
    use crate::id::TypedId;

    fn uniform() -> BindingType {
        BindingType::Buffer {
            ty: wgt::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        }
    }

    fn entry_point(stage: ShaderStages, resources: &[(u32, u32, BindingType)]) -> EntryPoint {
        EntryPoint {
            name: "main".to_string(),
            stage,
            resources: resources
                .iter()
                .map(|&(group, binding, ty)| ResourceBinding { group, binding, ty })
                .collect(),
        }
    }

    #[test]
    fn usage_is_checked() {
        let id = BufferId::zip(0, 1);
        assert!(check_buffer_usage(id, wgt::BufferUsages::VERTEX, wgt::BufferUsages::VERTEX).is_ok());
        let err =
            check_buffer_usage(id, wgt::BufferUsages::UNIFORM, wgt::BufferUsages::VERTEX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArguments);
    }

    #[test]
    fn stages_are_merged() {
        let vs = entry_point(ShaderStages::VERTEX, &[(0, 0, uniform()), (2, 1, uniform())]);
        let fs = entry_point(ShaderStages::FRAGMENT, &[(0, 0, uniform())]);
        let layouts = derive_bind_group_layouts(
            &[(ShaderStages::VERTEX, &vs), (ShaderStages::FRAGMENT, &fs)],
            4,
        )
        .unwrap();
        assert_eq!(layouts.len(), 3);
        assert_eq!(layouts[0][0].visibility, ShaderStages::VERTEX_FRAGMENT);
        assert!(layouts[1].is_empty());
        assert_eq!(layouts[2][0].binding, 1);
    }

    #[test]
    fn conflicting_types_are_rejected() {
        let vs = entry_point(ShaderStages::VERTEX, &[(0, 0, uniform())]);
        let fs = entry_point(
            ShaderStages::FRAGMENT,
            &[(0, 0, BindingType::Sampler(wgt::SamplerBindingType::Filtering))],
        );
        let err = derive_bind_group_layouts(
            &[(ShaderStages::VERTEX, &vs), (ShaderStages::FRAGMENT, &fs)],
            4,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StageError::Binding {
                error: BindingError::InconsistentlyDerivedType,
                ..
            }
        ));

        let deep = entry_point(ShaderStages::VERTEX, &[(4, 0, uniform())]);
        let err = derive_bind_group_layouts(&[(ShaderStages::VERTEX, &deep)], 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn interface_against_explicit_layout() {
        let layout = Arc::new(
            ReifiedBindGroupLayout::new(
                &[wgt::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::FRAGMENT,
                    ty: uniform(),
                    count: None,
                }],
                ExclusivePipeline::None,
            )
            .unwrap(),
        );
        let layouts = [layout];
        let fs = entry_point(ShaderStages::FRAGMENT, &[(0, 0, uniform())]);
        assert!(check_stage_interface(&layouts, ShaderStages::FRAGMENT, &fs).is_ok());

        let vs = entry_point(ShaderStages::VERTEX, &[(0, 0, uniform())]);
        assert!(matches!(
            check_stage_interface(&layouts, ShaderStages::VERTEX, &vs),
            Err(StageError::Binding {
                error: BindingError::Invisible,
                ..
            })
        ));

        let missing = entry_point(ShaderStages::FRAGMENT, &[(1, 0, uniform())]);
        let err = check_stage_interface(&layouts, ShaderStages::FRAGMENT, &missing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingBinding);
    }
}
