use crate::{
    error::{ErrorDetail, ErrorKind, RelatedObjects},
    id::{DeviceId, ResourceRef},
    resource::ResourceError,
    Label, LabelHelpers, MAX_BIND_GROUPS, MAX_COLOR_ATTACHMENTS, MAX_VERTEX_BUFFERS,
};

use arrayvec::ArrayVec;
use std::fmt;
use thiserror::Error;
use wgt::TextureFormat;

pub mod global;
mod resource;

/// Device limits consulted by the validation rules.
///
/// Defaults are the WebGPU defaults.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct Limits {
    pub max_bind_groups: u32,
    pub max_vertex_buffers: u32,
    pub max_color_attachments: u32,
    pub max_color_attachment_bytes_per_sample: u32,
    pub max_bind_groups_plus_vertex_buffers: u32,
    pub min_uniform_buffer_offset_alignment: u32,
    pub min_storage_buffer_offset_alignment: u32,
    pub max_compute_workgroups_per_dimension: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_bind_groups: 4,
            max_vertex_buffers: 8,
            max_color_attachments: 8,
            max_color_attachment_bytes_per_sample: 32,
            max_bind_groups_plus_vertex_buffers: 24,
            min_uniform_buffer_offset_alignment: 256,
            min_storage_buffer_offset_alignment: 256,
            max_compute_workgroups_per_dimension: 65535,
        }
    }
}

impl Limits {
    /// Parse limits from a RON document. Missing fields keep their defaults.
    #[cfg(feature = "ron")]
    pub fn from_ron_str(source: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(source)
    }

    fn check(&self) -> Result<(), DeviceError> {
        let caps = [
            ("max_bind_groups", self.max_bind_groups, MAX_BIND_GROUPS),
            ("max_vertex_buffers", self.max_vertex_buffers, MAX_VERTEX_BUFFERS),
            (
                "max_color_attachments",
                self.max_color_attachments,
                MAX_COLOR_ATTACHMENTS,
            ),
        ];
        for (name, requested, allowed) in caps {
            if requested as usize > allowed {
                return Err(DeviceError::LimitTooHigh {
                    name,
                    requested,
                    allowed: allowed as u32,
                });
            }
        }
        for (name, value) in [
            (
                "min_uniform_buffer_offset_alignment",
                self.min_uniform_buffer_offset_alignment,
            ),
            (
                "min_storage_buffer_offset_alignment",
                self.min_storage_buffer_offset_alignment,
            ),
        ] {
            if !value.is_power_of_two() {
                return Err(DeviceError::AlignmentNotPowerOfTwo { name, value });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct DeviceDescriptor<'a> {
    pub label: Label<'a>,
    pub limits: Limits,
}

#[derive(Debug)]
pub struct Device {
    pub(crate) label: String,
    pub(crate) limits: Limits,
    pub(crate) destroyed: bool,
}

impl Device {
    pub(crate) fn new(desc: &DeviceDescriptor) -> Result<Self, DeviceError> {
        desc.limits.check()?;
        Ok(Self {
            label: desc.label.borrow_or_default().to_string(),
            limits: desc.limits.clone(),
            destroyed: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub(crate) fn check_is_valid(&self, id: DeviceId) -> Result<(), ResourceError> {
        if self.destroyed {
            Err(ResourceError::Destroyed(id.into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Limit `{name}` of {requested} exceeds the supported maximum of {allowed}")]
    LimitTooHigh {
        name: &'static str,
        requested: u32,
        allowed: u32,
    },
    #[error("Limit `{name}` must be a power of two, got {value}")]
    AlignmentNotPowerOfTwo { name: &'static str, value: u32 },
}

impl ErrorDetail for DeviceError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Resource(ref e) => e.kind(),
            Self::LimitTooHigh { .. } => ErrorKind::OutOfRange,
            Self::AlignmentNotPowerOfTwo { .. } => ErrorKind::MalformedArguments,
        }
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        if let Self::Resource(ref e) = *self {
            e.collect_related(related);
        }
    }
}

#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub(crate) struct AttachmentData<T> {
    pub colors: ArrayVec<Option<T>, MAX_COLOR_ATTACHMENTS>,
    pub depth_stencil: Option<T>,
}

/// The attachment shape shared by a render pass and everything recorded
/// into it: color formats, depth/stencil format and sample count.
///
/// Trailing empty color slots are not part of the signature, so passes and
/// pipelines compare equal whenever their used slots agree.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RenderPassContext {
    pub(crate) attachments: AttachmentData<TextureFormat>,
    pub(crate) sample_count: u32,
}

impl RenderPassContext {
    pub(crate) fn new(
        colors: impl IntoIterator<Item = Option<TextureFormat>>,
        depth_stencil: Option<TextureFormat>,
        sample_count: u32,
    ) -> Self {
        let mut attachments = AttachmentData {
            colors: colors.into_iter().take(MAX_COLOR_ATTACHMENTS).collect(),
            depth_stencil,
        };
        while let Some(&None) = attachments.colors.last() {
            attachments.colors.pop();
        }
        Self {
            attachments,
            sample_count,
        }
    }

    pub fn color_formats(&self) -> &[Option<TextureFormat>] {
        &self.attachments.colors
    }

    pub fn depth_stencil_format(&self) -> Option<TextureFormat> {
        self.attachments.depth_stencil
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub(crate) fn check_compatible(
        &self,
        other: &Self,
        res: ResourceRef,
    ) -> Result<(), RenderPassCompatibilityError> {
        if self != other {
            return Err(RenderPassCompatibilityError {
                expected: self.clone(),
                actual: other.clone(),
                res,
            });
        }
        Ok(())
    }
}

impl fmt::Display for RenderPassContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ colors: {:?}, depth_stencil: {:?}, sample_count: {} }}",
            self.attachments.colors.as_slice(),
            self.attachments.depth_stencil,
            self.sample_count
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("The render pass layout {expected} is incompatible with the layout {actual} of {res}")]
pub struct RenderPassCompatibilityError {
    pub expected: RenderPassContext,
    pub actual: RenderPassContext,
    pub res: ResourceRef,
}

impl ErrorDetail for RenderPassCompatibilityError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::LayoutIncompatible
    }

    fn collect_related(&self, related: &mut RelatedObjects) {
        related.push(self.res);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{RenderPipelineId, TypedId};

    #[test]
    fn trailing_holes_are_trimmed() {
        let a = RenderPassContext::new(
            [Some(TextureFormat::Rgba8Unorm), None, None],
            None,
            1,
        );
        let b = RenderPassContext::new([Some(TextureFormat::Rgba8Unorm)], None, 1);
        assert_eq!(a, b);
        assert_eq!(a.color_formats().len(), 1);

        let holed = RenderPassContext::new([None, Some(TextureFormat::Rgba8Unorm)], None, 1);
        assert_eq!(holed.color_formats().len(), 2);
        assert_ne!(holed, b);
    }

    #[test]
    fn any_field_breaks_compatibility() {
        let res = ResourceRef::RenderPipeline(RenderPipelineId::zip(0, 1));
        let base = RenderPassContext::new(
            [Some(TextureFormat::Rgba8Unorm)],
            Some(TextureFormat::Depth24Plus),
            4,
        );
        assert!(base.check_compatible(&base.clone(), res).is_ok());
        let variants = [
            RenderPassContext::new(
                [Some(TextureFormat::R8Unorm)],
                Some(TextureFormat::Depth24Plus),
                4,
            ),
            RenderPassContext::new([Some(TextureFormat::Rgba8Unorm)], None, 4),
            RenderPassContext::new(
                [Some(TextureFormat::Rgba8Unorm)],
                Some(TextureFormat::Depth24Plus),
                1,
            ),
        ];
        for other in variants {
            let err = base.check_compatible(&other, res).unwrap_err();
            let message = err.to_string();
            assert!(message.contains("Rgba8Unorm"));
            assert_eq!(err.kind(), ErrorKind::LayoutIncompatible);
        }
    }

    #[test]
    fn limits_are_capped() {
        let limits = Limits {
            max_bind_groups: 9,
            ..Limits::default()
        };
        assert!(matches!(
            limits.check(),
            Err(DeviceError::LimitTooHigh {
                name: "max_bind_groups",
                ..
            })
        ));
        let limits = Limits {
            min_uniform_buffer_offset_alignment: 100,
            ..Limits::default()
        };
        assert_eq!(limits.check().unwrap_err().kind(), ErrorKind::MalformedArguments);
        assert!(Limits::default().check().is_ok());
    }

    #[cfg(feature = "ron")]
    #[test]
    fn limits_from_ron() {
        let limits = Limits::from_ron_str("(maxBindGroups: 2)").unwrap();
        assert_eq!(limits.max_bind_groups, 2);
        assert_eq!(limits.max_vertex_buffers, 8);
    }
}
